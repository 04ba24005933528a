// roots.rs
//! Zero-crossing detection for root functions `g(t, y)`.
//!
//! After every accepted step the solver evaluates `g` at the right end of the
//! not-yet-scanned interval. Components whose sign changed are refined on the
//! step's interpolant with the Illinois variant of regula falsi, which keeps
//! the crossing bracketed and always returns a point on the far side of it.

use std::cell::Cell;

use crate::common::EPS;
use crate::solver::SolverFailure;

const MAX_ITER: usize = 100;

/// True when `g` went from a non-zero value to zero or to the opposite sign.
///
/// A component that starts at exactly zero is not a new crossing.
pub fn sign_change(g_old: f64, g_new: f64) -> bool {
    if g_old == 0.0 || g_old * g_new > 0.0 {
        return false;
    }
    true
}

/// Locates a zero of `g` in `(a, b]` given `g(a) = ga` and `g(b) = gb` of
/// opposite sign (or `gb == 0`). The returned point `t` satisfies
/// `g(t) * ga <= 0`.
pub fn locate_root<G>(mut g: G, mut a: f64, mut ga: f64, mut b: f64, mut gb: f64, tol: f64) -> f64
where
    G: FnMut(f64) -> f64,
{
    // -1: `a` moved last, 1: `b` moved last
    let mut side = 0;

    for _ in 0..MAX_ITER {
        if (b - a).abs() <= tol {
            break;
        }

        let mut s = b - gb * (b - a) / (gb - ga);
        if !s.is_finite() || s <= a.min(b) || s >= a.max(b) {
            s = 0.5 * (a + b);
        }

        let gs = g(s);
        if gs * ga > 0.0 {
            a = s;
            ga = gs;
            if side == -1 {
                gb *= 0.5;
            }
            side = -1;
        } else {
            b = s;
            gb = gs;
            if side == 1 {
                ga *= 0.5;
            }
            side = 1;
        }
    }

    b
}

/// A crossing reported to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RootHit {
    pub t: f64,
    pub jroot: Vec<bool>,
}

/// Remembers how far the root functions have been scanned.
#[derive(Debug, Clone, Default)]
pub struct RootTracker {
    pub t_left: f64,
    g_left: Vec<f64>,
}

impl RootTracker {
    pub fn new(t0: f64, g0: Vec<f64>) -> Self {
        Self { t_left: t0, g_left: g0 }
    }

    /// Scans `(t_left, t_right]`. `g(t)` evaluates every root function along
    /// the current interpolant. On a hit the scan resumes from the root on
    /// the next call; otherwise it resumes from `t_right`.
    ///
    /// Fails with [`SolverFailure::IllegalInput`] when `g` returns a different
    /// number of values than it did at the start.
    pub fn scan<G>(&mut self, g: G, t_right: f64) -> Result<Option<RootHit>, SolverFailure>
    where
        G: Fn(f64) -> Vec<f64>,
    {
        let n_roots = self.g_left.len();
        if n_roots == 0 {
            self.t_left = t_right;
            return Ok(None);
        }

        let wrong_len = Cell::new(false);
        let g_checked = |t: f64| {
            let values = g(t);
            if values.len() != n_roots {
                wrong_len.set(true);
            }
            values
        };

        let g_right = g_checked(t_right);
        if wrong_len.get() {
            return Err(SolverFailure::IllegalInput);
        }
        let crossed: Vec<usize> = (0..n_roots)
            .filter(|&i| sign_change(self.g_left[i], g_right[i]))
            .collect();

        if crossed.is_empty() {
            self.t_left = t_right;
            self.g_left = g_right;
            return Ok(None);
        }

        let t_left = self.t_left;
        let tol = 100.0 * EPS * (t_left.abs() + t_right.abs()).max(f64::MIN_POSITIVE);
        let mut found = Vec::with_capacity(crossed.len());
        for &i in &crossed {
            let component = |s: f64| g_checked(s).get(i).copied().unwrap_or(0.0);
            let t = locate_root(component, t_left, self.g_left[i], t_right, g_right[i], tol);
            if wrong_len.get() {
                return Err(SolverFailure::IllegalInput);
            }
            found.push((i, t));
        }

        let t_root = found.iter().map(|&(_, t)| t).fold(f64::INFINITY, f64::min);
        let mut jroot = vec![false; n_roots];
        for &(i, t) in &found {
            if t - t_root <= tol {
                jroot[i] = true;
            }
        }

        let mut g_root = g_checked(t_root);
        if wrong_len.get() {
            return Err(SolverFailure::IllegalInput);
        }
        for (i, fired) in jroot.iter().enumerate() {
            if *fired && g_root[i] == 0.0 {
                g_root[i] = g_right[i];
            }
        }

        self.t_left = t_root;
        self.g_left = g_root;
        Ok(Some(RootHit { t: t_root, jroot }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sign_change_detection() {
        assert!(sign_change(-1.0, 1.0));
        assert!(sign_change(1.0, -1.0));
        assert!(sign_change(1.0, 0.0));
        assert!(!sign_change(0.0, 1.0));
        assert!(!sign_change(0.0, 0.0));
        assert!(!sign_change(1.0, 2.0));
        assert!(!sign_change(-1.0, -2.0));
    }

    #[test]
    fn test_locate_sqrt_two() {
        let t = locate_root(|x| x * x - 2.0, 0.0, -2.0, 2.0, 2.0, 1e-14);
        assert_relative_eq!(t, 2.0_f64.sqrt(), epsilon = 1e-12);
        // far side of the crossing
        assert!(t * t - 2.0 >= 0.0);
    }

    #[test]
    fn test_locate_large_times() {
        // crossing near 2e7 with a bracket of 1e7
        let root = 2.0745e7;
        let g = |t: f64| (root - t) * 1e-11;
        let t = locate_root(g, 1.5e7, g(1.5e7), 2.5e7, g(2.5e7), 100.0 * EPS * 4.0e7);
        assert_relative_eq!(t, root, max_relative = 1e-12);
    }

    #[test]
    fn test_scan_reports_earliest_root() {
        // g0 crosses at 0.7, g1 at 0.3
        let g = |t: f64| vec![t - 0.7, 0.3 - t];
        let mut tracker = RootTracker::new(0.0, g(0.0));

        let hit = tracker.scan(g, 1.0).unwrap().unwrap();
        assert_relative_eq!(hit.t, 0.3, epsilon = 1e-12);
        assert_eq!(hit.jroot, vec![false, true]);

        let hit = tracker.scan(g, 1.0).unwrap().unwrap();
        assert_relative_eq!(hit.t, 0.7, epsilon = 1e-12);
        assert_eq!(hit.jroot, vec![true, false]);

        assert_eq!(tracker.scan(g, 1.0), Ok(None));
        assert_eq!(tracker.t_left, 1.0);
    }

    #[test]
    fn test_scan_simultaneous_roots() {
        let g = |t: f64| vec![t - 0.5, 0.5 - t, 2.0];
        let mut tracker = RootTracker::new(0.0, g(0.0));
        let hit = tracker.scan(g, 1.0).unwrap().unwrap();
        assert_eq!(hit.jroot, vec![true, true, false]);
    }

    #[test]
    fn test_scan_without_roots() {
        let mut tracker = RootTracker::new(0.0, Vec::new());
        assert_eq!(tracker.scan(|_| Vec::new(), 2.0), Ok(None));
        assert_eq!(tracker.t_left, 2.0);
    }

    #[test]
    fn test_scan_rejects_changed_root_count() {
        let mut tracker = RootTracker::new(0.0, vec![1.0, 1.0]);
        let g = |t: f64| if t > 0.5 { vec![t] } else { vec![1.0, 1.0] };
        assert_eq!(tracker.scan(g, 0.4), Ok(None));
        assert_eq!(tracker.scan(g, 1.0), Err(SolverFailure::IllegalInput));
    }

    #[test]
    fn test_scan_rejects_changed_count_while_refining() {
        // right end is fine, the interior evaluations are short
        let mut tracker = RootTracker::new(0.0, vec![-1.0]);
        let g = |t: f64| if t == 1.0 { vec![1.0] } else { Vec::new() };
        assert_eq!(tracker.scan(g, 1.0), Err(SolverFailure::IllegalInput));
    }
}
