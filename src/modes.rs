// modes.rs
//! Selectors that turn caller options into the integer-coded mode contract
//! between the driver and a [`Solver`](crate::solver::Solver), plus the
//! workspace sizing rule.

use crate::IntegratorError;

/// Default relative and absolute tolerance.
pub const DEFAULT_TOL: f64 = 1.49012e-8;

/// A tolerance given either once for all components or per component.
#[derive(Debug, Clone, PartialEq)]
pub enum Tolerance {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Tolerance {
    /// Tolerance that applies to component `i`.
    pub fn at(&self, i: usize) -> f64 {
        match self {
            Tolerance::Scalar(v) => *v,
            Tolerance::Vector(v) => v[i],
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Tolerance::Vector(_))
    }

    pub fn min(&self) -> f64 {
        match self {
            Tolerance::Scalar(v) => *v,
            Tolerance::Vector(v) => v.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }

    fn check_len(&self, which: &'static str, n: usize) -> Result<(), IntegratorError> {
        match self {
            Tolerance::Vector(v) if v.len() != n => Err(IntegratorError::ToleranceLength {
                which,
                expected: n,
                found: v.len(),
            }),
            _ => Ok(()),
        }
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance::Scalar(DEFAULT_TOL)
    }
}

impl From<f64> for Tolerance {
    fn from(v: f64) -> Self {
        Tolerance::Scalar(v)
    }
}

impl From<Vec<f64>> for Tolerance {
    fn from(v: Vec<f64>) -> Self {
        Tolerance::Vector(v)
    }
}

/// Relative and absolute tolerance pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tolerances {
    pub rtol: Tolerance,
    pub atol: Tolerance,
}

/// How `rtol`/`atol` are interpreted (LSODA `itol`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToleranceMode {
    ScalarScalar,
    ScalarVector,
    VectorScalar,
    VectorVector,
}

impl ToleranceMode {
    pub fn code(self) -> i32 {
        match self {
            ToleranceMode::ScalarScalar => 1,
            ToleranceMode::ScalarVector => 2,
            ToleranceMode::VectorScalar => 3,
            ToleranceMode::VectorVector => 4,
        }
    }

    /// `(rtol, atol)` for component `i`.
    pub fn pair(self, tol: &Tolerances, i: usize) -> (f64, f64) {
        match self {
            ToleranceMode::ScalarScalar => (tol.rtol.at(0), tol.atol.at(0)),
            ToleranceMode::ScalarVector => (tol.rtol.at(0), tol.atol.at(i)),
            ToleranceMode::VectorScalar => (tol.rtol.at(i), tol.atol.at(0)),
            ToleranceMode::VectorVector => (tol.rtol.at(i), tol.atol.at(i)),
        }
    }
}

/// Checks vector lengths against the state dimension and picks the mode.
pub fn resolve_tolerances(tol: &Tolerances, n: usize) -> Result<ToleranceMode, IntegratorError> {
    tol.rtol.check_len("rtol", n)?;
    tol.atol.check_len("atol", n)?;

    Ok(match (tol.rtol.is_vector(), tol.atol.is_vector()) {
        (false, false) => ToleranceMode::ScalarScalar,
        (false, true) => ToleranceMode::ScalarVector,
        (true, false) => ToleranceMode::VectorScalar,
        (true, true) => ToleranceMode::VectorVector,
    })
}

/// Lower and upper half-bandwidths of a banded Jacobian.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Band {
    pub lower: usize,
    pub upper: usize,
}

impl Band {
    pub fn is_banded(&self) -> bool {
        self.lower > 0 || self.upper > 0
    }

    /// Number of stored diagonals in the packed layout.
    pub fn width(&self) -> usize {
        self.lower + self.upper + 1
    }
}

/// Jacobian handling (LSODA `jt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JacobianMode {
    UserFull,
    InternalFull,
    UserBanded,
    InternalBanded,
}

impl JacobianMode {
    pub fn code(self) -> i32 {
        match self {
            JacobianMode::UserFull => 1,
            JacobianMode::InternalFull => 2,
            JacobianMode::UserBanded => 4,
            JacobianMode::InternalBanded => 5,
        }
    }

    pub fn is_banded(self) -> bool {
        matches!(self, JacobianMode::UserBanded | JacobianMode::InternalBanded)
    }
}

pub fn select_jacobian_mode(supplied: bool, banded: bool) -> JacobianMode {
    match (supplied, banded) {
        (true, false) => JacobianMode::UserFull,
        (false, false) => JacobianMode::InternalFull,
        (true, true) => JacobianMode::UserBanded,
        (false, true) => JacobianMode::InternalBanded,
    }
}

/// Stepping mode (LSODA `itask`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
    /// Step past the target and interpolate back to it.
    Normal,
    /// Like `Normal`, but never step past the current critical time.
    Critical,
    /// Take a single internal step per call, never passing the critical time.
    CriticalOneStep,
}

impl TaskMode {
    pub fn code(self) -> i32 {
        match self {
            TaskMode::Normal => 1,
            TaskMode::Critical => 4,
            TaskMode::CriticalOneStep => 5,
        }
    }

    pub fn uses_critical_times(self) -> bool {
        !matches!(self, TaskMode::Normal)
    }
}

pub fn select_task_mode(has_critical_times: bool, intermediate_output: bool) -> TaskMode {
    if intermediate_output {
        TaskMode::CriticalOneStep
    } else if has_critical_times {
        TaskMode::Critical
    } else {
        TaskMode::Normal
    }
}

/// Builds the critical-time queue.
///
/// In intermediate-output mode the solver would otherwise step straight past
/// the requested output times, so every requested time after the first is
/// forced to be a stop. The result is sorted ascending without duplicates.
pub fn merge_critical_times(critical: &[f64], requested: &[f64], intermediate_output: bool) -> Vec<f64> {
    let mut merged = critical.to_vec();
    if intermediate_output {
        merged.extend(requested.iter().skip(1));
    }
    merged.sort_by(f64::total_cmp);
    merged.dedup();
    merged
}

/// Scratch capacity a solver needs, in reals and integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkspaceSize {
    pub real: usize,
    pub integer: usize,
}

pub fn workspace_size(n: usize, n_roots: usize, max_order_nonstiff: usize, max_order_stiff: usize, band: Band) -> WorkspaceSize {
    let lmat = (n * n + 2).max((2 * band.lower + band.upper + 1) * n + 2);
    let nonstiff = 20 + n * (max_order_nonstiff + 4) + 3 * n_roots;
    let stiff = 20 + n * (max_order_stiff + 4) + lmat + 3 * n_roots;

    WorkspaceSize {
        real: nonstiff.max(stiff),
        integer: 20 + n,
    }
}
