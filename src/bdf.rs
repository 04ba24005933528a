// bdf.rs
//! Variable-order BDF integrator (orders 1 to 5) behind the [`Solver`] trait.
//!
//! Steps are taken in backward-difference form with a simplified Newton
//! corrector. Output at a requested time is interpolated from the last step,
//! and root functions are scanned on that interpolant after every step.

use log::debug;
use nalgebra::DMatrix;

use crate::common::*;
use crate::dense_output::*;
use crate::modes::{workspace_size, JacobianMode, TaskMode, ToleranceMode, Tolerances, WorkspaceSize};
use crate::roots::{RootHit, RootTracker};
use crate::solver::{MethodKind, Problem, Solver, SolverFailure, SolverState, Status, StepReport, StepSettings};

type StepResult<T> = Result<T, SolverFailure>;

/// Fixed BDF coefficients, indexed by order.
#[derive(Debug, Clone)]
struct BdfCoefficients {
    gamma: Vec<f64>,
    alpha: Vec<f64>,
    error_const: Vec<f64>,
}

impl BdfCoefficients {
    fn new() -> Self {
        let kappa = [0.0, -0.1850, -1.0 / 9.0, -0.0823, -0.0415, 0.0];
        let mut gamma = vec![0.0];
        for i in 1..=MAX_ORDER {
            gamma.push(gamma[i - 1] + 1.0 / i as f64);
        }
        let alpha = (0..=MAX_ORDER).map(|i| (1.0 - kappa[i]) * gamma[i]).collect();
        let error_const = (0..=MAX_ORDER)
            .map(|i| kappa[i] * gamma[i] + 1.0 / (i as f64 + 1.0))
            .collect();

        Self { gamma, alpha, error_const }
    }
}

/// Scratch state of one integration request.
pub struct BdfWorkspace {
    capacity: WorkspaceSize,
    required: WorkspaceSize,
    coefficients: BdfCoefficients,
    t: f64,
    y: Vec<f64>,
    t_old: Option<f64>,
    h_abs: f64,
    hu: f64,
    order: usize,
    nqu: usize,
    max_order: usize,
    n_equal_steps: usize,
    newton_tol: f64,
    d: Vec<Vec<f64>>,
    jac: DMatrix<f64>,
    lu: Option<LuFactor>,
    nst: usize,
    nfe: usize,
    nje: usize,
    nlu: usize,
    tolsf: f64,
    tsw: f64,
    imxer: Option<usize>,
    roots: RootTracker,
}

impl BdfWorkspace {
    fn new(capacity: WorkspaceSize) -> Self {
        Self {
            capacity,
            required: WorkspaceSize { real: 0, integer: 0 },
            coefficients: BdfCoefficients::new(),
            t: 0.0,
            y: Vec::new(),
            t_old: None,
            h_abs: 0.0,
            hu: 0.0,
            order: 1,
            nqu: 0,
            max_order: MAX_ORDER,
            n_equal_steps: 0,
            newton_tol: 0.0,
            d: Vec::new(),
            jac: DMatrix::zeros(0, 0),
            lu: None,
            nst: 0,
            nfe: 0,
            nje: 0,
            nlu: 0,
            tolsf: 0.0,
            tsw: 0.0,
            imxer: None,
            roots: RootTracker::default(),
        }
    }

    fn dense_output(&self) -> Option<BdfDenseOutput> {
        self.t_old
            .map(|_| BdfDenseOutput::new(self.t, self.h_abs, self.order, self.d[..=self.order].to_vec()))
    }

    /// Number of LU factorizations so far.
    pub fn lu_count(&self) -> usize {
        self.nlu
    }
}

/// Read-only inputs of one `advance` call.
struct StepContext<'a, 'p> {
    problem: &'a Problem<'p>,
    tolerances: &'a Tolerances,
    itol: ToleranceMode,
    jt: JacobianMode,
    settings: &'a StepSettings,
}

impl StepContext<'_, '_> {
    fn scale(&self, y: &[f64]) -> StepResult<Vec<f64>> {
        let scale = error_scale(self.itol, self.tolerances, y);
        if scale.iter().any(|&s| s <= 0.0) {
            return Err(SolverFailure::ZeroErrorWeight);
        }
        Ok(scale)
    }

    fn max_step(&self) -> f64 {
        if self.settings.max_step > 0.0 {
            self.settings.max_step
        } else {
            f64::INFINITY
        }
    }

    fn jacobian(&self, ws: &mut BdfWorkspace, t: f64, y: &[f64]) -> StepResult<DMatrix<f64>> {
        let n = y.len();
        ws.nje += 1;

        let jac = match self.jt {
            JacobianMode::UserFull => self.problem.jacobian(t, y).filter(|j| j.shape() == (n, n)),
            JacobianMode::UserBanded => self
                .problem
                .jacobian(t, y)
                .and_then(|packed| unpack_band(&packed, self.settings.band, n)),
            JacobianMode::InternalFull | JacobianMode::InternalBanded => {
                let f = self.problem.rhs(t, y);
                ws.nfe += 1 + n;
                let scale = error_scale(self.itol, self.tolerances, y);
                let mut jac = num_jac(|t, y| self.problem.rhs(t, y), t, y, &f, &scale);
                if self.jt == JacobianMode::InternalBanded {
                    mask_to_band(&mut jac, self.settings.band);
                }
                Some(jac)
            }
        };

        jac.ok_or(SolverFailure::IllegalInput)
    }
}

struct NewtonSolution {
    n_iter: usize,
    y: Vec<f64>,
    d: Vec<f64>,
}

/// Solves the implicit BDF system with a fixed iteration matrix.
#[allow(clippy::too_many_arguments)]
fn solve_bdf_system(
    problem: &Problem<'_>,
    nfe: &mut usize,
    lu: &LuFactor,
    t_new: f64,
    y_predict: &[f64],
    c: f64,
    psi: &[f64],
    scale: &[f64],
    newton_tol: f64,
) -> Option<NewtonSolution> {
    let n = y_predict.len();
    let mut d = vec![0.0; n];
    let mut y = y_predict.to_vec();
    let mut dy_norm_old: Option<f64> = None;

    for k in 0..NEWTON_MAXITER {
        let f = problem.rhs(t_new, &y);
        *nfe += 1;
        if !f.iter().all(|x| x.is_finite()) {
            return None;
        }

        let rhs: Vec<f64> = f
            .iter()
            .zip(psi)
            .zip(&d)
            .map(|((&fi, &psi_i), &di)| c * fi - psi_i - di)
            .collect();
        let dy = lu.solve(&rhs)?;
        let dy_norm = weighted_norm(&dy, scale);

        let rate = dy_norm_old.map(|old| dy_norm / old);
        if let Some(r) = rate {
            if r >= 1.0 || r.powi((NEWTON_MAXITER - k) as i32) / (1.0 - r) * dy_norm > newton_tol {
                return None;
            }
        }

        for i in 0..n {
            y[i] += dy[i];
            d[i] += dy[i];
        }

        let converged = dy_norm == 0.0 || rate.is_some_and(|r| r / (1.0 - r) * dy_norm < newton_tol);
        if converged {
            return Some(NewtonSolution { n_iter: k + 1, y, d });
        }
        dy_norm_old = Some(dy_norm);
    }

    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastFailure {
    Convergence,
    ErrorTest,
}

impl LastFailure {
    fn into_failure(self) -> SolverFailure {
        match self {
            LastFailure::Convergence => SolverFailure::RepeatedConvergenceFailures,
            LastFailure::ErrorTest => SolverFailure::RepeatedErrorTestFailures,
        }
    }
}

/// Result of a successful `advance`.
struct Reached {
    t: f64,
    y: Vec<f64>,
    jroot: Option<Vec<bool>>,
}

/// Stiff BDF backend. Integrates forward in time only and always reports
/// [`MethodKind::Bdf`]; the non-stiff order ceiling is only used for sizing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bdf;

impl Bdf {
    fn initialize(&self, ctx: &StepContext<'_, '_>, ws: &mut BdfWorkspace, t0: f64, y0: &[f64], target: f64) -> StepResult<()> {
        let n = y0.len();
        let settings = ctx.settings;

        if n == 0 || !y0.iter().all(|v| v.is_finite()) || !target.is_finite() || target < t0 {
            return Err(SolverFailure::IllegalInput);
        }
        let invalid = |v: f64| v < 0.0 || !v.is_finite();
        if invalid(settings.first_step)
            || invalid(settings.min_step)
            || invalid(settings.max_step)
            || (settings.max_step > 0.0 && settings.min_step > settings.max_step)
            || settings.max_steps == 0
            || settings.max_order_stiff == 0
        {
            return Err(SolverFailure::IllegalInput);
        }
        if (0..n).any(|i| {
            let (rtol, atol) = ctx.itol.pair(ctx.tolerances, i);
            invalid(rtol) || invalid(atol)
        }) {
            return Err(SolverFailure::IllegalInput);
        }

        ws.required = workspace_size(
            n,
            ctx.problem.n_roots,
            settings.max_order_nonstiff,
            settings.max_order_stiff,
            settings.band,
        );
        if ws.capacity.real < ws.required.real || ws.capacity.integer < ws.required.integer {
            return Err(SolverFailure::InsufficientWorkspace);
        }

        // a zero weight at the start is an input error, not a runtime one
        let scale = ctx.scale(y0).map_err(|_| SolverFailure::IllegalInput)?;

        let f0 = ctx.problem.rhs(t0, y0);
        ws.nfe = 1;
        if f0.len() != n || !f0.iter().all(|v| v.is_finite()) {
            return Err(SolverFailure::IllegalInput);
        }

        let g0 = ctx.problem.roots(t0, y0);
        if g0.len() != ctx.problem.n_roots {
            return Err(SolverFailure::IllegalInput);
        }

        let max_step = ctx.max_step();
        let h_abs = if settings.first_step > 0.0 {
            settings.first_step.min(max_step)
        } else {
            let h = select_initial_step(|t, y| ctx.problem.rhs(t, y), t0, y0, target, max_step, &f0, &scale);
            ws.nfe += 1;
            if h > 0.0 && h.is_finite() {
                h
            } else {
                1e-6_f64.min(max_step)
            }
        };

        let rtol_min = ctx.tolerances.rtol.min();

        ws.t = t0;
        ws.y = y0.to_vec();
        ws.t_old = None;
        ws.h_abs = h_abs;
        ws.order = 1;
        ws.max_order = settings.max_order_stiff.min(MAX_ORDER);
        ws.n_equal_steps = 0;
        ws.newton_tol = newton_tol(rtol_min.max(100.0 * EPS));
        ws.d = vec![vec![0.0; n]; MAX_ORDER + 3];
        ws.d[0] = y0.to_vec();
        ws.d[1] = f0.iter().map(|&f| f * h_abs).collect();
        ws.lu = None;
        ws.tsw = t0;
        ws.roots = RootTracker::new(t0, g0);
        ws.jac = ctx.jacobian(ws, t0, y0)?;

        debug!("bdf initialized: n = {}, h0 = {:e}, max order = {}", n, h_abs, ws.max_order);
        Ok(())
    }

    /// One accepted step, never passing `stop`.
    fn step(&self, ctx: &StepContext<'_, '_>, ws: &mut BdfWorkspace, stop: Option<f64>) -> StepResult<()> {
        let t = ws.t;
        let n = ws.y.len();
        if stop.is_some_and(|stop| stop <= t) {
            return Err(SolverFailure::IllegalInput);
        }

        let scale = ctx.scale(&ws.y)?;
        let tolsf = EPS * ws.y.iter().zip(&scale).map(|(y, s)| (y / s).abs()).fold(0.0, f64::max);
        if tolsf > 1.0 {
            ws.tolsf = 2.0 * tolsf;
            return Err(SolverFailure::ExcessAccuracy);
        }

        let max_step = ctx.max_step();
        let min_step = min_step_at(t).max(ctx.settings.min_step);
        let order = ws.order;

        if ws.h_abs > max_step {
            change_d(&mut ws.d, order, max_step / ws.h_abs);
            ws.h_abs = max_step;
            ws.n_equal_steps = 0;
            ws.lu = None;
        } else if ws.h_abs < min_step {
            change_d(&mut ws.d, order, min_step / ws.h_abs);
            ws.h_abs = min_step;
            ws.n_equal_steps = 0;
            ws.lu = None;
        }

        let coef = ws.coefficients.clone();
        let mut h_abs = ws.h_abs;
        let mut current_jac = false;
        let mut convergence_failures = 0;
        let mut last_failure = LastFailure::ErrorTest;

        let (t_new, accepted, error_norm, safety) = loop {
            if h_abs < min_step {
                return Err(last_failure.into_failure());
            }

            let mut t_new = t + h_abs;
            if let Some(stop) = stop {
                if t_new > stop {
                    t_new = stop;
                    change_d(&mut ws.d, order, (t_new - t) / h_abs);
                    ws.n_equal_steps = 0;
                    ws.lu = None;
                }
            }
            let h = t_new - t;
            h_abs = h;

            let y_predict: Vec<f64> = (0..n).map(|i| (0..=order).map(|j| ws.d[j][i]).sum()).collect();
            let scale = ctx.scale(&y_predict)?;
            let psi: Vec<f64> = (0..n)
                .map(|i| (1..=order).map(|j| ws.d[j][i] * coef.gamma[j]).sum::<f64>() / coef.alpha[order])
                .collect();
            let c = h / coef.alpha[order];

            let newton = loop {
                if ws.lu.is_none() {
                    let iteration_matrix = DMatrix::identity(n, n) - &ws.jac * c;
                    ws.lu = LuFactor::new(iteration_matrix);
                    ws.nlu += 1;
                }

                let solution = match &ws.lu {
                    Some(lu) => solve_bdf_system(
                        ctx.problem,
                        &mut ws.nfe,
                        lu,
                        t_new,
                        &y_predict,
                        c,
                        &psi,
                        &scale,
                        ws.newton_tol,
                    ),
                    None => None,
                };

                if solution.is_some() || current_jac {
                    break solution;
                }
                ws.jac = ctx.jacobian(ws, t_new, &y_predict)?;
                ws.lu = None;
                current_jac = true;
            };

            let Some(solution) = newton else {
                convergence_failures += 1;
                last_failure = LastFailure::Convergence;
                if convergence_failures >= MAX_FAILURES {
                    return Err(last_failure.into_failure());
                }
                h_abs *= 0.5;
                change_d(&mut ws.d, order, 0.5);
                ws.n_equal_steps = 0;
                ws.lu = None;
                continue;
            };

            let safety = 0.9 * (2 * NEWTON_MAXITER + 1) as f64 / (2 * NEWTON_MAXITER + solution.n_iter) as f64;
            let scale = ctx.scale(&solution.y)?;
            let weighted: Vec<f64> = solution
                .d
                .iter()
                .zip(&scale)
                .map(|(&di, &s)| coef.error_const[order] * di / s)
                .collect();
            let error_norm = norm(&weighted);

            if error_norm > 1.0 {
                // error test failures end only when h drops below min_step
                last_failure = LastFailure::ErrorTest;
                ws.imxer = weighted
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
                    .map(|(i, _)| i);
                let factor = MIN_FACTOR.max(safety * error_norm.powf(-1.0 / (order as f64 + 1.0)));
                h_abs *= factor;
                change_d(&mut ws.d, order, factor);
                ws.n_equal_steps = 0;
                ws.lu = None;
                continue;
            }

            break (t_new, solution, error_norm, safety);
        };

        ws.nst += 1;
        ws.hu = h_abs;
        ws.nqu = order;
        ws.n_equal_steps += 1;
        ws.t_old = Some(t);
        ws.t = t_new;
        ws.y = accepted.y;
        ws.h_abs = h_abs;

        // D^{j+1} y_n = D^j y_n - D^j y_{n-1}, with d = D^{order+1} y_n
        let d_new = accepted.d;
        ws.d[order + 2] = d_new.iter().zip(&ws.d[order + 1]).map(|(a, b)| a - b).collect();
        ws.d[order + 1] = d_new;
        for i in (0..=order).rev() {
            for j in 0..n {
                ws.d[i][j] += ws.d[i + 1][j];
            }
        }

        if ws.n_equal_steps < order + 1 {
            return Ok(());
        }

        let scale = ctx.scale(&ws.y)?;
        let error_m_norm = if order > 1 {
            let e: Vec<f64> = ws.d[order].iter().map(|&v| coef.error_const[order - 1] * v).collect();
            weighted_norm(&e, &scale)
        } else {
            f64::INFINITY
        };
        let error_p_norm = if order < ws.max_order {
            let e: Vec<f64> = ws.d[order + 2].iter().map(|&v| coef.error_const[order + 1] * v).collect();
            weighted_norm(&e, &scale)
        } else {
            f64::INFINITY
        };

        let factors = [
            error_m_norm.powf(-1.0 / order as f64),
            error_norm.powf(-1.0 / (order as f64 + 1.0)),
            error_p_norm.powf(-1.0 / (order as f64 + 2.0)),
        ];
        let (best, max_factor) = factors
            .iter()
            .copied()
            .enumerate()
            .fold((1, factors[1]), |acc, (i, f)| if f > acc.1 { (i, f) } else { acc });

        let new_order = order + best - 1;
        let factor = MAX_FACTOR.min(safety * max_factor);
        ws.order = new_order;
        ws.h_abs *= factor;
        change_d(&mut ws.d, new_order, factor);
        ws.n_equal_steps = 0;
        ws.lu = None;

        Ok(())
    }

    fn interpolate(ws: &BdfWorkspace, dense: Option<&BdfDenseOutput>, t: f64) -> Vec<f64> {
        match dense {
            Some(dense) if t != ws.t => dense.call(t),
            _ => ws.y.clone(),
        }
    }

    fn scan_roots(ctx: &StepContext<'_, '_>, ws: &mut BdfWorkspace, limit: f64) -> StepResult<Option<RootHit>> {
        if ctx.problem.n_roots == 0 {
            ws.roots.t_left = limit;
            return Ok(None);
        }
        let dense = ws.dense_output();
        let mut tracker = std::mem::take(&mut ws.roots);
        let hit = tracker.scan(|s| ctx.problem.roots(s, &Self::interpolate(ws, dense.as_ref(), s)), limit);
        ws.roots = tracker;
        hit
    }

    fn run(
        &self,
        ctx: &StepContext<'_, '_>,
        ws: &mut BdfWorkspace,
        itask: TaskMode,
        tcrit: Option<f64>,
        t_last: f64,
        target: f64,
    ) -> StepResult<Reached> {
        if !target.is_finite() || target < t_last {
            return Err(SolverFailure::IllegalInput);
        }
        let one_step = itask == TaskMode::CriticalOneStep;
        let stop = if itask.uses_critical_times() { tcrit } else { None };
        if stop.is_some_and(|stop| stop < ws.t || stop < target) {
            return Err(SolverFailure::IllegalInput);
        }

        let mut steps = 0;
        let mut stepped = false;
        loop {
            let limit = if one_step { ws.t } else { ws.t.min(target) };
            let pending = limit > ws.roots.t_left;
            if pending {
                if let Some(hit) = Self::scan_roots(ctx, ws, limit)? {
                    let dense = ws.dense_output();
                    let y = Self::interpolate(ws, dense.as_ref(), hit.t);
                    return Ok(Reached {
                        t: hit.t,
                        y,
                        jroot: Some(hit.jroot),
                    });
                }
            }

            if one_step && (stepped || pending) {
                return Ok(Reached {
                    t: ws.t,
                    y: ws.y.clone(),
                    jroot: None,
                });
            }
            if !one_step && ws.t >= target {
                let dense = ws.dense_output();
                let y = Self::interpolate(ws, dense.as_ref(), target);
                return Ok(Reached { t: target, y, jroot: None });
            }

            if steps >= ctx.settings.max_steps {
                return Err(SolverFailure::ExcessWork);
            }
            self.step(ctx, ws, stop)?;
            steps += 1;
            stepped = true;
        }
    }
}

impl Solver for Bdf {
    type Workspace = BdfWorkspace;

    fn workspace(&self, capacity: WorkspaceSize) -> BdfWorkspace {
        BdfWorkspace::new(capacity)
    }

    fn advance(&self, problem: &Problem<'_>, state: &mut SolverState<BdfWorkspace>, target: f64) {
        let SolverState {
            t,
            y,
            status,
            itol,
            itask,
            jt,
            tolerances,
            settings,
            tcrit,
            jroot,
            workspace: ws,
        } = state;

        let ctx = StepContext {
            problem,
            tolerances,
            itol: *itol,
            jt: *jt,
            settings,
        };

        let result = match *status {
            Status::Failed(_) => Err(SolverFailure::IllegalInput),
            Status::FirstCall => self
                .initialize(&ctx, ws, *t, y, target)
                .and_then(|()| self.run(&ctx, ws, *itask, *tcrit, *t, target)),
            Status::Success | Status::RootFound => self.run(&ctx, ws, *itask, *tcrit, *t, target),
        };

        jroot.iter_mut().for_each(|r| *r = false);
        match result {
            Ok(reached) => {
                *t = reached.t;
                *y = reached.y;
                *status = match reached.jroot {
                    Some(fired) => {
                        jroot.copy_from_slice(&fired);
                        Status::RootFound
                    }
                    None => Status::Success,
                };
            }
            Err(failure) => {
                if !ws.y.is_empty() {
                    *t = ws.t;
                    *y = ws.y.clone();
                }
                *status = Status::Failed(failure);
            }
        }
    }

    fn report(&self, ws: &BdfWorkspace) -> StepReport {
        StepReport {
            hu: ws.hu,
            tcur: ws.t,
            tolsf: ws.tolsf,
            tsw: ws.tsw,
            nst: ws.nst,
            nfe: ws.nfe,
            nje: ws.nje,
            nqu: ws.nqu,
            imxer: ws.imxer,
            lenrw: ws.required.real,
            leniw: ws.required.integer,
            mused: MethodKind::Bdf,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::{select_jacobian_mode, Tolerance};
    use crate::solver::{RhsFunction, RootFunction};
    use approx::assert_relative_eq;

    fn new_state(y0: Vec<f64>, itask: TaskMode, n_roots: usize, rtol: f64, atol: f64) -> SolverState<BdfWorkspace> {
        let settings = StepSettings::default();
        let capacity = workspace_size(y0.len(), n_roots, 12, 5, settings.band);
        SolverState::new(
            0.0,
            y0,
            ToleranceMode::ScalarScalar,
            itask,
            select_jacobian_mode(false, false),
            Tolerances {
                rtol: Tolerance::Scalar(rtol),
                atol: Tolerance::Scalar(atol),
            },
            settings,
            n_roots,
            Bdf.workspace(capacity),
        )
    }

    fn problem<'a>(rhs: &'a RhsFunction, roots: Option<&'a RootFunction>, n_roots: usize) -> Problem<'a> {
        Problem {
            rhs,
            jacobian: None,
            roots,
            n_roots,
            args: &[],
        }
    }

    #[test]
    fn test_exponential_decay_normal_mode() {
        let rhs: RhsFunction = Box::new(|_t, y, _| vec![-y[0]]);
        let problem = problem(&rhs, None, 0);
        let mut state = new_state(vec![1.0], TaskMode::Normal, 0, 1e-8, 1e-12);

        for &target in &[0.5, 1.0, 5.0] {
            Bdf.advance(&problem, &mut state, target);
            assert_eq!(state.status, Status::Success);
            assert_eq!(state.t, target);
            assert_relative_eq!(state.y[0], (-target).exp(), max_relative = 1e-5);
        }

        let report = Bdf.report(&state.workspace);
        assert!(report.nst > 0);
        assert!(report.tcur >= 5.0);
        assert!(report.nqu >= 1 && report.nqu <= 5);
        assert_eq!(report.mused, MethodKind::Bdf);
    }

    #[test]
    fn test_critical_time_is_hit_exactly() {
        let rhs: RhsFunction = Box::new(|_t, y, _| vec![-y[0]]);
        let problem = problem(&rhs, None, 0);
        let mut state = new_state(vec![1.0], TaskMode::Critical, 0, 1e-6, 1e-9);
        state.tcrit = Some(0.3);

        Bdf.advance(&problem, &mut state, 0.3);
        assert_eq!(state.status, Status::Success);
        assert_eq!(state.t, 0.3);
        assert_eq!(Bdf.report(&state.workspace).tcur, 0.3);
    }

    #[test]
    fn test_one_step_mode_never_passes_tcrit() {
        let rhs: RhsFunction = Box::new(|_t, y, _| vec![-y[0]]);
        let problem = problem(&rhs, None, 0);
        let mut state = new_state(vec![1.0], TaskMode::CriticalOneStep, 0, 1e-6, 1e-9);
        state.tcrit = Some(1.0);

        let mut previous = 0.0;
        let mut calls = 0;
        while state.t < 1.0 {
            Bdf.advance(&problem, &mut state, 1.0);
            assert_eq!(state.status, Status::Success);
            assert!(state.t > previous && state.t <= 1.0);
            previous = state.t;
            calls += 1;
            assert!(calls < 1000);
        }
        assert_eq!(state.t, 1.0);
        assert_eq!(Bdf.report(&state.workspace).nst, calls);
    }

    #[test]
    fn test_root_then_continue() {
        let rhs: RhsFunction = Box::new(|_t, _y, _| vec![1.0]);
        let g: RootFunction = Box::new(|_t, y, _| vec![y[0] - 2.5]);
        let problem = problem(&rhs, Some(&g), 1);
        let mut state = new_state(vec![0.0], TaskMode::Normal, 1, 1e-8, 1e-10);

        Bdf.advance(&problem, &mut state, 10.0);
        assert_eq!(state.status, Status::RootFound);
        assert_eq!(state.jroot, vec![true]);
        assert_relative_eq!(state.t, 2.5, epsilon = 1e-8);
        assert_relative_eq!(state.y[0], 2.5, epsilon = 1e-8);

        Bdf.advance(&problem, &mut state, 10.0);
        assert_eq!(state.status, Status::Success);
        assert_eq!(state.jroot, vec![false]);
        assert_eq!(state.t, 10.0);
        assert_relative_eq!(state.y[0], 10.0, epsilon = 1e-6);
    }

    #[test]
    fn test_root_function_changing_length_is_illegal_input() {
        let rhs: RhsFunction = Box::new(|_t, _y, _| vec![1.0]);
        let g: RootFunction = Box::new(|_t, y, _| if y[0] < 1.0 { vec![y[0] - 5.0] } else { Vec::new() });
        let problem = problem(&rhs, Some(&g), 1);
        let mut state = new_state(vec![0.0], TaskMode::Normal, 1, 1e-8, 1e-10);

        Bdf.advance(&problem, &mut state, 3.0);
        assert_eq!(state.status, Status::Failed(SolverFailure::IllegalInput));
        assert_eq!(state.jroot, vec![false]);
    }

    #[test]
    fn test_excess_work() {
        let rhs: RhsFunction = Box::new(|_t, y, _| vec![-y[0]]);
        let problem = problem(&rhs, None, 0);
        let mut state = new_state(vec![1.0], TaskMode::Normal, 0, 1e-8, 1e-12);
        state.settings.max_steps = 1;

        Bdf.advance(&problem, &mut state, 100.0);
        assert_eq!(state.status, Status::Failed(SolverFailure::ExcessWork));
        assert!(state.t > 0.0 && state.t < 100.0);
    }

    #[test]
    fn test_insufficient_workspace() {
        let rhs: RhsFunction = Box::new(|_t, y, _| vec![-y[0]]);
        let problem = problem(&rhs, None, 0);
        let mut state = new_state(vec![1.0], TaskMode::Normal, 0, 1e-6, 1e-9);
        state.workspace = Bdf.workspace(WorkspaceSize { real: 10, integer: 10 });

        Bdf.advance(&problem, &mut state, 1.0);
        assert_eq!(state.status.code(), -7);
        assert_eq!(state.t, 0.0);
    }

    #[test]
    fn test_illegal_inputs() {
        let rhs: RhsFunction = Box::new(|_t, y, _| vec![-y[0]]);
        let problem = problem(&rhs, None, 0);

        let mut state = new_state(vec![1.0], TaskMode::Normal, 0, -1e-6, 1e-9);
        Bdf.advance(&problem, &mut state, 1.0);
        assert_eq!(state.status, Status::Failed(SolverFailure::IllegalInput));

        // zero error weight at the initial point
        let mut state = new_state(vec![0.0], TaskMode::Normal, 0, 1e-6, 0.0);
        Bdf.advance(&problem, &mut state, 1.0);
        assert_eq!(state.status.code(), -3);

        // going backwards
        let mut state = new_state(vec![1.0], TaskMode::Normal, 0, 1e-6, 1e-9);
        Bdf.advance(&problem, &mut state, 1.0);
        Bdf.advance(&problem, &mut state, 0.5);
        assert_eq!(state.status.code(), -3);
    }

    #[test]
    fn test_user_jacobian_is_used() {
        let rhs: RhsFunction = Box::new(|_t, y, _| vec![-50.0 * y[0]]);
        let jac: crate::solver::JacobianFunction = Box::new(|_t, _y, _| DMatrix::from_element(1, 1, -50.0));
        let problem = Problem {
            rhs: &rhs,
            jacobian: Some(&jac),
            roots: None,
            n_roots: 0,
            args: &[],
        };
        let mut state = new_state(vec![1.0], TaskMode::Normal, 0, 1e-7, 1e-12);
        state.jt = JacobianMode::UserFull;

        Bdf.advance(&problem, &mut state, 0.1);
        assert_eq!(state.status, Status::Success);
        assert_relative_eq!(state.y[0], (-5.0_f64).exp(), max_relative = 1e-4);
        assert!(Bdf.report(&state.workspace).nje >= 1);
        assert!(state.workspace.lu_count() >= 1);
    }
}
