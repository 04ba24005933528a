// lib.rs
//! Drives a multistep ODE solver over a list of output times, with root
//! detection, critical stop times, intermediate output and per-point
//! diagnostics.
//!
//! ```ignore
//! let rhs: RhsFunction = Box::new(|_t, y, _args| vec![-y[0]]);
//! let solution = integrate(rhs, vec![1.0], &[0.0, 1.0, 2.0], None)?;
//! ```
use log::{debug, info};
use thiserror::Error;

pub mod bdf;
pub mod common;
pub mod dense_output;
pub mod driver;
pub mod modes;
pub mod output;
pub mod roots;
pub mod solver;

pub use bdf::Bdf;
pub use driver::{DriverWarning, RootEvent, Termination};
pub use modes::{Band, Tolerance, DEFAULT_TOL};
pub use output::{DiagnosticField, Diagnostics, RootLog, Solution, SolutionShape};
pub use solver::{JacobianFunction, RhsFunction, RootFunction, Solver, SolverFailure, Status};

use driver::{CriticalTimeQueue, DriverConfig, SteppingDriver};
use modes::*;
use output::{assemble, RequestedOutputs};
use solver::{Problem, SolverState, StepSettings};

/// Problems with a request, detected before the solver is called.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IntegratorError {
    #[error("Vector array of tolerances must have same length as number of equations: {which} has length {found}, expected {expected}")]
    ToleranceLength {
        which: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Initial state must not be empty")]
    EmptyState,

    #[error("Output times error: {message}")]
    TimesError { message: String },

    #[error("Critical times error: {message}")]
    CriticalTimesError { message: String },

    #[error("Root specification error: {message}")]
    RootError { message: String },

    #[error("Method order ceilings must be positive: nonstiff = {nonstiff}, stiff = {stiff}")]
    OrderError { nonstiff: usize, stiff: usize },
}

/// Root functions to monitor and which of them end the run.
pub struct RootSpec {
    pub function: RootFunction,
    /// One flag per root function; its length is the number of roots.
    pub terminal: Vec<bool>,
}

pub struct IntegrateOptions {
    /// Extra arguments passed to every user function.
    pub args: Vec<f64>,
    pub jacobian: Option<JacobianFunction>,
    pub band: Band,
    pub rtol: Tolerance,
    pub atol: Tolerance,
    pub critical_times: Vec<f64>,
    /// `0.0` lets the solver choose.
    pub first_step: f64,
    pub max_step: f64,
    pub min_step: f64,
    /// Internal steps allowed per output point; `0` means 500.
    pub max_steps: usize,
    pub max_order_nonstiff: usize,
    pub max_order_stiff: usize,
    pub print_messages: bool,
    pub intermediate_output: bool,
    pub roots: Option<RootSpec>,
    pub full_output: bool,
}

impl Default for IntegrateOptions {
    fn default() -> Self {
        let settings = StepSettings::default();
        Self {
            args: Vec::new(),
            jacobian: None,
            band: Band::default(),
            rtol: Tolerance::default(),
            atol: Tolerance::default(),
            critical_times: Vec::new(),
            first_step: settings.first_step,
            max_step: settings.max_step,
            min_step: settings.min_step,
            max_steps: settings.max_steps,
            max_order_nonstiff: settings.max_order_nonstiff,
            max_order_stiff: settings.max_order_stiff,
            print_messages: false,
            intermediate_output: false,
            roots: None,
            full_output: false,
        }
    }
}

impl IntegrateOptions {
    fn settings(&self) -> StepSettings {
        let defaults = StepSettings::default();
        StepSettings {
            first_step: self.first_step,
            max_step: self.max_step,
            min_step: self.min_step,
            max_steps: if self.max_steps == 0 { defaults.max_steps } else { self.max_steps },
            max_order_nonstiff: self.max_order_nonstiff,
            max_order_stiff: self.max_order_stiff,
            band: self.band,
        }
    }

    fn validate(&self, y0: &[f64], t: &[f64]) -> Result<(), IntegratorError> {
        if y0.is_empty() {
            return Err(IntegratorError::EmptyState);
        }

        if t.is_empty() {
            return Err(IntegratorError::TimesError {
                message: "at least the initial time is required".to_string(),
            });
        }
        if let Some(bad) = t.iter().find(|v| !v.is_finite()) {
            return Err(IntegratorError::TimesError {
                message: format!("non-finite time {}", bad),
            });
        }
        if let Some(i) = t.windows(2).position(|w| w[1] < w[0]) {
            return Err(IntegratorError::TimesError {
                message: format!("times must be non-decreasing: t[{}] = {} < t[{}] = {}", i + 1, t[i + 1], i, t[i]),
            });
        }

        if let Some(bad) = self.critical_times.iter().find(|v| !v.is_finite()) {
            return Err(IntegratorError::CriticalTimesError {
                message: format!("non-finite critical time {}", bad),
            });
        }

        if let Some(roots) = &self.roots {
            if roots.terminal.is_empty() {
                return Err(IntegratorError::RootError {
                    message: "root termination flags must name at least one root".to_string(),
                });
            }
        }

        if self.max_order_nonstiff == 0 || self.max_order_stiff == 0 {
            return Err(IntegratorError::OrderError {
                nonstiff: self.max_order_nonstiff,
                stiff: self.max_order_stiff,
            });
        }

        Ok(())
    }
}

/// Integrates `dy/dt = rhs(t, y, args)` from `t[0]` with the [`Bdf`] solver,
/// returning the state at every time in `t`.
pub fn integrate(
    rhs: RhsFunction,
    y0: Vec<f64>,
    t: &[f64],
    options: Option<IntegrateOptions>,
) -> Result<Solution, IntegratorError> {
    integrate_with(&Bdf, rhs, y0, t, options)
}

/// Same as [`integrate`] with a caller-chosen solver.
///
/// Solver failures do not produce `Err`: the partial result is returned with
/// [`Solution::termination`] set to [`Termination::Failed`].
pub fn integrate_with<S: Solver>(
    solver: &S,
    rhs: RhsFunction,
    y0: Vec<f64>,
    t: &[f64],
    options: Option<IntegrateOptions>,
) -> Result<Solution, IntegratorError> {
    let opts = options.unwrap_or_default();
    opts.validate(&y0, t)?;

    let n = y0.len();
    let tolerances = Tolerances {
        rtol: opts.rtol.clone(),
        atol: opts.atol.clone(),
    };
    let itol = resolve_tolerances(&tolerances, n)?;
    let jt = select_jacobian_mode(opts.jacobian.is_some(), opts.band.is_banded());
    let itask = select_task_mode(!opts.critical_times.is_empty(), opts.intermediate_output);
    let critical = merge_critical_times(&opts.critical_times, t, opts.intermediate_output);

    let n_roots = opts.roots.as_ref().map_or(0, |r| r.terminal.len());
    let settings = opts.settings();
    let capacity = workspace_size(n, n_roots, settings.max_order_nonstiff, settings.max_order_stiff, settings.band);

    debug!(
        "integrate: n = {}, outputs = {}, itol = {}, jt = {}, itask = {}, roots = {}, lrw = {}, liw = {}",
        n,
        t.len(),
        itol.code(),
        jt.code(),
        itask.code(),
        n_roots,
        capacity.real,
        capacity.integer
    );

    let problem = Problem {
        rhs: &rhs,
        jacobian: opts.jacobian.as_ref(),
        roots: opts.roots.as_ref().map(|r| &r.function),
        n_roots,
        args: &opts.args,
    };
    let state = SolverState::new(
        t[0],
        y0,
        itol,
        itask,
        jt,
        tolerances,
        settings,
        n_roots,
        solver.workspace(capacity),
    );

    let root_terminal = opts.roots.as_ref().map_or(&[][..], |r| r.terminal.as_slice());
    let config = DriverConfig {
        times: t,
        root_terminal,
        full_output: opts.full_output,
        print_messages: opts.print_messages,
    };
    let outcome = SteppingDriver::new(solver, &problem, state, CriticalTimeQueue::new(critical), config).run();

    if opts.print_messages {
        info!(
            "integrate finished: {} points, {} roots, {:?}",
            outcome.trace.len(),
            outcome.roots.len(),
            outcome.termination
        );
    }

    Ok(assemble(
        outcome,
        RequestedOutputs {
            intermediate_output: opts.intermediate_output,
            root_finding: opts.roots.is_some(),
            full_output: opts.full_output,
        },
    ))
}
