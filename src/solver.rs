// solver.rs
//! The contract between the stepping driver and a multistep solver.

use nalgebra::DMatrix;
use thiserror::Error;

use crate::modes::{Band, JacobianMode, TaskMode, ToleranceMode, Tolerances, WorkspaceSize};

/// `f(t, y, args) -> dy/dt`
pub type RhsFunction = Box<dyn Fn(f64, &[f64], &[f64]) -> Vec<f64>>;
/// `J(t, y, args)`; dense `n × n`, or packed `(ml + mu + 1) × n` when banded.
pub type JacobianFunction = Box<dyn Fn(f64, &[f64], &[f64]) -> DMatrix<f64>>;
/// `g(t, y, args)`, one value per monitored root.
pub type RootFunction = Box<dyn Fn(f64, &[f64], &[f64]) -> Vec<f64>>;

/// User functions of one request with the extra arguments bound.
pub struct Problem<'a> {
    pub rhs: &'a RhsFunction,
    pub jacobian: Option<&'a JacobianFunction>,
    pub roots: Option<&'a RootFunction>,
    pub n_roots: usize,
    pub args: &'a [f64],
}

impl<'a> Problem<'a> {
    pub fn rhs(&self, t: f64, y: &[f64]) -> Vec<f64> {
        (self.rhs)(t, y, self.args)
    }

    pub fn jacobian(&self, t: f64, y: &[f64]) -> Option<DMatrix<f64>> {
        self.jacobian.map(|jac| jac(t, y, self.args))
    }

    /// Root function values; empty when no roots are monitored.
    pub fn roots(&self, t: f64, y: &[f64]) -> Vec<f64> {
        match self.roots {
            Some(g) if self.n_roots > 0 => g(t, y, self.args),
            _ => Vec::new(),
        }
    }
}

/// Fatal solver outcomes (LSODAR `istate < 0`).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SolverFailure {
    #[error("Excess work done on this call (perhaps wrong Dfun type).")]
    ExcessWork,

    #[error("Excess accuracy requested (tolerances too small).")]
    ExcessAccuracy,

    #[error("Illegal input detected (internal error).")]
    IllegalInput,

    #[error("Repeated error test failures (internal error).")]
    RepeatedErrorTestFailures,

    #[error("Repeated convergence failures (perhaps bad Jacobian or tolerances).")]
    RepeatedConvergenceFailures,

    #[error("Error weight became zero during problem.")]
    ZeroErrorWeight,

    #[error("Internal workspace insufficient to finish (internal error).")]
    InsufficientWorkspace,
}

impl SolverFailure {
    pub fn code(self) -> i32 {
        match self {
            SolverFailure::ExcessWork => -1,
            SolverFailure::ExcessAccuracy => -2,
            SolverFailure::IllegalInput => -3,
            SolverFailure::RepeatedErrorTestFailures => -4,
            SolverFailure::RepeatedConvergenceFailures => -5,
            SolverFailure::ZeroErrorWeight => -6,
            SolverFailure::InsufficientWorkspace => -7,
        }
    }
}

/// Solver status after a call (LSODAR `istate`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    FirstCall,
    Success,
    RootFound,
    Failed(SolverFailure),
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Status::FirstCall => 1,
            Status::Success => 2,
            Status::RootFound => 3,
            Status::Failed(failure) => failure.code(),
        }
    }

    pub fn message(self) -> String {
        match self {
            Status::FirstCall => "Integration not started.".to_string(),
            Status::Success => "Integration successful.".to_string(),
            Status::RootFound => "Integration successful. Root found.".to_string(),
            Status::Failed(failure) => failure.to_string(),
        }
    }

    pub fn failure(self) -> Option<SolverFailure> {
        match self {
            Status::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Method family used on the last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Adams (non-stiff)
    Adams,
    /// BDF (stiff)
    Bdf,
}

impl MethodKind {
    pub fn code(self) -> usize {
        match self {
            MethodKind::Adams => 1,
            MethodKind::Bdf => 2,
        }
    }
}

/// Optional step controls. Zero means "let the solver decide".
#[derive(Debug, Clone, PartialEq)]
pub struct StepSettings {
    pub first_step: f64,
    pub max_step: f64,
    pub min_step: f64,
    /// Internal steps allowed per call.
    pub max_steps: usize,
    pub max_order_nonstiff: usize,
    pub max_order_stiff: usize,
    pub band: Band,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            first_step: 0.0,
            max_step: 0.0,
            min_step: 0.0,
            max_steps: 500,
            max_order_nonstiff: 12,
            max_order_stiff: 5,
            band: Band::default(),
        }
    }
}

/// Per-step counters and scalars a solver exposes for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// Last successful step size.
    pub hu: f64,
    /// Internal time reached.
    pub tcur: f64,
    /// Tolerance scale factor, > 1 when excess accuracy was requested.
    pub tolsf: f64,
    /// Time of the last method switch.
    pub tsw: f64,
    pub nst: usize,
    pub nfe: usize,
    pub nje: usize,
    /// Order of the last successful step.
    pub nqu: usize,
    /// Component with the largest weighted local error on an error return.
    pub imxer: Option<usize>,
    pub lenrw: usize,
    pub leniw: usize,
    pub mused: MethodKind,
}

/// Everything one request threads through successive `advance` calls.
pub struct SolverState<W> {
    pub t: f64,
    pub y: Vec<f64>,
    pub status: Status,
    pub itol: ToleranceMode,
    pub itask: TaskMode,
    pub jt: JacobianMode,
    pub tolerances: Tolerances,
    pub settings: StepSettings,
    /// Critical time the solver must not step past in critical modes.
    pub tcrit: Option<f64>,
    /// Root indicators of the last call; `jroot[i]` is set when root `i` fired.
    pub jroot: Vec<bool>,
    pub workspace: W,
}

impl<W> SolverState<W> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        t0: f64,
        y0: Vec<f64>,
        itol: ToleranceMode,
        itask: TaskMode,
        jt: JacobianMode,
        tolerances: Tolerances,
        settings: StepSettings,
        n_roots: usize,
        workspace: W,
    ) -> Self {
        Self {
            t: t0,
            y: y0,
            status: Status::FirstCall,
            itol,
            itask,
            jt,
            tolerances,
            settings,
            tcrit: None,
            jroot: vec![false; n_roots],
            workspace,
        }
    }
}

/// A multistep integrator the stepping driver can call repeatedly.
///
/// `advance` integrates from `state.t` towards `target` according to
/// `state.itask` and writes the reached time, state, status and root
/// indicators back into `state`. The workspace is owned by `state` and must
/// not be shared between requests.
pub trait Solver {
    type Workspace;

    fn workspace(&self, capacity: WorkspaceSize) -> Self::Workspace;

    fn advance(&self, problem: &Problem<'_>, state: &mut SolverState<Self::Workspace>, target: f64);

    fn report(&self, workspace: &Self::Workspace) -> StepReport;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::FirstCall.code(), 1);
        assert_eq!(Status::Success.code(), 2);
        assert_eq!(Status::RootFound.code(), 3);
        let failures = [
            SolverFailure::ExcessWork,
            SolverFailure::ExcessAccuracy,
            SolverFailure::IllegalInput,
            SolverFailure::RepeatedErrorTestFailures,
            SolverFailure::RepeatedConvergenceFailures,
            SolverFailure::ZeroErrorWeight,
            SolverFailure::InsufficientWorkspace,
        ];
        for (failure, code) in failures.into_iter().zip(1..) {
            assert_eq!(Status::Failed(failure).code(), -code);
        }
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(Status::Success.message(), "Integration successful.");
        assert_eq!(Status::RootFound.message(), "Integration successful. Root found.");
        assert_eq!(
            Status::Failed(SolverFailure::ExcessWork).message(),
            "Excess work done on this call (perhaps wrong Dfun type)."
        );
        assert_eq!(
            SolverFailure::InsufficientWorkspace.to_string(),
            "Internal workspace insufficient to finish (internal error)."
        );
    }

    #[test]
    fn test_problem_binds_args() {
        let rhs: RhsFunction = Box::new(|_t, y, args| vec![-args[0] * y[0]]);
        let args = [2.0];
        let problem = Problem {
            rhs: &rhs,
            jacobian: None,
            roots: None,
            n_roots: 0,
            args: &args,
        };
        assert_eq!(problem.rhs(0.0, &[3.0]), vec![-6.0]);
        assert!(problem.jacobian(0.0, &[3.0]).is_none());
        assert!(problem.roots(0.0, &[3.0]).is_empty());
    }
}
