// driver.rs
//! The stepping loop: picks a target for every solver call, records output
//! points, walks the critical-time queue and handles root returns.

use log::{error, info, warn};
use thiserror::Error;

use crate::modes::TaskMode;
use crate::output::{Diagnostics, OutputTrace};
use crate::solver::{Problem, Solver, SolverFailure, SolverState, Status};

/// Ascending mandatory stop times with a cursor that only moves forward.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CriticalTimeQueue {
    times: Vec<f64>,
    cursor: usize,
}

impl CriticalTimeQueue {
    /// `times` must be sorted ascending without duplicates.
    pub fn new(times: Vec<f64>) -> Self {
        debug_assert!(times.windows(2).all(|w| w[0] < w[1]));
        Self { times, cursor: 0 }
    }

    pub fn current(&self) -> Option<f64> {
        self.times.get(self.cursor).copied()
    }

    pub fn advance(&mut self) {
        if self.cursor < self.times.len() {
            self.cursor += 1;
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.times.len()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// A root crossing recorded by the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct RootEvent {
    pub t: f64,
    pub y: Vec<f64>,
    pub index: usize,
}

/// Non-fatal anomalies seen while stepping.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriverWarning {
    #[error("more than one root found at t = {t}: {indices:?}; using the lowest index")]
    MultipleRoots { t: f64, indices: Vec<usize> },

    #[error("root status returned at t = {t} without any root indicator set")]
    MissingRootIndicator { t: f64 },
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every requested time was reached.
    Completed,
    /// A root flagged as terminal was found.
    RootTerminated { index: usize },
    Failed(SolverFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverPhase {
    Running,
    Done,
    Error(SolverFailure),
}

/// Per-request knobs of the loop.
#[derive(Debug, Clone, Copy)]
pub struct DriverConfig<'a> {
    /// Requested output times; the first one is the initial time.
    pub times: &'a [f64],
    /// Terminal flag per root function.
    pub root_terminal: &'a [bool],
    pub full_output: bool,
    pub print_messages: bool,
}

/// Everything a finished run accumulated.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverOutcome {
    pub trace: OutputTrace,
    pub roots: Vec<RootEvent>,
    pub diagnostics: Option<Diagnostics>,
    /// Status of the last solver call.
    pub status: Status,
    pub termination: Termination,
    pub warnings: Vec<DriverWarning>,
}

pub struct SteppingDriver<'a, 'p, S: Solver> {
    solver: &'a S,
    problem: &'a Problem<'p>,
    config: DriverConfig<'a>,
    state: SolverState<S::Workspace>,
    critical: CriticalTimeQueue,
    phase: DriverPhase,
    cursor: usize,
    trace: OutputTrace,
    roots: Vec<RootEvent>,
    diagnostics: Option<Diagnostics>,
    warnings: Vec<DriverWarning>,
    terminal_root: Option<usize>,
}

impl<'a, 'p, S: Solver> SteppingDriver<'a, 'p, S> {
    pub fn new(
        solver: &'a S,
        problem: &'a Problem<'p>,
        state: SolverState<S::Workspace>,
        critical: CriticalTimeQueue,
        config: DriverConfig<'a>,
    ) -> Self {
        let trace = OutputTrace::new(state.t, state.y.clone());
        let diagnostics = config.full_output.then(Diagnostics::default);

        Self {
            solver,
            problem,
            config,
            state,
            critical,
            phase: DriverPhase::Running,
            // the first requested time is the initial point itself
            cursor: 1,
            trace,
            roots: Vec::new(),
            diagnostics,
            warnings: Vec::new(),
            terminal_root: None,
        }
    }

    pub fn run(mut self) -> DriverOutcome {
        while self.phase == DriverPhase::Running && self.cursor < self.config.times.len() {
            self.iterate();
        }

        let termination = match self.phase {
            DriverPhase::Error(failure) => Termination::Failed(failure),
            _ => match self.terminal_root {
                Some(index) => Termination::RootTerminated { index },
                None => Termination::Completed,
            },
        };

        DriverOutcome {
            trace: self.trace,
            roots: self.roots,
            diagnostics: self.diagnostics,
            status: self.state.status,
            termination,
            warnings: self.warnings,
        }
    }

    fn critical_active(&self) -> bool {
        self.state.itask.uses_critical_times() && !self.critical.is_exhausted()
    }

    fn target(&mut self) -> f64 {
        let next = self.config.times[self.cursor];
        match self.critical.current().filter(|_| self.critical_active()) {
            Some(tcrit) => {
                self.state.tcrit = Some(tcrit);
                tcrit.min(next)
            }
            None => {
                self.state.tcrit = None;
                next
            }
        }
    }

    fn iterate(&mut self) {
        let target = self.target();
        self.solver.advance(self.problem, &mut self.state, target);

        let status = self.state.status;
        if let Status::Failed(failure) = status {
            error!("{} (t = {}, istate = {})", failure, self.state.t, status.code());
            error!("Run with full_output = true to get quantitative information.");
            self.phase = DriverPhase::Error(failure);
            return;
        }
        if self.config.print_messages {
            info!("{}", status.message());
        }

        let t = self.state.t;
        let next = self.config.times[self.cursor];
        let root_found = status == Status::RootFound;
        let intermediate = self.state.itask == TaskMode::CriticalOneStep;

        if t == next || intermediate || root_found {
            self.record(status);
        }
        if t == next {
            self.cursor += 1;
        }
        if self.critical_active() && self.critical.current() == Some(t) {
            self.critical.advance();
            if self.critical.is_exhausted() {
                self.state.itask = TaskMode::Normal;
                self.state.tcrit = None;
            }
        }

        if root_found {
            self.handle_root();
        }
    }

    fn record(&mut self, status: Status) {
        self.trace.push(self.state.t, self.state.y.clone());
        if let Some(diagnostics) = self.diagnostics.as_mut() {
            diagnostics.record(&self.solver.report(&self.state.workspace), status);
        }
    }

    fn handle_root(&mut self) {
        let t = self.state.t;
        let fired: Vec<usize> = self
            .state
            .jroot
            .iter()
            .enumerate()
            .filter_map(|(i, &set)| set.then_some(i))
            .collect();

        let index = match fired.as_slice() {
            [] => {
                let warning = DriverWarning::MissingRootIndicator { t };
                warn!("{}", warning);
                self.warnings.push(warning);
                self.phase = DriverPhase::Running;
                return;
            }
            [index] => *index,
            [index, ..] => {
                let index = *index;
                let warning = DriverWarning::MultipleRoots { t, indices: fired.clone() };
                warn!("{}", warning);
                self.warnings.push(warning);
                index
            }
        };

        self.roots.push(RootEvent {
            t,
            y: self.state.y.clone(),
            index,
        });

        if self.config.root_terminal.get(index).copied().unwrap_or(false) {
            info!("terminal root {} found at t = {}", index, t);
            self.terminal_root = Some(index);
            self.phase = DriverPhase::Done;
        } else {
            self.phase = DriverPhase::Running;
        }
    }
}
