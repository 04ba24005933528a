// output.rs
//! Accumulated trajectory, per-point diagnostics and the final result record.

use crate::driver::{DriverOutcome, DriverWarning, Termination};
use crate::solver::{MethodKind, Status, StepReport};

/// Append-only sequence of `(t, y)` rows, starting at the initial point.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTrace {
    times: Vec<f64>,
    states: Vec<Vec<f64>>,
}

impl OutputTrace {
    pub fn new(t0: f64, y0: Vec<f64>) -> Self {
        Self {
            times: vec![t0],
            states: vec![y0],
        }
    }

    pub fn push(&mut self, t: f64, y: Vec<f64>) {
        debug_assert!(self.times.last().map_or(true, |&last| t >= last));
        self.times.push(t);
        self.states.push(y);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn states(&self) -> &[Vec<f64>] {
        &self.states
    }

    pub fn last(&self) -> Option<(f64, &[f64])> {
        self.times.last().copied().zip(self.states.last().map(Vec::as_slice))
    }

    pub fn into_parts(self) -> (Vec<f64>, Vec<Vec<f64>>) {
        (self.times, self.states)
    }
}

/// Names of the fixed diagnostic series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticField {
    Hu,
    Tcur,
    Tolsf,
    Tsw,
    Nst,
    Nfe,
    Nje,
    Nqu,
    Imxer,
    Lenrw,
    Leniw,
    Mused,
}

impl DiagnosticField {
    pub const ALL: [DiagnosticField; 12] = [
        DiagnosticField::Hu,
        DiagnosticField::Tcur,
        DiagnosticField::Tolsf,
        DiagnosticField::Tsw,
        DiagnosticField::Nst,
        DiagnosticField::Nfe,
        DiagnosticField::Nje,
        DiagnosticField::Nqu,
        DiagnosticField::Imxer,
        DiagnosticField::Lenrw,
        DiagnosticField::Leniw,
        DiagnosticField::Mused,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DiagnosticField::Hu => "hu",
            DiagnosticField::Tcur => "tcur",
            DiagnosticField::Tolsf => "tolsf",
            DiagnosticField::Tsw => "tsw",
            DiagnosticField::Nst => "nst",
            DiagnosticField::Nfe => "nfe",
            DiagnosticField::Nje => "nje",
            DiagnosticField::Nqu => "nqu",
            DiagnosticField::Imxer => "imxer",
            DiagnosticField::Lenrw => "lenrw",
            DiagnosticField::Leniw => "leniw",
            DiagnosticField::Mused => "mused",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.name() == name)
    }
}

/// Solver-reported scalars, one entry per recorded point after the first.
///
/// `imxer` is `None` until an error test has failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    pub hu: Vec<f64>,
    pub tcur: Vec<f64>,
    pub tolsf: Vec<f64>,
    pub tsw: Vec<f64>,
    pub nst: Vec<usize>,
    pub nfe: Vec<usize>,
    pub nje: Vec<usize>,
    pub nqu: Vec<usize>,
    pub imxer: Vec<Option<usize>>,
    pub lenrw: Vec<usize>,
    pub leniw: Vec<usize>,
    pub mused: Vec<MethodKind>,
    /// Message of the last recorded status.
    pub message: Option<String>,
}

impl Diagnostics {
    pub fn record(&mut self, report: &StepReport, status: Status) {
        self.hu.push(report.hu);
        self.tcur.push(report.tcur);
        self.tolsf.push(report.tolsf);
        self.tsw.push(report.tsw);
        self.nst.push(report.nst);
        self.nfe.push(report.nfe);
        self.nje.push(report.nje);
        self.nqu.push(report.nqu);
        self.imxer.push(report.imxer);
        self.lenrw.push(report.lenrw);
        self.leniw.push(report.leniw);
        self.mused.push(report.mused);
        self.message = Some(status.message());
    }

    pub fn len(&self) -> usize {
        self.hu.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hu.is_empty()
    }

    /// A series as floats. Counters are converted; a missing `imxer` is NaN.
    pub fn series(&self, field: DiagnosticField) -> Vec<f64> {
        let counts = |v: &[usize]| -> Vec<f64> { v.iter().map(|&x| x as f64).collect() };
        match field {
            DiagnosticField::Hu => self.hu.clone(),
            DiagnosticField::Tcur => self.tcur.clone(),
            DiagnosticField::Tolsf => self.tolsf.clone(),
            DiagnosticField::Tsw => self.tsw.clone(),
            DiagnosticField::Nst => counts(&self.nst),
            DiagnosticField::Nfe => counts(&self.nfe),
            DiagnosticField::Nje => counts(&self.nje),
            DiagnosticField::Nqu => counts(&self.nqu),
            DiagnosticField::Imxer => self.imxer.iter().map(|i| i.map_or(f64::NAN, |i| i as f64)).collect(),
            DiagnosticField::Lenrw => counts(&self.lenrw),
            DiagnosticField::Leniw => counts(&self.leniw),
            DiagnosticField::Mused => self.mused.iter().map(|m| m.code() as f64).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Vec<f64>> {
        DiagnosticField::from_name(name).map(|field| self.series(field))
    }
}

/// Roots found during the run, in the order they were found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RootLog {
    pub t: Vec<f64>,
    pub y: Vec<Vec<f64>>,
    pub index: Vec<usize>,
}

impl RootLog {
    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }
}

/// Which optional parts a [`Solution`] carries.
///
/// | shape          | parts                                    |
/// |----------------|------------------------------------------|
/// | `Trajectory`   | `y`                                      |
/// | `Times`        | `y`, `t`                                 |
/// | `Roots`        | `y`, `t`, `roots`                        |
/// | `*Info`        | the same followed by `info`              |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolutionShape {
    Trajectory,
    Times,
    Roots,
    TrajectoryInfo,
    TimesInfo,
    RootsInfo,
}

/// Features the caller asked for; they alone decide the result shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestedOutputs {
    pub intermediate_output: bool,
    pub root_finding: bool,
    pub full_output: bool,
}

impl RequestedOutputs {
    pub fn shape(self) -> SolutionShape {
        match (self.intermediate_output || self.root_finding, self.root_finding, self.full_output) {
            (false, _, false) => SolutionShape::Trajectory,
            (true, false, false) => SolutionShape::Times,
            (true, true, false) => SolutionShape::Roots,
            (false, _, true) => SolutionShape::TrajectoryInfo,
            (true, false, true) => SolutionShape::TimesInfo,
            (true, true, true) => SolutionShape::RootsInfo,
        }
    }
}

/// Result of [`integrate`](crate::integrate).
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// One row per recorded point; the first row is the initial state.
    pub y: Vec<Vec<f64>>,
    /// Time of each row.
    pub t: Option<Vec<f64>>,
    pub roots: Option<RootLog>,
    pub info: Option<Diagnostics>,
    /// Status of the last solver call.
    pub status: Status,
    pub termination: Termination,
    pub warnings: Vec<DriverWarning>,
    shape: SolutionShape,
}

impl Solution {
    pub fn shape(&self) -> SolutionShape {
        self.shape
    }

    /// True unless the solver failed.
    pub fn is_success(&self) -> bool {
        !matches!(self.termination, Termination::Failed(_))
    }

    pub fn message(&self) -> String {
        self.status.message()
    }
}

pub fn assemble(outcome: DriverOutcome, requested: RequestedOutputs) -> Solution {
    let shape = requested.shape();
    let (times, states) = outcome.trace.into_parts();

    let t = matches!(
        shape,
        SolutionShape::Times | SolutionShape::Roots | SolutionShape::TimesInfo | SolutionShape::RootsInfo
    )
    .then_some(times);

    let roots = requested.root_finding.then(|| {
        let mut log = RootLog::default();
        for event in outcome.roots {
            log.t.push(event.t);
            log.y.push(event.y);
            log.index.push(event.index);
        }
        log
    });

    let info = if requested.full_output {
        Some(outcome.diagnostics.unwrap_or_default())
    } else {
        None
    };

    Solution {
        y: states,
        t,
        roots,
        info,
        status: outcome.status,
        termination: outcome.termination,
        warnings: outcome.warnings,
        shape,
    }
}
