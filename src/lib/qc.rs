//! The QC fan-out: one cohort-wide aggregate report and one report per sample for each report
//! in the plan.
//!
//! Each [`ReportSpec`] pairs a report kind with the [`ArtifactClass`] it is rendered from, and is
//! an independent group.  A group with no artifacts is skipped.  A failed aggregate is recorded
//! and ends its group, since the per-sample reports are read against it, while a failed
//! per-sample report is recorded and the loop moves on to the next sample.
#![forbid(unsafe_code)]

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::Result;
use itertools::Itertools;
use log::{info, warn};
use strum::{Display as StrumDisplay, EnumString};
use thiserror::Error;

use crate::{
    artifacts::{ArtifactClass, ArtifactManifest},
    executor::{CommandRunner, Executor, Stage},
    ledger::{FailureLedger, ALL_SAMPLES},
    stages::{path_arg, Tool},
};

/// The report plan used when none is given.
pub const DEFAULT_QC_REPORTS: &[&str] =
    &["align:clns", "chainUsage:clns", "coverage:vdjca", "tags:vdjca"];

/// The reports the QC renderer can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, StrumDisplay, EnumString)]
pub enum ReportKind {
    #[strum(serialize = "align")]
    Align,
    #[strum(serialize = "chainUsage")]
    ChainUsage,
    #[strum(serialize = "coverage")]
    Coverage,
    #[strum(serialize = "tags")]
    Tags,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid QC report `{0}`, expected `<kind>:<class>`, e.g. `coverage:vdjca`")]
pub struct ReportSpecError(String);

/// One report rendered from one artifact class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReportSpec {
    pub kind: ReportKind,
    pub class: ArtifactClass,
}

impl ReportSpec {
    pub fn new(kind: ReportKind, class: ArtifactClass) -> Self {
        Self { kind, class }
    }

    /// The ledger step, `qc:<kind>:<label>`.
    pub fn step(&self) -> String {
        format!("qc:{}:{}", self.kind, self.class.label())
    }

    /// The invocation step, `qc_<kind>_<label>`, from which log names are derived.
    pub fn invocation_step(&self) -> String {
        format!("qc_{}_{}", self.kind, self.class.label())
    }

    pub fn aggregate_path(&self, qc_dir: &Path) -> PathBuf {
        self.sample_path(qc_dir, ALL_SAMPLES)
    }

    pub fn sample_path(&self, qc_dir: &Path, sample: &str) -> PathBuf {
        qc_dir.join(format!("{}_{}_{}.pdf", sample, self.kind, self.class.label()))
    }
}

impl FromStr for ReportSpec {
    type Err = ReportSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = || ReportSpecError(s.to_string());
        let (kind, class) = s.split_once(':').ok_or_else(error)?;
        let kind = ReportKind::from_str(kind).map_err(|_| error())?;
        let class = ArtifactClass::from_str(class).map_err(|_| error())?;
        Ok(Self { kind, class })
    }
}

impl Display for ReportSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.class)
    }
}

/// The plan used when no reports are configured.
pub fn default_plan() -> Vec<ReportSpec> {
    DEFAULT_QC_REPORTS.iter().filter_map(|spec| spec.parse().ok()).collect()
}

/// Where a group's fan-out ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// No artifacts of the class, nothing was run.
    Empty,
    /// The aggregate report failed and no per-sample report was attempted.
    AggregateFailed,
    /// The aggregate succeeded and every per-sample report was attempted.
    Done,
}

/// The result of one group's fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOutcome {
    pub spec: ReportSpec,
    pub state: GroupState,
    pub succeeded: usize,
    pub failed: usize,
}

/// Runs the QC plan over the manifest, writing reports into `qc_dir`.
///
/// Repeated specs in the plan are run once.
///
/// # Errors
///
/// Only if an invocation cannot be run at all; report failures are recorded in the ledger.
pub fn run_qc<R: CommandRunner>(
    plan: &[ReportSpec],
    manifest: &ArtifactManifest,
    tool: &Tool,
    qc_dir: &Path,
    executor: &mut Executor<R>,
    ledger: &mut FailureLedger,
) -> Result<Vec<GroupOutcome>> {
    let mut outcomes = vec![];
    for spec in plan.iter().unique() {
        let outcome = run_group(spec, manifest, tool, qc_dir, executor, ledger)?;
        match outcome.state {
            GroupState::Empty => info!("Skipping QC report {}: no {} artifacts", spec, spec.class),
            GroupState::AggregateFailed => warn!("QC report {} failed for the cohort", spec),
            GroupState::Done => info!(
                "QC report {}: {} of {} samples succeeded",
                spec,
                outcome.succeeded,
                outcome.succeeded + outcome.failed
            ),
        }
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

fn run_group<R: CommandRunner>(
    spec: &ReportSpec,
    manifest: &ArtifactManifest,
    tool: &Tool,
    qc_dir: &Path,
    executor: &mut Executor<R>,
    ledger: &mut FailureLedger,
) -> Result<GroupOutcome> {
    let mut outcome = GroupOutcome { spec: *spec, state: GroupState::Empty, succeeded: 0, failed: 0 };
    let files = manifest.group(spec.class);
    if files.is_empty() {
        return Ok(outcome);
    }

    let step = spec.invocation_step();
    let leading = vec![spec.kind.to_string()];
    let mut trailing: Vec<String> = files.iter().map(|f| path_arg(&f.path)).collect();
    trailing.push(path_arg(spec.aggregate_path(qc_dir)));
    let aggregate = tool.invocation(Stage::Qc, &step, Some(ALL_SAMPLES), leading.clone(), trailing);
    let result = executor.run(&aggregate)?;
    if !result.success {
        ledger.record(ALL_SAMPLES, spec.step(), Some(&result.logs.stderr));
        outcome.state = GroupState::AggregateFailed;
        return Ok(outcome);
    }

    for file in files {
        let trailing =
            vec![path_arg(&file.path), path_arg(spec.sample_path(qc_dir, &file.name))];
        let invocation =
            tool.invocation(Stage::Qc, &step, Some(&file.name), leading.clone(), trailing);
        let result = executor.run(&invocation)?;
        if result.success {
            outcome.succeeded += 1;
        } else {
            ledger.record(file.name.as_str(), spec.step(), Some(&result.logs.stderr));
            outcome.failed += 1;
        }
    }
    outcome.state = GroupState::Done;
    Ok(outcome)
}
