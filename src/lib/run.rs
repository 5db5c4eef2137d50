use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use anyhow::{ensure, Context, Result};
use fgoxide::io::DelimFile;
use itertools::Itertools;
use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    artifacts::{rename_artifacts, ArtifactManifest},
    executor::{CommandRunner, Executor, InvocationRecord, Stage, SystemRunner},
    identity::{ReadGroup, SampleSet},
    ledger::FailureLedger,
    opts::Opts,
    qc::run_qc,
    reconcile::NameMap,
    run_sheet,
    stages::{analysis_invocation, run_analysis, run_export, run_trim},
    utils::{built_info, ensure_writable_dir},
};

/// The record of every external invocation, written to the output directory.
pub const INVOCATIONS_FILE: &str = "invocations.tsv";
/// The failure ledger, written to the output directory.
pub const FAILED_STEPS_FILE: &str = "failed_steps.tsv";

/// The state of a run once its stages have started.
#[derive(Debug)]
pub struct RunStatus {
    pub ledger: FailureLedger,
    pub invocations: Vec<InvocationRecord>,
}

impl RunStatus {
    /// `0` if every step succeeded, `2` if any recoverable failure was recorded.
    pub fn exit_code(&self) -> i32 {
        if self.ledger.is_empty() {
            0
        } else {
            2
        }
    }

    /// The final summary, with one `sample<TAB>step` line per recorded failure.
    pub fn summary(&self) -> String {
        if self.ledger.is_empty() {
            return String::from("completed with all steps succeeding");
        }
        format!("completed with {} recoverable failures{}", self.ledger.len(), self.failure_lines())
    }

    fn failure_lines(&self) -> String {
        self.ledger.iter().map(|f| format!("\n{}\t{}", f.sample, f.step)).collect()
    }
}

/// A fatal error, with the state of the run at the point it stopped.
#[derive(Error, Debug)]
#[error("{error:#}")]
pub struct RunError {
    pub error: anyhow::Error,
    /// `None` if the run stopped before any stage started.
    pub status: Option<RunStatus>,
}

impl RunError {
    /// The final summary, listing any recoverable failures recorded before the fatal one.
    pub fn summary(&self) -> String {
        match &self.status {
            Some(status) if !status.ledger.is_empty() => format!(
                "stopped by a fatal error after {} recoverable failures{}",
                status.ledger.len(),
                status.failure_lines()
            ),
            _ => String::from("stopped by a fatal error"),
        }
    }
}

impl From<anyhow::Error> for RunError {
    fn from(error: anyhow::Error) -> Self {
        Self { error, status: None }
    }
}

/// The directories a run writes to, all created and checked to be writable.
#[derive(Debug, Clone)]
struct RunDirs {
    output: PathBuf,
    logs: PathBuf,
    qc: PathBuf,
    trimmed: Option<PathBuf>,
}

impl RunDirs {
    fn prepare(opts: &Opts) -> Result<Self> {
        let dirs = Self {
            output: ensure_writable_dir(&opts.output_dir)?,
            logs: ensure_writable_dir(opts.log_dir())?,
            qc: ensure_writable_dir(opts.qc_dir())?,
            trimmed: if opts.skip_trim {
                None
            } else {
                Some(ensure_writable_dir(opts.trimmed_dir())?)
            },
        };
        info!("Writing outputs to {}", dirs.output.display());
        info!("Writing logs to {}", dirs.logs.display());
        Ok(dirs)
    }
}

/// Discovers and validates the input samples and builds the name map from them.
fn resolve_samples(opts: &Opts) -> Result<(Vec<ReadGroup>, NameMap)> {
    let samples = SampleSet::discover(&opts.input_dir, &opts.input_pattern, !opts.single_end)?;
    samples.validate()?;
    let groups = samples.read_groups();
    let mode = if samples.is_paired() { "paired-end" } else { "single-end" };
    info!("Found {} {} samples in {}", groups.len(), mode, opts.input_dir.display());

    let names = NameMap::build(
        groups.iter().map(|g| (g.id.as_str(), g.sample_token.as_str())),
        opts.short_name_rule,
    );
    for (short, fulls) in names.collisions() {
        warn!(
            "Samples {} share the short name {}, their artifacts will not be renamed",
            fulls.iter().join(", "),
            short
        );
    }
    for full in names.underivable() {
        warn!("No short name can be derived for sample {} with rule {}", full, names.rule());
    }
    for (short, full) in names.iter() {
        debug!("Short name {} maps to sample {}", short, full);
    }
    Ok((groups, names))
}

/// Runs every stage after the preconditions have been checked.
fn run_stages<R: CommandRunner>(
    opts: &Opts,
    dirs: &RunDirs,
    groups: &[ReadGroup],
    names: &NameMap,
    executor: &mut Executor<R>,
    ledger: &mut FailureLedger,
) -> Result<()> {
    let (analysis_dir, analysis_schema, trim_failed) = match &dirs.trimmed {
        Some(trimmed_dir) => {
            let trimmed =
                run_trim(&opts.trim_tool(), groups, trimmed_dir, opts.threads, executor, ledger)?;
            let trimmed_ids: BTreeSet<&str> = trimmed.iter().map(|g| g.id.as_str()).collect();
            let failed: BTreeSet<String> = groups
                .iter()
                .filter(|g| !trimmed_ids.contains(g.id.as_str()))
                .map(|g| g.id.clone())
                .collect();
            (trimmed_dir.clone(), opts.input_pattern.trimmed()?, failed)
        }
        None => {
            info!("Skipping trimming, using the input FASTQs as trimmed reads");
            (opts.input_dir.clone(), opts.input_pattern.clone(), BTreeSet::new())
        }
    };

    let invocation = analysis_invocation(
        &opts.analysis_tool(),
        opts.analysis_preset.as_deref(),
        &analysis_dir,
        &analysis_schema,
        &dirs.output,
        &opts.stage_prefix,
        opts.threads,
    );
    run_analysis(&invocation, executor)?;

    let manifest = ArtifactManifest::collect(&dirs.output, &opts.stage_prefix, Stage::Analysis)?;
    ensure!(
        !manifest.is_empty(),
        "The analysis stage produced no {}.* artifacts in {}",
        opts.stage_prefix,
        dirs.output.display()
    );
    let mut manifest = rename_artifacts(manifest, names, ledger)?;
    // Failed samples are already in the ledger under their trim step
    for file in manifest.exclude_samples(&trim_failed) {
        warn!("Excluding {}: sample {} failed trimming", file.path.display(), file.name);
    }
    let renamed = manifest.files().iter().map(|f| &f.name).unique().count();
    info!("Renamed artifacts for {} samples", renamed);

    run_qc(&opts.qc_reports, &manifest, &opts.report_tool(), &dirs.qc, executor, ledger)?;

    if opts.skip_export {
        info!("Skipping clone export");
    } else {
        let tables = run_export(&opts.export_tool(), &manifest, executor, ledger)?;
        info!("Exported {} clone tables", tables.len());
    }
    Ok(())
}

fn write_records(
    output_dir: &Path,
    records: &[InvocationRecord],
    ledger: &FailureLedger,
) -> Result<()> {
    let invocations = output_dir.join(INVOCATIONS_FILE);
    DelimFile::default()
        .write_tsv(&invocations, records)
        .with_context(|| format!("Unable to write {}", invocations.display()))?;
    let failed = output_dir.join(FAILED_STEPS_FILE);
    ledger.write_tsv(&failed).with_context(|| format!("Unable to write {}", failed.display()))?;
    Ok(())
}

/// Checks every precondition: the input directory, the output directories, and the samples.
fn preflight(opts: &Opts) -> Result<(RunDirs, Vec<ReadGroup>, NameMap)> {
    ensure!(
        opts.input_dir.is_dir(),
        "Input directory does not exist or is not a directory: {}",
        opts.input_dir.display()
    );
    let dirs = RunDirs::prepare(opts)?;
    let (groups, names) = resolve_samples(opts)?;
    Ok((dirs, groups, names))
}

/// Runs the pipeline with the given runner.
///
/// Every precondition is checked before the first external invocation.  The invocation record and
/// failure ledger are written to the output directory even when a stage fails fatally.
///
/// # Errors
///
/// Any precondition or stage-fatal failure.  Once the stages have started the error carries the
/// [`RunStatus`] at the point the run stopped.
pub fn run_with<R: CommandRunner>(opts: &Opts, runner: R) -> Result<RunStatus, RunError> {
    let (dirs, groups, names) = preflight(opts)?;

    let mut executor = Executor::new(&dirs.logs, runner);
    let mut ledger = FailureLedger::new();
    let result = run_stages(opts, &dirs, &groups, &names, &mut executor, &mut ledger);
    let written = write_records(&dirs.output, executor.records(), &ledger);
    let status = RunStatus { ledger, invocations: executor.records().to_vec() };

    match (result, written) {
        (Ok(()), Ok(())) => Ok(status),
        (Ok(()), Err(error)) => Err(RunError { error, status: Some(status) }),
        (Err(error), written) => {
            if let Err(err) = written {
                warn!("{:#}", err);
            }
            Err(RunError { error, status: Some(status) })
        }
    }
}

/// Runs the pipeline after applying any run sheet to the options.
pub fn run(opts: Opts) -> Result<RunStatus, RunError> {
    info!("{} {}", crate::opts::TOOL_NAME, built_info::VERSION.as_str());
    let opts = run_sheet::apply(opts).map_err(anyhow::Error::from)?;
    run_with(&opts, SystemRunner)
}
