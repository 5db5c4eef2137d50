//! The trim, analysis and export stages.
//!
//! Each stage builds its [`Invocation`]s from a [`Tool`] and hands them to the [`Executor`]; the
//! stage then applies its own failure policy.  Trim and export are per sample and record failures
//! in the [`FailureLedger`], while the analysis stage runs once over the whole cohort and is fatal.
#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, ensure, Context, Result};
use log::{info, warn};

use crate::{
    artifacts::{ArtifactClass, ArtifactManifest},
    executor::{CommandRunner, Executor, Invocation, InvocationLabel, Stage},
    identity::ReadGroup,
    ledger::FailureLedger,
    naming::{trimmed_file_name, NamingSchema},
};

/// The ledger step of the trim stage.
pub const TRIM_STEP: &str = "trim";
/// The ledger step of the analysis stage.
pub const ANALYSIS_STEP: &str = "analysis";
/// The ledger step of the export stage.
pub const EXPORT_STEP: &str = "export";
/// The file name suffix of exported clone tables.
pub const CLONES_SUFFIX: &str = "clones.tsv";

/// An external program, with an optional subcommand and pass-through arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    pub program: String,
    pub subcommand: Option<String>,
    /// Arguments passed through verbatim after the subcommand and any leading arguments.
    pub args: Vec<String>,
}

impl Tool {
    pub fn new(program: &str, subcommand: Option<&str>, args: &[String]) -> Self {
        Self {
            program: program.to_string(),
            subcommand: subcommand.map(str::to_string),
            args: args.to_vec(),
        }
    }

    /// Builds `<subcommand> <leading...> <args...> <trailing...>`.
    pub fn invocation(
        &self,
        stage: Stage,
        step: &str,
        sample: Option<&str>,
        leading: Vec<String>,
        trailing: Vec<String>,
    ) -> Invocation {
        let args = self
            .subcommand
            .iter()
            .cloned()
            .chain(leading)
            .chain(self.args.iter().cloned())
            .chain(trailing)
            .collect();
        Invocation::new(stage, &self.program, step, sample, args)
    }
}

/// Renders a path as a command line argument.
pub(crate) fn path_arg<P: AsRef<Path>>(path: P) -> String {
    path.as_ref().to_string_lossy().to_string()
}

/// The trim invocation of one sample and the files it will write.
#[derive(Debug, Clone)]
pub struct TrimPlan {
    pub invocation: Invocation,
    /// The trimmed read group the invocation produces.
    pub trimmed: ReadGroup,
    /// Every file the invocation writes, removed again if it fails.
    pub outputs: Vec<PathBuf>,
}

fn trimmed_path(input: &Path, trimmed_dir: &Path) -> Result<PathBuf> {
    let file_name = input
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(trimmed_file_name)
        .ok_or_else(|| anyhow!("Not a FASTQ file name: {}", input.display()))?;
    Ok(trimmed_dir.join(file_name))
}

/// Builds the trim invocation for one read group using the `fastp` argument convention.
pub fn plan_trim(
    tool: &Tool,
    group: &ReadGroup,
    trimmed_dir: &Path,
    log_dir: &Path,
    threads: usize,
) -> Result<TrimPlan> {
    let label = InvocationLabel::new(&tool.program, TRIM_STEP, Some(&group.id));
    let json = log_dir.join(format!("{}.json", label));
    let html = log_dir.join(format!("{}.html", label));

    let r1 = trimmed_path(&group.r1, trimmed_dir)?;
    let mut args = vec![String::from("-i"), path_arg(&group.r1)];
    let r2 = match &group.r2 {
        Some(input) => {
            let output = trimmed_path(input, trimmed_dir)?;
            args.extend([String::from("-I"), path_arg(input)]);
            Some(output)
        }
        None => None,
    };
    args.extend([String::from("-o"), path_arg(&r1)]);
    if let Some(output) = &r2 {
        args.extend([String::from("-O"), path_arg(output)]);
    }
    args.extend([
        String::from("-w"),
        threads.to_string(),
        String::from("-j"),
        path_arg(&json),
        String::from("-h"),
        path_arg(&html),
    ]);

    let mut outputs = vec![r1.clone()];
    outputs.extend(r2.iter().cloned());
    outputs.extend([json, html]);

    Ok(TrimPlan {
        invocation: tool.invocation(Stage::Trim, TRIM_STEP, Some(&group.id), vec![], args),
        trimmed: ReadGroup { r1, r2, ..group.clone() },
        outputs,
    })
}

/// Trims every read group, returning the trimmed groups of the samples that succeeded.
///
/// A failed sample has its partial outputs removed, is recorded in the ledger and is excluded
/// from the returned groups.
///
/// # Errors
///
/// - if an invocation cannot be run at all (e.g. its log files cannot be created)
/// - if every sample fails
pub fn run_trim<R: CommandRunner>(
    tool: &Tool,
    groups: &[ReadGroup],
    trimmed_dir: &Path,
    threads: usize,
    executor: &mut Executor<R>,
    ledger: &mut FailureLedger,
) -> Result<Vec<ReadGroup>> {
    let mut trimmed = Vec::with_capacity(groups.len());
    for group in groups {
        let plan = plan_trim(tool, group, trimmed_dir, executor.log_dir(), threads)?;
        let outcome = executor.run(&plan.invocation)?;
        if outcome.success {
            trimmed.push(plan.trimmed);
            continue;
        }
        for output in plan.outputs.iter().filter(|p| p.exists()) {
            if let Err(err) = std::fs::remove_file(output) {
                warn!("Unable to remove partial output {}: {}", output.display(), err);
            }
        }
        ledger.record(group.id.as_str(), TRIM_STEP, Some(&outcome.logs.stderr));
    }

    if !groups.is_empty() && trimmed.is_empty() {
        bail!("Trimming failed for every sample, see the logs in {}", executor.log_dir().display());
    }
    info!("Trimmed {} of {} samples", trimmed.len(), groups.len());
    Ok(trimmed)
}

/// Builds the single cohort-wide analysis invocation over every FASTQ in `input_dir` matching
/// the schema.
pub fn analysis_invocation(
    tool: &Tool,
    preset: Option<&str>,
    input_dir: &Path,
    schema: &NamingSchema,
    output_dir: &Path,
    prefix: &str,
    threads: usize,
) -> Invocation {
    let trailing = vec![
        String::from("--threads"),
        threads.to_string(),
        path_arg(input_dir.join(schema.tool_pattern())),
        path_arg(output_dir.join(prefix)),
    ];
    let leading = preset.map(str::to_string).into_iter().collect();
    tool.invocation(Stage::Analysis, ANALYSIS_STEP, None, leading, trailing)
}

/// Runs the analysis stage.
///
/// # Errors
///
/// Any failure, since every later stage consumes its outputs.
pub fn run_analysis<R: CommandRunner>(
    invocation: &Invocation,
    executor: &mut Executor<R>,
) -> Result<()> {
    let outcome = executor.run(invocation)?;
    ensure!(
        outcome.success,
        "The analysis stage failed, see {}",
        outcome.logs.stderr.display()
    );
    Ok(())
}

/// Exports a clone table for every clone artifact in the manifest, returning the tables written.
///
/// Failures are recorded in the ledger against the artifact's sample.
pub fn run_export<R: CommandRunner>(
    tool: &Tool,
    manifest: &ArtifactManifest,
    executor: &mut Executor<R>,
    ledger: &mut FailureLedger,
) -> Result<Vec<PathBuf>> {
    let mut tables = vec![];
    for artifact in manifest.group(ArtifactClass::Clns) {
        let table = manifest
            .dir()
            .join(format!("{}.{}.{}", manifest.prefix(), artifact.name, CLONES_SUFFIX));
        let invocation = tool.invocation(
            Stage::Export,
            EXPORT_STEP,
            Some(&artifact.name),
            vec![],
            vec![path_arg(&artifact.path), path_arg(&table)],
        );
        let outcome = executor
            .run(&invocation)
            .with_context(|| format!("Unable to export clones of {}", artifact.name))?;
        if outcome.success {
            tables.push(table);
        } else {
            ledger.record(artifact.name.as_str(), EXPORT_STEP, Some(&outcome.logs.stderr));
        }
    }
    Ok(tables)
}
