//! Execution of external tool invocations.
//!
//! Each [`Invocation`] runs to completion on the calling thread with its standard output and
//! standard error redirected to log files named from its [`InvocationLabel`].  The executor never
//! retries and never decides how severe a failure is: the [`Outcome`] is returned to the call
//! site, which either aborts the run or records the failure in the
//! [`crate::ledger::FailureLedger`].
//!
//! Spawning processes is delegated to a [`CommandRunner`] so that stages can be driven by a
//! scripted runner in tests.
#![forbid(unsafe_code)]

use std::{
    collections::HashSet,
    fmt::Display,
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{ensure, Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use strum::{Display as StrumDisplay, EnumString};

/// The pipeline stage an invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Trim,
    Analysis,
    Export,
    Qc,
}

/// The logical name of an invocation, from which its log file names are derived.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationLabel {
    /// The tool name (the file name of the program).
    pub tool: String,
    /// The step within the stage, e.g. `trim` or `qc_coverage_vdjca`.
    pub step: String,
    /// The sample (or `all_samples`) the invocation is scoped to.
    pub sample: Option<String>,
}

impl InvocationLabel {
    pub fn new(program: &str, step: impl Into<String>, sample: Option<&str>) -> Self {
        let tool = Path::new(program)
            .file_name()
            .map_or_else(|| program.to_string(), |name| name.to_string_lossy().to_string());
        Self { tool, step: step.into(), sample: sample.map(str::to_string) }
    }
}

impl Display for InvocationLabel {
    /// Formats as `<step>[.<sample>].<tool>`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sample {
            Some(sample) => write!(f, "{}.{}.{}", self.step, sample, self.tool),
            None => write!(f, "{}.{}", self.step, self.tool),
        }
    }
}

/// One external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub stage: Stage,
    pub label: InvocationLabel,
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(
        stage: Stage,
        program: &str,
        step: impl Into<String>,
        sample: Option<&str>,
        args: Vec<String>,
    ) -> Self {
        Self {
            stage,
            label: InvocationLabel::new(program, step, sample),
            program: program.to_string(),
            args,
        }
    }
}

/// The stdout and stderr log files of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl LogPaths {
    pub fn for_label<P: AsRef<Path>>(log_dir: P, label: &InvocationLabel) -> Self {
        Self {
            stdout: log_dir.as_ref().join(format!("{}.stdout.log", label)),
            stderr: log_dir.as_ref().join(format!("{}.stderr.log", label)),
        }
    }
}

/// The result of running an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    /// The exit code, `None` if the process could not be spawned or was killed by a signal.
    pub exit_code: Option<i32>,
    pub logs: LogPaths,
}

/// A row of the invocation record written at the end of a run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InvocationRecord {
    pub label: String,
    pub stage: Stage,
    pub sample: Option<String>,
    pub program: String,
    pub args: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
}

/// Runs an invocation's program to completion with its output streams attached to the given
/// files.
pub trait CommandRunner {
    /// Returns the exit code, or `None` if the process was terminated by a signal.
    ///
    /// # Errors
    ///
    /// Any error spawning or waiting on the process.
    fn run(
        &mut self,
        invocation: &Invocation,
        stdout: File,
        stderr: File,
    ) -> std::io::Result<Option<i32>>;
}

/// Runs programs as child processes of this one.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &mut self,
        invocation: &Invocation,
        stdout: File,
        stderr: File,
    ) -> std::io::Result<Option<i32>> {
        let status = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status()?;
        Ok(status.code())
    }
}

/// Runs invocations one at a time, logging each to its own pair of files.
pub struct Executor<R: CommandRunner = SystemRunner> {
    log_dir: PathBuf,
    runner: R,
    used_labels: HashSet<InvocationLabel>,
    records: Vec<InvocationRecord>,
}

impl Executor<SystemRunner> {
    pub fn system<P: AsRef<Path>>(log_dir: P) -> Self {
        Self::new(log_dir, SystemRunner)
    }
}

impl<R: CommandRunner> Executor<R> {
    /// Creates an executor writing logs into `log_dir`, which must already exist.
    pub fn new<P: AsRef<Path>>(log_dir: P, runner: R) -> Self {
        Self {
            log_dir: log_dir.as_ref().to_path_buf(),
            runner,
            used_labels: HashSet::new(),
            records: vec![],
        }
    }

    /// Runs the invocation to completion.
    ///
    /// A process that cannot be spawned is a failed [`Outcome`] whose stderr log holds the
    /// spawn error.
    ///
    /// # Errors
    ///
    /// - if the label was already used by this executor, since its logs would be overwritten
    /// - if the log files cannot be created
    pub fn run(&mut self, invocation: &Invocation) -> Result<Outcome> {
        let label = &invocation.label;
        ensure!(
            self.used_labels.insert(label.clone()),
            "Invocation label used more than once in this run: {}",
            label
        );

        let logs = LogPaths::for_label(&self.log_dir, label);
        let stdout = File::create(&logs.stdout)
            .with_context(|| format!("Unable to create log file: {}", logs.stdout.display()))?;
        let mut stderr = File::create(&logs.stderr)
            .with_context(|| format!("Unable to create log file: {}", logs.stderr.display()))?;
        let stderr_for_child = stderr
            .try_clone()
            .with_context(|| format!("Unable to reopen log file: {}", logs.stderr.display()))?;

        debug!("Running {}: {} {}", label, invocation.program, invocation.args.join(" "));
        let exit_code = match self.runner.run(invocation, stdout, stderr_for_child) {
            Ok(code) => code,
            Err(err) => {
                writeln!(stderr, "Failed to run {}: {}", invocation.program, err).with_context(
                    || format!("Unable to write to log file: {}", logs.stderr.display()),
                )?;
                None
            }
        };

        let success = exit_code == Some(0);
        if success {
            info!("{} succeeded", label);
        } else {
            let code = exit_code.map_or_else(|| String::from("none"), |c| c.to_string());
            warn!("{} failed with exit code {}, see {}", label, code, logs.stderr.display());
        }

        self.records.push(InvocationRecord {
            label: label.to_string(),
            stage: invocation.stage,
            sample: label.sample.clone(),
            program: invocation.program.clone(),
            args: invocation.args.join(" "),
            success,
            exit_code,
            stdout_log: logs.stdout.clone(),
            stderr_log: logs.stderr.clone(),
        });

        Ok(Outcome { success, exit_code, logs })
    }

    /// Every invocation run so far, in order.
    pub fn records(&self) -> &[InvocationRecord] {
        &self.records
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}
