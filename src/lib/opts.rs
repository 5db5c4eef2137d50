#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::Parser;
use env_logger::Env;

use crate::{
    naming::{NamingSchema, DEFAULT_INPUT_PATTERN},
    qc::{ReportSpec, DEFAULT_QC_REPORTS},
    reconcile::ShortNameRule,
    stages::Tool,
    utils::{built_info, split_args, NUM_CPU},
};

pub static TOOL_NAME: &str = "clonopipe";

/// The sub-directories of the output directory used when no directory is given.
pub const LOG_SUBDIR: &str = "logs";
pub const QC_SUBDIR: &str = "qc";
pub const TRIMMED_SUBDIR: &str = "trimmed";

static SHORT_USAGE: &str =
    "Runs trimming, clonotype analysis and QC reporting over a cohort of sequencing samples.";

static LONG_USAGE: &str = "
Runs trimming, clonotype analysis and QC reporting over a cohort of sequencing samples.

Samples are discovered from the FASTQ file names in the input directory using the naming
pattern given with --input-pattern.  The pattern is literal text with `{field}` placeholders,
where the fields are `cohort`, `sample`, `suffix`, `lane` and `role` (the read number, 1 or 2).
The full sample identifier is the file name up to and including the last of `cohort`, `sample`
and `suffix`.  In paired-end mode every sample must have both an R1 and an R2 FASTQ.

The pipeline runs:
  1. the trim tool once per sample, writing to the trimmed directory
  2. the analysis tool once over all trimmed FASTQs, writing `<stage-prefix>.<sample>.*`
  3. renaming of the analysis outputs from the tool's short sample names to the full names
  4. one cohort-wide and one per-sample QC report for each --qc-reports entry
  5. the export tool once per sample clone set

A failure of the analysis stage stops the run.  A failure of a per-sample step is recorded
and the run continues.  The exit code is 0 when every step succeeded, 1 on a fatal error, and
2 when the run completed with failed steps, which are listed in `failed_steps.tsv`.

Options may also be given in the `[Pipeline]` section of a CSV run sheet (--run-sheet), one
`option-name,value` row per option, which override the command line.

Example invocation:

clonopipe \\
  --input-dir fastqs/ \\
  --output-dir results/ \\
  --analysis-preset generic-amplicon \\
  --short-name-rule numeric:4
";

#[derive(Parser, Debug, Clone)]
#[clap(name = TOOL_NAME, version = built_info::VERSION.as_str(), about=SHORT_USAGE, long_about=LONG_USAGE, term_width=0)]
pub struct Opts {
    /// The directory holding the input FASTQs.
    #[clap(long, short = 'i', display_order = 1)]
    pub input_dir: PathBuf,

    /// The directory to write the analysis outputs, invocation record and failed steps to.
    ///
    /// Existing artifacts are never overwritten when renaming.
    #[clap(long, short = 'o', display_order = 2)]
    pub output_dir: PathBuf,

    /// The naming pattern of the input FASTQs.
    #[clap(long, short = 'p', default_value = DEFAULT_INPUT_PATTERN, display_order = 3)]
    pub input_pattern: NamingSchema,

    /// A CSV run sheet whose `[Pipeline]` section overrides these options.
    #[clap(long, short = 's', display_order = 4)]
    pub run_sheet: Option<PathBuf>,

    /// Process single-end reads: every matching FASTQ is its own sample.
    #[clap(long, display_order = 5)]
    pub single_end: bool,

    /// The directory for per-invocation logs.
    ///
    /// [default: <output-dir>/logs]
    #[clap(long, display_order = 11)]
    pub log_dir: Option<PathBuf>,

    /// The directory for QC reports.
    ///
    /// [default: <output-dir>/qc]
    #[clap(long, display_order = 11)]
    pub qc_dir: Option<PathBuf>,

    /// The directory for trimmed FASTQs.
    ///
    /// [default: <output-dir>/trimmed]
    #[clap(long, display_order = 11)]
    pub trimmed_dir: Option<PathBuf>,

    /// The prefix of the analysis outputs in the output directory.
    #[clap(long, default_value = "results", display_order = 11)]
    pub stage_prefix: String,

    /// How the analysis tool shortens sample names: `sample` for the `{sample}` token, or
    /// `numeric:<width>` for its trailing digits zero-padded to `<width>`.
    #[clap(long, default_value = "sample", display_order = 11)]
    pub short_name_rule: ShortNameRule,

    /// The number of threads passed to each external tool.
    #[clap(long, short = 't', default_value = NUM_CPU.as_str(), display_order = 11)]
    pub threads: usize,

    /// Treat the input FASTQs as already trimmed and skip the trim stage.
    #[clap(long, display_order = 11)]
    pub skip_trim: bool,

    /// Skip exporting clone tables.
    #[clap(long, display_order = 11)]
    pub skip_export: bool,

    /// The QC reports to produce, each `<kind>:<artifact class>`.
    ///
    /// Kinds are `align`, `chainUsage`, `coverage` and `tags`.  Artifact classes are `vdjca`,
    /// `refined_vdjca`, `clns`, `clna` and `clone_groups`.
    #[clap(
        long,
        multiple_values = true,
        value_delimiter = ' ',
        default_values = DEFAULT_QC_REPORTS,
        display_order = 12
    )]
    pub qc_reports: Vec<ReportSpec>,

    /// The trimming program.
    #[clap(long, default_value = "fastp", display_order = 21)]
    pub trim_tool: String,

    /// Extra arguments for the trimming program, as one whitespace separated string.
    #[clap(long, allow_hyphen_values = true, display_order = 21)]
    pub trim_args: Option<String>,

    /// The analysis program.
    #[clap(long, default_value = "mixcr", display_order = 22)]
    pub analysis_tool: String,

    /// The analysis subcommand.
    #[clap(long, default_value = "analyze", display_order = 22)]
    pub analysis_subcommand: String,

    /// The analysis preset, passed right after the subcommand.
    #[clap(long, display_order = 22)]
    pub analysis_preset: Option<String>,

    /// Extra arguments for the analysis program, as one whitespace separated string.
    #[clap(long, allow_hyphen_values = true, display_order = 22)]
    pub analysis_args: Option<String>,

    /// The QC report program.
    #[clap(long, default_value = "mixcr", display_order = 23)]
    pub report_tool: String,

    /// The QC report subcommand, followed by the report kind.
    #[clap(long, default_value = "exportQc", display_order = 23)]
    pub report_subcommand: String,

    /// Extra arguments for the QC report program, as one whitespace separated string.
    #[clap(long, allow_hyphen_values = true, display_order = 23)]
    pub report_args: Option<String>,

    /// The clone export program.
    #[clap(long, default_value = "mixcr", display_order = 24)]
    pub export_tool: String,

    /// The clone export subcommand.
    #[clap(long, default_value = "exportClones", display_order = 24)]
    pub export_subcommand: String,

    /// Extra arguments for the clone export program, as one whitespace separated string.
    #[clap(long, allow_hyphen_values = true, display_order = 24)]
    pub export_args: Option<String>,
}

impl Opts {
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| self.output_dir.join(LOG_SUBDIR))
    }

    pub fn qc_dir(&self) -> PathBuf {
        self.qc_dir.clone().unwrap_or_else(|| self.output_dir.join(QC_SUBDIR))
    }

    pub fn trimmed_dir(&self) -> PathBuf {
        self.trimmed_dir.clone().unwrap_or_else(|| self.output_dir.join(TRIMMED_SUBDIR))
    }

    pub fn trim_tool(&self) -> Tool {
        Tool::new(&self.trim_tool, None, &split_args(self.trim_args.as_deref()))
    }

    pub fn analysis_tool(&self) -> Tool {
        Tool::new(
            &self.analysis_tool,
            Some(&self.analysis_subcommand),
            &split_args(self.analysis_args.as_deref()),
        )
    }

    pub fn report_tool(&self) -> Tool {
        Tool::new(
            &self.report_tool,
            Some(&self.report_subcommand),
            &split_args(self.report_args.as_deref()),
        )
    }

    pub fn export_tool(&self) -> Tool {
        Tool::new(
            &self.export_tool,
            Some(&self.export_subcommand),
            &split_args(self.export_args.as_deref()),
        )
    }
}

/// Implement defaults that match the CLI options to allow for easier testing.
///
/// Note that these defaults exist only within test code.
#[cfg(test)]
impl Default for Opts {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::default(),
            output_dir: PathBuf::default(),
            input_pattern: NamingSchema::default(),
            run_sheet: None,
            single_end: false,
            log_dir: None,
            qc_dir: None,
            trimmed_dir: None,
            stage_prefix: String::from("results"),
            short_name_rule: ShortNameRule::default(),
            threads: 2,
            skip_trim: false,
            skip_export: false,
            qc_reports: crate::qc::default_plan(),
            trim_tool: String::from("fastp"),
            trim_args: None,
            analysis_tool: String::from("mixcr"),
            analysis_subcommand: String::from("analyze"),
            analysis_preset: None,
            analysis_args: None,
            report_tool: String::from("mixcr"),
            report_subcommand: String::from("exportQc"),
            report_args: None,
            export_tool: String::from("mixcr"),
            export_subcommand: String::from("exportClones"),
            export_args: None,
        }
    }
}

/// Parse args and set up logging / tracing
pub fn setup() -> Opts {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    Opts::parse()
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use clap::Parser;

    use super::*;
    use crate::{artifacts::ArtifactClass, qc::ReportKind};

    #[test]
    fn test_parse_defaults() {
        let opts = Opts::try_parse_from(["clonopipe", "-i", "/in", "-o", "/out"]).unwrap();
        let default = Opts::default();

        assert_eq!(opts.input_pattern, NamingSchema::default());
        assert_eq!(opts.qc_reports, default.qc_reports);
        assert_eq!(opts.short_name_rule, ShortNameRule::SampleToken);
        assert_eq!(opts.stage_prefix, default.stage_prefix);
        assert_eq!(opts.threads, num_cpus::get());
        assert_eq!(opts.log_dir(), Path::new("/out/logs"));
        assert_eq!(opts.qc_dir(), Path::new("/out/qc"));
        assert_eq!(opts.trimmed_dir(), Path::new("/out/trimmed"));
        assert_eq!(opts.analysis_tool(), default.analysis_tool());
    }

    #[test]
    fn test_parse_tools_and_reports() {
        let opts = Opts::try_parse_from([
            "clonopipe",
            "-i",
            "/in",
            "-o",
            "/out",
            "--qc-reports",
            "coverage:vdjca",
            "tags:refined_vdjca",
            "--trim-args",
            "--cut_right -l 50",
            "--short-name-rule",
            "numeric:4",
            "--log-dir",
            "/logs",
        ])
        .unwrap();

        assert_eq!(
            opts.qc_reports,
            vec![
                ReportSpec::new(ReportKind::Coverage, ArtifactClass::Vdjca),
                ReportSpec::new(ReportKind::Tags, ArtifactClass::RefinedVdjca),
            ]
        );
        assert_eq!(opts.trim_tool().args, vec!["--cut_right", "-l", "50"]);
        assert_eq!(opts.trim_tool().subcommand, None);
        assert_eq!(opts.short_name_rule, ShortNameRule::NumericSuffix { width: 4 });
        assert_eq!(opts.log_dir(), Path::new("/logs"));
        assert_eq!(opts.export_tool().subcommand.as_deref(), Some("exportClones"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for (flag, value) in [
            ("--qc-reports", "depth:vdjca"),
            ("--short-name-rule", "numeric:0"),
            ("--input-pattern", "{cohort}_{lane}.fastq.gz"),
        ] {
            let result = Opts::try_parse_from(["clonopipe", "-i", "/in", "-o", "/out", flag, value]);
            assert!(result.is_err(), "{} {} should be rejected", flag, value);
        }
    }
}
