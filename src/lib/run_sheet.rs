//! Reading pipeline options from a CSV run sheet.
//!
//! A run sheet may hold several bracketed sections (e.g. `[Header]`, `[Pipeline]`) whose first
//! column starts with `[`.  Only `[Pipeline]` is read: each row is `option-name,value`, where the
//! option name is the long command line option without its leading `--`.  An empty value marks a
//! flag.  Values override those given on the command line.
#![forbid(unsafe_code)]

use clap::Parser;
use csv::{ReaderBuilder, StringRecord, Trim};
use fgoxide::io::Io;
use log::info;
use thiserror::Error;

use crate::opts::{Opts, TOOL_NAME};

/// The section of the run sheet holding pipeline options.
pub const PIPELINE_SECTION: &str = "[Pipeline]";

/// The errors that may occur when reading a run sheet.
#[derive(Error, Debug)]
pub enum RunSheetError {
    #[error("Unable to read the run sheet")]
    FgError(#[from] fgoxide::FgError),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("The run sheet was empty")]
    Empty,

    #[error("The '[Pipeline]' section is missing")]
    NoPipelineSection,

    #[error("Could not parse the pipeline options, {kind}: {message}")]
    OptionsParsing { kind: String, message: String },
}

/// Returns the rows of the section with the given key, excluding the key row itself, up to the
/// next row whose first column starts with `[`.
fn find_section<'a>(records: &'a [StringRecord], key: &str) -> Option<&'a [StringRecord]> {
    let start = records.iter().position(|r| r.get(0) == Some(key))? + 1;
    let len = records[start..]
        .iter()
        .position(|r| r.get(0).map_or(false, |first| first.starts_with('[')))
        .unwrap_or(records.len() - start);
    Some(&records[start..start + len])
}

/// Updates the options with the rows of a `[Pipeline]` section.
fn update_opts(records: &[StringRecord], mut opts: Opts) -> Result<Opts, RunSheetError> {
    let mut argv: Vec<String> = vec![TOOL_NAME.to_string()];
    for record in records {
        let key = match record.get(0) {
            Some(key) if !key.is_empty() && !key.starts_with('#') => key,
            _ => continue,
        };
        // Values go with `=` so that pass-through arguments may start with a hyphen
        match record.get(1) {
            Some(value) if !value.is_empty() => argv.push(format!("--{}={}", key, value)),
            _ => argv.push(format!("--{}", key)),
        }
    }

    match opts.try_update_from(argv) {
        Ok(()) => Ok(opts),
        Err(err) => {
            let kind = err.kind().as_str().unwrap_or("invalid option").to_string();
            let message = err.to_string().lines().next().unwrap_or_default().to_string();
            Err(RunSheetError::OptionsParsing { kind, message })
        }
    }
}

fn read_records(data: &str) -> Result<Vec<StringRecord>, RunSheetError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b',')
        .has_headers(false)
        .quoting(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(data.as_bytes());
    let mut records = vec![];
    for record in reader.records() {
        records.push(record?);
    }
    Ok(records)
}

/// Applies the run sheet named by `opts.run_sheet`, if any, to the options.
///
/// # Errors
///
/// - if the run sheet cannot be read, is empty or has no `[Pipeline]` section
/// - if an option in the section is unknown or has an invalid value
pub fn apply(opts: Opts) -> Result<Opts, RunSheetError> {
    let path = match &opts.run_sheet {
        Some(path) => path.clone(),
        None => return Ok(opts),
    };
    let lines = Io::default().read_lines(&path)?;
    if lines.iter().all(|l| l.trim().is_empty()) {
        return Err(RunSheetError::Empty);
    }

    let records = read_records(&lines.join("\n"))?;
    let section =
        find_section(&records, PIPELINE_SECTION).ok_or(RunSheetError::NoPipelineSection)?;
    info!("Applying {} options from run sheet {}", section.len(), path.display());
    update_opts(section, opts)
}
