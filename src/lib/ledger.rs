//! The record of recoverable failures.
//!
//! Every per-sample or per-group step that fails without aborting the run appends a [`Failure`]
//! to the [`FailureLedger`].  The ledger is passed by mutable reference to each component that can
//! fail this way, is never cleared, and is read once at the end of the run to decide the exit
//! status.
#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::Result;
use csv::WriterBuilder;
use fgoxide::io::DelimFile;
use log::warn;
use serde::Serialize;

/// The label used for cohort-wide steps in the ledger.
pub const ALL_SAMPLES: &str = "all_samples";

/// The column names of the ledger TSV.
const FAILURE_HEADER: &[&str] = &["sample", "step", "log"];

/// One failed `(sample or group, step)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// The sample identifier, or a group label such as [`ALL_SAMPLES`].
    pub sample: String,
    /// The step that failed, e.g. `trim` or `qc:coverage:vdjca`.
    pub step: String,
    /// The stderr log of the failed invocation, if one was run.
    pub log: Option<PathBuf>,
}

/// An append-only, ordered list of recoverable failures.
#[derive(Debug, Clone, Default)]
pub struct FailureLedger {
    failures: Vec<Failure>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a failure, logging it with its context.
    pub fn record(&mut self, sample: impl Into<String>, step: impl Into<String>, log: Option<&Path>) {
        let failure =
            Failure { sample: sample.into(), step: step.into(), log: log.map(Path::to_path_buf) };
        match &failure.log {
            Some(log) => warn!(
                "Recoverable failure for {} at step {}, see {}",
                failure.sample,
                failure.step,
                log.display()
            ),
            None => warn!("Recoverable failure for {} at step {}", failure.sample, failure.step),
        }
        self.failures.push(failure);
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Failure> {
        self.failures.iter()
    }

    /// Writes the ledger as a TSV with a header line, even when empty.
    pub fn write_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if self.failures.is_empty() {
            // Serializing writes the header with the first record, so write it explicitly
            let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(&path)?;
            writer.write_record(FAILURE_HEADER)?;
            writer.flush()?;
        } else {
            DelimFile::default().write_tsv(&path, self.failures.iter())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_record_preserves_order() {
        let mut ledger = FailureLedger::new();
        assert!(ledger.is_empty());
        ledger.record("TCR-B01_S2", "trim", Some(Path::new("/logs/trim.TCR-B01_S2.fastp.stderr.log")));
        ledger.record(ALL_SAMPLES, "qc:align:clns", None);

        assert_eq!(ledger.len(), 2);
        let steps: Vec<&str> = ledger.iter().map(|f| f.step.as_str()).collect();
        assert_eq!(steps, vec!["trim", "qc:align:clns"]);
        assert_eq!(ledger.iter().next().unwrap().sample, "TCR-B01_S2");
    }

    #[test]
    fn test_write_tsv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed_steps.tsv");
        let mut ledger = FailureLedger::new();
        ledger.record("TCR-A01_S1", "export", Some(Path::new("/logs/a.log")));
        ledger.write_tsv(&path).unwrap();

        let lines: Vec<String> =
            std::fs::read_to_string(&path).unwrap().lines().map(str::to_string).collect();
        assert_eq!(lines, vec!["sample\tstep\tlog", "TCR-A01_S1\texport\t/logs/a.log"]);
    }

    #[test]
    fn test_write_tsv_empty_has_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed_steps.tsv");
        FailureLedger::new().write_tsv(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "sample\tstep\tlog\n");
    }
}
