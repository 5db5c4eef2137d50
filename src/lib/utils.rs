//! Utility functions.
use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use path_absolutize::Absolutize;

lazy_static! {
    /// Return the number of cpus as a String
    pub static ref NUM_CPU: String = num_cpus::get().to_string();
}

pub mod built_info {
    use lazy_static::lazy_static;
    include!(concat!(env!("OUT_DIR"), "/built.rs"));

    /// Get a software version string including
    ///   - Git commit hash
    ///   - Git dirty info (whether the repo had uncommitted changes)
    ///   - Cargo package version if no git info found
    fn get_software_version() -> String {
        let prefix = if let Some(s) = GIT_COMMIT_HASH {
            format!("{}-{}", PKG_VERSION, s[0..8].to_owned())
        } else {
            // This shouldn't happen
            PKG_VERSION.to_string()
        };
        let suffix = match GIT_DIRTY {
            Some(true) => "-dirty",
            _ => "",
        };
        format!("{}{}", prefix, suffix)
    }

    lazy_static! {
        /// Version of the software with git hash
        pub static ref VERSION: String = get_software_version();
    }
}

/// The name of the file created and removed to check a directory is writable.
const WRITE_PROBE: &str = ".clonopipe.write-probe";

/// Creates the directory (and its parents) if needed and checks that files can be created in it,
/// returning its absolute path.
pub fn ensure_writable_dir<P: AsRef<Path>>(dir: P) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Unable to create directory: {}", dir.display()))?;
    let dir = dir
        .absolutize()
        .with_context(|| format!("Unable to resolve directory: {}", dir.display()))?
        .to_path_buf();

    let probe = dir.join(WRITE_PROBE);
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe)
        .with_context(|| format!("Directory is not writable: {}", dir.display()))?;
    std::fs::remove_file(&probe)
        .with_context(|| format!("Unable to remove {}", probe.display()))?;
    Ok(dir)
}

/// Splits a pass-through argument string on whitespace.
pub fn split_args(args: Option<&str>) -> Vec<String> {
    args.map(|args| args.split_whitespace().map(str::to_string).collect()).unwrap_or_default()
}

#[cfg(not(tarpaulin_include))]
#[cfg(test)]
pub mod test_commons {
    //! Common utility methods for testing the pipeline without the external tools.

    use std::{
        collections::{HashMap, HashSet},
        fs::File,
        io::Write,
        path::{Path, PathBuf},
    };

    use itertools::Itertools;

    use crate::executor::{CommandRunner, Invocation};

    /// The `fastp` flags whose values are output files.
    pub const OUTPUT_FLAGS: &[&str] = &["-o", "-O", "-j", "-h"];

    /// A [`CommandRunner`] that never spawns a process.
    ///
    /// Each invocation creates the files named after any of its output flags and any files
    /// registered for its label, then fails if its label was marked as failing.  Outputs are
    /// created before failing so that cleanup of partial outputs can be observed.
    #[derive(Debug, Default)]
    pub struct FakeRunner {
        output_flags: Vec<String>,
        failing: HashSet<String>,
        outputs: HashMap<String, Vec<PathBuf>>,
    }

    impl FakeRunner {
        pub fn new(output_flags: &[&str]) -> Self {
            Self {
                output_flags: output_flags.iter().map(|f| f.to_string()).collect(),
                ..Self::default()
            }
        }

        /// Fails the invocation with the given label, e.g. `qc_align_clns.S2.mixcr`.
        pub fn failing(mut self, label: &str) -> Self {
            self.failing.insert(label.to_string());
            self
        }

        /// Creates the given files when the invocation with the given label runs.
        pub fn creating(mut self, label: &str, paths: Vec<PathBuf>) -> Self {
            self.outputs.entry(label.to_string()).or_default().extend(paths);
            self
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(
            &mut self,
            invocation: &Invocation,
            mut stdout: File,
            mut stderr: File,
        ) -> std::io::Result<Option<i32>> {
            let label = invocation.label.to_string();
            writeln!(stdout, "{} {}", invocation.program, invocation.args.join(" "))?;

            for (flag, value) in invocation.args.iter().tuple_windows() {
                if self.output_flags.contains(flag) {
                    File::create(value)?;
                }
            }
            for path in self.outputs.get(&label).into_iter().flatten() {
                File::create(path)?;
            }

            if self.failing.contains(&label) {
                writeln!(stderr, "simulated failure of {}", label)?;
                Ok(Some(1))
            } else {
                Ok(Some(0))
            }
        }
    }

    /// Creates empty R1 and R2 FASTQs named `<cohort>-<sample>_<sample>_L001_R<role>_001.fastq.gz`
    /// for each sample, returning the full sample identifiers.
    pub fn write_paired_inputs(dir: &Path, cohort: &str, samples: &[&str]) -> Vec<String> {
        let mut ids = vec![];
        for sample in samples {
            let id = format!("{}-{}_{}", cohort, sample, sample);
            for role in 1..=2 {
                File::create(dir.join(format!("{}_L001_R{}_001.fastq.gz", id, role))).unwrap();
            }
            ids.push(id);
        }
        ids
    }
}
