//! Classification of the files produced by the analysis stage, and their renaming from the
//! short sample names the analysis tool emits back to full sample identifiers.
//!
//! Artifacts are named `<stage prefix>.<name>.<class suffix>`.  The output directory is scanned
//! once after the analysis stage into an [`ArtifactManifest`], which is then handed to the
//! renamer, QC and export stages rather than each of them globbing the directory again.
#![forbid(unsafe_code)]

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use itertools::Itertools;
use log::{debug, info, warn};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;

use crate::{
    executor::Stage,
    ledger::FailureLedger,
    reconcile::{NameMap, Resolution},
};

/// The ledger step used for artifacts that cannot be attributed to a sample.
pub const RECONCILE_STEP: &str = "reconcile";

/// The kinds of output the analysis stage produces, each identified by its file suffix.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter,
)]
pub enum ArtifactClass {
    #[strum(serialize = "vdjca")]
    Vdjca,
    #[strum(serialize = "refined_vdjca")]
    RefinedVdjca,
    #[strum(serialize = "clns")]
    Clns,
    #[strum(serialize = "clna")]
    Clna,
    #[strum(serialize = "clone_groups")]
    CloneGroups,
}

impl ArtifactClass {
    /// The file name suffix, without the leading `.`.
    pub fn suffix(self) -> &'static str {
        match self {
            ArtifactClass::Vdjca => "vdjca",
            ArtifactClass::RefinedVdjca => "refined.vdjca",
            ArtifactClass::Clns => "clns",
            ArtifactClass::Clna => "clna",
            ArtifactClass::CloneGroups => "clone.groups_TRAB.tsv",
        }
    }

    /// The label used in report and ledger names.
    pub fn label(self) -> String {
        self.to_string()
    }

    /// Splits `<prefix>.<name>.<suffix>` into the name and the class with the longest matching
    /// suffix.  Returns `None` for files that are not artifacts.
    pub fn classify<'a>(file_name: &'a str, prefix: &str) -> Option<(&'a str, Self)> {
        let rest = file_name.strip_prefix(prefix)?.strip_prefix('.')?;
        let class = ArtifactClass::iter()
            .filter(|class| {
                rest.len() > class.suffix().len() + 1
                    && rest.ends_with(class.suffix())
                    && rest[..rest.len() - class.suffix().len()].ends_with('.')
            })
            .max_by_key(|class| class.suffix().len())?;
        let name = &rest[..rest.len() - class.suffix().len() - 1];
        Some((name, class))
    }
}

/// One file produced by a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub path: PathBuf,
    /// The sample name embedded in the file name: the tool's short name until renamed.
    pub name: String,
    pub class: ArtifactClass,
    pub stage: Stage,
}

/// The artifacts of one stage in one directory, sorted by class and then name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactManifest {
    dir: PathBuf,
    prefix: String,
    files: Vec<ArtifactFile>,
}

impl ArtifactManifest {
    /// Scans `dir` once for files named `<prefix>.<name>.<suffix>` of any known class.
    pub fn collect<P: AsRef<Path>>(dir: P, prefix: &str, stage: Stage) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths = vec![];
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Unable to read output directory {}", dir.display()))?
        {
            let path = entry
                .with_context(|| format!("Unable to read output directory {}", dir.display()))?
                .path();
            if path.is_file() {
                paths.push(path);
            }
        }
        let manifest = Self::from_paths(dir, prefix, stage, paths);
        info!("Found {} artifacts in {}", manifest.len(), dir.display());
        Ok(manifest)
    }

    /// Builds the manifest from explicit paths, skipping those that are not artifacts.
    pub fn from_paths<P: AsRef<Path>, I: IntoIterator<Item = PathBuf>>(
        dir: P,
        prefix: &str,
        stage: Stage,
        paths: I,
    ) -> Self {
        let files = paths
            .into_iter()
            .filter_map(|path| {
                let file_name = path.file_name()?.to_str()?;
                let (name, class) = ArtifactClass::classify(file_name, prefix)?;
                Some(ArtifactFile { name: name.to_string(), class, stage, path: path.clone() })
            })
            .collect();
        Self::with_files(dir.as_ref().to_path_buf(), prefix.to_string(), files)
    }

    fn with_files(dir: PathBuf, prefix: String, mut files: Vec<ArtifactFile>) -> Self {
        files.sort_by(|a, b| (a.class, &a.name).cmp(&(b.class, &b.name)));
        Self { dir, prefix, files }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn files(&self) -> &[ArtifactFile] {
        &self.files
    }

    /// The files of one class, sorted by name.
    pub fn group(&self, class: ArtifactClass) -> Vec<&ArtifactFile> {
        self.files.iter().filter(|f| f.class == class).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Removes and returns the artifacts named after any of the given samples.
    pub fn exclude_samples(&mut self, samples: &BTreeSet<String>) -> Vec<ArtifactFile> {
        let (excluded, kept): (Vec<ArtifactFile>, Vec<ArtifactFile>) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|f| samples.contains(&f.name));
        self.files = kept;
        excluded
    }

    /// The path an artifact of this manifest would have under the given name.
    pub fn path_for(&self, name: &str, class: ArtifactClass) -> PathBuf {
        self.dir.join(format!("{}.{}.{}", self.prefix, name, class.suffix()))
    }
}

/// The fatal errors raised while renaming artifacts.
#[derive(Error, Debug)]
pub enum RenameError {
    #[error("Refusing to rename {} onto existing file {}", .from.display(), .to.display())]
    TargetExists { from: PathBuf, to: PathBuf },

    #[error("Unable to rename {} to {}", .from.display(), .to.display())]
    Io {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Renames every artifact whose short name maps to a full identifier, returning the manifest of
/// renamed (and already fully named) artifacts.
///
/// Artifacts with an unmapped or collided short name are left on disk untouched, recorded in the
/// ledger under [`RECONCILE_STEP`] once per short name, and excluded from the returned manifest.
///
/// # Errors
///
/// - [`RenameError::TargetExists`] if a rename would overwrite a file
/// - [`RenameError::Io`] if the rename itself fails
pub fn rename_artifacts(
    manifest: ArtifactManifest,
    names: &NameMap,
    ledger: &mut FailureLedger,
) -> Result<ArtifactManifest, RenameError> {
    let ArtifactManifest { dir, prefix, files } = manifest;
    let mut kept = Vec::with_capacity(files.len());
    let mut reported: BTreeSet<String> = BTreeSet::new();

    for file in files {
        match names.resolve(&file.name) {
            Resolution::Mapped(full) if full == file.name => kept.push(file),
            // Renamed by an earlier run
            Resolution::Unmapped if names.is_full_name(&file.name) => kept.push(file),
            Resolution::Mapped(full) => {
                let target = dir.join(format!("{}.{}.{}", prefix, full, file.class.suffix()));
                if target.exists() {
                    return Err(RenameError::TargetExists { from: file.path, to: target });
                }
                std::fs::rename(&file.path, &target).map_err(|source| RenameError::Io {
                    from: file.path.clone(),
                    to: target.clone(),
                    source,
                })?;
                debug!("Renamed {} to {}", file.path.display(), target.display());
                kept.push(ArtifactFile { path: target, name: full.to_string(), ..file });
            }
            Resolution::Collided(fulls) => {
                warn!(
                    "Excluding {}: short name {} is shared by samples {}",
                    file.path.display(),
                    file.name,
                    fulls.iter().join(", ")
                );
                if reported.insert(file.name.clone()) {
                    for full in fulls {
                        ledger.record(full.as_str(), RECONCILE_STEP, None);
                    }
                }
            }
            Resolution::Unmapped => {
                warn!(
                    "Excluding {}: short name {} does not match any input sample",
                    file.path.display(),
                    file.name
                );
                if reported.insert(file.name.clone()) {
                    ledger.record(file.name.as_str(), RECONCILE_STEP, None);
                }
            }
        }
    }

    Ok(ArtifactManifest::with_files(dir, prefix, kept))
}
