//! Discovery of sample identities and read pairs from input file names.
#![forbid(unsafe_code)]

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use itertools::Itertools;
use log::debug;
use strum::Display;
use thiserror::Error;

use crate::naming::{NameMatch, NamingSchema};

/// The role a FASTQ plays in a read pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum ReadRole {
    R1,
    R2,
    Unpaired,
}

/// One biological sample as identified from a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleIdentity {
    /// The full sample identifier, unique within a run.
    pub id: String,
    pub role: ReadRole,
}

/// A FASTQ whose name matched the naming grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFastq {
    pub path: PathBuf,
    pub identity: SampleIdentity,
    /// The `{sample}` token, from which downstream tools derive their short names.
    pub sample_token: String,
    pub lane: Option<u32>,
}

impl InputFastq {
    /// Builds an `InputFastq` from a path, returning `None` if the file name does not match the
    /// grammar.  In single-end mode, or when the grammar has no role, the role is
    /// [`ReadRole::Unpaired`].
    pub fn new<P: AsRef<Path>>(path: P, schema: &NamingSchema, paired: bool) -> Option<Self> {
        let file_name = path.as_ref().file_name()?.to_str()?;
        let NameMatch { full_id, sample, lane, role, .. } = schema.parse(file_name)?;
        let role = match (paired, role) {
            (true, Some(1)) => ReadRole::R1,
            (true, Some(2)) => ReadRole::R2,
            (true, Some(_)) => return None,
            _ => ReadRole::Unpaired,
        };
        Some(Self {
            path: path.as_ref().to_path_buf(),
            identity: SampleIdentity { id: full_id, role },
            sample_token: sample,
            lane,
        })
    }
}

/// The errors raised while resolving sample identities.  All of them are precondition failures.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Unable to read input directory {}", .path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("No usable input: no file in {} matched the naming pattern `{pattern}`", .dir.display())]
    NoUsableInput { dir: PathBuf, pattern: String },

    #[error("Paired-end mode requires a `{{role}}` field in the naming pattern `{pattern}`")]
    NoRoleField { pattern: String },

    #[error("Sample {id} has more than one {role} file: {} and {}", .first.display(), .second.display())]
    DuplicateRead { id: String, role: ReadRole, first: PathBuf, second: PathBuf },

    #[error("Unpaired reads for sample(s): {}", describe_unpaired(.missing))]
    UnpairedReads { missing: Vec<(String, ReadRole)> },
}

fn describe_unpaired(missing: &[(String, ReadRole)]) -> String {
    missing.iter().map(|(id, role)| format!("{} (missing {})", id, role)).join(", ")
}

/// The R1, R2 and R2-less FASTQs for one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadGroup {
    pub id: String,
    pub sample_token: String,
    /// The R1 FASTQ, or the single FASTQ in single-end mode.
    pub r1: PathBuf,
    /// The R2 FASTQ; `None` in single-end mode.
    pub r2: Option<PathBuf>,
}

/// The set of samples discovered in one directory.
#[derive(Debug, Clone, Default)]
pub struct SampleSet {
    dir: PathBuf,
    pattern: String,
    paired: bool,
    r1: BTreeMap<String, InputFastq>,
    r2: BTreeMap<String, InputFastq>,
    unpaired: BTreeMap<String, InputFastq>,
}

impl SampleSet {
    /// Scans the regular files in `dir` (not recursively) for names matching the grammar.  Files
    /// that do not match are skipped.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::NoRoleField`] in paired-end mode with a grammar lacking `{role}`
    /// - [`IdentityError::Io`] if the directory cannot be listed
    /// - [`IdentityError::DuplicateRead`] if a sample has two files for the same role
    pub fn discover<P: AsRef<Path>>(
        dir: P,
        schema: &NamingSchema,
        paired: bool,
    ) -> Result<Self, IdentityError> {
        let dir = dir.as_ref();
        let io_error = |source| IdentityError::Io { path: dir.to_path_buf(), source };

        let mut paths = vec![];
        for entry in std::fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        Self::from_paths(dir, paths, schema, paired)
    }

    /// Builds the set from an explicit list of paths, as [`SampleSet::discover`] does for the
    /// files of a directory.
    pub fn from_paths<P: AsRef<Path>, I: IntoIterator<Item = PathBuf>>(
        dir: P,
        paths: I,
        schema: &NamingSchema,
        paired: bool,
    ) -> Result<Self, IdentityError> {
        if paired && !schema.has_role() {
            return Err(IdentityError::NoRoleField { pattern: schema.to_string() });
        }

        let mut set = SampleSet {
            dir: dir.as_ref().to_path_buf(),
            pattern: schema.to_string(),
            paired,
            ..SampleSet::default()
        };

        // Sort so that duplicate reporting is deterministic
        for path in paths.into_iter().sorted() {
            let fastq = match InputFastq::new(&path, schema, paired) {
                Some(fastq) => fastq,
                None => {
                    debug!("Skipping {} as it does not match the naming pattern", path.display());
                    continue;
                }
            };
            let bucket = match fastq.identity.role {
                ReadRole::R1 => &mut set.r1,
                ReadRole::R2 => &mut set.r2,
                ReadRole::Unpaired => &mut set.unpaired,
            };
            if let Some(existing) = bucket.get(&fastq.identity.id) {
                return Err(IdentityError::DuplicateRead {
                    id: fastq.identity.id.clone(),
                    role: fastq.identity.role,
                    first: existing.path.clone(),
                    second: fastq.path,
                });
            }
            bucket.insert(fastq.identity.id.clone(), fastq);
        }
        Ok(set)
    }

    /// The sorted, de-duplicated union of the sample identifiers seen for any role.
    pub fn ids(&self) -> Vec<String> {
        self.r1
            .keys()
            .chain(self.r2.keys())
            .chain(self.unpaired.keys())
            .cloned()
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.r1.is_empty() && self.r2.is_empty() && self.unpaired.is_empty()
    }

    pub fn is_paired(&self) -> bool {
        self.paired
    }

    /// Enforces that at least one sample was found and, for paired-end input, that every sample
    /// has both an R1 and an R2.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::NoUsableInput`] if no sample was found
    /// - [`IdentityError::UnpairedReads`] listing every sample missing a role
    pub fn validate(&self) -> Result<(), IdentityError> {
        if self.is_empty() {
            return Err(IdentityError::NoUsableInput {
                dir: self.dir.clone(),
                pattern: self.pattern.clone(),
            });
        }
        if !self.paired {
            return Ok(());
        }

        let missing: Vec<(String, ReadRole)> = self
            .ids()
            .into_iter()
            .filter_map(|id| match (self.r1.contains_key(&id), self.r2.contains_key(&id)) {
                (true, false) => Some((id, ReadRole::R2)),
                (false, true) => Some((id, ReadRole::R1)),
                _ => None,
            })
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(IdentityError::UnpairedReads { missing })
        }
    }

    /// The read groups in sorted identifier order.  Samples without a complete pair are omitted,
    /// so call [`SampleSet::validate`] first.
    pub fn read_groups(&self) -> Vec<ReadGroup> {
        if self.paired {
            self.r1
                .iter()
                .filter_map(|(id, r1)| {
                    self.r2.get(id).map(|r2| ReadGroup {
                        id: id.clone(),
                        sample_token: r1.sample_token.clone(),
                        r1: r1.path.clone(),
                        r2: Some(r2.path.clone()),
                    })
                })
                .collect()
        } else {
            self.unpaired
                .iter()
                .map(|(id, fastq)| ReadGroup {
                    id: id.clone(),
                    sample_token: fastq.sample_token.clone(),
                    r1: fastq.path.clone(),
                    r2: None,
                })
                .collect()
        }
    }

    /// The FASTQ for a sample and role.
    pub fn get(&self, id: &str, role: ReadRole) -> Option<&InputFastq> {
        match role {
            ReadRole::R1 => self.r1.get(id),
            ReadRole::R2 => self.r2.get(id),
            ReadRole::Unpaired => self.unpaired.get(id),
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs::File;

    use matches::assert_matches;
    use rstest::rstest;
    use tempfile::tempdir;

    use super::*;

    fn touch_all(dir: &Path, names: &[&str]) {
        for name in names {
            File::create(dir.join(name)).unwrap();
        }
    }

    #[test]
    fn test_discover_complete_pairs() {
        let dir = tempdir().unwrap();
        touch_all(
            dir.path(),
            &[
                "TCR-S3_S3_L001_R1_001.fastq.gz",
                "TCR-S3_S3_L001_R2_001.fastq.gz",
                "TCR-S1_S1_L001_R1_001.fastq.gz",
                "TCR-S1_S1_L001_R2_001.fastq.gz",
                "TCR-S2_S2_L001_R2_001.fastq.gz",
                "TCR-S2_S2_L001_R1_001.fastq.gz",
                "README.txt",
                "Undetermined_S0_L001_R1_001.fastq.gz",
            ],
        );
        std::fs::create_dir(dir.path().join("TCR-S9_S9_L001_R1_001.fastq.gz")).unwrap();

        let set = SampleSet::discover(dir.path(), &NamingSchema::default(), true).unwrap();
        set.validate().unwrap();
        assert_eq!(set.ids(), vec!["TCR-S1_S1", "TCR-S2_S2", "TCR-S3_S3"]);

        let groups = set.read_groups();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].id, "TCR-S1_S1");
        assert_eq!(groups[0].sample_token, "S1");
        assert_eq!(groups[0].r1, dir.path().join("TCR-S1_S1_L001_R1_001.fastq.gz"));
        assert_eq!(groups[0].r2, Some(dir.path().join("TCR-S1_S1_L001_R2_001.fastq.gz")));
        assert_eq!(set.get("TCR-S2_S2", ReadRole::R2).unwrap().lane, Some(1));
    }

    #[rstest]
    #[case(&["TCR-A01_S1_L001_R1_001.fastq.gz"], vec![("TCR-A01_S1", ReadRole::R2)])]
    #[case(&["TCR-A01_S1_L001_R2_001.fastq.gz"], vec![("TCR-A01_S1", ReadRole::R1)])]
    #[case(
        &[
            "TCR-A01_S1_L001_R1_001.fastq.gz",
            "TCR-A01_S1_L001_R2_001.fastq.gz",
            "TCR-B01_S2_L001_R2_001.fastq.gz",
            "TCR-C01_S3_L001_R1_001.fastq.gz",
        ],
        vec![("TCR-B01_S2", ReadRole::R1), ("TCR-C01_S3", ReadRole::R2)]
    )]
    fn test_unpaired_reads_are_fatal(
        #[case] names: &[&str],
        #[case] expected: Vec<(&str, ReadRole)>,
    ) {
        let dir = tempdir().unwrap();
        touch_all(dir.path(), names);
        let set = SampleSet::discover(dir.path(), &NamingSchema::default(), true).unwrap();
        match set.validate() {
            Err(IdentityError::UnpairedReads { missing }) => {
                let expected: Vec<(String, ReadRole)> =
                    expected.into_iter().map(|(id, role)| (id.to_string(), role)).collect();
                assert_eq!(missing, expected);
            }
            other => panic!("Expected unpaired reads, found {:?}", other),
        }
    }

    #[test]
    fn test_no_usable_input() {
        let dir = tempdir().unwrap();
        touch_all(dir.path(), &["sample_sheet.csv", "A01.bam"]);
        let set = SampleSet::discover(dir.path(), &NamingSchema::default(), true).unwrap();
        assert!(set.is_empty());
        assert_matches!(set.validate(), Err(IdentityError::NoUsableInput { .. }));
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempdir().unwrap();
        let result = SampleSet::discover(dir.path().join("nope"), &NamingSchema::default(), true);
        assert_matches!(result, Err(IdentityError::Io { .. }));
    }

    #[test]
    fn test_duplicate_lane_is_fatal() {
        let dir = tempdir().unwrap();
        touch_all(
            dir.path(),
            &[
                "TCR-A01_S1_L001_R1_001.fastq.gz",
                "TCR-A01_S1_L002_R1_001.fastq.gz",
                "TCR-A01_S1_L001_R2_001.fastq.gz",
            ],
        );
        let result = SampleSet::discover(dir.path(), &NamingSchema::default(), true);
        assert_matches!(
            result,
            Err(IdentityError::DuplicateRead { role: ReadRole::R1, .. })
        );
    }

    #[test]
    fn test_paired_requires_role_field() {
        let schema = NamingSchema::new("{cohort}-{sample}.fastq.gz").unwrap();
        let result = SampleSet::from_paths("/in", vec![], &schema, true);
        assert_matches!(result, Err(IdentityError::NoRoleField { .. }));
    }

    #[test]
    fn test_single_end() {
        let schema = NamingSchema::new("{cohort}-{sample}.fastq.gz").unwrap();
        let paths = vec![PathBuf::from("/in/P1-B02.fastq.gz"), PathBuf::from("/in/P1-A01.fastq.gz")];
        let set = SampleSet::from_paths("/in", paths, &schema, false).unwrap();
        set.validate().unwrap();
        assert!(!set.is_paired());

        let groups = set.read_groups();
        assert_eq!(groups.iter().map(|g| g.id.as_str()).collect::<Vec<_>>(), vec!["P1-A01", "P1-B02"]);
        assert!(groups.iter().all(|g| g.r2.is_none()));
        assert_eq!(set.get("P1-A01", ReadRole::Unpaired).unwrap().identity.role, ReadRole::Unpaired);
    }

    #[test]
    fn test_single_end_with_role_field_is_unpaired() {
        let paths = vec![PathBuf::from("/in/TCR-A01_S1_L001_R1_001.fastq.gz")];
        let set = SampleSet::from_paths("/in", paths, &NamingSchema::default(), false).unwrap();
        assert_eq!(set.read_groups()[0].r1, PathBuf::from("/in/TCR-A01_S1_L001_R1_001.fastq.gz"));
    }
}
