//! The filename grammar used to recognise sample FASTQs.
//!
//! A grammar is written as a template of literal text and `{field}` placeholders, for example
//! `{cohort}-{sample}_{suffix}_L{lane}_R{role}_001.fastq.gz`.  The template is parsed once into a
//! [`NamingSchema`], which holds the ordered segments and the compiled, anchored regular
//! expression used to extract each field.  Changing how samples are named is a change to the
//! template string, not to the code that consumes the extracted fields.
#![forbid(unsafe_code)]

use std::{fmt::Display, str::FromStr};

use itertools::Itertools;
use regex::Regex;
use strum::{Display as StrumDisplay, EnumIter, EnumString};
use thiserror::Error;

/// The default grammar for raw, untrimmed input FASTQs.
pub const DEFAULT_INPUT_PATTERN: &str = "{cohort}-{sample}_{suffix}_L{lane}_R{role}_001.fastq.gz";

/// The token inserted before the FASTQ extension of trimmed files.
pub const TRIMMED_TAG: &str = "_trimmed";

/// FASTQ extensions, in the order they are tried.
const FASTQ_EXTENSIONS: &[&str] = &[".fastq.gz", ".fq.gz", ".fastq", ".fq"];

/// The wildcard the analysis tool expands to the read role.
pub const TOOL_ROLE_WILDCARD: &str = "{{R}}";
/// The wildcard the analysis tool expands to the sample name it reports on its outputs.
pub const TOOL_SAMPLE_WILDCARD: &str = "{{SAMPLE}}";
/// The wildcard used for all other fields when rendering a pattern for the analysis tool.
pub const TOOL_ANY_WILDCARD: &str = "*";

/// A named field that may be embedded in a filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Field {
    /// The cohort (plate, run or project) prefix.
    Cohort,
    /// The sample token, e.g. a well code such as `A01`.
    Sample,
    /// A trailing sample qualifier, e.g. the sample sheet ordinal `S12`.
    Suffix,
    /// The sequencing lane number.
    Lane,
    /// The read role digit, `1` or `2`.
    Role,
}

impl Field {
    /// The regular expression a value of this field must match.
    fn pattern(self) -> &'static str {
        match self {
            Field::Cohort | Field::Sample | Field::Suffix => "[A-Za-z0-9]+",
            Field::Lane => r"\d+",
            Field::Role => "[12]",
        }
    }

    /// True if the field is part of the full sample identifier.
    pub fn is_identity(self) -> bool {
        matches!(self, Field::Cohort | Field::Sample | Field::Suffix)
    }
}

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field),
}

/// The errors that may occur when parsing a filename template.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum NamingError {
    #[error("The naming pattern is empty")]
    Empty,

    #[error("Unknown field `{{{name}}}` in naming pattern `{template}`")]
    UnknownField { name: String, template: String },

    #[error("Unterminated `{{` in naming pattern `{template}`")]
    Unterminated { template: String },

    #[error("Field `{{{field}}}` appears more than once in naming pattern `{template}`")]
    DuplicateField { field: Field, template: String },

    #[error("Fields `{{{first}}}` and `{{{second}}}` must be separated by literal text in `{template}`")]
    AdjacentFields { first: Field, second: Field, template: String },

    #[error("The naming pattern `{template}` must contain a `{{sample}}` field")]
    MissingSampleField { template: String },

    #[error("The naming pattern `{template}` does not end with a FASTQ extension")]
    NoFastqExtension { template: String },

    #[error("Unable to compile naming pattern `{template}`: {reason}")]
    Regex { template: String, reason: String },
}

/// The values extracted from a filename that matched a [`NamingSchema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameMatch {
    /// The filename text from its start through the last identity field.
    pub full_id: String,
    /// The `{sample}` token.
    pub sample: String,
    pub cohort: Option<String>,
    pub suffix: Option<String>,
    pub lane: Option<u32>,
    /// The read role digit, if the grammar has a `{role}` field.
    pub role: Option<u8>,
}

/// A parsed filename grammar.
#[derive(Debug, Clone)]
pub struct NamingSchema {
    template: String,
    segments: Vec<Segment>,
    regex: Regex,
}

impl NamingSchema {
    /// Parses a template into a schema.
    ///
    /// # Errors
    ///
    /// - [`NamingError`] if the template is malformed.
    pub fn new(template: &str) -> Result<Self, NamingError> {
        let segments = Self::parse_segments(template)?;
        let regex = Self::compile(template, &segments)?;
        Ok(Self { template: template.to_string(), segments, regex })
    }

    fn parse_segments(template: &str) -> Result<Vec<Segment>, NamingError> {
        if template.is_empty() {
            return Err(NamingError::Empty);
        }

        let mut segments: Vec<Segment> = vec![];
        let mut rest = template;
        while !rest.is_empty() {
            match rest.find('{') {
                None => {
                    segments.push(Segment::Literal(rest.to_string()));
                    break;
                }
                Some(open) => {
                    if open > 0 {
                        segments.push(Segment::Literal(rest[..open].to_string()));
                    }
                    let close = rest[open..].find('}').map(|offset| open + offset).ok_or_else(
                        || NamingError::Unterminated { template: template.to_string() },
                    )?;
                    let name = &rest[open + 1..close];
                    let field = Field::from_str(name).map_err(|_| NamingError::UnknownField {
                        name: name.to_string(),
                        template: template.to_string(),
                    })?;
                    if segments.contains(&Segment::Field(field)) {
                        return Err(NamingError::DuplicateField {
                            field,
                            template: template.to_string(),
                        });
                    }
                    if let Some(Segment::Field(previous)) = segments.last() {
                        return Err(NamingError::AdjacentFields {
                            first: *previous,
                            second: field,
                            template: template.to_string(),
                        });
                    }
                    segments.push(Segment::Field(field));
                    rest = &rest[close + 1..];
                }
            }
        }

        if !segments.contains(&Segment::Field(Field::Sample)) {
            return Err(NamingError::MissingSampleField { template: template.to_string() });
        }
        Ok(segments)
    }

    /// Builds the anchored regex.  The full identifier is captured as the group `full`, which
    /// spans from the start of the name through the last identity field.
    fn compile(template: &str, segments: &[Segment]) -> Result<Regex, NamingError> {
        let last_identity = segments
            .iter()
            .rposition(|s| matches!(s, Segment::Field(f) if f.is_identity()))
            .unwrap_or(0);

        let mut pattern = String::from("^(?P<full>");
        for (index, segment) in segments.iter().enumerate() {
            match segment {
                Segment::Literal(text) => pattern.push_str(&regex::escape(text)),
                Segment::Field(field) => {
                    pattern.push_str(&format!("(?P<{}>{})", field, field.pattern()));
                }
            }
            if index == last_identity {
                pattern.push(')');
            }
        }
        pattern.push('$');

        Regex::new(&pattern)
            .map_err(|e| NamingError::Regex { template: template.to_string(), reason: e.to_string() })
    }

    /// The template this schema was parsed from.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// True if the grammar carries the read role.
    pub fn has_role(&self) -> bool {
        self.segments.contains(&Segment::Field(Field::Role))
    }

    /// Matches a bare file name (no directory) against the grammar, returning `None` if it does
    /// not match.
    pub fn parse(&self, file_name: &str) -> Option<NameMatch> {
        let captures = self.regex.captures(file_name)?;
        let text = |field: Field| captures.name(&field.to_string()).map(|m| m.as_str().to_string());

        let lane = match captures.name("lane") {
            Some(lane) => Some(lane.as_str().parse::<u32>().ok()?),
            None => None,
        };
        let role = match captures.name("role") {
            Some(role) => Some(role.as_str().parse::<u8>().ok()?),
            None => None,
        };

        Some(NameMatch {
            full_id: captures.name("full")?.as_str().to_string(),
            sample: text(Field::Sample)?,
            cohort: text(Field::Cohort),
            suffix: text(Field::Suffix),
            lane,
            role,
        })
    }

    /// Derives the grammar of the files written by the trim stage.
    ///
    /// # Errors
    ///
    /// - [`NamingError::NoFastqExtension`] if the template does not end in a FASTQ extension.
    pub fn trimmed(&self) -> Result<Self, NamingError> {
        let template = trimmed_file_name(&self.template)
            .ok_or_else(|| NamingError::NoFastqExtension { template: self.template.clone() })?;
        match self.segments.last() {
            Some(Segment::Literal(_)) => Self::new(&template),
            _ => Err(NamingError::NoFastqExtension { template: self.template.clone() }),
        }
    }

    /// Renders the grammar as an input pattern for the analysis tool, replacing the role with
    /// [`TOOL_ROLE_WILDCARD`], the sample with [`TOOL_SAMPLE_WILDCARD`] and everything else with
    /// [`TOOL_ANY_WILDCARD`].
    pub fn tool_pattern(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.as_str(),
                Segment::Field(Field::Role) => TOOL_ROLE_WILDCARD,
                Segment::Field(Field::Sample) => TOOL_SAMPLE_WILDCARD,
                Segment::Field(_) => TOOL_ANY_WILDCARD,
            })
            .join("")
    }
}

impl FromStr for NamingSchema {
    type Err = NamingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Display for NamingSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.template)
    }
}

impl PartialEq for NamingSchema {
    fn eq(&self, other: &Self) -> bool {
        self.template == other.template
    }
}

#[cfg(test)]
impl Default for NamingSchema {
    fn default() -> Self {
        // The default template is a constant known to parse.
        Self::new(DEFAULT_INPUT_PATTERN).unwrap()
    }
}

/// Inserts [`TRIMMED_TAG`] before the FASTQ extension of a file name, returning `None` if the
/// name has no FASTQ extension.
pub fn trimmed_file_name(file_name: &str) -> Option<String> {
    FASTQ_EXTENSIONS.iter().find(|ext| file_name.ends_with(*ext)).map(|ext| {
        let stem = &file_name[..file_name.len() - ext.len()];
        format!("{}{}{}", stem, TRIMMED_TAG, ext)
    })
}

#[cfg(test)]
mod test {
    use matches::assert_matches;
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_parse_default_pattern() {
        let schema = NamingSchema::default();
        let found = schema.parse("TCR-A01_S1_L001_R2_001.fastq.gz").unwrap();
        assert_eq!(found.full_id, "TCR-A01_S1");
        assert_eq!(found.sample, "A01");
        assert_eq!(found.cohort.as_deref(), Some("TCR"));
        assert_eq!(found.suffix.as_deref(), Some("S1"));
        assert_eq!(found.lane, Some(1));
        assert_eq!(found.role, Some(2));
        assert!(schema.has_role());
    }

    #[rstest]
    #[case("TCR-A01_S1_L001_R3_001.fastq.gz")]
    #[case("TCR-A01_S1_L001_R1_001.fastq")]
    #[case("TCR-A01_S1_L001_I1_001.fastq.gz")]
    #[case("TCR-A01_S1_L001_R1_001.fastq.gz.md5")]
    #[case("Undetermined_S0_L001_R1_001.fastq.gz")]
    #[case("notes.txt")]
    fn test_non_matching_names(#[case] name: &str) {
        assert_eq!(NamingSchema::default().parse(name), None);
    }

    #[test]
    fn test_full_id_without_suffix_field() {
        let schema = NamingSchema::new("{sample}_R{role}.fq.gz").unwrap();
        let found = schema.parse("B07_R1.fq.gz").unwrap();
        assert_eq!(found.full_id, "B07");
        assert_eq!(found.lane, None);
        assert_eq!(found.cohort, None);
    }

    #[test]
    fn test_no_role_field() {
        let schema = NamingSchema::new("{cohort}-{sample}.fastq.gz").unwrap();
        assert!(!schema.has_role());
        assert_eq!(schema.parse("P1-C03.fastq.gz").unwrap().role, None);
    }

    #[test]
    fn test_literals_are_escaped() {
        let schema = NamingSchema::new("{sample}.R{role}.fastq").unwrap();
        assert!(schema.parse("A01.R1.fastq").is_some());
        assert!(schema.parse("A01xR1.fastq").is_none());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(NamingSchema::new("").unwrap_err(), NamingError::Empty);
        assert_matches!(NamingSchema::new("{well}_R{role}.fq"), Err(NamingError::UnknownField { .. }));
        assert_matches!(NamingSchema::new("{sample_R1.fq"), Err(NamingError::Unterminated { .. }));
        assert_matches!(
            NamingSchema::new("{sample}_{sample}.fq"),
            Err(NamingError::DuplicateField { field: Field::Sample, .. })
        );
        assert_matches!(
            NamingSchema::new("{cohort}{sample}.fq"),
            Err(NamingError::AdjacentFields { first: Field::Cohort, second: Field::Sample, .. })
        );
        assert_matches!(
            NamingSchema::new("{cohort}_R{role}.fq"),
            Err(NamingError::MissingSampleField { .. })
        );
    }

    #[rstest]
    #[case("A01_R1_001.fastq.gz", Some("A01_R1_001_trimmed.fastq.gz"))]
    #[case("A01_R1.fq.gz", Some("A01_R1_trimmed.fq.gz"))]
    #[case("A01_R1.fastq", Some("A01_R1_trimmed.fastq"))]
    #[case("A01_R1.fq", Some("A01_R1_trimmed.fq"))]
    #[case("A01_R1.bam", None)]
    fn test_trimmed_file_name(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(trimmed_file_name(name).as_deref(), expected);
    }

    #[test]
    fn test_trimmed_schema_matches_trimmed_names() {
        let schema = NamingSchema::default();
        let raw = "TCR-A01_S1_L001_R1_001.fastq.gz";
        let trimmed_schema = schema.trimmed().unwrap();
        let trimmed = trimmed_file_name(raw).unwrap();

        assert_eq!(trimmed_schema.template(), "{cohort}-{sample}_{suffix}_L{lane}_R{role}_001_trimmed.fastq.gz");
        assert_eq!(trimmed_schema.parse(&trimmed), schema.parse(raw));
        assert_eq!(trimmed_schema.parse(raw), None);
    }

    #[test]
    fn test_trimmed_requires_extension() {
        let schema = NamingSchema::new("{sample}_R{role}.bam").unwrap();
        assert_matches!(schema.trimmed(), Err(NamingError::NoFastqExtension { .. }));
    }

    #[test]
    fn test_tool_pattern() {
        let schema = NamingSchema::default().trimmed().unwrap();
        assert_eq!(schema.tool_pattern(), "*-{{SAMPLE}}_*_L*_R{{R}}_001_trimmed.fastq.gz");
    }

    #[test]
    fn test_from_str_and_display() {
        let schema: NamingSchema = "{sample}_R{role}.fq".parse().unwrap();
        assert_eq!(schema.to_string(), "{sample}_R{role}.fq");
    }
}
