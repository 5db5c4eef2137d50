//! Reconciliation of the short sample names emitted by the analysis tool with the full sample
//! identifiers of the original input files.
//!
//! The analysis tool labels its outputs with a short form of each sample name.  A [`NameMap`]
//! applies the same [`ShortNameRule`] to every full identifier and records `short -> full`.  Two
//! full identifiers that collapse to the same short form are a collision: neither is kept in the
//! map, and both are reported so the affected artifacts are never guessed at.
#![forbid(unsafe_code)]

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use itertools::Itertools;
use thiserror::Error;

/// How the analysis tool derives a short name from a sample's `{sample}` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShortNameRule {
    /// The short name is the `{sample}` token itself.
    #[default]
    SampleToken,
    /// The short name is the trailing run of digits of the `{sample}` token, keeping the last
    /// `width` digits and zero-padding to `width`.
    NumericSuffix { width: usize },
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid short name rule `{0}`, expected `sample` or `numeric:<width>`")]
pub struct ShortNameRuleError(String);

impl ShortNameRule {
    /// Applies the rule to a `{sample}` token, returning `None` if no short form can be derived.
    pub fn short_name(&self, sample_token: &str) -> Option<String> {
        match self {
            ShortNameRule::SampleToken => Some(sample_token.to_string()),
            ShortNameRule::NumericSuffix { width } => {
                let digits: String = sample_token
                    .chars()
                    .rev()
                    .take_while(char::is_ascii_digit)
                    .collect::<Vec<char>>()
                    .into_iter()
                    .rev()
                    .collect();
                if digits.is_empty() {
                    return None;
                }
                let kept = &digits[digits.len().saturating_sub(*width)..];
                Some(format!("{:0>width$}", kept, width = *width))
            }
        }
    }
}

impl FromStr for ShortNameRule {
    type Err = ShortNameRuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = || ShortNameRuleError(s.to_string());
        match s.split_once(':') {
            None if s == "sample" => Ok(ShortNameRule::SampleToken),
            Some(("numeric", width)) => match width.parse::<usize>() {
                Ok(width) if width > 0 => Ok(ShortNameRule::NumericSuffix { width }),
                _ => Err(error()),
            },
            _ => Err(error()),
        }
    }
}

impl Display for ShortNameRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShortNameRule::SampleToken => write!(f, "sample"),
            ShortNameRule::NumericSuffix { width } => write!(f, "numeric:{}", width),
        }
    }
}

/// The outcome of resolving a short name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// The short name maps to exactly one full identifier.
    Mapped(&'a str),
    /// The short name is shared by these full identifiers.
    Collided(&'a [String]),
    /// No full identifier produced this short name.
    Unmapped,
}

/// A mapping from short names to full sample identifiers.
#[derive(Debug, Clone, Default)]
pub struct NameMap {
    rule: ShortNameRule,
    map: BTreeMap<String, String>,
    collisions: BTreeMap<String, Vec<String>>,
    underivable: Vec<String>,
}

impl NameMap {
    /// Builds the map from `(full identifier, sample token)` pairs.
    pub fn build<'a, I>(sources: I, rule: ShortNameRule) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut by_short: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut underivable = vec![];
        for (full, token) in sources {
            match rule.short_name(token) {
                Some(short) => {
                    let fulls = by_short.entry(short).or_insert_with(Vec::new);
                    if !fulls.iter().any(|f| f == full) {
                        fulls.push(full.to_string());
                    }
                }
                None => underivable.push(full.to_string()),
            }
        }

        let (singles, collided): (Vec<_>, Vec<_>) =
            by_short.into_iter().partition(|(_, fulls)| fulls.len() == 1);

        let map = singles.into_iter().map(|(short, mut fulls)| (short, fulls.remove(0))).collect();
        let collisions = collided
            .into_iter()
            .map(|(short, fulls)| (short, fulls.into_iter().sorted().collect()))
            .collect();
        Self { rule, map, collisions, underivable }
    }

    pub fn rule(&self) -> ShortNameRule {
        self.rule
    }

    /// Resolves a short name emitted by the analysis tool.
    pub fn resolve(&self, short: &str) -> Resolution<'_> {
        if let Some(full) = self.map.get(short) {
            Resolution::Mapped(full)
        } else if let Some(fulls) = self.collisions.get(short) {
            Resolution::Collided(fulls)
        } else {
            Resolution::Unmapped
        }
    }

    /// True if the name is the full identifier of a uniquely mapped sample.
    pub fn is_full_name(&self, name: &str) -> bool {
        self.map.values().any(|full| full == name)
    }

    /// The uniquely mapped `(short, full)` entries, sorted by short name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(s, f)| (s.as_str(), f.as_str()))
    }

    /// The collided short names and the full identifiers sharing each.
    pub fn collisions(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.collisions.iter().map(|(s, f)| (s.as_str(), f.as_slice()))
    }

    /// Full identifiers for which the rule could not derive a short name.
    pub fn underivable(&self) -> &[String] {
        &self.underivable
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn has_collisions(&self) -> bool {
        !self.collisions.is_empty()
    }
}
