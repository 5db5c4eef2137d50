//! A library for running a cohort of sequencing samples through trimming, clonotype analysis and
//! QC reporting with external tools.
//!
//! # Overview
//!
//! The flow of a run is as follows:
//!
//! - The [`identity::SampleSet`] discovers the input FASTQs with a [`naming::NamingSchema`] and
//!   checks that every sample is complete before any tool runs.
//! - The [`reconcile::NameMap`] maps the short sample names the analysis tool emits back to the
//!   full sample identifiers.
//! - The [`stages`] build the trim, analysis and export invocations, which the
//!   [`executor::Executor`] runs one at a time with their output captured to per-invocation logs.
//! - The [`artifacts::ArtifactManifest`] classifies the analysis outputs once, and
//!   [`artifacts::rename_artifacts`] renames them to the full sample identifiers.
//! - The [`qc`] reports are produced per artifact class, cohort-wide and per sample.
//! - Recoverable per-sample failures are collected in the [`ledger::FailureLedger`] and written
//!   out with the invocation record at the end of [`run::run`].
#![deny(unsafe_code)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]
pub mod artifacts;
pub mod executor;
pub mod identity;
pub mod ledger;
pub mod naming;
pub mod opts;
pub mod qc;
pub mod reconcile;
pub mod run;
pub mod run_sheet;
pub mod stages;
pub mod utils;
