//! Covenant tracks a project's architectural intent and flags when ongoing
//! development drifts away from it.
//!
//! The pieces, in data-flow order:
//!
//! - [`db::Database`]: content-addressed plan store plus append-only logs
//!   for approval records, activity events and drift reports.
//! - [`approval::ApprovalVerifier`]: two-factor gate (possession secret +
//!   content integrity) a plan must pass to become immutable.
//! - [`ingest::ActivityIngestor`]: pulls development events from the
//!   external git capability, deduplicates and advances a per-project
//!   cursor atomically.
//! - [`drift::DriftDetector`]: scores activity windows against approved
//!   plan fingerprints and emits severity-classified reports.
//! - [`query::PlanQuery`]: semantic lookup over a project's approved
//!   plans.
//!
//! Embedding and activity extraction are capabilities owned by the
//! surrounding system, consumed through the traits in [`capabilities`].

pub mod approval;
pub mod capabilities;
pub mod db;
pub mod drift;
pub mod error;
pub mod hash;
pub mod ingest;
pub mod locks;
pub mod models;
pub mod query;
