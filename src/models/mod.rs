//! Domain models for Covenant.
//!
//! # Core Concepts
//!
//! ## Immutable-once-approved
//!
//! - [`SacredPlan`]: an architectural plan record. Mutable only while in
//!   draft; frozen (body and content hash) from the moment it is approved.
//!   Edits after approval are new plans linked via `supersedes`.
//! - [`ApprovalRecord`]: proof that a plan passed two-factor approval.
//!   At most one per plan, ever.
//!
//! ## Append-only logs
//!
//! - [`ActivityEvent`]: normalized development activity pulled from the
//!   external git capability, deduplicated by (project, commit).
//! - [`DriftReport`]: outcome of one drift evaluation cycle. Superseding
//!   reports never alter prior ones.
//!
//! Projects themselves are owned by the surrounding system; everything
//! here references them by [`uuid::Uuid`] only.

mod activity;
mod approval;
mod plan;
mod report;

pub use activity::*;
pub use approval::*;
pub use plan::*;
pub use report::*;
