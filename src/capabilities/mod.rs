//! External capability seams.
//!
//! Both the embedding backend and the git activity extractor are owned by
//! the surrounding system; Covenant consumes them through these traits and
//! ships small deterministic implementations for the CLI and tests.

mod activity;
mod embedding;

pub use activity::*;
pub use embedding::*;
