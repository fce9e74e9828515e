//! Error taxonomy for Covenant.
//!
//! Every failure mode a caller can act on gets its own variant, so the
//! HTTP/CLI layer (and tests) can tell "you sent garbage" apart from
//! "you lost a race" without string matching. Approval-factor failures
//! (`Authentication`, `Integrity`) are security-relevant: they are logged
//! at the call site without the secret or the asserted hash, and they are
//! never retried automatically.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input. The caller must fix the request and resubmit.
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation not legal in the entity's current state. The caller can
    /// re-read the entity and decide what to do.
    #[error("invalid state for {entity}: expected {expected}, found {actual}")]
    InvalidState {
        entity: String,
        expected: String,
        actual: String,
    },

    /// Possession factor failed during approval.
    #[error("authentication failed: possession token rejected")]
    Authentication,

    /// Integrity factor failed during approval: the asserted content hash
    /// does not match the plan body as stored at draft time.
    #[error("integrity check failed for plan {plan_id}")]
    Integrity { plan_id: String },

    /// A concurrent mutation won the race. The caller may re-read and
    /// decide whether to retry.
    #[error("conflict on {entity}: {reason}")]
    Conflict { entity: String, reason: String },

    /// The referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The external activity source was unreachable. The ingestion cycle is
    /// skipped; the scheduler retries on its next natural tick.
    #[error("activity source unavailable: {0}")]
    SourceUnavailable(String),

    /// Embedding capability failure.
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn invalid_state(entity: impl ToString, expected: &str, actual: &str) -> Self {
        Self::InvalidState {
            entity: entity.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn conflict(entity: impl ToString, reason: &str) -> Self {
        Self::Conflict {
            entity: entity.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
