use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Proof that a plan passed two-factor approval.
///
/// At most one record ever exists per plan — the `plan_id` column is the
/// table's primary key, so a concurrent second approval loses at the
/// database, not by convention. Records are never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub plan_id: String,
    /// Content hash the approver asserted they reviewed.
    pub submitted_hash: String,
    /// Opaque identity token of whoever held the possession secret.
    pub verifier: String,
    pub verified_at: DateTime<Utc>,
}

/// The process-wide possession secret, injected at construction time.
///
/// Deliberately opaque: no `Serialize`, and `Debug` prints a placeholder so
/// the secret cannot leak through error messages or logs.
#[derive(Clone)]
pub struct PossessionSecret(Vec<u8>);

impl PossessionSecret {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(secret.into())
    }

    /// Compare a presented token against the secret without an early exit
    /// on the first mismatched byte.
    pub fn matches(&self, token: &[u8]) -> bool {
        if self.0.len() != token.len() {
            return false;
        }
        self.0
            .iter()
            .zip(token)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for PossessionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PossessionSecret(..)")
    }
}
