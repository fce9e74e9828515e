//! Two-factor approval of sacred plans.
//!
//! A plan only becomes immutable through this verifier, and both factors
//! must hold:
//!
//! 1. **Possession**: the caller presents the process-wide secret
//!    configured at startup. The secret is injected at construction and
//!    never logged or persisted.
//! 2. **Integrity**: the caller presents the content hash of the body they
//!    reviewed; the verifier recomputes the hash from the stored body and
//!    requires exact equality with both the asserted hash and the
//!    draft-time hash. This catches approving a plan whose content was
//!    altered, corrupted or simply not the version the approver read.
//!
//! Factor failures are terminal for the attempt — there is no automatic
//! retry, and each failure maps to its own error kind so callers and tests
//! can tell which factor broke.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::hash;
use crate::locks::ProjectLocks;
use crate::models::{ApprovalRecord, PlanStatus, PossessionSecret};

pub struct ApprovalVerifier {
    db: Database,
    secret: PossessionSecret,
    locks: ProjectLocks,
}

impl ApprovalVerifier {
    pub fn new(db: Database, secret: PossessionSecret, locks: ProjectLocks) -> Self {
        Self { db, secret, locks }
    }

    /// Approve a pending plan, atomically writing the one-and-only
    /// ApprovalRecord and flipping the plan to `approved`.
    ///
    /// Runs inside the project's exclusive section: of two concurrent
    /// attempts on the same plan, exactly one succeeds and the other
    /// observes `Conflict` (or `InvalidState` if it re-reads first).
    pub async fn approve(
        &self,
        plan_id: &str,
        possession_token: &[u8],
        asserted_hash: &str,
        verifier_identity: &str,
    ) -> Result<ApprovalRecord> {
        let plan = self.db.get_plan(plan_id)?;
        let _section = self.locks.acquire(plan.project_id).await;

        // Re-read under the lock; the plan may have moved since.
        let plan = self.db.get_plan(plan_id)?;
        if plan.status != PlanStatus::PendingApproval {
            return Err(Error::invalid_state(
                plan_id,
                "pending_approval",
                plan.status.as_str(),
            ));
        }

        if !self.secret.matches(possession_token) {
            tracing::warn!(plan_id, "Approval rejected: possession token mismatch");
            return Err(Error::Authentication);
        }

        let recomputed = hash::content_hash(plan.project_id, &plan.title, &plan.body);
        if recomputed != plan.content_hash || asserted_hash != plan.content_hash {
            // Deliberately not logging the asserted hash.
            tracing::warn!(plan_id, "Approval rejected: content hash mismatch");
            return Err(Error::Integrity {
                plan_id: plan_id.to_string(),
            });
        }

        let record = self
            .db
            .approve_plan(plan_id, asserted_hash, verifier_identity)?;
        tracing::info!(plan_id, verifier = verifier_identity, "Plan approved");
        Ok(record)
    }
}
