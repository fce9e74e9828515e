use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An architectural plan that becomes immutable once approved.
///
/// Plans are the reference point drift is measured against. A plan starts
/// life as a draft, goes through two-factor approval, and from then on its
/// body and content hash are frozen: any edit is a *new* plan carrying a
/// `supersedes` back-reference to the one it replaces.
///
/// # Lifecycle
/// Draft → PendingApproval → Approved → (Superseded).
/// Rejected is terminal. Superseding marks the old plan's status and
/// `superseded_by` but never touches its content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SacredPlan {
    /// Content-derived id: hash of (content_hash, created_at).
    pub id: String,
    pub project_id: Uuid,
    pub title: String,
    pub body: String,
    pub status: PlanStatus,
    /// Hash of (project_id, title, body), computed once at draft time.
    pub content_hash: String,
    /// Weak back-reference to the plan this one replaces, if any.
    pub supersedes: Option<String>,
    /// Set when a newer approved plan takes over this one's scope.
    pub superseded_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

/// The lifecycle state of a plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    PendingApproval,
    Approved,
    Superseded,
    Rejected,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Superseded => "superseded",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "pending_approval" => Some(Self::PendingApproval),
            "approved" => Some(Self::Approved),
            "superseded" => Some(Self::Superseded),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Input for drafting a new plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePlanInput {
    pub title: String,
    pub body: String,
    /// Plan this draft is intended to replace, recorded as a weak reference.
    pub supersedes: Option<String>,
}
