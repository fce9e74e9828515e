use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of one drift evaluation cycle for a project.
///
/// Reports are an append-only history: a later report never alters an
/// earlier one. The window is a half-open range of event sequence numbers
/// `(window_start, window_end]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub id: Uuid,
    pub project_id: Uuid,
    pub window_start: i64,
    pub window_end: i64,
    /// Weighted fraction of window events not explained by any approved
    /// plan, in [0, 1].
    pub score: f64,
    pub severity: Severity,
    pub findings: Vec<DriftFinding>,
    pub created_at: DateTime<Utc>,
}

/// Per-event alignment verdict inside a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftFinding {
    pub event_id: Uuid,
    pub commit_id: String,
    /// Best-aligned approved plan, when the event clears the similarity
    /// floor. `None` means no approved plan explains this event.
    pub aligned_plan_id: Option<String>,
    pub similarity: f32,
    pub explanation: String,
}

/// Drift severity, a monotonic step function of the report score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}
