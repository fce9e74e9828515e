use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A normalized development event pulled from the external activity source.
///
/// Events are append-only: deduplicated on (project_id, commit_id), never
/// edited, never deleted by this crate (retention is an external concern).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Stable identifier from the source stream (git commit sha).
    pub commit_id: String,
    pub timestamp: DateTime<Utc>,
    pub changed_paths: Vec<ChangedPath>,
    pub diff_summary: String,
    /// Insertion order within the project's log; drift windows are cursor
    /// ranges over this sequence.
    pub seq: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedPath {
    pub path: String,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "added" => Some(Self::Added),
            "modified" => Some(Self::Modified),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Raw event shape returned by the activity capability, before
/// normalization into [`ActivityEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawActivityEvent {
    pub commit_id: String,
    pub timestamp: DateTime<Utc>,
    pub changed_paths: Vec<ChangedPath>,
    pub diff_summary: String,
}
