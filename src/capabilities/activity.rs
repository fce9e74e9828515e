//! Activity capability: pulling raw development events from a repository.
//!
//! Git log/diff extraction itself is external; this crate consumes its
//! output through [`ActivitySource`]. The built-in [`JsonlActivitySource`]
//! reads a feed file with one [`RawActivityEvent`] JSON object per line,
//! the shape external git tooling exports.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::models::RawActivityEvent;

pub trait ActivitySource: Send + Sync {
    /// Events after `since` (exclusive), oldest first. `None` means the
    /// beginning of history. Unreachable sources fail with
    /// [`Error::SourceUnavailable`]; the caller skips the cycle rather
    /// than retrying inline.
    fn poll_activity(&self, repo: &str, since: Option<&str>) -> Result<Vec<RawActivityEvent>>;
}

/// File-backed activity source: one raw event JSON object per line.
///
/// `repo` is resolved relative to the feed root, so one source instance
/// can serve multiple projects' feeds.
pub struct JsonlActivitySource {
    root: PathBuf,
}

impl JsonlActivitySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ActivitySource for JsonlActivitySource {
    fn poll_activity(&self, repo: &str, since: Option<&str>) -> Result<Vec<RawActivityEvent>> {
        let path = resolve(&self.root, repo);
        let file = std::fs::File::open(&path).map_err(|e| {
            Error::SourceUnavailable(format!("cannot open feed {}: {}", path.display(), e))
        })?;

        let mut events = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| {
                Error::SourceUnavailable(format!("cannot read feed {}: {}", path.display(), e))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let event: RawActivityEvent = serde_json::from_str(&line).map_err(|e| {
                Error::SourceUnavailable(format!(
                    "malformed event at {}:{}: {}",
                    path.display(),
                    line_no + 1,
                    e
                ))
            })?;
            events.push(event);
        }

        // The feed is append-only and oldest-first; everything after the
        // cursor commit is new. An unknown cursor means the feed was
        // rewritten, so replay everything and let dedup absorb it.
        if let Some(since) = since {
            if let Some(pos) = events.iter().position(|e| e.commit_id == since) {
                return Ok(events.split_off(pos + 1));
            }
            tracing::warn!(repo, since, "Cursor not found in feed, replaying full history");
        }
        Ok(events)
    }
}

fn resolve(root: &Path, repo: &str) -> PathBuf {
    let candidate = root.join(repo);
    if candidate.extension().is_some() {
        candidate
    } else {
        candidate.with_extension("jsonl")
    }
}
