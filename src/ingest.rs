//! Activity ingestion: pull, deduplicate, persist, advance.
//!
//! Each cycle polls the external activity source from the project's stored
//! cursor and commits the whole batch plus the new cursor in a single
//! transaction. A crash mid-batch leaves the cursor where it was; the next
//! cycle re-polls and the (project, commit) dedup key absorbs duplicate
//! delivery. A cycle whose source is unreachable is skipped, not retried —
//! the scheduler owning this call will come back on its next tick.

use std::sync::Arc;

use uuid::Uuid;

use crate::capabilities::ActivitySource;
use crate::db::Database;
use crate::error::Result;
use crate::locks::ProjectLocks;

pub struct ActivityIngestor {
    db: Database,
    source: Arc<dyn ActivitySource>,
    locks: ProjectLocks,
}

impl ActivityIngestor {
    pub fn new(db: Database, source: Arc<dyn ActivitySource>, locks: ProjectLocks) -> Self {
        Self { db, source, locks }
    }

    /// Run one ingestion cycle for a project. Returns the number of events
    /// that were new (duplicates delivered again count as zero).
    ///
    /// Serialized per project: the cursor is read and advanced under the
    /// project's exclusive section, so overlapping cycles cannot both
    /// consume the same cursor.
    pub async fn ingest(&self, project_id: Uuid, repo: &str) -> Result<usize> {
        let _section = self.locks.acquire(project_id).await;

        let cursor = self.db.ingest_cursor(project_id)?;
        let raw = self
            .source
            .poll_activity(repo, cursor.as_deref())
            .map_err(|e| {
                tracing::warn!(%project_id, repo, error = %e, "Ingestion cycle skipped");
                e
            })?;

        let Some(last) = raw.last() else {
            tracing::debug!(%project_id, "No new activity");
            return Ok(0);
        };

        let new_cursor = last.commit_id.clone();
        let inserted = self.db.append_events(project_id, &raw, &new_cursor)?;

        tracing::info!(
            %project_id,
            polled = raw.len(),
            inserted,
            cursor = %new_cursor,
            "Activity ingested"
        );
        Ok(inserted)
    }
}
