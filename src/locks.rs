//! Per-project exclusive sections.
//!
//! Plan-state transitions, ingestion and report writing are serialized per
//! project; work for different projects proceeds concurrently. Slow
//! capability calls (embedding, similarity) must never run while a
//! project's section is held — callers compute first, then lock to commit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

#[derive(Default, Clone)]
pub struct ProjectLocks {
    locks: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive section for one project. The guard is owned,
    /// so it can be held across awaits inside the critical section.
    pub async fn acquire(&self, project_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("project lock registry poisoned");
            locks
                .entry(project_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_project_serializes() {
        let locks = ProjectLocks::new();
        let project = Uuid::new_v4();

        let guard = locks.acquire(project).await;
        let second = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(project).await;
            })
        };

        // Second acquisition cannot finish while the first guard is held.
        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        drop(guard);
        second.await.unwrap();
    }

    #[tokio::test]
    async fn different_projects_do_not_block() {
        let locks = ProjectLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let _b = locks.acquire(Uuid::new_v4()).await; // would deadlock if shared
    }
}
