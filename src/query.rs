//! Semantic lookup over a project's approved plans.
//!
//! Project isolation fails closed: candidates come from a query filtered
//! on the project id, so a plan from another project can never appear in
//! the ranking no matter what the similarity backend returns.

use std::sync::Arc;

use uuid::Uuid;

use crate::capabilities::{cosine_similarity, FingerprintCache};
use crate::db::Database;
use crate::error::Result;
use crate::models::SacredPlan;

pub struct PlanQuery {
    db: Database,
    fingerprints: Arc<FingerprintCache>,
}

impl PlanQuery {
    pub fn new(db: Database, fingerprints: Arc<FingerprintCache>) -> Self {
        Self { db, fingerprints }
    }

    /// Top-k approved plans ranked by similarity to a natural-language
    /// query, descending. A project with no approved plans yields an empty
    /// vector — that is an answer, not an error.
    pub async fn query_approved_plans(
        &self,
        project_id: Uuid,
        query: &str,
        k: usize,
    ) -> Result<Vec<(SacredPlan, f32)>> {
        let plans = self.db.list_approved(project_id, false)?;
        if plans.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.fingerprints.embed(query).await?;

        let mut ranked = Vec::with_capacity(plans.len());
        for plan in plans {
            let fingerprint = self.fingerprints.fingerprint(&plan.id, &plan.body).await?;
            let score = cosine_similarity(&query_vector, &fingerprint);
            ranked.push((plan, score));
        }

        // Descending by similarity; approval order breaks ties stably.
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k);
        Ok(ranked)
    }
}
