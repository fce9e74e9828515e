//! Drift detection: scoring activity against approved plans.
//!
//! Drift is *unexplained activity*: an event whose best alignment across
//! all approved plan fingerprints falls below the similarity floor. The
//! project score for a window is the weighted fraction of unexplained
//! events, where an event's weight is its changed-path count — a commit
//! touching twenty files off-plan matters more than a one-line stray.
//!
//! Contradiction detection (an event matching a plan while asserting the
//! opposite architecture) is explicitly not part of this policy.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::capabilities::{cosine_similarity, FingerprintCache};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::locks::ProjectLocks;
use crate::models::{ActivityEvent, DriftFinding, DriftReport, SacredPlan, Severity};

/// Drift policy knobs. All four are configuration, not constants; the
/// serde names are the recognized option spellings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriftConfig {
    /// Similarity floor: an event whose best alignment is below this is
    /// unexplained and contributes drift.
    pub min_unexplained_ratio: f32,
    /// Severity steps over the drift score. Zero is always `none`;
    /// `critical` starts at `high_threshold`.
    pub low_threshold: f64,
    pub mid_threshold: f64,
    pub high_threshold: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            min_unexplained_ratio: 0.3,
            low_threshold: 0.2,
            mid_threshold: 0.6,
            high_threshold: 0.85,
        }
    }
}

impl DriftConfig {
    pub fn severity(&self, score: f64) -> Severity {
        if score <= 0.0 {
            Severity::None
        } else if score < self.low_threshold {
            Severity::Low
        } else if score < self.mid_threshold {
            Severity::Medium
        } else if score < self.high_threshold {
            Severity::High
        } else {
            Severity::Critical
        }
    }
}

pub struct DriftDetector {
    db: Database,
    fingerprints: Arc<FingerprintCache>,
    config: DriftConfig,
    locks: ProjectLocks,
}

impl DriftDetector {
    pub fn new(
        db: Database,
        fingerprints: Arc<FingerprintCache>,
        config: DriftConfig,
        locks: ProjectLocks,
    ) -> Self {
        Self {
            db,
            fingerprints,
            config,
            locks,
        }
    }

    /// Evaluate drift for one project and persist the report.
    ///
    /// `since_cursor` overrides the stored report cursor (re-scoring a past
    /// window, which leaves the cursor untouched); `None` continues from
    /// where the last report stopped and advances the cursor on success.
    ///
    /// Embedding runs outside the project's exclusive section; the section
    /// is taken twice, briefly — once to snapshot the window, once to
    /// commit the report. Cancelling this future persists nothing: the
    /// report and cursor advance are written only after every event in the
    /// window is scored.
    pub async fn evaluate(&self, project_id: Uuid, since_cursor: Option<i64>) -> Result<DriftReport> {
        // Approved plans are immutable; reading them outside the lock is safe.
        let plans = self.db.list_approved(project_id, false)?;
        let mut fingerprints = Vec::with_capacity(plans.len());
        for plan in &plans {
            fingerprints.push(self.fingerprints.fingerprint(&plan.id, &plan.body).await?);
        }

        let (window_start, events) = {
            let _section = self.locks.acquire(project_id).await;
            let start = match since_cursor {
                Some(seq) => seq,
                None => self.db.report_cursor(project_id)?,
            };
            (start, self.db.events_after(project_id, start)?)
        };
        let window_end = events.last().map_or(window_start, |e| e.seq);

        let mut findings = Vec::with_capacity(events.len());
        let mut drifting_weight = 0.0f64;
        let mut total_weight = 0.0f64;

        for event in &events {
            let vector = self.fingerprints.embed(&event.diff_summary).await?;
            let finding = score_event(event, &plans, &fingerprints, &vector, &self.config);

            let weight = event_weight(event);
            total_weight += weight;
            if finding.aligned_plan_id.is_none() {
                drifting_weight += weight;
            }
            findings.push(finding);
        }

        let score = if total_weight > 0.0 {
            drifting_weight / total_weight
        } else {
            0.0
        };
        let severity = self.config.severity(score);

        let report = DriftReport {
            id: Uuid::new_v4(),
            project_id,
            window_start,
            window_end,
            score,
            severity,
            findings,
            created_at: Utc::now(),
        };

        {
            let _section = self.locks.acquire(project_id).await;
            if since_cursor.is_none() {
                // Another evaluation finishing first would have moved the
                // cursor; this window is stale, drop it unwritten.
                let current = self.db.report_cursor(project_id)?;
                if current != window_start {
                    return Err(Error::conflict(
                        project_id,
                        "report cursor advanced during evaluation",
                    ));
                }
            }
            // An override re-scores a past window; the watermark only moves
            // for evaluations continuing from the stored cursor.
            self.db.insert_report(&report, since_cursor.is_none())?;
        }

        tracing::info!(
            %project_id,
            events = report.findings.len(),
            score = report.score,
            severity = report.severity.as_str(),
            "Drift report emitted"
        );
        Ok(report)
    }
}

fn event_weight(event: &ActivityEvent) -> f64 {
    event.changed_paths.len().max(1) as f64
}

fn score_event(
    event: &ActivityEvent,
    plans: &[SacredPlan],
    fingerprints: &[Arc<Vec<f32>>],
    event_vector: &[f32],
    config: &DriftConfig,
) -> DriftFinding {
    let mut best: Option<(usize, f32)> = None;
    for (idx, fingerprint) in fingerprints.iter().enumerate() {
        let similarity = cosine_similarity(event_vector, fingerprint);
        if best.map_or(true, |(_, s)| similarity > s) {
            best = Some((idx, similarity));
        }
    }

    match best {
        Some((idx, similarity)) if similarity >= config.min_unexplained_ratio => DriftFinding {
            event_id: event.id,
            commit_id: event.commit_id.clone(),
            aligned_plan_id: Some(plans[idx].id.clone()),
            similarity,
            explanation: format!(
                "explained by \"{}\" (similarity {:.2})",
                plans[idx].title, similarity
            ),
        },
        Some((_, similarity)) => DriftFinding {
            event_id: event.id,
            commit_id: event.commit_id.clone(),
            aligned_plan_id: None,
            similarity,
            explanation: "no matching plan".to_string(),
        },
        None => DriftFinding {
            event_id: event.id,
            commit_id: event.commit_id.clone(),
            aligned_plan_id: None,
            similarity: 0.0,
            explanation: "no approved plans to match against".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_steps_are_monotonic() {
        let config = DriftConfig {
            min_unexplained_ratio: 0.3,
            low_threshold: 0.2,
            mid_threshold: 0.6,
            high_threshold: 0.85,
        };
        assert_eq!(config.severity(0.0), Severity::None);
        assert_eq!(config.severity(0.1), Severity::Low);
        assert_eq!(config.severity(0.2), Severity::Medium);
        assert_eq!(config.severity(0.5), Severity::Medium);
        assert_eq!(config.severity(0.6), Severity::High);
        assert_eq!(config.severity(0.85), Severity::Critical);
        assert_eq!(config.severity(1.0), Severity::Critical);
    }

    #[test]
    fn config_uses_recognized_option_names() {
        let config: DriftConfig = serde_json::from_str(
            r#"{"lowThreshold":0.2,"midThreshold":0.6,"highThreshold":0.85,"minUnexplainedRatio":0.4}"#,
        )
        .unwrap();
        assert_eq!(config.min_unexplained_ratio, 0.4);
        assert_eq!(config.high_threshold, 0.85);
    }
}
