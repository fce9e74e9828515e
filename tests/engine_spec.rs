//! End-to-end engine tests: ingestion cycles, drift scoring and the query
//! façade, wired with a fixed-vocabulary embedder so similarities are
//! predictable.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use covenant::capabilities::{EmbeddingProvider, FingerprintCache, JsonlActivitySource};
use covenant::db::Database;
use covenant::drift::{DriftConfig, DriftDetector};
use covenant::error::{Error, Result};
use covenant::ingest::ActivityIngestor;
use covenant::locks::ProjectLocks;
use covenant::models::*;
use covenant::query::PlanQuery;
use uuid::Uuid;

/// Two-axis embedder: REST-ness and GraphQL-ness. Deterministic and
/// obvious, so drift arithmetic in these tests can be checked by hand.
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let t = text.to_lowercase();
        Ok(vec![
            if t.contains("rest") { 1.0 } else { 0.0 },
            if t.contains("graphql") { 1.0 } else { 0.0 },
        ])
    }
}

fn setup() -> (Database, ProjectLocks, Arc<FingerprintCache>) {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    let fingerprints = Arc::new(FingerprintCache::new(Arc::new(KeywordEmbedder)));
    (db, ProjectLocks::new(), fingerprints)
}

fn approved_plan(db: &Database, project: Uuid, title: &str, body: &str) -> SacredPlan {
    let plan = db
        .create_draft(
            project,
            CreatePlanInput {
                title: title.to_string(),
                body: body.to_string(),
                supersedes: None,
            },
        )
        .expect("Failed to create draft");
    db.request_approval(&plan.id).expect("Failed to request");
    db.approve_plan(&plan.id, &plan.content_hash, "tests")
        .expect("Failed to approve");
    db.get_plan(&plan.id).expect("Failed to re-read")
}

fn event(commit: &str, summary: &str, paths: usize) -> RawActivityEvent {
    RawActivityEvent {
        commit_id: commit.to_string(),
        timestamp: chrono::Utc::now(),
        changed_paths: (0..paths)
            .map(|i| ChangedPath {
                path: format!("src/file_{i}.rs"),
                kind: ChangeKind::Modified,
            })
            .collect(),
        diff_summary: summary.to_string(),
    }
}

fn write_feed(dir: &std::path::Path, name: &str, events: &[RawActivityEvent]) {
    let mut file = std::fs::File::create(dir.join(name)).expect("Failed to create feed");
    for event in events {
        writeln!(file, "{}", serde_json::to_string(event).expect("serialize")).expect("write");
    }
}

// ============================================================
// Ingestion
// ============================================================

#[tokio::test]
async fn ingest_cycle_persists_events_and_advances_cursor() {
    let (db, locks, _) = setup();
    let project = Uuid::new_v4();
    let dir = tempfile::tempdir().expect("tempdir");
    write_feed(
        dir.path(),
        "demo.jsonl",
        &[event("c1", "added REST handler", 1), event("c2", "docs", 1)],
    );

    let ingestor = ActivityIngestor::new(
        db.clone(),
        Arc::new(JsonlActivitySource::new(dir.path())),
        locks,
    );

    let count = ingestor.ingest(project, "demo").await.expect("Ingest failed");
    assert_eq!(count, 2);
    assert_eq!(
        db.ingest_cursor(project).expect("Cursor failed").as_deref(),
        Some("c2")
    );
}

#[tokio::test]
async fn duplicate_delivery_is_absorbed_and_cursor_never_regresses() {
    let (db, locks, _) = setup();
    let project = Uuid::new_v4();
    let dir = tempfile::tempdir().expect("tempdir");
    let feed = vec![event("c1", "added REST handler", 1), event("c2", "docs", 1)];
    write_feed(dir.path(), "demo.jsonl", &feed);

    let ingestor = ActivityIngestor::new(
        db.clone(),
        Arc::new(JsonlActivitySource::new(dir.path())),
        locks,
    );

    ingestor.ingest(project, "demo").await.expect("Ingest failed");

    // Same feed again: nothing new, cursor unchanged.
    let count = ingestor.ingest(project, "demo").await.expect("Ingest failed");
    assert_eq!(count, 0);
    assert_eq!(
        db.ingest_cursor(project).expect("Cursor failed").as_deref(),
        Some("c2")
    );

    // One more commit lands in the feed.
    let mut extended = feed;
    extended.push(event("c3", "added GraphQL resolver", 1));
    write_feed(dir.path(), "demo.jsonl", &extended);

    let count = ingestor.ingest(project, "demo").await.expect("Ingest failed");
    assert_eq!(count, 1);
    assert_eq!(db.events_after(project, 0).expect("Query failed").len(), 3);
}

#[tokio::test]
async fn unreachable_source_skips_the_cycle() {
    let (db, locks, _) = setup();
    let project = Uuid::new_v4();
    let dir = tempfile::tempdir().expect("tempdir");

    let ingestor = ActivityIngestor::new(
        db.clone(),
        Arc::new(JsonlActivitySource::new(dir.path())),
        locks,
    );

    let result = ingestor.ingest(project, "missing").await;
    assert!(matches!(result, Err(Error::SourceUnavailable(_))));
    assert!(db.ingest_cursor(project).expect("Cursor failed").is_none());
}

// ============================================================
// Drift evaluation
// ============================================================

#[tokio::test]
async fn one_drifting_event_out_of_two_scores_medium() {
    let (db, locks, fingerprints) = setup();
    let project = Uuid::new_v4();
    approved_plan(&db, project, "Use REST", "Use REST for all APIs");

    db.append_events(
        project,
        &[
            event("c1", "added GraphQL resolver", 1),
            event("c2", "added REST handler for /users", 1),
        ],
        "c2",
    )
    .expect("Append failed");

    let detector = DriftDetector::new(db.clone(), fingerprints, DriftConfig::default(), locks);
    let report = detector.evaluate(project, None).await.expect("Evaluate failed");

    assert_eq!(report.score, 0.5);
    assert_eq!(report.severity, Severity::Medium);
    assert_eq!(report.findings.len(), 2);

    let graphql = &report.findings[0];
    assert_eq!(graphql.commit_id, "c1");
    assert!(graphql.aligned_plan_id.is_none());
    assert_eq!(graphql.explanation, "no matching plan");

    let rest = &report.findings[1];
    assert!(rest.aligned_plan_id.is_some());
    assert!(rest.similarity >= DriftConfig::default().min_unexplained_ratio);
}

#[tokio::test]
async fn drift_weighs_events_by_changed_path_count() {
    let (db, locks, fingerprints) = setup();
    let project = Uuid::new_v4();
    approved_plan(&db, project, "Use REST", "Use REST for all APIs");

    // Drifting event touches 3 files, aligned event touches 1: 3/4.
    db.append_events(
        project,
        &[
            event("c1", "added GraphQL resolver", 3),
            event("c2", "added REST handler", 1),
        ],
        "c2",
    )
    .expect("Append failed");

    let detector = DriftDetector::new(db.clone(), fingerprints, DriftConfig::default(), locks);
    let report = detector.evaluate(project, None).await.expect("Evaluate failed");

    assert_eq!(report.score, 0.75);
    assert_eq!(report.severity, Severity::High);
}

#[tokio::test]
async fn evaluation_is_deterministic_for_identical_inputs() {
    let (db, locks, fingerprints) = setup();
    let project = Uuid::new_v4();
    approved_plan(&db, project, "Use REST", "Use REST for all APIs");

    db.append_events(
        project,
        &[
            event("c1", "added GraphQL resolver", 2),
            event("c2", "added REST handler", 1),
            event("c3", "refactored persistence", 4),
        ],
        "c3",
    )
    .expect("Append failed");

    let detector = DriftDetector::new(db.clone(), fingerprints, DriftConfig::default(), locks);
    let first = detector.evaluate(project, Some(0)).await.expect("Evaluate failed");
    let second = detector.evaluate(project, Some(0)).await.expect("Evaluate failed");

    assert_eq!(first.score.to_bits(), second.score.to_bits());
    assert_eq!(first.severity, second.severity);
    assert_eq!(first.window_end, second.window_end);
}

#[tokio::test]
async fn without_approved_plans_all_activity_is_drift() {
    let (db, locks, fingerprints) = setup();
    let project = Uuid::new_v4();

    db.append_events(project, &[event("c1", "anything at all", 1)], "c1")
        .expect("Append failed");

    let detector = DriftDetector::new(db.clone(), fingerprints, DriftConfig::default(), locks);
    let report = detector.evaluate(project, None).await.expect("Evaluate failed");

    assert_eq!(report.score, 1.0);
    assert_eq!(report.severity, Severity::Critical);
}

#[tokio::test]
async fn consecutive_evaluations_window_from_the_report_cursor() {
    let (db, locks, fingerprints) = setup();
    let project = Uuid::new_v4();
    approved_plan(&db, project, "Use REST", "Use REST for all APIs");

    db.append_events(project, &[event("c1", "added GraphQL resolver", 1)], "c1")
        .expect("Append failed");

    let detector = DriftDetector::new(db.clone(), fingerprints, DriftConfig::default(), locks);
    let first = detector.evaluate(project, None).await.expect("Evaluate failed");
    assert_eq!(first.score, 1.0);

    // No new events: the next cycle sees an empty window.
    let second = detector.evaluate(project, None).await.expect("Evaluate failed");
    assert_eq!(second.score, 0.0);
    assert_eq!(second.severity, Severity::None);
    assert_eq!(second.window_start, first.window_end);

    // Both cycles are history; neither overwrote the other.
    assert_eq!(db.list_reports(project).expect("Query failed").len(), 2);
}

#[tokio::test]
async fn rescoring_a_window_leaves_the_report_cursor_in_place() {
    let (db, locks, fingerprints) = setup();
    let project = Uuid::new_v4();
    approved_plan(&db, project, "Use REST", "Use REST for all APIs");

    db.append_events(project, &[event("c1", "added GraphQL resolver", 1)], "c1")
        .expect("Append failed");

    let detector = DriftDetector::new(db.clone(), fingerprints, DriftConfig::default(), locks);

    // A re-score past the latest event sees an empty window but must not
    // park the cursor beyond events the scheduled cycle has yet to score.
    let rescore = detector.evaluate(project, Some(9_999)).await.expect("Evaluate failed");
    assert_eq!(rescore.score, 0.0);
    assert_eq!(db.report_cursor(project).expect("Query failed"), 0);

    let scheduled = detector.evaluate(project, None).await.expect("Evaluate failed");
    assert_eq!(scheduled.score, 1.0);
    assert_eq!(scheduled.window_start, 0);

    // Re-scoring an already covered window afterwards keeps the watermark.
    let cursor = db.report_cursor(project).expect("Query failed");
    detector.evaluate(project, Some(0)).await.expect("Evaluate failed");
    assert_eq!(db.report_cursor(project).expect("Query failed"), cursor);
}

// ============================================================
// Query façade
// ============================================================

#[tokio::test]
async fn query_with_no_approved_plans_returns_empty() {
    let (db, _, fingerprints) = setup();
    let query = PlanQuery::new(db, fingerprints);

    let results = query
        .query_approved_plans(Uuid::new_v4(), "how do we do APIs?", 5)
        .await
        .expect("Query failed");
    assert!(results.is_empty());
}

#[tokio::test]
async fn query_ranks_by_similarity_and_respects_k() {
    let (db, _, fingerprints) = setup();
    let project = Uuid::new_v4();
    let rest = approved_plan(&db, project, "Use REST", "Use REST for all APIs");
    approved_plan(&db, project, "Use GraphQL", "GraphQL for the admin UI");

    let query = PlanQuery::new(db, fingerprints);
    let results = query
        .query_approved_plans(project, "how should REST endpoints look?", 1)
        .await
        .expect("Query failed");

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0.id, rest.id);
    assert!(results[0].1 > 0.9);
}

#[tokio::test]
async fn query_never_returns_another_projects_plans() {
    let (db, _, fingerprints) = setup();
    let project = Uuid::new_v4();
    approved_plan(&db, Uuid::new_v4(), "Use REST", "Use REST for all APIs");

    let query = PlanQuery::new(db, fingerprints);
    let results = query
        .query_approved_plans(project, "REST", 5)
        .await
        .expect("Query failed");
    assert!(results.is_empty());
}
