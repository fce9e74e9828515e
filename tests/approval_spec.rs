//! Approval verifier integration tests: both factors, their error kinds,
//! and the exactly-one-record guarantee under concurrency.

use std::sync::Arc;

use covenant::approval::ApprovalVerifier;
use covenant::db::Database;
use covenant::error::Error;
use covenant::locks::ProjectLocks;
use covenant::models::*;
use uuid::Uuid;

const SECRET: &[u8] = b"orbital-launch-key";

fn setup() -> (Arc<ApprovalVerifier>, Database, SacredPlan) {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");

    let plan = db
        .create_draft(
            Uuid::new_v4(),
            CreatePlanInput {
                title: "Use REST".to_string(),
                body: "All public APIs are REST.".to_string(),
                supersedes: None,
            },
        )
        .expect("Failed to create draft");
    db.request_approval(&plan.id).expect("Failed to request");

    let verifier = Arc::new(ApprovalVerifier::new(
        db.clone(),
        PossessionSecret::new(SECRET.to_vec()),
        ProjectLocks::new(),
    ));
    (verifier, db, plan)
}

#[tokio::test]
async fn both_factors_valid_approves_the_plan() {
    let (verifier, db, plan) = setup();

    let record = verifier
        .approve(&plan.id, SECRET, &plan.content_hash, "alice")
        .await
        .expect("Approval failed");

    assert_eq!(record.plan_id, plan.id);
    assert_eq!(record.submitted_hash, plan.content_hash);

    let approved = db.get_plan(&plan.id).expect("Read failed");
    assert_eq!(approved.status, PlanStatus::Approved);
    assert!(approved.approved_at.is_some());
}

#[tokio::test]
async fn wrong_possession_token_fails_authentication() {
    let (verifier, db, plan) = setup();

    let result = verifier
        .approve(&plan.id, b"wrong-key", &plan.content_hash, "alice")
        .await;

    assert!(matches!(result, Err(Error::Authentication)));
    let plan = db.get_plan(&plan.id).expect("Read failed");
    assert_eq!(plan.status, PlanStatus::PendingApproval);
}

#[tokio::test]
async fn wrong_hash_fails_integrity_even_with_valid_token() {
    let (verifier, db, plan) = setup();

    let result = verifier
        .approve(&plan.id, SECRET, "0000000000000000", "alice")
        .await;

    assert!(matches!(result, Err(Error::Integrity { .. })));
    assert!(db
        .get_approval_record(&plan.id)
        .expect("Query failed")
        .is_none());
}

#[tokio::test]
async fn draft_plan_is_not_approvable() {
    let (verifier, db, _) = setup();
    let draft = db
        .create_draft(
            Uuid::new_v4(),
            CreatePlanInput {
                title: "Not requested yet".to_string(),
                body: "Still a draft.".to_string(),
                supersedes: None,
            },
        )
        .expect("Failed to create draft");

    let result = verifier
        .approve(&draft.id, SECRET, &draft.content_hash, "alice")
        .await;

    assert!(matches!(result, Err(Error::InvalidState { .. })));
}

#[tokio::test]
async fn unknown_plan_is_not_found() {
    let (verifier, _, _) = setup();
    let result = verifier.approve("no-such-plan", SECRET, "hash", "alice").await;
    assert!(matches!(result, Err(Error::NotFound { .. })));
}

#[tokio::test]
async fn concurrent_approvals_produce_exactly_one_record() {
    let (verifier, db, plan) = setup();

    let mut handles = Vec::new();
    for i in 0..8 {
        let verifier = verifier.clone();
        let plan_id = plan.id.clone();
        let hash = plan.content_hash.clone();
        handles.push(tokio::spawn(async move {
            verifier
                .approve(&plan_id, SECRET, &hash, &format!("approver-{i}"))
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.expect("Task panicked") {
            Ok(_) => successes += 1,
            Err(Error::Conflict { .. }) | Err(Error::InvalidState { .. }) => {}
            Err(other) => panic!("Unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 1);
    assert!(db
        .get_approval_record(&plan.id)
        .expect("Query failed")
        .is_some());
    assert_eq!(
        db.get_plan(&plan.id).expect("Read failed").status,
        PlanStatus::Approved
    );
}
