mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{Connection, ErrorCode};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::hash;
use crate::models::*;

/// SQLite-backed storage for plans, approval records, activity events and
/// drift reports.
///
/// All per-project logs live in one database so that approval (record
/// insert + status flip) and ingestion (event batch + cursor advance) can
/// each be a single transaction.
///
/// Status transitions (`request_approval`, `reject`, `supersede`,
/// `approve_plan`) serialize through conditional updates: each flips a row
/// only from its expected current status and reports `Conflict` when the
/// row was already moved, so racing callers get exactly one winner without
/// any lock above this layer. The approval verifier and the drift/ingest
/// loops additionally take per-project exclusive sections, but only to
/// keep their own multi-step read/score/write sequences coherent.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> anyhow::Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "covenant")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        let db_path = dirs.data_dir().join("covenant.db");
        Self::open(db_path)
    }

    pub fn open_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // Plan operations
    // ============================================================

    /// Draft a new plan. Idempotent per (project, content hash): drafting
    /// the same text twice returns the existing draft instead of minting a
    /// duplicate.
    pub fn create_draft(&self, project_id: Uuid, input: CreatePlanInput) -> Result<SacredPlan> {
        if input.title.trim().is_empty() {
            return Err(Error::Validation("plan title must not be empty".into()));
        }
        if input.body.trim().is_empty() {
            return Err(Error::Validation("plan body must not be empty".into()));
        }

        let content_hash = hash::content_hash(project_id, &input.title, &input.body);

        if let Some(existing) = self.find_draft_by_hash(project_id, &content_hash)? {
            tracing::debug!(plan_id = %existing.id, "Draft already exists for content hash");
            return Ok(existing);
        }

        let conn = self.conn.lock().expect("database lock poisoned");
        let now = Utc::now();
        let id = hash::plan_id(&content_hash, now);

        let insert = conn.execute(
            "INSERT INTO plans (id, project_id, title, body, status, content_hash, supersedes, created_at)
             VALUES (?, ?, ?, ?, 'draft', ?, ?, ?)",
            (
                &id,
                project_id.to_string(),
                &input.title,
                &input.body,
                &content_hash,
                &input.supersedes,
                now.to_rfc3339(),
            ),
        );
        if let Err(e) = insert {
            // Raced with an identical draft; the unique draft index kept
            // one. Resolve to it.
            if is_constraint_violation(&e) {
                drop(conn);
                if let Some(existing) = self.find_draft_by_hash(project_id, &content_hash)? {
                    return Ok(existing);
                }
            }
            return Err(e.into());
        }

        Ok(SacredPlan {
            id,
            project_id,
            title: input.title,
            body: input.body,
            status: PlanStatus::Draft,
            content_hash,
            supersedes: input.supersedes,
            superseded_by: None,
            created_at: now,
            approved_at: None,
        })
    }

    fn find_draft_by_hash(
        &self,
        project_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<SacredPlan>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans
             WHERE project_id = ? AND content_hash = ? AND status = 'draft'"
        ))?;

        let mut rows = stmt.query((project_id.to_string(), content_hash))?;
        match rows.next()? {
            Some(row) => Ok(Some(plan_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn get_plan(&self, plan_id: &str) -> Result<SacredPlan> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt =
            conn.prepare(&format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?"))?;

        let mut rows = stmt.query([plan_id])?;
        match rows.next()? {
            Some(row) => Ok(plan_from_row(row)?),
            None => Err(Error::not_found("plan", plan_id)),
        }
    }

    /// Move a draft to `pending_approval`, making it visible to the
    /// approval verifier.
    pub fn request_approval(&self, plan_id: &str) -> Result<SacredPlan> {
        let plan = self.get_plan(plan_id)?;
        if plan.status != PlanStatus::Draft {
            return Err(Error::invalid_state(plan_id, "draft", plan.status.as_str()));
        }

        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE plans SET status = 'pending_approval' WHERE id = ? AND status = 'draft'",
            [plan_id],
        )?;
        drop(conn);

        if rows == 0 {
            // Lost a race with another transition on the same plan.
            return Err(Error::conflict(plan_id, "plan left draft state concurrently"));
        }

        tracing::info!(plan_id, "Plan submitted for approval");
        self.get_plan(plan_id)
    }

    /// Terminally reject a plan awaiting approval.
    pub fn reject(&self, plan_id: &str) -> Result<SacredPlan> {
        let plan = self.get_plan(plan_id)?;
        if plan.status != PlanStatus::PendingApproval {
            return Err(Error::invalid_state(
                plan_id,
                "pending_approval",
                plan.status.as_str(),
            ));
        }

        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE plans SET status = 'rejected' WHERE id = ? AND status = 'pending_approval'",
            [plan_id],
        )?;
        drop(conn);

        if rows == 0 {
            return Err(Error::conflict(plan_id, "plan state changed concurrently"));
        }

        tracing::info!(plan_id, "Plan rejected");
        self.get_plan(plan_id)
    }

    /// Approved plans for a project, approval timestamp ascending.
    /// With `include_history`, superseded and rejected plans are included
    /// (rejected ones sort last, having no approval timestamp).
    pub fn list_approved(&self, project_id: Uuid, include_history: bool) -> Result<Vec<SacredPlan>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let sql = if include_history {
            format!(
                "SELECT {PLAN_COLUMNS} FROM plans
                 WHERE project_id = ? AND status IN ('approved', 'superseded', 'rejected')
                 ORDER BY approved_at IS NULL, approved_at, created_at"
            )
        } else {
            format!(
                "SELECT {PLAN_COLUMNS} FROM plans
                 WHERE project_id = ? AND status = 'approved'
                 ORDER BY approved_at"
            )
        };
        let mut stmt = conn.prepare(&sql)?;

        let plans = stmt
            .query_map([project_id.to_string()], plan_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(plans)
    }

    /// Mark an approved plan as taken over by a newer approved plan.
    ///
    /// Idempotent when already superseded by the same plan; conflicting
    /// when superseded by a different one. Only status and `superseded_by`
    /// change — body and content hash are untouched.
    pub fn supersede(&self, old_plan_id: &str, new_plan_id: &str) -> Result<SacredPlan> {
        let old = self.get_plan(old_plan_id)?;
        let new = self.get_plan(new_plan_id)?;

        if old.project_id != new.project_id {
            return Err(Error::invalid_state(
                old_plan_id,
                &format!("same project as {}", new_plan_id),
                &format!("project {}", old.project_id),
            ));
        }
        if new.status != PlanStatus::Approved {
            return Err(Error::invalid_state(
                new_plan_id,
                "approved",
                new.status.as_str(),
            ));
        }

        match (old.status, old.superseded_by.as_deref()) {
            (PlanStatus::Superseded, Some(by)) if by == new_plan_id => return Ok(old),
            (PlanStatus::Superseded, _) => {
                return Err(Error::conflict(
                    old_plan_id,
                    "already superseded by a different plan",
                ));
            }
            (PlanStatus::Approved, _) => {}
            (status, _) => {
                return Err(Error::invalid_state(old_plan_id, "approved", status.as_str()));
            }
        }

        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE plans SET status = 'superseded', superseded_by = ?
             WHERE id = ? AND status = 'approved'",
            (new_plan_id, old_plan_id),
        )?;
        drop(conn);

        if rows == 0 {
            return Err(Error::conflict(old_plan_id, "plan state changed concurrently"));
        }

        tracing::info!(old_plan_id, new_plan_id, "Plan superseded");
        self.get_plan(old_plan_id)
    }

    // ============================================================
    // Approval record operations
    // ============================================================

    /// Atomically write the approval record and flip the plan to
    /// `approved`. Factor checks happen in the verifier before this is
    /// called; this method owns only the exclusive-write guarantee.
    ///
    /// The approval_records primary key makes a second record for the same
    /// plan impossible; the conditional UPDATE makes the status flip lose
    /// cleanly if another transition slipped in. Either way the loser sees
    /// `Conflict`, never a duplicate record.
    pub fn approve_plan(
        &self,
        plan_id: &str,
        submitted_hash: &str,
        verifier: &str,
    ) -> Result<ApprovalRecord> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        let now = Utc::now();

        let insert = tx.execute(
            "INSERT INTO approval_records (plan_id, submitted_hash, verifier, verified_at)
             VALUES (?, ?, ?, ?)",
            (plan_id, submitted_hash, verifier, now.to_rfc3339()),
        );
        if let Err(e) = insert {
            if is_constraint_violation(&e) {
                return Err(Error::conflict(plan_id, "approval record already exists"));
            }
            return Err(e.into());
        }

        let rows = tx.execute(
            "UPDATE plans SET status = 'approved', approved_at = ?
             WHERE id = ? AND status = 'pending_approval'",
            (now.to_rfc3339(), plan_id),
        )?;
        if rows == 0 {
            // Transaction drops uncommitted: no record is left behind.
            return Err(Error::conflict(plan_id, "plan is no longer pending approval"));
        }

        tx.commit()?;

        Ok(ApprovalRecord {
            plan_id: plan_id.to_string(),
            submitted_hash: submitted_hash.to_string(),
            verifier: verifier.to_string(),
            verified_at: now,
        })
    }

    pub fn get_approval_record(&self, plan_id: &str) -> Result<Option<ApprovalRecord>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT plan_id, submitted_hash, verifier, verified_at
             FROM approval_records WHERE plan_id = ?",
        )?;

        let mut rows = stmt.query([plan_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(ApprovalRecord {
                plan_id: row.get(0)?,
                submitted_hash: row.get(1)?,
                verifier: row.get(2)?,
                verified_at: parse_datetime(row.get::<_, String>(3)?),
            }))
        } else {
            Ok(None)
        }
    }

    // ============================================================
    // Activity event operations
    // ============================================================

    pub fn ingest_cursor(&self, project_id: Uuid) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt =
            conn.prepare("SELECT commit_id FROM ingest_cursors WHERE project_id = ?")?;
        let mut rows = stmt.query([project_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Store a normalized event batch and advance the ingest cursor, all in
    /// one transaction. Duplicate (project, commit) pairs are ignored, so
    /// re-polling after a crash is harmless and the cursor never moves
    /// until the whole batch is durable. Returns the number of events that
    /// were actually new.
    pub fn append_events(
        &self,
        project_id: Uuid,
        events: &[RawActivityEvent],
        cursor: &str,
    ) -> Result<usize> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;

        let mut inserted = 0;
        for event in events {
            let changed_paths = serde_json::to_string(&event.changed_paths)?;
            inserted += tx.execute(
                "INSERT OR IGNORE INTO activity_events
                 (id, project_id, commit_id, timestamp, changed_paths, diff_summary)
                 VALUES (?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    project_id.to_string(),
                    &event.commit_id,
                    event.timestamp.to_rfc3339(),
                    &changed_paths,
                    &event.diff_summary,
                ),
            )?;
        }

        tx.execute(
            "INSERT INTO ingest_cursors (project_id, commit_id, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(project_id) DO UPDATE SET commit_id = excluded.commit_id,
                                                   updated_at = excluded.updated_at",
            (project_id.to_string(), cursor, Utc::now().to_rfc3339()),
        )?;

        tx.commit()?;
        Ok(inserted)
    }

    /// Events with seq strictly greater than `after_seq`, in log order.
    pub fn events_after(&self, project_id: Uuid, after_seq: i64) -> Result<Vec<ActivityEvent>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT seq, id, project_id, commit_id, timestamp, changed_paths, diff_summary
             FROM activity_events WHERE project_id = ? AND seq > ? ORDER BY seq",
        )?;

        let events = stmt
            .query_map((project_id.to_string(), after_seq), |row| {
                let changed_paths: String = row.get(5)?;
                Ok(ActivityEvent {
                    seq: row.get(0)?,
                    id: parse_uuid(row.get::<_, String>(1)?),
                    project_id: parse_uuid(row.get::<_, String>(2)?),
                    commit_id: row.get(3)?,
                    timestamp: parse_datetime(row.get::<_, String>(4)?),
                    changed_paths: serde_json::from_str(&changed_paths).unwrap_or_default(),
                    diff_summary: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }

    // ============================================================
    // Drift report operations
    // ============================================================

    /// Last event seq covered by a drift report for this project.
    pub fn report_cursor(&self, project_id: Uuid) -> Result<i64> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare("SELECT seq FROM report_cursors WHERE project_id = ?")?;
        let mut rows = stmt.query([project_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    /// Persist a finished report, advancing the report cursor to the window
    /// end in the same transaction when `advance_cursor` is set. Re-scoring
    /// a past window passes `false` so the watermark keeps tracking the
    /// scheduled evaluations only. Nothing is written for a cancelled
    /// evaluation because this is only called with a fully scored report.
    pub fn insert_report(&self, report: &DriftReport, advance_cursor: bool) -> Result<()> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO drift_reports
             (id, project_id, window_start, window_end, score, severity, findings, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            (
                report.id.to_string(),
                report.project_id.to_string(),
                report.window_start,
                report.window_end,
                report.score,
                report.severity.as_str(),
                serde_json::to_string(&report.findings)?,
                report.created_at.to_rfc3339(),
            ),
        )?;

        if advance_cursor {
            tx.execute(
                "INSERT INTO report_cursors (project_id, seq, updated_at)
                 VALUES (?, ?, ?)
                 ON CONFLICT(project_id) DO UPDATE SET seq = excluded.seq,
                                                       updated_at = excluded.updated_at",
                (
                    report.project_id.to_string(),
                    report.window_end,
                    Utc::now().to_rfc3339(),
                ),
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn list_reports(&self, project_id: Uuid) -> Result<Vec<DriftReport>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, project_id, window_start, window_end, score, severity, findings, created_at
             FROM drift_reports WHERE project_id = ? ORDER BY created_at",
        )?;

        let reports = stmt
            .query_map([project_id.to_string()], |row| {
                let findings: String = row.get(6)?;
                Ok(DriftReport {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    project_id: parse_uuid(row.get::<_, String>(1)?),
                    window_start: row.get(2)?,
                    window_end: row.get(3)?,
                    score: row.get(4)?,
                    severity: Severity::from_str(&row.get::<_, String>(5)?)
                        .unwrap_or(Severity::None),
                    findings: serde_json::from_str(&findings).unwrap_or_default(),
                    created_at: parse_datetime(row.get::<_, String>(7)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(reports)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

const PLAN_COLUMNS: &str =
    "id, project_id, title, body, status, content_hash, supersedes, superseded_by, created_at, approved_at";

fn plan_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SacredPlan> {
    Ok(SacredPlan {
        id: row.get(0)?,
        project_id: parse_uuid(row.get::<_, String>(1)?),
        title: row.get(2)?,
        body: row.get(3)?,
        status: PlanStatus::from_str(&row.get::<_, String>(4)?).unwrap_or(PlanStatus::Draft),
        content_hash: row.get(5)?,
        supersedes: row.get(6)?,
        superseded_by: row.get(7)?,
        created_at: parse_datetime(row.get::<_, String>(8)?),
        approved_at: row.get::<_, Option<String>>(9)?.map(parse_datetime),
    })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
