use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use covenant::approval::ApprovalVerifier;
use covenant::capabilities::{FingerprintCache, JsonlActivitySource, TokenHashEmbedder};
use covenant::db::Database;
use covenant::drift::{DriftConfig, DriftDetector};
use covenant::ingest::ActivityIngestor;
use covenant::locks::ProjectLocks;
use covenant::models::{CreatePlanInput, PossessionSecret};
use covenant::query::PlanQuery;

#[derive(Parser)]
#[command(name = "covenant")]
#[command(about = "Architectural intent tracking and drift detection")]
struct Cli {
    /// Database path (defaults to the platform data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage sacred plans
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Run one ingestion cycle for a project
    Ingest {
        #[arg(long)]
        project: Uuid,
        /// Feed name under the feed root (git tooling export)
        #[arg(long)]
        repo: String,
        /// Directory containing activity feed files
        #[arg(long, default_value = ".")]
        feed_root: PathBuf,
    },
    /// Evaluate drift for a project and emit a report
    Evaluate {
        #[arg(long)]
        project: Uuid,
        /// Re-score from this event cursor instead of the stored one
        #[arg(long)]
        since: Option<i64>,
        /// Drift configuration as JSON ({"lowThreshold": .., ..})
        #[arg(long)]
        config: Option<String>,
    },
    /// Semantic search over approved plans
    Query {
        #[arg(long)]
        project: Uuid,
        text: String,
        #[arg(short, default_value = "5")]
        k: usize,
    },
    /// List drift reports for a project
    Reports {
        #[arg(long)]
        project: Uuid,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Draft a new plan
    Create {
        #[arg(long)]
        project: Uuid,
        #[arg(long)]
        title: String,
        /// Plan body, or a path when --from-file is set
        body: String,
        #[arg(long)]
        from_file: bool,
        /// Plan this draft replaces
        #[arg(long)]
        supersedes: Option<String>,
    },
    /// Submit a draft for approval
    Request { id: String },
    /// Approve a pending plan (two-factor)
    Approve {
        id: String,
        /// Possession token; must match the configured approval secret
        #[arg(long)]
        token: String,
        /// Content hash of the body you reviewed
        #[arg(long)]
        hash: String,
        /// Identity recorded in the approval record
        #[arg(long, default_value = "cli")]
        verifier: String,
    },
    /// Terminally reject a pending plan
    Reject { id: String },
    /// Mark an approved plan as taken over by a newer one
    Supersede { old: String, new: String },
    /// List approved plans for a project
    List {
        #[arg(long)]
        project: Uuid,
        /// Include superseded and rejected plans
        #[arg(long)]
        history: bool,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "covenant=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let db = match &cli.db {
        Some(path) => Database::open(path.clone())?,
        None => Database::open_default()?,
    };
    db.migrate()?;

    let locks = ProjectLocks::new();
    let fingerprints = Arc::new(FingerprintCache::new(Arc::new(TokenHashEmbedder::default())));

    match cli.command {
        Commands::Plan { command } => run_plan(command, db, locks).await?,
        Commands::Ingest {
            project,
            repo,
            feed_root,
        } => {
            let source = Arc::new(JsonlActivitySource::new(feed_root));
            let ingestor = ActivityIngestor::new(db, source, locks);
            let count = ingestor.ingest(project, &repo).await?;
            println!("{} new events", count);
        }
        Commands::Evaluate {
            project,
            since,
            config,
        } => {
            let config = match config {
                Some(json) => serde_json::from_str::<DriftConfig>(&json)?,
                None => DriftConfig::default(),
            };
            let detector = DriftDetector::new(db, fingerprints, config, locks);
            let report = detector.evaluate(project, since).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Query { project, text, k } => {
            let query = PlanQuery::new(db, fingerprints);
            for (plan, score) in query.query_approved_plans(project, &text, k).await? {
                println!("{:.3}  {}  {}", score, plan.id, plan.title);
            }
        }
        Commands::Reports { project } => {
            for report in db.list_reports(project)? {
                println!(
                    "{}  window ({}, {}]  score {:.3}  {}",
                    report.created_at.to_rfc3339(),
                    report.window_start,
                    report.window_end,
                    report.score,
                    report.severity.as_str()
                );
            }
        }
    }

    Ok(())
}

async fn run_plan(command: PlanCommands, db: Database, locks: ProjectLocks) -> anyhow::Result<()> {
    match command {
        PlanCommands::Create {
            project,
            title,
            body,
            from_file,
            supersedes,
        } => {
            let body = if from_file {
                std::fs::read_to_string(&body)?
            } else {
                body
            };
            let plan = db.create_draft(
                project,
                CreatePlanInput {
                    title,
                    body,
                    supersedes,
                },
            )?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        PlanCommands::Request { id } => {
            let plan = db.request_approval(&id)?;
            println!("{} is now {}", plan.id, plan.status.as_str());
        }
        PlanCommands::Approve {
            id,
            token,
            hash,
            verifier,
        } => {
            // Process-wide secret supplied at startup; the token is what
            // the caller presents against it.
            let secret = std::env::var("COVENANT_APPROVAL_SECRET")
                .map_err(|_| anyhow::anyhow!("COVENANT_APPROVAL_SECRET is not set"))?;
            let approver =
                ApprovalVerifier::new(db, PossessionSecret::new(secret.into_bytes()), locks);
            let record = approver
                .approve(&id, token.as_bytes(), &hash, &verifier)
                .await?;
            println!("approved at {}", record.verified_at.to_rfc3339());
        }
        PlanCommands::Reject { id } => {
            let plan = db.reject(&id)?;
            println!("{} is now {}", plan.id, plan.status.as_str());
        }
        PlanCommands::Supersede { old, new } => {
            let plan = db.supersede(&old, &new)?;
            println!("{} superseded by {}", plan.id, new);
        }
        PlanCommands::List { project, history } => {
            for plan in db.list_approved(project, history)? {
                println!("{}  [{}]  {}", plan.id, plan.status.as_str(), plan.title);
            }
        }
    }

    Ok(())
}
