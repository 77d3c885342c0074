//! agency-hub: HTTP back end plus operator commands.

use agency_hub::auth::{self, Role};
use agency_hub::debrief::{self, DebriefSync, HeuristicExtractor, NoteExtractor};
use agency_hub::google::{DriveSource, GoogleAuth, GoogleDrive};
use agency_hub::{api, db, telemetry, AppConfig};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "agency-hub", version, about = "Agency operations back end")]
struct Cli {
    /// Path to config.toml (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Pull one batch of meeting notes from Drive
    Sync {
        /// Number of files to list (clamped to 1..=50)
        #[arg(short, long)]
        limit: Option<i64>,
    },
    /// Extract topics and tasks for one meeting note now
    Process {
        /// Meeting note id
        note_id: String,
    },
    /// Create a user and print a fresh session token
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        /// member, manager or admin
        #[arg(long, default_value = "member")]
        role: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let _log_guard = telemetry::init(&config.logging)?;

    let pool = db::connect(&config.database)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))?;
    let config = Arc::new(config);
    let extractor: Arc<dyn NoteExtractor> = Arc::new(HeuristicExtractor);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(pool, config, extractor).await,
        Command::Sync { limit } => sync_once(pool, &config, extractor, limit).await,
        Command::Process { note_id } => {
            let extraction =
                debrief::process_topics(&pool, extractor.as_ref(), &config.debrief, &note_id)
                    .await
                    .with_context(|| format!("processing note {note_id} failed"))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "note_id": note_id,
                    "topics": extraction.topics,
                    "tasks": extraction.tasks,
                }))?
            );
            Ok(())
        }
        Command::CreateUser { email, name, role } => {
            let role = Role::parse(&role)
                .with_context(|| format!("unknown role '{role}', expected member, manager or admin"))?;
            let user = auth::create_user(&pool, &email, &name, role).await?;
            let token = auth::create_session(
                &pool,
                &user.id,
                chrono::Duration::days(auth::DEFAULT_SESSION_TTL_DAYS),
            )
            .await?;
            tracing::info!(user_id = %user.id, email = %user.email, %role, "user created");
            println!("{token}");
            Ok(())
        }
    }
}

fn drive_source(config: &AppConfig) -> anyhow::Result<Arc<dyn DriveSource>> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("agency-hub/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;
    let auth = Arc::new(GoogleAuth::from_config(&config.google, client.clone()));
    if !auth.is_configured() {
        tracing::warn!("no Google credentials configured, debrief sync will fail");
    }
    Ok(Arc::new(GoogleDrive::new(
        client,
        auth,
        config.google.api_base.clone(),
    )))
}

async fn serve(
    pool: SqlitePool,
    config: Arc<AppConfig>,
    extractor: Arc<dyn NoteExtractor>,
) -> anyhow::Result<()> {
    let drive = drive_source(&config)?;
    let bind = config.server.bind;
    let state = Arc::new(api::ApiState::new(pool, config, drive, extractor));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let server = api::start_http_server(bind, state, shutdown_rx).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    server.await.context("HTTP server task panicked")?;
    Ok(())
}

/// Sync one batch and, when `auto_process` is on, process pending notes in
/// the foreground so the command exits only after the work is done.
async fn sync_once(
    pool: SqlitePool,
    config: &AppConfig,
    extractor: Arc<dyn NoteExtractor>,
    limit: Option<i64>,
) -> anyhow::Result<()> {
    let sync = DebriefSync::new(
        pool.clone(),
        drive_source(config)?,
        config.google.drive_folder_id.clone(),
        config.debrief.clone(),
    );
    let report = sync.sync_meeting_notes(limit).await?;
    println!("listed {} file(s), synced {} note(s)", report.listed, report.synced);

    if config.debrief.auto_process {
        debrief::store::requeue_stale_processing(
            &pool,
            chrono::Duration::minutes(config.debrief.stale_processing_minutes),
        )
        .await?;
        for note_id in debrief::store::pending_note_ids(&pool).await? {
            if let Err(error) =
                debrief::process_topics(&pool, extractor.as_ref(), &config.debrief, &note_id).await
            {
                tracing::warn!(%note_id, %error, "note processing failed");
            }
        }
    }
    Ok(())
}
