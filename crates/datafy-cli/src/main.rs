use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datafy_store::{connect, migrate, MemorySnapshotStore, PgAccountStore, PgSnapshotStore};
use datafy_sync::{parse_user_ids, SnapshotConfig, SnapshotPipeline};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "datafy-cli")]
#[command(about = "Listening snapshot ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Take one snapshot now.
    Snapshot {
        /// Comma-separated user ids; defaults to TRACKED_USERS_IDS.
        #[arg(long)]
        users: Option<String>,
        /// Fetch and normalize, but write to an in-memory store. Refreshed
        /// tokens are still persisted.
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply database migrations.
    Migrate,
    /// Serve the cron trigger endpoint.
    Serve,
    /// Run snapshots on SNAPSHOT_CRON until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Snapshot {
        users: None,
        dry_run: false,
    }) {
        Commands::Snapshot { users, dry_run } => snapshot(users, dry_run).await?,
        Commands::Migrate => {
            let config = SnapshotConfig::from_env();
            let pool = connect(&config.database_url)
                .await
                .context("connecting to database")?;
            migrate(&pool).await.context("running migrations")?;
            info!("migrations applied");
        }
        Commands::Serve => datafy_web::serve_from_env().await?,
        Commands::Schedule => schedule().await?,
    }

    Ok(())
}

async fn snapshot(users: Option<String>, dry_run: bool) -> Result<()> {
    let config = SnapshotConfig::from_env();
    let user_ids = users
        .as_deref()
        .map(parse_user_ids)
        .unwrap_or_else(|| config.tracked_user_ids.clone());

    let pool = connect(&config.database_url)
        .await
        .context("connecting to database")?;
    let accounts = Arc::new(PgAccountStore::new(pool.clone()));
    let pipeline = if dry_run {
        SnapshotPipeline::from_config(config, accounts, Arc::new(MemorySnapshotStore::default()))?
    } else {
        SnapshotPipeline::from_config(config, accounts, Arc::new(PgSnapshotStore::new(pool)))?
    };

    let summary = pipeline.snapshot_users(&user_ids).await?;
    println!(
        "snapshot complete: run_id={} users={}/{} tracks={} artists={} dry_run={}",
        summary.run_id,
        summary.snapshotted_users.len(),
        summary.requested_users,
        summary.counts.tracks,
        summary.counts.artists,
        dry_run
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn schedule() -> Result<()> {
    let pipeline = Arc::new(datafy_sync::pipeline_from_env().await?);
    let Some(mut sched) = pipeline.maybe_build_scheduler().await? else {
        anyhow::bail!("scheduler disabled; set DATAFY_SCHEDULER_ENABLED=true");
    };

    sched.start().await.context("starting scheduler")?;
    info!(cron = %pipeline.config().snapshot_cron, "scheduler running");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
