use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use tracing::{info, warn};
use vm_api::create_app;
use vm_config::ServiceConfig;
use vm_logging::{init_subscriber, LogSettings};
use vm_orchestrator::db::{backup_database, create_pool, run_migrations};
use vm_orchestrator::{notify, OrchestratorSettings, VmOrchestrator};
use vm_provider::{SshExecutor, VirtualBox};

#[derive(Parser)]
#[command(name = "vm-api")]
#[command(about = "VM hosting orchestrator - HTTP service and maintenance commands")]
#[command(version)]
struct Cli {
    /// Path to a YAML service configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service (default)
    Serve,
    /// Insert the default rate plans if they are missing
    SeedPlans,
    /// Back up the database and apply pending migrations, then exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_subscriber(&LogSettings::from_env());
    let cli = Cli::parse();

    let config = ServiceConfig::load(cli.config.as_deref()).context("invalid configuration")?;
    info!(
        bind_addr = %config.server.bind_addr,
        db_path = %config.server.db_path.display(),
        host = %config.host.address,
        "configuration loaded"
    );

    let pool = open_database(&config).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Migrate => {
            info!("migrations complete");
            Ok(())
        }
        Commands::SeedPlans => {
            let orchestrator = build_orchestrator(&config, pool)?;
            let inserted = orchestrator.seed_default_plans().await?;
            info!(inserted, "rate plans seeded");
            Ok(())
        }
        Commands::Serve => serve(config, pool).await,
    }
}

/// Back up the database, open the pool and migrate it.
async fn open_database(config: &ServiceConfig) -> Result<SqlitePool> {
    let db_path = &config.server.db_path;

    // Backup before migrations
    if db_path.exists() {
        let backup_path = backup_database(db_path)?;
        info!(backup = %backup_path.display(), "database backed up");
    }

    let pool = create_pool(db_path).await?;
    info!("running database migrations");
    run_migrations(&pool).await?;
    Ok(pool)
}

fn build_orchestrator(config: &ServiceConfig, pool: SqlitePool) -> Result<VmOrchestrator> {
    let executor = SshExecutor::new(config.host.clone());
    if let Err(e) = executor.preflight() {
        warn!(error = %e, "remote executor preflight failed; hypervisor calls will fail");
    }
    let hypervisor = VirtualBox::new(Arc::new(executor), &config.host);
    let notifier = notify::from_settings(&config.notifications)?;

    Ok(VmOrchestrator::new(
        pool,
        hypervisor,
        notifier,
        OrchestratorSettings::from_config(config),
    ))
}

async fn serve(config: ServiceConfig, pool: SqlitePool) -> Result<()> {
    let orchestrator = build_orchestrator(&config, pool)?;
    let app = create_app(orchestrator);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.server.bind_addr))?;
    info!("Listening on http://{}", config.server.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
