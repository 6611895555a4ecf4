mod authority;
mod cli;
mod handlers;
mod services;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use authority::{AuthorityClient, HttpAuthorityClient};
use services::backoff::BackoffPolicy;
use services::checker::VerificationChecker;
use services::ledger::TelemetryLedger;
use services::scheduler::AttemptScheduler;
use services::sweeper::VerificationSweeper;
use veridom_db::repositories::attempt_repo::AttemptRepository;
use veridom_db::repositories::domain_repo::DomainRepository;
use veridom_db::repositories::telemetry_repo::TelemetryRepository;

#[derive(Parser)]
#[command(name = "veridom-panel", about = "Domain verification control plane")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run migrations, start the sweeper and serve the operational API
    Serve,
    /// Process all due verification attempts once and exit (cron mode)
    Sweep,
    /// Write a systemd unit for this binary
    InstallService,
}

#[derive(Clone)]
pub struct AppState {
    pub domains: DomainRepository,
    pub scheduler: Arc<AttemptScheduler>,
    pub ledger: Arc<TelemetryLedger>,
}

async fn build_state() -> Result<AppState> {
    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set in .env")?;
    let pool = veridom_db::connect(&database_url).await?;

    let domains = DomainRepository::new(pool.clone());
    let attempts = AttemptRepository::new(pool.clone());
    let events = TelemetryRepository::new(pool.clone());

    let ledger = Arc::new(TelemetryLedger::new(events, attempts.clone()));
    let authority: Arc<dyn AuthorityClient> = Arc::new(HttpAuthorityClient::from_env());
    let checker = VerificationChecker::new(authority);
    let scheduler = Arc::new(AttemptScheduler::new(
        domains.clone(),
        attempts,
        ledger.clone(),
        checker,
        BackoffPolicy::DEFAULT,
    ));

    Ok(AppState {
        domains,
        scheduler,
        ledger,
    })
}

async fn serve() -> Result<()> {
    let state = build_state().await?;

    let sweep_secs: u64 = env::var("SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);
    let sweeper = VerificationSweeper::new(
        state.scheduler.clone(),
        Duration::from_secs(sweep_secs.max(1)),
    );
    tokio::spawn(async move { sweeper.start().await });

    let addr = env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    let app = handlers::routes().with_state(state);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn sweep_once() -> Result<()> {
    let state = build_state().await?;
    let stats = state.scheduler.process_all_due().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Sweep => sweep_once().await,
        Command::InstallService => cli::install_service(),
    }
}
