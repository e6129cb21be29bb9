//! # Facturio — recurring billing & collection reminders
//!
//! Usage:
//!   facturio serve                      # Start the HTTP gateway
//!   facturio run                        # Execute one daily run now
//!   facturio run --date 2025-02-01      # Run as of a specific day

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use facturio_core::config::FacturioConfig;
use facturio_engine::{
    BillingCycleGenerator, DailyRunner, DispatchWorker, ReminderOrchestrator, RunSettings,
};
use facturio_gateway::AppState;
use facturio_mailer::{SmtpMailer, TextDocumentRenderer};
use facturio_store::BillingDb;

#[derive(Parser)]
#[command(
    name = "facturio",
    version,
    about = "📄 Facturio — recurring invoices & collection reminders"
)]
struct Cli {
    /// Config file path (default: ~/.facturio/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway
    Serve,
    /// Execute one daily run and print the summary
    Run {
        /// Run as of this date instead of today (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug,hyper=info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => FacturioConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => FacturioConfig::load().context("loading config")?,
    };

    let db_path = config.store.resolved_db_path();
    let db = Arc::new(BillingDb::open(&db_path).context("opening billing database")?);
    tracing::info!("🗄️ Billing database: {}", db_path.display());

    let transport = Arc::new(SmtpMailer::new(&config.smtp).context("SMTP configuration")?);
    let worker = Arc::new(DispatchWorker::new(
        db.clone(),
        db.clone(),
        db.clone(),
        transport,
        Arc::new(TextDocumentRenderer),
        config.dispatch.max_send_attempts,
        Duration::from_secs(config.dispatch.send_timeout_secs),
    ));
    let generator = Arc::new(BillingCycleGenerator::new(
        db.clone(),
        db.clone(),
        Some(worker.clone()),
        config.billing.due_days as i64,
        &config.billing.invoice_prefix,
    ));
    let orchestrator = Arc::new(ReminderOrchestrator::new(db.clone(), db.clone(), db.clone()));
    let runner = Arc::new(DailyRunner::new(
        db.clone(),
        db.clone(),
        generator.clone(),
        orchestrator.clone(),
        worker.clone(),
    ));

    match cli.command {
        Command::Serve => {
            if config.gateway.trigger_secret.is_empty() {
                tracing::warn!("⚠️ gateway.trigger_secret is empty — endpoints are unprotected");
            }
            let state = AppState {
                config,
                runner,
                generator,
                orchestrator,
                worker,
                start_time: std::time::Instant::now(),
            };
            facturio_gateway::start(state).await?;
        }
        Command::Run { date } => {
            let today = date.unwrap_or_else(|| Utc::now().date_naive());
            let settings = RunSettings::from_config(&config)?;
            let summary = runner.run(today, &settings).await?;

            if summary.skipped {
                println!("📅 {today} is a non-working day — run skipped.");
                return Ok(());
            }
            println!("✅ Daily run for {today} done in {:.2}s", summary.duration_seconds);
            println!("   Invoices generated:   {}", summary.generated);
            println!("   Already generated:    {}", summary.already_generated);
            println!("   Reminders sent:       {}", summary.sent);
            println!("   Awaiting validation:  {}", summary.pending_manual);
            println!("   Failures:             {}", summary.failed);
            for failure in &summary.failures {
                println!("   ❌ {} {}: {}", failure.entity, failure.id, failure.error);
            }
        }
    }

    Ok(())
}
