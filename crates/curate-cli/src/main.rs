use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use curate_core::{BulkAction, JobAction, JobId, ProductId};
use curate_sync::{
    BulkOutcome, ConsoleConfig, ConsoleContext, ConsoleState, CurationConsole, RefreshOutcome,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "curate-cli")]
#[command(about = "Curation console command-line interface")]
struct Cli {
    /// YAML settings file; CURATE_* environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serve data from a JSON fixture instead of the curation API.
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the JSON web surface.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Fetch one snapshot and print it.
    Refresh,
    /// Apply an action (approve, reject, send_to_pim, delete) to products.
    Bulk {
        action: BulkAction,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Keep the console running and print notifications until interrupted.
    Watch {
        #[arg(long)]
        auto_refresh: bool,
    },
    /// Start or cancel a background job.
    Job { id: String, action: JobAction },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "curate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_console(cli: &Cli, config: ConsoleConfig) -> Result<CurationConsole> {
    let context = match &cli.fixture {
        Some(path) => ConsoleContext::fixture(path, config)?,
        None => ConsoleContext::http(config)?,
    };
    Ok(CurationConsole::new(context))
}

fn print_summary(state: &ConsoleState) {
    println!(
        "products={} total={} pending={} processing={} curated={} rejected={} sent_to_pim={}",
        state.products.len(),
        state.total_count,
        state.counts.pending,
        state.counts.processing,
        state.counts.curated,
        state.counts.rejected,
        state.counts.sent_to_pim,
    );
    println!(
        "completion={:.1}% rejection={:.1}%{} active_jobs={}",
        state.stats.completion_rate * 100.0,
        state.stats.rejection_rate * 100.0,
        if state.stats.high_rejection { " (high)" } else { "" },
        state.has_active_jobs,
    );
}

fn ensure_refreshed(outcome: RefreshOutcome) -> Result<()> {
    match outcome {
        RefreshOutcome::Failed(err) => Err(err).context("initial refresh failed"),
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = ConsoleConfig::load(cli.config.as_deref())?;

    match cli.command.as_ref().unwrap_or(&Commands::Refresh) {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.web_port);
            let console = Arc::new(build_console(&cli, config)?);
            if let RefreshOutcome::Failed(err) = console.init().await {
                tracing::warn!(error = %err, "starting with an empty snapshot");
            }
            curate_web::serve(curate_web::AppState::new(console), port).await?;
        }
        Commands::Refresh => {
            let console = build_console(&cli, config)?;
            ensure_refreshed(console.manual_refresh().await)?;
            let state = console.state().await;
            print_summary(&state);
            println!("{}", serde_json::to_string_pretty(&state).context("serializing state")?);
        }
        Commands::Bulk { action, ids } => {
            let console = build_console(&cli, config)?;
            ensure_refreshed(console.manual_refresh().await)?;
            for id in ids {
                console
                    .select_product(&ProductId::new(id.as_str()), true)
                    .await
                    .with_context(|| format!("selecting {id}"))?;
            }
            let result = console.run_bulk_action(*action).await?;
            println!("{}", result.summary());
            for (id, reason) in &result.failed {
                println!("  {id}: {reason}");
            }
            if result.outcome() == BulkOutcome::Failed {
                bail!("{} failed for every product", action);
            }
        }
        Commands::Watch { auto_refresh } => {
            let console = build_console(&cli, config)?;
            let mut notifications = console.subscribe();
            ensure_refreshed(console.init().await)?;
            if *auto_refresh && !console.state().await.refresh.auto_refresh_enabled {
                console.toggle_auto_refresh().await;
            }
            print_summary(&console.state().await);
            loop {
                tokio::select! {
                    received = notifications.recv() => match received {
                        Ok(note) => {
                            println!("[{:?}] {}", note.level, note.message);
                            print_summary(&console.state().await);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "notifications dropped");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            console.teardown();
        }
        Commands::Job { id, action } => {
            let console = build_console(&cli, config)?;
            let job = console.job_action(&JobId::new(id.as_str()), *action).await?;
            println!(
                "job {} is {} ({}/{} processed)",
                job.id,
                job.status.as_str(),
                job.processed_count,
                job.total_count
            );
        }
    }

    Ok(())
}
