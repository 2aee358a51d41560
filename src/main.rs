//! # Intel Monitor: Binary Entrypoint
//! One admin CLI over the whole system. `serve` boots the scheduler and the
//! Axum read API; the remaining subcommands are one-shot operations against
//! the same file store and need no running server.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use intel_monitor::config::Settings;
use intel_monitor::oracle::build_oracle;
use intel_monitor::pipeline::{
    self, briefing, personnel, policy, tech, university, ProcessorContext,
};
use intel_monitor::scheduler::Monitor;

#[derive(Parser)]
#[command(name = "intel-monitor", about = "Information monitoring pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and the read API (default).
    Serve,
    /// Crawl one source and print the result.
    RunSingle {
        #[arg(long)]
        source: String,
    },
    /// Crawl every enabled source, optionally one dimension.
    RunAll {
        #[arg(long)]
        dimension: Option<String>,
    },
    /// Run the full daily pipeline once.
    RunPipeline,
    /// Policy processing (rules tier).
    ProcessPolicy {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
    },
    /// Personnel change extraction.
    ProcessPersonnel {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
    },
    /// University ecosystem classification.
    ProcessUniversity {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
    },
    /// Tech-frontier topic binning.
    ProcessTech {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
    },
    /// Daily briefing composition.
    ProcessBriefing,
    /// Regenerate data/index.json.
    GenerateIndex,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn print_summary(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

async fn serve(settings: Settings) -> Result<()> {
    let prometheus = PrometheusBuilder::new().install_recorder().ok();
    if prometheus.is_none() {
        error!("metrics recorder install failed; /metrics disabled");
    }

    let monitor = Arc::new(Monitor::new(settings)?);
    Arc::clone(&monitor).start().await?;

    let addr = monitor.settings.api_addr.clone();
    let router = intel_monitor::api::create_router(Arc::clone(&monitor), prometheus);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "read API listening");

    let shutdown_monitor = Arc::clone(&monitor);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_monitor.stop().await;
        })
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = Settings::global().clone();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings).await?,

        Command::RunSingle { source } => {
            let monitor = Monitor::new(settings)?;
            let result = monitor.run_single(&source).await?;
            print_summary(&serde_json::to_value(&result)?);
            monitor.ctx.browser.shutdown().await;
        }

        Command::RunAll { dimension } => {
            let monitor = Arc::new(Monitor::new(settings)?);
            let (ok, failed) = Arc::clone(&monitor).run_all(dimension.as_deref()).await;
            print_summary(&serde_json::json!({"ok": ok, "failed": failed}));
            monitor.ctx.browser.shutdown().await;
        }

        Command::RunPipeline => {
            let monitor = Arc::new(Monitor::new(settings)?);
            let result = pipeline::run_daily_pipeline(&monitor).await;
            print_summary(&serde_json::to_value(&result)?);
            monitor.ctx.browser.shutdown().await;
        }

        Command::ProcessPolicy { dry_run, force } => {
            let monitor = Monitor::new(settings)?;
            let ctx = ProcessorContext::from_monitor(&monitor);
            print_summary(&policy::process(&ctx, dry_run, force)?);
        }

        Command::ProcessPersonnel { dry_run, force } => {
            let monitor = Monitor::new(settings)?;
            let ctx = ProcessorContext::from_monitor(&monitor);
            print_summary(&personnel::process(&ctx, dry_run, force)?);
        }

        Command::ProcessUniversity { dry_run, force } => {
            let monitor = Monitor::new(settings)?;
            let ctx = ProcessorContext::from_monitor(&monitor);
            print_summary(&university::process(&ctx, dry_run, force)?);
        }

        Command::ProcessTech { dry_run, force } => {
            let monitor = Monitor::new(settings)?;
            let ctx = ProcessorContext::from_monitor(&monitor);
            print_summary(&tech::process(&ctx, dry_run, force)?);
        }

        Command::ProcessBriefing => {
            let monitor = Monitor::new(settings)?;
            let ctx = ProcessorContext::from_monitor(&monitor);
            let oracle = build_oracle(&monitor.settings);
            print_summary(&briefing::process(&ctx, Some(&oracle)).await?);
        }

        Command::GenerateIndex => {
            let monitor = Monitor::new(settings)?;
            let index = pipeline::index::generate_index(&monitor)?;
            print_summary(&serde_json::json!({
                "total_sources": index["total_sources"],
                "total_articles": index["total_articles"],
            }));
        }
    }

    Ok(())
}
