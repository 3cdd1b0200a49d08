// Command line for analyzing and exporting recorded crawl sessions.
//
// Crawling itself happens in an embedding host that supplies the browser
// transport; this binary works on the data those hosts persist.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use analysis::{
    export_analytics_csv, export_calls_csv, export_tech_csv, AnalysisRunner,
    ClassificationStore, JsonlClassificationStore, OpenAiClassifier,
};
use config::Config;
use crawler::{CaptureStore, JsonlCaptureStore, SessionId};
use retrieval::{Embedder, HostClassifier, OpenAiEmbeddings, RetrievalOrchestrator, VectorCache};

#[derive(Parser)]
#[command(name = "sitescope", about = "Classify a site's tech stack and analytics traffic")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify a recorded session's traffic
    Analyze {
        /// Session to analyze
        #[arg(long)]
        session: SessionId,
        /// How to select calls for the model
        #[arg(long, value_enum, default_value_t = Mode::Retrieval)]
        mode: Mode,
    },
    /// Write a session's results as CSV
    Export {
        #[arg(long)]
        session: SessionId,
        #[arg(long, value_enum)]
        kind: ExportKind,
        /// Output file path
        #[arg(long)]
        out: std::path::PathBuf,
    },
    /// List recorded sessions
    Sessions,
    /// Delete all recorded sessions and derived data
    Wipe,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Semantic retrieval first, classify the relevant subset
    Retrieval,
    /// Classify the entire capture set
    Full,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportKind {
    Tech,
    Analytics,
    Calls,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    let cli = Cli::parse();

    match cli.command {
        Command::Analyze { session, mode } => analyze(&config, session, mode).await,
        Command::Export { session, kind, out } => export(&config, session, kind, &out).await,
        Command::Sessions => sessions(&config).await,
        Command::Wipe => wipe(&config).await,
    }
}

async fn analyze(config: &Config, session: SessionId, mode: Mode) -> Result<()> {
    let api_key = config.require_api_key()?;
    let client = ai_client::OpenAiClient::new(api_key);

    let captures = JsonlCaptureStore::open(config.captures_dir())
        .await
        .context("Failed to open capture store")?;
    let recorded = captures.get_all(session).await?;
    if recorded.flat.is_empty() {
        bail!("no captured data for session {session}");
    }
    tracing::info!(
        session_id = %session,
        calls = recorded.flat.len(),
        pages = recorded.by_page.len(),
        "Loaded captures"
    );

    let calls = match mode {
        Mode::Full => recorded.flat,
        Mode::Retrieval => {
            let embedder = Embedder::new(
                OpenAiEmbeddings::new(client.clone()).with_model(&config.embedding_model),
                HostClassifier::default(),
            )
            .with_disk_cache(VectorCache::new(config.embedding_cache_dir()));
            let orchestrator = RetrievalOrchestrator::new(embedder, HostClassifier::default());

            orchestrator.index_session(session, &recorded.flat).await;
            let bundle = orchestrator.retrieve(session).await;
            if bundle.is_empty() {
                bail!("retrieval selected no relevant calls for session {session}");
            }
            bundle.union()
        }
    };

    let store = JsonlClassificationStore::open(config.classifications_dir()).await?;
    let runner = AnalysisRunner::new(
        OpenAiClassifier::new(client).with_model(&config.chat_model),
        store,
    );

    // Ctrl-C stops at the next batch boundary; finished batches stay stored.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Stop requested, finishing current batch");
            signal_cancel.cancel();
        }
    });

    let report = runner.run(session, &calls, cancel).await?;

    println!(
        "Analyzed {} calls in {} batches ({} completed, {} failed{})",
        calls.len(),
        report.batches_total,
        report.batches_completed,
        report.batches_failed,
        if report.cancelled { ", cancelled early" } else { "" },
    );
    println!(
        "Found {} technologies and {} analytics events",
        report.tech_count, report.analytics_count
    );
    Ok(())
}

async fn export(
    config: &Config,
    session: SessionId,
    kind: ExportKind,
    out: &std::path::Path,
) -> Result<()> {
    let csv_text = match kind {
        ExportKind::Tech | ExportKind::Analytics => {
            let store = JsonlClassificationStore::open(config.classifications_dir()).await?;
            let records = store.list(session).await?;
            match kind {
                ExportKind::Tech => export_tech_csv(&records.tech_stack),
                _ => export_analytics_csv(&records.analytics_events),
            }
        }
        ExportKind::Calls => {
            let captures = JsonlCaptureStore::open(config.captures_dir()).await?;
            let recorded = captures.get_all(session).await?;
            export_calls_csv(&recorded.flat)
        }
    };

    tokio::fs::write(out, csv_text)
        .await
        .with_context(|| format!("Failed to write {}", out.display()))?;
    println!("Wrote {}", out.display());
    Ok(())
}

async fn sessions(config: &Config) -> Result<()> {
    let captures = JsonlCaptureStore::open(config.captures_dir()).await?;
    let mut ids = captures.sessions().await?;
    ids.sort_by_key(|id| id.to_string());

    if ids.is_empty() {
        println!("No recorded sessions");
        return Ok(());
    }
    for id in ids {
        let recorded = captures.get_all(id).await?;
        println!("{id}  {} calls across {} pages", recorded.flat.len(), recorded.by_page.len());
    }
    Ok(())
}

async fn wipe(config: &Config) -> Result<()> {
    let captures = JsonlCaptureStore::open(config.captures_dir()).await?;
    captures.clear_all().await?;

    let classifications = JsonlClassificationStore::open(config.classifications_dir()).await?;
    classifications.clear_all().await?;

    println!("All session data wiped");
    Ok(())
}
