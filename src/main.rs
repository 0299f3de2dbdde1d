use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod client;
mod config;
mod emitter;
mod engine;
mod error;
mod job;
mod models;
mod queue;
mod steps;
mod store;
mod summary;
mod validation;

use client::{poll_until_terminal, HttpStatusClient, PollOptions};
use config::Config;
use emitter::EmitterSettings;
use engine::{MeasurementEngine, SimulatedEngine};
use queue::{spawn_audit_worker, spawn_cleanup_worker, QueuedAudit};
use store::StatusStore;
use summary::SummaryClient;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<StatusStore>,
    pub engine: Arc<dyn MeasurementEngine>,
    pub queue_tx: mpsc::Sender<QueuedAudit>,
    pub summarizer: Option<SummaryClient>,
    pub emitter_settings: EmitterSettings,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("beacon_audit_api=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let mut args = std::env::args().skip(1);
    if let Some(command) = args.next() {
        return match command.as_str() {
            "poll" => {
                let job_id = args
                    .next()
                    .context("Usage: beacon-audit-api poll <job-id>")?;
                poll_command(&config, &job_id).await
            }
            other => Err(anyhow::anyhow!("Unknown command: {other}")),
        };
    }

    info!(bind_addr = %config.bind_addr, "Starting beacon-audit-api");

    let store = Arc::new(StatusStore::new(config.retention_seconds));
    let engine: Arc<dyn MeasurementEngine> = Arc::new(SimulatedEngine::new(
        Duration::from_millis(config.engine_latency_ms),
    ));
    let emitter_settings = config.emitter_settings();

    let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
    spawn_audit_worker(
        Arc::clone(&store),
        Arc::clone(&engine),
        emitter_settings.clone(),
        queue_rx,
    );
    spawn_cleanup_worker(Arc::clone(&store), Duration::from_secs(60));

    let summarizer = config.summary_api_key.clone().map(|api_key| {
        SummaryClient::new(
            config.summary_base_url.clone(),
            api_key,
            config.summary_model.clone(),
        )
    });
    if summarizer.is_none() {
        info!("No summary API key configured, summarization endpoint disabled");
    }

    let state = AppState {
        config: config.clone(),
        store,
        engine,
        queue_tx,
        summarizer,
        emitter_settings,
    };

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        );

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "Listening");
    axum::serve(listener, app).await.context("Server exited")?;
    Ok(())
}

/// Follows a running audit from the terminal until it reaches a terminal
/// record, printing the reconciled view.
async fn poll_command(config: &Config, job_id: &str) -> Result<()> {
    let base_url = std::env::var("BEACON_API_URL")
        .unwrap_or_else(|_| format!("http://{}", config.bind_addr));
    let client = HttpStatusClient::new(base_url);
    let view = poll_until_terminal(&client, job_id, &PollOptions::default()).await?;

    if let Some(error) = &view.error {
        println!("{job_id}: failed: {error}");
        return Ok(());
    }
    println!("{job_id}: {}% {}", view.progress, view.message);
    if let Some(scores) = view.scores {
        println!(
            "scores: performance {} accessibility {} best-practices {} seo {}",
            scores.performance, scores.accessibility, scores.best_practices, scores.seo
        );
    }
    for row in &view.run_rows {
        println!(
            "run {}: fcp {:?} lcp {:?} tbt {:?}",
            row.run, row.fcp, row.lcp, row.tbt
        );
    }
    Ok(())
}
