//! `incidentflow-server`: HTTP front end for the incident analysis pipeline.

use anyhow::Context;
use incidentflow::artifacts::FsArtifactStore;
use incidentflow::config::ServerConfig;
use incidentflow::core::StageKind;
use incidentflow::events::ProgressBus;
use incidentflow::jobs::JobStore;
use incidentflow::observability::{init_tracing, LogFormat};
use incidentflow::pipeline::PipelineRunner;
use incidentflow::server::{router, AppState};
use incidentflow::service::JobService;
use incidentflow::stages::{CommandStage, RetryingStage, Stage};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    init_tracing(LogFormat::from_env());

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Failed to load configuration")?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.upload_dir.display()))?;
    tokio::fs::create_dir_all(&config.results_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.results_dir.display()))?;

    // --- Stages ---
    let stages = build_stages(&config)?;

    // --- Core ---
    let store = Arc::new(JobStore::new());
    let bus = Arc::new(ProgressBus::new(config.bus.clone()));
    let runner = PipelineRunner::new(stages, store, bus)?
        .with_artifacts(Arc::new(FsArtifactStore::new(&config.results_dir)));
    tracing::info!(stages = ?runner.stage_names(), "Pipeline ready");

    let service = JobService::new(Arc::new(runner))
        .with_default_voice(config.default_voice.clone())
        .with_upload_dir(config.upload_dir.clone());
    let state = Arc::new(AppState::new(service).with_keepalive(config.keepalive));

    // --- Start server ---
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    tracing::info!(%addr, "Starting server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn build_stages(config: &ServerConfig) -> anyhow::Result<Vec<Arc<dyn Stage>>> {
    let commands = [
        (StageKind::Perception, &config.perception_command),
        (StageKind::Deescalation, &config.deescalation_command),
        (StageKind::Report, &config.report_command),
    ];

    commands
        .into_iter()
        .map(|(kind, command)| {
            let stage: Arc<dyn Stage> = Arc::new(CommandStage::for_kind(kind, command)?);
            if config.retry.max_attempts > 1 {
                Ok(Arc::new(RetryingStage::new(stage, config.retry.clone())) as Arc<dyn Stage>)
            } else {
                Ok(stage)
            }
        })
        .collect()
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
