use std::sync::Arc;
use std::time::Duration;

use spriteforge_comfyui::{ComfyUIBackend, GenerationBackend, WorkflowTemplates};
use spriteforge_server::{
    batch::BatchScheduler,
    command, publisher,
    config::ServerConfig,
    error::ServerError,
    executor::JobExecutor,
    state::ServerState,
    worker,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spriteforge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(
        command_addr = %config.command_addr,
        event_addr = %config.event_addr,
        comfyui_url = %config.comfyui_url,
        "starting spriteforge server"
    );

    let backend: Arc<dyn GenerationBackend> =
        Arc::new(ComfyUIBackend::new(config.comfyui_url.clone()));
    // Backend reachability is a startup requirement.
    if let Err(source) = backend.health_check().await {
        return Err(ServerError::BackendUnavailable {
            url: config.comfyui_url.clone(),
            source,
        });
    }
    tracing::info!("generation backend is reachable");

    let command_listener = TcpListener::bind(&config.command_addr).await?;
    let event_listener = TcpListener::bind(&config.event_addr).await?;

    let timeout = Duration::from_secs(config.request_timeout_secs);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let state = Arc::new(ServerState::new(config.clone()));
    let shutdown = CancellationToken::new();

    tokio::spawn(publisher::run_event_publisher(
        event_listener,
        Arc::clone(&state),
        shutdown.clone(),
    ));

    for _ in 0..config.max_concurrent_jobs.max(1) {
        let executor = JobExecutor::new(
            Arc::clone(&backend),
            WorkflowTemplates::new(config.workflow_dir.clone()),
            config.output_dir.clone(),
            timeout,
            poll_interval,
        );
        tokio::spawn(worker::run_worker(
            Arc::clone(&state),
            executor,
            shutdown.clone(),
        ));
    }

    // Handles stay reachable so batches can be submitted, cancelled,
    // and inspected while the loops run.
    let mut batch_schedulers = Vec::new();
    for _ in 0..config.max_concurrent_batches.max(1) {
        let scheduler = Arc::new(BatchScheduler::new(
            Arc::clone(&backend),
            WorkflowTemplates::new(config.workflow_dir.clone()),
            config.output_dir.clone(),
            timeout,
            poll_interval,
        ));
        batch_schedulers.push(Arc::clone(&scheduler));
        tokio::spawn(scheduler.run(shutdown.clone()));
    }

    let command_task = tokio::spawn(command::run_command_loop(
        command_listener,
        Arc::clone(&state),
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    shutdown.cancel();
    for scheduler in &batch_schedulers {
        let stats = scheduler.stats().await;
        tracing::info!(
            processed = stats.total_processed,
            failed = stats.total_failed,
            "batch scheduler drained"
        );
    }
    let _ = command_task.await;

    Ok(())
}
