use std::sync::Arc;

use taskpool::admin::{AdminState, admin_routes};
use taskpool::config::EngineConfig;
use taskpool::processor::{ProcessorRegistry, SleepProcessor, TaskProcessor};
use taskpool::queue::MemoryQueue;
use taskpool::worker::{
    EnabledWorkerController, InterrupterListener, QueueWorkerFactory, Scheduler, WorkerController,
    WorkerDeps, interrupter_from_config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::from_env()?;
    let admin_port = config.admin_port()?;

    eprintln!("Taskpool v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Workers: {}", config.worker_count());
    eprintln!("   Admin: http://0.0.0.0:{}/api/ce", admin_port);

    // ── Engine ───────────────────────────────────────────────────────────
    let queue = MemoryQueue::new();
    let enabled = Arc::new(EnabledWorkerController::new(config.clone()));
    let controller = Arc::new(WorkerController::new(enabled.clone()));
    let interrupter = interrupter_from_config(&config, controller.clone())?;
    let sleep: Arc<dyn TaskProcessor> = Arc::new(SleepProcessor::new(interrupter.clone()));
    let registry = Arc::new(ProcessorRegistry::new(vec![sleep])?);

    let factory = Arc::new(QueueWorkerFactory::new(WorkerDeps {
        queue: queue.clone(),
        registry,
        controller,
        listeners: vec![Arc::new(InterrupterListener::new(interrupter))],
    }));
    let scheduler = Scheduler::new(config, factory);
    scheduler.start_scheduling();

    // Tasks still held by workers that no longer exist would never be peeked again.
    queue.reset_tasks_with_unknown_worker_uuids(&scheduler.worker_uuids());
    queue.cancel_worn_outs();

    // ── Admin server ─────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", admin_port)).await?;
    let app = admin_routes(AdminState {
        workers: enabled,
        queue: queue.clone(),
    });
    let server = tokio::spawn(async move {
        tracing::info!(port = admin_port, "Admin server started");
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Admin server failed: {}", e);
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested, letting running tasks finish");
            queue.set_stopping(true);
            scheduler.graceful_stop_scheduling();
        }
        _ = scheduler.fatal_error() => {
            scheduler.hard_stop_scheduling();
        }
    }

    server.abort();
    scheduler.wait().await?;
    Ok(())
}
