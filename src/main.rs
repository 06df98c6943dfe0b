use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use task_mgmt::bridge::ProgressBridge;
use task_mgmt::config::ServiceConfig;
use task_mgmt::hub::{ProgressHub, hub_routes};
use task_mgmt::queue::{AmqpQueue, TaskQueue};
use task_mgmt::rpc::{TaskRequests, rpc_routes};
use task_mgmt::store::{Datastore, LibSqlDatastore};
use task_mgmt::tasks::TaskRegistry;
use task_mgmt::tasks::handlers::register_builtin;

#[tokio::main]
async fn main() -> task_mgmt::Result<()> {
    let config = ServiceConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("📋 Task service v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   RPC:      http://0.0.0.0:{}/rpc/TaskRequests.<Method>", config.port);
    eprintln!("   Progress: ws://0.0.0.0:{}/ws", config.port);
    eprintln!("   Queue:    {}", config.queue_name);

    // ── Database ─────────────────────────────────────────────────────────
    let store = open_store(&config.db_path).await?;
    info!(path = %config.db_path, "Datastore ready");

    // ── Task types ───────────────────────────────────────────────────────
    let mut registry = TaskRegistry::new();
    register_builtin(&mut registry);
    let registry = Arc::new(registry);
    info!(types = ?registry.list(), "Task types registered");

    let queue: Arc<dyn TaskQueue> = Arc::new(AmqpQueue::new(&config.amqp_url, &config.queue_name));
    let hub = ProgressHub::new();
    let cancel = CancellationToken::new();

    // ── Progress bridge ──────────────────────────────────────────────────
    let bridge = if config.bridge.redis_url.is_some() {
        let bridge = ProgressBridge::from_config(config.bridge.clone(), Arc::clone(&hub), cancel.clone())?;
        Some(tokio::spawn(async move {
            match bridge.run().await {
                Ok(()) => info!("Progress bridge exited"),
                Err(e) => error!(error = %e, "Progress bridge exited, restart the service to resume delivery"),
            }
        }))
    } else {
        info!("REDIS_URL not set, progress bridge disabled");
        None
    };

    // ── HTTP server ──────────────────────────────────────────────────────
    let app = rpc_routes(TaskRequests::new(store, registry, queue))
        .merge(hub_routes(hub))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "Task service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    if let Some(handle) = bridge {
        let _ = handle.await;
    }
    info!("Task service stopped");
    Ok(())
}

fn init_tracing(log_dir: Option<&str>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "task-mgmt.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

async fn open_store(db_path: &str) -> task_mgmt::Result<Arc<dyn Datastore>> {
    let store = if db_path == ":memory:" {
        LibSqlDatastore::new_memory().await?
    } else {
        LibSqlDatastore::new_local(Path::new(db_path)).await?
    };
    Ok(Arc::new(store))
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}
