use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use vram_dispatch::config::Config;
use vram_dispatch::cs::redis_store::RedisStore;
use vram_dispatch::http::{build_router, AppState};
use vram_dispatch::janitor;
use vram_dispatch::runtime::ollama::OllamaClient;
use vram_dispatch::task_store::TaskStore;
use vram_dispatch::telemetry::nvml::NvmlProbe;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    // Load .env file if present (silently ignored if missing)
    dotenvy::dotenv().ok();

    tracing::info!("vramd starting");

    let config = Arc::new(Config::from_env());

    let store: Arc<dyn vram_dispatch::cs::CoordinationStore> =
        Arc::new(RedisStore::connect(&config.cs_url).await?);
    let runtime: Arc<dyn vram_dispatch::runtime::ModelRuntimeClient> =
        Arc::new(OllamaClient::new(&config.runtime_url));
    let probe: Arc<dyn vram_dispatch::telemetry::GpuProbe> = Arc::new(
        NvmlProbe::init()
            .inspect_err(|e| tracing::error!("failed to initialize NVML: {e}"))?,
    );
    let tasks = Arc::new(TaskStore::new());
    let shutdown = CancellationToken::new();

    let janitor_store = store.clone();
    let janitor_runtime = runtime.clone();
    let janitor_cancel = shutdown.clone();
    let janitor_interval = config.janitor_interval;
    tokio::spawn(async move {
        janitor::run_loop(&*janitor_store, &*janitor_runtime, janitor_interval, &janitor_cancel).await;
    });

    let state = AppState {
        store,
        runtime,
        probe,
        config: config.clone(),
        tasks,
        shutdown: shutdown.clone(),
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.http_bind).await?;
    tracing::info!(bind = %config.http_bind, "vramd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("vramd shutting down");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
