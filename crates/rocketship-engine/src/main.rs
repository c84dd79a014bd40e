// Engine process entry point - gRPC server wiring, mirroring
// everruns_api::main's shape (init tracing, connect store, build runner,
// assemble state, serve) with axum swapped for tonic per the spec's gRPC
// surface.

use std::sync::Arc;

use anyhow::{Context, Result};
use rocketship_engine::{activity_context, EngineConfig, EngineService, LogBroker};
use rocketship_storage::{Database, MemoryStore, RunStore};
use rocketship_worker::{create_runner, RunnerConfig, RunnerMode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(rocketship_engine::config::tracing_env_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("rocketship-engine starting");

    let config = EngineConfig::from_env();
    std::fs::create_dir_all(&config.run_dir).context("creating run dir")?;

    let store: Arc<dyn RunStore> = match &config.database_url {
        Some(url) => {
            let db = Database::from_url(url)
                .await
                .context("failed to connect to database")?;
            db.migrate().await.context("failed to run migrations")?;
            tracing::info!("connected to postgres store");
            Arc::new(db)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory run store");
            Arc::new(MemoryStore::new())
        }
    };

    let broker = Arc::new(LogBroker::new(config.log_ring_size, config.subscriber_queue));

    let plugins = Arc::new(rocketship_plugins::builtin_registry(config.run_dir.clone()));
    let log_sink = Arc::new(rocketship_engine::EngineLogSink {
        store: store.clone(),
        broker: broker.clone(),
    });

    let runner_config = RunnerConfig::from_env();
    tracing::info!(mode = ?runner_config.mode, "runner mode configured");
    let runner = create_runner(
        &runner_config,
        plugins.clone(),
        log_sink,
        config.run_dir.clone(),
        store.clone(),
    );
    match runner_config.mode {
        RunnerMode::InProcess => tracing::info!("using in-process suite runner (default)"),
        #[cfg(feature = "temporal")]
        RunnerMode::Temporal => tracing::info!("using temporal-backed suite runner"),
    }

    let service = EngineService {
        store,
        runner,
        broker,
        known_plugins: rocketship_plugins::PLUGIN_TYPES,
    };

    let addr = config.listen_addr.parse().context("invalid ENGINE_HOST")?;
    tracing::info!(%addr, "listening");

    tonic::transport::Server::builder()
        .add_service(rocketship_engine::EngineServer::new(service))
        .serve(addr)
        .await
        .context("gRPC server error")?;

    Ok(())
}
