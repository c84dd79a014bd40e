// Engine process configuration - environment-variable driven, with typed
// defaults, the way `RunnerConfig::from_env` and `everruns_api::main` read
// their config (spec.md S6 "Environment variables").

use std::env;

pub struct EngineConfig {
    pub listen_addr: String,
    pub database_url: Option<String>,
    pub run_dir: std::path::PathBuf,
    pub log_ring_size: usize,
    pub subscriber_queue: usize,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            listen_addr: env::var("ENGINE_HOST").unwrap_or_else(|_| "127.0.0.1:7700".to_string()),
            database_url: env::var("DATABASE_URL").ok(),
            run_dir: env::var("ROCKETSHIP_RUN_DIR")
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("rocketship-runs")),
            log_ring_size: env::var("ROCKETSHIP_LOG_RING_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            subscriber_queue: env::var("ROCKETSHIP_SUBSCRIBER_QUEUE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1_024),
        }
    }
}

pub fn tracing_env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_env("ROCKETSHIP_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| "rocketship=info,tower_http=info".into())
}
