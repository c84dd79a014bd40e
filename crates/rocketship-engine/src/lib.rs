pub mod broker;
pub mod config;
pub mod conversion;
pub mod service;

pub mod proto {
    tonic::include_proto!("rocketship.engine");
}

pub use broker::LogBroker;
pub use config::EngineConfig;
pub use proto::engine_client::EngineClient;
pub use proto::engine_server::{Engine, EngineServer};
pub use service::{activity_context, EngineLogSink, EngineService};
