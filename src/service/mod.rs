pub use app_error::{AppError, AppResult};
pub use config::{
    LimitsConfig, NetworkConfig, ServerConfig, SessionConfig, TlsConfig, MIN_HEADER_SIZE,
};
pub use pipeline::{
    BoxFuture, ChunkReceiver, ConnectionCloser, MessageReceiver, Payload, Pipeline, PipelineStage,
    ShutdownCloser,
};
pub use server::Server;
pub use shutdown::{Shutdown, ShutdownNotifier};
pub use tracing_config::{setup_local_tracing, setup_tracing};

mod app_error;
mod config;
mod pipeline;
mod server;
mod shutdown;
mod tracing_config;
