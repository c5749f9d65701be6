mod network;
mod protocol;
mod request;
mod service;
mod session;

pub use network::{read_frame, AsyncStream, Client, Connection, FramedReceiver};
pub use protocol::{
    Direction, Message, CONTENT_LENGTH, CONTENT_TYPE, ERROR_CONTENT_TYPE, METHOD, SESSION,
};
pub use request::{
    DecodeStage, DispatchStage, MethodHandler, MethodRegistry, ProtocolServer, ResolvedRequest,
    SessionDirective, SessionStage,
};
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, BoxFuture, ChunkReceiver,
    ConnectionCloser, LimitsConfig, MessageReceiver, NetworkConfig, Payload, Pipeline,
    PipelineStage, Server, ServerConfig, SessionConfig, Shutdown, ShutdownCloser,
    ShutdownNotifier, TlsConfig,
};
pub use session::{generate_token, Session, SessionData, SessionStore};
