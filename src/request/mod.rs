//! Request handling on top of the generic server.
//!
//! The default pipeline decodes a frame, resolves its `Session` directive against
//! the [`SessionStore`](crate::session::SessionStore) and dispatches it to the
//! handler registered for its `Method` header.

pub use directive::SessionDirective;
pub use method::{MethodHandler, MethodRegistry};
pub use protocol_server::ProtocolServer;
pub use stages::{DecodeStage, DispatchStage, ResolvedRequest, SessionStage};

mod directive;
mod method;
mod protocol_server;
mod stages;
