//! Network Module Implementation
//!
//! Transport side of the framework: the per-connection stream wrapper, the
//! protocol aware frame reader, TLS acceptor construction and a small client.
//!
//! # Components
//!
//! - `Connection`: one accepted TCP or TLS stream with read/write deadlines
//! - `read_frame` / `FramedReceiver`: reads exactly one wire frame
//! - `load_tls_acceptor`: rustls server config from PEM files
//! - `Client`: request/response helper over plain TCP

pub use client::Client;
pub use connection::{AsyncStream, Connection};
pub use frame::{read_frame, FramedReceiver};
pub use tls::load_tls_acceptor;

mod client;
mod connection;
mod frame;
mod tls;
