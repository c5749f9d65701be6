// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::{self, Duration};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::network::{load_tls_acceptor, Connection};
use crate::AppError;
use crate::AppResult;

use super::pipeline::{
    ChunkReceiver, ConnectionCloser, MessageReceiver, Pipeline, PipelineStage, ShutdownCloser,
};
use super::{ServerConfig, Shutdown, ShutdownNotifier};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Everything a connection task needs, shared by all of them once serving starts.
struct ConnectionService {
    config: Arc<ServerConfig>,
    tls: Option<TlsAcceptor>,
    receiver: Arc<dyn MessageReceiver>,
    closer: Arc<dyn ConnectionCloser>,
    pipeline: Pipeline,
}

// handler for each connection
struct ConnectionHandler {
    connection: Connection,
    service: Arc<ConnectionService>,
    shutdown: Shutdown,
}

impl ConnectionHandler {
    /// Receive, run the pipeline, and with keep-alive repeat until the peer closes.
    async fn handle_connection(&mut self) -> AppResult<()> {
        let service = self.service.clone();
        loop {
            let maybe_message = tokio::select! {
                res = service.receiver.receive(&mut self.connection) => res?,
                _ = self.shutdown.recv() => {
                    debug!("connection handler exit read loop after recv shutdown signal");
                    return Ok(());
                }
            };

            let message = match maybe_message {
                Some(message) => message,
                // client close the connection gracefully
                None => break,
            };

            service.pipeline.run(&mut self.connection, message).await?;

            if !service.config.network.keep_alive {
                break;
            }
        }
        Ok(())
    }

    /// Runs the connection to completion, then always hands it to the closer, also
    /// when a stage panicked.
    async fn run(mut self) {
        let connection_id = self.connection.connection_id;
        match AssertUnwindSafe(self.handle_connection())
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => debug!("connection {} finished", connection_id),
            Ok(Err(err)) if err.is_framing() => {
                warn!("connection {} dropped: {}", connection_id, err)
            }
            Ok(Err(err)) => error!("Connection {} error: {:?}", connection_id, err),
            Err(payload) => {
                if let Some(message) = payload.downcast_ref::<&'static str>() {
                    error!("connection {} stage panicked: {}", connection_id, message);
                } else if let Some(message) = payload.downcast_ref::<String>() {
                    error!("connection {} stage panicked: {}", connection_id, message);
                } else {
                    error!("connection {} stage panicked", connection_id);
                }
            }
        }
        let closer = self.service.closer.clone();
        if let Err(err) = closer.close(&mut self.connection).await {
            debug!("connection {} close failed: {}", connection_id, err);
        }
    }
}

/// TCP (optionally TLS) server that runs a [`Pipeline`] over every connection.
///
/// Each accepted connection is served by its own task. Stages, receiver and closer
/// are configured before [`Server::serve_forever`] and fixed afterwards.
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    tls: Option<TlsAcceptor>,
    receiver: Arc<dyn MessageReceiver>,
    closer: Arc<dyn ConnectionCloser>,
    pipeline: Pipeline,
    notify_shutdown: ShutdownNotifier,
}

impl Server {
    /// Binds `network.ip:network.port` and loads the TLS material if configured.
    pub async fn bind(config: Arc<ServerConfig>) -> AppResult<Server> {
        let listen_address = config.network.listen_address();
        let listener = TcpListener::bind(&listen_address).await.map_err(|err| {
            let error_msg = format!(
                "Failed to bind server to address: {} - Error: {}",
                listen_address, err
            );
            error!("{}", error_msg);
            AppError::IllegalState(error_msg)
        })?;
        let tls = config.tls.as_ref().map(load_tls_acceptor).transpose()?;
        info!(
            "tcp server binding to {} for listening{}",
            listener.local_addr()?,
            if tls.is_some() { " with tls" } else { "" }
        );

        Ok(Server {
            listener,
            receiver: Arc::new(ChunkReceiver::new(config.network.conn_read_buffer_size)),
            closer: Arc::new(ShutdownCloser),
            config,
            tls,
            pipeline: Pipeline::new(),
            notify_shutdown: ShutdownNotifier::new(),
        })
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    pub fn set_receiver(&mut self, receiver: Arc<dyn MessageReceiver>) {
        self.receiver = receiver;
    }

    pub fn set_closer(&mut self, closer: Arc<dyn ConnectionCloser>) {
        self.closer = closer;
    }

    pub fn add_stage(&mut self, stage: Arc<dyn PipelineStage>) {
        self.pipeline.add_stage(stage);
    }

    pub fn remove_stage(&mut self, name: &str) -> bool {
        self.pipeline.remove_stage(name)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Background tasks subscribe here to learn when serving stops.
    pub fn shutdown_notifier(&self) -> &ShutdownNotifier {
        &self.notify_shutdown
    }

    /// Accepts connections until `shutdown_signal` completes or accepting fails for
    /// good, then broadcasts shutdown to every subscriber.
    pub async fn serve_forever(self, shutdown_signal: impl Future<Output = ()>) -> AppResult<()> {
        let Server {
            listener,
            config,
            tls,
            receiver,
            closer,
            pipeline,
            notify_shutdown,
        } = self;
        debug!("serving with pipeline {:?}", pipeline);
        let limit_connections = match config.network.max_connection {
            0 => None,
            max => Some(Arc::new(Semaphore::new(max))),
        };
        let service = Arc::new(ConnectionService {
            config,
            tls,
            receiver,
            closer,
            pipeline,
        });

        let result = tokio::select! {
            res = run(&listener, service, limit_connections, &notify_shutdown) => {
                if let Err(err) = &res {
                    error!(cause = %err, "failed to accept");
                }
                res
            }
            _ = shutdown_signal => {
                info!("get shutdown signal");
                Ok(())
            }
        };

        notify_shutdown.notify();
        result
    }
}

/// Accept loop. Every connection is assigned a unique id and served by its own task;
/// a failing connection only ends its own task.
#[tracing::instrument(skip_all)]
async fn run(
    listener: &TcpListener,
    service: Arc<ConnectionService>,
    limit_connections: Option<Arc<Semaphore>>,
    notify_shutdown: &ShutdownNotifier,
) -> AppResult<()> {
    loop {
        let permit = match &limit_connections {
            Some(limit) => Some(
                limit
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| AppError::IllegalState(format!("connection limiter: {}", e)))?,
            ),
            None => None,
        };

        let (socket, peer_addr) = accept(listener).await?;
        let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        info!("Received Connection {} from {}", connection_id, peer_addr);

        let service = service.clone();
        let shutdown = notify_shutdown.subscribe();
        tokio::spawn(async move {
            let network = &service.config.network;
            let connection = match &service.tls {
                Some(acceptor) => match acceptor.accept(socket).await {
                    Ok(stream) => Connection::new(connection_id, peer_addr, stream, network),
                    Err(err) => {
                        warn!(
                            "tls handshake with {} failed for connection {}: {}",
                            peer_addr, connection_id, err
                        );
                        drop(permit);
                        return;
                    }
                },
                None => Connection::new(connection_id, peer_addr, socket, network),
            };
            let handler = ConnectionHandler {
                connection,
                service,
                shutdown,
            };
            handler.run().await;
            // whether gracefully or unexpectedly closed, release connection
            drop(permit);
        });
    }
}

/// Retries failing accepts with exponential backoff, giving up after 64 seconds.
async fn accept(listener: &TcpListener) -> AppResult<(TcpStream, SocketAddr)> {
    let mut backoff = 1;

    loop {
        match listener.accept().await {
            Ok(accepted) => return Ok(accepted),
            Err(err) => {
                if backoff > 64 {
                    return Err(AppError::DetailedIoError(format!(
                        "accept tcp server error: {}",
                        err
                    )));
                }
                warn!("accept failed, retrying in {}s: {}", backoff, err);
            }
        }

        time::sleep(Duration::from_secs(backoff)).await;
        backoff *= 2;
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        debug!("connection handler dropped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::service::{BoxFuture, NetworkConfig, Payload};

    /// Writes the raw payload back, upper-cased.
    struct Shout;

    impl PipelineStage for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        fn process<'a>(
            &'a self,
            connection: &'a mut Connection,
            input: Payload,
        ) -> BoxFuture<'a, AppResult<Payload>> {
            Box::pin(async move {
                match input {
                    Payload::Raw(bytes) => {
                        let loud = bytes.to_ascii_uppercase();
                        connection.write_all(&loud).await?;
                        Ok(Payload::Raw(Bytes::from(loud)))
                    }
                    other => Err(other.unexpected("shout")),
                }
            })
        }
    }

    fn loopback_config() -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
            network: NetworkConfig {
                port: 0,
                ..NetworkConfig::default()
            },
            ..ServerConfig::default()
        })
    }

    #[tokio::test]
    async fn test_default_receiver_runs_pipeline_once() {
        let mut server = Server::bind(loopback_config()).await.unwrap();
        server.add_stage(Arc::new(Shout));
        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve_forever(async {
            let _ = stop_rx.await;
        }));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let mut reply = Vec::new();
        // one request per connection, the server closes afterwards
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"HELLO");

        stop_tx.send(()).unwrap();
        serving.await.unwrap().unwrap();
    }

    struct Explode;

    impl PipelineStage for Explode {
        fn name(&self) -> &str {
            "explode"
        }

        fn process<'a>(
            &'a self,
            _connection: &'a mut Connection,
            input: Payload,
        ) -> BoxFuture<'a, AppResult<Payload>> {
            Box::pin(async move {
                if let Payload::Raw(_) = input {
                    panic!("stage panicked");
                }
                Err(input.unexpected("explode"))
            })
        }
    }

    /// Records that it ran, then shuts the connection down.
    #[derive(Default)]
    struct FlagCloser {
        closed: AtomicBool,
    }

    impl ConnectionCloser for FlagCloser {
        fn close<'a>(&'a self, connection: &'a mut Connection) -> BoxFuture<'a, AppResult<()>> {
            Box::pin(async move {
                self.closed.store(true, Ordering::SeqCst);
                connection.shutdown().await
            })
        }
    }

    #[tokio::test]
    async fn test_closer_runs_after_stage_panic() {
        let mut server = Server::bind(loopback_config()).await.unwrap();
        let closer = Arc::new(FlagCloser::default());
        server.set_closer(closer.clone());
        server.add_stage(Arc::new(Explode));
        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve_forever(async {
            let _ = stop_rx.await;
        }));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let mut reply = Vec::new();
        let _ = client.read_to_end(&mut reply).await;
        assert!(reply.is_empty());
        assert!(closer.closed.load(Ordering::SeqCst));

        // the accept loop survives the panicking connection
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"again").await.unwrap();
        let _ = client.read_to_end(&mut reply).await;

        stop_tx.send(()).unwrap();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_remove_stage_by_name() {
        let mut server = Server::bind(loopback_config()).await.unwrap();
        server.add_stage(Arc::new(Shout));
        assert_eq!(server.pipeline().stage_names(), vec!["shout"]);
        assert!(server.remove_stage("shout"));
        assert!(server.pipeline().is_empty());
    }
}
