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
use std::sync::Arc;

use tracing::{debug, info};

use crate::network::FramedReceiver;
use crate::protocol::Message;
use crate::request::{DecodeStage, DispatchStage, MethodHandler, MethodRegistry, SessionStage};
use crate::service::{PipelineStage, Server, ServerConfig, ShutdownNotifier};
use crate::session::{Session, SessionStore};
use crate::AppResult;

/// [`Server`] preconfigured for the request/response protocol.
///
/// The pipeline is `decode -> session -> dispatch` behind a [`FramedReceiver`]. The
/// session store is swept in the background while serving, and the sweep stops
/// together with the server.
pub struct ProtocolServer {
    server: Server,
    sessions: Arc<SessionStore>,
    methods: Arc<MethodRegistry>,
}

impl ProtocolServer {
    pub async fn bind(config: ServerConfig) -> AppResult<ProtocolServer> {
        config.validate()?;
        let sessions = Arc::new(SessionStore::new(&config.session)?);
        let methods = Arc::new(MethodRegistry::new());
        let limits = config.limits.clone();

        let mut server = Server::bind(Arc::new(config)).await?;
        server.set_receiver(Arc::new(FramedReceiver::new(limits)));
        server.add_stage(Arc::new(DecodeStage));
        server.add_stage(Arc::new(SessionStage::new(sessions.clone())));
        server.add_stage(Arc::new(DispatchStage::new(
            sessions.clone(),
            methods.clone(),
        )));

        Ok(ProtocolServer {
            server,
            sessions,
            methods,
        })
    }

    /// Registers a closure as the handler for `name`, replacing any earlier one.
    pub fn register_method<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Message, &mut Message, Option<&Session>) + Send + Sync + 'static,
    {
        self.methods.register(name, Arc::new(handler));
    }

    pub fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn MethodHandler>) {
        self.methods.register(name, handler);
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn methods(&self) -> &Arc<MethodRegistry> {
        &self.methods
    }

    pub fn add_stage(&mut self, stage: Arc<dyn PipelineStage>) {
        self.server.add_stage(stage);
    }

    pub fn remove_stage(&mut self, name: &str) -> bool {
        self.server.remove_stage(name)
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.server.pipeline().stage_names()
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        self.server.local_addr()
    }

    pub fn shutdown_notifier(&self) -> &ShutdownNotifier {
        self.server.shutdown_notifier()
    }

    /// Serves until `shutdown_signal` completes, then waits for the session sweep to
    /// stop.
    pub async fn serve_forever(self, shutdown_signal: impl Future<Output = ()>) -> AppResult<()> {
        let ProtocolServer {
            server,
            sessions,
            methods,
        } = self;
        info!(
            "serving methods {:?} on {}",
            methods.method_names(),
            server.local_addr()?
        );
        let eviction = sessions.spawn_eviction(server.shutdown_notifier().subscribe());

        let result = server.serve_forever(shutdown_signal).await;

        if let Err(err) = eviction.await {
            debug!("session eviction task ended abnormally: {}", err);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::NetworkConfig;

    #[tokio::test]
    async fn test_default_stages() {
        let config = ServerConfig {
            network: NetworkConfig {
                port: 0,
                ..NetworkConfig::default()
            },
            ..ServerConfig::default()
        };
        let mut server = ProtocolServer::bind(config).await.unwrap();
        assert_eq!(server.stage_names(), vec!["decode", "session", "dispatch"]);

        server.register_method("noop", |_req, _res, _session| {});
        assert_eq!(server.methods().method_names(), vec!["noop"]);

        assert!(server.remove_stage(SessionStage::NAME));
        assert_eq!(server.stage_names(), vec!["decode", "dispatch"]);
    }
}
