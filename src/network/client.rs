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

use rustls::pki_types::ServerName;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::network::{read_frame, Connection};
use crate::protocol::{Direction, Message};
use crate::service::{LimitsConfig, NetworkConfig};
use crate::{AppError, AppResult};

/// Client speaking the same framing as the server, over plain TCP or TLS.
pub struct Client {
    connection: Connection,
    limits: LimitsConfig,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs) -> AppResult<Client> {
        let stream = TcpStream::connect(addr).await?;
        let peer_addr = stream.peer_addr()?;
        debug!("connected to {}", peer_addr);
        Ok(Client {
            connection: Connection::new(0, peer_addr, stream, &NetworkConfig::default()),
            limits: LimitsConfig::default(),
        })
    }

    /// Connects and runs the TLS handshake, verifying the server as `server_name`.
    pub async fn connect_tls(
        addr: impl ToSocketAddrs,
        connector: &TlsConnector,
        server_name: ServerName<'static>,
    ) -> AppResult<Client> {
        let stream = TcpStream::connect(addr).await?;
        let peer_addr = stream.peer_addr()?;
        let stream = connector.connect(server_name, stream).await?;
        debug!("tls connected to {}", peer_addr);
        Ok(Client {
            connection: Connection::new(0, peer_addr, stream, &NetworkConfig::default()),
            limits: LimitsConfig::default(),
        })
    }

    /// Sends `request` and waits for one response frame.
    ///
    /// The request must carry a correct `Content-Length`, the server relies on it.
    pub async fn call(&mut self, request: &Message) -> AppResult<Message> {
        self.connection.write_all(&request.encode()).await?;
        let frame = read_frame(&mut self.connection, &self.limits)
            .await?
            .ok_or_else(|| {
                AppError::IllegalState("connection closed before a response arrived".into())
            })?;
        let response = Message::decode(&frame)?;
        if response.direction() != Direction::Response {
            return Err(AppError::framing("peer answered with a request frame"));
        }
        Ok(response)
    }

    pub async fn close(mut self) -> AppResult<()> {
        self.connection.shutdown().await
    }
}
