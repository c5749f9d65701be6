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
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

use crate::service::NetworkConfig;
use crate::{AppError, AppResult};

/// Anything a connection can run over: a plain `TcpStream`, a TLS stream, or an
/// in-memory duplex in tests.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// One accepted client connection.
///
/// Reads go through a `BufReader` so the byte-at-a-time reads of the framed receiver
/// stay cheap. Every read and write honours the deadlines from [`NetworkConfig`].
/// Dropping the connection releases the socket.
pub struct Connection {
    pub connection_id: u64,
    pub peer_addr: SocketAddr,
    stream: BufReader<Box<dyn AsyncStream>>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl Connection {
    pub fn new(
        connection_id: u64,
        peer_addr: SocketAddr,
        stream: impl AsyncStream + 'static,
        network: &NetworkConfig,
    ) -> Connection {
        let stream: Box<dyn AsyncStream> = Box::new(stream);
        Connection {
            connection_id,
            peer_addr,
            stream: BufReader::new(stream),
            read_timeout: network.read_timeout(),
            write_timeout: network.write_timeout(),
        }
    }

    /// Reads whatever is available, up to `max` bytes. `None` means the peer closed.
    pub async fn read_chunk(&mut self, max: usize) -> AppResult<Option<Bytes>> {
        let mut buffer = BytesMut::zeroed(max);
        let deadline = self.read_timeout;
        let n = with_deadline(deadline, "read", self.stream.read(&mut buffer)).await?;
        if n == 0 {
            return Ok(None);
        }
        buffer.truncate(n);
        Ok(Some(buffer.freeze()))
    }

    /// Fills `buf` completely.
    ///
    /// Returns `Ok(false)` if the peer closed before sending a single byte, which is the
    /// normal end of a connection. Closing part way through is a framing error.
    pub async fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> AppResult<bool> {
        let deadline = self.read_timeout;
        let mut filled = 0;
        while filled < buf.len() {
            let n = with_deadline(deadline, "read", self.stream.read(&mut buf[filled..])).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(AppError::framing(format!(
                    "connection closed after {} of {} bytes",
                    filled,
                    buf.len()
                )));
            }
            filled += n;
        }
        Ok(true)
    }

    /// Fills `buf` completely, end of stream is a truncated frame.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> AppResult<()> {
        let deadline = self.read_timeout;
        let wanted = buf.len();
        match with_deadline(deadline, "read", self.stream.read_exact(buf)).await {
            Ok(_) => Ok(()),
            Err(AppError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => Err(
                AppError::framing(format!("connection closed while reading {} bytes", wanted)),
            ),
            Err(e) => Err(e),
        }
    }

    /// `None` at end of stream.
    pub async fn read_byte(&mut self) -> AppResult<Option<u8>> {
        let mut byte = [0u8; 1];
        let deadline = self.read_timeout;
        let n = with_deadline(deadline, "read", self.stream.read(&mut byte)).await?;
        Ok((n == 1).then_some(byte[0]))
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> AppResult<()> {
        let deadline = self.write_timeout;
        let stream = &mut self.stream;
        with_deadline(deadline, "write", async move {
            stream.write_all(bytes).await?;
            stream.flush().await
        })
        .await
        .map_err(|e| match e {
            AppError::IoError(e) => AppError::DetailedIoError(format!("write response error: {}", e)),
            other => other,
        })?;
        trace!(
            "connection {} wrote {} bytes",
            self.connection_id,
            bytes.len()
        );
        Ok(())
    }

    /// In-memory connection and the client end of it.
    #[cfg(test)]
    pub(crate) fn in_memory(network: &NetworkConfig) -> (Connection, tokio::io::DuplexStream) {
        let (server, client) = tokio::io::duplex(64 * 1024);
        let peer_addr = SocketAddr::from(([127, 0, 0, 1], 9));
        (Connection::new(1, peer_addr, server, network), client)
    }

    /// Flushes and closes the write side. For TLS this sends close_notify.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        let deadline = self.write_timeout;
        with_deadline(deadline, "shutdown", self.stream.shutdown()).await
    }
}

async fn with_deadline<T, F>(deadline: Option<Duration>, what: &str, fut: F) -> AppResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match deadline {
        Some(deadline) => match tokio::time::timeout(deadline, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(AppError::Timeout(format!("{} after {:?}", what, deadline))),
        },
        None => Ok(fut.await?),
    }
}
