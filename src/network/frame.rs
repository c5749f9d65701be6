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

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::network::Connection;
use crate::protocol::{content_length_from_section, preview, Direction, PREAMBLE_SIZE};
use crate::service::{BoxFuture, LimitsConfig, MessageReceiver};
use crate::{AppError, AppResult};

/// Upper bound on the bytes collected for the log line of a rejected preamble.
const MAX_DIAGNOSTIC_BYTES: usize = 1024;

/// Reads exactly one frame off the connection and returns its raw bytes.
///
/// The read is driven by the wire format: three tag bytes, the six byte length
/// block, `header_length - 9` header bytes and finally `Content-Length` body bytes.
/// Returns `Ok(None)` when the peer closed the connection before a new frame began.
///
/// Fails with a framing error when the tag is neither `req` nor `res`, the header or
/// body exceed the configured limits, the header section carries no
/// `Content-Length`, or the peer closes mid-frame.
pub async fn read_frame(
    connection: &mut Connection,
    limits: &LimitsConfig,
) -> AppResult<Option<Bytes>> {
    let mut tag = [0u8; 3];
    if !connection.read_exact_or_eof(&mut tag).await? {
        return Ok(None);
    }
    if Direction::from_tag(&tag).is_none() {
        let diagnostic = drain_for_diagnostic(connection, &tag).await;
        return Err(AppError::framing(format!(
            "message does not start with res or req: {}",
            preview(&diagnostic)
        )));
    }

    // ':' + u32 header_length + ':'
    let mut length_block = [0u8; 6];
    connection.read_exact(&mut length_block).await?;
    if length_block[0] != b':' || length_block[5] != b':' {
        return Err(AppError::framing("missing ':' around header length"));
    }
    let length_field = [
        length_block[1],
        length_block[2],
        length_block[3],
        length_block[4],
    ];
    let header_length = u32::from_le_bytes(length_field) as usize;
    if header_length < PREAMBLE_SIZE {
        return Err(AppError::framing(format!(
            "header length {} is shorter than the preamble",
            header_length
        )));
    }
    if header_length > limits.max_header_size {
        return Err(AppError::framing(format!(
            "header length {} exceeds the limit of {}",
            header_length, limits.max_header_size
        )));
    }

    let mut header_section = vec![0u8; header_length - PREAMBLE_SIZE];
    connection.read_exact(&mut header_section).await?;

    let content_length = content_length_from_section(&header_section)?;
    if content_length > limits.max_body_size {
        return Err(AppError::framing(format!(
            "body of {} bytes exceeds the limit of {}",
            content_length, limits.max_body_size
        )));
    }

    let mut frame = BytesMut::with_capacity(header_length + content_length);
    frame.put_slice(&tag);
    frame.put_u8(b':');
    frame.put_slice(&length_field);
    frame.put_u8(b':');
    frame.put_slice(&header_section);

    let mut body = vec![0u8; content_length];
    connection.read_exact(&mut body).await?;
    frame.put_slice(&body);

    trace!(
        "connection {} received frame: header length {}, body length {}",
        connection.connection_id,
        header_length,
        content_length
    );
    Ok(Some(frame.freeze()))
}

/// Collects what the peer keeps sending, until it closes, so the rejected bytes can be
/// logged. Stops on any read failure.
async fn drain_for_diagnostic(connection: &mut Connection, prefix: &[u8]) -> Vec<u8> {
    let mut collected = prefix.to_vec();
    while collected.len() < MAX_DIAGNOSTIC_BYTES {
        match connection.read_byte().await {
            Ok(Some(byte)) => collected.push(byte),
            Ok(None) | Err(_) => break,
        }
    }
    collected
}

/// Protocol aware receive strategy, one complete frame per call.
#[derive(Debug, Clone, Default)]
pub struct FramedReceiver {
    limits: LimitsConfig,
}

impl FramedReceiver {
    pub fn new(limits: LimitsConfig) -> Self {
        FramedReceiver { limits }
    }
}

impl MessageReceiver for FramedReceiver {
    fn receive<'a>(
        &'a self,
        connection: &'a mut Connection,
    ) -> BoxFuture<'a, AppResult<Option<Bytes>>> {
        Box::pin(read_frame(connection, &self.limits))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::protocol::{Message, CONTENT_LENGTH, METHOD};
    use crate::service::NetworkConfig;

    fn ping(body: &'static [u8]) -> Message {
        Message::request()
            .with_header(METHOD, "ping")
            .with_content("bytes", body)
    }

    #[tokio::test]
    async fn test_reads_one_frame_at_a_time() {
        let (mut connection, mut client) = Connection::in_memory(&NetworkConfig::default());
        let first = ping(b"first");
        let second = ping(b"");
        client.write_all(&first.encode()).await.unwrap();
        client.write_all(&second.encode()).await.unwrap();
        drop(client);

        let limits = LimitsConfig::default();
        let frame = read_frame(&mut connection, &limits).await.unwrap().unwrap();
        assert_eq!(frame.as_ref(), first.encode().as_ref());
        let frame = read_frame(&mut connection, &limits).await.unwrap().unwrap();
        assert_eq!(Message::decode(&frame).unwrap(), second);
        assert!(read_frame(&mut connection, &limits).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_tag_drains_until_close() {
        let (mut connection, mut client) = Connection::in_memory(&NetworkConfig::default());
        client.write_all(b"xyz:garbage that follows").await.unwrap();
        drop(client);

        let err = read_frame(&mut connection, &LimitsConfig::default())
            .await
            .unwrap_err();
        match err {
            AppError::Framing(msg) => assert!(msg.contains("xyz:garbage")),
            other => panic!("unexpected error {:?}", other),
        }
        // everything was consumed
        assert!(connection.read_byte().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_content_length() {
        let (mut connection, mut client) = Connection::in_memory(&NetworkConfig::default());
        let request = Message::request().with_header(METHOD, "ping");
        client.write_all(&request.encode()).await.unwrap();

        let err = read_frame(&mut connection, &LimitsConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_framing());
    }

    #[tokio::test]
    async fn test_limits_are_enforced() {
        let limits = LimitsConfig {
            max_header_size: 64,
            max_body_size: 4,
        };

        let (mut connection, mut client) = Connection::in_memory(&NetworkConfig::default());
        client.write_all(&ping(b"too long").encode()).await.unwrap();
        let err = read_frame(&mut connection, &limits).await.unwrap_err();
        assert!(err.is_framing());

        let (mut connection, mut client) = Connection::in_memory(&NetworkConfig::default());
        let request = ping(b"").with_header("Padding", "x".repeat(64));
        client.write_all(&request.encode()).await.unwrap();
        let err = read_frame(&mut connection, &limits).await.unwrap_err();
        assert!(err.is_framing());
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let (mut connection, mut client) = Connection::in_memory(&NetworkConfig::default());
        let request = Message::request().with_header(CONTENT_LENGTH, 10);
        client.write_all(&request.encode()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let err = read_frame(&mut connection, &LimitsConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_framing());
    }

    #[tokio::test]
    async fn test_header_length_below_preamble() {
        let (mut connection, mut client) = Connection::in_memory(&NetworkConfig::default());
        client.write_all(b"req:\x04\x00\x00\x00:").await.unwrap();
        let err = read_frame(&mut connection, &LimitsConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_framing());
    }
}
