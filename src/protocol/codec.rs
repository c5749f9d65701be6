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

//! Wire format
//!
//! ```text
//! 0..3    "req" | "res"
//! 3       ':'
//! 4..8    header_length, u32 little endian, counted from offset 0 up to the body
//! 8       ':'
//! 9..H    "name=value:" repeated
//! H..     body
//! ```

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::message::{Direction, Message, CONTENT_LENGTH};
use crate::{AppError, AppResult};

/// Bytes before the header section: tag, ':', length field, ':'.
pub const PREAMBLE_SIZE: usize = 9;
pub const DELIMITER: u8 = b':';
pub const ASSIGN: u8 = b'=';

impl Message {
    /// Value of the `header_length` field this message encodes to.
    pub fn header_length(&self) -> usize {
        PREAMBLE_SIZE
            + self
                .headers()
                .iter()
                .map(|(name, value)| name.len() + value.len() + 2)
                .sum::<usize>()
    }

    pub fn encode(&self) -> BytesMut {
        let header_length = self.header_length();
        let mut buf = BytesMut::with_capacity(header_length + self.body().len());
        buf.put_slice(self.direction().tag());
        buf.put_u8(DELIMITER);
        // a header section past 4GiB is not representable on the wire
        buf.put_u32_le(header_length as u32);
        buf.put_u8(DELIMITER);
        for (name, value) in self.headers() {
            buf.put_slice(name.as_bytes());
            buf.put_u8(ASSIGN);
            buf.put_slice(value.as_bytes());
            buf.put_u8(DELIMITER);
        }
        buf.put_slice(self.body());
        buf
    }

    /// Decodes one complete frame; everything after the header section is the body.
    pub fn decode(bytes: &[u8]) -> AppResult<Message> {
        let direction = match bytes.get(0..3).and_then(Direction::from_tag) {
            Some(direction) => direction,
            None => {
                return Err(AppError::framing(format!(
                    "message does not start with req or res: {}",
                    preview(bytes)
                )))
            }
        };
        if bytes.len() < PREAMBLE_SIZE {
            return Err(AppError::framing(format!(
                "frame of {} bytes is shorter than the {} byte preamble",
                bytes.len(),
                PREAMBLE_SIZE
            )));
        }
        if bytes[3] != DELIMITER || bytes[8] != DELIMITER {
            return Err(AppError::framing("missing ':' around header length"));
        }
        let mut length_field = &bytes[4..8];
        let header_length = length_field.get_u32_le() as usize;
        if header_length < PREAMBLE_SIZE || header_length > bytes.len() {
            return Err(AppError::framing(format!(
                "header length {} out of range for a {} byte frame",
                header_length,
                bytes.len()
            )));
        }

        let section = &bytes[PREAMBLE_SIZE..header_length];
        let mut headers = parse_header_section(section)?;
        // agree with the frame reader on which Content-Length sized the body
        if let Ok(content_length) = content_length_from_section(section) {
            headers.insert(CONTENT_LENGTH.to_string(), content_length.to_string());
        }
        let body = Bytes::copy_from_slice(&bytes[header_length..]);
        Ok(Message::new(direction, headers, body))
    }
}

/// Splits `name=value:` entries. The value runs from the first `=` to the delimiter,
/// so a value may itself contain `=`. A repeated name keeps its first value.
pub fn parse_header_section(section: &[u8]) -> AppResult<BTreeMap<String, String>> {
    let text = std::str::from_utf8(section)
        .map_err(|e| AppError::framing(format!("header section is not valid text: {}", e)))?;
    let mut entries: Vec<&str> = text.split(DELIMITER as char).collect();
    // the last delimiter yields an empty tail
    match entries.pop() {
        Some("") | None => {}
        Some(tail) => {
            return Err(AppError::framing(format!(
                "unterminated header entry: {}",
                tail
            )))
        }
    }

    let mut headers = BTreeMap::new();
    for entry in entries {
        let (name, value) = entry
            .split_once(ASSIGN as char)
            .ok_or_else(|| AppError::framing(format!("header entry without '=': {}", entry)))?;
        headers
            .entry(name.to_string())
            .or_insert_with(|| value.to_string());
    }
    Ok(headers)
}

/// Finds the body length announced in a raw header section.
///
/// The first entry of the form `Content-Length=<digits>` wins.
pub fn content_length_from_section(section: &[u8]) -> AppResult<usize> {
    let text = std::str::from_utf8(section)
        .map_err(|e| AppError::framing(format!("header section is not valid text: {}", e)))?;
    let mut entries: Vec<&str> = text.split(DELIMITER as char).collect();
    entries.pop();

    let digits = entries
        .into_iter()
        .filter_map(|entry| entry.strip_prefix(CONTENT_LENGTH)?.strip_prefix('='))
        .find(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| AppError::framing("request carries no Content-Length header"))?;

    digits
        .parse::<usize>()
        .map_err(|e| AppError::framing(format!("Content-Length {} is not usable: {}", digits, e)))
}

/// Short printable rendering of raw bytes for log lines.
pub fn preview(bytes: &[u8]) -> String {
    const MAX_PREVIEW: usize = 64;
    let shown = &bytes[..bytes.len().min(MAX_PREVIEW)];
    let mut text = String::from_utf8_lossy(shown).into_owned();
    if bytes.len() > MAX_PREVIEW {
        text.push_str("...");
    }
    format!("{:?}", text)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::protocol::{METHOD, SESSION};

    fn ping_request() -> Message {
        Message::request()
            .with_header(METHOD, "ping")
            .with_header(SESSION, "*")
            .with_header(CONTENT_LENGTH, 0)
    }

    #[test]
    fn test_encode_layout() {
        let message = Message::response()
            .with_header("A", "b")
            .with_content("ascii", "hi");
        let bytes = message.encode();

        // A=b: Content-Length=2: Content-Type=ascii:
        let expected_header_length = 9 + 4 + 17 + 19;
        assert_eq!(&bytes[0..4], b"res:");
        assert_eq!(
            u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize,
            expected_header_length
        );
        assert_eq!(bytes[8], b':');
        assert_eq!(
            &bytes[9..expected_header_length],
            b"A=b:Content-Length=2:Content-Type=ascii:"
        );
        assert_eq!(&bytes[expected_header_length..], b"hi");
    }

    #[test]
    fn test_decode_encoded_request() {
        let request = ping_request().with_content("bytes", vec![0u8, 255, b':', b'=']);
        let decoded = Message::decode(&request.encode()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_header_length_matches_formula() {
        let message = ping_request();
        let bytes = message.encode();
        let field = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let expected: usize = 9 + message
            .headers()
            .iter()
            .map(|(k, v)| k.len() + v.len() + 2)
            .sum::<usize>();
        assert_eq!(field, expected);
        assert_eq!(field, message.header_length());
    }

    #[test]
    fn test_no_headers_no_body() {
        let bytes = Message::request().encode();
        assert_eq!(bytes.len(), 9);
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.direction(), Direction::Request);
        assert!(decoded.headers().is_empty());
        assert!(decoded.body().is_empty());
    }

    #[test]
    fn test_value_keeps_everything_after_first_assign() {
        let headers = parse_header_section(b"Token=a=b:X=:").unwrap();
        assert_eq!(headers.get("Token").map(String::as_str), Some("a=b"));
        assert_eq!(headers.get("X").map(String::as_str), Some(""));
    }

    #[test]
    fn test_repeated_header_keeps_first_value() {
        let section = b"Content-Length=3:Method=a:Content-Length=9:Method=b:";
        let mut frame = b"req:".to_vec();
        frame.extend_from_slice(&(PREAMBLE_SIZE as u32 + section.len() as u32).to_le_bytes());
        frame.push(b':');
        frame.extend_from_slice(section);
        frame.extend_from_slice(b"abc");

        let message = Message::decode(&frame).unwrap();
        assert_eq!(message.content_length(), Some(3));
        assert_eq!(message.body().len(), 3);
        assert_eq!(message.method(), Some("a"));
    }

    #[test]
    fn test_content_length_follows_first_usable_entry() {
        let section = b"Content-Length=x:Content-Length=2:";
        let mut frame = b"req:".to_vec();
        frame.extend_from_slice(&(PREAMBLE_SIZE as u32 + section.len() as u32).to_le_bytes());
        frame.push(b':');
        frame.extend_from_slice(section);
        frame.extend_from_slice(b"ok");

        let message = Message::decode(&frame).unwrap();
        assert_eq!(message.content_length(), Some(2));
        assert_eq!(message.body().as_ref(), b"ok");
    }

    #[rstest]
    #[case::bad_tag(b"xyz:\x09\x00\x00\x00:".to_vec())]
    #[case::uppercase_tag(b"REQ:\x09\x00\x00\x00:".to_vec())]
    #[case::too_short_for_tag(b"re".to_vec())]
    #[case::empty(Vec::new())]
    #[case::truncated_preamble(b"req:\x09\x00".to_vec())]
    #[case::missing_delimiter(b"req;\x09\x00\x00\x00:".to_vec())]
    #[case::header_length_below_preamble(b"req:\x05\x00\x00\x00:".to_vec())]
    #[case::header_length_past_end(b"req:\xff\x00\x00\x00:a=b:".to_vec())]
    #[case::entry_without_assign(b"req:\x0e\x00\x00\x00:abcd:".to_vec())]
    #[case::unterminated_entry(b"req:\x0c\x00\x00\x00:a=b".to_vec())]
    #[case::invalid_utf8(b"req:\x0e\x00\x00\x00:a=\xff\xfe:".to_vec())]
    fn test_decode_rejects_malformed(#[case] bytes: Vec<u8>) {
        let result = Message::decode(&bytes);
        assert!(
            matches!(result, Err(AppError::Framing(_))),
            "unexpected result {:?}",
            result
        );
    }

    #[rstest]
    #[case(b"Method=ping:Content-Length=12:".as_slice(), 12)]
    #[case(b"Content-Length=0:".as_slice(), 0)]
    #[case(b"Content-Length=x:Content-Length=7:".as_slice(), 7)]
    #[case(b"Content-Length=3:Content-Length=9:".as_slice(), 3)]
    fn test_content_length_from_section(#[case] section: &[u8], #[case] expected: usize) {
        assert_eq!(content_length_from_section(section).unwrap(), expected);
    }

    #[rstest]
    #[case(b"Method=ping:".as_slice())]
    #[case(b"".as_slice())]
    #[case(b"Content-Length=:".as_slice())]
    #[case(b"Content-Length=4".as_slice())]
    #[case(b"Content-Length=99999999999999999999999999:".as_slice())]
    fn test_content_length_missing(#[case] section: &[u8]) {
        assert!(content_length_from_section(section).unwrap_err().is_framing());
    }

    #[test]
    fn test_preview_truncates() {
        let bytes = vec![b'x'; 100];
        let text = preview(&bytes);
        assert!(text.ends_with("...\""));
        assert_eq!(preview(b"abc"), "\"abc\"");
    }
}
