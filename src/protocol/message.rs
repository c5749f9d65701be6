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

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use bytes::Bytes;

pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const METHOD: &str = "Method";
pub const SESSION: &str = "Session";

/// Content type of responses produced by the dispatcher itself.
pub const ERROR_CONTENT_TYPE: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub const REQUEST_TAG: &'static [u8; 3] = b"req";
    pub const RESPONSE_TAG: &'static [u8; 3] = b"res";

    pub fn tag(&self) -> &'static [u8; 3] {
        match self {
            Direction::Request => Self::REQUEST_TAG,
            Direction::Response => Self::RESPONSE_TAG,
        }
    }

    pub fn from_tag(tag: &[u8]) -> Option<Direction> {
        match tag {
            b"req" => Some(Direction::Request),
            b"res" => Some(Direction::Response),
            _ => None,
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Request => write!(f, "req"),
            Direction::Response => write!(f, "res"),
        }
    }
}

/// A request or a response.
///
/// Header names and values are plain text and must not contain `:` or `=`, the
/// codec does not escape them. Headers are kept sorted by name so that encoding
/// the same message always yields the same bytes. An empty body and a missing
/// body are the same thing on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    direction: Direction,
    headers: BTreeMap<String, String>,
    body: Bytes,
}

impl Message {
    pub fn new(direction: Direction, headers: BTreeMap<String, String>, body: Bytes) -> Self {
        Message {
            direction,
            headers,
            body,
        }
    }

    pub fn request() -> Self {
        Self::new(Direction::Request, BTreeMap::new(), Bytes::new())
    }

    pub fn response() -> Self {
        Self::new(Direction::Response, BTreeMap::new(), Bytes::new())
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Any displayable value is stored as its text form.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl ToString) {
        self.headers.insert(name.into(), value.to_string());
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(name)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Replaces the body only, `Content-Length` is left untouched.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// Sets body, `Content-Length` and `Content-Type` together.
    pub fn set_content(&mut self, content_type: &str, body: impl Into<Bytes>) {
        self.body = body.into();
        self.set_header(CONTENT_LENGTH, self.body.len());
        self.set_header(CONTENT_TYPE, content_type);
    }

    pub fn with_content(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.set_content(content_type, body);
        self
    }

    pub fn method(&self) -> Option<&str> {
        self.header(METHOD)
    }

    pub fn session(&self) -> Option<&str> {
        self.header(SESSION)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE)
    }

    /// `None` when the header is absent or not a number.
    pub fn content_length(&self) -> Option<usize> {
        self.header(CONTENT_LENGTH)?.parse().ok()
    }
}
