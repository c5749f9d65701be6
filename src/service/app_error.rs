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

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    DetailedIoError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// protocol errors
    #[error("malformed frame: {0}")]
    Framing(String),

    #[error("missing header: {0}")]
    MissingHeader(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("method handler panicked: {0}")]
    HandlerPanicked(String),

    #[error("no free session token of length {0}")]
    SessionTokensExhausted(usize),

    #[error("expected a request frame, got a {0} frame")]
    UnexpectedDirection(String),
}

impl AppError {
    pub fn framing(msg: impl Into<String>) -> Self {
        AppError::Framing(msg.into())
    }

    /// Errors caused by the peer sending bytes that do not follow the wire format.
    pub fn is_framing(&self) -> bool {
        matches!(self, AppError::Framing(_))
    }
}

impl From<rustls::Error> for AppError {
    fn from(value: rustls::Error) -> Self {
        AppError::Tls(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::InvalidValue(value.to_string())
    }
}
