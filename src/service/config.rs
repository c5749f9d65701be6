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

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

/// Smallest legal `header_length`: tag, two delimiters and the length field.
pub const MIN_HEADER_SIZE: usize = 9;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    /// 0 means no limit on concurrent connections.
    pub max_connection: usize,
    /// chunk size of the default receive strategy
    pub conn_read_buffer_size: usize,
    /// serve more than one request per connection
    pub keep_alive: bool,
    /// 0 disables the read deadline
    pub read_timeout_ms: u64,
    /// 0 disables the write deadline
    pub write_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "127.0.0.1".to_string(),
            port: 5555,
            max_connection: 0,
            conn_read_buffer_size: 1024,
            keep_alive: false,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
        }
    }
}

impl NetworkConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }
}

/// Upper bounds applied by the framed reader before any allocation happens.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_header_size: usize,
    pub max_body_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_header_size: 64 * 1024,
            max_body_size: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub token_length: usize,
    /// seconds a session may live before the sweep removes it
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            token_length: 8,
            // 3 hours
            ttl_secs: 10800,
            sweep_interval_secs: 5,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// PEM encoded certificate chain and private key.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub limits: LimitsConfig,
    pub session: SessionConfig,
    pub tls: Option<TlsConfig>,
}

impl ServerConfig {
    /// Loads the config file, then applies `SESSIONRPC__SECTION__KEY` environment overrides.
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<ServerConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(
                config::Environment::with_prefix("SESSIONRPC")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.session.token_length == 0 {
            return Err(AppError::InvalidValue(
                "session.token_length must be at least 1".into(),
            ));
        }
        if self.session.sweep_interval_secs == 0 {
            return Err(AppError::InvalidValue(
                "session.sweep_interval_secs must be at least 1".into(),
            ));
        }
        if self.limits.max_header_size < MIN_HEADER_SIZE {
            return Err(AppError::InvalidValue(format!(
                "limits.max_header_size must be at least {}",
                MIN_HEADER_SIZE
            )));
        }
        if self.network.conn_read_buffer_size == 0 {
            return Err(AppError::InvalidValue(
                "network.conn_read_buffer_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
