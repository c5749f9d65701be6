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

use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::service::TlsConfig;
use crate::{AppError, AppResult};

/// Builds the acceptor every accepted socket is wrapped in when `[tls]` is configured.
pub fn load_tls_acceptor(tls: &TlsConfig) -> AppResult<TlsAcceptor> {
    let cert_pem = std::fs::read(&tls.cert_path)
        .map_err(|e| AppError::Tls(format!("read certificate {}: {}", tls.cert_path, e)))?;
    let key_pem = std::fs::read(&tls.key_path)
        .map_err(|e| AppError::Tls(format!("read private key {}: {}", tls.key_path, e)))?;

    let certs = parse_certificates(&cert_pem)?;
    if certs.is_empty() {
        return Err(AppError::Tls(format!(
            "no certificates found in {}",
            tls.cert_path
        )));
    }
    let key = parse_private_key(&key_pem)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let server_config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    info!("tls enabled with certificate {}", tls.cert_path);
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn parse_certificates(pem: &[u8]) -> AppResult<Vec<CertificateDer<'static>>> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Tls(format!("failed to parse certificates: {}", e)))
}

fn parse_private_key(pem: &[u8]) -> AppResult<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_slice(pem)
        .map_err(|e| AppError::Tls(format!("failed to parse private key: {}", e)))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_missing_files() {
        let tls = TlsConfig {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
        };
        assert!(matches!(load_tls_acceptor(&tls), Err(AppError::Tls(_))));
    }

    #[test]
    fn test_file_without_certificates() {
        let mut cert = NamedTempFile::new().unwrap();
        cert.write_all(b"not a pem file").unwrap();
        let mut key = NamedTempFile::new().unwrap();
        key.write_all(b"not a pem file either").unwrap();
        let tls = TlsConfig {
            cert_path: cert.path().to_string_lossy().into_owned(),
            key_path: key.path().to_string_lossy().into_owned(),
        };
        assert!(matches!(load_tls_acceptor(&tls), Err(AppError::Tls(_))));
    }

    #[test]
    fn test_self_signed_certificate_loads() {
        let certified =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let mut cert = NamedTempFile::new().unwrap();
        cert.write_all(certified.cert.pem().as_bytes()).unwrap();
        let mut key = NamedTempFile::new().unwrap();
        key.write_all(certified.key_pair.serialize_pem().as_bytes())
            .unwrap();
        let tls = TlsConfig {
            cert_path: cert.path().to_string_lossy().into_owned(),
            key_path: key.path().to_string_lossy().into_owned(),
        };
        assert!(load_tls_acceptor(&tls).is_ok());
    }
}
