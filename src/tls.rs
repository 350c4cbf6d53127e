/*!
 * @file tls.rs
 * @brief TLS server configuration, built from `SslConfig` (§4.6, §6.5)
 */

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::server::{AllowAnyAnonymousOrAuthenticatedClient, ClientCertVerifier};
use rustls::{Certificate, PrivateKey, RootCertStore, ServerConfig as RustlsServerConfig};
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};

use crate::config::SslConfig;
use crate::error::{FauxDBError, Result};

/// Builds a `rustls::ServerConfig` from the configured cert/key/CA and
/// client-auth options; `requestCert`/`rejectUnauthorized` select between
/// anonymous, optional, and mandatory client certificates (§6.5).
pub fn build_server_config(ssl: &SslConfig) -> Result<Arc<RustlsServerConfig>> {
    let cert_path = ssl.cert_file.as_ref().ok_or_else(|| FauxDBError::Config("ssl.cert_file is required".to_string()))?;
    let key_path = ssl.key_file.as_ref().ok_or_else(|| FauxDBError::Config("ssl.key_file is required".to_string()))?;

    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let client_verifier = if ssl.request_cert {
        let ca_path = ssl.ca_file.as_ref().ok_or_else(|| FauxDBError::Config("ssl.ca_file is required when requestCert is set".to_string()))?;
        let roots = load_root_store(ca_path)?;
        if ssl.reject_unauthorized {
            rustls::server::AllowAnyAuthenticatedClient::new(roots).boxed()
        } else {
            AllowAnyAnonymousOrAuthenticatedClient::new(roots).boxed()
        }
    } else {
        rustls::server::NoClientAuth::new()
    };

    let mut config = RustlsServerConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(protocol_versions(ssl)?)
        .map_err(|e| FauxDBError::Config(format!("unsupported TLS version range: {}", e)))?
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(certs, key)
        .map_err(|e| FauxDBError::Config(format!("invalid certificate/key pair: {}", e)))?;

    if !ssl.alpn_protocols.is_empty() {
        config.alpn_protocols = ssl.alpn_protocols.iter().map(|p| p.as_bytes().to_vec()).collect();
    }

    Ok(Arc::new(config))
}

fn protocol_versions(ssl: &SslConfig) -> Result<&'static [&'static rustls::SupportedProtocolVersion]> {
    match (ssl.min_tls_version.as_str(), ssl.max_tls_version.as_str()) {
        ("1.2", "1.2") => Ok(&[&rustls::version::TLS12]),
        ("1.3", "1.3") => Ok(&[&rustls::version::TLS13]),
        ("1.2", "1.3") | ("1.3", "1.2") => Ok(&[&rustls::version::TLS13, &rustls::version::TLS12]),
        (min, max) => Err(FauxDBError::Config(format!("unsupported TLS version range {}..{}", min, max))),
    }
}

fn load_certs(path: &str) -> Result<Vec<Certificate>> {
    let file = File::open(path).map_err(FauxDBError::Network)?;
    let mut reader = BufReader::new(file);
    let raw = certs(&mut reader).map_err(|_| FauxDBError::Config(format!("failed to parse certificate(s) at {}", path)))?;
    Ok(raw.into_iter().map(Certificate).collect())
}

fn load_private_key(path: &str) -> Result<PrivateKey> {
    let file = File::open(path).map_err(FauxDBError::Network)?;
    let mut reader = BufReader::new(file);

    let mut keys = pkcs8_private_keys(&mut reader).map_err(|_| FauxDBError::Config(format!("failed to parse PKCS#8 key at {}", path)))?;
    if keys.is_empty() {
        let file = File::open(path).map_err(FauxDBError::Network)?;
        let mut reader = BufReader::new(file);
        keys = rsa_private_keys(&mut reader).map_err(|_| FauxDBError::Config(format!("failed to parse RSA key at {}", path)))?;
    }

    keys.into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| FauxDBError::Config(format!("no private key found at {}", path)))
}

fn load_root_store(path: &str) -> Result<RootCertStore> {
    let file = File::open(path).map_err(FauxDBError::Network)?;
    let mut reader = BufReader::new(file);
    let raw = certs(&mut reader).map_err(|_| FauxDBError::Config(format!("failed to parse CA bundle at {}", path)))?;

    let mut store = RootCertStore::empty();
    for cert in raw {
        store
            .add(&Certificate(cert))
            .map_err(|e| FauxDBError::Config(format!("invalid CA certificate: {}", e)))?;
    }
    Ok(store)
}
