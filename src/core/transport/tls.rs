// src/core/transport/tls.rs

//! Builds the rustls client configuration for a fully specified TLS policy.

use super::address::TlsPolicy;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::{
    self, ClientConfig, RootCertStore, SupportedProtocolVersion,
    crypto::{CryptoProvider, aws_lc_rs},
    pki_types::{CertificateDer, PrivateKeyDer},
};

/// Creates a connector presenting the policy's certificate and key as the
/// client identity, restricted to its cipher suites and protocol version.
///
/// Errors are plain strings; the address wraps them into `ConnectFailed`
/// together with its own description.
pub(crate) fn build_connector(policy: &TlsPolicy) -> Result<TlsConnector, String> {
    let certs = load_certs(policy.cert_path())?;
    let key = load_key(policy.key_path())?;

    // Mozilla roots plus the configured certificate itself, so backends that
    // present the same self-signed certificate are trusted.
    let mut root_cert_store = RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    for cert in &certs {
        if let Err(e) = root_cert_store.add(cert.clone()) {
            tracing::debug!("Configured certificate not usable as a trust anchor: {e}");
        }
    }

    let provider = restrict_provider(policy.cipher())?;
    let version = parse_version(policy.version())?;

    let config = ClientConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[version])
        .map_err(|e| format!("TLS version {} unusable: {e}", policy.version()))?
        .with_root_certificates(root_cert_store)
        .with_client_auth_cert(certs, key)
        .map_err(|e| format!("Invalid client certificate or key: {e}"))?;

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Keeps only the cipher suites named in `cipher`, a `:` or `,` separated
/// list of rustls suite names such as `TLS13_AES_256_GCM_SHA384`.
fn restrict_provider(cipher: &str) -> Result<CryptoProvider, String> {
    let mut provider = aws_lc_rs::default_provider();
    let mut selected = Vec::new();
    for name in cipher
        .split([':', ','])
        .map(str::trim)
        .filter(|n| !n.is_empty())
    {
        let suite = provider
            .cipher_suites
            .iter()
            .find(|s| format!("{:?}", s.suite()).eq_ignore_ascii_case(name))
            .ok_or_else(|| format!("Unknown cipher suite '{name}'"))?;
        selected.push(*suite);
    }
    if selected.is_empty() {
        return Err("No cipher suites configured".to_string());
    }
    provider.cipher_suites = selected;
    Ok(provider)
}

fn parse_version(version: &str) -> Result<&'static SupportedProtocolVersion, String> {
    match version.trim().to_ascii_uppercase().as_str() {
        "TLSV1.2" | "TLS1.2" | "1.2" => Ok(&rustls::version::TLS12),
        "TLSV1.3" | "TLS1.3" | "1.3" => Ok(&rustls::version::TLS13),
        other => Err(format!("Unsupported TLS version '{other}'")),
    }
}

/// Loads TLS certificates from a PEM file.
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, String> {
    let cert_file = File::open(path).map_err(|e| {
        format!(
            "Failed to open certificate file '{}': {}",
            path.display(),
            e
        )
    })?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("Failed to parse certificates in '{}': {e}", path.display()))?;
    if certs.is_empty() {
        return Err(format!("No certificates found in '{}'", path.display()));
    }
    Ok(certs)
}

/// Loads a private key from a PEM file.
fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, String> {
    let key_file = File::open(path).map_err(|e| {
        format!(
            "Failed to open private key file '{}': {}",
            path.display(),
            e
        )
    })?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| format!("Failed to parse key file '{}': {e}", path.display()))?
        .ok_or_else(|| format!("No private key found in key file '{}'", path.display()))
}
