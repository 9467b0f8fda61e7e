//! TLS client configuration for the broker connection
//!
//! Turns [`TlsOptions`] into a rustls [`ClientConfig`] backed by the ring
//! crypto provider:
//!
//! - `tls_version` pins TLS 1.2 or 1.3; unset allows both.
//! - `ca_file` is a PEM bundle of trusted roots; unset uses the Mozilla
//!   root set from `webpki-roots`.
//! - `cipher_suite` and `key_exchange_group` are `:`-separated lists that
//!   restrict the provider's defaults. Both rustls names
//!   (`TLS13_AES_128_GCM_SHA256`) and the usual OpenSSL spellings
//!   (`ECDHE-ECDSA-AES128-GCM-SHA256`, `P-256`) are accepted.
//! - `insecure_skip_verify` disables certificate checks entirely.
//!
//! Unknown names are configuration errors rather than being silently
//! ignored.

use crate::config::{TlsOptions, TlsVersion};
use crate::error::{BridgeError, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// OpenSSL cipher names that differ from the rustls spelling
const OPENSSL_SUITE_ALIASES: &[(&str, &str)] = &[
    (
        "ECDHE-ECDSA-AES128-GCM-SHA256",
        "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
    ),
    (
        "ECDHE-ECDSA-AES256-GCM-SHA384",
        "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
    ),
    (
        "ECDHE-ECDSA-CHACHA20-POLY1305",
        "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
    ),
    (
        "ECDHE-RSA-AES128-GCM-SHA256",
        "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
    ),
    (
        "ECDHE-RSA-AES256-GCM-SHA384",
        "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
    ),
    (
        "ECDHE-RSA-CHACHA20-POLY1305",
        "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
    ),
];

/// Common alternative spellings of named groups
const GROUP_ALIASES: &[(&str, &str)] = &[
    ("P-256", "secp256r1"),
    ("prime256v1", "secp256r1"),
    ("P-384", "secp384r1"),
];

/// Build the rustls client configuration described by `options`
pub fn client_config(options: &TlsOptions) -> Result<Arc<ClientConfig>> {
    let provider = Arc::new(crypto_provider(options)?);

    let versions: &[&'static rustls::SupportedProtocolVersion] = match options.tls_version {
        Some(TlsVersion::Tls12) => &[&rustls::version::TLS12],
        Some(TlsVersion::Tls13) => &[&rustls::version::TLS13],
        None => rustls::ALL_VERSIONS,
    };

    let builder = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(versions)
        .map_err(|e| {
            BridgeError::Config(format!(
                "TLS options do not leave a usable configuration: {}",
                e
            ))
        })?;

    let config = if options.insecure_skip_verify {
        tracing::warn!("TLS certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth()
    } else {
        let roots = match &options.ca_file {
            Some(path) => load_roots(path)?,
            None => webpki_store(),
        };
        builder
            .with_root_certificates(roots)
            .with_no_client_auth()
    };

    tracing::debug!(
        version = ?options.tls_version,
        ca_file = ?options.ca_file,
        cipher_suite = ?options.cipher_suite,
        key_exchange_group = ?options.key_exchange_group,
        "TLS client configuration built"
    );
    Ok(Arc::new(config))
}

/// Server name used for SNI and certificate checks
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| BridgeError::Config(format!("invalid broker host '{}': {}", host, e)))
}

fn crypto_provider(options: &TlsOptions) -> Result<CryptoProvider> {
    let mut provider = rustls::crypto::ring::default_provider();

    if let Some(list) = options.cipher_suite.as_deref() {
        let mut selected = Vec::new();
        for name in split_names(list) {
            let wanted = suite_name(name);
            let suite = provider
                .cipher_suites
                .iter()
                .find(|s| format!("{:?}", s.suite()).eq_ignore_ascii_case(&wanted))
                .ok_or_else(|| {
                    BridgeError::Config(format!("unsupported TLS cipher suite '{}'", name))
                })?;
            selected.push(*suite);
        }
        if selected.is_empty() {
            return Err(BridgeError::Config("cipher_suite list is empty".to_string()));
        }
        provider.cipher_suites = selected;
    }

    if let Some(list) = options.key_exchange_group.as_deref() {
        let mut selected = Vec::new();
        for name in split_names(list) {
            let wanted = group_name(name);
            let group = provider
                .kx_groups
                .iter()
                .find(|g| format!("{:?}", g.name()).eq_ignore_ascii_case(wanted))
                .ok_or_else(|| {
                    BridgeError::Config(format!("unsupported key exchange group '{}'", name))
                })?;
            selected.push(*group);
        }
        if selected.is_empty() {
            return Err(BridgeError::Config(
                "key_exchange_group list is empty".to_string(),
            ));
        }
        provider.kx_groups = selected;
    }

    Ok(provider)
}

fn split_names(list: &str) -> impl Iterator<Item = &str> {
    list.split(':').map(str::trim).filter(|s| !s.is_empty())
}

/// Map a configured cipher name to the rustls `CipherSuite` debug name
fn suite_name(name: &str) -> String {
    if let Some((_, rustls_name)) = OPENSSL_SUITE_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
    {
        return (*rustls_name).to_string();
    }

    // OpenSSL/IANA spell TLS 1.3 suites without the version marker.
    let upper = name.to_ascii_uppercase();
    if let Some(rest) = upper.strip_prefix("TLS_") {
        if rest.starts_with("AES_") || rest.starts_with("CHACHA20_") {
            return format!("TLS13_{}", rest);
        }
    }
    upper
}

fn group_name(name: &str) -> &str {
    GROUP_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        .map(|(_, canonical)| *canonical)
        .unwrap_or(name)
}

fn webpki_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

fn load_roots(path: &Path) -> Result<RootCertStore> {
    let file = File::open(path).map_err(|e| {
        BridgeError::Config(format!("cannot open CA file {}: {}", path.display(), e))
    })?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| {
            BridgeError::Config(format!("cannot parse CA file {}: {}", path.display(), e))
        })?;

    if certs.is_empty() {
        return Err(BridgeError::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(BridgeError::Config(format!(
            "no usable certificates in {}",
            path.display()
        )));
    }
    if ignored > 0 {
        tracing::warn!(ignored, path = %path.display(), "Skipped unparsable CA certificates");
    }
    Ok(roots)
}

/// Accepts any server certificate
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
