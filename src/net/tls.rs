//! Server certificate trust for secured transports
//!
//! With a configured fingerprint the SHA-256 digest of the leaf certificate is
//! the only trust anchor: chain validation is skipped and self-signed
//! certificates are accepted as long as the digest matches exactly.
//! Without one, the platform roots are used.

use crate::error::{Result, SourceError};
use crate::net::TrustPolicy;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};

/// Lowercase a fingerprint and strip `:` separators and whitespace.
pub fn normalize_fingerprint(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Lowercase hex SHA-256 digest of a DER certificate.
pub fn certificate_fingerprint(der: &[u8]) -> String {
    format!("{:x}", Sha256::digest(der))
}

/// Compare the digest of `der` against `expected`, ignoring case.
pub fn verify_fingerprint(expected: &str, der: &[u8]) -> Result<()> {
    let expected = normalize_fingerprint(expected);
    let actual = certificate_fingerprint(der);

    if actual != expected {
        return Err(SourceError::FingerprintMismatch { expected, actual });
    }
    Ok(())
}

/// Accepts exactly the certificate with the pinned digest.
///
/// Handshake signatures are still checked so the peer must own the key of
/// the pinned certificate.
#[derive(Debug)]
pub struct PinnedCertVerifier {
    expected: String,
    provider: Arc<CryptoProvider>,
    // digest of the last rejected certificate
    mismatch: Mutex<Option<String>>,
}

impl PinnedCertVerifier {
    pub fn new(expected: &str, provider: Arc<CryptoProvider>) -> Self {
        PinnedCertVerifier {
            expected: normalize_fingerprint(expected),
            provider,
            mismatch: Mutex::new(None),
        }
    }

    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// Typed error for the last rejection, if the handshake failed on the pin.
    pub fn take_mismatch(&self) -> Option<SourceError> {
        let actual = self.mismatch.lock().ok()?.take()?;
        Some(SourceError::FingerprintMismatch {
            expected: self.expected.clone(),
            actual,
        })
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match verify_fingerprint(&self.expected, end_entity.as_ref()) {
            Ok(()) => Ok(ServerCertVerified::assertion()),
            Err(e) => {
                if let (SourceError::FingerprintMismatch { actual, .. }, Ok(mut slot)) =
                    (&e, self.mismatch.lock())
                {
                    slot.replace(actual.clone());
                }
                Err(rustls::Error::General(e.to_string()))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Client TLS configuration for one dial, plus the pin verifier when pinning.
pub struct TlsSetup {
    pub config: Arc<ClientConfig>,
    pub verifier: Option<Arc<PinnedCertVerifier>>,
}

pub fn client_config(trust: &TrustPolicy) -> Result<TlsSetup> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| SourceError::Tls(e.to_string()))?;

    match trust {
        TrustPolicy::Pinned(fingerprint) => {
            let verifier = Arc::new(PinnedCertVerifier::new(fingerprint, provider));
            let config = builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::clone(&verifier) as Arc<dyn ServerCertVerifier>)
                .with_no_client_auth();
            Ok(TlsSetup {
                config: Arc::new(config),
                verifier: Some(verifier),
            })
        }
        TrustPolicy::System => {
            let mut roots = RootCertStore::empty();
            let loaded = rustls_native_certs::load_native_certs();
            for e in &loaded.errors {
                log::debug!("skipping native certificate source: {}", e);
            }
            let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
            log::debug!("loaded {} native root certificates ({} ignored)", added, ignored);
            if roots.is_empty() {
                return Err(SourceError::Tls("no trusted root certificates available".into()));
            }

            let config = builder.with_root_certificates(roots).with_no_client_auth();
            Ok(TlsSetup {
                config: Arc::new(config),
                verifier: None,
            })
        }
    }
}
