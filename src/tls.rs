//! TLS context: certificate/key/CA configuration and the OpenSSL connector/acceptor built from it.

use std::path::{Path, PathBuf};

use openssl::ssl::{SslAcceptor, SslConnector, SslFiletype, SslMethod, SslVerifyMode};
use openssl::x509::X509;

use crate::error::{Error, ErrorKind};

/// TLS protocol version floor, fixed at `TlsConfig` construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    V1_1,
    V1_2,
    V1_3,
}

/// certificate verification strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    None,
    Peer,
}

/// immutable TLS configuration; shared by every socket built from it.
///
/// mirrors `SSLContext` in the original library: certificate, key, CA paths,
/// an OpenSSL cipher-list string, and a verify mode, fixed at construction.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    protocol_version: TlsVersion,
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    ca_path: Option<PathBuf>,
    ciphers: Option<String>,
    verify_mode: VerifyMode,
}

impl TlsConfig {
    pub fn new(protocol_version: TlsVersion) -> Self {
        Self {
            protocol_version,
            cert_path: None,
            key_path: None,
            ca_path: None,
            ciphers: None,
            verify_mode: VerifyMode::None,
        }
    }

    pub fn with_certificate(mut self, path: impl AsRef<Path>) -> Self {
        self.cert_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_private_key(mut self, path: impl AsRef<Path>) -> Self {
        self.key_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_ca_file(mut self, path: impl AsRef<Path>) -> Self {
        self.ca_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_ciphers(mut self, ciphers: impl Into<String>) -> Self {
        self.ciphers = Some(ciphers.into());
        self
    }

    pub fn with_verify_mode(mut self, mode: VerifyMode) -> Self {
        self.verify_mode = mode;
        self
    }

    fn min_proto(&self) -> openssl::ssl::SslVersion {
        match self.protocol_version {
            TlsVersion::V1_1 => openssl::ssl::SslVersion::TLS1_1,
            TlsVersion::V1_2 => openssl::ssl::SslVersion::TLS1_2,
            TlsVersion::V1_3 => openssl::ssl::SslVersion::TLS1_3,
        }
    }

    fn verify_mode(&self) -> SslVerifyMode {
        match self.verify_mode {
            VerifyMode::None => SslVerifyMode::NONE,
            VerifyMode::Peer => SslVerifyMode::PEER,
        }
    }

    /// build a client-side connector from this config.
    pub fn build_connector(&self) -> Result<SslConnector, Error> {
        let mut builder = SslConnector::builder(SslMethod::tls())?;
        builder.set_min_proto_version(Some(self.min_proto()))?;
        if let Some(cert) = &self.cert_path {
            builder.set_certificate_file(cert, SslFiletype::PEM)?;
        }
        if let Some(key) = &self.key_path {
            builder.set_private_key_file(key, SslFiletype::PEM)?;
        }
        if let Some(ca) = &self.ca_path {
            builder.set_ca_file(ca)?;
        }
        if let Some(ciphers) = &self.ciphers {
            builder.set_cipher_list(ciphers)?;
        }
        builder.set_verify(self.verify_mode());
        Ok(builder.build())
    }

    /// build a server-side acceptor from this config.
    pub fn build_acceptor(&self) -> Result<SslAcceptor, Error> {
        let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())?;
        builder.set_min_proto_version(Some(self.min_proto()))?;
        if let Some(cert) = &self.cert_path {
            builder.set_certificate_file(cert, SslFiletype::PEM)?;
        }
        if let Some(key) = &self.key_path {
            builder.set_private_key_file(key, SslFiletype::PEM)?;
        }
        if let Some(ca) = &self.ca_path {
            builder.set_ca_file(ca)?;
        }
        if let Some(ciphers) = &self.ciphers {
            builder.set_cipher_list(ciphers)?;
        }
        builder.set_verify(self.verify_mode());
        Ok(builder.build())
    }
}

/// peer certificate accessors shared by every TLS-capable stream variant,
/// translated from `ssl_socket_impl.cpp`'s `GetVerifyResult`/
/// `PresentPeerCertificate`/`GetPeerCertificate`/`GetPeerCertificateChain`
/// into `Result`-returning Rust (`spec.md` §9: no exceptions for a missing cert).
pub trait PeerCertificateAccess {
    fn ssl(&self) -> &openssl::ssl::SslRef;

    fn verify_result(&self) -> Error {
        match self.ssl().verify_result() {
            openssl::x509::X509VerifyResult::OK => Error::OK,
            result => Error::with_sub_code(ErrorKind::X509, result.as_raw()),
        }
    }

    fn present_peer_certificate(&self) -> bool {
        self.ssl().peer_certificate().is_some()
    }

    fn peer_certificate(&self) -> Result<X509, Error> {
        self.ssl()
            .peer_certificate()
            .ok_or_else(|| Error::new(ErrorKind::X509))
    }

    fn peer_certificate_chain(&self) -> Result<Vec<X509>, Error> {
        self.ssl()
            .verified_chain()
            .map(|stack| stack.iter().map(|c| c.to_owned()).collect())
            .ok_or_else(|| Error::new(ErrorKind::X509))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_builds_with_no_paths_configured() {
        let cfg = TlsConfig::new(TlsVersion::V1_2);
        assert!(cfg.build_connector().is_ok());
    }

    #[test]
    fn acceptor_rejects_missing_certificate_files() {
        let cfg = TlsConfig::new(TlsVersion::V1_2)
            .with_certificate("/no/such/cert.pem")
            .with_private_key("/no/such/key.pem");
        assert!(cfg.build_acceptor().is_err());
    }

    #[test]
    fn builder_methods_are_chainable_and_set_verify_mode() {
        let cfg = TlsConfig::new(TlsVersion::V1_3)
            .with_ciphers("AES128-GCM-SHA256:RC4:HIGH:!MD5:!aNULL:!EDH")
            .with_verify_mode(VerifyMode::Peer);
        assert_eq!(cfg.verify_mode, VerifyMode::Peer);
        assert!(cfg.build_connector().is_ok());
    }
}
