//! TLS client settings.
//!
//! The trust bundle and optional client certificate are configured once
//! and passed into every connection; nothing is read from globals. The
//! rustls config is only built when a connection actually upgrades, so a
//! missing trust bundle surfaces as a configuration error at that point.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::error::{QueuewireError, Result};

/// Client certificate and private key (PEM files).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAuth {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// TLS material for upgrading connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    /// PEM bundle of trusted CA certificates. Required for TLS.
    pub trust_bundle: Option<PathBuf>,
    /// Optional client certificate for mutual TLS.
    pub client_auth: Option<ClientAuth>,
    /// Name to verify the broker certificate against, overriding the node host.
    pub server_name: Option<String>,
}

impl TlsSettings {
    /// Settings trusting the CA certificates in `path`.
    pub fn with_trust_bundle(path: impl Into<PathBuf>) -> Self {
        Self {
            trust_bundle: Some(path.into()),
            ..Self::default()
        }
    }

    /// Add a client certificate/key pair.
    pub fn client_auth(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.client_auth = Some(ClientAuth {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        });
        self
    }

    /// Override the name used for certificate verification.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Whether a trust bundle has been configured.
    pub fn is_configured(&self) -> bool {
        self.trust_bundle.is_some()
    }

    /// Build a connector from the configured files.
    ///
    /// # Errors
    ///
    /// [`QueuewireError::Config`] when no trust bundle is configured or the
    /// PEM files are unusable.
    pub fn connector(&self) -> Result<TlsConnector> {
        let bundle = self.trust_bundle.as_ref().ok_or_else(|| {
            QueuewireError::Config("TLS requested but no trust bundle configured".to_string())
        })?;

        let mut roots = RootCertStore::empty();
        for cert in load_certs(bundle)? {
            roots.add(cert)?;
        }

        let builder = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots);

        let config = match &self.client_auth {
            Some(auth) => {
                let certs = load_certs(&auth.cert_path)?;
                let key = load_key(&auth.key_path)?;
                builder.with_client_auth_cert(certs, key)?
            }
            None => builder.with_no_client_auth(),
        };

        Ok(TlsConnector::from(Arc::new(config)))
    }

    /// Resolve the name to verify, preferring the configured override.
    pub fn resolve_server_name(&self, host: &str) -> Result<ServerName<'static>> {
        let name = self.server_name.as_deref().unwrap_or(host).to_string();
        ServerName::try_from(name.clone())
            .map_err(|_| QueuewireError::Config(format!("Invalid TLS server name: {}", name)))
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| QueuewireError::Config(format!("Cannot open {}: {}", path.display(), e)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| QueuewireError::Config(format!("Bad certificate in {}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(QueuewireError::Config(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| QueuewireError::Config(format!("Bad private key in {}: {}", path.display(), e)))?
        .ok_or_else(|| QueuewireError::Config(format!("No private key found in {}", path.display())))
}
