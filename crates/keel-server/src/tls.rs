//! Loading TLS material for [`Server::serve_tls`](crate::Server::serve_tls).
//!
//! Only PEM files are supported: a certificate chain and a private key
//! (PKCS#1, PKCS#8 or SEC1).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig as RustlsConfig;
use tokio_rustls::TlsAcceptor;

use crate::error::ServerError;

/// Builds a TLS acceptor from PEM encoded certificate and key files.
///
/// The acceptor advertises HTTP/1.1 over ALPN.
///
/// # Errors
///
/// Returns `ServerError::Tls` if a file cannot be read, contains no usable
/// entry, or the key does not match the certificate.
pub fn load_acceptor(cert: impl AsRef<Path>, key: impl AsRef<Path>) -> Result<TlsAcceptor, ServerError> {
    let certs = load_certs(cert.as_ref())?;
    let key = load_key(key.as_ref())?;

    let mut config = RustlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(format!("invalid certificate or key: {e}")))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn open(path: &Path) -> Result<BufReader<File>, ServerError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ServerError::Tls(format!("failed to open {}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("failed to parse {}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(ServerError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ServerError::Tls(format!("failed to parse {}: {e}", path.display())))?
        .ok_or_else(|| ServerError::Tls(format!("no private key found in {}", path.display())))
}
