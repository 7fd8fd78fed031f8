//! Mutual TLS for the function listener.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tonic::transport::{Certificate, Identity, ServerTlsConfig};

/// CA that client certificates must chain to.
pub const CA_CERT_FILE: &str = "ca.crt";
/// Server certificate chain.
pub const CERT_FILE: &str = "tls.crt";
/// Server private key.
pub const KEY_FILE: &str = "tls.key";

/// Build a server TLS config that requires client certificates.
///
/// Reads [`CA_CERT_FILE`], [`CERT_FILE`] and [`KEY_FILE`] from `dir`.
pub fn load_mtls_config(dir: &Path) -> Result<ServerTlsConfig> {
    let ca = read_pem(dir, CA_CERT_FILE)?;
    let cert = read_pem(dir, CERT_FILE)?;
    let key = read_pem(dir, KEY_FILE)?;

    Ok(ServerTlsConfig::new()
        .identity(Identity::from_pem(cert, key))
        .client_ca_root(Certificate::from_pem(ca))
        .client_auth_optional(false))
}

fn read_pem(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let path = dir.join(name);
    fs::read(&path).with_context(|| format!("reading TLS file {}", path.display()))
}
