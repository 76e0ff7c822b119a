//! Builds a fresh per-connection TLS server config for a CONNECT-hijacked
//! socket, delegating certificate minting to [`CertStore`].
//!
//! The hostname is already known from the CONNECT authority by the time this
//! runs, so there's no need for an async-unfriendly `ResolvesServerCert`
//! callback: the leaf is minted up front and baked into a single-cert
//! `ServerConfig`, mirroring the simple `with_single_cert` construction the
//! teacher's own test TLS acceptor uses.

use std::io::Cursor;
use std::sync::{Arc, LazyLock};

use rustls::ServerConfig;
use rustls::crypto::CryptoProvider;
use rustls::crypto::aws_lc_rs::{cipher_suite, kx_group};
use rustls::version::TLS12;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::certstore::CertStore;
use crate::error::IngressError;

/// Min TLS 1.2, curve preference P521/P384/P256, server cipher preference —
/// the reference `ConfigTemplate` this proxy has always bumped connections
/// with. Cipher suites are ECDHE+RSA only (no ECDSA suites): every leaf this
/// proxy mints is RSA-signed.
static CONFIG_TEMPLATE: LazyLock<Arc<CryptoProvider>> = LazyLock::new(|| {
	let mut provider = rustls::crypto::aws_lc_rs::default_provider();
	provider.kx_groups = vec![kx_group::SECP521R1, kx_group::SECP384R1, kx_group::SECP256R1];
	provider.cipher_suites = vec![
		cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
		cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
		cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
	];
	Arc::new(provider)
});

pub struct TlsBumper {
	certs: Arc<CertStore>,
}

impl TlsBumper {
	pub fn new(certs: Arc<CertStore>) -> Self {
		Self { certs }
	}

	/// Mints (or reuses) the leaf for `hostname` and returns a fresh TLS
	/// server config suitable for a single hijacked connection.
	pub async fn config_for(&self, hostname: &str) -> Result<ServerConfig, IngressError> {
		let leaf = self
			.certs
			.get_or_mint(hostname)
			.await
			.map_err(|source| IngressError::SniMintFailure { host: hostname.to_string(), source })?;

		let chain = parse_cert_chain(&leaf.cert_pem);
		let key = parse_private_key(&leaf.key_pem)?;

		let mut config = ServerConfig::builder_with_provider(CONFIG_TEMPLATE.clone())
			.with_protocol_versions(&[&TLS12])
			.map_err(IngressError::Tls)?
			.with_no_client_auth()
			.with_single_cert(chain, key)
			.map_err(IngressError::Tls)?;
		config.ignore_client_order = true;
		config.alpn_protocols = vec![b"http/1.1".to_vec()];
		Ok(config)
	}
}

fn parse_cert_chain(pem: &str) -> Vec<CertificateDer<'static>> {
	let mut reader = std::io::BufReader::new(Cursor::new(pem.as_bytes()));
	rustls_pemfile::certs(&mut reader).filter_map(Result::ok).collect()
}

fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>, IngressError> {
	let mut reader = std::io::BufReader::new(Cursor::new(pem.as_bytes()));
	loop {
		match rustls_pemfile::read_one(&mut reader) {
			Ok(Some(rustls_pemfile::Item::Pkcs1Key(k))) => return Ok(PrivateKeyDer::Pkcs1(k)),
			Ok(Some(rustls_pemfile::Item::Pkcs8Key(k))) => return Ok(PrivateKeyDer::Pkcs8(k)),
			Ok(Some(rustls_pemfile::Item::Sec1Key(k))) => return Ok(PrivateKeyDer::Sec1(k)),
			Ok(Some(_)) => continue,
			Ok(None) => return Err(IngressError::Io(std::io::Error::other("no private key in leaf PEM"))),
			Err(e) => return Err(IngressError::Io(e)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn config_for_produces_a_usable_server_config() {
		let dir = tempfile::tempdir().unwrap();
		let store = Arc::new(CertStore::new(None, None, dir.path().to_path_buf()).unwrap());
		let bumper = TlsBumper::new(store);

		let config = bumper.config_for("example.com").await.unwrap();
		assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
		assert!(config.ignore_client_order);
	}

	#[test]
	fn config_template_is_ecdhe_rsa_only() {
		assert_eq!(CONFIG_TEMPLATE.cipher_suites.len(), 3);
		assert_eq!(CONFIG_TEMPLATE.kx_groups.len(), 3);
	}
}
