//! Error taxonomy for the proxy's components.
//!
//! Each component gets its own `thiserror` enum, matching the kinds named in
//! the design's error-handling section. Construction-time failures
//! (`CertError`, bind errors) are fatal to the process; per-exchange errors
//! (`ProxyError`, `IngressError`) are never fatal to the listener.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CertError {
	#[error("CA material at {path} is not a valid certificate/key pair: {source}")]
	CaInvalid {
		path: PathBuf,
		#[source]
		source: anyhow::Error,
	},
	#[error("failed to persist certificate material under {path}: {source}")]
	CannotPersist {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("certificate signing failed: {0}")]
	CryptoFailure(#[from] rcgen::Error),
	#[error("RSA key generation failed: {0}")]
	RsaKeygen(String),
	#[error("mint failed: {0}")]
	MintFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
	#[error("the HTTP server cannot hijack this connection")]
	HijackUnavailable,
	#[error("failed to mint a certificate for SNI {host}: {source}")]
	SniMintFailure {
		host: String,
		#[source]
		source: CertError,
	},
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("tls handshake failed: {0}")]
	Tls(#[from] rustls::Error),
	#[error("hyper error: {0}")]
	Hyper(#[from] hyper::Error),
	#[error("invalid CONNECT target: {0}")]
	InvalidAuthority(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
	#[error("upstream request failed: {0}")]
	UpstreamFailure(#[from] reqwest::Error),
	#[error("request body exceeded the {limit}-byte drain cap")]
	RequestTooLarge { limit: usize },
	#[error("client disconnected mid-exchange")]
	ClientAborted,
	#[error("malformed request: {0}")]
	InvalidRequest(String),
	#[error("http error: {0}")]
	Http(#[from] http::Error),
}
