//! Intercepting HTTPS proxy: TLS-bumps CONNECT tunnels with certificates
//! minted by a local CA, then runs the plaintext exchange through a plugin
//! pipeline before re-originating it upstream.

pub mod backend;
pub mod certstore;
pub mod config;
pub mod error;
pub mod http;
pub mod ingress;
pub mod pipeline;
pub mod plugins;
pub mod proxycore;
pub mod tls;

pub use backend::{Backend, ReqwestBackend};
pub use certstore::CertStore;
pub use config::{Cli, Config, ConfigError};
pub use ingress::Ingress;
pub use pipeline::{Capabilities, Pipeline, Plugin};
pub use proxycore::ProxyCore;
pub use tls::TlsBumper;
