//! CLI configuration surface.
//!
//! `--mode socks` is accepted but unimplemented (reserved, per the design's
//! stated scope); `run` rejects it with `ConfigInvalid` rather than
//! silently falling back to `https` behavior.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
	Https,
	Socks,
}

#[derive(Debug, Parser, Clone)]
#[command(name = "evilproxy", about = "Intercepting HTTPS proxy for traffic research")]
pub struct Cli {
	/// Listener bind address
	#[arg(short, long, default_value = "localhost")]
	pub address: String,

	/// Listener bind port
	#[arg(short, long, default_value_t = 9001)]
	pub port: u16,

	/// Proxy mode. Only `https` is implemented; `socks` is reserved.
	#[arg(short, long, value_enum, default_value_t = Mode::Https)]
	pub mode: Mode,

	/// Path to the CA certificate (PEM)
	#[arg(short = 'c', long = "ca-cert")]
	pub ca_cert: Option<PathBuf>,

	/// Path to the CA private key (PKCS#1 PEM)
	#[arg(short = 'k', long = "ca-key")]
	pub ca_key: Option<PathBuf>,

	/// Output directory for the CA and minted leaf certificates
	#[arg(long, default_value = "./certs")]
	pub cert_dir: PathBuf,

	/// Strip Strict-Transport-Security from responses
	#[arg(long)]
	pub block_hsts: bool,

	/// Rewrite Access-Control-Allow-Origin to `*` on responses
	#[arg(long)]
	pub block_cors: bool,

	/// Strip Subresource Integrity attributes from response bodies
	#[arg(long)]
	pub block_sri: bool,

	/// Shorthand for --block-hsts --block-cors --block-sri
	#[arg(short = 'b', long)]
	pub block_all: bool,

	/// Default tracing filter, overridden by RUST_LOG when set
	#[arg(long, default_value = "info")]
	pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("--mode socks is reserved and not yet implemented")]
	SocksUnsupported,
}

/// Validated configuration derived from the raw CLI args.
#[derive(Debug, Clone)]
pub struct Config {
	pub address: String,
	pub port: u16,
	pub ca_cert: Option<PathBuf>,
	pub ca_key: Option<PathBuf>,
	pub cert_dir: PathBuf,
	pub block_hsts: bool,
	pub block_cors: bool,
	pub block_sri: bool,
}

impl TryFrom<Cli> for Config {
	type Error = ConfigError;

	fn try_from(cli: Cli) -> Result<Self, Self::Error> {
		if cli.mode == Mode::Socks {
			return Err(ConfigError::SocksUnsupported);
		}
		let block_all = cli.block_all;
		Ok(Config {
			address: cli.address,
			port: cli.port,
			ca_cert: cli.ca_cert,
			ca_key: cli.ca_key,
			cert_dir: cli.cert_dir,
			block_hsts: cli.block_hsts || block_all,
			block_cors: cli.block_cors || block_all,
			block_sri: cli.block_sri || block_all,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::Parser;

	#[test]
	fn block_all_implies_individual_flags() {
		let cli = Cli::parse_from(["evilproxy", "--block-all"]);
		let cfg = Config::try_from(cli).unwrap();
		assert!(cfg.block_hsts);
		assert!(cfg.block_cors);
		assert!(cfg.block_sri);
	}

	#[test]
	fn socks_mode_is_rejected() {
		let cli = Cli::parse_from(["evilproxy", "--mode", "socks"]);
		assert!(matches!(Config::try_from(cli), Err(ConfigError::SocksUnsupported)));
	}

	#[test]
	fn defaults_match_spec() {
		let cli = Cli::parse_from(["evilproxy"]);
		assert_eq!(cli.address, "localhost");
		assert_eq!(cli.port, 9001);
		assert_eq!(cli.cert_dir, PathBuf::from("./certs"));
	}
}
