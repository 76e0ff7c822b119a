//! Binary entry point: parse CLI args, build the proxy's components, serve
//! until `SIGINT`/`SIGTERM`, then drain.

use std::sync::Arc;

use clap::Parser;
use evilproxy::{Backend, CertStore, Cli, Config, Ingress, Pipeline, Plugin, ProxyCore, ReqwestBackend, TlsBumper};
use evilproxy::plugins::{Cors, Hsts, RequestLogger, Sri};
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	agent_core::telemetry::init_tracing(&cli.log_level);

	let config: Config = cli.try_into()?;

	let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
	match runtime.block_on(run(config)) {
		Ok(()) => Ok(()),
		Err(e) => {
			error!(error = %e, "fatal startup error");
			std::process::exit(1);
		}
	}
}

async fn run(config: Config) -> anyhow::Result<()> {
	let certs = Arc::new(CertStore::new(config.ca_cert.clone(), config.ca_key.clone(), config.cert_dir.clone())?);
	let tls = Arc::new(TlsBumper::new(certs));

	let mut pipeline = Pipeline::new();
	let plugins: Vec<Arc<dyn Plugin>> = build_plugins(&config);
	for plugin in plugins {
		pipeline.bind(plugin);
	}

	let backend: Arc<dyn Backend> = Arc::new(ReqwestBackend::new()?);
	let core = Arc::new(ProxyCore::new(pipeline, backend));

	info!(address = %config.address, port = config.port, "starting evilproxy");
	let ingress = Ingress::new(config.address, config.port, tls, core);
	ingress.serve(shutdown_signal()).await?;

	info!("shutdown complete");
	Ok(())
}

fn build_plugins(config: &Config) -> Vec<Arc<dyn Plugin>> {
	let mut plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(RequestLogger)];
	if config.block_hsts {
		plugins.push(Arc::new(Hsts));
	}
	if config.block_cors {
		plugins.push(Arc::new(Cors::new("*")));
	}
	if config.block_sri {
		plugins.push(Arc::new(Sri));
	}
	plugins
}

async fn shutdown_signal() {
	let ctrl_c = async {
		tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
			.recv()
			.await;
	};
	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => info!("received SIGINT"),
		_ = terminate => info!("received SIGTERM"),
	}
}
