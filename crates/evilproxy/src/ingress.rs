//! TCP listener, CONNECT-hijack TLS bump, and plain forwarding.
//!
//! The CONNECT handler replies `200` and then hands the upgraded raw socket
//! to a TLS acceptor built from [`TlsBumper`], running a second
//! `http1::Builder::serve_connection` loop directly on the resulting
//! `TlsStream` — the same "fresh HTTP server on the hijacked socket" trick
//! the design calls for, expressed with hyper 1.x's native upgrade
//! primitive instead of a bespoke one-shot listener.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, warn};

use crate::error::IngressError;
use crate::http::{Method, Request, Response, Uri, write_all_headers};
use crate::proxycore::ProxyCore;
use crate::tls::TlsBumper;

/// Cap on a drained request/response body. The design leaves this to the
/// implementer; 16 MiB comfortably covers ordinary API/browser traffic
/// without letting a single exchange exhaust memory.
const BODY_CAP: usize = 16 * 1024 * 1024;

/// Drain interval given to in-flight exchanges after a shutdown signal,
/// before the listener forces connections closed.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

type RespBody = Full<Bytes>;

pub struct Ingress {
	address: String,
	port: u16,
	tls: Arc<TlsBumper>,
	core: Arc<ProxyCore>,
}

impl Ingress {
	pub fn new(address: String, port: u16, tls: Arc<TlsBumper>, core: Arc<ProxyCore>) -> Self {
		Self { address, port, tls, core }
	}

	/// Binds the listener and serves connections until `shutdown` resolves,
	/// then stops accepting and waits up to [`DRAIN_TIMEOUT`] for in-flight
	/// connections to finish.
	pub async fn serve(self, shutdown: impl std::future::Future<Output = ()>) -> Result<(), IngressError> {
		let listener = TcpListener::bind((self.address.as_str(), self.port)).await?;
		debug!(address = %self.address, port = self.port, "listening");

		let mut connections = tokio::task::JoinSet::new();
		tokio::pin!(shutdown);

		loop {
			tokio::select! {
				accepted = listener.accept() => {
					let (stream, peer) = accepted?;
					let tls = self.tls.clone();
					let core = self.core.clone();
					connections.spawn(async move {
						if let Err(e) = serve_outer_connection(stream, tls, core).await {
							debug!(%peer, error = %e, "connection ended");
						}
					});
				}
				_ = &mut shutdown => break,
			}
		}

		if tokio::time::timeout(DRAIN_TIMEOUT, async {
			while connections.join_next().await.is_some() {}
		})
		.await
		.is_err()
		{
			warn!("drain timeout elapsed with connections still open");
			connections.abort_all();
		}
		Ok(())
	}
}

async fn serve_outer_connection(
	stream: TcpStream,
	tls: Arc<TlsBumper>,
	core: Arc<ProxyCore>,
) -> Result<(), IngressError> {
	let io = TokioIo::new(stream);
	let service = service_fn(move |req| {
		let tls = tls.clone();
		let core = core.clone();
		async move { dispatch(req, false, tls, core).await }
	});

	http1::Builder::new()
		.serve_connection(io, service)
		.with_upgrades()
		.await?;
	Ok(())
}

/// Routes on method: `CONNECT` bumps the connection to TLS, anything else is
/// forwarded per §4.2.2.
async fn dispatch(
	req: hyper::Request<Incoming>,
	is_tls: bool,
	tls: Arc<TlsBumper>,
	core: Arc<ProxyCore>,
) -> Result<hyper::Response<RespBody>, Infallible> {
	if req.method() == Method::CONNECT {
		return Ok(handle_connect(req, tls, core).await);
	}
	Ok(forward(req, is_tls, core).await)
}

/// §4.2.1: reply `200`, then hand the upgraded socket to a TLS acceptor and
/// run a nested HTTP server on the bumped stream.
async fn handle_connect(
	req: hyper::Request<Incoming>,
	tls: Arc<TlsBumper>,
	core: Arc<ProxyCore>,
) -> hyper::Response<RespBody> {
	let hostname = match authority_host(req.uri()) {
		Some(h) => h,
		None => return status_response(400, "bad CONNECT target"),
	};

	let config = match tls.config_for(&hostname).await {
		Ok(c) => c,
		Err(e) => {
			warn!(host = %hostname, error = %e, "failed to mint TLS config for CONNECT target");
			return status_response(500, "cannot bump this connection");
		}
	};

	tokio::spawn(async move {
		let upgraded = match hyper::upgrade::on(req).await {
			Ok(u) => u,
			Err(e) => {
				error!(error = %e, "CONNECT upgrade failed");
				return;
			}
		};

		let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(config));
		let tls_stream = match acceptor.accept(TokioIo::new(upgraded)).await {
			Ok(s) => s,
			Err(e) => {
				debug!(error = %e, "TLS handshake on bumped connection failed");
				return;
			}
		};

		// Requests on the bumped stream are always plain-forwarded: a CONNECT
		// nested inside an already-terminated TLS connection isn't meaningful.
		let io = TokioIo::new(tls_stream);
		let service = service_fn(move |req| {
			let core = core.clone();
			async move { Ok::<_, Infallible>(forward(req, true, core).await) }
		});

		if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
			debug!(error = %e, "bumped connection ended");
		}
	});

	hyper::Response::builder().status(200).body(Full::new(Bytes::new())).expect("static response is valid")
}

fn status_response(code: u16, msg: &'static str) -> hyper::Response<RespBody> {
	hyper::Response::builder()
		.status(code)
		.body(Full::new(Bytes::from_static(msg.as_bytes())))
		.expect("static response is valid")
}

fn authority_host(uri: &Uri) -> Option<String> {
	uri.authority().map(|a| a.host().trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase())
}

/// §4.2.2: build the outbound request, invoke [`ProxyCore`], write the
/// response back (or `502` on failure).
async fn forward(req: hyper::Request<Incoming>, is_tls: bool, core: Arc<ProxyCore>) -> hyper::Response<RespBody> {
	let (parts, body) = req.into_parts();

	let outbound_uri = match build_outbound_uri(is_tls, &parts) {
		Ok(u) => u,
		Err(e) => {
			warn!(error = %e, "cannot resolve forwarding target");
			return status_response(400, "bad request target");
		}
	};

	let body = match Limited::new(body, BODY_CAP).collect().await {
		Ok(collected) => collected.to_bytes(),
		Err(_) => return status_response(413, "request body too large"),
	};

	let mut builder = http::Request::builder().method(parts.method).uri(outbound_uri);
	*builder.headers_mut().expect("builder has no error yet") = parts.headers;
	let outbound: Request = match builder.body(body) {
		Ok(r) => r,
		Err(e) => {
			warn!(error = %e, "malformed outbound request");
			return status_response(400, "bad request");
		}
	};

	match core.handle_request(outbound).await {
		Ok(resp) => to_hyper_response(resp),
		Err(e) => {
			warn!(error = %e, "upstream exchange failed");
			status_response(502, "bad gateway")
		}
	}
}

fn build_outbound_uri(is_tls: bool, parts: &http::request::Parts) -> Result<Uri, IngressError> {
	if parts.uri.scheme().is_some() {
		return Ok(parts.uri.clone());
	}

	let authority = parts
		.uri
		.authority()
		.cloned()
		.or_else(|| {
			parts
				.headers
				.get(http::header::HOST)
				.and_then(|h| h.to_str().ok())
				.and_then(|h| h.parse().ok())
		})
		.ok_or_else(|| IngressError::InvalidAuthority("missing Host header and no absolute target".into()))?;

	let scheme = if is_tls { "https" } else { "http" };
	let path_and_query = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

	http::Uri::builder()
		.scheme(scheme)
		.authority(authority)
		.path_and_query(path_and_query)
		.build()
		.map_err(|e| IngressError::InvalidAuthority(e.to_string()))
}

fn to_hyper_response(resp: Response) -> hyper::Response<RespBody> {
	let (parts, body) = resp.into_parts();
	let mut builder = hyper::Response::builder().status(parts.status);
	let mut headers = http::HeaderMap::new();
	write_all_headers(&mut headers, &parts.headers);
	*builder.headers_mut().expect("builder has no error yet") = headers;
	builder.body(Full::new(body)).expect("body conversion cannot fail")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn authority_host_strips_brackets_and_lowercases() {
		let uri: Uri = "example.COM:443".parse().unwrap();
		assert_eq!(authority_host(&uri).as_deref(), Some("example.com"));
	}

	#[test]
	fn absolute_form_target_is_used_as_is() {
		let parts = http::Request::builder()
			.uri("http://example.com/a?b=1")
			.body(())
			.unwrap()
			.into_parts()
			.0;
		let uri = build_outbound_uri(false, &parts).unwrap();
		assert_eq!(uri.to_string(), "http://example.com/a?b=1");
	}

	#[test]
	fn relative_target_is_resolved_from_host_header() {
		let parts = http::Request::builder()
			.uri("/a")
			.header(http::header::HOST, "example.com")
			.body(())
			.unwrap()
			.into_parts()
			.0;
		let uri = build_outbound_uri(true, &parts).unwrap();
		assert_eq!(uri.to_string(), "https://example.com/a");
	}
}
