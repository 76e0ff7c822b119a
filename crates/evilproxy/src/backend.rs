//! Pluggable upstream client.
//!
//! The reference `Backend` just re-originates the request via `reqwest`
//! honouring the system trust roots; tests substitute a deterministic
//! `Arc<dyn Backend>` instead of hitting the network.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ProxyError;
use crate::http::{Request, Response};

#[async_trait]
pub trait Backend: Send + Sync {
	async fn request(&self, req: Request) -> Result<Response, ProxyError>;
}

/// `reqwest`-backed reference implementation. Built once at startup and
/// cloned per exchange — `reqwest::Client` is `Arc`-backed internally, so
/// cloning is cheap and shares the connection pool.
#[derive(Clone)]
pub struct ReqwestBackend {
	client: reqwest::Client,
}

impl ReqwestBackend {
	pub fn new() -> Result<Self, ProxyError> {
		let client = reqwest::Client::builder().build()?;
		Ok(Self { client })
	}
}

impl Default for ReqwestBackend {
	fn default() -> Self {
		Self::new().expect("default reqwest client configuration is always valid")
	}
}

#[async_trait]
impl Backend for ReqwestBackend {
	async fn request(&self, req: Request) -> Result<Response, ProxyError> {
		let (parts, body) = req.into_parts();
		let uri = parts.uri.to_string();

		let mut outbound = self.client.request(parts.method, uri).body(body);
		for (name, value) in parts.headers.iter() {
			outbound = outbound.header(name, value);
		}

		let resp = outbound.send().await?;
		let status = resp.status();
		let headers = resp.headers().clone();
		let body = resp.bytes().await?;

		let mut builder = http::Response::builder().status(status);
		*builder.headers_mut().expect("builder has no error yet") = headers;
		Ok(builder.body(body)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::http::Method;

	struct Echo;

	#[async_trait]
	impl Backend for Echo {
		async fn request(&self, req: Request) -> Result<Response, ProxyError> {
			Ok(http::Response::builder().status(200).body(req.into_body())?)
		}
	}

	#[tokio::test]
	async fn trait_object_is_substitutable_for_tests() {
		let backend: std::sync::Arc<dyn Backend> = std::sync::Arc::new(Echo);
		let req = http::Request::builder()
			.method(Method::GET)
			.uri("https://example.com/")
			.body(Bytes::from_static(b"hi"))
			.unwrap();

		let resp = backend.request(req).await.unwrap();
		assert_eq!(resp.status(), 200);
		assert_eq!(resp.body(), &Bytes::from_static(b"hi"));
	}
}
