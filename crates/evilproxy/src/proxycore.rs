//! Wires an inbound request through the pipeline and a [`Backend`].
//!
//! Bodies already arrive as `Bytes` — the ingress layer drains and caps them
//! before a request is ever built — so there's no separate drain/reconstitute
//! step here; the pipeline stages operate directly on the request/response
//! in place.

use std::sync::Arc;

use crate::backend::Backend;
use crate::error::ProxyError;
use crate::http::{Request, Response};
use crate::pipeline::Pipeline;

pub struct ProxyCore {
	pipeline: Pipeline,
	backend: Arc<dyn Backend>,
}

impl ProxyCore {
	pub fn new(pipeline: Pipeline, backend: Arc<dyn Backend>) -> Self {
		Self { pipeline, backend }
	}

	pub async fn handle_request(&self, req: Request) -> Result<Response, ProxyError> {
		let (mut parts, mut body) = req.into_parts();
		self.pipeline.request(&mut parts.headers, &mut body);
		let req = Request::from_parts(parts, body);

		let resp = self.backend.request(req).await?;

		let (mut parts, mut body) = resp.into_parts();
		self.pipeline.response(&mut parts.headers, &mut body);
		Ok(Response::from_parts(parts, body))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::http::{HeaderValue, Method, header};
	use crate::pipeline::{Capabilities, Plugin};
	use async_trait::async_trait;
	use bytes::Bytes;

	struct Echo;

	#[async_trait]
	impl Backend for Echo {
		async fn request(&self, req: Request) -> Result<Response, ProxyError> {
			Ok(http::Response::builder().status(200).body(req.into_body())?)
		}
	}

	struct Tagger;
	impl Plugin for Tagger {
		fn capabilities(&self) -> Capabilities {
			Capabilities::REQUEST_HEADER | Capabilities::RESPONSE_HEADER
		}
		fn process_request_header(&self, headers: &mut crate::http::HeaderMap) {
			headers.insert(header::VIA, HeaderValue::from_static("evilproxy-req"));
		}
		fn process_response_header(&self, headers: &mut crate::http::HeaderMap) {
			headers.insert(header::VIA, HeaderValue::from_static("evilproxy-resp"));
		}
	}

	#[tokio::test]
	async fn request_then_backend_then_response_runs_in_order() {
		let mut pipeline = Pipeline::new();
		pipeline.bind(Arc::new(Tagger));
		let core = ProxyCore::new(pipeline, Arc::new(Echo));

		let req = http::Request::builder()
			.method(Method::GET)
			.uri("https://example.com/")
			.body(Bytes::new())
			.unwrap();

		let resp = core.handle_request(req).await.unwrap();
		assert_eq!(resp.headers().get(header::VIA).unwrap(), "evilproxy-resp");
	}
}
