//! Pass-through exchange logger.
//!
//! The reference source's `Logger` plugin was a no-op stub (`ProcessRequest`/
//! `ProcessResponse` returned their arguments unchanged and logged nothing) —
//! this is the ambient observability layer a Non-goal doesn't exclude, so it
//! earns a real body here. It never mutates headers or bodies; it only emits
//! `tracing` events. The pipeline stage signatures only carry headers and
//! bodies (method/URI/status live on the `Request`/`Response` the pipeline
//! doesn't see), so this plugin reports what's visible at each stage: the
//! `Host` header and header count on the way in, header count and body size
//! on the way out.

use bytes::Bytes;
use tracing::debug;

use crate::http::{HeaderMap, header};
use crate::pipeline::{Capabilities, Plugin};

pub struct RequestLogger;

impl Plugin for RequestLogger {
	fn capabilities(&self) -> Capabilities {
		Capabilities::REQUEST_HEADER | Capabilities::RESPONSE_HEADER | Capabilities::RESPONSE_BODY
	}

	fn process_request_header(&self, headers: &mut HeaderMap) {
		let host = headers.get(header::HOST).and_then(|v| v.to_str().ok()).unwrap_or("-");
		debug!(host, header_count = headers.len(), "request");
	}

	fn process_response_header(&self, headers: &mut HeaderMap) {
		debug!(header_count = headers.len(), "response headers");
	}

	fn process_response_body(&self, _headers: &HeaderMap, body: &mut Bytes) {
		debug!(bytes = body.len(), "response body");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::http::HeaderValue;

	#[test]
	fn never_mutates_headers_or_body() {
		let mut headers = HeaderMap::new();
		headers.insert(header::HOST, HeaderValue::from_static("example.com"));
		let original = headers.clone();
		let mut body = Bytes::from_static(b"payload");
		let original_body = body.clone();

		RequestLogger.process_request_header(&mut headers);
		RequestLogger.process_response_header(&mut headers);
		RequestLogger.process_response_body(&headers, &mut body);

		assert_eq!(headers, original);
		assert_eq!(body, original_body);
	}
}
