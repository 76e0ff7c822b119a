//! Strips Subresource Integrity attributes from response bodies.
//!
//! Operates on raw bytes via `regex::bytes` rather than parsing HTML — the
//! pattern is applied to any response body regardless of content type, per
//! the reference behavior this plugin has always had.

use std::sync::LazyLock;

use bytes::Bytes;
use regex::bytes::Regex;
use tracing::debug;

use crate::http::HeaderMap;
use crate::pipeline::{Capabilities, Plugin};

static SRI_PATTERN: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r#"integrity="[A-Za-z0-9+/\-]+"\s*"#).expect("valid regex"));

pub struct Sri;

impl Plugin for Sri {
	fn capabilities(&self) -> Capabilities {
		Capabilities::RESPONSE_BODY
	}

	fn process_response_body(&self, _headers: &HeaderMap, body: &mut Bytes) {
		let replaced = SRI_PATTERN.replace_all(body, &b""[..]);
		if let std::borrow::Cow::Owned(bytes) = replaced {
			debug!("stripped SRI attribute(s)");
			*body = Bytes::from(bytes);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn strips_integrity_attribute_and_trailing_whitespace() {
		let mut body = Bytes::from_static(
			b"<script integrity=\"sha384-abc123+/\"   src=\"x.js\"></script>",
		);
		let headers = HeaderMap::new();

		Sri.process_response_body(&headers, &mut body);

		assert_eq!(&body[..], &b"<script src=\"x.js\"></script>"[..]);
	}

	#[test]
	fn idempotent_when_no_integrity_attribute() {
		let mut body = Bytes::from_static(b"<script src=\"x.js\"></script>");
		let headers = HeaderMap::new();

		Sri.process_response_body(&headers, &mut body);
		let first = body.clone();
		Sri.process_response_body(&headers, &mut body);

		assert_eq!(body, first);
	}
}
