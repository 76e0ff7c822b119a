//! Strips `Strict-Transport-Security` from responses so a bumped client
//! doesn't remember to demand TLS on a host the operator wants to keep
//! downgradable.

use tracing::debug;

use crate::http::{HeaderMap, header};
use crate::pipeline::{Capabilities, Plugin};

pub struct Hsts;

impl Plugin for Hsts {
	fn capabilities(&self) -> Capabilities {
		Capabilities::RESPONSE_HEADER
	}

	fn process_response_header(&self, headers: &mut HeaderMap) {
		if headers.remove(header::STRICT_TRANSPORT_SECURITY).is_some() {
			debug!("stripped Strict-Transport-Security");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::http::HeaderValue;

	#[test]
	fn strips_hsts_when_present() {
		let mut headers = HeaderMap::new();
		headers.insert(header::STRICT_TRANSPORT_SECURITY, HeaderValue::from_static("max-age=31536000"));

		Hsts.process_response_header(&mut headers);

		assert!(!headers.contains_key(header::STRICT_TRANSPORT_SECURITY));
	}

	#[test]
	fn idempotent_when_absent() {
		let mut headers = HeaderMap::new();
		Hsts.process_response_header(&mut headers);
		Hsts.process_response_header(&mut headers);
		assert!(headers.is_empty());
	}
}
