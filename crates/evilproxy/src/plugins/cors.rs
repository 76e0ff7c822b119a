//! Rewrites (or strips) `Access-Control-Allow-Origin` on responses.
//!
//! Only touches the header when it's already present — this plugin never
//! grants CORS access a response didn't already offer, it just replaces the
//! origin with `value` (or deletes the header if `value` is empty).

use tracing::debug;

use crate::http::{HeaderMap, HeaderValue, header};
use crate::pipeline::{Capabilities, Plugin};

pub struct Cors {
	value: String,
}

impl Cors {
	pub fn new(value: impl Into<String>) -> Self {
		Self { value: value.into() }
	}
}

impl Plugin for Cors {
	fn capabilities(&self) -> Capabilities {
		Capabilities::RESPONSE_HEADER
	}

	fn process_response_header(&self, headers: &mut HeaderMap) {
		if !headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN) {
			return;
		}
		debug!(target = %self.value, "rewriting Access-Control-Allow-Origin");
		if self.value.is_empty() {
			headers.remove(header::ACCESS_CONTROL_ALLOW_ORIGIN);
		} else if let Ok(v) = HeaderValue::from_str(&self.value) {
			headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, v);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rewrites_existing_header_to_target() {
		let mut headers = HeaderMap::new();
		headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("https://a.example"));

		Cors::new("*").process_response_header(&mut headers);

		assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
	}

	#[test]
	fn does_not_add_header_when_absent() {
		let mut headers = HeaderMap::new();
		Cors::new("*").process_response_header(&mut headers);
		assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
	}

	#[test]
	fn empty_target_deletes_header() {
		let mut headers = HeaderMap::new();
		headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("https://a.example"));

		Cors::new("").process_response_header(&mut headers);

		assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
	}
}
