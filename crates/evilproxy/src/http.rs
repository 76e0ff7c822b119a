//! Request/response types and small header utilities shared by the proxy.
//!
//! Bodies are drained to `Bytes` by the ingress layer before a request ever
//! reaches the pipeline (see `proxycore`): plugins only ever see complete
//! bodies, never a stream. `http::HeaderMap` already gives us case-insensitive
//! lookup with ordered multi-values per key, so no bespoke header-map type is
//! needed.

use bytes::Bytes;
pub use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header};

pub type Request = http::Request<Bytes>;
pub type Response = http::Response<Bytes>;

/// Returns the lowercased hostname from a request's URI authority, with any
/// port stripped.
pub fn host_of(uri: &Uri) -> Option<String> {
	uri.host().map(|h| strip_brackets(h).to_ascii_lowercase())
}

fn strip_brackets(host: &str) -> &str {
	host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host)
}

/// Writes every value for every header in `from` onto `headers`, in order.
///
/// This is the §4.2.2 divergence from a naive reimplementation: the source
/// this proxy is modeled on calls `Set` in a loop, which clobbers all but
/// the last value for a repeated header. We emit all values: `insert` for
/// the first occurrence of a name, `append` for the rest.
pub fn write_all_headers(dest: &mut HeaderMap, from: &HeaderMap) {
	let mut seen = HeaderMap::new();
	for (name, value) in from.iter() {
		if seen.get(name).is_none() {
			dest.insert(name.clone(), value.clone());
		} else {
			dest.append(name.clone(), value.clone());
		}
		seen.insert(name.clone(), HeaderValue::from_static(""));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn host_of_strips_port() {
		let uri: Uri = "https://Example.COM:8443/a".parse().unwrap();
		assert_eq!(host_of(&uri).as_deref(), Some("example.com"));
	}

	#[test]
	fn write_all_headers_preserves_multi_values() {
		let mut from = HeaderMap::new();
		from.append(header::SET_COOKIE, HeaderValue::from_static("a=1"));
		from.append(header::SET_COOKIE, HeaderValue::from_static("b=2"));

		let mut dest = HeaderMap::new();
		write_all_headers(&mut dest, &from);

		let values: Vec<_> = dest.get_all(header::SET_COOKIE).iter().collect();
		assert_eq!(values.len(), 2);
		assert_eq!(values[0], "a=1");
		assert_eq!(values[1], "b=2");
	}
}
