//! Ordered dispatch of `(headers, body)` through bound plugins.
//!
//! A plugin declares which stages it participates in via [`Capabilities`]
//! rather than being downcast at dispatch time — `bind` inspects the flags
//! once and the pipeline never needs `Any`. This mirrors the original
//! source's `PluginManager.Bind`, which type-asserts a handler against four
//! interfaces and appends it to whichever lists match; the Rust version
//! collapses those four lists into one bind-ordered `Vec` filtered per stage,
//! which preserves the same per-capability ordering with less bookkeeping.

use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use bytes::Bytes;

use crate::http::HeaderMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities(u8);

impl Capabilities {
	pub const NONE: Capabilities = Capabilities(0);
	pub const REQUEST_HEADER: Capabilities = Capabilities(1 << 0);
	pub const REQUEST_BODY: Capabilities = Capabilities(1 << 1);
	pub const RESPONSE_HEADER: Capabilities = Capabilities(1 << 2);
	pub const RESPONSE_BODY: Capabilities = Capabilities(1 << 3);

	pub fn contains(self, other: Capabilities) -> bool {
		self.0 & other.0 == other.0
	}
}

impl BitOr for Capabilities {
	type Output = Capabilities;
	fn bitor(self, rhs: Capabilities) -> Capabilities {
		Capabilities(self.0 | rhs.0)
	}
}

impl BitOrAssign for Capabilities {
	fn bitor_assign(&mut self, rhs: Capabilities) {
		self.0 |= rhs.0;
	}
}

/// A pipeline stage. Implementers declare, via [`Plugin::capabilities`],
/// which of the four `process_*` methods they actually use; the default
/// bodies of the rest are never called.
pub trait Plugin: Send + Sync {
	fn capabilities(&self) -> Capabilities;

	fn process_request_header(&self, _headers: &mut HeaderMap) {}
	fn process_request_body(&self, _headers: &HeaderMap, _body: &mut Bytes) {}
	fn process_response_header(&self, _headers: &mut HeaderMap) {}
	fn process_response_body(&self, _headers: &HeaderMap, _body: &mut Bytes) {}
}

/// Bind-ordered plugin registry. `request`/`response` fold over the bound
/// plugins strictly sequentially; mutations from one stage are visible to
/// the next.
#[derive(Default, Clone)]
pub struct Pipeline {
	plugins: Vec<Arc<dyn Plugin>>,
}

impl Pipeline {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends `plugin` to the bind order. A plugin with `Capabilities::NONE`
	/// is accepted but never invoked.
	pub fn bind(&mut self, plugin: Arc<dyn Plugin>) {
		self.plugins.push(plugin);
	}

	pub fn request(&self, headers: &mut HeaderMap, body: &mut Bytes) {
		for plugin in &self.plugins {
			let caps = plugin.capabilities();
			if caps.contains(Capabilities::REQUEST_HEADER) {
				plugin.process_request_header(headers);
			}
			if caps.contains(Capabilities::REQUEST_BODY) {
				plugin.process_request_body(headers, body);
			}
		}
	}

	pub fn response(&self, headers: &mut HeaderMap, body: &mut Bytes) {
		for plugin in &self.plugins {
			let caps = plugin.capabilities();
			if caps.contains(Capabilities::RESPONSE_HEADER) {
				plugin.process_response_header(headers);
			}
			if caps.contains(Capabilities::RESPONSE_BODY) {
				plugin.process_response_body(headers, body);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::http::{HeaderValue, header};
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct Tagger(&'static str, Arc<std::sync::Mutex<Vec<&'static str>>>);

	impl Plugin for Tagger {
		fn capabilities(&self) -> Capabilities {
			Capabilities::RESPONSE_HEADER
		}
		fn process_response_header(&self, _headers: &mut HeaderMap) {
			self.1.lock().unwrap().push(self.0);
		}
	}

	#[test]
	fn stages_run_in_bind_order() {
		let order = Arc::new(std::sync::Mutex::new(Vec::new()));
		let mut pipeline = Pipeline::new();
		pipeline.bind(Arc::new(Tagger("first", order.clone())));
		pipeline.bind(Arc::new(Tagger("second", order.clone())));

		let mut headers = HeaderMap::new();
		let mut body = Bytes::new();
		pipeline.response(&mut headers, &mut body);

		assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
	}

	struct CountingPlugin(AtomicUsize);

	impl Plugin for CountingPlugin {
		fn capabilities(&self) -> Capabilities {
			Capabilities::REQUEST_HEADER | Capabilities::RESPONSE_HEADER
		}
		fn process_request_header(&self, headers: &mut HeaderMap) {
			self.0.fetch_add(1, Ordering::SeqCst);
			headers.insert(header::VIA, HeaderValue::from_static("evilproxy"));
		}
	}

	#[test]
	fn unbound_capabilities_are_never_invoked() {
		let plugin = Arc::new(CountingPlugin(AtomicUsize::new(0)));
		let mut pipeline = Pipeline::new();
		pipeline.bind(plugin.clone());

		let mut headers = HeaderMap::new();
		let mut body = Bytes::new();
		pipeline.request(&mut headers, &mut body);
		pipeline.response(&mut headers, &mut body);

		assert_eq!(plugin.0.load(Ordering::SeqCst), 1);
		assert_eq!(headers.get(header::VIA).unwrap(), "evilproxy");
	}
}
