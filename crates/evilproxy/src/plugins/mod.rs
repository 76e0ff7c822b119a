//! Built-in pipeline plugins.

mod cors;
mod hsts;
mod logger;
mod sri;

pub use cors::Cors;
pub use hsts::Hsts;
pub use logger::RequestLogger;
pub use sri::Sri;
