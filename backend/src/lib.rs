//! Gateway library modules.
//!
//! A multi-tenant gateway over users' external SQL databases: connector
//! records, schema inspection, ad-hoc queries and LLM-backed chats, served
//! over a proxy event surface and a streaming HTTP surface.

pub mod domain;
pub mod inbound;
pub mod middleware;
pub mod outbound;
pub mod settings;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use middleware::Trace;
