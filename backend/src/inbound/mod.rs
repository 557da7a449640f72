//! Inbound adapters.
//!
//! The transport-neutral pipeline lives beside the actix handlers that feed
//! it: envelopes are normalised, routed and answered through a
//! [`transport::ResponseSink`], whichever way the request arrived.

pub mod dispatcher;
pub mod envelope;
pub mod http;
pub mod normalizer;
pub mod response;
pub mod router;
pub mod sse;
pub mod transport;

pub use dispatcher::Gateway;
