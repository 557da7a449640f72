//! Request middleware.
//!
//! Purpose: request lifecycle concerns that sit in front of every handler,
//! namely trace correlation and bearer identity.

pub mod identity;
pub mod trace;

pub use identity::BearerIdentity;
pub use trace::Trace;
