//! Adapters implementing the domain ports.

pub mod firebase;
pub mod gemini;
pub mod memory;
pub mod persistence;
pub mod postgres;
