//! Gemini REST adapter for the language model port.

mod dto;
mod event_lines;
mod http_model;

pub use http_model::{DEFAULT_BASE_URL, DEFAULT_MODEL, GeminiModel, GeminiSetupError};
