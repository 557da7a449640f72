//! Port through which chat generation reports progress to the caller.
use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Ksuid;

/// Progress reported while a chat response is generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The chat identifier is fixed and the client may address it.
    Stored { chat_id: Ksuid },
    /// One generated chunk, in generation order.
    Token { text: String },
}

/// The receiving side has gone away; no further events can be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event sink closed")]
pub struct EventSinkClosed;

/// Receives [`ChatEvent`]s for one request.
///
/// Implementations live on the request's own task, so the returned futures
/// need not be `Send`. Each call waits until the transport accepts the event.
#[cfg_attr(test, mockall::automock)]
#[async_trait(?Send)]
pub trait ChatEventSink {
    /// Deliver `event`, failing once the receiver has disconnected.
    async fn emit(&mut self, event: ChatEvent) -> Result<(), EventSinkClosed>;
}
