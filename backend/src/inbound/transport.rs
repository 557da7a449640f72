//! Transport-facing response sinks.
//!
//! The pipeline writes a response as one head followed by body chunks. A
//! [`BufferedSink`] collects everything for envelopes that answer with a
//! single document; a [`ChannelSink`] forwards each chunk to the HTTP
//! connection as soon as it is written.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// A head with `status` and no headers yet.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    /// Append one header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// The client is gone; nothing more can be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("client disconnected")]
pub struct TransportClosed;

/// Destination of one response.
///
/// `start` is called exactly once, before any body chunk. The final chunk
/// is sent with `more == false`.
#[async_trait(?Send)]
pub trait ResponseSink {
    /// Send the status and headers.
    async fn start(&mut self, head: ResponseHead) -> Result<(), TransportClosed>;

    /// Send one body chunk.
    async fn send_body(&mut self, chunk: Bytes, more: bool) -> Result<(), TransportClosed>;
}

/// Sink that gathers the full response in memory.
#[derive(Debug, Default)]
pub struct BufferedSink {
    head: Option<ResponseHead>,
    body: BytesMut,
    complete: bool,
}

impl BufferedSink {
    /// The head, once started.
    pub fn head(&self) -> Option<&ResponseHead> {
        self.head.as_ref()
    }

    /// Whether the final chunk has been written.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Consume the sink, yielding the head and the concatenated body.
    pub fn into_parts(self) -> (Option<ResponseHead>, Bytes) {
        (self.head, self.body.freeze())
    }
}

#[async_trait(?Send)]
impl ResponseSink for BufferedSink {
    async fn start(&mut self, head: ResponseHead) -> Result<(), TransportClosed> {
        self.head = Some(head);
        Ok(())
    }

    async fn send_body(&mut self, chunk: Bytes, more: bool) -> Result<(), TransportClosed> {
        self.body.extend_from_slice(&chunk);
        self.complete = !more;
        Ok(())
    }
}

/// Sink that hands the head and each chunk to a live connection.
///
/// Body chunks travel through a bounded channel, so a slow client applies
/// backpressure to the producer rather than growing a buffer.
#[derive(Debug)]
pub struct ChannelSink {
    head: Option<oneshot::Sender<ResponseHead>>,
    body: Option<mpsc::Sender<Bytes>>,
}

/// Receiving ends of a [`ChannelSink`].
#[derive(Debug)]
pub struct ChannelReceivers {
    pub head: oneshot::Receiver<ResponseHead>,
    pub body: mpsc::Receiver<Bytes>,
}

impl ChannelSink {
    /// Create a sink whose body channel holds up to `capacity` chunks.
    pub fn new(capacity: usize) -> (Self, ChannelReceivers) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                head: Some(head_tx),
                body: Some(body_tx),
            },
            ChannelReceivers {
                head: head_rx,
                body: body_rx,
            },
        )
    }
}

#[async_trait(?Send)]
impl ResponseSink for ChannelSink {
    async fn start(&mut self, head: ResponseHead) -> Result<(), TransportClosed> {
        let sender = self.head.take().ok_or(TransportClosed)?;
        sender.send(head).map_err(|_| TransportClosed)
    }

    async fn send_body(&mut self, chunk: Bytes, more: bool) -> Result<(), TransportClosed> {
        let body = self.body.as_ref().ok_or(TransportClosed)?;
        if !chunk.is_empty() {
            body.send(chunk).await.map_err(|_| TransportClosed)?;
        }
        if !more {
            // Dropping the sender ends the response body.
            self.body = None;
        }
        Ok(())
    }
}
