//! Server-sent event framing and stream lifecycle.
//!
//! [`SseEvent`] renders one frame: optional comment, `event`, `id` and
//! `retry` lines, then one `data` line per payload line, then a blank line.
//! JSON payloads are written with `", "` and `": "` separators so frames
//! read the same as those produced by the web clients' reference fixtures.
//!
//! [`SseStream`] drives a [`ResponseSink`] through
//! `NotStarted -> Streaming -> Finished`; operations out of that order are
//! rejected with [`StreamError::InvalidState`] instead of writing bytes.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::domain::ports::{ChatEvent, ChatEventSink, EventSinkClosed};
use crate::inbound::response::CORS_HEADERS;
use crate::inbound::transport::{ResponseHead, ResponseSink, TransportClosed};

/// Headers sent when a stream starts, before the CORS set.
pub const STREAM_HEADERS: [(&str, &str); 4] = [
    ("content-type", "text/event-stream"),
    ("cache-control", "no-cache, no-transform"),
    ("connection", "keep-alive"),
    ("x-accel-buffering", "no"),
];

/// JSON formatter that puts a space after `,` and `:`.
#[derive(Debug, Default, Clone, Copy)]
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Serialise `value` on one line with spaced separators.
///
/// # Examples
/// ```
/// use gateway::inbound::sse::to_spaced_json;
/// use serde_json::json;
///
/// assert_eq!(to_spaced_json(&json!({"a": [1, 2]})), r#"{"a": [1, 2]}"#);
/// ```
pub fn to_spaced_json(value: &Value) -> String {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    // Writing a `Value` into a Vec cannot fail.
    if value.serialize(&mut serializer).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Payload of one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SseData {
    /// Sent as-is, split on newlines.
    Text(String),
    /// Serialised to JSON first.
    Json(Value),
}

/// One server-sent event frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    comment: Option<String>,
    event: Option<String>,
    id: Option<String>,
    retry_ms: Option<u64>,
    data: Option<SseData>,
}

impl SseEvent {
    /// A frame with event type `event`.
    pub fn named(event: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            ..Self::default()
        }
    }

    /// A comment-only frame, as used for keep-alive pings.
    pub fn comment(text: impl Into<String>) -> Self {
        Self {
            comment: Some(text.into()),
            ..Self::default()
        }
    }

    /// Attach a JSON payload.
    #[must_use]
    pub fn json(mut self, data: Value) -> Self {
        self.data = Some(SseData::Json(data));
        self
    }

    /// Attach a text payload.
    #[must_use]
    pub fn text(mut self, data: impl Into<String>) -> Self {
        self.data = Some(SseData::Text(data.into()));
        self
    }

    /// Attach an event id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Ask the client to wait `retry_ms` before reconnecting.
    #[must_use]
    pub fn retry(mut self, retry_ms: u64) -> Self {
        self.retry_ms = Some(retry_ms);
        self
    }

    /// Render the frame.
    ///
    /// # Examples
    /// ```
    /// use gateway::inbound::sse::SseEvent;
    /// use serde_json::json;
    ///
    /// let frame = SseEvent::named("token").json(json!({"t": "hi"})).encode();
    /// assert_eq!(&frame[..], b"event: token\ndata: {\"t\": \"hi\"}\n\n");
    /// ```
    pub fn encode(&self) -> Bytes {
        let mut out = String::new();
        let mut line = |field: &str, value: &str| {
            out.push_str(field);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        };
        if let Some(comment) = &self.comment {
            line("", comment);
        }
        if let Some(event) = self.event.as_deref().filter(|event| !event.is_empty()) {
            line("event", event);
        }
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            line("id", id);
        }
        if let Some(retry_ms) = self.retry_ms {
            line("retry", &retry_ms.to_string());
        }
        if let Some(data) = &self.data {
            let rendered = match data {
                SseData::Text(text) => text.clone(),
                SseData::Json(value) => to_spaced_json(value),
            };
            for data_line in rendered.split('\n') {
                line("data", data_line);
            }
        }
        out.push('\n');
        Bytes::from(out)
    }
}

/// Lifecycle position of an [`SseStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    NotStarted,
    Streaming,
    Finished,
}

/// Failures raised while streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The operation is not valid in the stream's current state.
    #[error("stream operation invalid in state {state:?}")]
    InvalidState { state: StreamState },
    /// The client disconnected.
    #[error(transparent)]
    Closed(#[from] TransportClosed),
}

/// Event stream written to one response sink.
pub struct SseStream<'a> {
    sink: &'a mut dyn ResponseSink,
    state: StreamState,
}

impl<'a> SseStream<'a> {
    /// Wrap `sink`; nothing is written until [`SseStream::start`].
    pub fn new(sink: &'a mut dyn ResponseSink) -> Self {
        Self {
            sink,
            state: StreamState::NotStarted,
        }
    }

    /// Current lifecycle position.
    pub fn state(&self) -> StreamState {
        self.state
    }

    fn expect_state(&self, expected: StreamState) -> Result<(), StreamError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(StreamError::InvalidState { state: self.state })
        }
    }

    /// Send the 200 head with stream and CORS headers.
    pub async fn start(&mut self) -> Result<(), StreamError> {
        self.expect_state(StreamState::NotStarted)?;
        let head = STREAM_HEADERS
            .iter()
            .chain(CORS_HEADERS.iter())
            .fold(ResponseHead::new(200), |head, (name, value)| {
                head.with_header(*name, *value)
            });
        self.sink.start(head).await?;
        self.state = StreamState::Streaming;
        Ok(())
    }

    /// Write one frame.
    pub async fn send(&mut self, event: &SseEvent) -> Result<(), StreamError> {
        self.expect_state(StreamState::Streaming)?;
        self.sink.send_body(event.encode(), true).await?;
        Ok(())
    }

    /// Write the `done` frame and close the body.
    pub async fn finish(&mut self) -> Result<(), StreamError> {
        self.expect_state(StreamState::Streaming)?;
        self.state = StreamState::Finished;
        self.sink
            .send_body(SseEvent::named("done").json(json!({})).encode(), true)
            .await?;
        self.sink.send_body(Bytes::new(), false).await?;
        Ok(())
    }

    /// Report `message` in an `error` frame, then finish.
    pub async fn fail(&mut self, message: &str) -> Result<(), StreamError> {
        let reported = self
            .send(&SseEvent::named("error").json(json!({ "message": message })))
            .await;
        let finished = self.finish().await;
        reported.and(finished)
    }
}

#[async_trait(?Send)]
impl ChatEventSink for SseStream<'_> {
    async fn emit(&mut self, event: ChatEvent) -> Result<(), EventSinkClosed> {
        let frame = match event {
            ChatEvent::Stored { chat_id } => {
                SseEvent::named("stored").json(json!({ "chat_id": chat_id }))
            }
            ChatEvent::Token { text } => SseEvent::named("token").json(json!({ "t": text })),
        };
        self.send(&frame).await.map_err(|err| {
            debug!(error = %err, "chat event not delivered");
            EventSinkClosed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Ksuid;
    use crate::test_support::RecordingResponseSink;
    use rstest::rstest;

    #[rstest]
    #[case(SseEvent::named("token").json(json!({"t": "hi"})), "event: token\ndata: {\"t\": \"hi\"}\n\n")]
    #[case(SseEvent::comment("ping"), ": ping\n\n")]
    #[case(SseEvent::named("note").text("a\nb"), "event: note\ndata: a\ndata: b\n\n")]
    #[case(
        SseEvent::named("tick").id("7").retry(1500).text("x"),
        "event: tick\nid: 7\nretry: 1500\ndata: x\n\n"
    )]
    #[case(SseEvent::named("").id("").text(""), "data: \n\n")]
    fn frames_render_exactly(#[case] event: SseEvent, #[case] expected: &str) {
        assert_eq!(String::from_utf8_lossy(&event.encode()), expected);
    }

    #[test]
    fn spaced_json_keeps_unicode() {
        assert_eq!(
            to_spaced_json(&json!({"k": ["é", null, {"n": 1.5}]})),
            r#"{"k": ["é", null, {"n": 1.5}]}"#
        );
    }

    #[tokio::test]
    async fn lifecycle_writes_head_frames_and_terminal_chunk() {
        let mut sink = RecordingResponseSink::default();
        let mut stream = SseStream::new(&mut sink);
        stream.start().await.expect("start");
        stream
            .send(&SseEvent::named("token").json(json!({"t": "hi"})))
            .await
            .expect("send");
        stream.finish().await.expect("finish");
        assert_eq!(stream.state(), StreamState::Finished);

        let head = sink.head.as_ref().expect("started");
        assert_eq!(head.status, 200);
        assert_eq!(head.header("content-type"), Some("text/event-stream"));
        assert_eq!(head.header("access-control-allow-origin"), Some("*"));
        assert_eq!(
            sink.body_text(),
            "event: token\ndata: {\"t\": \"hi\"}\n\nevent: done\ndata: {}\n\n"
        );
        assert!(sink.chunks.last().expect("terminal chunk").is_empty());
        assert!(sink.finished);
    }

    #[tokio::test]
    async fn out_of_order_operations_are_rejected() {
        let mut sink = RecordingResponseSink::default();
        let mut stream = SseStream::new(&mut sink);
        let before = stream.send(&SseEvent::comment("x")).await;
        assert_eq!(
            before,
            Err(StreamError::InvalidState {
                state: StreamState::NotStarted
            })
        );
        stream.start().await.expect("start");
        stream.finish().await.expect("finish");
        assert!(matches!(
            stream.send(&SseEvent::comment("x")).await,
            Err(StreamError::InvalidState { .. })
        ));
        assert!(stream.start().await.is_err());
        assert!(sink.chunks.len() == 2);
    }

    #[tokio::test]
    async fn failure_emits_error_then_done() {
        let mut sink = RecordingResponseSink::default();
        let mut stream = SseStream::new(&mut sink);
        stream.start().await.expect("start");
        stream.fail("boom").await.expect("fail");
        assert_eq!(
            sink.body_text(),
            "event: error\ndata: {\"message\": \"boom\"}\n\nevent: done\ndata: {}\n\n"
        );
        assert!(sink.finished);
    }

    #[tokio::test]
    async fn chat_events_map_to_frames() {
        let mut sink = RecordingResponseSink::default();
        let chat_id = Ksuid::from_parts(0, [0; 16]);
        {
            let mut stream = SseStream::new(&mut sink);
            stream.start().await.expect("start");
            stream
                .emit(ChatEvent::Stored { chat_id })
                .await
                .expect("stored");
            stream
                .emit(ChatEvent::Token {
                    text: "hi".to_owned(),
                })
                .await
                .expect("token");
        }
        assert_eq!(
            sink.body_text(),
            format!(
                "event: stored\ndata: {{\"chat_id\": \"{chat_id}\"}}\n\nevent: token\ndata: {{\"t\": \"hi\"}}\n\n"
            )
        );
    }

    #[tokio::test]
    async fn departed_client_closes_event_sink() {
        let mut sink = RecordingResponseSink::closing_after(0);
        let mut stream = SseStream::new(&mut sink);
        stream.start().await.expect("start");
        let result = stream
            .emit(ChatEvent::Token {
                text: "x".to_owned(),
            })
            .await;
        assert_eq!(result, Err(EventSinkClosed));
    }
}
