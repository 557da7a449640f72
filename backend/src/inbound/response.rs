//! Handler outcomes and their translation into responses.
//!
//! Every response, streamed or not, carries the permissive CORS set. JSON
//! responses are never cached.

use bytes::Bytes;
use serde_json::{Value, json};
use tracing::error;

use crate::domain::{Error, ErrorCode, TraceId};
use crate::inbound::transport::{ResponseHead, ResponseSink, TransportClosed};

/// CORS headers attached to every response.
pub const CORS_HEADERS: [(&str, &str); 3] = [
    ("access-control-allow-origin", "*"),
    ("access-control-allow-headers", "*"),
    ("access-control-allow-methods", "*"),
];

const JSON_HEADERS: [(&str, &str); 2] = [
    ("content-type", "application/json"),
    ("cache-control", "no-store"),
];

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 200 with a JSON body.
    Json(Value),
    /// A JSON body with an explicit status.
    JsonWithStatus(Value, u16),
    /// 204 with an empty body.
    NoContent,
    /// The handler already wrote and finished a stream.
    Streamed,
}

/// HTTP status for an error category.
pub fn status_for(code: ErrorCode) -> u16 {
    match code {
        ErrorCode::MalformedRequest
        | ErrorCode::IncorrectSignature
        | ErrorCode::MalformedIdentifier => 400,
        ErrorCode::Unauthorized => 401,
        ErrorCode::NotFound => 404,
        ErrorCode::Conflict => 409,
        _ => 500,
    }
}

/// Log `err` at error level unless it is an expected outcome.
pub fn log_failure(err: &Error) {
    if err.code().is_expected() {
        return;
    }
    let trace_id = TraceId::current().map(|id| id.to_string());
    error!(
        code = ?err.code(),
        status = status_for(err.code()),
        trace_id = trace_id.as_deref().unwrap_or("-"),
        error = %err,
        details = ?err.details(),
        "request failed"
    );
}

/// Status and body reported for `err`.
///
/// Unexpected failures are logged here, once, with the request's trace id.
pub fn error_reply(err: &Error) -> (u16, Value) {
    let status = status_for(err.code());
    log_failure(err);
    let body = match err.code() {
        ErrorCode::IncorrectSignature => err
            .details()
            .cloned()
            .unwrap_or_else(|| json!({ "required": [] })),
        _ => json!({ "error": err.message() }),
    };
    (status, body)
}

fn head_with(status: u16, extra: &[(&str, &str)]) -> ResponseHead {
    extra
        .iter()
        .chain(CORS_HEADERS.iter())
        .fold(ResponseHead::new(status), |head, (name, value)| {
            head.with_header(*name, *value)
        })
}

async fn send_json(
    sink: &mut dyn ResponseSink,
    status: u16,
    body: &Value,
) -> Result<(), TransportClosed> {
    sink.start(head_with(status, &JSON_HEADERS)).await?;
    sink.send_body(Bytes::from(body.to_string()), false).await
}

/// Write `outcome` to `sink`.
pub async fn send_outcome(
    sink: &mut dyn ResponseSink,
    outcome: Outcome,
) -> Result<(), TransportClosed> {
    match outcome {
        Outcome::Json(body) => send_json(sink, 200, &body).await,
        Outcome::JsonWithStatus(body, status) => send_json(sink, status, &body).await,
        Outcome::NoContent => {
            sink.start(head_with(204, &[])).await?;
            sink.send_body(Bytes::new(), false).await
        }
        Outcome::Streamed => Ok(()),
    }
}

/// Write the error response for `err` to `sink`.
pub async fn send_error(sink: &mut dyn ResponseSink, err: &Error) -> Result<(), TransportClosed> {
    let (status, body) = error_reply(err);
    send_json(sink, status, &body).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingResponseSink;
    use rstest::rstest;

    #[rstest]
    #[case(Error::incorrect_signature(&["host", "port"]), 400, json!({"required": ["host", "port"]}))]
    #[case(Error::not_found("unknown"), 404, json!({"error": "not found: unknown"}))]
    #[case(Error::unauthorized(), 401, json!({"error": "Unauthorized"}))]
    #[case(Error::conflict("exists"), 409, json!({"error": "exists"}))]
    #[case(Error::malformed_request("no path"), 400, json!({"error": "no path"}))]
    #[case(Error::malformed_identifier("bad id"), 400, json!({"error": "bad id"}))]
    #[case(Error::corrupt_record("bad key"), 500, json!({"error": "bad key"}))]
    #[case(Error::internal("db down"), 500, json!({"error": "db down"}))]
    fn errors_translate(#[case] err: Error, #[case] status: u16, #[case] body: Value) {
        assert_eq!(error_reply(&err), (status, body));
    }

    #[tokio::test]
    async fn json_outcome_carries_cors_and_no_store() {
        let mut sink = RecordingResponseSink::default();
        send_outcome(&mut sink, Outcome::Json(json!({"ok": true})))
            .await
            .expect("sent");
        let head = sink.head.as_ref().expect("started");
        assert_eq!(head.status, 200);
        assert_eq!(head.header("cache-control"), Some("no-store"));
        assert_eq!(head.header("access-control-allow-methods"), Some("*"));
        assert_eq!(sink.body_text(), r#"{"ok":true}"#);
        assert!(sink.finished);
    }

    #[tokio::test]
    async fn explicit_status_is_used() {
        let mut sink = RecordingResponseSink::default();
        send_outcome(&mut sink, Outcome::JsonWithStatus(json!({}), 201))
            .await
            .expect("sent");
        assert_eq!(sink.status(), Some(201));
    }

    #[tokio::test]
    async fn no_content_has_empty_body() {
        let mut sink = RecordingResponseSink::default();
        send_outcome(&mut sink, Outcome::NoContent).await.expect("sent");
        assert_eq!(sink.status(), Some(204));
        assert_eq!(sink.body_text(), "");
        assert!(sink.finished);
        let head = sink.head.as_ref().expect("started");
        assert_eq!(head.header("access-control-allow-origin"), Some("*"));
        assert!(head.header("content-type").is_none());
    }

    #[tokio::test]
    async fn streamed_outcome_writes_nothing() {
        let mut sink = RecordingResponseSink::default();
        send_outcome(&mut sink, Outcome::Streamed).await.expect("sent");
        assert!(sink.head.is_none());
        assert!(sink.chunks.is_empty());
    }
}
