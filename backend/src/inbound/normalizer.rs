//! Turns either envelope shape into one canonical request.
//!
//! Shape detection is explicit: a proxy event must carry `path` with
//! `httpMethod`, or `requestContext.http.{path,method}`; anything else is a
//! malformed request. Caller identity is read before the body so an
//! anonymous request never consumes its payload.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};
use tracing::debug;
use url::form_urlencoded;

use crate::domain::{Error, Params, UserId};
use crate::inbound::envelope::{Envelope, ProxyEvent, StreamingRequest};

/// Header carrying the caller's user id on streaming requests.
pub const USER_ID_HEADER: &str = "x-user-uid";
/// Optional prefix removed from streaming request paths.
pub const API_PREFIX: &str = "/api";
/// Default cap on a streaming request body.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Wire protocol a request arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Proxy event answered with one document.
    Proxy,
    /// Live connection able to carry an event stream.
    Streaming,
}

/// A request reduced to what handlers need.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRequest {
    pub protocol: Protocol,
    /// Path used for routing, prefix already removed.
    pub path: String,
    /// Uppercase method.
    pub verb: String,
    pub caller: UserId,
    pub params: Params,
}

/// Result of normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// A CORS preflight; answered without identity or body.
    Preflight,
    Request(CanonicalRequest),
}

/// Envelope normalizer.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    max_body_bytes: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BODY_BYTES)
    }
}

impl Normalizer {
    /// Normalizer rejecting streaming bodies over `max_body_bytes`.
    pub fn new(max_body_bytes: usize) -> Self {
        Self { max_body_bytes }
    }

    /// Normalize `envelope`.
    ///
    /// # Errors
    /// `MalformedRequest` when the shape is unrecognised or the path is
    /// empty; `Unauthorized` when the caller cannot be identified.
    pub async fn normalize(&self, envelope: Envelope) -> Result<Normalized, Error> {
        match envelope {
            Envelope::Proxy(raw) => normalize_proxy(raw),
            Envelope::Streaming(request) => self.normalize_streaming(request).await,
        }
    }

    async fn normalize_streaming(&self, mut request: StreamingRequest) -> Result<Normalized, Error> {
        if request.path.is_empty() {
            return Err(Error::malformed_request("request has no path"));
        }
        let verb = request.method.to_ascii_uppercase();
        if verb == "OPTIONS" {
            return Ok(Normalized::Preflight);
        }
        let path = strip_api_prefix(&request.path);
        let caller = streaming_caller(&request)?;
        let query = parse_query(&request.query_string);
        let body = self.read_body(&mut request).await?;
        Ok(Normalized::Request(CanonicalRequest {
            protocol: Protocol::Streaming,
            path,
            verb,
            caller,
            params: Params::from_layers([query, body]),
        }))
    }

    /// Read the body to the end and parse it as a JSON object.
    ///
    /// Empty or unparseable bodies yield an empty object; only an oversized
    /// body is an error.
    async fn read_body(&self, request: &mut StreamingRequest) -> Result<Map<String, Value>, Error> {
        let mut body = Vec::new();
        while let Some(chunk) = request.body.next_chunk().await? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(Error::malformed_request(format!(
                    "request body exceeds {} bytes",
                    self.max_body_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }
        if body.is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => {
                debug!("request body is not a JSON object; ignoring it");
                Ok(Map::new())
            }
            Err(err) => {
                debug!(error = %err, "request body is not JSON; ignoring it");
                Ok(Map::new())
            }
        }
    }
}

fn strip_api_prefix(path: &str) -> String {
    match path.strip_prefix(API_PREFIX) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.to_owned(),
        _ => path.to_owned(),
    }
}

fn streaming_caller(request: &StreamingRequest) -> Result<UserId, Error> {
    let raw = request
        .header(USER_ID_HEADER)
        .ok_or_else(Error::unauthorized)?;
    let text = std::str::from_utf8(raw).map_err(|_| Error::unauthorized())?;
    UserId::new(text).map_err(|_| Error::unauthorized())
}

/// Decode a raw query string.
///
/// Keys with blank values are dropped and repeated keys collect into an
/// array, in order.
pub fn parse_query(raw: &[u8]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in form_urlencoded::parse(raw) {
        if value.is_empty() {
            continue;
        }
        let value = Value::String(value.into_owned());
        match map.get_mut(key.as_ref()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key.into_owned(), value);
            }
        }
    }
    map
}

fn normalize_proxy(raw: Value) -> Result<Normalized, Error> {
    let event: ProxyEvent = serde_json::from_value(raw)
        .map_err(|err| Error::malformed_request(format!("malformed request: {err}")))?;
    let (path, verb) = proxy_request_line(&event)?;
    if verb == "OPTIONS" {
        return Ok(Normalized::Preflight);
    }
    let caller = proxy_caller(&event)?;
    let body = proxy_body(&event)?;
    let ProxyEvent {
        path_parameters,
        query_string_parameters,
        ..
    } = event;
    Ok(Normalized::Request(CanonicalRequest {
        protocol: Protocol::Proxy,
        path,
        verb,
        caller,
        params: Params::from_layers([
            path_parameters.unwrap_or_default(),
            query_string_parameters.unwrap_or_default(),
            body,
        ]),
    }))
}

fn proxy_request_line(event: &ProxyEvent) -> Result<(String, String), Error> {
    let nested = event
        .request_context
        .as_ref()
        .and_then(|ctx| ctx.http.as_ref());
    let line = match (&event.path, &event.http_method) {
        (Some(path), Some(method)) => Some((path, method)),
        _ => nested.and_then(|http| http.path.as_ref().zip(http.method.as_ref())),
    };
    match line {
        Some((path, method)) if !path.is_empty() => {
            Ok((path.clone(), method.to_ascii_uppercase()))
        }
        Some(_) => Err(Error::malformed_request("request has no path")),
        None => Err(Error::malformed_request(
            "malformed request: no path and method",
        )),
    }
}

/// Identity from the authorizer context: a JSON string (or object) with `id`.
fn proxy_caller(event: &ProxyEvent) -> Result<UserId, Error> {
    let user = event
        .request_context
        .as_ref()
        .and_then(|ctx| ctx.authorizer.as_ref())
        .and_then(|authorizer| authorizer.get("user"))
        .ok_or_else(Error::unauthorized)?;
    let user = match user {
        Value::String(raw) => serde_json::from_str::<Value>(raw).map_err(|_| Error::unauthorized())?,
        other => other.clone(),
    };
    let id = user
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(Error::unauthorized)?;
    UserId::new(id).map_err(|_| Error::unauthorized())
}

fn proxy_body(event: &ProxyEvent) -> Result<Map<String, Value>, Error> {
    let Some(raw) = event.body.as_deref().filter(|body| !body.is_empty()) else {
        return Ok(Map::new());
    };
    let decoded = if event.is_base64_encoded {
        STANDARD
            .decode(raw)
            .map_err(|err| Error::malformed_request(format!("body is not valid base64: {err}")))?
    } else {
        raw.as_bytes().to_vec()
    };
    match serde_json::from_slice::<Value>(&decoded) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(_) => Err(Error::malformed_request("body must be a JSON object")),
        Err(err) => Err(Error::malformed_request(format!("body is not valid JSON: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorCode;
    use crate::inbound::envelope::ChunkedBody;
    use rstest::rstest;
    use serde_json::json;

    fn streaming(path: &str, method: &str, query: &str, body: &[&'static str]) -> Envelope {
        Envelope::Streaming(StreamingRequest {
            path: path.to_owned(),
            method: method.to_owned(),
            query_string: query.as_bytes().to_vec(),
            headers: vec![
                (b"content-type".to_vec(), b"application/json".to_vec()),
                (b"x-user-uid".to_vec(), b"user-1".to_vec()),
            ],
            body: Box::new(ChunkedBody::from_chunks(body.iter().copied())),
        })
    }

    fn proxy(overrides: Value) -> Envelope {
        let mut event = json!({
            "path": "/connectors",
            "httpMethod": "get",
            "pathParameters": null,
            "queryStringParameters": null,
            "body": null,
            "requestContext": {"authorizer": {"user": "{\"id\": \"user-1\", \"email\": \"a@b.c\"}"}}
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut event, overrides) {
            base.extend(extra);
        }
        Envelope::Proxy(event)
    }

    async fn request(envelope: Envelope) -> CanonicalRequest {
        match Normalizer::default().normalize(envelope).await.expect("normalizes") {
            Normalized::Request(request) => request,
            Normalized::Preflight => panic!("unexpected preflight"),
        }
    }

    async fn failure(envelope: Envelope) -> ErrorCode {
        Normalizer::default()
            .normalize(envelope)
            .await
            .expect_err("rejected")
            .code()
    }

    #[tokio::test]
    async fn proxy_layers_merge_with_body_winning() {
        let request = request(proxy(json!({
            "pathParameters": {"a": "1"},
            "queryStringParameters": {"a": "2", "b": "3"},
            "body": "{\"a\": \"4\"}"
        })))
        .await;
        assert_eq!(request.params.as_map(), json!({"a": "4", "b": "3"}).as_object().expect("object"));
        assert_eq!(request.protocol, Protocol::Proxy);
        assert_eq!(request.verb, "GET");
        assert_eq!(request.caller.as_ref(), "user-1");
    }

    #[tokio::test]
    async fn keys_become_snake_case() {
        let request = request(proxy(json!({"body": "{\"fooBar\": 1}"}))).await;
        assert_eq!(request.params.get("foo_bar"), Some(&json!(1)));
        assert!(request.params.get("fooBar").is_none());
    }

    #[tokio::test]
    async fn base64_bodies_are_decoded() {
        let request = request(proxy(json!({
            "body": STANDARD.encode("{\"host\": \"h\"}"),
            "isBase64Encoded": true
        })))
        .await;
        assert_eq!(request.params.text("host").as_deref(), Some("h"));
    }

    #[tokio::test]
    async fn function_url_shape_is_recognised() {
        let request = request(Envelope::Proxy(json!({
            "requestContext": {
                "http": {"path": "/chats", "method": "GET"},
                "authorizer": {"user": {"id": "user-9"}}
            }
        })))
        .await;
        assert_eq!(request.path, "/chats");
        assert_eq!(request.caller.as_ref(), "user-9");
    }

    #[rstest]
    #[case(json!({"requestContext": {}}))]
    #[case(json!({"requestContext": {"authorizer": {}}}))]
    #[case(json!({"requestContext": {"authorizer": {"user": "not json"}}}))]
    #[case(json!({"requestContext": {"authorizer": {"user": "{\"email\": \"x\"}"}}}))]
    #[case(json!({"requestContext": {"authorizer": {"user": "{\"id\": \"\"}"}}}))]
    #[tokio::test]
    async fn proxy_without_identity_is_unauthorized(#[case] overrides: Value) {
        assert_eq!(failure(proxy(overrides)).await, ErrorCode::Unauthorized);
    }

    #[rstest]
    #[case(json!({"body": "{not json"}))]
    #[case(json!({"body": "[1, 2]"}))]
    #[case(json!({"path": ""}))]
    #[tokio::test]
    async fn malformed_proxy_events_are_rejected(#[case] overrides: Value) {
        assert_eq!(failure(proxy(overrides)).await, ErrorCode::MalformedRequest);
    }

    #[tokio::test]
    async fn unrecognised_shape_is_malformed() {
        assert_eq!(
            failure(Envelope::Proxy(json!({"hello": "world"}))).await,
            ErrorCode::MalformedRequest
        );
    }

    #[tokio::test]
    async fn streaming_layers_merge_with_body_winning() {
        let request = request(streaming(
            "/api/connectors",
            "post",
            "a=2&b=3&schemaName=public",
            &["{\"a\":", " \"4\"}"],
        ))
        .await;
        assert_eq!(request.path, "/connectors");
        assert_eq!(request.verb, "POST");
        assert_eq!(
            request.params.as_map(),
            json!({"a": "4", "b": "3", "schema_name": "public"})
                .as_object()
                .expect("object")
        );
    }

    #[rstest]
    #[case(&[])]
    #[case(&["{oops"])]
    #[case(&["[1]"])]
    #[tokio::test]
    async fn unusable_streaming_bodies_read_as_empty(#[case] body: &[&'static str]) {
        let request = request(streaming("/chats", "GET", "", body)).await;
        assert!(request.params.as_map().is_empty());
    }

    #[tokio::test]
    async fn oversized_streaming_body_is_rejected() {
        let envelope = streaming("/connectors", "POST", "", &["{\"a\": \"0123456789\"}"]);
        let err = Normalizer::new(8)
            .normalize(envelope)
            .await
            .expect_err("too large");
        assert_eq!(err.code(), ErrorCode::MalformedRequest);
    }

    #[tokio::test]
    async fn streaming_without_user_header_is_unauthorized() {
        let envelope = Envelope::Streaming(StreamingRequest {
            path: "/connectors".to_owned(),
            method: "GET".to_owned(),
            query_string: Vec::new(),
            headers: Vec::new(),
            body: Box::new(ChunkedBody::empty()),
        });
        assert_eq!(failure(envelope).await, ErrorCode::Unauthorized);
    }

    #[tokio::test]
    async fn options_is_a_preflight_without_identity() {
        let envelope = Envelope::Streaming(StreamingRequest {
            path: "/connectors".to_owned(),
            method: "OPTIONS".to_owned(),
            query_string: Vec::new(),
            headers: Vec::new(),
            body: Box::new(ChunkedBody::empty()),
        });
        assert_eq!(
            Normalizer::default().normalize(envelope).await.expect("preflight"),
            Normalized::Preflight
        );
    }

    #[rstest]
    #[case("/api/connectors", "/connectors")]
    #[case("/api", "")]
    #[case("/apiary", "/apiary")]
    #[case("/connectors", "/connectors")]
    fn api_prefix_is_stripped_on_segment_boundary(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(strip_api_prefix(raw), expected);
    }

    #[test]
    fn query_parsing_drops_blanks_and_collects_repeats() {
        assert_eq!(
            Value::Object(parse_query(b"a=1&a=2&b=&c=x+y&d=%2F")),
            json!({"a": ["1", "2"], "c": "x y", "d": "/"})
        );
    }
}
