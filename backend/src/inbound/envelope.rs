//! The two wire shapes a gateway request can arrive in.
//!
//! A proxy event is one JSON document carrying the whole request, with the
//! caller already vetted by an upstream authorizer. A streaming request is
//! the raw HTTP exchange: byte headers, a raw query string and a body read
//! chunk by chunk from the connection.

use std::collections::VecDeque;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::Error;

/// Source of a streaming request body.
#[async_trait(?Send)]
pub trait BodySource {
    /// The next chunk, or `None` once the body is complete.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error>;
}

/// Body already held in memory, yielded in the chunks it was built from.
#[derive(Debug, Default, Clone)]
pub struct ChunkedBody {
    chunks: VecDeque<Bytes>,
}

impl ChunkedBody {
    /// A body delivered as `chunks`.
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }

    /// An empty body.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait(?Send)]
impl BodySource for ChunkedBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        Ok(self.chunks.pop_front())
    }
}

/// Request received over a live HTTP connection.
pub struct StreamingRequest {
    pub path: String,
    pub method: String,
    /// Undecoded query string, without the leading `?`.
    pub query_string: Vec<u8>,
    /// Header names and values as raw bytes, in arrival order.
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub body: Box<dyn BodySource>,
}

impl fmt::Debug for StreamingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingRequest")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("query_string", &String::from_utf8_lossy(&self.query_string))
            .field("headers", &self.headers.len())
            .finish_non_exhaustive()
    }
}

impl StreamingRequest {
    /// First value of the header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, value)| value.as_slice())
    }
}

/// `requestContext.http` of a function-URL style event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyHttp {
    pub path: Option<String>,
    pub method: Option<String>,
}

/// `requestContext` of a proxy event.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequestContext {
    #[serde(default)]
    pub http: Option<ProxyHttp>,
    /// Context attached by the upstream authorizer.
    #[serde(default)]
    pub authorizer: Option<Map<String, Value>>,
}

/// Proxy event fields the gateway reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEvent {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub http_method: Option<String>,
    #[serde(default)]
    pub request_context: Option<ProxyRequestContext>,
    #[serde(default)]
    pub path_parameters: Option<Map<String, Value>>,
    #[serde(default)]
    pub query_string_parameters: Option<Map<String, Value>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

/// A request in whichever shape it arrived.
#[derive(Debug)]
pub enum Envelope {
    /// Whole-request JSON event; parsed by the normalizer.
    Proxy(Value),
    /// Live HTTP request.
    Streaming(StreamingRequest),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn chunked_body_yields_chunks_then_end() {
        let mut body = ChunkedBody::from_chunks(["ab", "c"]);
        assert_eq!(body.next_chunk().await.expect("chunk"), Some(Bytes::from("ab")));
        assert_eq!(body.next_chunk().await.expect("chunk"), Some(Bytes::from("c")));
        assert_eq!(body.next_chunk().await.expect("end"), None);
    }

    #[test]
    fn header_lookup_ignores_case() {
        let request = StreamingRequest {
            path: "/".to_owned(),
            method: "GET".to_owned(),
            query_string: Vec::new(),
            headers: vec![(b"X-User-Uid".to_vec(), b"user-1".to_vec())],
            body: Box::new(ChunkedBody::empty()),
        };
        assert_eq!(request.header("x-user-uid"), Some(&b"user-1"[..]));
        assert!(request.header("authorization").is_none());
    }

    #[test]
    fn proxy_event_reads_camel_case_fields() {
        let event: ProxyEvent = serde_json::from_value(json!({
            "path": "/connectors",
            "httpMethod": "GET",
            "queryStringParameters": null,
            "requestContext": {"authorizer": {"user": "{\"id\": \"u\"}"}},
            "isBase64Encoded": false
        }))
        .expect("valid event");
        assert_eq!(event.http_method.as_deref(), Some("GET"));
        assert!(event.query_string_parameters.is_none());
        assert!(
            event
                .request_context
                .and_then(|ctx| ctx.authorizer)
                .is_some_and(|authorizer| authorizer.contains_key("user"))
        );
    }
}
