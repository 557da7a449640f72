//! Proxy entry: one JSON event in, one proxy result document out.
//!
//! Streaming endpoints answer synchronously here, so the buffered body is
//! always the complete response.

use actix_web::{HttpResponse, post, web};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::Error;
use crate::inbound::envelope::Envelope;
use crate::inbound::http::ApiResult;
use crate::inbound::http::state::HttpState;
use crate::inbound::transport::{BufferedSink, ResponseHead};

/// Proxy integration result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyResultDto {
    status_code: u16,
    headers: Map<String, Value>,
    body: String,
    is_base64_encoded: bool,
}

impl ProxyResultDto {
    fn new(head: ResponseHead, body: Bytes) -> Self {
        let headers = head
            .headers
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect();
        let (body, is_base64_encoded) = match String::from_utf8(body.to_vec()) {
            Ok(text) => (text, false),
            Err(_) => (STANDARD.encode(&body), true),
        };
        Self {
            status_code: head.status,
            headers,
            body,
            is_base64_encoded,
        }
    }
}

/// Serve one proxy event.
#[post("/invocations")]
pub async fn invoke(body: web::Bytes, state: web::Data<HttpState>) -> ApiResult<HttpResponse> {
    let event: Value = serde_json::from_slice(&body)
        .map_err(|err| Error::malformed_request(format!("malformed request: {err}")))?;
    let mut sink = BufferedSink::default();
    state.gateway.serve(Envelope::Proxy(event), &mut sink).await;
    let (head, body) = sink.into_parts();
    let head = head.ok_or_else(|| Error::internal("request produced no response"))?;
    Ok(HttpResponse::Ok().json(ProxyResultDto::new(head, body)))
}
