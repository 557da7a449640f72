//! Streaming entry: every request not claimed by another route.
//!
//! The request is wrapped as a streaming envelope and served by the gateway
//! on a local task. The handler waits only for the response head; body
//! chunks flow to the client as the pipeline writes them, so event streams
//! are delivered frame by frame. Dropping the response body (a departed
//! client) closes the channel, which the pipeline observes as a closed
//! transport.

use std::convert::Infallible;

use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, web};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use tracing::{error, warn};

use crate::domain::{Error, TraceId};
use crate::inbound::envelope::{BodySource, Envelope, StreamingRequest};
use crate::inbound::http::state::HttpState;
use crate::inbound::transport::{ChannelReceivers, ChannelSink};

/// Body chunks buffered between the pipeline and the connection.
const BODY_CHANNEL_CAPACITY: usize = 16;

/// Request body read chunk by chunk from the connection.
struct PayloadBody {
    payload: web::Payload,
}

#[async_trait(?Send)]
impl BodySource for PayloadBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        match self.payload.next().await {
            None => Ok(None),
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(err)) => {
                warn!(error = %err, "request body could not be read");
                Err(Error::malformed_request(format!("request body: {err}")))
            }
        }
    }
}

fn envelope_for(req: &HttpRequest, payload: web::Payload) -> Envelope {
    Envelope::Streaming(StreamingRequest {
        path: req.path().to_owned(),
        method: req.method().as_str().to_owned(),
        query_string: req.query_string().as_bytes().to_vec(),
        headers: req
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().as_bytes().to_vec(), value.as_bytes().to_vec()))
            .collect(),
        body: Box::new(PayloadBody { payload }),
    })
}

/// Serve `req` through the gateway pipeline.
pub async fn serve_streaming(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<HttpState>,
) -> HttpResponse {
    let envelope = envelope_for(&req, payload);
    let (mut sink, ChannelReceivers { head, body }) = ChannelSink::new(BODY_CHANNEL_CAPACITY);
    let gateway = state.gateway.clone();
    let trace_id = TraceId::current().unwrap_or_else(TraceId::generate);
    actix_web::rt::spawn(TraceId::scope(trace_id, async move {
        gateway.serve(envelope, &mut sink).await;
    }));

    let Ok(head) = head.await else {
        error!(trace_id = %trace_id, "pipeline ended without a response");
        return HttpResponse::InternalServerError().finish();
    };
    let status = StatusCode::from_u16(head.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = HttpResponse::build(status);
    for header in head.headers {
        builder.append_header(header);
    }
    if status == StatusCode::NO_CONTENT {
        return builder.finish();
    }
    let chunks = stream::unfold(body, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
    });
    builder.streaming(chunks)
}
