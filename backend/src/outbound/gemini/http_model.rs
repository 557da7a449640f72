//! Reqwest-backed Gemini adapter.
//!
//! One-shot generation posts to `:generateContent`; streaming posts to
//! `:streamGenerateContent?alt=sse` and relays each event's text as it
//! arrives. No overall request timeout is set so long generations are not
//! cut off; only connecting is bounded.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, Response, StatusCode, Url};
use tracing::debug;

use super::dto::{GenerateRequestDto, parse_response};
use super::event_lines::EventLines;
use crate::domain::ports::{LanguageModel, LanguageModelError, TokenStream, Turn};

/// Public Gemini endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/";
/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini language model over HTTP.
pub struct GeminiModel {
    client: Client,
    api_key: String,
    generate_url: Url,
    stream_url: Url,
}

impl std::fmt::Debug for GeminiModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiModel")
            .field("generate_url", &self.generate_url.as_str())
            .finish_non_exhaustive()
    }
}

/// Failures building the adapter.
#[derive(Debug, thiserror::Error)]
pub enum GeminiSetupError {
    /// The base URL and model do not form a valid endpoint.
    #[error("invalid Gemini endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    /// The HTTP client could not be constructed.
    #[error("failed to build Gemini client: {0}")]
    Client(#[from] reqwest::Error),
}

impl GeminiModel {
    /// Adapter for `model` at `base_url`, authenticating with `api_key`.
    ///
    /// # Errors
    /// [`GeminiSetupError`] when the endpoint URL is invalid or the client
    /// cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        model: &str,
        base_url: &Url,
        connect_timeout: Duration,
    ) -> Result<Self, GeminiSetupError> {
        let models = base_url.join("v1beta/models/")?;
        let generate_url = models.join(&format!("./{model}:generateContent"))?;
        let mut stream_url = models.join(&format!("./{model}:streamGenerateContent"))?;
        stream_url.query_pairs_mut().append_pair("alt", "sse");
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            generate_url,
            stream_url,
        })
    }

    async fn post(
        &self,
        url: &Url,
        prompt: &str,
        history: &[Turn],
    ) -> Result<Response, LanguageModelError> {
        let response = self
            .client
            .post(url.clone())
            .header(API_KEY_HEADER, self.api_key.as_str())
            .json(&GenerateRequestDto::new(prompt, history))
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(map_status_error(status, &body))
    }
}

fn map_transport_error(error: reqwest::Error) -> LanguageModelError {
    LanguageModelError::request(error.to_string())
}

fn map_status_error(status: StatusCode, body: &[u8]) -> LanguageModelError {
    let preview = body_preview(body);
    if preview.is_empty() {
        LanguageModelError::request(format!("status {}", status.as_u16()))
    } else {
        LanguageModelError::request(format!("status {}: {preview}", status.as_u16()))
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        let preview: String = compact.chars().take(PREVIEW_CHAR_LIMIT).collect();
        format!("{preview}...")
    } else {
        compact
    }
}

struct Relay {
    body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    lines: EventLines,
    events: VecDeque<String>,
    ended: bool,
}

/// Turn an SSE response body into non-empty text chunks.
fn relay(response: Response) -> TokenStream {
    let relay = Relay {
        body: response.bytes_stream().boxed(),
        lines: EventLines::default(),
        events: VecDeque::new(),
        ended: false,
    };
    stream::unfold(relay, |mut relay| async move {
        loop {
            if let Some(event) = relay.events.pop_front() {
                match parse_response(event.as_bytes()) {
                    Ok(text) if text.is_empty() => continue,
                    Ok(text) => return Some((Ok(text), relay)),
                    Err(err) => {
                        relay.events.clear();
                        relay.ended = true;
                        return Some((Err(err), relay));
                    }
                }
            }
            if relay.ended {
                return None;
            }
            match relay.body.next().await {
                Some(Ok(chunk)) => {
                    let completed = relay.lines.push(&chunk);
                    relay.events.extend(completed);
                }
                Some(Err(err)) => {
                    relay.ended = true;
                    return Some((Err(map_transport_error(err)), relay));
                }
                None => {
                    relay.ended = true;
                    relay.events.extend(relay.lines.finish());
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl LanguageModel for GeminiModel {
    async fn generate_once(
        &self,
        prompt: &str,
        history: &[Turn],
    ) -> Result<String, LanguageModelError> {
        let response = self.post(&self.generate_url, prompt, history).await?;
        let body = response.bytes().await.map_err(map_transport_error)?;
        parse_response(&body)
    }

    async fn generate_streaming(
        &self,
        prompt: &str,
        history: &[Turn],
    ) -> Result<TokenStream, LanguageModelError> {
        let response = self.post(&self.stream_url, prompt, history).await?;
        debug!(turns = history.len(), "model stream opened");
        Ok(relay(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the base URL.
    async fn serve_once(response: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = vec![0_u8; 8192];
            let _read = socket.read(&mut request).await.expect("read");
            socket.write_all(response.as_bytes()).await.expect("write");
            socket.shutdown().await.expect("shutdown");
        });
        Url::parse(&format!("http://{addr}/")).expect("url")
    }

    fn model(base: &Url) -> GeminiModel {
        GeminiModel::new("key", DEFAULT_MODEL, base, Duration::from_secs(1)).expect("model")
    }

    #[test]
    fn endpoints_are_built_from_base_and_model() {
        let base = Url::parse(DEFAULT_BASE_URL).expect("url");
        let model = model(&base);
        assert_eq!(
            model.generate_url.as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(
            model.stream_url.as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
        );
    }

    #[tokio::test]
    async fn streamed_events_become_chunks() {
        let base = serve_once(concat!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
            "data: {\"candidates\": [{\"content\": {\"parts\": [{\"text\": \"Hel\"}]}}]}\r\n\r\n",
            "data: {\"candidates\": [{\"content\": {\"parts\": [{\"text\": \"lo\"}]}}]}\r\n\r\n",
            "data: {\"candidates\": [{\"finishReason\": \"STOP\"}]}\r\n\r\n",
        ))
        .await;
        let chunks: Vec<String> = model(&base)
            .generate_streaming("hi", &[])
            .await
            .expect("stream")
            .try_collect()
            .await
            .expect("chunks");
        assert_eq!(chunks, ["Hel", "lo"]);
    }

    #[tokio::test]
    async fn error_statuses_carry_a_preview() {
        let base = serve_once(concat!(
            "HTTP/1.1 403 Forbidden\r\ncontent-type: application/json\r\n",
            "content-length: 28\r\nconnection: close\r\n\r\n",
            "{\"error\": \"API key invalid\"}",
        ))
        .await;
        let err = model(&base).generate_once("hi", &[]).await.expect_err("403");
        assert_eq!(
            err,
            LanguageModelError::request("status 403: {\"error\": \"API key invalid\"}")
        );
    }

    #[test]
    fn long_bodies_are_truncated_in_previews() {
        let body = "x".repeat(200);
        let preview = body_preview(body.as_bytes());
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 163);
    }
}
