//! Test doubles shared by unit tests and the integration suites.
//!
//! Compiled for `cargo test` and, through the `test-support` feature, for
//! the crate's own integration tests. Each double records what it was asked
//! to do so tests can assert on the calls afterwards.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Local, Utc};
use futures_util::StreamExt;
use futures_util::stream;
use mockable::Clock;

use crate::domain::ports::{
    ChatEvent, ChatEventSink, ConnectionProfile, EventSinkClosed, LanguageModel,
    LanguageModelError, SqlConnection, SqlConnector, SqlError, SqlParams, SqlRows, TokenStream,
    TokenVerificationError, TokenVerifier, Turn, VerifiedIdentity,
};
use crate::inbound::transport::{ResponseHead, ResponseSink, TransportClosed};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    utc_now: DateTime<Utc>,
}

impl FixedClock {
    /// Freeze the clock at `unix_seconds`.
    pub fn at_unix(unix_seconds: i64) -> Self {
        Self {
            utc_now: DateTime::from_timestamp(unix_seconds, 0).unwrap_or_default(),
        }
    }
}

impl Clock for FixedClock {
    fn local(&self) -> DateTime<Local> {
        self.utc_now.with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        self.utc_now
    }
}

#[derive(Debug, Default)]
struct SqlScript {
    responses: VecDeque<Result<SqlRows, SqlError>>,
    executed: Vec<(String, SqlParams)>,
    profiles: Vec<ConnectionProfile>,
}

/// Relational driver answering from a queue of scripted results.
///
/// An exhausted queue answers with an empty result set.
#[derive(Debug, Default, Clone)]
pub struct ScriptedSqlConnector {
    script: Arc<Mutex<SqlScript>>,
}

impl ScriptedSqlConnector {
    /// Connector with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful result.
    pub fn push_rows(&self, rows: SqlRows) {
        lock(&self.script).responses.push_back(Ok(rows));
    }

    /// Queue a failure.
    pub fn push_error(&self, err: SqlError) {
        lock(&self.script).responses.push_back(Err(err));
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<(String, SqlParams)> {
        lock(&self.script).executed.clone()
    }

    /// Profiles connections were opened with.
    pub fn profiles(&self) -> Vec<ConnectionProfile> {
        lock(&self.script).profiles.clone()
    }
}

struct ScriptedConnection {
    script: Arc<Mutex<SqlScript>>,
}

#[async_trait]
impl SqlConnector for ScriptedSqlConnector {
    async fn connect(&self, profile: &ConnectionProfile) -> Result<Box<dyn SqlConnection>, SqlError> {
        lock(&self.script).profiles.push(profile.clone());
        Ok(Box::new(ScriptedConnection {
            script: Arc::clone(&self.script),
        }))
    }
}

#[async_trait]
impl SqlConnection for ScriptedConnection {
    async fn execute(&mut self, sql: &str, params: SqlParams) -> Result<SqlRows, SqlError> {
        let mut script = lock(&self.script);
        script.executed.push((sql.to_owned(), params));
        script.responses.pop_front().unwrap_or_else(|| Ok(SqlRows::default()))
    }
}

#[derive(Debug, Default)]
struct ModelCalls {
    prompts: Vec<String>,
    histories: Vec<Vec<Turn>>,
}

/// Language model replying with fixed chunks, optionally failing after them.
#[derive(Debug, Clone)]
pub struct ScriptedLanguageModel {
    chunks: Vec<String>,
    failure: Option<String>,
    calls: Arc<Mutex<ModelCalls>>,
}

impl ScriptedLanguageModel {
    /// Reply with `chunks`, in order.
    pub fn new<'a>(chunks: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            chunks: chunks.into_iter().map(str::to_owned).collect(),
            failure: None,
            calls: Arc::default(),
        }
    }

    /// Stream `chunks`, then fail with a request error carrying `message`.
    pub fn failing_after<'a>(chunks: impl IntoIterator<Item = &'a str>, message: &str) -> Self {
        Self {
            failure: Some(message.to_owned()),
            ..Self::new(chunks)
        }
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.calls).prompts.clone()
    }

    /// Histories received so far, one per call.
    pub fn histories(&self) -> Vec<Vec<Turn>> {
        lock(&self.calls).histories.clone()
    }

    fn record(&self, prompt: &str, history: &[Turn]) {
        let mut calls = lock(&self.calls);
        calls.prompts.push(prompt.to_owned());
        calls.histories.push(history.to_vec());
    }
}

#[async_trait]
impl LanguageModel for ScriptedLanguageModel {
    async fn generate_once(&self, prompt: &str, history: &[Turn]) -> Result<String, LanguageModelError> {
        self.record(prompt, history);
        match &self.failure {
            Some(message) => Err(LanguageModelError::request(message.as_str())),
            None => Ok(self.chunks.concat()),
        }
    }

    async fn generate_streaming(
        &self,
        prompt: &str,
        history: &[Turn],
    ) -> Result<TokenStream, LanguageModelError> {
        self.record(prompt, history);
        let mut items: Vec<Result<String, LanguageModelError>> =
            self.chunks.iter().cloned().map(Ok).collect();
        if let Some(message) = &self.failure {
            items.push(Err(LanguageModelError::request(message.as_str())));
        }
        Ok(stream::iter(items).boxed())
    }
}

/// Chat event sink that records events and can simulate a departing client.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    pub events: Vec<ChatEvent>,
    capacity: Option<usize>,
}

impl RecordingEventSink {
    /// Accept `count` events, then report the client as gone.
    pub fn closing_after(count: usize) -> Self {
        Self {
            events: Vec::new(),
            capacity: Some(count),
        }
    }

    /// Text of every token event, in order.
    pub fn tokens(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ChatEvent::Token { text } => Some(text.clone()),
                ChatEvent::Stored { .. } => None,
            })
            .collect()
    }
}

#[async_trait(?Send)]
impl ChatEventSink for RecordingEventSink {
    async fn emit(&mut self, event: ChatEvent) -> Result<(), EventSinkClosed> {
        if self.capacity.is_some_and(|limit| self.events.len() >= limit) {
            return Err(EventSinkClosed);
        }
        self.events.push(event);
        Ok(())
    }
}

/// Response sink that records the head and each chunk separately.
#[derive(Debug, Default)]
pub struct RecordingResponseSink {
    pub head: Option<ResponseHead>,
    pub chunks: Vec<Bytes>,
    pub finished: bool,
    capacity: Option<usize>,
}

impl RecordingResponseSink {
    /// Accept `count` body chunks, then report the client as gone.
    pub fn closing_after(count: usize) -> Self {
        Self {
            capacity: Some(count),
            ..Self::default()
        }
    }

    /// Every chunk concatenated as text.
    pub fn body_text(&self) -> String {
        self.chunks
            .iter()
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect()
    }

    /// Status code sent, if started.
    pub fn status(&self) -> Option<u16> {
        self.head.as_ref().map(|head| head.status)
    }
}

#[async_trait(?Send)]
impl ResponseSink for RecordingResponseSink {
    async fn start(&mut self, head: ResponseHead) -> Result<(), TransportClosed> {
        self.head = Some(head);
        Ok(())
    }

    async fn send_body(&mut self, chunk: Bytes, more: bool) -> Result<(), TransportClosed> {
        if self.capacity.is_some_and(|limit| self.chunks.len() >= limit) {
            return Err(TransportClosed);
        }
        self.chunks.push(chunk);
        self.finished = !more;
        Ok(())
    }
}

/// Identity provider knowing a fixed set of tokens.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenVerifier {
    accounts: Vec<(String, VerifiedIdentity)>,
}

impl StaticTokenVerifier {
    /// Accept `token` as `identity`.
    #[must_use]
    pub fn with_token(mut self, token: &str, identity: VerifiedIdentity) -> Self {
        self.accounts.push((token.to_owned(), identity));
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, bearer_token: &str) -> Result<VerifiedIdentity, TokenVerificationError> {
        self.accounts
            .iter()
            .find(|(token, _)| token == bearer_token)
            .map(|(_, identity)| identity.clone())
            .ok_or_else(|| TokenVerificationError::rejected("unknown token"))
    }
}
