//! The gateway pipeline: normalise, route, run the use case, respond.
//!
//! Entity-bound endpoints resolve their connector or chat for the caller
//! before any business logic runs, so a missing entity is always a plain 404.
//! Chat endpoints reached over a streaming request answer with an event
//! stream unless the caller passes `stream=false`; once the stream has
//! started, failures surface as an `error` event.

use serde_json::{Value, json};
use tracing::debug;

use crate::domain::chat::follow_up_from_params;
use crate::domain::{
    Chat, ChatDraft, ChatService, Connector, ConnectorService, Error, Params, UserId,
};
use crate::inbound::envelope::Envelope;
use crate::inbound::normalizer::{CanonicalRequest, Normalized, Normalizer, Protocol};
use crate::inbound::response::{Outcome, log_failure, send_error, send_outcome};
use crate::inbound::router::{Endpoint, RouteMatch, Router};
use crate::inbound::sse::SseStream;
use crate::inbound::transport::ResponseSink;

const CONNECTOR_ID: &str = "connector_id";
const CHAT_ID: &str = "chat_id";

/// Chat work resolved before a stream starts.
enum ChatWork {
    Start(Connector, ChatDraft),
    FollowUp(Chat, String),
}

/// Request pipeline shared by both inbound shapes.
#[derive(Clone)]
pub struct Gateway {
    connectors: ConnectorService,
    chats: ChatService,
    router: Router,
    normalizer: Normalizer,
}

impl Gateway {
    /// A gateway serving the standard route table.
    pub fn new(connectors: ConnectorService, chats: ChatService, normalizer: Normalizer) -> Self {
        Self {
            connectors,
            chats,
            router: Router::standard(),
            normalizer,
        }
    }

    /// Serve one request, writing the whole response to `sink`.
    ///
    /// Never fails: errors become error responses, and a client that has
    /// gone away is only logged.
    pub async fn serve(&self, envelope: Envelope, sink: &mut dyn ResponseSink) {
        let sent = match self.handle(envelope, sink).await {
            Ok(outcome) => send_outcome(sink, outcome).await,
            Err(err) => send_error(sink, &err).await,
        };
        if let Err(err) = sent {
            debug!(error = %err, "response abandoned");
        }
    }

    async fn handle(
        &self,
        envelope: Envelope,
        sink: &mut dyn ResponseSink,
    ) -> Result<Outcome, Error> {
        let request = match self.normalizer.normalize(envelope).await? {
            Normalized::Preflight => return Ok(Outcome::NoContent),
            Normalized::Request(request) => request,
        };
        let route = self.router.resolve(&request.path, &request.verb)?;
        debug!(
            endpoint = ?route.endpoint,
            user_id = %request.caller,
            protocol = ?request.protocol,
            "dispatching request"
        );
        self.dispatch(&request, &route, sink).await
    }

    async fn dispatch(
        &self,
        request: &CanonicalRequest,
        route: &RouteMatch,
        sink: &mut dyn ResponseSink,
    ) -> Result<Outcome, Error> {
        let caller = &request.caller;
        let params = &request.params;
        match route.endpoint {
            Endpoint::ListConnectors => {
                let connectors = self.connectors.list(caller).await?;
                let views: Vec<Value> = connectors.iter().map(Connector::public_view).collect();
                Ok(Outcome::Json(json!({ "connectors": views })))
            }
            Endpoint::CreateConnector => {
                let connector = self.connectors.create(caller, params).await?;
                Ok(Outcome::Json(json!({ "connector": connector.full_view() })))
            }
            Endpoint::ReplaceConnector => {
                let connector = self
                    .connectors
                    .replace(caller, route.param(CONNECTOR_ID)?, params)
                    .await?;
                Ok(Outcome::Json(json!({ "connector": connector.full_view() })))
            }
            Endpoint::DeleteConnector => {
                self.connectors
                    .delete(caller, route.param(CONNECTOR_ID)?)
                    .await?;
                Ok(Outcome::NoContent)
            }
            Endpoint::InspectConnector => {
                let connector = self.connector(caller, route).await?;
                Ok(Outcome::Json(self.connectors.inspect(&connector, params).await?))
            }
            Endpoint::QueryConnector => {
                let connector = self.connector(caller, route).await?;
                Ok(Outcome::Json(self.connectors.query(&connector, params).await?))
            }
            Endpoint::StartChat => {
                let connector = self.connector(caller, route).await?;
                let draft = ChatDraft::from_params(params)?;
                if streams(request) {
                    return Ok(self.stream_chat(ChatWork::Start(connector, draft), sink).await);
                }
                let chat = self.chats.start_once(&connector, draft).await?;
                Ok(Outcome::Json(chat.view()))
            }
            Endpoint::AddMessage => {
                let chat = self.chats.require(caller, route.param(CHAT_ID)?).await?;
                let text = follow_up_from_params(params)?;
                if streams(request) {
                    return Ok(self.stream_chat(ChatWork::FollowUp(chat, text), sink).await);
                }
                let message = self.chats.add_message_once(&chat, text).await?;
                Ok(Outcome::Json(message.view()))
            }
            Endpoint::ListChats => {
                let chats = self.chats.list(caller).await?;
                let views: Vec<Value> = chats.iter().map(Chat::view).collect();
                Ok(Outcome::Json(json!({ "chats": views })))
            }
            Endpoint::DeleteChat => {
                self.chats.delete(caller, route.param(CHAT_ID)?).await?;
                Ok(Outcome::NoContent)
            }
        }
    }

    async fn connector(&self, caller: &UserId, route: &RouteMatch) -> Result<Connector, Error> {
        self.connectors
            .require(caller, route.param(CONNECTOR_ID)?)
            .await
    }

    async fn stream_chat(&self, work: ChatWork, sink: &mut dyn ResponseSink) -> Outcome {
        let mut stream = SseStream::new(sink);
        if let Err(err) = stream.start().await {
            debug!(error = %err, "client left before the stream started");
            return Outcome::Streamed;
        }
        let result = match work {
            ChatWork::Start(connector, draft) => {
                self.chats.start(&connector, draft, &mut stream).await
            }
            ChatWork::FollowUp(chat, text) => {
                self.chats.add_message(&chat, text, &mut stream).await
            }
        };
        let closed = match result {
            Ok(()) => stream.finish().await,
            Err(err) => {
                log_failure(&err);
                stream.fail(err.message()).await
            }
        };
        if let Err(err) = closed {
            debug!(error = %err, "stream ended early");
        }
        Outcome::Streamed
    }
}

fn streams(request: &CanonicalRequest) -> bool {
    request.protocol == Protocol::Streaming && wants_stream(&request.params)
}

fn wants_stream(params: &Params) -> bool {
    params.flag("stream") != Some(false)
}
