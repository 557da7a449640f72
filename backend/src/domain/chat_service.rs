//! Chat use cases: grounded chat start, follow-ups, listing and deletion.
//!
//! Streaming variants report progress through a [`ChatEventSink`]. When the
//! sink closes mid-generation the loop stops and whatever text was produced
//! is still persisted as one complete message.

use std::sync::Arc;

use futures_util::StreamExt;
use mockable::Clock;
use tracing::{info, warn};

use crate::domain::chat::{ChatDraft, MESSAGES_ATTR, Message};
use crate::domain::ports::{
    ChatEvent, ChatEventSink, ItemStore, ItemStoreError, LanguageModel, PutCondition, SqlConnector,
    SqlParams, TokenStream,
};
use crate::domain::prompts::initial_analysis;
use crate::domain::record::{KeyedRecord, RecordKey};
use crate::domain::{Chat, Connector, Error, Ksuid, UserId};

/// Text relayed to the sink and whether the stream ran to its end.
struct Relayed {
    text: String,
    completed: bool,
}

async fn relay(mut tokens: TokenStream, sink: &mut dyn ChatEventSink) -> Result<Relayed, Error> {
    let mut text = String::new();
    while let Some(chunk) = tokens.next().await {
        let chunk = chunk?;
        text.push_str(&chunk);
        if sink.emit(ChatEvent::Token { text: chunk }).await.is_err() {
            return Ok(Relayed {
                text,
                completed: false,
            });
        }
    }
    Ok(Relayed {
        text,
        completed: true,
    })
}

/// Chat service over the item store, the relational driver and the model.
#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn ItemStore>,
    sql: Arc<dyn SqlConnector>,
    model: Arc<dyn LanguageModel>,
    clock: Arc<dyn Clock>,
}

impl ChatService {
    /// Create a new service with the given collaborators.
    pub fn new(
        store: Arc<dyn ItemStore>,
        sql: Arc<dyn SqlConnector>,
        model: Arc<dyn LanguageModel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            sql,
            model,
            clock,
        }
    }

    fn next_id(&self) -> Ksuid {
        Ksuid::generate(self.clock.as_ref(), &mut rand::thread_rng())
    }

    /// Every chat owned by `caller`, oldest first.
    pub async fn list(&self, caller: &UserId) -> Result<Vec<Chat>, Error> {
        let items = self
            .store
            .query(
                &RecordKey::partition_for(caller),
                &RecordKey::sort_prefix(Chat::ENTITY_TYPE),
            )
            .await?;
        items.iter().map(Chat::from_item).collect()
    }

    /// Remove a chat; removing an unknown one succeeds.
    pub async fn delete(&self, caller: &UserId, chat_id: &str) -> Result<(), Error> {
        let id = Ksuid::decode(chat_id)?;
        self.store.delete(&Chat::key_for(caller, id)).await?;
        Ok(())
    }

    /// Resolve `chat_id` for `caller`, failing with not-found when absent.
    pub async fn require(&self, caller: &UserId, chat_id: &str) -> Result<Chat, Error> {
        let not_found = || Error::not_found(format!("chat {chat_id}"));
        let Ok(id) = Ksuid::decode(chat_id) else {
            return Err(not_found());
        };
        match self.store.get(&Chat::key_for(caller, id)).await? {
            Some(item) => Chat::from_item(&item),
            None => Err(not_found()),
        }
    }

    /// Opening prompt: the user's goal plus the capped query results.
    async fn grounded_prompt(&self, connector: &Connector, chat: &Chat) -> Result<String, Error> {
        let mut connection = self.sql.connect(&connector.profile()).await?;
        let rows = connection
            .execute(&chat.limited_query(), SqlParams::None)
            .await?;
        let data = serde_json::to_string_pretty(&rows.records())
            .map_err(|err| Error::internal(format!("failed to serialise query rows: {err}")))?;
        Ok(initial_analysis(&chat.initial_prompt, &data))
    }

    /// Start a chat on `connector`, streaming the first response.
    ///
    /// Emits `Stored` with the new chat id, then one `Token` per generated
    /// chunk, then saves the chat with its first message.
    pub async fn start(
        &self,
        connector: &Connector,
        draft: ChatDraft,
        sink: &mut dyn ChatEventSink,
    ) -> Result<(), Error> {
        let mut chat = Chat::new(self.next_id(), connector.user_id.clone(), connector.id, draft);
        if sink
            .emit(ChatEvent::Stored { chat_id: chat.id })
            .await
            .is_err()
        {
            info!(chat_id = %chat.id, "client left before generation started");
            return Ok(());
        }
        let prompt = self.grounded_prompt(connector, &chat).await?;
        let message_id = self.next_id();
        let tokens = self
            .model
            .generate_streaming(&prompt, &chat.history())
            .await?;
        let relayed = relay(tokens, sink).await?;
        chat.add(Message {
            id: message_id,
            message: chat.initial_prompt.clone(),
            response: relayed.text,
        });
        let saved = self.store.put(chat.to_item(), PutCondition::IfAbsent).await;
        settle(saved, relayed.completed, chat.id)
    }

    /// Start a chat and return it once the first response is complete.
    pub async fn start_once(&self, connector: &Connector, draft: ChatDraft) -> Result<Chat, Error> {
        let mut chat = Chat::new(self.next_id(), connector.user_id.clone(), connector.id, draft);
        let prompt = self.grounded_prompt(connector, &chat).await?;
        let message_id = self.next_id();
        let response = self.model.generate_once(&prompt, &chat.history()).await?;
        chat.add(Message {
            id: message_id,
            message: chat.initial_prompt.clone(),
            response,
        });
        self.store
            .put(chat.to_item(), PutCondition::IfAbsent)
            .await?;
        Ok(chat)
    }

    /// Send a follow-up to `chat`, streaming the response.
    pub async fn add_message(
        &self,
        chat: &Chat,
        text: String,
        sink: &mut dyn ChatEventSink,
    ) -> Result<(), Error> {
        let message_id = self.next_id();
        let tokens = self
            .model
            .generate_streaming(&text, &chat.history())
            .await?;
        let relayed = relay(tokens, sink).await?;
        let message = Message {
            id: message_id,
            message: text,
            response: relayed.text,
        };
        let saved = self.append(chat, &message).await;
        settle(saved, relayed.completed, chat.id)
    }

    /// Send a follow-up to `chat` and return the finished message.
    pub async fn add_message_once(&self, chat: &Chat, text: String) -> Result<Message, Error> {
        let message_id = self.next_id();
        let response = self.model.generate_once(&text, &chat.history()).await?;
        let message = Message {
            id: message_id,
            message: text,
            response,
        };
        self.append(chat, &message).await?;
        Ok(message)
    }

    async fn append(&self, chat: &Chat, message: &Message) -> Result<(), ItemStoreError> {
        self.store
            .append_to_list(&chat.key(), MESSAGES_ATTR, vec![message.to_attribute()])
            .await
    }
}

/// Outcome of persisting after a stream.
///
/// Once the client has gone, a failed save cannot be reported to anyone, so
/// it is logged instead.
fn settle(saved: Result<(), ItemStoreError>, completed: bool, chat_id: Ksuid) -> Result<(), Error> {
    match saved {
        Ok(()) if completed => Ok(()),
        Ok(()) => {
            info!(%chat_id, "client disconnected; partial response saved");
            Ok(())
        }
        Err(err) if completed => Err(err.into()),
        Err(err) => {
            warn!(%chat_id, error = %err, "client disconnected and partial response was not saved");
            Ok(())
        }
    }
}
