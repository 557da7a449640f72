//! Chats grounded in one query's results and their message history.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use super::ports::Turn;
use super::record::{AttributeValue, Item, KeyedRecord, required_s};
use super::{Error, Ksuid, Params, UserId};

/// Fields a chat start request must carry.
pub const CHAT_START_FIELDS: [&str; 2] = ["query", "prompt"];
/// Fields a follow-up request must carry.
pub const FOLLOW_UP_FIELDS: [&str; 1] = ["message"];
/// Row cap applied to the grounding query.
pub const MAX_ROWS: usize = 250;
/// List attribute holding a chat's messages.
pub const MESSAGES_ATTR: &str = "messages";

/// One exchange: the user's text and the model's response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Ksuid,
    pub message: String,
    pub response: String,
}

impl Message {
    /// Map attribute stored inside the chat's message list.
    pub fn to_attribute(&self) -> AttributeValue {
        AttributeValue::M(BTreeMap::from([
            ("id".to_owned(), AttributeValue::S(self.id.to_string())),
            ("message".to_owned(), AttributeValue::S(self.message.clone())),
            ("response".to_owned(), AttributeValue::S(self.response.clone())),
        ]))
    }

    fn from_attribute(value: &AttributeValue) -> Result<Self, Error> {
        let AttributeValue::M(map) = value else {
            return Err(Error::corrupt_record("chat message is not a map"));
        };
        let id_raw = required_s(map, "id")?;
        Ok(Self {
            id: Ksuid::decode(&id_raw)
                .map_err(|err| Error::corrupt_record(format!("chat message id: {err}")))?,
            message: required_s(map, "message")?,
            response: required_s(map, "response")?,
        })
    }

    /// Response body representation.
    pub fn view(&self) -> Value {
        json!({
            "id": self.id,
            "message": self.message,
            "response": self.response,
        })
    }
}

/// Validated input for starting a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatDraft {
    pub query: String,
    pub prompt: String,
}

impl ChatDraft {
    /// Read `query` and `prompt` from request parameters.
    pub fn from_params(params: &Params) -> Result<Self, Error> {
        let [query, prompt] = params.require(CHAT_START_FIELDS)?;
        Ok(Self { query, prompt })
    }
}

/// Read the follow-up text from request parameters.
pub fn follow_up_from_params(params: &Params) -> Result<String, Error> {
    let [message] = params.require(FOLLOW_UP_FIELDS)?;
    Ok(message)
}

/// A conversation owned by one user and bound to one connector.
///
/// Messages are append-only; history order is by message identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: Ksuid,
    pub user_id: UserId,
    pub connector_id: Ksuid,
    pub initial_query: String,
    pub initial_prompt: String,
    pub messages: Vec<Message>,
}

impl Chat {
    /// Start a new chat with no messages.
    pub fn new(id: Ksuid, user_id: UserId, connector_id: Ksuid, draft: ChatDraft) -> Self {
        Self {
            id,
            user_id,
            connector_id,
            initial_query: draft.query,
            initial_prompt: draft.prompt,
            messages: Vec::new(),
        }
    }

    /// The initial query wrapped so at most [`MAX_ROWS`] rows come back.
    ///
    /// # Examples
    /// ```
    /// use gateway::domain::{Chat, ChatDraft, Ksuid, UserId};
    ///
    /// let chat = Chat::new(
    ///     Ksuid::from_parts(0, [0; 16]),
    ///     UserId::new("u").expect("valid user"),
    ///     Ksuid::from_parts(0, [1; 16]),
    ///     ChatDraft { query: " select 1; ".to_owned(), prompt: "why".to_owned() },
    /// );
    /// assert_eq!(chat.limited_query(), "WITH q AS (select 1) SELECT * FROM q LIMIT 250;");
    /// ```
    pub fn limited_query(&self) -> String {
        let sanitized = self.initial_query.trim().trim_end_matches(';');
        format!("WITH q AS ({sanitized}) SELECT * FROM q LIMIT {MAX_ROWS};")
    }

    /// Record a finished exchange.
    pub fn add(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Messages ordered by identifier, regardless of append order.
    pub fn sorted_messages(&self) -> Vec<&Message> {
        let mut messages: Vec<&Message> = self.messages.iter().collect();
        messages.sort_by_key(|message| message.id);
        messages
    }

    /// Conversation context for the model: each message as a user turn
    /// followed by the model's response.
    pub fn history(&self) -> Vec<Turn> {
        self.sorted_messages()
            .into_iter()
            .flat_map(|message| {
                [
                    Turn::user(message.message.clone()),
                    Turn::model(message.response.clone()),
                ]
            })
            .collect()
    }

    /// Response body representation.
    pub fn view(&self) -> Value {
        json!({
            "id": self.id,
            "connector_id": self.connector_id,
            "query": self.initial_query,
            "prompt": self.initial_prompt,
            "messages": self
                .sorted_messages()
                .into_iter()
                .map(Message::view)
                .collect::<Vec<_>>(),
        })
    }
}

impl KeyedRecord for Chat {
    const ENTITY_TYPE: &'static str = "CHAT";

    fn owner(&self) -> &UserId {
        &self.user_id
    }

    fn id(&self) -> Ksuid {
        self.id
    }

    fn attributes(&self) -> Item {
        Item::from([
            (
                "connector_id".to_owned(),
                AttributeValue::S(self.connector_id.to_string()),
            ),
            ("user_id".to_owned(), AttributeValue::S(self.user_id.to_string())),
            (
                "initial_query".to_owned(),
                AttributeValue::S(self.initial_query.clone()),
            ),
            (
                "initial_prompt".to_owned(),
                AttributeValue::S(self.initial_prompt.clone()),
            ),
            (
                MESSAGES_ATTR.to_owned(),
                AttributeValue::L(self.messages.iter().map(Message::to_attribute).collect()),
            ),
        ])
    }

    fn from_attributes(owner: UserId, id: Ksuid, item: &Item) -> Result<Self, Error> {
        let connector_raw = required_s(item, "connector_id")?;
        let messages = match item.get(MESSAGES_ATTR) {
            None | Some(AttributeValue::Null(_)) => Vec::new(),
            Some(AttributeValue::L(values)) => values
                .iter()
                .map(Message::from_attribute)
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(Error::corrupt_record("chat messages are not a list")),
        };
        Ok(Self {
            id,
            user_id: owner,
            connector_id: Ksuid::decode(&connector_raw)
                .map_err(|err| Error::corrupt_record(format!("chat connector id: {err}")))?,
            initial_query: required_s(item, "initial_query")?,
            initial_prompt: required_s(item, "initial_prompt")?,
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Role;
    use rstest::{fixture, rstest};

    fn id(seconds: u32) -> Ksuid {
        Ksuid::from_parts(seconds, [0; 16])
    }

    fn message(id_seconds: u32, text: &str) -> Message {
        Message {
            id: id(id_seconds),
            message: text.to_owned(),
            response: format!("re: {text}"),
        }
    }

    #[fixture]
    fn chat() -> Chat {
        Chat::new(
            id(50),
            UserId::new("user-1").expect("valid user"),
            id(10),
            ChatDraft {
                query: "select * from orders;;".to_owned(),
                prompt: "trends?".to_owned(),
            },
        )
    }

    #[rstest]
    fn limited_query_strips_trailing_semicolons(chat: Chat) {
        assert_eq!(
            chat.limited_query(),
            "WITH q AS (select * from orders) SELECT * FROM q LIMIT 250;"
        );
    }

    #[rstest]
    fn history_orders_by_identifier_not_append_order(mut chat: Chat) {
        // id3 was created first but arrived last.
        chat.add(message(200, "id1"));
        chat.add(message(300, "id2"));
        chat.add(message(100, "id3"));
        let users: Vec<String> = chat
            .history()
            .into_iter()
            .filter(|turn| turn.role == Role::User)
            .map(|turn| turn.text)
            .collect();
        assert_eq!(users, ["id3", "id1", "id2"]);
    }

    #[rstest]
    fn history_pairs_user_then_model(mut chat: Chat) {
        chat.add(message(1, "q"));
        assert_eq!(chat.history(), vec![Turn::user("q"), Turn::model("re: q")]);
    }

    #[rstest]
    fn round_trips_with_messages(mut chat: Chat) {
        chat.add(message(7, "a"));
        chat.add(message(3, "b"));
        assert_eq!(Chat::from_item(&chat.to_item()).expect("round trip"), chat);
    }

    #[rstest]
    fn missing_message_list_reads_as_empty(chat: Chat) {
        let mut item = chat.to_item();
        item.remove(MESSAGES_ATTR);
        assert!(Chat::from_item(&item).expect("readable").messages.is_empty());
    }

    #[test]
    fn draft_requires_query_and_prompt() {
        let params = Params::from(
            json!({"query": "select 1"})
                .as_object()
                .cloned()
                .expect("object literal"),
        );
        let err = ChatDraft::from_params(&params).expect_err("prompt missing");
        assert_eq!(err.details(), Some(&json!({"required": ["query", "prompt"]})));
    }

    #[rstest]
    fn view_lists_messages_in_identifier_order(mut chat: Chat) {
        chat.add(message(9, "late"));
        chat.add(message(2, "early"));
        let view = chat.view();
        assert_eq!(view["messages"][0]["message"], "early");
        assert_eq!(view["query"], "select * from orders;;");
    }
}
