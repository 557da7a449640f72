//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod chat_events;
mod item_store;
mod language_model;
mod sql_connector;
mod token_verifier;

#[cfg(test)]
pub use chat_events::MockChatEventSink;
pub use chat_events::{ChatEvent, ChatEventSink, EventSinkClosed};
#[cfg(test)]
pub use item_store::MockItemStore;
pub use item_store::{ItemStore, ItemStoreError, PutCondition, item_key};
#[cfg(test)]
pub use language_model::MockLanguageModel;
pub use language_model::{
    FixtureLanguageModel, LanguageModel, LanguageModelError, Role, TokenStream, Turn,
};
#[cfg(test)]
pub use sql_connector::{MockSqlConnection, MockSqlConnector};
pub use sql_connector::{
    ConnectionProfile, SqlConnection, SqlConnector, SqlError, SqlParams, SqlRows, SqlValue,
};
#[cfg(test)]
pub use token_verifier::MockTokenVerifier;
pub use token_verifier::{TokenVerificationError, TokenVerifier, VerifiedIdentity};
