//! Domain primitives, entities, services and ports.
//!
//! Nothing here knows about HTTP or any storage engine; inbound adapters
//! translate requests into these types and outbound adapters implement the
//! ports.

pub mod authorizer;
pub mod chat;
pub mod chat_service;
pub mod connector;
pub mod connector_service;
pub mod error;
pub mod inspection;
pub mod ksuid;
pub mod params;
pub mod ports;
pub mod prompts;
pub mod record;
pub mod trace_id;
pub mod user;

pub use self::authorizer::{AuthorizationRequest, AuthorizerService, PolicyScope};
pub use self::chat::{Chat, ChatDraft, Message};
pub use self::chat_service::ChatService;
pub use self::connector::Connector;
pub use self::connector_service::ConnectorService;
pub use self::error::{Error, ErrorCode};
pub use self::ksuid::{Ksuid, KsuidError};
pub use self::params::Params;
pub use self::record::{AttributeValue, Item, KeyedRecord, RecordKey};
pub use self::trace_id::{TRACE_ID_HEADER, TraceId};
pub use self::user::{UserId, UserIdValidationError};
