//! Port for the keyed item store holding connectors and chats.
use async_trait::async_trait;
use tracing::error;

use crate::domain::{AttributeValue, Error, Item, RecordKey};

use super::define_port_error;

define_port_error! {
    /// Errors raised by item store adapters.
    pub enum ItemStoreError {
        /// A conditional write found the record in the wrong state.
        ConditionFailed { key } => "conditional write failed for {key}",
        /// Store connection could not be established.
        Connection { message } => "item store connection failed: {message}",
        /// Read or write failed during execution.
        Query { message } => "item store query failed: {message}",
        /// Stored attributes could not be encoded or decoded.
        Serialization { message } => "item store serialization failed: {message}",
    }
}

impl From<ItemStoreError> for Error {
    fn from(err: ItemStoreError) -> Self {
        match err {
            ItemStoreError::ConditionFailed { key } => {
                Self::conflict(format!("conditional write failed for {key}"))
            }
            other => {
                error!(error = %other, "item store failure");
                Self::internal(other.to_string())
            }
        }
    }
}

/// Guard applied to [`ItemStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    /// Write regardless of current state.
    Always,
    /// Only create; fail when the key already exists.
    IfAbsent,
    /// Only replace; fail when the key does not exist.
    IfExists,
}

/// Keyed storage with partition/sort-key addressing.
///
/// Items carry their own `PK`/`SK` attributes. Range reads return items in
/// ascending sort-key order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Fetch one item.
    async fn get(&self, key: &RecordKey) -> Result<Option<Item>, ItemStoreError>;

    /// Every item in `partition_key` whose sort key begins with `sort_key_prefix`.
    async fn query(
        &self,
        partition_key: &str,
        sort_key_prefix: &str,
    ) -> Result<Vec<Item>, ItemStoreError>;

    /// Write a full item under `condition`.
    async fn put(&self, item: Item, condition: PutCondition) -> Result<(), ItemStoreError>;

    /// Overwrite the named attributes of an existing item, leaving the rest intact.
    ///
    /// Fails with [`ItemStoreError::ConditionFailed`] when the item is missing.
    async fn update(&self, key: &RecordKey, attributes: Item) -> Result<(), ItemStoreError>;

    /// Atomically append `values` to the list attribute `attribute`,
    /// creating the list when absent.
    ///
    /// Concurrent appends to the same item must all survive. Fails with
    /// [`ItemStoreError::ConditionFailed`] when the item is missing.
    async fn append_to_list(
        &self,
        key: &RecordKey,
        attribute: &str,
        values: Vec<AttributeValue>,
    ) -> Result<(), ItemStoreError>;

    /// Remove an item; deleting a missing item succeeds.
    async fn delete(&self, key: &RecordKey) -> Result<(), ItemStoreError>;
}

/// Read the key of a full item, as adapters need for `put`.
pub fn item_key(item: &Item) -> Result<RecordKey, ItemStoreError> {
    RecordKey::from_item(item).map_err(|err| ItemStoreError::serialization(err.message()))
}
