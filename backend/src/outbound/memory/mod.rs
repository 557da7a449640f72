//! In-process item store for local runs and tests.
//!
//! Items live in one ordered map keyed by `(PK, SK)`, so range reads come
//! back in sort-key order without extra work. Every write takes the map's
//! write lock, which makes list appends atomic.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::ports::{ItemStore, ItemStoreError, PutCondition, item_key};
use crate::domain::{AttributeValue, Item, RecordKey};

/// Item store held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    items: RwLock<BTreeMap<RecordKey, Item>>,
}

impl InMemoryItemStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items.
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    /// Whether the store holds no items.
    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

fn condition_failed(key: &RecordKey) -> ItemStoreError {
    ItemStoreError::condition_failed(key.to_string())
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn get(&self, key: &RecordKey) -> Result<Option<Item>, ItemStoreError> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn query(
        &self,
        partition_key: &str,
        sort_key_prefix: &str,
    ) -> Result<Vec<Item>, ItemStoreError> {
        let items = self.items.read().await;
        Ok(items
            .iter()
            .filter(|(key, _)| {
                key.partition_key == partition_key && key.sort_key.starts_with(sort_key_prefix)
            })
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn put(&self, item: Item, condition: PutCondition) -> Result<(), ItemStoreError> {
        let key = item_key(&item)?;
        let mut items = self.items.write().await;
        let exists = items.contains_key(&key);
        match condition {
            PutCondition::IfAbsent if exists => return Err(condition_failed(&key)),
            PutCondition::IfExists if !exists => return Err(condition_failed(&key)),
            _ => {}
        }
        items.insert(key, item);
        Ok(())
    }

    async fn update(&self, key: &RecordKey, attributes: Item) -> Result<(), ItemStoreError> {
        let mut items = self.items.write().await;
        let item = items.get_mut(key).ok_or_else(|| condition_failed(key))?;
        item.extend(attributes);
        Ok(())
    }

    async fn append_to_list(
        &self,
        key: &RecordKey,
        attribute: &str,
        values: Vec<AttributeValue>,
    ) -> Result<(), ItemStoreError> {
        let mut items = self.items.write().await;
        let item = items.get_mut(key).ok_or_else(|| condition_failed(key))?;
        match item
            .entry(attribute.to_owned())
            .or_insert_with(|| AttributeValue::L(Vec::new()))
        {
            AttributeValue::L(list) => {
                list.extend(values);
                Ok(())
            }
            _ => Err(ItemStoreError::serialization(format!(
                "attribute {attribute} of {key} is not a list"
            ))),
        }
    }

    async fn delete(&self, key: &RecordKey) -> Result<(), ItemStoreError> {
        self.items.write().await.remove(key);
        Ok(())
    }
}
