//! PostgreSQL-backed `ItemStore` using Diesel.
//!
//! Each item is one row of `items`. Key attributes live in the `pk` and `sk`
//! columns; everything else is the tagged attribute map in `attributes`.
//! Conditional writes and list appends are single statements, so no
//! transaction is held across calls.

use async_trait::async_trait;
use diesel::dsl::sql;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{Jsonb, Text};
use diesel_async::RunQueryDsl;
use serde_json::Value;
use tracing::debug;

use crate::domain::ports::{ItemStore, ItemStoreError, PutCondition, item_key};
use crate::domain::record::{PARTITION_KEY_ATTR, SORT_KEY_ATTR};
use crate::domain::{AttributeValue, Item, RecordKey};

use super::models::{ItemRow, NewItemRow};
use super::pool::{DbPool, PoolError};
use super::schema::items;

const UPSERT_SQL: &str = r#"
INSERT INTO items (pk, sk, attributes)
VALUES ($1, $2, $3)
ON CONFLICT (pk, sk)
DO UPDATE SET attributes = EXCLUDED.attributes, updated_at = now()
"#;

const REPLACE_SQL: &str = r#"
UPDATE items SET attributes = $3, updated_at = now()
WHERE pk = $1 AND sk = $2
"#;

const MERGE_SQL: &str = r#"
UPDATE items SET attributes = attributes || $3, updated_at = now()
WHERE pk = $1 AND sk = $2
"#;

const APPEND_SQL: &str = r#"
UPDATE items
SET attributes = jsonb_set(
        attributes,
        ARRAY[$3],
        jsonb_build_object('L', COALESCE(attributes -> $3 -> 'L', '[]'::jsonb) || $4)
    ),
    updated_at = now()
WHERE pk = $1 AND sk = $2
"#;

/// Range reads order sort keys bytewise, matching KSUID order.
const SORT_KEY_ORDER: &str = r#"sk COLLATE "C""#;

/// Diesel implementation of the [`ItemStore`] port.
#[derive(Clone)]
pub struct DieselItemStore {
    pool: DbPool,
}

impl DieselItemStore {
    /// Create a store over `pool`.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> ItemStoreError {
    ItemStoreError::connection(error.to_string())
}

fn map_diesel_error(error: diesel::result::Error) -> ItemStoreError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), "diesel operation failed");
        }
        _ => debug!(
            error_type = %std::any::type_name_of_val(&error),
            "diesel operation failed"
        ),
    }

    match error {
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            ItemStoreError::connection("database connection error")
        }
        DieselError::DeserializationError(err) | DieselError::SerializationError(err) => {
            ItemStoreError::serialization(err.to_string())
        }
        DieselError::DatabaseError(_, info) => ItemStoreError::query(info.message()),
        other => ItemStoreError::query(other.to_string()),
    }
}

/// Split `item` into its key and the JSON of its remaining attributes.
fn split_item(mut item: Item) -> Result<(RecordKey, Value), ItemStoreError> {
    let key = item_key(&item)?;
    item.remove(PARTITION_KEY_ATTR);
    item.remove(SORT_KEY_ATTR);
    let attributes = serde_json::to_value(&item)
        .map_err(|err| ItemStoreError::serialization(err.to_string()))?;
    Ok((key, attributes))
}

fn attributes_json(attributes: &Item) -> Result<Value, ItemStoreError> {
    serde_json::to_value(attributes).map_err(|err| ItemStoreError::serialization(err.to_string()))
}

fn row_to_item(row: ItemRow) -> Result<Item, ItemStoreError> {
    let mut item: Item = serde_json::from_value(row.attributes).map_err(|err| {
        ItemStoreError::serialization(format!("stored attributes of {}/{}: {err}", row.pk, row.sk))
    })?;
    item.extend(
        RecordKey {
            partition_key: row.pk,
            sort_key: row.sk,
        }
        .to_attributes(),
    );
    Ok(item)
}

/// `prefix` as a LIKE pattern matching every string that starts with it.
fn prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// Items under `partition_key` whose sort key starts with `sort_key_prefix`.
fn range_query<'a>(partition_key: &'a str, sort_key_prefix: &str) -> items::BoxedQuery<'a, Pg> {
    items::table
        .filter(items::pk.eq(partition_key))
        .filter(items::sk.like(prefix_pattern(sort_key_prefix)))
        .order(sql::<Text>(SORT_KEY_ORDER).asc())
        .into_boxed()
}

fn require_row(affected: usize, key: &RecordKey) -> Result<(), ItemStoreError> {
    if affected == 0 {
        return Err(ItemStoreError::condition_failed(key.to_string()));
    }
    Ok(())
}

#[async_trait]
impl ItemStore for DieselItemStore {
    async fn get(&self, key: &RecordKey) -> Result<Option<Item>, ItemStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row = items::table
            .filter(items::pk.eq(&key.partition_key))
            .filter(items::sk.eq(&key.sort_key))
            .select(ItemRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        row.map(row_to_item).transpose()
    }

    async fn query(
        &self,
        partition_key: &str,
        sort_key_prefix: &str,
    ) -> Result<Vec<Item>, ItemStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<ItemRow> = range_query(partition_key, sort_key_prefix)
            .select(ItemRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        rows.into_iter().map(row_to_item).collect()
    }

    async fn put(&self, item: Item, condition: PutCondition) -> Result<(), ItemStoreError> {
        let (key, attributes) = split_item(item)?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        match condition {
            PutCondition::Always => {
                sql_query(UPSERT_SQL)
                    .bind::<Text, _>(&key.partition_key)
                    .bind::<Text, _>(&key.sort_key)
                    .bind::<Jsonb, _>(&attributes)
                    .execute(&mut conn)
                    .await
                    .map_err(map_diesel_error)?;
                Ok(())
            }
            PutCondition::IfAbsent => {
                let affected = diesel::insert_into(items::table)
                    .values(&NewItemRow {
                        pk: &key.partition_key,
                        sk: &key.sort_key,
                        attributes: &attributes,
                    })
                    .on_conflict_do_nothing()
                    .execute(&mut conn)
                    .await
                    .map_err(map_diesel_error)?;
                require_row(affected, &key)
            }
            PutCondition::IfExists => {
                let affected = sql_query(REPLACE_SQL)
                    .bind::<Text, _>(&key.partition_key)
                    .bind::<Text, _>(&key.sort_key)
                    .bind::<Jsonb, _>(&attributes)
                    .execute(&mut conn)
                    .await
                    .map_err(map_diesel_error)?;
                require_row(affected, &key)
            }
        }
    }

    async fn update(&self, key: &RecordKey, mut attributes: Item) -> Result<(), ItemStoreError> {
        attributes.remove(PARTITION_KEY_ATTR);
        attributes.remove(SORT_KEY_ATTR);
        let patch = attributes_json(&attributes)?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let affected = sql_query(MERGE_SQL)
            .bind::<Text, _>(&key.partition_key)
            .bind::<Text, _>(&key.sort_key)
            .bind::<Jsonb, _>(&patch)
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        require_row(affected, key)
    }

    async fn append_to_list(
        &self,
        key: &RecordKey,
        attribute: &str,
        values: Vec<AttributeValue>,
    ) -> Result<(), ItemStoreError> {
        let values = serde_json::to_value(&values)
            .map_err(|err| ItemStoreError::serialization(err.to_string()))?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let affected = sql_query(APPEND_SQL)
            .bind::<Text, _>(&key.partition_key)
            .bind::<Text, _>(&key.sort_key)
            .bind::<Text, _>(attribute)
            .bind::<Jsonb, _>(&values)
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        require_row(affected, key)
    }

    async fn delete(&self, key: &RecordKey) -> Result<(), ItemStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::delete(
            items::table
                .filter(items::pk.eq(&key.partition_key))
                .filter(items::sk.eq(&key.sort_key)),
        )
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn key() -> RecordKey {
        RecordKey {
            partition_key: "USER#u".to_owned(),
            sort_key: "CHAT#c".to_owned(),
        }
    }

    #[rstest]
    #[case("CHAT#", "CHAT#%")]
    #[case("A_B%", "A\\_B\\%%")]
    #[case("", "%")]
    fn prefixes_escape_like_wildcards(#[case] prefix: &str, #[case] expected: &str) {
        assert_eq!(prefix_pattern(prefix), expected);
    }

    #[test]
    fn range_reads_order_sort_keys_bytewise() {
        let rendered = diesel::debug_query::<Pg, _>(&range_query("USER#u", "CHAT#")).to_string();
        assert!(
            rendered.contains(r#"ORDER BY sk COLLATE "C" ASC"#),
            "unexpected ordering in {rendered}"
        );
    }

    #[test]
    fn split_item_moves_keys_out_of_attributes() {
        let mut item = key().to_attributes();
        item.insert("query".to_owned(), AttributeValue::S("select 1".to_owned()));
        let (split_key, attributes) = split_item(item).expect("keyed item");
        assert_eq!(split_key, key());
        assert_eq!(attributes, json!({"query": {"S": "select 1"}}));
    }

    #[test]
    fn split_item_requires_keys() {
        let err = split_item(Item::new()).expect_err("no keys");
        assert!(matches!(err, ItemStoreError::Serialization { .. }));
    }

    #[test]
    fn rows_regain_their_key_attributes() {
        let item = row_to_item(ItemRow {
            pk: "USER#u".to_owned(),
            sk: "CHAT#c".to_owned(),
            attributes: json!({"messages": {"L": []}}),
        })
        .expect("valid row");
        assert_eq!(RecordKey::from_item(&item).expect("keys"), key());
        assert_eq!(item["messages"], AttributeValue::L(Vec::new()));
    }

    #[test]
    fn corrupt_rows_are_serialization_errors() {
        let err = row_to_item(ItemRow {
            pk: "USER#u".to_owned(),
            sk: "CHAT#c".to_owned(),
            attributes: json!({"messages": {"Q": 1}}),
        })
        .expect_err("unknown tag");
        assert!(matches!(err, ItemStoreError::Serialization { .. }));
    }

    #[rstest]
    #[case(0, false)]
    #[case(1, true)]
    fn zero_affected_rows_fail_the_condition(#[case] affected: usize, #[case] ok: bool) {
        assert_eq!(require_row(affected, &key()).is_ok(), ok);
    }
}
