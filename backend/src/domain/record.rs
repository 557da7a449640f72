//! Keyed-record addressing.
//!
//! Entities are stored as flat attribute maps addressed by a partition key
//! `{OWNER_TYPE}#{owner_id}` and a sort key `{ENTITY_TYPE}#{identifier}`.
//! The sort-key prefix lets one owner's records of a single type be
//! range-scanned with a begins-with query. Attribute values use a tagged
//! representation; absent optional fields are omitted from the map entirely.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Error, Ksuid, UserId};

/// Attribute holding the partition key.
pub const PARTITION_KEY_ATTR: &str = "PK";
/// Attribute holding the sort key.
pub const SORT_KEY_ATTR: &str = "SK";
/// Type prefix of every partition key: records are owned by users.
pub const OWNER_TYPE: &str = "USER";
/// Separator between type prefix and value in both keys.
pub const KEY_DELIMITER: char = '#';

/// Tagged attribute value.
///
/// Serialises with single-letter tags, e.g. `{"S": "text"}` or
/// `{"N": "5432"}`; numbers keep their textual form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// String.
    S(String),
    /// Number in decimal text form.
    N(String),
    /// Boolean.
    #[serde(rename = "BOOL")]
    Bool(bool),
    /// Binary.
    B(Vec<u8>),
    /// Ordered list.
    L(Vec<AttributeValue>),
    /// Nested map.
    M(BTreeMap<String, AttributeValue>),
    /// Explicit null marker.
    #[serde(rename = "NULL")]
    Null(bool),
}

impl AttributeValue {
    /// String payload, if this is an `S`.
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(value) => Some(value),
            _ => None,
        }
    }

    /// Textual payload of an `S` or `N`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::S(value) | Self::N(value) => Some(value),
            _ => None,
        }
    }
}

/// Flat attribute map representing one stored record.
pub type Item = BTreeMap<String, AttributeValue>;

/// Storage address of one record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    /// `{OWNER_TYPE}#{owner_id}`.
    pub partition_key: String,
    /// `{ENTITY_TYPE}#{identifier}`.
    pub sort_key: String,
}

impl RecordKey {
    /// Partition key of everything owned by `owner`.
    pub fn partition_for(owner: &UserId) -> String {
        format!("{OWNER_TYPE}{KEY_DELIMITER}{owner}")
    }

    /// Sort key of an entity of `entity_type` with identifier `id`.
    pub fn sort_for(entity_type: &str, id: impl std::fmt::Display) -> String {
        format!("{entity_type}{KEY_DELIMITER}{id}")
    }

    /// Prefix matching every sort key of `entity_type`.
    pub fn sort_prefix(entity_type: &str) -> String {
        format!("{entity_type}{KEY_DELIMITER}")
    }

    /// Read the key attributes from a stored item.
    pub fn from_item(item: &Item) -> Result<Self, Error> {
        Ok(Self {
            partition_key: required_s(item, PARTITION_KEY_ATTR)
                .map_err(|_| Error::corrupt_record("record has no partition key"))?,
            sort_key: required_s(item, SORT_KEY_ATTR)
                .map_err(|_| Error::corrupt_record("record has no sort key"))?,
        })
    }

    /// Key attributes as an item fragment.
    pub fn to_attributes(&self) -> Item {
        Item::from([
            (
                PARTITION_KEY_ATTR.to_owned(),
                AttributeValue::S(self.partition_key.clone()),
            ),
            (
                SORT_KEY_ATTR.to_owned(),
                AttributeValue::S(self.sort_key.clone()),
            ),
        ])
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.partition_key, self.sort_key)
    }
}

/// Domain entity that maps onto one keyed record.
///
/// Implementors provide the entity-specific attributes; key derivation and
/// splitting live here so every entity follows the same layout.
pub trait KeyedRecord: Sized {
    /// Sort-key type prefix, e.g. `CONNECTOR`.
    const ENTITY_TYPE: &'static str;

    /// Owning user.
    fn owner(&self) -> &UserId;

    /// Entity identifier.
    fn id(&self) -> Ksuid;

    /// Entity fields, with absent optional values left out.
    fn attributes(&self) -> Item;

    /// Rebuild the entity from its fields and the identity recovered from
    /// the key attributes.
    fn from_attributes(owner: UserId, id: Ksuid, item: &Item) -> Result<Self, Error>;

    /// Storage address for `id` under `owner`.
    fn key_for(owner: &UserId, id: Ksuid) -> RecordKey {
        RecordKey {
            partition_key: RecordKey::partition_for(owner),
            sort_key: RecordKey::sort_for(Self::ENTITY_TYPE, id),
        }
    }

    /// This entity's storage address.
    fn key(&self) -> RecordKey {
        Self::key_for(self.owner(), self.id())
    }

    /// Full stored form: key attributes plus entity fields.
    fn to_item(&self) -> Item {
        let mut item = self.attributes();
        item.extend(self.key().to_attributes());
        item
    }

    /// Inverse of [`KeyedRecord::to_item`].
    ///
    /// Owner and identifier come from splitting the keys on `#`; a key
    /// without the expected type prefix is a corrupt record.
    fn from_item(item: &Item) -> Result<Self, Error> {
        let key = RecordKey::from_item(item)?;
        let owner_raw = split_key(&key.partition_key, OWNER_TYPE)?;
        let id_raw = split_key(&key.sort_key, Self::ENTITY_TYPE)?;
        let owner = UserId::new(owner_raw)
            .map_err(|err| Error::corrupt_record(format!("{key}: {err}")))?;
        let id = Ksuid::decode(id_raw)
            .map_err(|err| Error::corrupt_record(format!("{key}: {err}")))?;
        Self::from_attributes(owner, id, item)
    }
}

fn split_key<'a>(key: &'a str, expected_type: &str) -> Result<&'a str, Error> {
    match key.split_once(KEY_DELIMITER) {
        Some((prefix, rest)) if prefix == expected_type => Ok(rest),
        _ => Err(Error::corrupt_record(format!(
            "key {key:?} does not start with {expected_type}{KEY_DELIMITER}"
        ))),
    }
}

/// Read a required string attribute.
pub fn required_s(item: &Item, name: &str) -> Result<String, Error> {
    item.get(name)
        .and_then(AttributeValue::as_s)
        .map(str::to_owned)
        .ok_or_else(|| Error::corrupt_record(format!("attribute {name} missing or not a string")))
}

/// Read an optional string attribute; an explicit `NULL` counts as absent.
pub fn optional_s(item: &Item, name: &str) -> Result<Option<String>, Error> {
    match item.get(name) {
        None | Some(AttributeValue::Null(_)) => Ok(None),
        Some(AttributeValue::S(value)) => Ok(Some(value.clone())),
        Some(_) => Err(Error::corrupt_record(format!(
            "attribute {name} is not a string"
        ))),
    }
}

/// Insert `value` under `name` only when present.
pub fn put_optional(item: &mut Item, name: &str, value: Option<&str>) {
    if let Some(text) = value {
        item.insert(name.to_owned(), AttributeValue::S(text.to_owned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        owner: UserId,
        id: Ksuid,
        body: String,
        tag: Option<String>,
    }

    impl KeyedRecord for Note {
        const ENTITY_TYPE: &'static str = "NOTE";

        fn owner(&self) -> &UserId {
            &self.owner
        }

        fn id(&self) -> Ksuid {
            self.id
        }

        fn attributes(&self) -> Item {
            let mut item = Item::from([("body".to_owned(), AttributeValue::S(self.body.clone()))]);
            put_optional(&mut item, "tag", self.tag.as_deref());
            item
        }

        fn from_attributes(owner: UserId, id: Ksuid, item: &Item) -> Result<Self, Error> {
            Ok(Self {
                owner,
                id,
                body: required_s(item, "body")?,
                tag: optional_s(item, "tag")?,
            })
        }
    }

    fn note(tag: Option<&str>) -> Note {
        Note {
            owner: UserId::new("user-1").expect("valid user"),
            id: Ksuid::from_parts(10, [1; 16]),
            body: "hello".to_owned(),
            tag: tag.map(str::to_owned),
        }
    }

    #[test]
    fn key_derivation_is_prefixed() {
        let record = note(None);
        let key = record.key();
        assert_eq!(key.partition_key, "USER#user-1");
        assert_eq!(key.sort_key, format!("NOTE#{}", record.id));
    }

    #[rstest]
    #[case(None)]
    #[case(Some("pinned"))]
    fn item_round_trips(#[case] tag: Option<&str>) {
        let record = note(tag);
        let back = Note::from_item(&record.to_item()).expect("round trip");
        assert_eq!(back, record);
    }

    #[test]
    fn absent_optional_fields_are_omitted() {
        let item = note(None).to_item();
        assert!(!item.contains_key("tag"));
        assert!(!item.values().any(|v| matches!(v, AttributeValue::Null(_))));
    }

    #[rstest]
    #[case("PK", "ACCOUNT#user-1")]
    #[case("SK", "CHAT#000000000000000000000000000")]
    #[case("SK", "no-delimiter")]
    fn wrong_key_prefix_is_corrupt(#[case] attr: &str, #[case] value: &str) {
        let mut item = note(None).to_item();
        item.insert(attr.to_owned(), AttributeValue::S(value.to_owned()));
        let err = Note::from_item(&item).expect_err("corrupt record");
        assert_eq!(err.code(), crate::domain::ErrorCode::CorruptRecord);
    }

    #[test]
    fn attribute_values_use_single_letter_tags() {
        let value = AttributeValue::M(BTreeMap::from([
            ("n".to_owned(), AttributeValue::N("5432".to_owned())),
            ("b".to_owned(), AttributeValue::Bool(true)),
            ("l".to_owned(), AttributeValue::L(vec![AttributeValue::Null(true)])),
        ]));
        assert_eq!(
            serde_json::to_value(&value).expect("serialise"),
            json!({"M": {"b": {"BOOL": true}, "l": {"L": [{"NULL": true}]}, "n": {"N": "5432"}}})
        );
    }
}
