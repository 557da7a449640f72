//! Merged request parameters handed to handlers.
//!
//! Parameters arrive in layers (path, query, body). Layers are merged in
//! order with later layers overwriting earlier keys, and every top-level key
//! is converted from camelCase to snake_case. Nested values are left as-is.

use serde_json::{Map, Value};

use super::Error;

/// Convert a camelCase key to snake_case.
///
/// An underscore is inserted before every ASCII uppercase letter that is not
/// the first character, then the whole key is lowercased.
///
/// # Examples
/// ```
/// use gateway::domain::params::camel_to_snake;
///
/// assert_eq!(camel_to_snake("fooBar"), "foo_bar");
/// assert_eq!(camel_to_snake("Schema"), "schema");
/// assert_eq!(camel_to_snake("already_snake"), "already_snake");
/// ```
pub fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (index, character) in key.chars().enumerate() {
        if index > 0 && character.is_ascii_uppercase() {
            out.push('_');
        }
        out.extend(character.to_lowercase());
    }
    out
}

/// Canonical parameter map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Map<String, Value>);

impl Params {
    /// Merge `layers` in order; later layers win on key collisions.
    pub fn from_layers<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Map<String, Value>>,
    {
        let mut merged = Map::new();
        for layer in layers {
            for (key, value) in layer {
                merged.insert(camel_to_snake(&key), value);
            }
        }
        Self(merged)
    }

    /// Raw value for `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Whether `name` holds a non-null value.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some_and(|value| !value.is_null())
    }

    /// Textual value for `name`; numbers and booleans are rendered as text.
    pub fn text(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            Value::String(value) => Some(value.clone()),
            Value::Number(value) => Some(value.to_string()),
            Value::Bool(value) => Some(value.to_string()),
            _ => None,
        }
    }

    /// Boolean switch for `name`, accepting JSON booleans and common text forms.
    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            Value::Bool(value) => Some(*value),
            Value::String(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            Value::Number(value) => value.as_i64().map(|n| n != 0),
            _ => None,
        }
    }

    /// Text values for every field in `signature`, in order.
    ///
    /// Any absent field fails with an incorrect-signature error naming the
    /// whole required set.
    ///
    /// # Examples
    /// ```
    /// use gateway::domain::Params;
    /// use serde_json::json;
    ///
    /// let params = Params::from_layers([json!({"query": "select 1"}).as_object().cloned().unwrap_or_default()]);
    /// let [query] = params.require(["query"]).expect("present");
    /// assert_eq!(query, "select 1");
    /// assert!(params.require(["query", "prompt"]).is_err());
    /// ```
    pub fn require<const N: usize>(&self, signature: [&str; N]) -> Result<[String; N], Error> {
        let values = signature
            .iter()
            .map(|name| self.text(name))
            .collect::<Option<Vec<String>>>()
            .ok_or_else(|| Error::incorrect_signature(&signature))?;
        values
            .try_into()
            .map_err(|_| Error::incorrect_signature(&signature))
    }

    /// Underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Params {
    fn from(value: Map<String, Value>) -> Self {
        Self::from_layers([value])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorCode;
    use rstest::rstest;
    use serde_json::json;

    fn layer(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object literal")
    }

    #[rstest]
    #[case("fooBar", "foo_bar")]
    #[case("connectorId", "connector_id")]
    #[case("URL", "u_r_l")]
    #[case("x", "x")]
    #[case("", "")]
    fn converts_keys(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(camel_to_snake(input), expected);
    }

    #[test]
    fn later_layers_win() {
        let params = Params::from_layers([
            layer(json!({"a": "1"})),
            layer(json!({"a": "2", "b": "3"})),
            layer(json!({"a": "4"})),
        ]);
        assert_eq!(params.as_map(), &layer(json!({"a": "4", "b": "3"})));
    }

    #[test]
    fn merged_keys_are_snake_cased_shallowly() {
        let params = Params::from_layers([layer(json!({"fooBar": {"innerKey": 1}}))]);
        assert_eq!(params.get("foo_bar"), Some(&json!({"innerKey": 1})));
        assert!(params.get("fooBar").is_none());
    }

    #[test]
    fn text_accepts_numbers() {
        let params = Params::from(layer(json!({"port": 5432})));
        assert_eq!(params.text("port").as_deref(), Some("5432"));
    }

    #[test]
    fn require_names_full_signature() {
        let params = Params::from(layer(json!({"host": "h"})));
        let err = params
            .require(["host", "port"])
            .expect_err("port missing");
        assert_eq!(err.code(), ErrorCode::IncorrectSignature);
        assert_eq!(err.details(), Some(&json!({"required": ["host", "port"]})));
    }

    #[test]
    fn null_counts_as_missing() {
        let params = Params::from(layer(json!({"host": null})));
        assert!(!params.contains("host"));
        assert!(params.require(["host"]).is_err());
    }

    #[rstest]
    #[case(json!(false), Some(false))]
    #[case(json!("true"), Some(true))]
    #[case(json!("0"), Some(false))]
    #[case(json!("maybe"), None)]
    fn flags_parse(#[case] raw: Value, #[case] expected: Option<bool>) {
        let params = Params::from(layer(json!({"stream": raw})));
        assert_eq!(params.flag("stream"), expected);
    }
}
