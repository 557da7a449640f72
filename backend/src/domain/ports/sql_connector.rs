//! Port for the relational databases that connectors point at.
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

use crate::domain::Error;

use super::define_port_error;

define_port_error! {
    /// Failures surfaced by relational driver adapters.
    ///
    /// Constraint violations and errors raised from database logic keep
    /// distinct categories so callers can tell them apart.
    pub enum SqlError {
        /// A foreign-key constraint rejected the statement.
        ForeignKeyViolation { message } => "foreign key violation: {message}",
        /// A uniqueness constraint rejected the statement.
        UniqueViolation { message } => "unique violation: {message}",
        /// A not-null constraint rejected the statement.
        NotNullViolation { message } => "not-null violation: {message}",
        /// A procedure or trigger raised an exception.
        RaisedByDatabase { message } => "{message}",
        /// The database could not be reached or rejected the credentials.
        Connection { message } => "database connection failed: {message}",
        /// Any other execution failure.
        Query { message } => "{message}",
    }
}

impl From<SqlError> for Error {
    fn from(err: SqlError) -> Self {
        match err {
            SqlError::ForeignKeyViolation { .. }
            | SqlError::UniqueViolation { .. }
            | SqlError::NotNullViolation { .. } => Self::conflict(err.to_string()),
            other => {
                warn!(error = %other, "relational query failed");
                Self::internal(other.to_string())
            }
        }
    }
}

/// Credentials and address of one external database.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub host: String,
    pub port: String,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl std::fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Bind value for a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    TextArray(Vec<String>),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Statement parameters in either placeholder style.
///
/// Positional parameters bind `$1`, `$2`, ...; named parameters bind
/// `%(name)s` placeholders.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlParams {
    #[default]
    None,
    Positional(Vec<SqlValue>),
    Named(BTreeMap<String, SqlValue>),
}

/// Result set with column order preserved.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl SqlRows {
    /// Rows as column-name keyed objects.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// First row as an object, if any.
    pub fn first_record(&self) -> Option<Map<String, Value>> {
        self.records().into_iter().next()
    }
}

/// Opens connections to external databases.
///
/// Every request opens its own connection; none are shared.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SqlConnector: Send + Sync {
    /// Open a connection described by `profile`.
    async fn connect(&self, profile: &ConnectionProfile) -> Result<Box<dyn SqlConnection>, SqlError>;
}

/// One open database connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SqlConnection: Send {
    /// Run `sql` with `params` and collect every returned row.
    async fn execute(&mut self, sql: &str, params: SqlParams) -> Result<SqlRows, SqlError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorCode;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(SqlError::foreign_key_violation("fk"), ErrorCode::Conflict)]
    #[case(SqlError::unique_violation("dup"), ErrorCode::Conflict)]
    #[case(SqlError::not_null_violation("null"), ErrorCode::Conflict)]
    #[case(SqlError::raised_by_database("custom"), ErrorCode::InternalError)]
    #[case(SqlError::connection("refused"), ErrorCode::InternalError)]
    #[case(SqlError::query("syntax error"), ErrorCode::InternalError)]
    fn categories_map_to_domain_codes(#[case] err: SqlError, #[case] expected: ErrorCode) {
        let mapped: Error = err.into();
        assert_eq!(mapped.code(), expected);
    }

    #[test]
    fn query_errors_keep_driver_message() {
        let mapped: Error = SqlError::query("relation \"x\" does not exist").into();
        assert_eq!(mapped.message(), "relation \"x\" does not exist");
    }

    #[test]
    fn records_zip_columns() {
        let rows = SqlRows {
            columns: vec!["id".to_owned(), "name".to_owned()],
            rows: vec![vec![json!(1), json!("a")], vec![json!(2), json!(null)]],
        };
        let records = rows.records();
        assert_eq!(Value::Object(records[1].clone()), json!({"id": 2, "name": null}));
        assert_eq!(rows.first_record().map(Value::Object), Some(json!({"id": 1, "name": "a"})));
    }

    #[test]
    fn profile_debug_hides_password() {
        let profile = ConnectionProfile {
            host: "h".to_owned(),
            port: "5432".to_owned(),
            username: "u".to_owned(),
            password: "secret".to_owned(),
            database: "d".to_owned(),
        };
        assert!(!format!("{profile:?}").contains("secret"));
    }
}
