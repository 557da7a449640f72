//! Relational driver adapter over the synchronous `postgres` client.
//!
//! The client blocks, so connecting and every statement run on Tokio's
//! blocking pool. Each connection owns its client exclusively.

mod placeholders;
mod values;

use std::time::Duration;

use async_trait::async_trait;
use postgres::types::ToSql;
use postgres::{Client, Config, NoTls, SimpleQueryMessage};
use serde_json::Value;
use tracing::debug;

use crate::domain::ports::{
    ConnectionProfile, SqlConnection, SqlConnector, SqlError, SqlParams, SqlRows, SqlValue,
};

use self::placeholders::bind_named;
use self::values::{BindValue, row_to_json};

const APPLICATION_NAME: &str = "gateway";

/// Server complaint when one prepared statement holds several commands.
const MULTIPLE_COMMANDS: &str = "cannot insert multiple commands into a prepared statement";

/// Opens `postgres` connections for connector profiles.
#[derive(Debug, Clone, Copy)]
pub struct PostgresConnector {
    connect_timeout: Duration,
}

impl PostgresConnector {
    /// Connector giving up on unreachable servers after `connect_timeout`.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

fn client_config(profile: &ConnectionProfile, timeout: Duration) -> Result<Config, SqlError> {
    let port: u16 = profile
        .port
        .trim()
        .parse()
        .map_err(|_| SqlError::connection(format!("invalid port {}", profile.port)))?;
    let mut config = Config::new();
    config
        .host(&profile.host)
        .port(port)
        .user(&profile.username)
        .password(&profile.password)
        .dbname(&profile.database)
        .application_name(APPLICATION_NAME)
        .connect_timeout(timeout);
    Ok(config)
}

/// Category for a server error code.
fn categorize(code: &str, message: String) -> SqlError {
    match code {
        "23503" => SqlError::foreign_key_violation(message),
        "23505" => SqlError::unique_violation(message),
        "23502" => SqlError::not_null_violation(message),
        "P0001" => SqlError::raised_by_database(message),
        _ => SqlError::query(message),
    }
}

fn map_error(err: &postgres::Error) -> SqlError {
    match err.as_db_error() {
        Some(db) => categorize(db.code().code(), db.message().to_owned()),
        None if err.is_closed() => SqlError::connection(err.to_string()),
        None => SqlError::query(err.to_string()),
    }
}

#[async_trait]
impl SqlConnector for PostgresConnector {
    async fn connect(
        &self,
        profile: &ConnectionProfile,
    ) -> Result<Box<dyn SqlConnection>, SqlError> {
        let config = client_config(profile, self.connect_timeout)?;
        let client = tokio::task::spawn_blocking(move || config.connect(NoTls))
            .await
            .map_err(|err| SqlError::connection(format!("connect task failed: {err}")))?
            .map_err(|err| match err.as_db_error() {
                Some(db) => SqlError::connection(db.message()),
                None => SqlError::connection(err.to_string()),
            })?;
        debug!(host = %profile.host, database = %profile.database, "connected to external database");
        Ok(Box::new(PostgresConnection {
            client: Some(client),
        }))
    }
}

/// One open client, lent to the blocking pool for each statement.
struct PostgresConnection {
    client: Option<Client>,
}

/// Whether a prepare failure means `sql` holds several statements.
fn is_multi_statement(code: &str, message: &str) -> bool {
    code == "42601" && message.starts_with(MULTIPLE_COMMANDS)
}

/// One step of a simple-protocol reply.
#[derive(Debug, Clone, PartialEq)]
enum TextReply {
    Columns(Vec<String>),
    Row(Vec<Option<String>>),
    Done,
}

fn text_reply(message: SimpleQueryMessage) -> Option<TextReply> {
    match message {
        SimpleQueryMessage::RowDescription(columns) => Some(TextReply::Columns(
            columns.iter().map(|column| column.name().to_owned()).collect(),
        )),
        SimpleQueryMessage::Row(row) => Some(TextReply::Row(
            (0..row.len())
                .map(|index| row.get(index).map(str::to_owned))
                .collect(),
        )),
        SimpleQueryMessage::CommandComplete(_) => Some(TextReply::Done),
        _ => None,
    }
}

/// Result set of the last statement in a reply. Cells stay text.
fn last_result(replies: impl IntoIterator<Item = TextReply>) -> SqlRows {
    let mut current = SqlRows::default();
    let mut last = SqlRows::default();
    for reply in replies {
        match reply {
            TextReply::Columns(columns) => current.columns = columns,
            TextReply::Row(cells) => current.rows.push(
                cells
                    .into_iter()
                    .map(|cell| cell.map_or(Value::Null, Value::String))
                    .collect(),
            ),
            TextReply::Done => last = std::mem::take(&mut current),
        }
    }
    last
}

/// Runs several `;`-separated statements over the simple protocol.
fn run_script(client: &mut Client, sql: &str) -> Result<SqlRows, SqlError> {
    let messages = client.simple_query(sql).map_err(|err| map_error(&err))?;
    Ok(last_result(messages.into_iter().filter_map(text_reply)))
}

fn run(client: &mut Client, sql: &str, values: &[SqlValue]) -> Result<SqlRows, SqlError> {
    let statement = match client.prepare(sql) {
        Ok(statement) => statement,
        Err(err)
            if values.is_empty()
                && err
                    .as_db_error()
                    .is_some_and(|db| is_multi_statement(db.code().code(), db.message())) =>
        {
            debug!("running unparameterised multi-statement text");
            return run_script(client, sql);
        }
        Err(err) => return Err(map_error(&err)),
    };
    let binds: Vec<BindValue<'_>> = values.iter().map(BindValue).collect();
    let params: Vec<&(dyn ToSql + Sync)> = binds
        .iter()
        .map(|bind| bind as &(dyn ToSql + Sync))
        .collect();
    let rows = client
        .query(&statement, &params)
        .map_err(|err| map_error(&err))?;
    let columns = statement
        .columns()
        .iter()
        .map(|column| column.name().to_owned())
        .collect();
    let rows = rows
        .iter()
        .map(row_to_json)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| map_error(&err))?;
    Ok(SqlRows { columns, rows })
}

#[async_trait]
impl SqlConnection for PostgresConnection {
    async fn execute(&mut self, sql: &str, params: SqlParams) -> Result<SqlRows, SqlError> {
        let (statement, values) = match params {
            SqlParams::None => (sql.to_owned(), Vec::new()),
            SqlParams::Positional(values) => (sql.to_owned(), values),
            SqlParams::Named(named) => bind_named(sql, &named)?,
        };
        let mut client = self
            .client
            .take()
            .ok_or_else(|| SqlError::connection("connection was lost by an earlier failure"))?;
        let (client, result) = tokio::task::spawn_blocking(move || {
            let result = run(&mut client, &statement, &values);
            (client, result)
        })
        .await
        .map_err(|err| SqlError::query(format!("query task failed: {err}")))?;
        self.client = Some(client);
        result
    }
}

impl Drop for PostgresConnection {
    fn drop(&mut self) {
        // The client owns a runtime, which must not be dropped on an async worker.
        if let (Some(client), Ok(handle)) =
            (self.client.take(), tokio::runtime::Handle::try_current())
        {
            handle.spawn_blocking(move || drop(client));
        }
    }
}
