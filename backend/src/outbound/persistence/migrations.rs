//! Embedded schema migrations for the item store.

use diesel::{Connection, PgConnection};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::info;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Failure applying migrations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to migrate item store: {message}")]
pub struct MigrationError {
    message: String,
}

impl MigrationError {
    fn new(message: impl ToString) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Apply every pending migration to `database_url`.
///
/// Runs on the blocking pool; the migration harness needs a synchronous
/// connection.
pub async fn run_migrations(database_url: &str) -> Result<(), MigrationError> {
    let url = database_url.to_owned();
    tokio::task::spawn_blocking(move || {
        let mut conn = PgConnection::establish(&url).map_err(MigrationError::new)?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(MigrationError::new)?;
        info!(count = applied.len(), "item store migrations applied");
        Ok(())
    })
    .await
    .map_err(MigrationError::new)?
}
