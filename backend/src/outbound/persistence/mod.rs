//! PostgreSQL persistence for keyed items.
//!
//! Diesel row structs and the table schema stay private to this module; the
//! rest of the crate only sees the [`ItemStore`](crate::domain::ports::ItemStore)
//! port.

mod diesel_item_store;
mod migrations;
mod models;
mod pool;
mod schema;

pub use diesel_item_store::DieselItemStore;
pub use migrations::{MigrationError, run_migrations};
pub use pool::{DbPool, PoolError, PoolLimits, PoolStage};
