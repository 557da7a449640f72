//! Row structs for the `items` table.

use diesel::prelude::*;
use serde_json::Value;

use super::schema::items;

/// One stored item as read back.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct ItemRow {
    pub pk: String,
    pub sk: String,
    pub attributes: Value,
}

/// Insertable item; `updated_at` is left to the column default.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = items)]
pub(crate) struct NewItemRow<'a> {
    pub pk: &'a str,
    pub sk: &'a str,
    pub attributes: &'a Value,
}
