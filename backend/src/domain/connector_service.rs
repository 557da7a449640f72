//! Connector use cases: registration, listing, inspection and ad-hoc queries.

use std::collections::BTreeMap;
use std::sync::Arc;

use mockable::Clock;
use serde_json::{Value, json};
use tracing::{error, info};

use crate::domain::inspection::{INSPECT_SQL, InspectionRequest, ROUTINE_SQL, TRIGGER_SQL, describe_trigger};
use crate::domain::ports::{ItemStore, PutCondition, SqlConnector, SqlParams, SqlRows, SqlValue};
use crate::domain::record::{KeyedRecord, RecordKey};
use crate::domain::{Connector, Error, Ksuid, Params, UserId};

/// Connector service over the item store and the relational driver.
#[derive(Clone)]
pub struct ConnectorService {
    store: Arc<dyn ItemStore>,
    sql: Arc<dyn SqlConnector>,
    clock: Arc<dyn Clock>,
}

impl ConnectorService {
    /// Create a new service with the given collaborators.
    pub fn new(store: Arc<dyn ItemStore>, sql: Arc<dyn SqlConnector>, clock: Arc<dyn Clock>) -> Self {
        Self { store, sql, clock }
    }

    /// Every connector owned by `caller`, oldest first.
    pub async fn list(&self, caller: &UserId) -> Result<Vec<Connector>, Error> {
        let items = self
            .store
            .query(
                &RecordKey::partition_for(caller),
                &RecordKey::sort_prefix(Connector::ENTITY_TYPE),
            )
            .await?;
        items
            .iter()
            .map(|item| {
                Connector::from_item(item).inspect_err(|err| {
                    error!(user_id = %caller, error = %err, "stored connector is corrupt");
                })
            })
            .collect()
    }

    /// Register a new connector under a fresh identifier.
    pub async fn create(&self, caller: &UserId, params: &Params) -> Result<Connector, Error> {
        let id = Ksuid::generate(self.clock.as_ref(), &mut rand::thread_rng());
        let connector = Connector::from_params(id, caller.clone(), params)?;
        self.store
            .put(connector.to_item(), PutCondition::IfAbsent)
            .await?;
        info!(user_id = %caller, connector_id = %id, "connector created");
        Ok(connector)
    }

    /// Replace every field of an existing connector.
    ///
    /// The cached inspection is discarded along with the old fields.
    pub async fn replace(
        &self,
        caller: &UserId,
        connector_id: &str,
        params: &Params,
    ) -> Result<Connector, Error> {
        let id = Ksuid::decode(connector_id)?;
        let connector = Connector::from_params(id, caller.clone(), params)?;
        self.store
            .put(connector.to_item(), PutCondition::IfExists)
            .await?;
        Ok(connector)
    }

    /// Remove a connector; removing an unknown one succeeds.
    pub async fn delete(&self, caller: &UserId, connector_id: &str) -> Result<(), Error> {
        let id = Ksuid::decode(connector_id)?;
        self.store.delete(&Connector::key_for(caller, id)).await?;
        Ok(())
    }

    /// Resolve `connector_id` for `caller`, failing with not-found when absent.
    pub async fn require(&self, caller: &UserId, connector_id: &str) -> Result<Connector, Error> {
        let not_found = || Error::not_found(format!("connector {connector_id}"));
        let Ok(id) = Ksuid::decode(connector_id) else {
            return Err(not_found());
        };
        match self.store.get(&Connector::key_for(caller, id)).await? {
            Some(item) => Connector::from_item(&item),
            None => Err(not_found()),
        }
    }

    /// Inspect the connector's database.
    ///
    /// A full inspection is cached on the connector.
    pub async fn inspect(&self, connector: &Connector, params: &Params) -> Result<Value, Error> {
        match InspectionRequest::from_params(params) {
            InspectionRequest::Trigger {
                schema,
                table,
                trigger,
            } => {
                let rows = self
                    .run(
                        connector,
                        TRIGGER_SQL,
                        named([("schema", schema), ("table", table), ("trigger", trigger.clone())]),
                    )
                    .await?;
                let row = rows
                    .first_record()
                    .ok_or_else(|| Error::not_found(format!("trigger {trigger}")))?;
                describe_trigger(&row)
            }
            InspectionRequest::Routine { schema, routine } => {
                let rows = self
                    .run(
                        connector,
                        ROUTINE_SQL,
                        named([("schema", schema), ("routine", routine.clone())]),
                    )
                    .await?;
                rows.first_record()
                    .map(Value::Object)
                    .ok_or_else(|| Error::not_found(format!("routine {routine}")))
            }
            InspectionRequest::Full => {
                let params = SqlParams::Named(BTreeMap::from([(
                    "schemata".to_owned(),
                    SqlValue::Null,
                )]));
                let rows = self.run(connector, INSPECT_SQL, params).await?;
                let inspection = rows
                    .first_record()
                    .map(Value::Object)
                    .unwrap_or_else(|| json!({ "databases": null }));
                let serialized = serde_json::to_string(&inspection)
                    .map_err(|err| Error::internal(format!("failed to serialise inspection: {err}")))?;
                self.store
                    .update(&connector.key(), Connector::inspection_attributes(&serialized))
                    .await?;
                Ok(inspection)
            }
        }
    }

    /// Run the caller's `query` verbatim and return every row.
    pub async fn query(&self, connector: &Connector, params: &Params) -> Result<Value, Error> {
        let [query] = params.require(["query"])?;
        let rows = self.run(connector, &query, SqlParams::None).await?;
        Ok(json!({
            "query": query,
            "columns": rows.columns,
            "rows": rows.records(),
        }))
    }

    async fn run(&self, connector: &Connector, sql: &str, params: SqlParams) -> Result<SqlRows, Error> {
        let mut connection = self.sql.connect(&connector.profile()).await?;
        Ok(connection.execute(sql, params).await?)
    }
}

fn named<const N: usize>(pairs: [(&str, String); N]) -> SqlParams {
    SqlParams::Named(
        pairs
            .into_iter()
            .map(|(name, value)| (name.to_owned(), SqlValue::Text(value)))
            .collect(),
    )
}
