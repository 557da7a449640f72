//! Stored database-connection profiles.

use serde_json::{Value, json};

use super::ports::ConnectionProfile;
use super::record::{AttributeValue, Item, KeyedRecord, optional_s, put_optional, required_s};
use super::{Error, Ksuid, Params, UserId};

/// Fields a create or replace request must carry.
pub const CONNECTOR_FIELDS: [&str; 5] = ["host", "port", "database", "user", "password"];

const HOST: &str = "host";
const PORT: &str = "port";
const USER: &str = "user";
const PASSWORD: &str = "password";
const DATABASE: &str = "database";
const NAME: &str = "name";
const INSPECTION: &str = "inspection";

/// A registered external database.
///
/// Credentials and address only change through a full replace; the cached
/// `inspection` is the one attribute updated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Connector {
    pub id: Ksuid,
    pub user_id: UserId,
    pub host: String,
    pub port: String,
    pub username: String,
    pub password: String,
    pub database: String,
    pub name: Option<String>,
    /// Serialised result of the last full schema inspection.
    pub inspection: Option<String>,
}

impl Connector {
    /// Build a connector from request parameters.
    ///
    /// Missing connection fields fail with an incorrect-signature error
    /// naming [`CONNECTOR_FIELDS`].
    pub fn from_params(id: Ksuid, user_id: UserId, params: &Params) -> Result<Self, Error> {
        let [host, port, database, username, password] = params.require(CONNECTOR_FIELDS)?;
        Ok(Self {
            id,
            user_id,
            host,
            port,
            username,
            password,
            database,
            name: params.text(NAME),
            inspection: None,
        })
    }

    /// Connection details for the relational driver.
    pub fn profile(&self) -> ConnectionProfile {
        ConnectionProfile {
            host: self.host.clone(),
            port: self.port.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
        }
    }

    /// Representation returned after create or replace, credentials included.
    pub fn full_view(&self) -> Value {
        let mut view = self.public_view();
        if let Value::Object(map) = &mut view {
            map.insert(PASSWORD.to_owned(), Value::String(self.password.clone()));
        }
        view
    }

    /// Representation used in listings; the password is withheld.
    pub fn public_view(&self) -> Value {
        let mut view = json!({
            "id": self.id,
            HOST: self.host,
            PORT: self.port,
            USER: self.username,
            DATABASE: self.database,
            NAME: self.name,
        });
        if let (Value::Object(map), Some(inspection)) = (&mut view, &self.inspection) {
            map.insert(INSPECTION.to_owned(), Value::String(inspection.clone()));
        }
        view
    }

    /// Attribute subset written when caching an inspection result.
    pub fn inspection_attributes(inspection: &str) -> Item {
        Item::from([(
            INSPECTION.to_owned(),
            AttributeValue::S(inspection.to_owned()),
        )])
    }
}

fn port_attribute(port: &str) -> AttributeValue {
    if port.parse::<u16>().is_ok() {
        AttributeValue::N(port.to_owned())
    } else {
        AttributeValue::S(port.to_owned())
    }
}

impl KeyedRecord for Connector {
    const ENTITY_TYPE: &'static str = "CONNECTOR";

    fn owner(&self) -> &UserId {
        &self.user_id
    }

    fn id(&self) -> Ksuid {
        self.id
    }

    fn attributes(&self) -> Item {
        let mut item = Item::from([
            (HOST.to_owned(), AttributeValue::S(self.host.clone())),
            (PORT.to_owned(), port_attribute(&self.port)),
            (USER.to_owned(), AttributeValue::S(self.username.clone())),
            (PASSWORD.to_owned(), AttributeValue::S(self.password.clone())),
            (DATABASE.to_owned(), AttributeValue::S(self.database.clone())),
        ]);
        put_optional(&mut item, NAME, self.name.as_deref());
        put_optional(&mut item, INSPECTION, self.inspection.as_deref());
        item
    }

    fn from_attributes(owner: UserId, id: Ksuid, item: &Item) -> Result<Self, Error> {
        let port = item
            .get(PORT)
            .and_then(AttributeValue::as_text)
            .map(str::to_owned)
            .ok_or_else(|| Error::corrupt_record("connector has no port"))?;
        Ok(Self {
            id,
            user_id: owner,
            host: required_s(item, HOST)?,
            port,
            username: required_s(item, USER)?,
            password: required_s(item, PASSWORD)?,
            database: required_s(item, DATABASE)?,
            name: optional_s(item, NAME)?,
            inspection: optional_s(item, INSPECTION)?,
        })
    }
}
