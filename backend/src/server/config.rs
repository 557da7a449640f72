//! HTTP server configuration object and helpers.

use std::net::SocketAddr;

use gateway::outbound::persistence::DbPool;
use gateway::settings::GatewaySettings;

/// Builder-style configuration for creating the HTTP server.
pub struct ServerConfig {
    pub(crate) settings: GatewaySettings,
    pub(crate) bind_addr: SocketAddr,
    pub(crate) db_pool: Option<DbPool>,
}

impl ServerConfig {
    /// Construct a server configuration from loaded settings.
    #[must_use]
    pub fn new(settings: GatewaySettings, bind_addr: SocketAddr) -> Self {
        Self {
            settings,
            bind_addr,
            db_pool: None,
        }
    }

    /// Attach a database connection pool for the item store.
    ///
    /// Without one, records live in process memory and vanish on restart.
    #[must_use]
    pub fn with_db_pool(mut self, pool: DbPool) -> Self {
        self.db_pool = Some(pool);
        self
    }
}
