//! Gateway settings loaded via OrthoConfig.
//!
//! Every value can come from a CLI flag, a `GATEWAY_*` environment variable
//! or the configuration file. Absent collaborators select local stand-ins:
//! no database URL means an in-memory store, no Gemini key means the
//! fixture language model.

use std::net::SocketAddr;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::PolicyScope;
use crate::inbound::normalizer::DEFAULT_MAX_BODY_BYTES;
use crate::outbound::gemini;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_POOL_SIZE: u32 = 10;
const DEFAULT_AUTHORIZER_REGION: &str = "us-east-1";
const DEFAULT_AUTHORIZER_ACCOUNT: &str = "*";
const DEFAULT_SQL_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Configuration values for the gateway process.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "GATEWAY")]
pub struct GatewaySettings {
    /// Listen address.
    pub bind_addr: Option<String>,
    /// PostgreSQL URL of the item store.
    pub database_url: Option<String>,
    /// Maximum item-store pool size.
    pub db_pool_max_size: Option<u32>,
    /// Gemini API key.
    pub gemini_api_key: Option<String>,
    /// Gemini model name.
    pub gemini_model: Option<String>,
    /// Gemini endpoint override.
    pub gemini_base_url: Option<String>,
    /// Firebase web API key used to verify ID tokens.
    pub firebase_api_key: Option<String>,
    /// Verify `Authorization: Bearer` tokens in front of the gateway.
    #[ortho_config(default = false)]
    pub verify_bearer_tokens: bool,
    /// Region written into authorizer policies.
    pub authorizer_region: Option<String>,
    /// Account written into authorizer policies.
    pub authorizer_account: Option<String>,
    /// Connect timeout for connector databases, in seconds.
    pub sql_connect_timeout_secs: Option<u64>,
    /// Largest accepted streaming request body, in bytes.
    pub max_body_bytes: Option<usize>,
}

/// Settings that cannot be turned into a running configuration.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The bind address does not parse.
    #[error("invalid bind address {value}: {source}")]
    BindAddr {
        /// Configured value.
        value: String,
        /// Parse failure.
        source: std::net::AddrParseError,
    },
}

impl GatewaySettings {
    /// Listen address, defaulting to all interfaces on port 8080.
    ///
    /// # Errors
    /// [`SettingsError::BindAddr`] when the configured value does not parse.
    pub fn bind_addr(&self) -> Result<SocketAddr, SettingsError> {
        let value = self.bind_addr.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
        value.parse().map_err(|source| SettingsError::BindAddr {
            value: value.to_owned(),
            source,
        })
    }

    /// Maximum item-store pool size.
    pub fn db_pool_max_size(&self) -> u32 {
        self.db_pool_max_size.unwrap_or(DEFAULT_POOL_SIZE)
    }

    /// Gemini model name.
    pub fn gemini_model(&self) -> &str {
        self.gemini_model.as_deref().unwrap_or(gemini::DEFAULT_MODEL)
    }

    /// Gemini endpoint.
    pub fn gemini_base_url(&self) -> &str {
        self.gemini_base_url
            .as_deref()
            .unwrap_or(gemini::DEFAULT_BASE_URL)
    }

    /// Scope of the policies issued by the authorizer.
    pub fn policy_scope(&self) -> PolicyScope {
        PolicyScope {
            region: self
                .authorizer_region
                .clone()
                .unwrap_or_else(|| DEFAULT_AUTHORIZER_REGION.to_owned()),
            account: self
                .authorizer_account
                .clone()
                .unwrap_or_else(|| DEFAULT_AUTHORIZER_ACCOUNT.to_owned()),
        }
    }

    /// Connect timeout for connector databases.
    pub fn sql_connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.sql_connect_timeout_secs
                .unwrap_or(DEFAULT_SQL_CONNECT_TIMEOUT_SECS),
        )
    }

    /// Largest accepted streaming request body.
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES)
    }
}
