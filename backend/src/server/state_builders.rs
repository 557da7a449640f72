//! Builders choosing an adapter for each port from the configuration.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use mockable::DefaultClock;
use reqwest::Url;
use tracing::{info, warn};

use gateway::domain::ports::{
    FixtureLanguageModel, ItemStore, LanguageModel, SqlConnector, TokenVerifier,
};
use gateway::domain::{AuthorizerService, ChatService, ConnectorService};
use gateway::inbound::Gateway;
use gateway::inbound::http::state::HttpState;
use gateway::inbound::normalizer::Normalizer;
use gateway::outbound::firebase::{self, FirebaseTokenVerifier};
use gateway::outbound::gemini::GeminiModel;
use gateway::outbound::memory::InMemoryItemStore;
use gateway::outbound::persistence::DieselItemStore;
use gateway::outbound::postgres::PostgresConnector;
use gateway::settings::GatewaySettings;

use super::ServerConfig;

/// Connect timeout for the model and identity providers.
const PROVIDER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Whole-request timeout for identity lookups.
const IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);

fn build_store(config: &ServerConfig) -> Arc<dyn ItemStore> {
    match &config.db_pool {
        Some(pool) => Arc::new(DieselItemStore::new(pool.clone())),
        None => {
            warn!("no database configured; records are kept in memory");
            Arc::new(InMemoryItemStore::new())
        }
    }
}

fn build_model(settings: &GatewaySettings) -> io::Result<Arc<dyn LanguageModel>> {
    let Some(api_key) = settings.gemini_api_key.as_deref() else {
        warn!("no Gemini API key configured; using the fixture model");
        return Ok(Arc::new(FixtureLanguageModel));
    };
    let base_url = Url::parse(settings.gemini_base_url()).map_err(io::Error::other)?;
    let model = GeminiModel::new(
        api_key,
        settings.gemini_model(),
        &base_url,
        PROVIDER_CONNECT_TIMEOUT,
    )
    .map_err(io::Error::other)?;
    info!(model = settings.gemini_model(), "Gemini model configured");
    Ok(Arc::new(model))
}

fn build_verifier(settings: &GatewaySettings) -> io::Result<Option<Arc<dyn TokenVerifier>>> {
    let Some(api_key) = settings.firebase_api_key.as_deref() else {
        return Ok(None);
    };
    let base_url = Url::parse(firebase::DEFAULT_BASE_URL).map_err(io::Error::other)?;
    let verifier = FirebaseTokenVerifier::new(api_key, &base_url, IDENTITY_TIMEOUT)
        .map_err(io::Error::other)?;
    Ok(Some(Arc::new(verifier)))
}

/// Handler state and the verifier for the identity middleware.
pub(super) struct BuiltState {
    pub(super) http_state: HttpState,
    pub(super) edge_verifier: Option<Arc<dyn TokenVerifier>>,
}

/// Wire every port for `config`.
///
/// # Errors
/// Fails when an adapter cannot be constructed, or when bearer
/// verification is requested without an identity provider.
pub(super) fn build_http_state(config: &ServerConfig) -> io::Result<BuiltState> {
    let settings = &config.settings;
    let store = build_store(config);
    let sql: Arc<dyn SqlConnector> = Arc::new(PostgresConnector::new(settings.sql_connect_timeout()));
    let model = build_model(settings)?;
    let clock = Arc::new(DefaultClock);

    let connectors = ConnectorService::new(Arc::clone(&store), Arc::clone(&sql), clock.clone());
    let chats = ChatService::new(store, sql, model, clock);
    let gateway = Gateway::new(connectors, chats, Normalizer::new(settings.max_body_bytes()));

    let verifier = build_verifier(settings)?;
    let mut http_state = HttpState::new(gateway);
    if let Some(verifier) = &verifier {
        http_state = http_state.with_authorizer(AuthorizerService::new(
            Arc::clone(verifier),
            settings.policy_scope(),
        ));
    }

    let edge_verifier = if settings.verify_bearer_tokens {
        let verifier = verifier.ok_or_else(|| {
            io::Error::other("bearer verification requires a Firebase API key")
        })?;
        Some(verifier)
    } else {
        None
    };
    Ok(BuiltState {
        http_state,
        edge_verifier,
    })
}
