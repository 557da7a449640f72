//! Shared wiring for the HTTP integration suites.
//!
//! Builds the same app as the server binary over the in-memory store and
//! scripted relational and model doubles.

use std::sync::Arc;

use actix_http::Request;
use actix_web::body::{BoxBody, EitherBody};
use actix_web::dev::{Service, ServiceResponse};
use actix_web::{App, test, web};
use gateway::Trace;
use gateway::domain::ports::VerifiedIdentity;
use gateway::domain::{AuthorizerService, ChatService, ConnectorService, PolicyScope, UserId};
use gateway::inbound::Gateway;
use gateway::inbound::http::configure;
use gateway::inbound::http::health::HealthState;
use gateway::inbound::http::state::HttpState;
use gateway::inbound::normalizer::Normalizer;
use gateway::middleware::BearerIdentity;
use gateway::outbound::memory::InMemoryItemStore;
use gateway::test_support::{
    FixedClock, ScriptedLanguageModel, ScriptedSqlConnector, StaticTokenVerifier,
};

/// Connector fields accepted by the create endpoint.
pub const CONNECTOR: &str =
    r#"{"host": "db.internal", "port": "5432", "database": "sales", "user": "reader", "password": "secret"}"#;

/// Everything a test needs to drive and inspect the app.
pub struct World {
    pub state: web::Data<HttpState>,
    pub health: web::Data<HealthState>,
    pub sql: ScriptedSqlConnector,
    pub model: ScriptedLanguageModel,
}

/// A world whose authorizer trusts `verifier`, if any.
pub fn world_with(verifier: Option<StaticTokenVerifier>) -> World {
    let store = Arc::new(InMemoryItemStore::new());
    let sql = ScriptedSqlConnector::new();
    let model = ScriptedLanguageModel::new(["Revenue ", "rose."]);
    let clock = Arc::new(FixedClock::at_unix(1_700_000_000));
    let connectors = ConnectorService::new(store.clone(), Arc::new(sql.clone()), clock.clone());
    let chats = ChatService::new(store, Arc::new(sql.clone()), Arc::new(model.clone()), clock);
    let mut state = HttpState::new(Gateway::new(connectors, chats, Normalizer::default()));
    if let Some(verifier) = verifier {
        state = state.with_authorizer(AuthorizerService::new(
            Arc::new(verifier),
            PolicyScope {
                region: "eu-west-1".to_owned(),
                account: "123456789012".to_owned(),
            },
        ));
    }
    World {
        state: web::Data::new(state),
        health: web::Data::new(HealthState::new()),
        sql,
        model,
    }
}

/// A world without an identity provider.
pub fn world() -> World {
    world_with(None)
}

/// The app with every surface registered behind `identity`.
pub async fn init_app(
    world: &World,
    identity: BearerIdentity,
) -> impl Service<Request, Response = ServiceResponse<EitherBody<BoxBody>>, Error = actix_web::Error>
{
    test::init_service(
        App::new()
            .app_data(world.health.clone())
            .app_data(world.state.clone())
            .wrap(identity)
            .wrap(Trace)
            .configure(configure),
    )
    .await
}

/// Identity the static verifier hands out.
pub fn identity(user: &str, email_verified: bool) -> VerifiedIdentity {
    VerifiedIdentity {
        user_id: UserId::new(user).expect("valid user id"),
        email: Some(format!("{user}@example.com")),
        email_verified,
    }
}
