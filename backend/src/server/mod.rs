//! Server construction and middleware wiring.

mod config;
mod state_builders;

pub use config::ServerConfig;

use state_builders::{BuiltState, build_http_state};

use actix_web::body::MessageBody;
use actix_web::dev::{Server, ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::{App, HttpServer, web};

use gateway::Trace;
use gateway::inbound::http::configure;
use gateway::inbound::http::health::HealthState;
use gateway::inbound::http::state::HttpState;
use gateway::middleware::BearerIdentity;

#[derive(Clone)]
struct AppDependencies {
    health_state: web::Data<HealthState>,
    http_state: web::Data<HttpState>,
    identity: BearerIdentity,
}

fn build_app(
    deps: AppDependencies,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let AppDependencies {
        health_state,
        http_state,
        identity,
    } = deps;

    App::new()
        .app_data(health_state)
        .app_data(http_state)
        .wrap(identity)
        .wrap(Trace)
        .configure(configure)
}

/// Construct the gateway server and mark it serving once the socket is bound.
///
/// # Errors
/// Propagates [`std::io::Error`] when an adapter cannot be built or the
/// socket cannot be bound.
pub fn create_server(
    health_state: web::Data<HealthState>,
    config: ServerConfig,
) -> std::io::Result<Server> {
    let BuiltState {
        http_state,
        edge_verifier,
    } = build_http_state(&config)?;
    let deps = AppDependencies {
        health_state: health_state.clone(),
        http_state: web::Data::new(http_state),
        identity: edge_verifier.map_or_else(BearerIdentity::pass_through, BearerIdentity::new),
    };

    // `main` owns the shutdown signals so it can drain first.
    let server = HttpServer::new(move || build_app(deps.clone()))
        .disable_signals()
        .bind(config.bind_addr)?
        .run();

    health_state.mark_serving();
    Ok(server)
}
