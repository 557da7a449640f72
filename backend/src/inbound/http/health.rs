//! Gateway lifecycle and the orchestrator health endpoints.
//!
//! The gateway starts in [`Lifecycle::Starting`], serves once its adapters
//! are wired and drains after a shutdown signal. Readiness holds only while
//! serving; liveness fails once draining so the orchestrator stops routing
//! long chat streams to an instance that is going away.

use std::sync::atomic::{AtomicU8, Ordering};

use actix_web::{HttpResponse, get, http::header, web};
use serde_json::json;
use tracing::info;

use crate::inbound::response::CORS_HEADERS;

/// Where the gateway is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    /// Adapters still being built.
    Starting = 0,
    /// Taking requests.
    Serving = 1,
    /// Finishing in-flight work before exit.
    Draining = 2,
}

impl Lifecycle {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Serving,
            _ => Self::Draining,
        }
    }

    /// Lower-case name reported by the health endpoints.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Serving => "serving",
            Self::Draining => "draining",
        }
    }
}

/// Lifecycle shared between the server bootstrap and the health endpoints.
#[derive(Debug)]
pub struct HealthState {
    lifecycle: AtomicU8,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            lifecycle: AtomicU8::new(Lifecycle::Starting as u8),
        }
    }
}

impl HealthState {
    /// A gateway that is still starting.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle stage.
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    /// Start serving. A draining gateway stays draining.
    pub fn mark_serving(&self) {
        let started = self.lifecycle.compare_exchange(
            Lifecycle::Starting as u8,
            Lifecycle::Serving as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if started.is_ok() {
            info!("gateway serving");
        }
    }

    /// Stop taking new work.
    pub fn mark_draining(&self) {
        let previous = self
            .lifecycle
            .swap(Lifecycle::Draining as u8, Ordering::AcqRel);
        if previous != Lifecycle::Draining as u8 {
            info!("gateway draining");
        }
    }

    /// Whether new requests should be routed here.
    pub fn is_ready(&self) -> bool {
        self.lifecycle() == Lifecycle::Serving
    }

    /// Whether the process should be left running.
    pub fn is_alive(&self) -> bool {
        self.lifecycle() != Lifecycle::Draining
    }
}

fn health_reply(healthy: bool, lifecycle: Lifecycle) -> HttpResponse {
    let mut response = if healthy {
        HttpResponse::Ok()
    } else {
        HttpResponse::ServiceUnavailable()
    };
    for header in CORS_HEADERS {
        response.insert_header(header);
    }
    response
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .json(json!({ "status": lifecycle.as_str() }))
}

/// 200 while serving, 503 while starting or draining.
#[get("/health/ready")]
pub async fn ready(state: web::Data<HealthState>) -> HttpResponse {
    health_reply(state.is_ready(), state.lifecycle())
}

/// 200 until draining.
#[get("/health/live")]
pub async fn live(state: web::Data<HealthState>) -> HttpResponse {
    health_reply(state.is_alive(), state.lifecycle())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::App;
    use actix_web::test as actix_test;
    use rstest::rstest;
    use serde_json::Value;

    fn state_at(stage: Lifecycle) -> HealthState {
        let state = HealthState::new();
        match stage {
            Lifecycle::Starting => {}
            Lifecycle::Serving => state.mark_serving(),
            Lifecycle::Draining => {
                state.mark_serving();
                state.mark_draining();
            }
        }
        state
    }

    #[rstest]
    #[case(Lifecycle::Starting, false, true)]
    #[case(Lifecycle::Serving, true, true)]
    #[case(Lifecycle::Draining, false, false)]
    fn stages_decide_readiness_and_liveness(
        #[case] stage: Lifecycle,
        #[case] expect_ready: bool,
        #[case] alive: bool,
    ) {
        let state = state_at(stage);
        assert_eq!(state.lifecycle(), stage);
        assert_eq!(state.is_ready(), expect_ready);
        assert_eq!(state.is_alive(), alive);
    }

    #[test]
    fn draining_is_final() {
        let state = HealthState::new();
        state.mark_draining();
        state.mark_serving();
        assert_eq!(state.lifecycle(), Lifecycle::Draining);
    }

    #[rstest]
    #[case("/health/ready", Lifecycle::Starting, StatusCode::SERVICE_UNAVAILABLE)]
    #[case("/health/ready", Lifecycle::Serving, StatusCode::OK)]
    #[case("/health/live", Lifecycle::Serving, StatusCode::OK)]
    #[case("/health/live", Lifecycle::Draining, StatusCode::SERVICE_UNAVAILABLE)]
    #[actix_web::test]
    async fn endpoints_report_the_stage(
        #[case] path: &str,
        #[case] stage: Lifecycle,
        #[case] expected: StatusCode,
    ) {
        let state = web::Data::new(state_at(stage));
        let app = actix_test::init_service(App::new().app_data(state).service(ready).service(live)).await;

        let res = actix_test::call_service(&app, actix_test::TestRequest::get().uri(path).to_request()).await;
        assert_eq!(res.status(), expected);
        let headers = res.headers();
        assert_eq!(
            headers.get(header::CACHE_CONTROL).and_then(|v| v.to_str().ok()),
            Some("no-store")
        );
        assert_eq!(
            headers
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
        let body: Value = actix_test::read_body_json(res).await;
        assert_eq!(body, json!({ "status": stage.as_str() }));
    }
}
