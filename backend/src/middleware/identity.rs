//! Bearer identity middleware for the streaming surface.
//!
//! Client-supplied identity headers are never trusted: they are removed,
//! the `Authorization: Bearer` token is verified, and the verified user id
//! and e-mail are injected in their place. Preflight requests and the fixed
//! surfaces (health checks, proxy invocations, the authorizer) pass through.

use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::Method;
use actix_web::http::header::{AUTHORIZATION, HeaderName, HeaderValue, InvalidHeaderValue};
use actix_web::{Error, HttpResponse};
use futures_util::future::{LocalBoxFuture, Ready, ready};
use serde_json::json;
use tracing::{debug, warn};

use crate::domain::ports::{TokenVerificationError, TokenVerifier, VerifiedIdentity};
use crate::inbound::normalizer::USER_ID_HEADER;
use crate::inbound::response::CORS_HEADERS;

/// Header carrying the verified caller's e-mail address.
pub const USER_EMAIL_HEADER: &str = "x-user-email";

const BEARER_PREFIX: &str = "Bearer ";
const EXEMPT_PREFIXES: [&str; 3] = ["/health/", "/invocations", "/authorize"];

const MISSING_TOKEN: &str = "Missing bearer token";
const INVALID_TOKEN: &str = "Invalid or expired token";

/// Middleware verifying bearer tokens before the gateway sees a request.
///
/// Without a verifier every request passes through untouched, leaving
/// identity to whatever sits in front of the service.
#[derive(Clone)]
pub struct BearerIdentity {
    verifier: Option<Arc<dyn TokenVerifier>>,
}

impl BearerIdentity {
    /// Verify tokens with `verifier`.
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            verifier: Some(verifier),
        }
    }

    /// Trust the identity headers as received.
    pub fn pass_through() -> Self {
        Self { verifier: None }
    }
}

impl<S, B> Transform<S, ServiceRequest> for BearerIdentity
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = BearerIdentityMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(BearerIdentityMiddleware {
            service: Rc::new(service),
            verifier: self.verifier.clone(),
        }))
    }
}

/// Service wrapper produced by [`BearerIdentity`].
pub struct BearerIdentityMiddleware<S> {
    service: Rc<S>,
    verifier: Option<Arc<dyn TokenVerifier>>,
}

fn is_exempt(req: &ServiceRequest) -> bool {
    req.method() == Method::OPTIONS
        || EXEMPT_PREFIXES
            .iter()
            .any(|prefix| req.path().starts_with(prefix))
}

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
}

fn denial(message: &str) -> HttpResponse {
    let mut builder = HttpResponse::Unauthorized();
    for header in CORS_HEADERS {
        builder.insert_header(header);
    }
    builder.json(json!({ "error": message }))
}

/// Replace any identity headers with the verified ones.
fn inject_identity(
    req: &mut ServiceRequest,
    identity: &VerifiedIdentity,
) -> Result<(), InvalidHeaderValue> {
    let headers = req.headers_mut();
    let user_id = HeaderValue::from_str(identity.user_id.as_ref())?;
    headers.insert(HeaderName::from_static(USER_ID_HEADER), user_id);
    if let Some(email) = &identity.email {
        let email = HeaderValue::from_str(email)?;
        headers.insert(HeaderName::from_static(USER_EMAIL_HEADER), email);
    }
    Ok(())
}

impl<S, B> Service<ServiceRequest> for BearerIdentityMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let verifier = match &self.verifier {
            Some(verifier) if !is_exempt(&req) => Arc::clone(verifier),
            _ => {
                let fut = self.service.call(req);
                return Box::pin(async move { Ok(fut.await?.map_into_left_body()) });
            }
        };

        let headers = req.headers_mut();
        headers.remove(USER_ID_HEADER);
        headers.remove(USER_EMAIL_HEADER);

        let service = Rc::clone(&self.service);
        Box::pin(async move {
            let Some(token) = bearer_token(&req) else {
                debug!(path = req.path(), "request without bearer token");
                return Ok(req.into_response(denial(MISSING_TOKEN)).map_into_right_body());
            };
            let identity = match verifier.verify(&token).await {
                Ok(identity) => identity,
                Err(err) => {
                    match &err {
                        TokenVerificationError::Rejected { .. } => {
                            debug!(reason = err.detail(), "bearer token rejected");
                        }
                        TokenVerificationError::Unavailable { .. } => {
                            warn!(error = %err, "bearer token could not be verified");
                        }
                    }
                    return Ok(req.into_response(denial(INVALID_TOKEN)).map_into_right_body());
                }
            };
            if let Err(err) = inject_identity(&mut req, &identity) {
                warn!(error = %err, "verified identity is not a valid header value");
                return Ok(req.into_response(denial(INVALID_TOKEN)).map_into_right_body());
            }
            Ok(service.call(req).await?.map_into_left_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserId;
    use crate::domain::ports::MockTokenVerifier;
    use actix_web::http::StatusCode;
    use actix_web::{App, HttpRequest, test, web};
    use serde_json::Value;

    async fn echo_identity(req: HttpRequest) -> HttpResponse {
        let read = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        };
        HttpResponse::Ok().json(json!({
            "uid": read(USER_ID_HEADER),
            "email": read(USER_EMAIL_HEADER),
        }))
    }

    fn accepting() -> MockTokenVerifier {
        let mut verifier = MockTokenVerifier::new();
        verifier
            .expect_verify()
            .withf(|token| token == "good")
            .returning(|_| {
                Ok(VerifiedIdentity {
                    user_id: UserId::new("uid-7").expect("user id"),
                    email: Some("seven@example.com".to_owned()),
                    email_verified: true,
                })
            });
        verifier
            .expect_verify()
            .withf(|token| token != "good")
            .returning(|_| Err(TokenVerificationError::rejected("expired")));
        verifier
    }

    macro_rules! app {
        ($verifier:expr) => {
            test::init_service(
                App::new()
                    .wrap(BearerIdentity::new(Arc::new($verifier)))
                    .default_service(web::to(echo_identity)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn verified_identity_replaces_client_headers() {
        let app = app!(accepting());
        let req = test::TestRequest::get()
            .uri("/api/connectors")
            .insert_header((AUTHORIZATION, "Bearer good"))
            .insert_header((USER_ID_HEADER, "spoofed"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body, json!({"uid": "uid-7", "email": "seven@example.com"}));
    }

    #[actix_web::test]
    async fn missing_token_is_unauthorized() {
        let app = app!(MockTokenVerifier::new());
        let req = test::TestRequest::get()
            .uri("/api/connectors")
            .insert_header((USER_ID_HEADER, "spoofed"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body, json!({"error": MISSING_TOKEN}));
    }

    #[actix_web::test]
    async fn rejected_token_is_unauthorized() {
        let app = app!(accepting());
        let req = test::TestRequest::get()
            .uri("/api/connectors")
            .insert_header((AUTHORIZATION, "Bearer stale"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body, json!({"error": INVALID_TOKEN}));
    }

    #[actix_web::test]
    async fn pass_through_keeps_client_headers() {
        let app = test::init_service(
            App::new()
                .wrap(BearerIdentity::pass_through())
                .default_service(web::to(echo_identity)),
        )
        .await;
        let req = test::TestRequest::get()
            .uri("/api/connectors")
            .insert_header((USER_ID_HEADER, "user-1"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({"uid": "user-1", "email": null}));
    }

    #[actix_web::test]
    async fn preflight_and_health_checks_skip_verification() {
        let app = app!(MockTokenVerifier::new());
        for req in [
            test::TestRequest::default()
                .method(Method::OPTIONS)
                .uri("/api/connectors")
                .to_request(),
            test::TestRequest::get().uri("/health/ready").to_request(),
        ] {
            let res = test::call_service(&app, req).await;
            assert_eq!(res.status(), StatusCode::OK);
        }
    }
}
