//! Behavioural tests for the proxy, authorizer, identity and health surfaces.

#[path = "support/gateway.rs"]
mod support;

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::http::header::AUTHORIZATION;
use actix_web::test::{self, TestRequest};
use gateway::middleware::BearerIdentity;
use gateway::test_support::StaticTokenVerifier;
use rstest::{fixture, rstest};
use serde_json::{Value, json};

use support::{CONNECTOR, identity, init_app, world, world_with};

#[fixture]
fn verifier() -> StaticTokenVerifier {
    StaticTokenVerifier::default()
        .with_token("tok-verified", identity("user-1", true))
        .with_token("tok-unverified", identity("user-3", false))
}

fn proxy_event(method: &str, path: &str, user: &str, body: Option<&str>) -> Value {
    json!({
        "path": path,
        "httpMethod": method,
        "requestContext": {"authorizer": {"user": json!({"id": user}).to_string()}},
        "body": body,
        "isBase64Encoded": false,
    })
}

fn authorizer_event(authorization: &str) -> Value {
    json!({
        "requestContext": {"apiId": "a1b2c3", "stage": "prod"},
        "headers": {"Authorization": authorization},
    })
}

#[rstest]
#[actix_web::test]
async fn proxy_events_get_proxy_results() {
    let world = world();
    let app = init_app(&world, BearerIdentity::pass_through()).await;

    let req = TestRequest::post()
        .uri("/invocations")
        .set_json(proxy_event("POST", "/connectors", "user-1", Some(CONNECTOR)))
        .to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(created["statusCode"], json!(200));
    assert_eq!(created["isBase64Encoded"], json!(false));
    assert_eq!(created["headers"]["access-control-allow-origin"], json!("*"));
    let body: Value =
        serde_json::from_str(created["body"].as_str().expect("text body")).expect("json body");
    assert_eq!(body["connector"]["password"], json!("secret"));
    assert_eq!(body["connector"]["name"], Value::Null);

    let req = TestRequest::post()
        .uri("/invocations")
        .set_json(proxy_event("GET", "/connectors", "user-2", None))
        .to_request();
    let listed: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(listed["body"], json!("{\"connectors\":[]}"));
}

#[rstest]
#[actix_web::test]
async fn proxy_chat_start_answers_synchronously() {
    let world = world();
    let app = init_app(&world, BearerIdentity::pass_through()).await;
    let req = TestRequest::post()
        .uri("/invocations")
        .set_json(proxy_event("POST", "/connectors", "user-1", Some(CONNECTOR)))
        .to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let body: Value =
        serde_json::from_str(created["body"].as_str().expect("text body")).expect("json body");
    let id = body["connector"]["id"].as_str().expect("id").to_owned();

    let req = TestRequest::post()
        .uri("/invocations")
        .set_json(proxy_event(
            "POST",
            &format!("/connectors/{id}/chats"),
            "user-1",
            Some(r#"{"query": "select 1", "prompt": "Summarise"}"#),
        ))
        .to_request();
    let result: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(result["statusCode"], json!(200));
    let chat: Value =
        serde_json::from_str(result["body"].as_str().expect("text body")).expect("json body");
    assert_eq!(chat["connector_id"], json!(id));
    assert_eq!(chat["messages"][0]["response"], json!("Revenue rose."));
}

#[rstest]
#[actix_web::test]
async fn unreadable_proxy_events_are_bad_requests() {
    let world = world();
    let app = init_app(&world, BearerIdentity::pass_through()).await;
    let req = TestRequest::post()
        .uri("/invocations")
        .set_payload("not json")
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[rstest]
#[actix_web::test]
async fn verified_tokens_are_allowed(verifier: StaticTokenVerifier) {
    let world = world_with(Some(verifier));
    let app = init_app(&world, BearerIdentity::pass_through()).await;
    let req = TestRequest::post()
        .uri("/authorize")
        .set_json(authorizer_event("Bearer tok-verified"))
        .to_request();
    let decision: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(decision["principalId"], json!("user-1"));
    assert_eq!(
        decision["policyDocument"]["Statement"][0],
        json!({
            "Action": "execute-api:Invoke",
            "Effect": "Allow",
            "Resource": "arn:aws:execute-api:eu-west-1:123456789012:a1b2c3/prod/*",
        })
    );
    let user: Value =
        serde_json::from_str(decision["context"]["user"].as_str().expect("user context"))
            .expect("user json");
    assert_eq!(user["id"], json!("user-1"));
}

#[rstest]
#[actix_web::test]
async fn unverified_emails_are_denied(verifier: StaticTokenVerifier) {
    let world = world_with(Some(verifier));
    let app = init_app(&world, BearerIdentity::pass_through()).await;
    let req = TestRequest::post()
        .uri("/authorize")
        .set_json(authorizer_event("Bearer tok-unverified"))
        .to_request();
    let decision: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(
        decision["policyDocument"]["Statement"][0]["Effect"],
        json!("Deny")
    );
    assert!(decision.get("context").is_none());
}

#[rstest]
#[case(authorizer_event("Bearer tok-unknown"), StatusCode::UNAUTHORIZED)]
#[case(authorizer_event("tok-verified"), StatusCode::BAD_REQUEST)]
#[case(json!({"headers": {"Authorization": "Bearer tok-verified"}}), StatusCode::BAD_REQUEST)]
#[actix_web::test]
async fn authorizer_rejects_bad_requests(
    verifier: StaticTokenVerifier,
    #[case] event: Value,
    #[case] expected: StatusCode,
) {
    let world = world_with(Some(verifier));
    let app = init_app(&world, BearerIdentity::pass_through()).await;
    let req = TestRequest::post().uri("/authorize").set_json(event).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), expected);
}

#[rstest]
#[actix_web::test]
async fn bearer_identity_replaces_client_claims(verifier: StaticTokenVerifier) {
    let world = world();
    let app = init_app(&world, BearerIdentity::new(Arc::new(verifier))).await;

    let req = TestRequest::post()
        .uri("/api/connectors")
        .insert_header((AUTHORIZATION, "Bearer tok-verified"))
        .insert_header(("x-user-uid", "user-2"))
        .set_payload(CONNECTOR)
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);

    let req = TestRequest::get()
        .uri("/api/connectors")
        .insert_header((AUTHORIZATION, "Bearer tok-verified"))
        .to_request();
    let listed: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(listed["connectors"].as_array().map(Vec::len), Some(1));

    let req = TestRequest::get()
        .uri("/api/connectors")
        .insert_header(("x-user-uid", "user-1"))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body, json!({"error": "Missing bearer token"}));
}

#[rstest]
#[actix_web::test]
async fn health_endpoints_follow_the_lifecycle() {
    let world = world();
    let app = init_app(&world, BearerIdentity::pass_through()).await;

    let res = test::call_service(&app, TestRequest::get().uri("/health/ready").to_request()).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

    world.health.mark_serving();
    let res = test::call_service(&app, TestRequest::get().uri("/health/ready").to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body, json!({"status": "serving"}));

    world.health.mark_draining();
    let res = test::call_service(&app, TestRequest::get().uri("/health/live").to_request()).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
}
