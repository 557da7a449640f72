//! Request authorizer entry.
//!
//! Accepts the authorizer event of an API gateway: the API id and stage
//! from `requestContext` and a bearer `Authorization` header.

use actix_web::{HttpResponse, post, web};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::{AuthorizationRequest, Error};
use crate::inbound::http::ApiResult;
use crate::inbound::http::state::HttpState;

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestContextDto {
    api_id: Option<String>,
    stage: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizerEventDto {
    request_context: Option<RequestContextDto>,
    #[serde(default)]
    headers: Option<Map<String, Value>>,
}

fn signature_error() -> Error {
    Error::malformed_request("Incorrect authorizer signature")
}

fn bearer_token(headers: &Map<String, Value>) -> Option<&str> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        .and_then(|(_, value)| value.as_str())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .filter(|token| !token.is_empty())
}

fn parse_event(raw: &[u8]) -> Result<AuthorizationRequest, Error> {
    let event: AuthorizerEventDto = serde_json::from_slice(raw).map_err(|_| signature_error())?;
    let context = event.request_context.ok_or_else(signature_error)?;
    let (Some(api_id), Some(stage)) = (context.api_id, context.stage) else {
        return Err(signature_error());
    };
    let bearer = event
        .headers
        .as_ref()
        .and_then(bearer_token)
        .ok_or_else(signature_error)?;
    Ok(AuthorizationRequest {
        api_id,
        stage,
        bearer_token: bearer.to_owned(),
    })
}

/// Decide whether the bearer may invoke the API.
#[post("/authorize")]
pub async fn authorize(body: web::Bytes, state: web::Data<HttpState>) -> ApiResult<HttpResponse> {
    let request = parse_event(&body)?;
    let authorizer = state
        .authorizer
        .as_ref()
        .ok_or_else(|| Error::internal("request authorizer is not configured"))?;
    let decision = authorizer.authorize(&request).await?;
    Ok(HttpResponse::Ok().json(decision))
}
