//! HTTP adapter mapping for domain errors.
//!
//! Lets actix handlers return the domain [`Error`] directly while producing
//! the same status codes and bodies as the gateway pipeline.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

use crate::domain::{Error, TRACE_ID_HEADER, TraceId};
use crate::inbound::response::{CORS_HEADERS, error_reply, status_for};

/// Convenient result alias for HTTP handlers.
pub type ApiResult<T> = Result<T, Error>;

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(status_for(self.code())).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let (_, body) = error_reply(self);
        let mut builder = HttpResponse::build(self.status_code());
        for header in CORS_HEADERS {
            builder.insert_header(header);
        }
        if let Some(id) = TraceId::current() {
            builder.insert_header((TRACE_ID_HEADER, id.to_string()));
        }
        builder.insert_header(("cache-control", "no-store"));
        builder.json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use rstest::rstest;
    use serde_json::{Value, json};

    #[rstest]
    #[case(Error::unauthorized(), StatusCode::UNAUTHORIZED, json!({"error": "Unauthorized"}))]
    #[case(Error::not_found("chat"), StatusCode::NOT_FOUND, json!({"error": "not found: chat"}))]
    #[case(
        Error::incorrect_signature(&["apiId"]),
        StatusCode::BAD_REQUEST,
        json!({"required": ["apiId"]})
    )]
    #[case(Error::internal("boom"), StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "boom"}))]
    #[actix_web::test]
    async fn errors_render_like_the_pipeline(
        #[case] err: Error,
        #[case] status: StatusCode,
        #[case] expected: Value,
    ) {
        let response = err.error_response();
        assert_eq!(response.status(), status);
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .and_then(|value| value.to_str().ok()),
            Some("*")
        );
        let body = to_bytes(response.into_body()).await.expect("body");
        let body: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(body, expected);
    }

    #[actix_web::test]
    async fn scoped_trace_id_is_echoed() {
        let id = TraceId::generate();
        let response = TraceId::scope(id, async { Error::unauthorized().error_response() }).await;
        assert_eq!(
            response
                .headers()
                .get(TRACE_ID_HEADER)
                .and_then(|value| value.to_str().ok()),
            Some(id.to_string().as_str())
        );
    }
}
