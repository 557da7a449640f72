//! Firebase identity toolkit adapter for the token verifier port.
//!
//! Tokens are resolved with `accounts:lookup`, which validates the token
//! server-side and returns the account it belongs to.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::UserId;
use crate::domain::ports::{TokenVerificationError, TokenVerifier, VerifiedIdentity};

/// Public identity toolkit endpoint.
pub const DEFAULT_BASE_URL: &str = "https://identitytoolkit.googleapis.com/";

/// Verifies Firebase ID tokens over HTTP.
pub struct FirebaseTokenVerifier {
    client: Client,
    lookup_url: Url,
}

impl std::fmt::Debug for FirebaseTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseTokenVerifier").finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequestDto<'a> {
    id_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct LookupResponseDto {
    #[serde(default)]
    users: Vec<AccountDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountDto {
    local_id: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

/// Failures building the verifier.
#[derive(Debug, thiserror::Error)]
pub enum FirebaseSetupError {
    /// The base URL does not form a valid endpoint.
    #[error("invalid identity toolkit endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    /// The HTTP client could not be constructed.
    #[error("failed to build identity toolkit client: {0}")]
    Client(#[from] reqwest::Error),
}

impl FirebaseTokenVerifier {
    /// Verifier for the project owning `api_key`.
    ///
    /// # Errors
    /// [`FirebaseSetupError`] when the endpoint is invalid or the client
    /// cannot be built.
    pub fn new(api_key: &str, base_url: &Url, timeout: Duration) -> Result<Self, FirebaseSetupError> {
        let mut lookup_url = base_url.join("v1/accounts:lookup")?;
        lookup_url.query_pairs_mut().append_pair("key", api_key);
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, lookup_url })
    }
}

fn identity_from(body: &[u8]) -> Result<VerifiedIdentity, TokenVerificationError> {
    let decoded: LookupResponseDto = serde_json::from_slice(body).map_err(|err| {
        TokenVerificationError::unavailable(format!("invalid lookup payload: {err}"))
    })?;
    let account = decoded
        .users
        .into_iter()
        .next()
        .ok_or_else(|| TokenVerificationError::rejected("token has no account"))?;
    let user_id = UserId::new(&account.local_id)
        .map_err(|err| TokenVerificationError::rejected(format!("account id: {err}")))?;
    Ok(VerifiedIdentity {
        user_id,
        email: account.email,
        email_verified: account.email_verified,
    })
}

fn map_status(status: StatusCode, body: &[u8]) -> TokenVerificationError {
    let detail = String::from_utf8_lossy(body);
    if status == StatusCode::BAD_REQUEST {
        TokenVerificationError::rejected(format!("status 400: {}", detail.trim()))
    } else {
        TokenVerificationError::unavailable(format!("status {}", status.as_u16()))
    }
}

#[async_trait]
impl TokenVerifier for FirebaseTokenVerifier {
    async fn verify(&self, bearer_token: &str) -> Result<VerifiedIdentity, TokenVerificationError> {
        let response = self
            .client
            .post(self.lookup_url.clone())
            .json(&LookupRequestDto {
                id_token: bearer_token,
            })
            .send()
            .await
            .map_err(|err| TokenVerificationError::unavailable(err.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| TokenVerificationError::unavailable(err.to_string()))?;
        if !status.is_success() {
            debug!(status = status.as_u16(), "token lookup refused");
            return Err(map_status(status, &body));
        }
        identity_from(&body)
    }
}
