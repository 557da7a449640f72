//! Request authorizer producing execute-api invoke policies.
//!
//! A gateway in front of the proxy surface asks this service whether a
//! bearer token may invoke the API. Verified callers get an `Allow` policy
//! and the identity context that the proxy envelope later carries as
//! `requestContext.authorizer.user`.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{info, warn};

use crate::domain::Error;
use crate::domain::ports::{TokenVerificationError, TokenVerifier};

/// Policy effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "Allow",
            Self::Deny => "Deny",
        }
    }
}

/// Parsed authorizer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub api_id: String,
    pub stage: String,
    pub bearer_token: String,
}

/// Region and account the generated policies apply to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyScope {
    pub region: String,
    pub account: String,
}

/// Issues invoke policies for verified bearer tokens.
#[derive(Clone)]
pub struct AuthorizerService {
    verifier: Arc<dyn TokenVerifier>,
    scope: PolicyScope,
}

impl AuthorizerService {
    /// Create a new authorizer.
    pub fn new(verifier: Arc<dyn TokenVerifier>, scope: PolicyScope) -> Self {
        Self { verifier, scope }
    }

    fn policy(&self, effect: Effect, request: &AuthorizationRequest) -> Value {
        let PolicyScope { region, account } = &self.scope;
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Action": "execute-api:Invoke",
                "Effect": effect.as_str(),
                "Resource": format!(
                    "arn:aws:execute-api:{region}:{account}:{}/{}/*",
                    request.api_id, request.stage
                ),
            }],
        })
    }

    /// Decide on `request`.
    ///
    /// Tokens the provider rejects fail with unauthorized; valid tokens for
    /// unverified e-mail addresses receive a `Deny` policy.
    pub async fn authorize(&self, request: &AuthorizationRequest) -> Result<Value, Error> {
        let identity = self
            .verifier
            .verify(&request.bearer_token)
            .await
            .map_err(|err| {
                match &err {
                    TokenVerificationError::Rejected { .. } => {
                        info!(error = %err, "authorizer rejected token");
                    }
                    TokenVerificationError::Unavailable { .. } => {
                        warn!(error = %err, "identity provider unavailable");
                    }
                }
                Error::unauthorized()
            })?;

        if !identity.email_verified {
            return Ok(json!({
                "principalId": identity.user_id,
                "policyDocument": self.policy(Effect::Deny, request),
            }));
        }

        let user = json!({ "id": identity.user_id, "email": identity.email });
        Ok(json!({
            "principalId": identity.user_id,
            "policyDocument": self.policy(Effect::Allow, request),
            "context": { "user": user.to_string() },
        }))
    }
}
