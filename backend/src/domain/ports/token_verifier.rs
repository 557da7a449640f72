//! Port for the identity provider that verifies bearer tokens.
use async_trait::async_trait;

use crate::domain::UserId;

use super::define_port_error;

define_port_error! {
    /// Failures raised by token verification adapters.
    pub enum TokenVerificationError {
        /// The token is missing, expired, or was not issued for this project.
        Rejected { message } => "token rejected: {message}",
        /// The identity provider could not be consulted.
        Unavailable { message } => "identity provider unavailable: {message}",
    }
}

/// Identity vouched for by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: UserId,
    pub email: Option<String>,
    pub email_verified: bool,
}

/// Verifies bearer tokens against the identity provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Resolve `bearer_token` to the identity it was issued for.
    async fn verify(&self, bearer_token: &str) -> Result<VerifiedIdentity, TokenVerificationError>;
}
