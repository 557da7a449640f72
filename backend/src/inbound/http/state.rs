//! Shared HTTP adapter state.
//!
//! Handlers receive this through `web::Data` and only reach the domain via
//! the gateway pipeline and the authorizer service.

use crate::domain::AuthorizerService;
use crate::inbound::Gateway;

/// Dependency bundle for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    /// Pipeline serving every gateway request.
    pub gateway: Gateway,
    /// Request authorizer; absent when no identity provider is configured.
    pub authorizer: Option<AuthorizerService>,
}

impl HttpState {
    /// State without an authorizer.
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            authorizer: None,
        }
    }

    /// Attach the request authorizer.
    #[must_use]
    pub fn with_authorizer(mut self, authorizer: AuthorizerService) -> Self {
        self.authorizer = Some(authorizer);
        self
    }
}
