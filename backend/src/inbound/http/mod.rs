//! HTTP inbound adapter built on actix-web.

pub mod authorize;
pub mod error;
pub mod health;
pub mod proxy;
pub mod state;
pub mod streaming;

pub use error::ApiResult;

use actix_web::web;

/// Register every HTTP surface.
///
/// Fixed routes come first; anything else falls through to the streaming
/// gateway entry.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health::ready)
        .service(health::live)
        .service(proxy::invoke)
        .service(authorize::authorize)
        .default_service(web::to(streaming::serve_streaming));
}
