//! Request-scoped context passed explicitly into every service operation.
//!
//! Carries the correlation id and the `tracing` span that log records should be
//! parented to. Nothing here is ambient or thread-local.

use tracing::Span;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    span: Span,
}

impl RequestContext {
    /// Build a context with a fresh `request` span.
    pub fn new(request_id: Uuid) -> Self {
        let span = tracing::info_span!("request", request_id = %request_id);
        Self { request_id, span }
    }

    /// Build a context around an existing span (e.g. the HTTP middleware span).
    pub fn with_span(request_id: Uuid, span: Span) -> Self {
        Self { request_id, span }
    }

    /// Context for work that does not originate from a request (bootstrap, tests).
    pub fn background() -> Self {
        Self::new(Uuid::now_v7())
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}
