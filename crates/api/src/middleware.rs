use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

use stockroom_core::{DomainError, RequestContext};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::{CallerContext, RequestScope};

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Open the `request` span and attach the correlation id.
///
/// An incoming `x-request-id` that parses as a UUID is reused; otherwise a new
/// one is minted. Either way it is echoed on the response.
pub async fn request_context_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .unwrap_or_else(Uuid::now_v7);

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    req.extensions_mut()
        .insert(RequestScope(RequestContext::with_span(request_id, span.clone())));

    let mut response = next.run(req).instrument(span.clone()).await;
    span.in_scope(|| tracing::debug!(status = response.status().as_u16(), "request completed"));

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Resolve the bearer token into a [`CallerContext`].
///
/// Runs after [`request_context_middleware`], so the scope is always present.
pub async fn auth_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let ctx = req
        .extensions()
        .get::<RequestScope>()
        .map(|scope| scope.ctx().clone())
        .unwrap_or_else(RequestContext::background);

    let token = match extract_bearer(req.headers()) {
        Ok(token) => token.to_string(),
        Err(e) => return errors::domain_error_to_response(e),
    };

    let (principal, user) = match services.domain.identity.authenticate(&ctx, &token).await {
        Ok(found) => found,
        Err(e) => return errors::domain_error_to_response(e),
    };

    req.extensions_mut().insert(CallerContext::new(principal, user));
    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, DomainError> {
    let missing = || DomainError::authentication("missing bearer token");

    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(missing)?;

    let header = header.to_str().map_err(|_| missing())?;

    let header = header.strip_prefix("Bearer ").ok_or_else(missing)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(missing());
    }

    Ok(token)
}
