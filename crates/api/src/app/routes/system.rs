use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode};

use crate::app::dto;
use crate::app::routes::common::{ApiResult, OrRespond, render_one};
use crate::app::services::AppServices;
use crate::context::CallerContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// The calling user, with their current role.
pub async fn me(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> ApiResult {
    let user = caller.user().clone();
    let role = services.domain.identity.role_for(&user).await.or_respond()?;
    let ids = dto::audit_ids([&user.audit]);
    render_one(&services, StatusCode::OK, user, ids, |user, users| {
        let mut body = dto::user_to_json(user, users);
        body["role"] = role.map_or(serde_json::Value::Null, |role| dto::role_to_json(role, users));
        body["level"] = serde_json::json!(caller.principal().level.value());
        body
    })
    .await
}
