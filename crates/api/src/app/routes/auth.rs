use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
};

use crate::app::dto::{self, LoginRequest};
use crate::app::routes::common::{ApiResult, OrRespond, body, render_one};
use crate::app::services::AppServices;
use crate::context::RequestScope;

/// `{token, user}`; the same 401 for an unknown login and a wrong password.
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let result = services
        .domain
        .identity
        .login(scope.ctx(), &request.username_or_email, &request.password)
        .await
        .or_respond()?;

    let ids = dto::audit_ids([&result.user.audit]);
    let token = result.token;
    let role = result.role;
    render_one(&services, StatusCode::OK, result.user, ids, |user, users| {
        let mut user = dto::user_to_json(user, users);
        user["role"] = role.map_or(serde_json::Value::Null, |role| dto::role_to_json(role, users));
        serde_json::json!({ "token": token, "user": user })
    })
    .await
}
