use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use stockroom_core::{PageRequest, UserId};
use stockroom_infra::services::{NewUser, UserUpdate};

use crate::app::dto::{self, UserListParams};
use crate::app::routes::common::{ApiResult, OrRespond, body, parse_id, render_one, render_page};
use crate::app::services::AppServices;
use crate::context::{CallerContext, RequestScope};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/:id", get(get_user).put(update_user).delete(delete_user))
}

pub async fn create_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> ApiResult {
    let input = body(payload)?;
    let user = services
        .domain
        .identity
        .create_user(scope.ctx(), caller.principal(), input)
        .await
        .or_respond()?;
    let ids = dto::audit_ids([&user.audit]);
    render_one(&services, StatusCode::CREATED, user, ids, dto::user_to_json).await
}

pub async fn update_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    payload: Result<Json<UserUpdate>, JsonRejection>,
) -> ApiResult {
    let id: UserId = parse_id(&id)?;
    let update = body(payload)?;
    let user = services
        .domain
        .identity
        .update_user(scope.ctx(), caller.principal(), id, update)
        .await
        .or_respond()?;
    let ids = dto::audit_ids([&user.audit]);
    render_one(&services, StatusCode::OK, user, ids, dto::user_to_json).await
}

pub async fn delete_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: UserId = parse_id(&id)?;
    services
        .domain
        .identity
        .delete_user(scope.ctx(), caller.principal(), id)
        .await
        .or_respond()?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: UserId = parse_id(&id)?;
    let user = services.domain.identity.get_user(caller.principal(), id).await.or_respond()?;
    let ids = dto::audit_ids([&user.audit]);
    render_one(&services, StatusCode::OK, user, ids, dto::user_to_json).await
}

pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Query(params): Query<UserListParams>,
) -> ApiResult {
    let page = services
        .domain
        .identity
        .list_users(
            caller.principal(),
            params.store_id,
            params.search,
            PageRequest::new(params.limit, params.offset),
        )
        .await
        .or_respond()?;
    let ids = dto::audit_ids(page.data.iter().map(|u| &u.audit));
    render_page(&services, page, ids, dto::user_to_json).await
}
