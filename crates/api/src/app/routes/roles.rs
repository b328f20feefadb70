use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use stockroom_core::RoleId;
use stockroom_infra::services::RoleInput;

use crate::app::dto::{self, PageParams};
use crate::app::routes::common::{ApiResult, OrRespond, body, parse_id, render_one, render_page};
use crate::app::services::AppServices;
use crate::context::{CallerContext, RequestScope};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_roles).post(create_role))
        .route("/:id", get(get_role).put(update_role).delete(delete_role))
}

pub async fn create_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    payload: Result<Json<RoleInput>, JsonRejection>,
) -> ApiResult {
    let input = body(payload)?;
    let role = services
        .domain
        .identity
        .create_role(scope.ctx(), caller.principal(), input)
        .await
        .or_respond()?;
    let ids = dto::audit_ids([&role.audit]);
    render_one(&services, StatusCode::CREATED, role, ids, dto::role_to_json).await
}

pub async fn update_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    payload: Result<Json<RoleInput>, JsonRejection>,
) -> ApiResult {
    let id: RoleId = parse_id(&id)?;
    let input = body(payload)?;
    let role = services
        .domain
        .identity
        .update_role(scope.ctx(), caller.principal(), id, input)
        .await
        .or_respond()?;
    let ids = dto::audit_ids([&role.audit]);
    render_one(&services, StatusCode::OK, role, ids, dto::role_to_json).await
}

pub async fn delete_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: RoleId = parse_id(&id)?;
    services
        .domain
        .identity
        .delete_role(scope.ctx(), caller.principal(), id)
        .await
        .or_respond()?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn get_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: RoleId = parse_id(&id)?;
    let role = services.domain.identity.get_role(caller.principal(), id).await.or_respond()?;
    let ids = dto::audit_ids([&role.audit]);
    render_one(&services, StatusCode::OK, role, ids, dto::role_to_json).await
}

pub async fn list_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Query(params): Query<PageParams>,
) -> ApiResult {
    let page = services
        .domain
        .identity
        .list_roles(caller.principal(), params.page())
        .await
        .or_respond()?;
    let ids = dto::audit_ids(page.data.iter().map(|r| &r.audit));
    render_page(&services, page, ids, dto::role_to_json).await
}
