use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use stockroom_catalog::CategoryDraft;
use stockroom_core::CategoryId;

use crate::app::dto::{self, PageParams};
use crate::app::routes::common::{ApiResult, OrRespond, body, parse_id, render_one, render_page};
use crate::app::services::AppServices;
use crate::context::{CallerContext, RequestScope};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_categories).post(create_category))
        .route("/:id", get(get_category).put(update_category).delete(delete_category))
}

pub async fn create_category(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    payload: Result<Json<CategoryDraft>, JsonRejection>,
) -> ApiResult {
    let draft = body(payload)?;
    let category = services
        .domain
        .catalog
        .create_category(scope.ctx(), caller.principal(), draft)
        .await
        .or_respond()?;
    let ids = dto::audit_ids([&category.audit]);
    render_one(&services, StatusCode::CREATED, category, ids, dto::category_to_json).await
}

pub async fn update_category(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    payload: Result<Json<CategoryDraft>, JsonRejection>,
) -> ApiResult {
    let id: CategoryId = parse_id(&id)?;
    let draft = body(payload)?;
    let category = services
        .domain
        .catalog
        .update_category(scope.ctx(), caller.principal(), id, draft)
        .await
        .or_respond()?;
    let ids = dto::audit_ids([&category.audit]);
    render_one(&services, StatusCode::OK, category, ids, dto::category_to_json).await
}

pub async fn delete_category(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: CategoryId = parse_id(&id)?;
    services
        .domain
        .catalog
        .delete_category(scope.ctx(), caller.principal(), id)
        .await
        .or_respond()?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn get_category(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: CategoryId = parse_id(&id)?;
    let category = services.domain.catalog.get_category(caller.principal(), id).await.or_respond()?;
    let ids = dto::audit_ids([&category.audit]);
    render_one(&services, StatusCode::OK, category, ids, dto::category_to_json).await
}

pub async fn list_categories(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Query(params): Query<PageParams>,
) -> ApiResult {
    let page = services
        .domain
        .catalog
        .list_categories(caller.principal(), params.page())
        .await
        .or_respond()?;
    let ids = dto::audit_ids(page.data.iter().map(|c| &c.audit));
    render_page(&services, page, ids, dto::category_to_json).await
}
