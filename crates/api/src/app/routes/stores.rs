use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use stockroom_catalog::StoreDraft;
use stockroom_core::StoreId;

use crate::app::dto::{self, PageParams};
use crate::app::routes::common::{ApiResult, OrRespond, body, parse_id, render_one, render_page};
use crate::app::services::AppServices;
use crate::context::{CallerContext, RequestScope};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_stores).post(create_store))
        .route("/:id", get(get_store).put(update_store).delete(delete_store))
}

pub async fn create_store(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    payload: Result<Json<StoreDraft>, JsonRejection>,
) -> ApiResult {
    let draft = body(payload)?;
    let store = services
        .domain
        .catalog
        .create_store(scope.ctx(), caller.principal(), draft)
        .await
        .or_respond()?;
    let ids = dto::audit_ids([&store.audit]);
    render_one(&services, StatusCode::CREATED, store, ids, dto::store_to_json).await
}

pub async fn update_store(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    payload: Result<Json<StoreDraft>, JsonRejection>,
) -> ApiResult {
    let id: StoreId = parse_id(&id)?;
    let draft = body(payload)?;
    let store = services
        .domain
        .catalog
        .update_store(scope.ctx(), caller.principal(), id, draft)
        .await
        .or_respond()?;
    let ids = dto::audit_ids([&store.audit]);
    render_one(&services, StatusCode::OK, store, ids, dto::store_to_json).await
}

pub async fn delete_store(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: StoreId = parse_id(&id)?;
    services
        .domain
        .catalog
        .delete_store(scope.ctx(), caller.principal(), id)
        .await
        .or_respond()?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn get_store(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: StoreId = parse_id(&id)?;
    let store = services.domain.catalog.get_store(caller.principal(), id).await.or_respond()?;
    let ids = dto::audit_ids([&store.audit]);
    render_one(&services, StatusCode::OK, store, ids, dto::store_to_json).await
}

pub async fn list_stores(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Query(params): Query<PageParams>,
) -> ApiResult {
    let page = services
        .domain
        .catalog
        .list_stores(caller.principal(), params.page())
        .await
        .or_respond()?;
    let ids = dto::audit_ids(page.data.iter().map(|s| &s.audit));
    render_page(&services, page, ids, dto::store_to_json).await
}
