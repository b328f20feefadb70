use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, Multipart, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use stockroom_catalog::ProductPatch;
use stockroom_core::ProductId;
use stockroom_infra::import::parse_product_rows;

use crate::app::dto::{self, CreateProductRequest, ProductListParams};
use crate::app::routes::common::{
    ApiResult, OrRespond, body, parse_id, render_one, render_page, sheet_upload,
};
use crate::app::services::AppServices;
use crate::context::{CallerContext, RequestScope};

pub fn router(max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route(
            "/batch",
            post(import_products).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/:id", get(get_product).put(update_product).delete(delete_product))
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    payload: Result<Json<CreateProductRequest>, JsonRejection>,
) -> ApiResult {
    let (store_id, draft) = body(payload)?.into_parts();
    let product = services
        .domain
        .catalog
        .create_product(scope.ctx(), caller.principal(), store_id, draft)
        .await
        .or_respond()?;
    let ids = dto::audit_ids([&product.audit]);
    render_one(&services, StatusCode::CREATED, product, ids, dto::product_to_json).await
}

/// Multipart CSV upload; every row lands or none does.
pub async fn import_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    multipart: Multipart,
) -> ApiResult {
    let (format, bytes) = sheet_upload(multipart).await?;
    let rows = parse_product_rows(format, &bytes).or_respond()?;
    let products = services
        .domain
        .catalog
        .import_products(scope.ctx(), caller.principal(), rows)
        .await
        .or_respond()?;

    let ids = dto::audit_ids(products.iter().map(|p| &p.audit));
    render_one(&services, StatusCode::CREATED, products, ids, |products, users| {
        let data: Vec<_> = products
            .into_iter()
            .map(|p| dto::product_to_json(p, users))
            .collect();
        serde_json::json!({ "count": data.len(), "data": data })
    })
    .await
}

pub async fn update_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    payload: Result<Json<ProductPatch>, JsonRejection>,
) -> ApiResult {
    let id: ProductId = parse_id(&id)?;
    let patch = body(payload)?;
    let product = services
        .domain
        .catalog
        .update_product(scope.ctx(), caller.principal(), id, patch)
        .await
        .or_respond()?;
    let ids = dto::audit_ids([&product.audit]);
    render_one(&services, StatusCode::OK, product, ids, dto::product_to_json).await
}

pub async fn delete_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: ProductId = parse_id(&id)?;
    services
        .domain
        .catalog
        .delete_product(scope.ctx(), caller.principal(), id)
        .await
        .or_respond()?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: ProductId = parse_id(&id)?;
    let product = services.domain.catalog.get_product(caller.principal(), id).await.or_respond()?;
    let ids = dto::audit_ids([&product.audit]);
    render_one(&services, StatusCode::OK, product, ids, dto::product_to_json).await
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Query(params): Query<ProductListParams>,
) -> ApiResult {
    let (query, page) = params.into_query();
    let page = services
        .domain
        .catalog
        .list_products(caller.principal(), query, page)
        .await
        .or_respond()?;
    let ids = dto::audit_ids(page.data.iter().map(|p| &p.audit));
    render_page(&services, page, ids, dto::product_to_json).await
}
