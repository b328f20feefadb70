use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, Multipart, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};

use stockroom_core::{LotId, ProductId};
use stockroom_infra::import::parse_inventory_rows;

use crate::app::dto::{self, CreateLotRequest, InventoryListParams};
use crate::app::routes::common::{
    ApiResult, OrRespond, body, parse_id, render_one, render_page, sheet_upload,
};
use crate::app::services::AppServices;
use crate::context::{CallerContext, RequestScope};

pub fn router(max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(list_inventory).post(create_lot))
        .route(
            "/batch",
            post(import_lots).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/available/:product_id", get(available_quantity))
        .route("/:id", get(get_lot))
}

pub async fn create_lot(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    payload: Result<Json<CreateLotRequest>, JsonRejection>,
) -> ApiResult {
    let (store_id, lot) = body(payload)?.into_parts().or_respond()?;
    let record = services
        .domain
        .ledger
        .create_lot(scope.ctx(), caller.principal(), store_id, lot)
        .await
        .or_respond()?;
    let now = services.domain.ledger.now();
    let ids = record.lot.created_by.into_iter().collect();
    render_one(&services, StatusCode::CREATED, record, ids, |record, users| {
        dto::inventory_to_json(record, now, users)
    })
    .await
}

/// Multipart CSV upload; every row lands or none does.
pub async fn import_lots(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    multipart: Multipart,
) -> ApiResult {
    let (format, bytes) = sheet_upload(multipart).await?;
    let rows = parse_inventory_rows(format, &bytes).or_respond()?;
    let lots = services
        .domain
        .ledger
        .import_lots(scope.ctx(), caller.principal(), rows)
        .await
        .or_respond()?;

    let now = services.domain.ledger.now();
    let ids = lots.iter().filter_map(|lot| lot.created_by).collect();
    render_one(&services, StatusCode::CREATED, lots, ids, |lots, users| {
        let data: Vec<_> = lots
            .into_iter()
            .map(|lot| dto::lot_to_json(lot, now, users))
            .collect();
        serde_json::json!({ "count": data.len(), "data": data })
    })
    .await
}

pub async fn get_lot(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: LotId = parse_id(&id)?;
    let record = services.domain.ledger.get_lot(caller.principal(), id).await.or_respond()?;
    let now = services.domain.ledger.now();
    let ids = record.lot.created_by.into_iter().collect();
    render_one(&services, StatusCode::OK, record, ids, |record, users| {
        dto::inventory_to_json(record, now, users)
    })
    .await
}

/// Sum over lots that are not expired right now.
pub async fn available_quantity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(product_id): Path<String>,
) -> ApiResult {
    let product_id: ProductId = parse_id(&product_id)?;
    let availability = services
        .domain
        .ledger
        .available_quantity(caller.principal(), product_id)
        .await
        .or_respond()?;
    render_one(&services, StatusCode::OK, availability, Vec::new(), |availability, _| {
        serde_json::json!(availability)
    })
    .await
}

pub async fn list_inventory(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Query(params): Query<InventoryListParams>,
) -> ApiResult {
    let (query, page) = params.into_query().or_respond()?;
    let page = services
        .domain
        .ledger
        .list_lots(caller.principal(), query, page)
        .await
        .or_respond()?;
    let now = services.domain.ledger.now();
    let ids = page.data.iter().filter_map(|r| r.lot.created_by).collect();
    render_page(&services, page, ids, |record, users| {
        dto::inventory_to_json(record, now, users)
    })
    .await
}
