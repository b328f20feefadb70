use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};

use stockroom_core::OrderId;
use stockroom_sales::CheckoutRequest;

use crate::app::dto::{self, OrderListParams};
use crate::app::routes::common::{ApiResult, OrRespond, body, parse_id, render_one, render_page};
use crate::app::services::AppServices;
use crate::context::{CallerContext, RequestScope};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_orders))
        .route("/checkout", post(checkout))
        .route("/:id", get(get_order))
}

/// Price, reconcile and commit a cart. The order and its stock depletion are
/// written together or not at all.
pub async fn checkout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(scope): Extension<RequestScope>,
    Extension(caller): Extension<CallerContext>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let order = services
        .domain
        .checkout
        .checkout(scope.ctx(), caller.principal(), request)
        .await
        .or_respond()?;
    let ids = order.created_by.into_iter().collect();
    render_one(&services, StatusCode::CREATED, order, ids, dto::order_to_json).await
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: OrderId = parse_id(&id)?;
    let order = services.domain.checkout.get_order(caller.principal(), id).await.or_respond()?;
    let ids = order.created_by.into_iter().collect();
    render_one(&services, StatusCode::OK, order, ids, dto::order_to_json).await
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Query(params): Query<OrderListParams>,
) -> ApiResult {
    let (query, page) = params.into_query();
    let page = services
        .domain
        .checkout
        .list_orders(caller.principal(), query, page)
        .await
        .or_respond()?;
    let ids = page.data.iter().filter_map(|o| o.created_by).collect();
    render_page(&services, page, ids, dto::order_to_json).await
}
