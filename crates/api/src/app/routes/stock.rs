use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use depot_inventory::StockKey;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/balance", get(balance))
        .route("/availability", get(availability))
        .route("/adjustments", post(record_adjustment))
}

/// Current balance, or the balance as of `as_of` when given.
pub async fn balance(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::BalanceQuery>,
) -> axum::response::Response {
    match services.transfers.get_balance(query.key(), query.as_of).await {
        Ok(quantity) => (
            StatusCode::OK,
            Json(dto::BalanceResponse {
                product_id: query.product_id,
                warehouse_id: query.warehouse_id,
                lot_id: query.lot_id,
                as_of: query.as_of,
                quantity,
            }),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn availability(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::AvailabilityQuery>,
) -> axum::response::Response {
    let key = StockKey::new(query.product_id, query.warehouse_id, query.lot_id);
    match services.transfers.check_available(key, query.quantity).await {
        Ok(availability) => (StatusCode::OK, Json(availability)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn record_adjustment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::AdjustmentRequest>,
) -> axum::response::Response {
    match services.transfers.record_adjustment(actor.user_id(), body.into()).await {
        Ok(movement) => (StatusCode::CREATED, Json(movement)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
