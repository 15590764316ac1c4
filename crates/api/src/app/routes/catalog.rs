//! Catalog seeding for dev runs and black-box tests.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/warehouses", post(create_warehouse).get(list_warehouses))
        .route("/products", post(create_product).get(list_products))
}

pub async fn create_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateWarehouseRequest>,
) -> axum::response::Response {
    if body.name.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_input", "name is required");
    }

    let warehouse = services.catalog.add_warehouse(body.name.trim());
    (StatusCode::CREATED, Json(warehouse)).into_response()
}

pub async fn list_warehouses(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(services.catalog.warehouses())
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateProductRequest>,
) -> axum::response::Response {
    if body.sku.trim().is_empty() || body.name.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_input", "name and sku are required");
    }

    let product = services
        .catalog
        .add_product(body.name.trim(), body.sku.trim(), body.unit.trim());
    (StatusCode::CREATED, Json(product)).into_response()
}

pub async fn list_products(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(services.catalog.products())
}
