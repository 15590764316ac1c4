use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use depot_transfers::TransferId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_transfer).get(list_transfers))
        .route("/summary", get(summary))
        .route("/:id", get(get_transfer))
        .route("/:id/lines", put(revise_lines))
        .route("/:id/transitions", post(transition))
        .route("/:id/movements", get(movements))
}

pub async fn create_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::CreateTransferRequest>,
) -> axum::response::Response {
    match services.transfers.create_transfer(actor.user_id(), body.into()).await {
        Ok(transfer) => (StatusCode::CREATED, Json(dto::TransferResponse::from(&transfer))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_transfers(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListTransfersQuery>,
) -> axum::response::Response {
    match services.transfers.list_transfers(&query.into()).await {
        Ok(found) => {
            let items: Vec<dto::TransferResponse> = found.iter().map(Into::into).collect();
            (StatusCode::OK, Json(items)).into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let transfer_id: TransferId = match errors::parse_id(&id, "transfer") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.transfers.get_transfer(transfer_id).await {
        Ok(transfer) => (StatusCode::OK, Json(dto::TransferResponse::from(&transfer))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn revise_lines(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReviseLinesRequest>,
) -> axum::response::Response {
    let transfer_id: TransferId = match errors::parse_id(&id, "transfer") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let lines = body.lines.into_iter().map(Into::into).collect();
    match services
        .transfers
        .revise_draft(transfer_id, actor.user_id(), lines, body.notes)
        .await
    {
        Ok(transfer) => (StatusCode::OK, Json(dto::TransferResponse::from(&transfer))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn transition(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::TransitionRequest>,
) -> axum::response::Response {
    let transfer_id: TransferId = match errors::parse_id(&id, "transfer") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let (target, overrides) = match body.into_parts() {
        Ok(parts) => parts,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_input", msg),
    };
    match services
        .transfers
        .transition(transfer_id, target, actor.user_id(), overrides)
        .await
    {
        Ok(transfer) => (StatusCode::OK, Json(dto::TransferResponse::from(&transfer))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn movements(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let transfer_id: TransferId = match errors::parse_id(&id, "transfer") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.transfers.transfer_movements(transfer_id).await {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn summary(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.transfers.list_summary_counts().await {
        Ok(counts) => (StatusCode::OK, Json(counts)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
