use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use depot_infra::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    let status = status_for(&err);
    match err {
        ServiceError::InsufficientStock(shortfalls) => (
            status,
            axum::Json(json!({
                "error": "insufficient_stock",
                "message": format!("insufficient stock for {} line(s)", shortfalls.len()),
                "shortfalls": shortfalls,
            })),
        )
            .into_response(),
        ServiceError::Store(e) => {
            tracing::error!(error = %e, "store failure");
            json_error(status, "store_failure", e.to_string())
        }
        other => json_error(status, other.code(), other.to_string()),
    }
}

pub fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::ConcurrentModification(_) | ServiceError::NumberingConflict(_) => StatusCode::CONFLICT,
        ServiceError::IllegalTransition { .. } | ServiceError::InsufficientStock(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path id, mapping failures to a 400.
pub fn parse_id<T>(raw: &str, what: &'static str) -> Result<T, axum::response::Response>
where
    T: core::str::FromStr,
{
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}

#[cfg(test)]
mod tests {
    use depot_infra::StoreError;

    use super::*;

    #[test]
    fn maps_taxonomy_to_status_codes() {
        assert_eq!(status_for(&ServiceError::invalid_input("x")), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&ServiceError::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&ServiceError::ConcurrentModification("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&ServiceError::IllegalTransition {
                from: "draft".into(),
                to: "received".into()
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&ServiceError::Store(StoreError::Backend("down".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
