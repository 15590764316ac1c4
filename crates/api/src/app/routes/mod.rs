use axum::Router;

pub mod catalog;
pub mod stock;
pub mod system;
pub mod transfers;

/// Router for all actor-aware endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/transfers", transfers::router())
        .nest("/stock", stock::router())
        .nest("/catalog", catalog::router())
}
