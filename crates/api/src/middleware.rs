use axum::{
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::Response,
};

use depot_core::UserId;

use crate::app::errors::json_error;
use crate::context::ActorContext;

pub const ACTOR_HEADER: &str = "x-actor-id";

/// Resolve the acting user from `x-actor-id`.
///
/// Reads pass through without one; every other method is rejected with 401
/// when the header is missing and 400 when it is not a user id.
pub async fn actor_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let required = !matches!(*req.method(), Method::GET | Method::HEAD | Method::OPTIONS);

    match extract_actor(req.headers()) {
        Ok(Some(user_id)) => {
            req.extensions_mut().insert(ActorContext::new(user_id));
        }
        Ok(None) if required => {
            return Err(json_error(
                StatusCode::UNAUTHORIZED,
                "missing_actor",
                format!("{ACTOR_HEADER} header is required"),
            ));
        }
        Ok(None) => {}
        Err(msg) => return Err(json_error(StatusCode::BAD_REQUEST, "invalid_actor", msg)),
    }

    Ok(next.run(req).await)
}

fn extract_actor(headers: &HeaderMap) -> Result<Option<UserId>, String> {
    let Some(header) = headers.get(ACTOR_HEADER) else {
        return Ok(None);
    };

    let raw = header
        .to_str()
        .map_err(|_| format!("{ACTOR_HEADER} is not valid ascii"))?
        .trim();
    if raw.is_empty() {
        return Ok(None);
    }

    raw.parse().map(Some).map_err(|e| format!("{e}"))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn extracts_actor_from_header() {
        let user = UserId::new();
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_HEADER, HeaderValue::from_str(&user.to_string()).unwrap());
        assert_eq!(extract_actor(&headers), Ok(Some(user)));
    }

    #[test]
    fn missing_or_blank_header_is_no_actor() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_actor(&headers), Ok(None));
        headers.insert(ACTOR_HEADER, HeaderValue::from_static("  "));
        assert_eq!(extract_actor(&headers), Ok(None));
    }

    #[test]
    fn malformed_actor_is_an_error() {
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_HEADER, HeaderValue::from_static("bob"));
        assert!(extract_actor(&headers).is_err());
    }
}
