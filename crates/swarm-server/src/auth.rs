//! Bearer-token middleware for the `/api/*` surface.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use crate::server::{error_response, AppState};

/// Require `Authorization: Bearer <key>` when an API key is configured.
/// `/health` and `/ws` are wired outside this middleware.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.api_key.is_empty() {
        let expected = format!("Bearer {}", state.api_key);
        let authorized = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value == expected)
            .unwrap_or(false);
        if !authorized {
            return error_response(StatusCode::UNAUTHORIZED, "unauthorized");
        }
    }
    next.run(request).await
}
