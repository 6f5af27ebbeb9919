//! Bearer-token session check for protected routes.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use physio_core::models::SessionKind;

use crate::{ApiError, AppState};

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Reject requests without a live staff session and attach the session
/// otherwise. Patient-portal sessions get 403.
pub(crate) async fn require_staff_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.config.require_auth {
        return Ok(next.run(req).await);
    }
    let token = bearer_token(req.headers())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;
    let auth = state.auth.clone();
    let session = state
        .blocking(move |db| Ok(auth.validate_session(db, &token)?))
        .await?;
    if session.kind != SessionKind::Staff {
        return Err(ApiError::Forbidden("staff session required".into()));
    }
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}
