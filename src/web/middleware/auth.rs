use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::warn;

use crate::web::{error::AppError, AppState};

/// Single-admin HTTP Basic auth against the configured credentials.
pub async fn auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let encoded = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Basic "))
        .ok_or(AppError::Unauthorized)?;

    let decoded = STANDARD
        .decode(encoded)
        .map_err(|_| AppError::Unauthorized)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AppError::Unauthorized)?;
    let (user, password) = decoded.split_once(':').ok_or(AppError::Unauthorized)?;

    if user != state.config.admin_user || password != state.config.admin_password {
        warn!(user, "rejected login attempt");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(req).await)
}
