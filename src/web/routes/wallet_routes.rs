use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;

use crate::db::models::Wallet;
use crate::db::services::wallet_service;
use crate::web::{AppError, AppState};

pub fn wallet_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_wallets_handler).post(create_wallet_handler))
        .route("/{id}", delete(delete_wallet_handler))
}

#[derive(Debug, Deserialize)]
pub struct CreateWalletRequest {
    pub label: String,
    pub address: String,
}

async fn list_wallets_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Wallet>>, AppError> {
    Ok(Json(wallet_service::list_wallets(&state.pool).await?))
}

async fn create_wallet_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateWalletRequest>,
) -> Result<(StatusCode, Json<Wallet>), AppError> {
    if payload.label.trim().is_empty() || payload.address.trim().is_empty() {
        return Err(AppError::InvalidInput("label and address are required".into()));
    }
    let wallet =
        wallet_service::create_wallet(&state.pool, &payload.label, &payload.address).await?;
    Ok((StatusCode::CREATED, Json(wallet)))
}

async fn delete_wallet_handler(
    State(state): State<Arc<AppState>>,
    Path(wallet_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let deleted = wallet_service::delete_wallet(&state.pool, wallet_id).await?;
    if deleted == 0 {
        return Err(AppError::NotFound(format!("Wallet {wallet_id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}
