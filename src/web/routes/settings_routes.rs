use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::State,
    routing::get,
    Json, Router,
};

use crate::db::services::settings_service;
use crate::web::{AppError, AppState};

/// Keys the dashboard settings page knows about.
const KNOWN_KEYS: [&str; 5] = [
    "hostname",
    "le_email",
    "telegram_token",
    "telegram_chat",
    "usd_per_gb",
];

pub fn settings_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_settings_handler).put(save_settings_handler))
}

async fn get_settings_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BTreeMap<String, String>>, AppError> {
    let mut settings = BTreeMap::new();
    for key in KNOWN_KEYS {
        let default = if key == "usd_per_gb" { "0" } else { "" };
        let value = settings_service::get_setting(&state.pool, key)
            .await?
            .unwrap_or_else(|| default.to_string());
        settings.insert(key.to_string(), value);
    }
    // Free-form keys ride along too.
    for setting in settings_service::list_settings(&state.pool).await? {
        settings
            .entry(setting.key)
            .or_insert_with(|| setting.value.unwrap_or_default());
    }
    Ok(Json(settings))
}

async fn save_settings_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BTreeMap<String, String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    for (key, value) in &payload {
        settings_service::set_setting(&state.pool, key, value).await?;
    }
    Ok(Json(serde_json::json!({ "saved": payload.len() })))
}
