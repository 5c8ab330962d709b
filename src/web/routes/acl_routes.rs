use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use crate::db::models::AclRule;
use crate::db::services::acl_service;
use crate::firewall;
use crate::web::{AppError, AppState};

pub fn acl_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_rules_handler).post(create_rule_handler))
        .route("/{id}", delete(delete_rule_handler))
        .route("/{id}/toggle", post(toggle_rule_handler))
        .route("/apply", post(apply_handler))
}

fn default_proto() -> String {
    "tcp".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub port: i64,
    #[serde(default = "default_proto")]
    pub proto: String,
    pub cidr: String,
}

async fn list_rules_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AclRule>>, AppError> {
    Ok(Json(acl_service::list_rules(&state.pool).await?))
}

async fn create_rule_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRuleRequest>,
) -> Result<(StatusCode, Json<AclRule>), AppError> {
    if payload.port < 1 || payload.port > 65535 {
        return Err(AppError::InvalidInput(format!(
            "port out of range: {}",
            payload.port
        )));
    }
    if payload.proto != "tcp" && payload.proto != "udp" {
        return Err(AppError::InvalidInput(format!(
            "unknown protocol: {}",
            payload.proto
        )));
    }
    if payload.cidr.trim().is_empty() {
        return Err(AppError::InvalidInput("cidr is required".into()));
    }
    let rule =
        acl_service::create_rule(&state.pool, payload.port, &payload.proto, payload.cidr.trim())
            .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn toggle_rule_handler(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let enabled = acl_service::toggle_rule(&state.pool, rule_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ACL rule {rule_id} not found")))?;
    Ok(Json(serde_json::json!({ "id": rule_id, "enabled": enabled })))
}

async fn delete_rule_handler(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let deleted = acl_service::delete_rule(&state.pool, rule_id).await?;
    if deleted == 0 {
        return Err(AppError::NotFound(format!("ACL rule {rule_id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Converges the host firewall to the enabled ACL rows plus the implicit
/// SSH/panel rules scoped to whoever is asking.
async fn apply_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Json<serde_json::Value>, AppError> {
    let rows = acl_service::list_enabled_rules(&state.pool).await?;
    let requester = addr.ip().to_string();
    info!(requester, rules = rows.len(), "applying firewall rules");
    firewall::apply(
        state.firewall.as_ref(),
        &rows,
        &requester,
        state.config.panel_port(),
    )
    .await;
    Ok(Json(serde_json::json!({ "status": "applied" })))
}
