use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::models::{MetricsSample, NewNode, Node};
use crate::db::services::{metrics_service, node_service, settings_service, wallet_service};
use crate::remote::collector::{self, CollectOutcome};
use crate::remote::deployer::{self, DeployOutcome};
use crate::web::{AppError, AppState};

pub fn node_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_nodes_handler).post(create_node_handler))
        .route("/{id}", delete(delete_node_handler))
        .route("/{id}/metrics", get(node_history_handler))
        .route("/{id}/collect", post(collect_handler))
        .route("/{id}/deploy", post(deploy_handler))
        .route("/collect_all", post(collect_all_handler))
}

fn default_ssh_port() -> i64 {
    22
}
fn default_auth_type() -> String {
    "password".to_string()
}
fn default_wg_port() -> i64 {
    51820
}
fn default_api_port() -> i64 {
    4050
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeRequest {
    pub host: String,
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: i64,
    /// "password" or "key"
    #[serde(default = "default_auth_type")]
    pub auth_type: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default = "default_wg_port")]
    pub wg_port: i64,
    #[serde(default = "default_api_port")]
    pub api_port: i64,
    #[serde(default)]
    pub wallet_id: Option<i64>,
    #[serde(default)]
    pub payout_address: Option<String>,
    #[serde(default)]
    pub capacity_mbps: Option<f64>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Node row enriched with the derived dashboard fields.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeListItemResponse {
    pub id: i64,
    pub host: String,
    pub user: String,
    pub port: i64,
    pub wg_port: i64,
    pub api_port: i64,
    pub wallet_id: Option<i64>,
    pub wallet_label: Option<String>,
    pub payout_address: Option<String>,
    pub capacity_mbps: Option<f64>,
    pub tags: Option<String>,
    pub notes: Option<String>,
    pub created_at: Option<String>,
    pub last_seen: Option<String>,
    pub myst_running: bool,
    pub sessions: i64,
    pub bytes_total: i64,
    pub bandwidth_mbps: f64,
    pub nat_type: String,
    pub utilization_pct: Option<f64>,
    pub est_usd: f64,
}

impl NodeListItemResponse {
    fn from_node(node: Node, wallet_label: Option<String>, usd_per_gb: f64) -> Self {
        let doc: Value = node
            .last_metrics
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or(Value::Null);

        let sessions = doc["sessions"]["count"].as_i64().unwrap_or(0);
        let bytes_total = doc["sessions"]["bytes"].as_i64().unwrap_or(0);
        let bandwidth_mbps = doc["bandwidth"]["mbps"].as_f64().unwrap_or(0.0);
        let nat_type = doc["nat"]["type"].as_str().unwrap_or("").to_string();
        let myst_running = collector::metrics_show_running(node.last_metrics.as_deref());

        let utilization_pct = node
            .capacity_mbps
            .filter(|cap| *cap > 0.0)
            .map(|cap| ((bandwidth_mbps / cap) * 1000.0).round() / 10.0);
        let est_usd = if usd_per_gb > 0.0 {
            ((bytes_total as f64 / 1e9) * usd_per_gb * 10_000.0).round() / 10_000.0
        } else {
            0.0
        };

        NodeListItemResponse {
            id: node.id,
            host: node.host,
            user: node.user,
            port: node.port,
            wg_port: node.wg_port,
            api_port: node.api_port,
            wallet_id: node.wallet_id,
            wallet_label,
            payout_address: node.payout_address,
            capacity_mbps: node.capacity_mbps,
            tags: node.tags,
            notes: node.notes,
            created_at: node.created_at,
            last_seen: node.last_seen,
            myst_running,
            sessions,
            bytes_total,
            bandwidth_mbps,
            nat_type,
            utilization_pct,
            est_usd,
        }
    }
}

async fn list_nodes_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<NodeListItemResponse>>, AppError> {
    let nodes = node_service::list_nodes(&state.pool).await?;
    let wallets: HashMap<i64, String> = wallet_service::list_wallets(&state.pool)
        .await?
        .into_iter()
        .map(|wallet| (wallet.id, wallet.label))
        .collect();
    let usd_per_gb = settings_service::get_setting(&state.pool, "usd_per_gb")
        .await?
        .and_then(|raw| raw.parse::<f64>().ok())
        .unwrap_or(0.0);

    let items = nodes
        .into_iter()
        .map(|node| {
            let label = node.wallet_id.and_then(|id| wallets.get(&id).cloned());
            NodeListItemResponse::from_node(node, label, usd_per_gb)
        })
        .collect();
    Ok(Json(items))
}

async fn create_node_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateNodeRequest>,
) -> Result<(StatusCode, Json<Node>), AppError> {
    if payload.host.trim().is_empty() || payload.user.trim().is_empty() {
        return Err(AppError::InvalidInput("host and user are required".into()));
    }
    let use_password = match payload.auth_type.as_str() {
        "password" => true,
        "key" => false,
        other => {
            return Err(AppError::InvalidInput(format!(
                "unknown auth type: {other}"
            )))
        }
    };

    let node = node_service::create_node(
        &state.pool,
        &NewNode {
            host: payload.host.trim().to_string(),
            user: payload.user.trim().to_string(),
            port: payload.port,
            use_password,
            password: payload.password,
            key_path: payload.key_path,
            wg_port: payload.wg_port,
            api_port: payload.api_port,
            wallet_id: payload.wallet_id,
            payout_address: payload.payout_address.filter(|a| !a.is_empty()),
            capacity_mbps: payload.capacity_mbps,
            tags: payload.tags,
            notes: payload.notes,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(node)))
}

async fn delete_node_handler(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let deleted = node_service::delete_node(&state.pool, node_id).await?;
    if deleted == 0 {
        return Err(AppError::NotFound(format!("Node {node_id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    100
}

async fn node_history_handler(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MetricsSample>>, AppError> {
    node_service::get_node_by_id(&state.pool, node_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Node {node_id} not found")))?;
    let samples =
        metrics_service::list_samples_for_node(&state.pool, node_id, query.limit).await?;
    Ok(Json(samples))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectResponse {
    pub sessions: i64,
    pub bytes_total: i64,
    pub api_ok: bool,
    pub nat_type: String,
    pub bandwidth_mbps: f64,
}

impl From<CollectOutcome> for CollectResponse {
    fn from(outcome: CollectOutcome) -> Self {
        CollectResponse {
            sessions: outcome.sessions,
            bytes_total: outcome.bytes_total,
            api_ok: outcome.api_ok,
            nat_type: outcome.nat_type,
            bandwidth_mbps: outcome.bandwidth_mbps,
        }
    }
}

async fn collect_handler(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<i64>,
) -> Result<Json<CollectResponse>, AppError> {
    let outcome = collector::collect_node(&state.pool, state.executor.as_ref(), node_id).await?;
    Ok(Json(outcome.into()))
}

async fn collect_all_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let collected = collector::collect_all(&state.pool, state.executor.as_ref()).await?;
    Ok(Json(serde_json::json!({ "collected": collected })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub skipped: bool,
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
}

async fn deploy_handler(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<i64>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Json<DeployResponse>, AppError> {
    // The install script receives the requesting client's address as the
    // management IP.
    let mgmt_ip = addr.ip().to_string();
    let outcome = deployer::deploy_node(
        &state.pool,
        state.executor.as_ref(),
        node_id,
        &mgmt_ip,
        &state.config.install_script,
    )
    .await?;

    let response = match outcome {
        DeployOutcome::AlreadyRunning => DeployResponse {
            skipped: true,
            ok: true,
            stdout: String::new(),
            stderr: String::new(),
        },
        DeployOutcome::Completed(result) => DeployResponse {
            skipped: false,
            ok: result.ok,
            stdout: result.stdout,
            stderr: result.stderr,
        },
    };
    Ok(Json(response))
}
