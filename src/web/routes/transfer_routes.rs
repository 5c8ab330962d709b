use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::models::{AclRule, Node, Setting, Wallet};
use crate::db::services::{acl_service, node_service, settings_service, wallet_service};
use crate::web::{AppError, AppState};

pub fn transfer_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/export", get(export_handler))
        .route("/api/import", post(import_handler))
        .route("/api/tls/generate", post(tls_generate_handler))
}

/// Full JSON dump of the store. Credentials are included in the clear, as
/// everywhere else in this panel.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExportDump {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub wallets: Vec<Wallet>,
    #[serde(default)]
    pub acls: Vec<AclRule>,
    #[serde(default)]
    pub settings: Vec<Setting>,
}

async fn export_handler(State(state): State<Arc<AppState>>) -> Result<Json<ExportDump>, AppError> {
    Ok(Json(ExportDump {
        nodes: node_service::list_nodes(&state.pool).await?,
        wallets: wallet_service::list_wallets(&state.pool).await?,
        acls: acl_service::list_rules(&state.pool).await?,
        settings: settings_service::list_settings(&state.pool).await?,
    }))
}

async fn import_handler(
    State(state): State<Arc<AppState>>,
    Json(dump): Json<ExportDump>,
) -> Result<Json<serde_json::Value>, AppError> {
    for wallet in &dump.wallets {
        wallet_service::create_wallet(&state.pool, &wallet.label, &wallet.address).await?;
    }
    for node in &dump.nodes {
        node_service::insert_node_row(&state.pool, node).await?;
    }
    for rule in &dump.acls {
        acl_service::insert_rule_row(&state.pool, rule).await?;
    }
    for setting in &dump.settings {
        let value = setting.value.clone().unwrap_or_default();
        settings_service::set_setting(&state.pool, &setting.key, &value).await?;
    }
    info!(
        nodes = dump.nodes.len(),
        wallets = dump.wallets.len(),
        acls = dump.acls.len(),
        "import finished"
    );
    Ok(Json(serde_json::json!({
        "nodes": dump.nodes.len(),
        "wallets": dump.wallets.len(),
        "acls": dump.acls.len(),
        "settings": dump.settings.len(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct TlsGenerateRequest {
    pub hostname: String,
    pub email: String,
}

/// Writes a nginx + certbot bootstrap script for the panel host and records
/// the hostname/email settings. The operator runs the script as root.
async fn tls_generate_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TlsGenerateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let hostname = payload.hostname.trim().to_string();
    let email = payload.email.trim().to_string();
    if hostname.is_empty() || email.is_empty() {
        return Err(AppError::InvalidInput("hostname and email are required".into()));
    }

    settings_service::set_setting(&state.pool, "hostname", &hostname).await?;
    settings_service::set_setting(&state.pool, "le_email", &email).await?;

    let panel_port = state.config.panel_port();
    let script = format!(
        r#"#!/usr/bin/env bash
set -euo pipefail
apt-get update -y
apt-get install -y nginx certbot python3-certbot-nginx
cat >/etc/nginx/sites-available/mystfleet.conf <<NG
server {{
  listen 80;
  server_name {hostname};
  location / {{
    proxy_pass http://127.0.0.1:{panel_port};
    proxy_set_header Host $host;
    proxy_set_header X-Real-IP $remote_addr;
    proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
    proxy_set_header X-Forwarded-Proto $scheme;
  }}
}}
NG
ln -sf /etc/nginx/sites-available/mystfleet.conf /etc/nginx/sites-enabled/mystfleet.conf
nginx -t && systemctl restart nginx
ufw allow 80/tcp || true
ufw allow 443/tcp || true
certbot --nginx -d "{hostname}" --non-interactive --agree-tos -m "{email}" --redirect
systemctl reload nginx
echo "TLS ready at https://{hostname}"
"#
    );

    tokio::fs::create_dir_all(&state.config.generated_dir)
        .await
        .map_err(|e| AppError::InternalServerError(format!("create generated dir: {e}")))?;
    let path = state
        .config
        .generated_dir
        .join(format!("setup_tls_{hostname}.sh"));
    tokio::fs::write(&path, script)
        .await
        .map_err(|e| AppError::InternalServerError(format!("write script: {e}")))?;
    tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|e| AppError::InternalServerError(format!("chmod script: {e}")))?;

    info!(path = %path.display(), "generated TLS bootstrap script");
    Ok(Json(serde_json::json!({
        "path": path.display().to_string(),
        "note": "Run it as root on the panel host.",
    })))
}
