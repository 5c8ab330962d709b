use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::remote::{Credential, SshTarget};

/// A registered relay host. Corresponds to the `nodes` table.
///
/// Timestamps are stored as RFC 3339 text; `last_metrics` is the opaque JSON
/// document written by the last collection or deploy cycle.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Node {
    pub id: i64,
    pub host: String,
    pub user: String,
    pub port: i64,
    pub use_password: bool,
    pub password: Option<String>,
    pub key_path: Option<String>,
    pub wg_port: i64,
    pub api_port: i64,
    pub wallet_id: Option<i64>,
    pub payout_address: Option<String>,
    pub capacity_mbps: Option<f64>,
    pub tags: Option<String>,
    pub notes: Option<String>,
    pub created_at: Option<String>,
    pub last_seen: Option<String>,
    pub last_metrics: Option<String>,
}

impl Node {
    pub fn ssh_target(&self) -> SshTarget {
        SshTarget {
            host: self.host.clone(),
            port: self.port as u16,
            user: self.user.clone(),
        }
    }

    /// The active credential, selected by `use_password`.
    pub fn credential(&self) -> Credential {
        if self.use_password {
            Credential::Password(self.password.clone().unwrap_or_default())
        } else {
            Credential::KeyFile(PathBuf::from(self.key_path.clone().unwrap_or_default()))
        }
    }
}

/// Connection fields for a node being registered.
#[derive(Debug, Clone, Deserialize)]
pub struct NewNode {
    pub host: String,
    pub user: String,
    pub port: i64,
    pub use_password: bool,
    pub password: Option<String>,
    pub key_path: Option<String>,
    pub wg_port: i64,
    pub api_port: i64,
    pub wallet_id: Option<i64>,
    pub payout_address: Option<String>,
    pub capacity_mbps: Option<f64>,
    pub tags: Option<String>,
    pub notes: Option<String>,
}

/// A payout wallet, referenced weakly by nodes.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub id: i64,
    pub label: String,
    pub address: String,
}

/// Operator intent to allow a port/protocol/CIDR through the local firewall.
/// Does not reflect live firewall state.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AclRule {
    pub id: i64,
    pub port: i64,
    pub proto: String,
    pub cidr: String,
    pub enabled: bool,
}

/// One condensed history row per collection cycle. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MetricsSample {
    pub id: i64,
    pub node_id: i64,
    pub ts: String,
    pub sessions: i64,
    pub bytes_total: i64,
    pub api_ok: bool,
    pub nat_type: String,
}

/// Free-form key-value setting, singleton per key.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Setting {
    pub key: String,
    pub value: Option<String>,
}
