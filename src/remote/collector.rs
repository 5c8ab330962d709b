use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::RemoteExecutor;
use crate::db::services::{metrics_service, node_service};

/// Name of the relay container on a node; its presence in the process list
/// is one of the two liveness signals.
pub const RELAY_CONTAINER: &str = "myst-node";

/// Averaging window for the vnstat counters, in seconds. The counters are a
/// daily total, so bandwidth is the 24-hour mean.
const BANDWIDTH_WINDOW_SECS: f64 = 3600.0 * 24.0;

const PROBE_TIMEOUT: Duration = Duration::from_secs(25);

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("node {0} not found")]
    NodeNotFound(i64),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Condensed result of one collection cycle, mirrored into the history row.
#[derive(Debug, Clone)]
pub struct CollectOutcome {
    pub sessions: i64,
    pub bytes_total: i64,
    pub api_ok: bool,
    pub nat_type: String,
    pub bandwidth_mbps: f64,
}

/// The fixed, ordered battery of probes for one node. Each entry is
/// (probe name, remote command); the command strings bake in the sentinel
/// fallbacks so a missing tool or dead API yields output instead of an error.
fn probe_battery(api_port: i64) -> Vec<(&'static str, String)> {
    vec![
        ("uptime", "uptime -p".to_string()),
        (
            "docker",
            format!("docker ps --format '{{{{.Names}}}}|{{{{.Status}}}}' | grep {RELAY_CONTAINER} || true"),
        ),
        ("ufw", "ufw status | sed -n '1,30p'".to_string()),
        (
            "traffic",
            "command -v vnstat >/dev/null 2>&1 && vnstat --oneline b || echo 'vnstat not installed'"
                .to_string(),
        ),
        (
            "api_health",
            format!("curl -s --max-time 2 http://127.0.0.1:{api_port}/tequilapi/health || echo ''"),
        ),
        (
            "api_sessions",
            format!("curl -s --max-time 2 http://127.0.0.1:{api_port}/tequilapi/sessions || echo ''"),
        ),
        (
            "api_nat",
            format!("curl -s --max-time 2 http://127.0.0.1:{api_port}/tequilapi/nat/type || echo ''"),
        ),
    ]
}

/// Session count and total sent bytes from the sessions API output.
///
/// Count is the array length; bytes sums the integer `bytes_sent` fields,
/// coercing missing or non-integer values to 0. Anything malformed degrades
/// to (0, 0) rather than failing.
pub fn parse_sessions(raw: &str) -> (i64, i64) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return (0, 0);
    }
    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return (0, 0);
    };
    let Some(items) = value.as_array() else {
        return (0, 0);
    };
    let count = items.len() as i64;
    let bytes = items
        .iter()
        .map(|session| session.get("bytes_sent").and_then(Value::as_i64).unwrap_or(0))
        .sum();
    (count, bytes)
}

/// Average Mbps over the last 24 hours from a vnstat oneline dump
/// (`label;rx_bytes;tx_bytes;…`). Any parse failure yields 0.0.
pub fn parse_bandwidth_mbps(raw: &str) -> f64 {
    let parts: Vec<&str> = raw.trim().split(';').collect();
    if parts.len() < 3 {
        return 0.0;
    }
    let (Ok(rx), Ok(tx)) = (parts[1].trim().parse::<i64>(), parts[2].trim().parse::<i64>()) else {
        return 0.0;
    };
    let total = rx + tx;
    let mbps = (total as f64 * 8.0) / BANDWIDTH_WINDOW_SECS / 1e6;
    (mbps * 1000.0).round() / 1000.0
}

/// The `type` field of the NAT API output, or empty string.
pub fn parse_nat_type(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .and_then(|value| value.get("type").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_default()
}

/// Disjunctive liveness: the relay counts as running if the process list
/// mentions the container OR the health endpoint answered at all. Either
/// signal suffices even when the other probe failed.
pub fn relay_running(docker_out: &str, health_out: &str) -> bool {
    docker_out.contains(RELAY_CONTAINER) || !health_out.trim().is_empty()
}

/// Applies the liveness heuristic to a persisted metrics blob.
pub fn metrics_show_running(last_metrics: Option<&str>) -> bool {
    let Some(raw) = last_metrics else {
        return false;
    };
    let Ok(doc) = serde_json::from_str::<Value>(raw) else {
        return false;
    };
    let probe_out = |name: &str| {
        doc.get(name)
            .and_then(|probe| probe.get("out"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned()
    };
    relay_running(&probe_out("docker"), &probe_out("api_health"))
}

/// Runs the full probe battery against one node, derives the normalized
/// metrics, and persists both the raw document and a history row.
///
/// Probes are individually fault-isolated: a dead host simply produces seven
/// rc-255 entries and an all-zero sample.
pub async fn collect_node(
    pool: &SqlitePool,
    executor: &dyn RemoteExecutor,
    node_id: i64,
) -> Result<CollectOutcome, CollectError> {
    let node = node_service::get_node_by_id(pool, node_id)
        .await?
        .ok_or(CollectError::NodeNotFound(node_id))?;
    let target = node.ssh_target();
    let credential = node.credential();

    let mut document = serde_json::Map::new();
    for (name, command) in probe_battery(node.api_port) {
        let output = executor
            .execute(&target, &credential, &command, PROBE_TIMEOUT)
            .await;
        debug!(node_id, probe = name, rc = output.rc, "probe finished");
        document.insert(
            name.to_string(),
            json!({
                "rc": output.rc,
                "out": output.out.trim(),
                "err": output.err.trim(),
            }),
        );
    }

    let probe_out = |name: &str| {
        document
            .get(name)
            .and_then(|probe| probe.get("out"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned()
    };

    let (sessions, bytes_total) = parse_sessions(&probe_out("api_sessions"));
    let bandwidth_mbps = parse_bandwidth_mbps(&probe_out("traffic"));
    let nat_type = parse_nat_type(&probe_out("api_nat"));
    let api_ok = !probe_out("api_health").is_empty();

    document.insert(
        "sessions".to_string(),
        json!({"count": sessions, "bytes": bytes_total}),
    );
    document.insert("bandwidth".to_string(), json!({"mbps": bandwidth_mbps}));
    document.insert("nat".to_string(), json!({"type": nat_type}));

    let now = Utc::now().to_rfc3339();
    node_service::update_last_metrics(pool, node_id, &now, &Value::Object(document)).await?;
    metrics_service::insert_sample(pool, node_id, &now, sessions, bytes_total, api_ok, &nat_type)
        .await?;

    Ok(CollectOutcome {
        sessions,
        bytes_total,
        api_ok,
        nat_type,
        bandwidth_mbps,
    })
}

/// Best-effort sweep over every registered node, strictly sequential. A
/// failing node is logged and skipped so the batch always completes.
pub async fn collect_all(pool: &SqlitePool, executor: &dyn RemoteExecutor) -> Result<usize, sqlx::Error> {
    let ids = node_service::list_node_ids(pool).await?;
    let mut collected = 0;
    for node_id in ids {
        match collect_node(pool, executor, node_id).await {
            Ok(_) => collected += 1,
            Err(e) => warn!(node_id, error = %e, "collection failed, continuing sweep"),
        }
    }
    info!(collected, "collection sweep done");
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewNode;
    use crate::db::services::node_service;
    use crate::db::test_pool;
    use crate::remote::{CommandOutput, Credential, SshTarget};
    use async_trait::async_trait;

    #[test]
    fn sessions_count_and_bytes_ignore_bad_entries() {
        let raw = r#"[{"bytes_sent":100},{"bytes_sent":"x"},{"bytes_sent":50}]"#;
        assert_eq!(parse_sessions(raw), (3, 150));
    }

    #[test]
    fn sessions_degrade_to_zero() {
        assert_eq!(parse_sessions(""), (0, 0));
        assert_eq!(parse_sessions("not json"), (0, 0));
        assert_eq!(parse_sessions(r#"{"bytes_sent":100}"#), (0, 0));
        assert_eq!(parse_sessions("[]"), (0, 0));
        // Non-object entries still count, but contribute no bytes.
        assert_eq!(parse_sessions(r#"[1, {"bytes_sent": 7}]"#), (2, 7));
    }

    #[test]
    fn bandwidth_is_daily_average() {
        // 432 GB rx + 216 GB tx over 24h -> 60.0 Mbps exactly.
        assert_eq!(
            parse_bandwidth_mbps("eth0;432000000000;216000000000"),
            60.0
        );
    }

    #[test]
    fn bandwidth_rounds_to_three_decimals() {
        let mbps = parse_bandwidth_mbps("eth0;1000000000;500000000");
        assert_eq!(mbps, 0.139);
    }

    #[test]
    fn bandwidth_defaults_on_malformed_input() {
        assert_eq!(parse_bandwidth_mbps("b;notanumber"), 0.0);
        assert_eq!(parse_bandwidth_mbps("b;notanumber;2000"), 0.0);
        assert_eq!(parse_bandwidth_mbps("vnstat not installed"), 0.0);
        assert_eq!(parse_bandwidth_mbps(""), 0.0);
    }

    #[test]
    fn nat_type_from_json() {
        assert_eq!(parse_nat_type(r#"{"type":"full cone"}"#), "full cone");
        assert_eq!(parse_nat_type(r#"{"kind":"other"}"#), "");
        assert_eq!(parse_nat_type("garbage"), "");
        assert_eq!(parse_nat_type(""), "");
    }

    #[test]
    fn liveness_is_a_disjunction() {
        assert!(relay_running("myst-node|Up 3 days", ""));
        assert!(relay_running("", r#"{"status":"ok"}"#));
        assert!(relay_running("myst-node|Up", r#"{"status":"ok"}"#));
        assert!(!relay_running("", ""));
        assert!(!relay_running("other-container|Up", "  "));
    }

    #[test]
    fn running_flag_from_persisted_blob() {
        let doc = r#"{"docker":{"rc":0,"out":"myst-node|Up 2 days","err":""}}"#;
        assert!(metrics_show_running(Some(doc)));

        let doc = r#"{"docker":{"rc":255,"out":"","err":"timeout"},"api_health":{"rc":0,"out":"{}","err":""}}"#;
        assert!(metrics_show_running(Some(doc)));

        assert!(!metrics_show_running(None));
        assert!(!metrics_show_running(Some("not json")));
        assert!(!metrics_show_running(Some(r#"{"uptime":{"out":"up"}}"#)));
    }

    /// Answers probes by substring match on the command; unmatched commands
    /// fail like an unreachable host.
    struct ScriptedExecutor {
        responses: Vec<(&'static str, CommandOutput)>,
    }

    #[async_trait]
    impl RemoteExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            _target: &SshTarget,
            _credential: &Credential,
            command: &str,
            _timeout: Duration,
        ) -> CommandOutput {
            for (needle, output) in &self.responses {
                if command.contains(needle) {
                    return output.clone();
                }
            }
            CommandOutput::failure("connection failed: host unreachable")
        }

        async fn upload(
            &self,
            _target: &SshTarget,
            _credential: &Credential,
            _data: Vec<u8>,
            _remote_path: &str,
            _mode: u32,
            _timeout: Duration,
        ) -> Result<(), crate::remote::ExecError> {
            Ok(())
        }
    }

    fn ok(out: &str) -> CommandOutput {
        CommandOutput {
            rc: 0,
            out: out.to_string(),
            err: String::new(),
        }
    }

    async fn registered_node(pool: &SqlitePool) -> i64 {
        let node = node_service::create_node(
            pool,
            &NewNode {
                host: "203.0.113.30".into(),
                user: "ubuntu".into(),
                port: 22,
                use_password: true,
                password: Some("pw".into()),
                key_path: None,
                wg_port: 51820,
                api_port: 4050,
                wallet_id: None,
                payout_address: None,
                capacity_mbps: None,
                tags: None,
                notes: None,
            },
        )
        .await
        .unwrap();
        node.id
    }

    #[tokio::test]
    async fn collect_persists_document_and_sample() {
        let pool = test_pool().await;
        let node_id = registered_node(&pool).await;

        let executor = ScriptedExecutor {
            responses: vec![
                ("uptime", ok("up 2 days")),
                ("docker ps", ok("myst-node|Up 2 days")),
                ("ufw status", ok("Status: active")),
                ("vnstat", ok("eth0;432000000000;216000000000;x")),
                ("/tequilapi/health", ok(r#"{"uptime":"48h"}"#)),
                (
                    "/tequilapi/sessions",
                    ok(r#"[{"bytes_sent":100},{"bytes_sent":"x"},{"bytes_sent":50}]"#),
                ),
                ("/tequilapi/nat", ok(r#"{"type":"full cone"}"#)),
            ],
        };

        let outcome = collect_node(&pool, &executor, node_id).await.unwrap();
        assert_eq!(outcome.sessions, 3);
        assert_eq!(outcome.bytes_total, 150);
        assert!(outcome.api_ok);
        assert_eq!(outcome.nat_type, "full cone");
        assert_eq!(outcome.bandwidth_mbps, 60.0);

        let node = node_service::get_node_by_id(&pool, node_id)
            .await
            .unwrap()
            .unwrap();
        assert!(node.last_seen.is_some());
        let doc: Value = serde_json::from_str(node.last_metrics.as_deref().unwrap()).unwrap();
        assert_eq!(doc["sessions"]["count"], 3);
        assert_eq!(doc["sessions"]["bytes"], 150);
        assert_eq!(doc["bandwidth"]["mbps"], 60.0);
        assert_eq!(doc["nat"]["type"], "full cone");
        assert_eq!(doc["uptime"]["out"], "up 2 days");
        assert!(metrics_show_running(node.last_metrics.as_deref()));

        let samples = metrics_service::list_samples_for_node(&pool, node_id, 10)
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].sessions, 3);
        assert_eq!(samples[0].bytes_total, 150);
        assert!(samples[0].api_ok);
    }

    #[tokio::test]
    async fn unreachable_host_still_produces_a_full_document() {
        let pool = test_pool().await;
        let node_id = registered_node(&pool).await;

        let executor = ScriptedExecutor { responses: vec![] };
        let outcome = collect_node(&pool, &executor, node_id).await.unwrap();
        assert_eq!(outcome.sessions, 0);
        assert_eq!(outcome.bytes_total, 0);
        assert!(!outcome.api_ok);
        assert_eq!(outcome.nat_type, "");

        let node = node_service::get_node_by_id(&pool, node_id)
            .await
            .unwrap()
            .unwrap();
        let doc: Value = serde_json::from_str(node.last_metrics.as_deref().unwrap()).unwrap();
        for probe in ["uptime", "docker", "ufw", "traffic", "api_health", "api_sessions", "api_nat"] {
            assert_eq!(doc[probe]["rc"], 255, "probe {probe}");
            assert_eq!(doc[probe]["out"], "");
        }
        assert!(!metrics_show_running(node.last_metrics.as_deref()));
    }

    #[tokio::test]
    async fn collect_unknown_node_is_not_found() {
        let pool = test_pool().await;
        let executor = ScriptedExecutor { responses: vec![] };
        let err = collect_node(&pool, &executor, 99).await.unwrap_err();
        assert!(matches!(err, CollectError::NodeNotFound(99)));
    }

    #[tokio::test]
    async fn sweep_skips_failing_nodes() {
        let pool = test_pool().await;
        let first = registered_node(&pool).await;
        let second = registered_node(&pool).await;

        let executor = ScriptedExecutor {
            responses: vec![("uptime", ok("up 1 hour"))],
        };
        let collected = collect_all(&pool, &executor).await.unwrap();
        assert_eq!(collected, 2);

        for id in [first, second] {
            let node = node_service::get_node_by_id(&pool, id).await.unwrap().unwrap();
            assert!(node.last_metrics.is_some());
        }
    }
}
