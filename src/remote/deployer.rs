use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

use super::collector::metrics_show_running;
use super::RemoteExecutor;
use crate::db::services::{node_service, wallet_service};

/// Where the provisioning script lands on the node.
pub const REMOTE_SCRIPT_PATH: &str = "/tmp/remote_install.sh";

/// Installation compiles and pulls images on the node; allow tens of minutes.
const INSTALL_TIMEOUT: Duration = Duration::from_secs(1200);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Bounded retention for captured output, in characters.
const OUTPUT_TAIL_CHARS: usize = 4000;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("node {0} not found")]
    NodeNotFound(i64),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("serialize result: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persisted outcome of one deploy attempt.
#[derive(Debug, Clone, Serialize)]
pub struct DeployResult {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub enum DeployOutcome {
    /// The node's last metrics already show the relay running; nothing was
    /// uploaded or executed.
    AlreadyRunning,
    Completed(DeployResult),
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        text.to_string()
    } else {
        text.chars().skip(count - max_chars).collect()
    }
}

/// Ensures the relay is installed on a node: uploads the provisioning script
/// and runs it with the management address and payout parameters.
///
/// Deploy never propagates a transport error; every failure is recorded as a
/// result with the message in `stderr`, and the outcome is persisted as the
/// node's last metrics either way.
pub async fn deploy_node(
    pool: &SqlitePool,
    executor: &dyn RemoteExecutor,
    node_id: i64,
    mgmt_ip: &str,
    script_path: &Path,
) -> Result<DeployOutcome, DeployError> {
    let node = node_service::get_node_by_id(pool, node_id)
        .await?
        .ok_or(DeployError::NodeNotFound(node_id))?;

    if metrics_show_running(node.last_metrics.as_deref()) {
        info!(node_id, "relay already running, skipping deploy");
        return Ok(DeployOutcome::AlreadyRunning);
    }

    // Direct payout address wins over the wallet reference.
    let payout = match node.payout_address.clone().filter(|a| !a.is_empty()) {
        Some(address) => Some(address),
        None => wallet_service::get_wallet_address(pool, node.wallet_id).await?,
    };
    let payout = payout.unwrap_or_default();

    let target = node.ssh_target();
    let credential = node.credential();

    let mut result = DeployResult {
        ok: false,
        stdout: String::new(),
        stderr: String::new(),
    };

    match tokio::fs::read(script_path).await {
        Err(e) => {
            result.stderr = format!("read {}: {e}", script_path.display());
        }
        Ok(script) => {
            let uploaded = executor
                .upload(
                    &target,
                    &credential,
                    script,
                    REMOTE_SCRIPT_PATH,
                    0o755,
                    UPLOAD_TIMEOUT,
                )
                .await;
            match uploaded {
                Err(e) => result.stderr = e.to_string(),
                Ok(()) => {
                    let command = format!(
                        "sudo MGMT_IP='{mgmt_ip}' PAYOUT_ADDRESS='{payout}' WG_PORT='{}' \
                         API_PORT='{}' bash {REMOTE_SCRIPT_PATH} --non-interactive",
                        node.wg_port, node.api_port
                    );
                    let output = executor
                        .execute(&target, &credential, &command, INSTALL_TIMEOUT)
                        .await;
                    result.ok = output.rc == 0;
                    result.stdout = tail(&output.out, OUTPUT_TAIL_CHARS);
                    result.stderr = tail(&output.err, OUTPUT_TAIL_CHARS);
                }
            }
        }
    }

    let now = Utc::now().to_rfc3339();
    node_service::update_last_metrics(pool, node_id, &now, &serde_json::to_value(&result)?).await?;
    info!(node_id, ok = result.ok, "deploy finished");

    Ok(DeployOutcome::Completed(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewNode;
    use crate::db::services::node_service;
    use crate::db::test_pool;
    use crate::remote::{CommandOutput, Credential, ExecError, SshTarget};
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Debug, PartialEq)]
    enum Call {
        Upload { path: String, mode: u32 },
        Execute { command: String },
    }

    /// Records every transport call and replies with a fixed exit code.
    struct RecordingExecutor {
        calls: Mutex<Vec<Call>>,
        exec_result: CommandOutput,
        fail_upload: bool,
    }

    impl RecordingExecutor {
        fn succeeding(out: &str) -> Self {
            RecordingExecutor {
                calls: Mutex::new(Vec::new()),
                exec_result: CommandOutput {
                    rc: 0,
                    out: out.to_string(),
                    err: String::new(),
                },
                fail_upload: false,
            }
        }
    }

    #[async_trait]
    impl RemoteExecutor for RecordingExecutor {
        async fn execute(
            &self,
            _target: &SshTarget,
            _credential: &Credential,
            command: &str,
            _timeout: Duration,
        ) -> CommandOutput {
            self.calls.lock().unwrap().push(Call::Execute {
                command: command.to_string(),
            });
            self.exec_result.clone()
        }

        async fn upload(
            &self,
            _target: &SshTarget,
            _credential: &Credential,
            _data: Vec<u8>,
            remote_path: &str,
            mode: u32,
            _timeout: Duration,
        ) -> Result<(), ExecError> {
            self.calls.lock().unwrap().push(Call::Upload {
                path: remote_path.to_string(),
                mode,
            });
            if self.fail_upload {
                Err(ExecError::Connection("sftp refused".into()))
            } else {
                Ok(())
            }
        }
    }

    async fn registered_node(pool: &SqlitePool, payout: Option<&str>) -> i64 {
        let node = node_service::create_node(
            pool,
            &NewNode {
                host: "203.0.113.40".into(),
                user: "root".into(),
                port: 22,
                use_password: true,
                password: Some("pw".into()),
                key_path: None,
                wg_port: 51821,
                api_port: 4051,
                wallet_id: None,
                payout_address: payout.map(str::to_owned),
                capacity_mbps: None,
                tags: None,
                notes: None,
            },
        )
        .await
        .unwrap();
        node.id
    }

    fn script_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "#!/usr/bin/env bash\necho installing").unwrap();
        file
    }

    #[tokio::test]
    async fn deploy_uploads_then_executes_with_env() {
        let pool = test_pool().await;
        let node_id = registered_node(&pool, Some("0xpayout")).await;
        let executor = RecordingExecutor::succeeding("install done");
        let script = script_file();

        let outcome = deploy_node(&pool, &executor, node_id, "198.51.100.1", script.path())
            .await
            .unwrap();
        let DeployOutcome::Completed(result) = outcome else {
            panic!("expected a completed deploy");
        };
        assert!(result.ok);
        assert_eq!(result.stdout, "install done");

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            Call::Upload {
                path: REMOTE_SCRIPT_PATH.to_string(),
                mode: 0o755
            }
        );
        let Call::Execute { command } = &calls[1] else {
            panic!("expected an execute call");
        };
        assert!(command.contains("MGMT_IP='198.51.100.1'"));
        assert!(command.contains("PAYOUT_ADDRESS='0xpayout'"));
        assert!(command.contains("WG_PORT='51821'"));
        assert!(command.contains("API_PORT='4051'"));
        assert!(command.contains("--non-interactive"));

        let node = node_service::get_node_by_id(&pool, node_id).await.unwrap().unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(node.last_metrics.as_deref().unwrap()).unwrap();
        assert_eq!(doc["ok"], true);
        assert_eq!(doc["stdout"], "install done");
    }

    #[tokio::test]
    async fn deploy_skips_when_relay_already_running() {
        let pool = test_pool().await;
        let node_id = registered_node(&pool, None).await;
        let running = serde_json::json!({"docker": {"rc": 0, "out": "myst-node|Up", "err": ""}});
        node_service::update_last_metrics(&pool, node_id, "2025-01-01T00:00:00+00:00", &running)
            .await
            .unwrap();

        let executor = RecordingExecutor::succeeding("");
        let script = script_file();
        let outcome = deploy_node(&pool, &executor, node_id, "198.51.100.1", script.path())
            .await
            .unwrap();

        assert!(matches!(outcome, DeployOutcome::AlreadyRunning));
        assert!(executor.calls.lock().unwrap().is_empty());
        // The guard must not overwrite the existing blob either.
        let node = node_service::get_node_by_id(&pool, node_id).await.unwrap().unwrap();
        assert_eq!(node.last_seen.as_deref(), Some("2025-01-01T00:00:00+00:00"));
    }

    #[tokio::test]
    async fn wallet_address_is_fallback_payout() {
        let pool = test_pool().await;
        let wallet = wallet_service::create_wallet(&pool, "w", "0xwallet").await.unwrap();
        let node = node_service::create_node(
            &pool,
            &NewNode {
                host: "203.0.113.41".into(),
                user: "root".into(),
                port: 22,
                use_password: true,
                password: Some("pw".into()),
                key_path: None,
                wg_port: 51820,
                api_port: 4050,
                wallet_id: Some(wallet.id),
                payout_address: None,
                capacity_mbps: None,
                tags: None,
                notes: None,
            },
        )
        .await
        .unwrap();

        let executor = RecordingExecutor::succeeding("");
        let script = script_file();
        deploy_node(&pool, &executor, node.id, "198.51.100.1", script.path())
            .await
            .unwrap();

        let calls = executor.calls.lock().unwrap();
        let Call::Execute { command } = &calls[1] else {
            panic!("expected an execute call");
        };
        assert!(command.contains("PAYOUT_ADDRESS='0xwallet'"));
    }

    #[tokio::test]
    async fn upload_failure_becomes_a_recorded_result() {
        let pool = test_pool().await;
        let node_id = registered_node(&pool, None).await;
        let executor = RecordingExecutor {
            calls: Mutex::new(Vec::new()),
            exec_result: CommandOutput::failure("unused"),
            fail_upload: true,
        };
        let script = script_file();

        let outcome = deploy_node(&pool, &executor, node_id, "198.51.100.1", script.path())
            .await
            .unwrap();
        let DeployOutcome::Completed(result) = outcome else {
            panic!("expected a completed deploy");
        };
        assert!(!result.ok);
        assert!(result.stderr.contains("sftp refused"));
        // No execute call after a failed upload.
        assert_eq!(executor.calls.lock().unwrap().len(), 1);

        let node = node_service::get_node_by_id(&pool, node_id).await.unwrap().unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(node.last_metrics.as_deref().unwrap()).unwrap();
        assert_eq!(doc["ok"], false);
    }

    #[tokio::test]
    async fn missing_script_becomes_a_recorded_result() {
        let pool = test_pool().await;
        let node_id = registered_node(&pool, None).await;
        let executor = RecordingExecutor::succeeding("");

        let outcome = deploy_node(
            &pool,
            &executor,
            node_id,
            "198.51.100.1",
            Path::new("/nonexistent/remote_install.sh"),
        )
        .await
        .unwrap();
        let DeployOutcome::Completed(result) = outcome else {
            panic!("expected a completed deploy");
        };
        assert!(!result.ok);
        assert!(result.stderr.contains("/nonexistent/remote_install.sh"));
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn tail_keeps_last_chars() {
        assert_eq!(tail("short", 10), "short");
        let long = "a".repeat(4100) + "END";
        let kept = tail(&long, 4000);
        assert_eq!(kept.chars().count(), 4000);
        assert!(kept.ends_with("END"));
    }
}
