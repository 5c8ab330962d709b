use async_trait::async_trait;
use tracing::{info, warn};

use crate::db::models::AclRule;

/// Ports the reconciler always rewrites, beyond SSH and the panel itself.
const WATCHED_EXTRA_PORTS: [u16; 2] = [80, 443];

/// One entry of the desired allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowRule {
    pub port: u16,
    pub proto: String,
    pub cidr: String,
}

/// Thin seam over the host `ufw` binary so reconciliation is testable
/// against a fake rule table.
#[async_trait]
pub trait FirewallCli: Send + Sync {
    /// Runs `ufw` with the given arguments and returns its stdout.
    async fn run(&self, args: &[&str]) -> std::io::Result<String>;
}

pub struct UfwCli;

#[async_trait]
impl FirewallCli for UfwCli {
    async fn run(&self, args: &[&str]) -> std::io::Result<String> {
        let output = tokio::process::Command::new("ufw")
            .args(args)
            .output()
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Desired allow set: the enabled ACL rows plus the two implicit rules that
/// keep SSH and the panel reachable for the requesting admin.
pub fn desired_rules(acl_rows: &[AclRule], requester_cidr: &str, panel_port: u16) -> Vec<AllowRule> {
    let mut rules: Vec<AllowRule> = acl_rows
        .iter()
        .map(|row| AllowRule {
            port: row.port as u16,
            proto: row.proto.clone(),
            cidr: row.cidr.clone(),
        })
        .collect();
    rules.push(AllowRule {
        port: 22,
        proto: "tcp".to_string(),
        cidr: requester_cidr.to_string(),
    });
    rules.push(AllowRule {
        port: panel_port,
        proto: "tcp".to_string(),
        cidr: requester_cidr.to_string(),
    });
    rules
}

/// Extracts the rule index from a `ufw status numbered` line (`[ 3] …`).
fn rule_index(line: &str) -> Option<u32> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix('[')?;
    let end = rest.find(']')?;
    rest[..end].trim().parse().ok()
}

/// Whether a listing line is an allow rule for `<port>/tcp`. Token-exact so
/// an `8080/tcp` entry never matches the port-80 pass.
fn line_allows_tcp_port(line: &str, port: u16) -> bool {
    let wanted = format!("{port}/tcp");
    line.contains("ALLOW") && line.split_whitespace().any(|token| token == wanted)
}

async fn run_swallowed(cli: &dyn FirewallCli, args: &[&str]) {
    if let Err(e) = cli.run(args).await {
        warn!(command = ?args, error = %e, "firewall command failed");
    }
}

/// Converges the local firewall to the desired allow-list.
///
/// For each watched port the existing allow rules are deleted by numbered
/// index (scanning in reverse so deletions do not shift entries still to be
/// visited) and the desired entries re-inserted. Rule numbering shifts after
/// any deletion, so this full rebuild per port is what makes `apply`
/// idempotent. Individual command failures are logged and swallowed.
pub async fn apply(
    cli: &dyn FirewallCli,
    acl_rows: &[AclRule],
    requester_cidr: &str,
    panel_port: u16,
) {
    let desired = desired_rules(acl_rows, requester_cidr, panel_port);

    // One-time bootstrap: sane defaults, then enable. Also taken when the
    // status probe itself fails.
    match cli.run(&["status"]).await {
        Ok(status) if !status.contains("Status: inactive") => {}
        _ => {
            info!("firewall inactive, initializing");
            run_swallowed(cli, &["default", "deny", "incoming"]).await;
            run_swallowed(cli, &["default", "allow", "outgoing"]).await;
            run_swallowed(cli, &["--force", "enable"]).await;
        }
    }

    let mut watched: Vec<u16> = vec![22, panel_port];
    watched.extend(WATCHED_EXTRA_PORTS);

    for port in watched {
        let listing = match cli.run(&["status", "numbered"]).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(port, error = %e, "could not list firewall rules");
                String::new()
            }
        };
        for line in listing.lines().rev() {
            if line_allows_tcp_port(line, port) {
                if let Some(index) = rule_index(line) {
                    let index = index.to_string();
                    run_swallowed(cli, &["--force", "delete", &index]).await;
                }
            }
        }
        for rule in desired.iter().filter(|rule| rule.port == port) {
            let port_arg = port.to_string();
            run_swallowed(
                cli,
                &[
                    "allow", "from", &rule.cidr, "to", "any", "port", &port_arg, "proto",
                    &rule.proto,
                ],
            )
            .await;
        }
    }
}
