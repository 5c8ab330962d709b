use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod collector;
pub mod deployer;
pub mod executor;

pub use executor::{RemoteExecutor, SshExecutor};

/// How to authenticate against a node. Exactly one variant is active for a
/// given node, selected by its `use_password` column.
#[derive(Debug, Clone)]
pub enum Credential {
    Password(String),
    KeyFile(PathBuf),
}

/// SSH connection coordinates for one node.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
}

/// Result of one remote command. Transport failures are folded into this
/// shape by the executor so a failed probe is data, not a propagated error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub rc: i32,
    pub out: String,
    pub err: String,
}

impl CommandOutput {
    pub fn failure(message: impl Into<String>) -> Self {
        CommandOutput {
            rc: 255,
            out: String::new(),
            err: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    /// Transport could not be established: DNS, TCP, handshake, auth or
    /// timeout. The executor never distinguishes further.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The remote channel closed without reporting an exit code.
    #[error("remote channel closed without exit status")]
    NoExitStatus,
}
