use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Session;
use tracing::debug;

use super::{CommandOutput, Credential, ExecError, SshTarget};

/// Remote command execution and file upload against a single node.
///
/// Implementations open one transport per call and close it when the call
/// returns; there is no pooling or reuse across a batch.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Runs `command` on the target. Every failure is downgraded to a
    /// synthetic `(255, "", message)` triple so callers always receive a
    /// well-formed result and batch collection never aborts on one probe.
    async fn execute(
        &self,
        target: &SshTarget,
        credential: &Credential,
        command: &str,
        timeout: Duration,
    ) -> CommandOutput;

    /// Uploads `data` to `remote_path` with the given permission bits.
    async fn upload(
        &self,
        target: &SshTarget,
        credential: &Credential,
        data: Vec<u8>,
        remote_path: &str,
        mode: u32,
        timeout: Duration,
    ) -> Result<(), ExecError>;
}

/// libssh2-backed executor. All calls are blocking underneath and are run on
/// the tokio blocking pool.
pub struct SshExecutor;

impl SshExecutor {
    fn open_session(
        target: &SshTarget,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Session, ExecError> {
        let mut addrs = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| ExecError::Connection(format!("resolve {}: {e}", target.host)))?;
        let addr = addrs
            .next()
            .ok_or_else(|| ExecError::Connection(format!("resolve {}: no address", target.host)))?;

        let tcp = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| ExecError::Connection(format!("connect {addr}: {e}")))?;

        let mut session =
            Session::new().map_err(|e| ExecError::Connection(format!("session init: {e}")))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis() as u32);
        session
            .handshake()
            .map_err(|e| ExecError::Connection(format!("handshake: {e}")))?;

        match credential {
            Credential::Password(password) => session
                .userauth_password(&target.user, password)
                .map_err(|e| ExecError::Connection(format!("password auth: {e}")))?,
            Credential::KeyFile(path) => session
                .userauth_pubkey_file(&target.user, None, path, None)
                .map_err(|e| ExecError::Connection(format!("key auth: {e}")))?,
        }

        Ok(session)
    }

    fn exec_blocking(
        target: &SshTarget,
        credential: &Credential,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let session = Self::open_session(target, credential, timeout)?;
        let mut channel = session
            .channel_session()
            .map_err(|e| ExecError::Connection(format!("open channel: {e}")))?;
        channel
            .exec(command)
            .map_err(|e| ExecError::Connection(format!("exec: {e}")))?;

        let mut out = String::new();
        channel
            .read_to_string(&mut out)
            .map_err(|e| ExecError::Connection(format!("read stdout: {e}")))?;
        let mut err = String::new();
        channel
            .stderr()
            .read_to_string(&mut err)
            .map_err(|e| ExecError::Connection(format!("read stderr: {e}")))?;

        // Best effort: the exit status is still readable if close fails.
        let _ = channel.wait_close();
        let rc = channel.exit_status().map_err(|_| ExecError::NoExitStatus)?;

        Ok(CommandOutput { rc, out, err })
    }

    fn upload_blocking(
        target: &SshTarget,
        credential: &Credential,
        data: &[u8],
        remote_path: &str,
        mode: u32,
        timeout: Duration,
    ) -> Result<(), ExecError> {
        let session = Self::open_session(target, credential, timeout)?;
        let sftp = session
            .sftp()
            .map_err(|e| ExecError::Connection(format!("sftp: {e}")))?;

        let path = Path::new(remote_path);
        let mut file = sftp
            .create(path)
            .map_err(|e| ExecError::Connection(format!("create {remote_path}: {e}")))?;
        file.write_all(data)
            .map_err(|e| ExecError::Connection(format!("write {remote_path}: {e}")))?;
        drop(file);

        sftp.setstat(
            path,
            ssh2::FileStat {
                size: None,
                uid: None,
                gid: None,
                perm: Some(mode),
                atime: None,
                mtime: None,
            },
        )
        .map_err(|e| ExecError::Connection(format!("chmod {remote_path}: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        target: &SshTarget,
        credential: &Credential,
        command: &str,
        timeout: Duration,
    ) -> CommandOutput {
        let target = target.clone();
        let credential = credential.clone();
        let command = command.to_owned();
        let joined = tokio::task::spawn_blocking(move || {
            Self::exec_blocking(&target, &credential, &command, timeout)
        })
        .await;

        match joined {
            Ok(Ok(output)) => output,
            Ok(Err(ExecError::NoExitStatus)) => {
                debug!("remote channel closed without exit status");
                CommandOutput::failure(ExecError::NoExitStatus.to_string())
            }
            Ok(Err(e)) => CommandOutput::failure(e.to_string()),
            Err(e) => CommandOutput::failure(format!("executor task failed: {e}")),
        }
    }

    async fn upload(
        &self,
        target: &SshTarget,
        credential: &Credential,
        data: Vec<u8>,
        remote_path: &str,
        mode: u32,
        timeout: Duration,
    ) -> Result<(), ExecError> {
        let target = target.clone();
        let credential = credential.clone();
        let remote_path = remote_path.to_owned();
        tokio::task::spawn_blocking(move || {
            Self::upload_blocking(&target, &credential, &data, &remote_path, mode, timeout)
        })
        .await
        .map_err(|e| ExecError::Connection(format!("executor task failed: {e}")))?
    }
}
