//! Transports that run a rendered script with elevated privilege.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use super::buffer::OutputBuffer;
use super::command::{RemoteCommand, shquote};
use crate::error::UpgradeError;

/// Exit of a command that actually ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteExit {
    /// Exit status; `-1` when the process was killed by a signal.
    pub status: i32,
    pub stderr: String,
}

impl RemoteExit {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs a command on its target host.
///
/// Stdout must be appended to `output` as it arrives so streamers see
/// partial output before completion. Dropping the returned future must stop
/// the local wait (and, where possible, the remote process).
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn run(
        &self,
        command: &RemoteCommand,
        output: OutputBuffer,
    ) -> Result<RemoteExit, UpgradeError>;

    fn name(&self) -> &str;
}

/// Runs scripts over ssh: `ssh <user>@<address> sudo -n bash -c '<script>'`.
pub struct SshTransport {
    user: String,
    options: Vec<String>,
    connect_timeout: Duration,
}

impl SshTransport {
    pub fn new(user: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            user: user.into(),
            options,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Arguments passed to the `ssh` binary.
    pub fn ssh_args(&self, command: &RemoteCommand) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ];
        for option in &self.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args.push(format!("{}@{}", self.user, command.address));
        args.push(elevated(&command.script));
        args
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn run(
        &self,
        command: &RemoteCommand,
        output: OutputBuffer,
    ) -> Result<RemoteExit, UpgradeError> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.ssh_args(command));
        debug!("Running via ssh on {} ({})", command.member, command.address);
        run_child(cmd, output).await
    }

    fn name(&self) -> &str {
        "ssh"
    }
}

/// Runs scripts on this host, for clusters whose members are local.
pub struct LocalTransport;

#[async_trait]
impl RemoteTransport for LocalTransport {
    async fn run(
        &self,
        command: &RemoteCommand,
        output: OutputBuffer,
    ) -> Result<RemoteExit, UpgradeError> {
        let mut cmd = Command::new("sudo");
        cmd.args(["-n", "bash", "-c", &command.script]);
        debug!("Running locally for {}", command.member);
        run_child(cmd, output).await
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Remote shell command line that runs `script` as root without prompting.
fn elevated(script: &str) -> String {
    format!("sudo -n bash -c {}", shquote(script))
}

async fn run_child(mut cmd: Command, output: OutputBuffer) -> Result<RemoteExit, UpgradeError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| UpgradeError::Transport(format!("failed to spawn process: {}", e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| UpgradeError::Transport("stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| UpgradeError::Transport("stderr not captured".to_string()))?;

    let (_, stderr, status) = tokio::try_join!(
        pump(stdout, &output),
        read_to_string(stderr),
        child.wait()
    )
    .map_err(|e| UpgradeError::Transport(format!("i/o error while waiting: {}", e)))?;

    Ok(RemoteExit {
        status: status.code().unwrap_or(-1),
        stderr,
    })
}

/// Copy a stream into the output buffer chunk by chunk.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, output: &OutputBuffer) -> std::io::Result<()> {
    let mut chunk = [0u8; 4096];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        output.append(&chunk[..n]);
    }
}

async fn read_to_string<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<String> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::MemberId;

    fn command(script: &str) -> RemoteCommand {
        RemoteCommand {
            member: MemberId::parse("0").unwrap(),
            address: "10.0.0.1".to_string(),
            script: script.to_string(),
        }
    }

    #[test]
    fn test_ssh_args() {
        let transport = SshTransport::new("ubuntu", vec!["StrictHostKeyChecking=no".into()]);
        let args = transport.ssh_args(&command("echo 'hi'"));
        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=10",
                "-o",
                "StrictHostKeyChecking=no",
                "ubuntu@10.0.0.1",
                r#"sudo -n bash -c 'echo '"'"'hi'"'"''"#,
            ]
        );
    }

    #[test]
    fn test_connect_timeout_minimum() {
        let transport = SshTransport::new("ubuntu", vec![]).with_connect_timeout(Duration::ZERO);
        assert!(transport.ssh_args(&command("true")).contains(&"ConnectTimeout=1".to_string()));
    }

    #[test]
    fn test_remote_exit_success() {
        assert!(RemoteExit { status: 0, stderr: String::new() }.success());
        assert!(!RemoteExit { status: 1, stderr: String::new() }.success());
    }

    #[tokio::test]
    async fn test_run_child_streams_stdout_and_captures_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo one; echo two; echo oops >&2; exit 3"]);
        let output = OutputBuffer::new();

        let exit = run_child(cmd, output.clone()).await.unwrap();

        assert_eq!(exit.status, 3);
        assert_eq!(exit.stderr.trim(), "oops");
        assert_eq!(output.transcript(), "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_run_child_spawn_failure() {
        let cmd = Command::new("ssup-no-such-binary");
        let err = run_child(cmd, OutputBuffer::new()).await.unwrap_err();
        assert!(matches!(err, UpgradeError::Transport(_)));
    }
}
