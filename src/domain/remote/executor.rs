use async_trait::async_trait;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::domain::remote::command::RemoteCommand;
use crate::domain::remote::connection::ConnectionDescriptor;
use crate::error::{Error, Result};

/// ssh reserves this exit status for its own failures (unreachable host, auth refused).
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Output of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs one command on one node.
///
/// Implementations never retry. A command that cannot be delivered is a
/// `ConnectionError`; one that ran and failed is a `RemoteExecutionError`.
#[async_trait]
pub trait RemoteCommandExecutor: std::fmt::Debug + Send + Sync {
    async fn execute(&self, connection: &ConnectionDescriptor, command: &RemoteCommand) -> Result<CommandOutput>;
}

/// Executes commands through the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    program: String,
    connect_timeout: Duration,
}

impl SshExecutor {
    pub fn new(connect_timeout: Duration) -> Self {
        SshExecutor { program: "ssh".to_string(), connect_timeout }
    }

    /// Uses a different ssh binary, e.g. a wrapper script.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn connection_error(connection: &ConnectionDescriptor, reason: impl Into<String>) -> Error {
        Error::ConnectionError { host: connection.host.clone(), port: connection.port, reason: reason.into() }
    }
}

#[async_trait]
impl RemoteCommandExecutor for SshExecutor {
    async fn execute(&self, connection: &ConnectionDescriptor, command: &RemoteCommand) -> Result<CommandOutput> {
        // tempfile creates the key file 0600, which ssh insists on.
        let mut key_file = tempfile::NamedTempFile::new()?;
        key_file.write_all(connection.private_key.expose().as_bytes())?;
        if !connection.private_key.expose().ends_with('\n') {
            key_file.write_all(b"\n")?;
        }
        key_file.flush()?;

        log::debug!("Running {} on {}:{}", command.kind, connection.host, connection.port);

        // The script travels on stdin so tokens never show up in a process listing.
        let mut child = Command::new(&self.program)
            .arg("-i")
            .arg(key_file.path())
            .arg("-p")
            .arg(connection.port.to_string())
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "UserKnownHostsFile=/dev/null"])
            .args(["-o", "LogLevel=ERROR"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
            .arg(connection.destination())
            .args(["--", "bash", "-s"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Self::connection_error(connection, format!("failed to spawn '{}': {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let script = format!("{}\n", command.script());
            // A client that exits before reading its input closes the pipe; its exit status says why.
            if let Err(e) = stdin.write_all(script.as_bytes()).await {
                log::debug!("Could not hand {} to {}: {}", command.kind, connection.host, e);
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Self::connection_error(connection, format!("failed to wait for '{}': {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        match output.status.code() {
            Some(0) => Ok(CommandOutput { stdout, stderr }),
            Some(SSH_CONNECTION_FAILURE) => Err(Self::connection_error(connection, stderr)),
            exit_code => Err(Error::RemoteExecutionError { command: command.kind.to_string(), exit_code, stderr }),
        }
    }
}
