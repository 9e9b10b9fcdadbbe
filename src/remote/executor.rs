//! Remote execution with deadline, cancellation and streamed output.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::buffer::OutputBuffer;
use super::command::RemoteCommand;
use super::streamer::{DEFAULT_DRAIN_INTERVAL, OutputSink, OutputStreamer};
use super::transport::RemoteTransport;
use crate::error::UpgradeError;
use crate::topology::MemberId;

/// Outcome of one remote execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub member: MemberId,
    pub address: String,
    /// Exit status, if the command ran to completion.
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub error: Option<UpgradeError>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs rendered commands through a transport.
pub struct RemoteExecutor {
    transport: Arc<dyn RemoteTransport>,
    drain_interval: Duration,
    cancel: CancellationToken,
}

impl RemoteExecutor {
    pub fn new(transport: Arc<dyn RemoteTransport>) -> Self {
        Self {
            transport,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    /// Cancelling `token` aborts every in-flight and future execution.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run `command`, streaming its stdout to `sink`, until it exits,
    /// `deadline` elapses, or the executor is cancelled.
    ///
    /// The streamer is always stopped and drained before this returns.
    pub async fn execute(
        &self,
        command: RemoteCommand,
        sink: Arc<dyn OutputSink>,
        deadline: Duration,
    ) -> ExecutionResult {
        let started = Instant::now();
        let mut result = ExecutionResult {
            member: command.member.clone(),
            address: command.address.clone(),
            exit_status: None,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
            error: None,
        };

        if self.cancel.is_cancelled() {
            result.error = Some(UpgradeError::Cancelled);
            return result;
        }

        info!(
            "Executing on {} ({}) via {}: {}",
            command.member,
            command.address,
            self.transport.name(),
            command.script
        );

        let buffer = OutputBuffer::new();
        let streamer = OutputStreamer::spawn(
            buffer.clone(),
            sink,
            command.member.to_string(),
            self.drain_interval,
        );

        let outcome = tokio::select! {
            run = tokio::time::timeout(deadline, self.transport.run(&command, buffer.clone())) => {
                match run {
                    Ok(Ok(exit)) => Ok(exit),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(UpgradeError::Timeout(deadline)),
                }
            }
            () = self.cancel.cancelled() => Err(UpgradeError::Cancelled),
        };

        let forwarded = streamer.stop().await;
        debug!("Streamed {} lines from {}", forwarded, command.member);

        result.stdout = buffer.transcript();
        result.duration = started.elapsed();

        match outcome {
            Ok(exit) => {
                result.exit_status = Some(exit.status);
                if !exit.success() {
                    result.error = Some(UpgradeError::RemoteCommand {
                        status: exit.status,
                        stderr: exit.stderr.clone(),
                    });
                }
                result.stderr = exit.stderr;
            }
            Err(e) => result.error = Some(e),
        }

        match &result.error {
            None => debug!(
                "{} finished in {:.1}s",
                command.member,
                result.duration.as_secs_f64()
            ),
            Some(e) => warn!("{} ({}) failed: {}", command.member, command.address, e),
        }

        result
    }
}
