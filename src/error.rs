//! Custom error types for ssup.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::topology::MemberId;
use crate::upgrade::Phase;

/// Errors that can occur while coordinating an engine upgrade.
///
/// Member outcomes carry these values in session reports, so the type is
/// `Clone` and every payload is plain text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpgradeError {
    #[error("Cannot establish topology: {0}")]
    Discovery(String),

    #[error("Malformed command template: {0}")]
    Template(String),

    #[error("Remote command exited with status {status}: {}", summarize(.stderr))]
    RemoteCommand { status: i32, stderr: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Primary upgrade failed, manual recovery required: {0}")]
    PrimaryUpgrade(Box<UpgradeError>),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Session cancelled")]
    Cancelled,
}

impl UpgradeError {
    /// Short class name used in reports and tables.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "DiscoveryError",
            Self::Template(_) => "TemplateError",
            Self::RemoteCommand { .. } => "RemoteCommandError",
            Self::Timeout(_) => "TimeoutError",
            Self::Transport(_) => "TransportError",
            Self::PrimaryUpgrade(_) => "PrimaryUpgradeError",
            Self::Verification(_) => "VerificationError",
            Self::InvalidVersion(_) => "InvalidVersion",
            Self::InvalidConfig(_) => "InvalidConfig",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Returns true for failures of a single remote execution: non-zero exit,
    /// deadline expiry, or a transport that never ran the command.
    pub const fn is_remote_command_class(&self) -> bool {
        matches!(
            self,
            Self::RemoteCommand { .. } | Self::Timeout(_) | Self::Transport(_)
        )
    }

    /// Returns the innermost error, looking through `PrimaryUpgrade`.
    pub fn root_cause(&self) -> &UpgradeError {
        match self {
            Self::PrimaryUpgrade(inner) => inner.root_cause(),
            other => other,
        }
    }
}

/// Keep the last non-empty stderr line so single-line logs stay readable.
fn summarize(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("(no stderr)")
}

/// Session-level failure annotated with the phase and member it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub phase: Phase,
    pub member: Option<MemberId>,
    pub error: UpgradeError,
}

impl SessionFailure {
    pub fn new(phase: Phase, member: Option<MemberId>, error: UpgradeError) -> Self {
        Self {
            phase,
            member,
            error,
        }
    }

    pub fn cancelled(phase: Phase) -> Self {
        Self::new(phase, None, UpgradeError::Cancelled)
    }
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.member {
            Some(member) => write!(f, "[{}] {}: {}", self.phase, member, self.error),
            None => write!(f, "[{}] {}", self.phase, self.error),
        }
    }
}

impl std::error::Error for SessionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_discovery() {
        let err = UpgradeError::Discovery("no primary".to_string());
        assert_eq!(err.to_string(), "Cannot establish topology: no primary");
    }

    #[test]
    fn test_error_display_remote_command_uses_last_stderr_line() {
        let err = UpgradeError::RemoteCommand {
            status: 3,
            stderr: "starting\nmongod refused to stop\n\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Remote command exited with status 3: mongod refused to stop"
        );
    }

    #[test]
    fn test_error_display_remote_command_empty_stderr() {
        let err = UpgradeError::RemoteCommand {
            status: 1,
            stderr: String::new(),
        };
        assert!(err.to_string().ends_with("(no stderr)"));
    }

    #[test]
    fn test_error_display_timeout() {
        let err = UpgradeError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Timed out after 30s");
    }

    #[test]
    fn test_primary_upgrade_root_cause() {
        let err = UpgradeError::PrimaryUpgrade(Box::new(UpgradeError::Timeout(
            Duration::from_secs(5),
        )));
        assert_eq!(err.kind(), "PrimaryUpgradeError");
        assert_eq!(err.root_cause().kind(), "TimeoutError");
        assert!(err.to_string().contains("manual recovery required"));
    }

    #[test]
    fn test_remote_command_class() {
        assert!(UpgradeError::Timeout(Duration::from_secs(1)).is_remote_command_class());
        assert!(UpgradeError::Transport("ssh missing".into()).is_remote_command_class());
        assert!(
            UpgradeError::RemoteCommand {
                status: 1,
                stderr: String::new()
            }
            .is_remote_command_class()
        );
        assert!(!UpgradeError::Cancelled.is_remote_command_class());
        assert!(!UpgradeError::Discovery("x".into()).is_remote_command_class());
    }

    #[test]
    fn test_session_failure_display_with_member() {
        let failure = SessionFailure::new(
            Phase::QuiescingSecondaries,
            Some(MemberId::parse("1").unwrap()),
            UpgradeError::Timeout(Duration::from_secs(300)),
        );
        assert_eq!(
            failure.to_string(),
            "[QuiescingSecondaries] machine-1: Timed out after 300s"
        );
    }

    #[test]
    fn test_session_failure_display_without_member() {
        let failure = SessionFailure::cancelled(Phase::RehydratingSecondaries);
        assert_eq!(
            failure.to_string(),
            "[RehydratingSecondaries] Session cancelled"
        );
    }
}
