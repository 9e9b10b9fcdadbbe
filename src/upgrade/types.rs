//! Session, phase and per-member outcome types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{SessionFailure, UpgradeError};
use crate::remote::{ExecutionResult, RemoteCommand};
use crate::topology::{EngineVersion, Member, MemberId, Role, Topology};

/// Phase of the upgrade state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    Discovering,
    Notifying,
    QuiescingSecondaries,
    UpgradingPrimary,
    RehydratingSecondaries,
    Verifying,
}

impl Phase {
    /// Phases that execute remote commands, in session order.
    pub const EXECUTION_ORDER: [Phase; 5] = [
        Phase::Notifying,
        Phase::QuiescingSecondaries,
        Phase::UpgradingPrimary,
        Phase::RehydratingSecondaries,
        Phase::Verifying,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Self::Discovering => "Discover topology",
            Self::Notifying => "Notify members",
            Self::QuiescingSecondaries => "Quiesce secondaries",
            Self::UpgradingPrimary => "Upgrade primary",
            Self::RehydratingSecondaries => "Rehydrate secondaries",
            Self::Verifying => "Verify cluster",
        }
    }

    /// 1-based position among all phases, for "Phase [n/total]" headers.
    pub fn number(&self) -> usize {
        match self {
            Self::Discovering => 1,
            Self::Notifying => 2,
            Self::QuiescingSecondaries => 3,
            Self::UpgradingPrimary => 4,
            Self::RehydratingSecondaries => 5,
            Self::Verifying => 6,
        }
    }

    pub const TOTAL: usize = 6;
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovering => write!(f, "Discovering"),
            Self::Notifying => write!(f, "Notifying"),
            Self::QuiescingSecondaries => write!(f, "QuiescingSecondaries"),
            Self::UpgradingPrimary => write!(f, "UpgradingPrimary"),
            Self::RehydratingSecondaries => write!(f, "RehydratingSecondaries"),
            Self::Verifying => write!(f, "Verifying"),
        }
    }
}

/// Overall status of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    InProgress,
    Succeeded,
    /// Primary upgraded and quorate, but some secondaries never rejoined.
    SucceededWithWarnings,
    Failed(SessionFailure),
}

impl SessionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::SucceededWithWarnings)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::InProgress)
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::SucceededWithWarnings => write!(f, "SucceededWithWarnings"),
            Self::Failed(failure) => write!(f, "Failed({})", failure.error.kind()),
        }
    }
}

/// Result of one phase for one member.
#[derive(Debug, Clone)]
pub struct MemberOutcome {
    pub member: MemberId,
    pub address: String,
    pub role: Role,
    pub exit_status: Option<i32>,
    pub duration: Duration,
    /// Captured stdout of the remote command.
    pub output: String,
    pub stderr: String,
    pub error: Option<UpgradeError>,
}

impl MemberOutcome {
    pub fn from_execution(member: &Member, result: ExecutionResult) -> Self {
        Self {
            member: member.id.clone(),
            address: member.address.clone(),
            role: member.role,
            exit_status: result.exit_status,
            duration: result.duration,
            output: result.stdout,
            stderr: result.stderr,
            error: result.error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// `ok` or the error class.
    pub fn status_label(&self) -> &'static str {
        match &self.error {
            None => "ok",
            Some(e) => e.kind(),
        }
    }
}

/// Outcomes of one phase, in discovery order.
#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub phase: Phase,
    pub outcomes: Vec<MemberOutcome>,
    pub duration: Duration,
}

impl PhaseResult {
    /// First failing member in discovery order.
    pub fn first_failure(&self) -> Option<(&MemberId, &UpgradeError)> {
        self.outcomes
            .iter()
            .find_map(|o| o.error.as_ref().map(|e| (&o.member, e)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &MemberOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &MemberOutcome> {
        self.outcomes.iter().filter(|o| o.is_ok())
    }

    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(MemberOutcome::is_ok)
    }

    pub fn outcome_for(&self, member: &MemberId) -> Option<&MemberOutcome> {
        self.outcomes.iter().find(|o| &o.member == member)
    }
}

/// One end-to-end run against one discovered topology.
#[derive(Debug, Clone)]
pub struct UpgradeSession {
    pub target_version: EngineVersion,
    pub topology: Option<Topology>,
    pub phases: Vec<PhaseResult>,
    pub status: SessionStatus,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UpgradeSession {
    pub fn new(target_version: EngineVersion) -> Self {
        Self {
            target_version,
            topology: None,
            phases: Vec::new(),
            status: SessionStatus::Pending,
            warnings: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    /// Phases that ran, in order.
    pub fn visited_phases(&self) -> Vec<Phase> {
        self.phases.iter().map(|p| p.phase).collect()
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        self.status.failure()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub(crate) fn finish(&mut self, status: SessionStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

/// A command that would run during a session, for dry runs and review.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub phase: Phase,
    pub command: RemoteCommand,
}

/// Topology plus every rendered command, in execution order.
#[derive(Debug, Clone)]
pub struct UpgradePlan {
    pub target_version: EngineVersion,
    pub topology: Topology,
    pub steps: Vec<PlannedStep>,
}

impl UpgradePlan {
    pub fn steps_for(&self, phase: Phase) -> impl Iterator<Item = &PlannedStep> {
        self.steps.iter().filter(move |s| s.phase == phase)
    }
}
