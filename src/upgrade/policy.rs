//! Session configuration: deadlines, concurrency and rehydration policy.

use std::fmt;
use std::time::Duration;

use clap::ValueEnum;
use serde::Serialize;

use super::types::Phase;
use crate::error::UpgradeError;
use crate::remote::streamer::DEFAULT_DRAIN_INTERVAL;

/// How a secondary is rebuilt from the upgraded primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RehydrateMode {
    /// Wipe local data and initial-sync from the primary.
    #[default]
    Reseed,
    /// Keep local data and resume the replication stream.
    Resume,
}

impl fmt::Display for RehydrateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reseed => write!(f, "reseed"),
            Self::Resume => write!(f, "resume"),
        }
    }
}

/// Per-phase deadline applied to every remote execution in that phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseDeadlines {
    pub notify: Duration,
    pub quiesce: Duration,
    pub upgrade: Duration,
    pub rehydrate: Duration,
    pub verify: Duration,
}

impl Default for PhaseDeadlines {
    fn default() -> Self {
        Self {
            notify: Duration::from_secs(30),
            quiesce: Duration::from_secs(5 * 60),
            upgrade: Duration::from_secs(60 * 60),
            rehydrate: Duration::from_secs(30 * 60),
            verify: Duration::from_secs(2 * 60),
        }
    }
}

impl PhaseDeadlines {
    pub fn for_phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Discovering | Phase::Notifying => self.notify,
            Phase::QuiescingSecondaries => self.quiesce,
            Phase::UpgradingPrimary => self.upgrade,
            Phase::RehydratingSecondaries => self.rehydrate,
            Phase::Verifying => self.verify,
        }
    }
}

/// Configuration for one upgrade session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub deadlines: PhaseDeadlines,
    /// Maximum members worked on at once in fan-out phases.
    pub max_concurrency: usize,
    pub drain_interval: Duration,
    pub rehydrate_mode: RehydrateMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            deadlines: PhaseDeadlines::default(),
            max_concurrency: 2,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            rehydrate_mode: RehydrateMode::Reseed,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), UpgradeError> {
        if self.max_concurrency == 0 {
            return Err(UpgradeError::InvalidConfig(
                "max concurrency must be at least 1".to_string(),
            ));
        }
        if self.drain_interval.is_zero() || self.drain_interval >= Duration::from_secs(1) {
            return Err(UpgradeError::InvalidConfig(format!(
                "drain interval must be between 0 and 1s, got {:?}",
                self.drain_interval
            )));
        }

        for phase in Phase::EXECUTION_ORDER {
            let deadline = self.deadlines.for_phase(phase);
            if deadline.is_zero() {
                return Err(UpgradeError::InvalidConfig(format!(
                    "{} deadline must be greater than zero",
                    phase
                )));
            }
            if deadline > self.deadlines.upgrade {
                return Err(UpgradeError::InvalidConfig(format!(
                    "{} deadline ({:?}) exceeds the primary upgrade deadline ({:?})",
                    phase, deadline, self.deadlines.upgrade
                )));
            }
        }

        Ok(())
    }
}
