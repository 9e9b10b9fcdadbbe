//! JSON session reports.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::config::VERSION;
use crate::remote::command::TEMPLATE_VERSION;
use crate::topology::{EngineVersion, MemberId, Role, Topology};
use crate::upgrade::{MemberOutcome, Phase, PhaseResult, UpgradeSession};

/// Serializable record of one upgrade session.
#[derive(Debug, Clone, Serialize)]
pub struct ReportDocument {
    pub ssup_version: String,
    pub template_version: u32,
    pub target_version: EngineVersion,
    pub status: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topology: Option<Topology>,
    pub phases: Vec<PhaseReport>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Where and why the session failed.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<MemberId>,
    pub kind: String,
    /// Class of the innermost error, e.g. `TimeoutError` under a primary failure.
    pub root_cause: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub duration_secs: f64,
    pub outcomes: Vec<OutcomeReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeReport {
    pub member: MemberId,
    pub address: String,
    pub role: Role,
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub output: String,
    pub stderr: String,
}

impl From<&MemberOutcome> for OutcomeReport {
    fn from(outcome: &MemberOutcome) -> Self {
        Self {
            member: outcome.member.clone(),
            address: outcome.address.clone(),
            role: outcome.role,
            result: outcome.status_label().to_string(),
            exit_status: outcome.exit_status,
            duration_secs: outcome.duration.as_secs_f64(),
            error: outcome.error.as_ref().map(ToString::to_string),
            output: outcome.output.clone(),
            stderr: outcome.stderr.clone(),
        }
    }
}

impl From<&PhaseResult> for PhaseReport {
    fn from(result: &PhaseResult) -> Self {
        Self {
            phase: result.phase,
            duration_secs: result.duration.as_secs_f64(),
            outcomes: result.outcomes.iter().map(OutcomeReport::from).collect(),
        }
    }
}

impl ReportDocument {
    pub fn from_session(session: &UpgradeSession) -> Self {
        let failure = session.failure().map(|f| FailureReport {
            phase: f.phase,
            member: f.member.clone(),
            kind: f.error.kind().to_string(),
            root_cause: f.error.root_cause().kind().to_string(),
            message: f.error.to_string(),
        });

        Self {
            ssup_version: VERSION.to_string(),
            template_version: TEMPLATE_VERSION,
            target_version: session.target_version.clone(),
            status: session.status.to_string(),
            succeeded: session.is_success(),
            failure,
            topology: session.topology.clone(),
            phases: session.phases.iter().map(PhaseReport::from).collect(),
            warnings: session.warnings.clone(),
            started_at: session.started_at,
            finished_at: session.finished_at,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize session report")
    }
}

/// Save the report as JSON.
///
/// If `path` is an existing directory, or ends with a separator, the file
/// is created inside it as `ssup-report-{YYYYMMDD-HHMMSS}.json`.
pub fn save_report(report: &ReportDocument, path: &Path) -> Result<PathBuf> {
    let target = if path.is_dir() || path.as_os_str().to_string_lossy().ends_with('/') {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create report directory {}", path.display()))?;
        let timestamp = Local::now().format("%Y%m%d-%H%M%S");
        path.join(format!("ssup-report-{}.json", timestamp))
    } else {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create report directory {}", parent.display())
            })?;
        }
        path.to_path_buf()
    };

    std::fs::write(&target, report.to_json()?)
        .with_context(|| format!("Failed to write report to {}", target.display()))?;

    let target = target.canonicalize().unwrap_or(target);
    Ok(target)
}
