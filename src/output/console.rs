//! Console rendering: live progress, plans and session summaries.

use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::remote::OutputSink;
use crate::topology::{Member, Topology};
use crate::upgrade::{
    MemberOutcome, Phase, PhaseResult, SessionConfig, SessionObserver, SessionStatus,
    UpgradePlan, UpgradeSession, worst_case_duration,
};

/// Create the spinner shown while a session runs.
pub fn create_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Prints remote output above the spinner, prefixed with the member.
pub struct ConsoleSink {
    bar: ProgressBar,
}

impl ConsoleSink {
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl OutputSink for ConsoleSink {
    fn forward(&self, source: &str, line: &str) -> Result<()> {
        self.bar
            .println(format!("  {} {}", format!("[{}]", source).dimmed(), line));
        Ok(())
    }
}

/// Reports phase and member progress on the console.
pub struct ConsoleObserver {
    bar: ProgressBar,
}

impl ConsoleObserver {
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl SessionObserver for ConsoleObserver {
    fn phase_started(&self, phase: Phase, members: usize) {
        let header = format!(
            "Phase [{}/{}]: {}",
            phase.number(),
            Phase::TOTAL,
            phase.title()
        );
        self.bar.println(format!("{}", header.cyan().bold()));
        match phase {
            Phase::Discovering => self.bar.set_message("Querying membership authority"),
            _ => self
                .bar
                .set_message(format!("{} ({} members)", phase.title(), members)),
        }
    }

    fn member_finished(&self, _phase: Phase, outcome: &MemberOutcome) {
        self.bar.println(format_outcome_line(outcome));
    }

    fn phase_finished(&self, result: &PhaseResult) {
        if result.outcomes.is_empty() {
            self.bar
                .println(format!("  {}", "No members in this phase".dimmed()));
        }
    }
}

fn format_outcome_line(outcome: &MemberOutcome) -> String {
    match &outcome.error {
        None => format!(
            "  {} {} ({}) {}",
            "✓".green(),
            outcome.member,
            outcome.address,
            format_duration(outcome.duration).dimmed()
        ),
        Some(e) => format!(
            "  {} {} ({}): {}",
            "✗".red(),
            outcome.member,
            outcome.address,
            e
        ),
    }
}

/// Row for the topology table.
#[derive(Tabled)]
struct MemberRow {
    #[tabled(rename = "MEMBER")]
    member: String,
    #[tabled(rename = "ADDRESS")]
    address: String,
    #[tabled(rename = "ROLE")]
    role: String,
    #[tabled(rename = "SERIES")]
    series: String,
    #[tabled(rename = "HEALTH")]
    health: String,
}

impl From<&Member> for MemberRow {
    fn from(member: &Member) -> Self {
        let health = if member.health.is_healthy() {
            member.health.to_string().green().to_string()
        } else {
            member.health.to_string().yellow().to_string()
        };
        Self {
            member: member.id.to_string(),
            address: member.address.clone(),
            role: member.role.to_string(),
            series: if member.series.is_empty() {
                "-".to_string()
            } else {
                member.series.clone()
            },
            health,
        }
    }
}

/// Row for the session summary table.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "PHASE")]
    phase: String,
    #[tabled(rename = "MEMBER")]
    member: String,
    #[tabled(rename = "ADDRESS")]
    address: String,
    #[tabled(rename = "EXIT")]
    exit: String,
    #[tabled(rename = "DURATION")]
    duration: String,
    #[tabled(rename = "RESULT")]
    result: String,
}

/// Print the discovered topology.
pub fn print_topology(topology: &Topology) {
    let rows: Vec<MemberRow> = topology.members().map(MemberRow::from).collect();
    println!(
        "{} ({} members, {} secondaries):",
        "Replica set".bold(),
        topology.len(),
        topology.secondaries().len()
    );
    let mut table = Table::new(&rows);
    apply_table_style(&mut table);
    println!("{}", table);
}

/// Print the upgrade plan: topology, every rendered command and the
/// worst-case duration.
pub fn print_plan(plan: &UpgradePlan, config: &SessionConfig) {
    println!();
    println!(
        "{}",
        format!("Upgrade Plan: engine -> {}", plan.target_version).bold()
    );
    println!("{}", "=".repeat(60));
    print_topology(&plan.topology);

    for phase in Phase::EXECUTION_ORDER {
        println!();
        let header = format!(
            "Phase [{}/{}]: {} (deadline {}, concurrency {})",
            phase.number(),
            Phase::TOTAL,
            phase.title(),
            format_duration(config.deadlines.for_phase(phase)),
            match phase {
                Phase::UpgradingPrimary => 1,
                _ => config.max_concurrency,
            }
        );
        println!("{}", header.cyan().bold());

        let mut steps = plan.steps_for(phase).peekable();
        if steps.peek().is_none() {
            println!("  {}", "No members in this phase".dimmed());
            continue;
        }
        for step in steps {
            println!(
                "  {} {} ({})",
                "→".cyan(),
                step.command.member,
                step.command.address
            );
            println!("    {}", step.command.script.dimmed());
        }
    }

    println!();
    println!(
        "Rehydration mode: {}, worst-case duration: ~{}",
        config.rehydrate_mode,
        worst_case_duration(plan, config)
            .map(format_duration)
            .unwrap_or_else(|| "unbounded".to_string())
    );
    println!();
}

/// Print the per-phase, per-member results and the final status.
pub fn print_session(session: &UpgradeSession) {
    println!();
    println!("{}", "=".repeat(60));

    let rows: Vec<OutcomeRow> = session
        .phases
        .iter()
        .flat_map(|phase| phase.outcomes.iter().map(move |o| outcome_row(phase.phase, o)))
        .collect();

    if rows.is_empty() {
        println!("No remote commands were executed.");
    } else {
        let mut table = Table::new(&rows);
        apply_table_style(&mut table);
        println!("{}", table);
    }

    if !session.warnings.is_empty() {
        println!();
        println!("{}", "Warnings:".yellow().bold());
        for warning in &session.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    println!();
    println!("{}", status_line(session));
    println!("{}", "=".repeat(60));
}

fn outcome_row(phase: Phase, outcome: &MemberOutcome) -> OutcomeRow {
    let result = match &outcome.error {
        None => "ok".green().to_string(),
        Some(_) => outcome.status_label().red().to_string(),
    };
    OutcomeRow {
        phase: phase.to_string(),
        member: outcome.member.to_string(),
        address: outcome.address.clone(),
        exit: outcome
            .exit_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string()),
        duration: format_duration(outcome.duration),
        result,
    }
}

fn status_line(session: &UpgradeSession) -> String {
    match &session.status {
        SessionStatus::Succeeded => {
            format!("Upgrade complete: engine at {}", session.target_version)
                .green()
                .bold()
                .to_string()
        }
        SessionStatus::SucceededWithWarnings => format!(
            "Upgrade complete with warnings: primary at {}, some secondaries need attention",
            session.target_version
        )
        .yellow()
        .bold()
        .to_string(),
        SessionStatus::Failed(failure) => {
            format!("Upgrade failed: {}", failure).red().bold().to_string()
        }
        other => format!("Upgrade {}", other),
    }
}

/// Format a duration as `1h02m`, `4m05s` or `3.2s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

fn apply_table_style(table: &mut Table) {
    use tabled::settings::object::Columns;
    use tabled::settings::themes::Theme;
    use tabled::settings::{Modify, Padding};

    let mut theme = Theme::from_style(Style::empty());
    theme.remove_horizontal_lines();
    table.with(theme);
    table.with(Modify::new(Columns::new(..)).with(Padding::new(0, 2, 0, 0)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SessionFailure, UpgradeError};
    use crate::topology::types::test_support::member;
    use crate::topology::{EngineVersion, MemberId, Role};

    fn outcome(error: Option<UpgradeError>) -> MemberOutcome {
        MemberOutcome {
            member: MemberId::parse("1").unwrap(),
            address: "10.0.0.2".to_string(),
            role: Role::Secondary,
            exit_status: error.as_ref().map_or(Some(0), |_| None),
            duration: Duration::from_millis(1500),
            output: String::new(),
            stderr: String::new(),
            error,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(3200)), "3.2s");
        assert_eq!(format_duration(Duration::from_secs(245)), "4m05s");
        assert_eq!(format_duration(Duration::from_secs(3720)), "1h02m");
    }

    #[test]
    fn test_outcome_row_ok() {
        colored::control::set_override(false);
        let row = outcome_row(Phase::QuiescingSecondaries, &outcome(None));
        assert_eq!(row.phase, "QuiescingSecondaries");
        assert_eq!(row.member, "machine-1");
        assert_eq!(row.exit, "0");
        assert_eq!(row.duration, "1.5s");
        assert_eq!(row.result, "ok");
    }

    #[test]
    fn test_outcome_row_timeout() {
        colored::control::set_override(false);
        let row = outcome_row(
            Phase::QuiescingSecondaries,
            &outcome(Some(UpgradeError::Timeout(Duration::from_secs(300)))),
        );
        assert_eq!(row.exit, "-");
        assert_eq!(row.result, "TimeoutError");
    }

    #[test]
    fn test_member_row_empty_series() {
        colored::control::set_override(false);
        let mut m = member("0", "10.0.0.1", Role::Primary);
        m.series.clear();
        let row = MemberRow::from(&m);
        assert_eq!(row.member, "machine-0");
        assert_eq!(row.series, "-");
        assert_eq!(row.role, "Primary");
        assert_eq!(row.health, "healthy");
    }

    #[test]
    fn test_status_line_failed() {
        colored::control::set_override(false);
        let mut session = UpgradeSession::new(EngineVersion::new(3, 2));
        session.status = SessionStatus::Failed(SessionFailure::new(
            Phase::UpgradingPrimary,
            Some(MemberId::parse("0").unwrap()),
            UpgradeError::PrimaryUpgrade(Box::new(UpgradeError::Timeout(Duration::from_secs(
                3600,
            )))),
        ));
        let line = status_line(&session);
        assert!(line.starts_with("Upgrade failed: [UpgradingPrimary] machine-0"));
        assert!(line.contains("manual recovery required"));
    }

    #[test]
    fn test_status_line_succeeded() {
        colored::control::set_override(false);
        let mut session = UpgradeSession::new(EngineVersion::new(3, 2));
        session.status = SessionStatus::Succeeded;
        assert_eq!(status_line(&session), "Upgrade complete: engine at 3.2");
    }
}
