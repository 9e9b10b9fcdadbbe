//! Upgrade planning: discover once and render every command up front.

use std::time::Duration;

use tracing::info;

use super::policy::SessionConfig;
use super::types::{Phase, PlannedStep, UpgradePlan};
use crate::error::SessionFailure;
use crate::remote::{Action, render_action};
use crate::topology::{Discoverer, EngineVersion, Member};

/// Create an upgrade plan for the discovered topology.
///
/// Verification is planned for every secondary; at run time only the
/// secondaries that rehydrated are verified.
pub async fn create_upgrade_plan(
    discoverer: &Discoverer,
    target: &EngineVersion,
    config: &SessionConfig,
) -> Result<UpgradePlan, SessionFailure> {
    info!("Creating upgrade plan to engine version {}", target);

    let topology = discoverer
        .discover(target)
        .await
        .map_err(|e| SessionFailure::new(Phase::Discovering, None, e))?;

    let primary = topology.primary();
    let secondaries: Vec<&Member> = topology.secondaries().iter().collect();
    let rehydrate = Action::Rehydrate {
        primary_address: primary.address.clone(),
        mode: config.rehydrate_mode,
    };

    let schedule: Vec<(Phase, Vec<&Member>, Action)> = vec![
        (Phase::Notifying, topology.members().collect(), Action::Notify),
        (Phase::QuiescingSecondaries, secondaries.clone(), Action::Quiesce),
        (Phase::UpgradingPrimary, vec![primary], Action::Upgrade),
        (Phase::RehydratingSecondaries, secondaries, rehydrate),
        (Phase::Verifying, topology.members().collect(), Action::Verify),
    ];

    let mut steps = Vec::new();
    for (phase, members, action) in schedule {
        for member in members {
            let command = render_action(&action, member, target)
                .map_err(|e| SessionFailure::new(phase, Some(member.id.clone()), e))?;
            steps.push(PlannedStep { phase, command });
        }
    }

    Ok(UpgradePlan {
        target_version: target.clone(),
        topology,
        steps,
    })
}

/// Upper bound on session wall-clock time if every execution ran to its
/// deadline, accounting for fan-out concurrency.
///
/// Returns `None` when the total does not fit in a `Duration`.
pub fn worst_case_duration(plan: &UpgradePlan, config: &SessionConfig) -> Option<Duration> {
    Phase::EXECUTION_ORDER
        .iter()
        .try_fold(Duration::ZERO, |total, &phase| {
            let members = plan.steps_for(phase).count();
            let concurrency = match phase {
                Phase::UpgradingPrimary => 1,
                _ => config.max_concurrency.max(1),
            };
            let waves = u32::try_from(members.div_ceil(concurrency)).ok()?;
            let phase_total = config.deadlines.for_phase(phase).checked_mul(waves)?;
            total.checked_add(phase_total)
        })
}
