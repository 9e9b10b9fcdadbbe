//! The upgrade state machine.
//!
//! A session walks Discovering, Notifying, QuiescingSecondaries,
//! UpgradingPrimary, RehydratingSecondaries and Verifying in that order.
//! Every phase waits for all of its members before the next one starts;
//! any phase can end the session in `Failed`.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::plan::create_upgrade_plan;
use super::policy::SessionConfig;
use super::types::{MemberOutcome, Phase, PhaseResult, SessionStatus, UpgradePlan, UpgradeSession};
use crate::error::{SessionFailure, UpgradeError};
use crate::remote::{Action, OutputSink, RemoteExecutor, RemoteTransport, render_action};
use crate::topology::{Discoverer, EngineVersion, Member, MembershipAuthority, Role, Topology};

/// Progress callbacks for a running session. All methods default to no-ops.
pub trait SessionObserver: Send + Sync {
    fn phase_started(&self, _phase: Phase, _members: usize) {}

    fn member_finished(&self, _phase: Phase, _outcome: &MemberOutcome) {}

    fn phase_finished(&self, _result: &PhaseResult) {}
}

pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Drives one upgrade session at a time.
pub struct Orchestrator {
    discoverer: Discoverer,
    executor: RemoteExecutor,
    sink: Arc<dyn OutputSink>,
    observer: Arc<dyn SessionObserver>,
    config: SessionConfig,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        authority: Arc<dyn MembershipAuthority>,
        transport: Arc<dyn RemoteTransport>,
        sink: Arc<dyn OutputSink>,
        config: SessionConfig,
    ) -> Result<Self, UpgradeError> {
        config.validate()?;

        let cancel = CancellationToken::new();
        let executor = RemoteExecutor::new(transport)
            .with_drain_interval(config.drain_interval)
            .with_cancellation(cancel.clone());

        Ok(Self {
            discoverer: Discoverer::new(authority),
            executor,
            sink,
            observer: Arc::new(NoopObserver),
            config,
            cancel,
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Cancelling this token aborts in-flight executions and ends the
    /// session as `Failed(Cancelled)` at the next phase boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Discover the topology and render every command without running any.
    pub async fn plan(&self, target: &EngineVersion) -> Result<UpgradePlan, SessionFailure> {
        create_upgrade_plan(&self.discoverer, target, &self.config).await
    }

    /// Run a full session. Always returns a session in a terminal state.
    pub async fn run(&self, target: &EngineVersion) -> UpgradeSession {
        let mut session = UpgradeSession::new(target.clone());
        session.status = SessionStatus::InProgress;
        info!("Starting upgrade session to engine version {}", target);

        let status = match self.drive(&mut session, target).await {
            Ok(status) => status,
            Err(failure) => {
                error!("Upgrade session failed: {}", failure);
                SessionStatus::Failed(failure)
            }
        };

        session.finish(status);
        info!("Upgrade session finished: {}", session.status);
        session
    }

    async fn drive(
        &self,
        session: &mut UpgradeSession,
        target: &EngineVersion,
    ) -> Result<SessionStatus, SessionFailure> {
        let topology = self.discover(target).await?;
        session.topology = Some(topology.clone());

        let primary = topology.primary();
        let secondaries: Vec<&Member> = topology.secondaries().iter().collect();
        if secondaries.is_empty() {
            info!("Single-member replica set, no secondaries to quiesce or rehydrate");
        }

        // Notifying is best effort: agents that miss it still get every
        // later step.
        let members: Vec<&Member> = topology.members().collect();
        let notified = self
            .run_phase(Phase::Notifying, &members, &Action::Notify, target)
            .await?;
        for outcome in notified.failures() {
            session.warnings.push(describe(
                outcome,
                "was not notified of the pending upgrade",
            ));
        }
        session.phases.push(notified);
        self.checkpoint(Phase::Notifying)?;

        let quiesced = self
            .run_phase(
                Phase::QuiescingSecondaries,
                &secondaries,
                &Action::Quiesce,
                target,
            )
            .await?;
        let quiesce_failure = quiesced.first_failure().map(|(member, error)| {
            SessionFailure::new(
                Phase::QuiescingSecondaries,
                Some(member.clone()),
                error.clone(),
            )
        });
        session.phases.push(quiesced);
        self.checkpoint(Phase::QuiescingSecondaries)?;
        if let Some(failure) = quiesce_failure {
            warn!("Not touching primary {}: {}", primary.id, failure);
            return Err(failure);
        }

        let upgraded = self
            .run_phase(
                Phase::UpgradingPrimary,
                &[primary],
                &Action::Upgrade,
                target,
            )
            .await?;
        let primary_failure = upgraded.first_failure().map(|(member, error)| {
            SessionFailure::new(
                Phase::UpgradingPrimary,
                Some(member.clone()),
                UpgradeError::PrimaryUpgrade(Box::new(error.clone())),
            )
        });
        let interrupted = upgraded
            .outcomes
            .iter()
            .any(|o| matches!(o.error, Some(UpgradeError::Cancelled)));
        session.phases.push(upgraded);
        if interrupted {
            session.warnings.push(format!(
                "{} ({}) may be partially upgraded",
                primary.id, primary.address
            ));
        }
        self.checkpoint(Phase::UpgradingPrimary)?;
        if let Some(failure) = primary_failure {
            return Err(failure);
        }
        info!("Primary {} upgraded to {}", primary.id, target);

        let rehydrate = Action::Rehydrate {
            primary_address: primary.address.clone(),
            mode: self.config.rehydrate_mode,
        };
        let rehydrated = self
            .run_phase(
                Phase::RehydratingSecondaries,
                &secondaries,
                &rehydrate,
                target,
            )
            .await?;
        for outcome in rehydrated.failures() {
            session
                .warnings
                .push(describe(outcome, "was not rehydrated"));
        }
        let mut to_verify = vec![primary];
        to_verify.extend(
            secondaries
                .iter()
                .copied()
                .filter(|m| rehydrated.outcome_for(&m.id).is_some_and(MemberOutcome::is_ok)),
        );
        session.phases.push(rehydrated);
        self.checkpoint(Phase::RehydratingSecondaries)?;

        let verified = self
            .run_phase(Phase::Verifying, &to_verify, &Action::Verify, target)
            .await?;
        let primary_error = verified
            .outcome_for(&primary.id)
            .and_then(|o| o.error.clone());
        let rejoined = verified
            .succeeded()
            .filter(|o| o.role == Role::Secondary)
            .count();
        for outcome in verified.failures().filter(|o| o.role == Role::Secondary) {
            session
                .warnings
                .push(describe(outcome, "did not rejoin the replica set"));
        }
        session.phases.push(verified);
        self.checkpoint(Phase::Verifying)?;

        conclude(&topology, target, primary_error, rejoined)
    }

    async fn discover(&self, target: &EngineVersion) -> Result<Topology, SessionFailure> {
        self.checkpoint(Phase::Discovering)?;
        self.observer.phase_started(Phase::Discovering, 0);

        let discovered = tokio::select! {
            discovered = self.discoverer.discover(target) => discovered,
            () = self.cancel.cancelled() => Err(UpgradeError::Cancelled),
        };

        discovered.map_err(|e| SessionFailure::new(Phase::Discovering, None, e))
    }

    /// Fan one action out over `members` and wait for every execution.
    ///
    /// All commands are rendered before any runs, so a template failure
    /// leaves the phase untouched. Executions complete in any order; a free
    /// slot is refilled as soon as any member finishes. Outcomes are
    /// returned in the order of `members`.
    async fn run_phase(
        &self,
        phase: Phase,
        members: &[&Member],
        action: &Action,
        target: &EngineVersion,
    ) -> Result<PhaseResult, SessionFailure> {
        let commands = members
            .iter()
            .map(|member| {
                render_action(action, member, target)
                    .map(|command| (*member, command))
                    .map_err(|e| SessionFailure::new(phase, Some(member.id.clone()), e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let deadline = self.config.deadlines.for_phase(phase);
        let concurrency = match phase {
            Phase::UpgradingPrimary => 1,
            _ => self.config.max_concurrency,
        };

        info!(
            "Phase [{}/{}]: {} ({} members, deadline {:?}, concurrency {})",
            phase.number(),
            Phase::TOTAL,
            phase.title(),
            commands.len(),
            deadline,
            concurrency
        );
        self.observer.phase_started(phase, commands.len());

        let started = Instant::now();
        let mut indexed: Vec<(usize, MemberOutcome)> =
            stream::iter(commands.into_iter().enumerate())
                .map(|(index, (member, command))| async move {
                    let result = self
                        .executor
                        .execute(command, Arc::clone(&self.sink), deadline)
                        .await;
                    let outcome = MemberOutcome::from_execution(member, result);
                    self.observer.member_finished(phase, &outcome);
                    (index, outcome)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;
        indexed.sort_by_key(|(index, _)| *index);
        let outcomes: Vec<MemberOutcome> =
            indexed.into_iter().map(|(_, outcome)| outcome).collect();

        let result = PhaseResult {
            phase,
            outcomes,
            duration: started.elapsed(),
        };

        info!(
            "Phase {} finished in {:.1}s: {} ok, {} failed",
            phase,
            result.duration.as_secs_f64(),
            result.succeeded().count(),
            result.failures().count()
        );
        self.observer.phase_finished(&result);

        Ok(result)
    }

    fn checkpoint(&self, phase: Phase) -> Result<(), SessionFailure> {
        if self.cancel.is_cancelled() {
            warn!("Session cancelled during {}", phase);
            return Err(SessionFailure::cancelled(phase));
        }
        Ok(())
    }
}

/// Decide the terminal status from the verification results.
fn conclude(
    topology: &Topology,
    target: &EngineVersion,
    primary_error: Option<UpgradeError>,
    rejoined: usize,
) -> Result<SessionStatus, SessionFailure> {
    let primary = topology.primary();
    if let Some(e) = primary_error {
        return Err(SessionFailure::new(
            Phase::Verifying,
            Some(primary.id.clone()),
            UpgradeError::Verification(format!(
                "primary did not confirm engine version {}: {}",
                target, e
            )),
        ));
    }

    let expected = topology.secondaries().len();
    if expected > 0 && rejoined == 0 {
        return Err(SessionFailure::new(
            Phase::Verifying,
            None,
            UpgradeError::Verification(format!(
                "none of {} secondaries rejoined the replica set",
                expected
            )),
        ));
    }

    if rejoined < expected {
        warn!(
            "{} of {} secondaries rejoined at {}",
            rejoined, expected, target
        );
        Ok(SessionStatus::SucceededWithWarnings)
    } else {
        info!("All {} members verified at {}", topology.len(), target);
        Ok(SessionStatus::Succeeded)
    }
}

fn describe(outcome: &MemberOutcome, what: &str) -> String {
    match &outcome.error {
        Some(e) => format!("{} ({}) {}: {}", outcome.member, outcome.address, what, e),
        None => format!("{} ({}) {}", outcome.member, outcome.address, what),
    }
}
