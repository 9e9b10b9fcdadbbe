//! Upgrade session: phases, policy, planning and the orchestrator.

pub mod plan;
pub mod policy;
pub mod session;
pub mod types;

pub use plan::{create_upgrade_plan, worst_case_duration};
pub use policy::{PhaseDeadlines, RehydrateMode, SessionConfig};
pub use session::{NoopObserver, Orchestrator, SessionObserver};
pub use types::{
    MemberOutcome, Phase, PhaseResult, PlannedStep, SessionStatus, UpgradePlan, UpgradeSession,
};
