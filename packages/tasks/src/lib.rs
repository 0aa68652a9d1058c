//! Fleetkern-Tasks: Task Lifecycle & Plans
//!
//! Turns user intent into validated, approval-gated execution plans:
//!
//! - **Task lifecycle**: the state machine from `created` through
//!   `completed | failed | rolled_back`, with every other transition
//!   rejected as `invalid_transition`
//! - **Plans**: typed phase specs inside a permissive JSON envelope;
//!   immutable once approved, superseded on modification
//! - **Validation**: ordered schema / policy / safety checks with an
//!   advisory quality score
//! - **Approvals**: role-gated, optional two-approver rule with distinct
//!   identities, production capability required for production plans
//! - **Runs**: execution-side detail (phases, counters, percent complete)
//! - **LLM usage accounting**: per-call token and cost metering with
//!   monthly rollups and a pre-dispatch quota gate

pub mod lifecycle;
pub mod plan;
pub mod run;
pub mod task;
pub mod usage;
pub mod validator;

// Re-exports
pub use lifecycle::{ApprovalOutcome, LifecycleError, TaskLifecycle, PRODUCTION_APPROVER_ROLE};
pub use plan::{
    parse_duration_literal, HealthCheckSpec, PhaseSpec, PhaseType, Plan, PlanError, PlanSpec,
    PlanState, PlanStore, PlanType, RollbackPolicy, RollbackScope, RollbackTrigger,
};
pub use run::{Run, RunMetrics, RunState, RunStore};
pub use task::{ExecutionMode, ExecutionPolicy, Task, TaskSource, TaskState};
pub use usage::{
    ModelPricing, MonthlyRollup, QuotaDecision, UsageDraft, UsageLimits, UsageMeter,
    UsageRecord, UsageTotals,
};
pub use validator::{PlanValidator, ValidationClass, ValidationResult, Violation};
