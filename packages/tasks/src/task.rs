//! Task entity and execution policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fleetkern_engine::ErrorCode;
use fleetkern_tenancy::{EnvironmentName, OrgId};

/// Task lifecycle states. Storage keeps the full set; the execution-side
/// detail additionally lives on [`crate::run::Run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Parsing,
    Planned,
    AwaitingApproval,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
    RolledBack,
}

impl TaskState {
    /// Whether the state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::RolledBack | Self::Rejected
        )
    }

    /// The permitted transition table. Everything else is rejected with
    /// `invalid_transition`.
    pub fn can_transition_to(&self, to: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, to),
            (Created, Parsing)
                | (Parsing, Planned)
                | (Parsing, Failed)
                | (Planned, AwaitingApproval)
                | (Planned, Approved)
                | (AwaitingApproval, Approved)
                | (AwaitingApproval, Rejected)
                | (AwaitingApproval, Failed)
                | (Approved, Executing)
                | (Executing, Completed)
                | (Executing, RolledBack)
                | (Executing, Failed)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Parsing => "parsing",
            Self::Planned => "planned",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        };
        write!(f, "{s}")
    }
}

/// How much autonomy the task is granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Produce a plan, never execute
    PlanOnly,
    /// Execute canary phases only
    CanaryOnly,
    /// Execute end to end without human approval (non-production only)
    FullAuto,
}

/// Per-task execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Autonomy mode
    pub mode: ExecutionMode,
    /// Roles allowed to approve plans for this task
    pub allowed_approver_roles: Vec<String>,
    /// Whether two distinct approvers are required
    pub require_two_approvers: bool,
    /// Task-level timeout; the run aborts with `timeout` past this
    pub timeout_minutes: u64,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::PlanOnly,
            allowed_approver_roles: vec!["ops_approver".to_string()],
            require_two_approvers: false,
            timeout_minutes: 30,
        }
    }
}

impl ExecutionPolicy {
    pub fn full_auto() -> Self {
        Self {
            mode: ExecutionMode::FullAuto,
            ..Default::default()
        }
    }

    pub fn with_two_approvers(mut self) -> Self {
        self.require_two_approvers = true;
        self
    }

    pub fn with_approver_roles(mut self, roles: Vec<String>) -> Self {
        self.allowed_approver_roles = roles;
        self
    }

    pub fn with_timeout_minutes(mut self, minutes: u64) -> Self {
        self.timeout_minutes = minutes;
        self
    }

    /// Where a freshly-planned task routes: full-auto skips the approval
    /// gate only outside production.
    pub fn route_after_planned(&self, environment: EnvironmentName) -> TaskState {
        if self.mode == ExecutionMode::FullAuto && !environment.is_production() {
            TaskState::Approved
        } else {
            TaskState::AwaitingApproval
        }
    }
}

/// Where a task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSource {
    Chat,
    Api,
    Scheduled,
    Webhook,
}

/// A task: one unit of user intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task id
    pub id: Uuid,
    /// Owning organization
    pub org_id: OrgId,
    /// Who created the task
    pub created_by: String,
    /// Raw user intent
    pub user_intent: String,
    /// Plan inputs extracted from the intent, when parsed
    pub task_spec: Option<serde_json::Value>,
    /// Execution policy
    pub execution_policy: ExecutionPolicy,
    /// Target environment
    pub environment: EnvironmentName,
    /// Lifecycle state
    pub state: TaskState,
    /// Origin
    pub source: TaskSource,
    /// Cross-system correlation id
    pub correlation_id: Option<String>,
    /// Persisted error code, on failure
    pub error_code: Option<ErrorCode>,
    /// Human-readable error, on failure
    pub error: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last state change
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use TaskState::*;
        assert!(Created.can_transition_to(Parsing));
        assert!(Parsing.can_transition_to(Planned));
        assert!(Parsing.can_transition_to(Failed));
        assert!(AwaitingApproval.can_transition_to(Approved));
        assert!(Executing.can_transition_to(RolledBack));

        assert!(!Created.can_transition_to(Executing));
        assert!(!Completed.can_transition_to(Executing));
        assert!(!Planned.can_transition_to(Completed));
        assert!(!Approved.can_transition_to(Completed));
    }

    #[test]
    fn test_route_after_planned() {
        let full_auto = ExecutionPolicy::full_auto();
        assert_eq!(
            full_auto.route_after_planned(EnvironmentName::Staging),
            TaskState::Approved
        );
        // Production always gates on approval, even in full-auto.
        assert_eq!(
            full_auto.route_after_planned(EnvironmentName::Production),
            TaskState::AwaitingApproval
        );

        let plan_only = ExecutionPolicy::default();
        assert_eq!(
            plan_only.route_after_planned(EnvironmentName::Sandbox),
            TaskState::AwaitingApproval
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Rejected.is_terminal());
        assert!(!TaskState::Executing.is_terminal());
    }
}
