//! Tool invocations.
//!
//! A tool invocation is the durable record of a single external action
//! executed on behalf of a task: the atomic unit of audit for execution.
//! Parameters and results stay in a permissive JSON envelope; typed
//! conversion happens at the validator boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Risk classification of a tool invocation; gates approval requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Reads only
    ReadOnly,
    /// Produces a plan, changes nothing
    PlanOnly,
    /// Mutates non-production state
    StateChangeNonprod,
    /// Mutates production state
    StateChangeProd,
}

impl RiskLevel {
    /// Whether invocations at this level require prior approval.
    pub fn requires_approval(&self) -> bool {
        matches!(self, Self::StateChangeNonprod | Self::StateChangeProd)
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read_only"),
            Self::PlanOnly => write!(f, "plan_only"),
            Self::StateChangeNonprod => write!(f, "state_change_nonprod"),
            Self::StateChangeProd => write!(f, "state_change_prod"),
        }
    }
}

/// Outcome of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// Dispatched, not yet finished
    Running,
    /// Finished successfully
    Succeeded,
    /// Finished with an error
    Failed,
}

/// Durable record of one external action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Record id
    pub id: Uuid,
    /// Owning task
    pub task_id: Uuid,
    /// Plan being executed, if any
    pub plan_id: Option<Uuid>,
    /// Run this action belongs to, if any
    pub run_id: Option<Uuid>,
    /// Tool name (e.g. `patch_asset`, `dr.failover`)
    pub tool_name: String,
    /// Risk classification
    pub risk_level: RiskLevel,
    /// Input parameters (JSON envelope)
    pub parameters: serde_json::Value,
    /// Result payload, set on finish
    pub result: Option<serde_json::Value>,
    /// Status
    pub status: InvocationStatus,
    /// Dispatch time
    pub started_at: DateTime<Utc>,
    /// Completion time
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: Option<u64>,
    /// Whether approval was required
    pub required_approval: bool,
    /// Who approved, when approval was required
    pub approved_by: Option<String>,
}

impl ToolInvocation {
    /// Start a new invocation record.
    pub fn start(
        task_id: Uuid,
        tool_name: impl Into<String>,
        risk_level: RiskLevel,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            plan_id: None,
            run_id: None,
            tool_name: tool_name.into(),
            risk_level,
            parameters,
            result: None,
            status: InvocationStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            required_approval: risk_level.requires_approval(),
            approved_by: None,
        }
    }

    /// Attach the plan id.
    pub fn with_plan(mut self, plan_id: Uuid) -> Self {
        self.plan_id = Some(plan_id);
        self
    }

    /// Attach the run id.
    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Record who approved the invocation.
    pub fn with_approver(mut self, approver: impl Into<String>) -> Self {
        self.approved_by = Some(approver.into());
        self
    }

    /// Finish the record with a result payload.
    pub fn finish(mut self, success: bool, result: serde_json::Value) -> Self {
        let finished = Utc::now();
        self.duration_ms = Some(
            (finished - self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        self.finished_at = Some(finished);
        self.result = Some(result);
        self.status = if success {
            InvocationStatus::Succeeded
        } else {
            InvocationStatus::Failed
        };
        self
    }

    /// Whether the invocation finished successfully.
    pub fn succeeded(&self) -> bool {
        self.status == InvocationStatus::Succeeded
    }
}
