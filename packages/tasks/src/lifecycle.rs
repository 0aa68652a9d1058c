//! Task lifecycle state machine.
//!
//! Transitions outside the table in [`TaskState::can_transition_to`] are
//! rejected with `invalid_transition`. Approval is role-gated; the
//! two-approver rule requires two distinct identities, both holding an
//! allowed role, and production plans additionally require production
//! approval capability.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use fleetkern_engine::ErrorCode;
use fleetkern_tenancy::{
    ActorIdentity, EnvironmentName, GatewayError, OrgId, TenantSession,
};

use crate::task::{ExecutionPolicy, Task, TaskSource, TaskState};

/// Role carrying production approval capability.
pub const PRODUCTION_APPROVER_ROLE: &str = "production_approver";

/// Lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("task {0} not found")]
    NotFound(Uuid),
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: TaskState, to: TaskState },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("policy violation: {0}")]
    PolicyViolation(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl LifecycleError {
    /// Taxonomy code for persisting on the task.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::ScopeError,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::PermissionDenied(_) => ErrorCode::PermissionError,
            Self::PolicyViolation(_) => ErrorCode::PolicyViolation,
            Self::Gateway(_) => ErrorCode::PermissionError,
        }
    }
}

/// Outcome of one approval decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    /// Recorded, but more approvers are required
    Pending,
    /// Task is approved
    Approved,
    /// Task was rejected
    Rejected,
}

#[derive(Debug, Clone)]
struct ApprovalRecord {
    approver: ActorIdentity,
    decided_at: DateTime<Utc>,
}

/// Task store plus the lifecycle rules.
#[derive(Clone, Default)]
pub struct TaskLifecycle {
    tasks: Arc<RwLock<HashMap<OrgId, HashMap<Uuid, Task>>>>,
    approvals: Arc<RwLock<HashMap<Uuid, Vec<ApprovalRecord>>>>,
}

impl TaskLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a task in `created` state.
    pub fn create(
        &self,
        session: &TenantSession,
        user_intent: impl Into<String>,
        environment: EnvironmentName,
        policy: ExecutionPolicy,
        source: TaskSource,
    ) -> Task {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            org_id: session.org_id(),
            created_by: session.actor().id.clone(),
            user_intent: user_intent.into(),
            task_spec: None,
            execution_policy: policy,
            environment,
            state: TaskState::Created,
            source,
            correlation_id: None,
            error_code: None,
            error: None,
            created_at: now,
            updated_at: now,
        };

        self.tasks
            .write()
            .entry(session.org_id())
            .or_default()
            .insert(task.id, task.clone());

        tracing::info!(
            org_id = %session.org_id(),
            task_id = %task.id,
            environment = %task.environment,
            "Task created"
        );
        task
    }

    /// Fetch a task.
    pub fn get(&self, session: &TenantSession, task_id: Uuid) -> Result<Task, LifecycleError> {
        let tasks = self.tasks.read();
        let task = tasks
            .get(&session.org_id())
            .and_then(|m| m.get(&task_id))
            .ok_or(LifecycleError::NotFound(task_id))?;
        session.check_row(task.org_id)?;
        Ok(task.clone())
    }

    /// List tasks in a state.
    pub fn list_in_state(&self, session: &TenantSession, state: TaskState) -> Vec<Task> {
        self.tasks
            .read()
            .get(&session.org_id())
            .map(|m| {
                m.values()
                    .filter(|t| t.state == state)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn mutate<F>(
        &self,
        session: &TenantSession,
        task_id: Uuid,
        f: F,
    ) -> Result<Task, LifecycleError>
    where
        F: FnOnce(&mut Task) -> Result<(), LifecycleError>,
    {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&session.org_id())
            .and_then(|m| m.get_mut(&task_id))
            .ok_or(LifecycleError::NotFound(task_id))?;
        session.check_row(task.org_id)?;
        f(task)?;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    /// Transition a task, validating against the state table.
    pub fn transition(
        &self,
        session: &TenantSession,
        task_id: Uuid,
        to: TaskState,
    ) -> Result<Task, LifecycleError> {
        let task = self.mutate(session, task_id, |task| {
            if !task.state.can_transition_to(to) {
                return Err(LifecycleError::InvalidTransition {
                    from: task.state,
                    to,
                });
            }
            tracing::debug!(task_id = %task.id, from = %task.state, to = %to, "Task transition");
            task.state = to;
            Ok(())
        })?;
        Ok(task)
    }

    /// Move `created -> parsing`.
    pub fn begin_parsing(
        &self,
        session: &TenantSession,
        task_id: Uuid,
    ) -> Result<Task, LifecycleError> {
        self.transition(session, task_id, TaskState::Parsing)
    }

    /// A plan was emitted: move to `planned`, then route through the
    /// approval gate per policy and environment.
    pub fn mark_planned(
        &self,
        session: &TenantSession,
        task_id: Uuid,
        task_spec: serde_json::Value,
    ) -> Result<Task, LifecycleError> {
        self.mutate(session, task_id, |task| {
            if !task.state.can_transition_to(TaskState::Planned) {
                return Err(LifecycleError::InvalidTransition {
                    from: task.state,
                    to: TaskState::Planned,
                });
            }
            task.state = TaskState::Planned;
            task.task_spec = Some(task_spec);
            Ok(())
        })?;

        let task = self.get(session, task_id)?;
        let next = task.execution_policy.route_after_planned(task.environment);
        self.transition(session, task_id, next)
    }

    /// Persist a failure with its taxonomy code.
    pub fn fail(
        &self,
        session: &TenantSession,
        task_id: Uuid,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Result<Task, LifecycleError> {
        let message = message.into();
        self.mutate(session, task_id, |task| {
            if !task.state.can_transition_to(TaskState::Failed) {
                return Err(LifecycleError::InvalidTransition {
                    from: task.state,
                    to: TaskState::Failed,
                });
            }
            task.state = TaskState::Failed;
            task.error_code = Some(code);
            task.error = Some(message);
            Ok(())
        })
    }

    fn check_approver(
        task: &Task,
        approver: &ActorIdentity,
    ) -> Result<(), LifecycleError> {
        let allowed = task
            .execution_policy
            .allowed_approver_roles
            .iter()
            .any(|role| approver.has_role(role));
        if !allowed {
            return Err(LifecycleError::PermissionDenied(format!(
                "'{}' holds no allowed approver role",
                approver.id
            )));
        }
        if task.environment.is_production() && !approver.has_role(PRODUCTION_APPROVER_ROLE) {
            return Err(LifecycleError::PermissionDenied(format!(
                "'{}' lacks production approval capability",
                approver.id
            )));
        }
        Ok(())
    }

    /// Record an approval.
    ///
    /// With `require_two_approvers`, the first approval leaves the task in
    /// `awaiting_approval`; a repeat approval by the same identity is a
    /// policy violation; a distinct second approver completes the gate.
    /// Returns the approver identities on completion via the task's plan
    /// store integration.
    pub fn approve(
        &self,
        session: &TenantSession,
        task_id: Uuid,
        approver: &ActorIdentity,
    ) -> Result<ApprovalOutcome, LifecycleError> {
        let task = self.get(session, task_id)?;
        if task.state != TaskState::AwaitingApproval {
            return Err(LifecycleError::InvalidTransition {
                from: task.state,
                to: TaskState::Approved,
            });
        }
        Self::check_approver(&task, approver)?;

        let mut approvals = self.approvals.write();
        let records = approvals.entry(task_id).or_default();

        if records.iter().any(|r| r.approver.id == approver.id) {
            return Err(LifecycleError::PolicyViolation(format!(
                "'{}' already approved this task; a distinct second approver is required",
                approver.id
            )));
        }

        records.push(ApprovalRecord {
            approver: approver.clone(),
            decided_at: Utc::now(),
        });

        let required = if task.execution_policy.require_two_approvers {
            2
        } else {
            1
        };
        if records.len() < required {
            tracing::info!(task_id = %task_id, approver = %approver.id, "First approval recorded");
            return Ok(ApprovalOutcome::Pending);
        }
        drop(approvals);

        self.transition(session, task_id, TaskState::Approved)?;
        tracing::info!(task_id = %task_id, approver = %approver.id, "Task approved");
        Ok(ApprovalOutcome::Approved)
    }

    /// Any required approver rejecting moves the task to `rejected`.
    pub fn reject(
        &self,
        session: &TenantSession,
        task_id: Uuid,
        approver: &ActorIdentity,
        _reason: Option<String>,
    ) -> Result<ApprovalOutcome, LifecycleError> {
        let task = self.get(session, task_id)?;
        if task.state != TaskState::AwaitingApproval {
            return Err(LifecycleError::InvalidTransition {
                from: task.state,
                to: TaskState::Rejected,
            });
        }
        Self::check_approver(&task, approver)?;

        self.transition(session, task_id, TaskState::Rejected)?;
        tracing::info!(task_id = %task_id, approver = %approver.id, "Task rejected");
        Ok(ApprovalOutcome::Rejected)
    }

    /// The approver identities recorded for a task, in decision order.
    pub fn approvers(&self, task_id: Uuid) -> Vec<ActorIdentity> {
        self.approvals
            .read()
            .get(&task_id)
            .map(|records| records.iter().map(|r| r.approver.clone()).collect())
            .unwrap_or_default()
    }

    /// Expire tasks stuck in `awaiting_approval` past their policy timeout:
    /// they fail with `timeout`.
    pub fn expire_stale_approvals(&self, session: &TenantSession) -> Vec<Uuid> {
        let now = Utc::now();
        let stale: Vec<Uuid> = self
            .list_in_state(session, TaskState::AwaitingApproval)
            .into_iter()
            .filter(|t| {
                now - t.updated_at
                    > Duration::minutes(t.execution_policy.timeout_minutes as i64)
            })
            .map(|t| t.id)
            .collect();

        for task_id in &stale {
            let _ = self.fail(
                session,
                *task_id,
                ErrorCode::Timeout,
                "approval window expired",
            );
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetkern_tenancy::{
        OrganizationDirectory, RlsGateway, TenantContext,
    };

    fn setup() -> (TaskLifecycle, TenantSession) {
        let dir = OrganizationDirectory::new();
        let org = dir.register("acme", "Acme").unwrap();
        let session = RlsGateway::new(dir)
            .session(&TenantContext::new(org.id, ActorIdentity::user("creator")))
            .unwrap();
        (TaskLifecycle::new(), session)
    }

    fn prod_approver(id: &str) -> ActorIdentity {
        ActorIdentity::user(id).with_roles(vec![
            "ops_approver".into(),
            PRODUCTION_APPROVER_ROLE.into(),
        ])
    }

    fn awaiting_task(
        lifecycle: &TaskLifecycle,
        session: &TenantSession,
        policy: ExecutionPolicy,
    ) -> Task {
        let task = lifecycle.create(
            session,
            "patch all drifted production web servers",
            EnvironmentName::Production,
            policy,
            TaskSource::Api,
        );
        lifecycle.begin_parsing(session, task.id).unwrap();
        lifecycle
            .mark_planned(session, task.id, serde_json::json!({ "target": "web-linux" }))
            .unwrap()
    }

    #[test]
    fn test_happy_path_to_awaiting_approval() {
        let (lifecycle, session) = setup();
        let task = awaiting_task(&lifecycle, &session, ExecutionPolicy::default());
        assert_eq!(task.state, TaskState::AwaitingApproval);
    }

    #[test]
    fn test_full_auto_skips_gate_outside_production() {
        let (lifecycle, session) = setup();
        let task = lifecycle.create(
            &session,
            "run drift report",
            EnvironmentName::Staging,
            ExecutionPolicy::full_auto(),
            TaskSource::Scheduled,
        );
        lifecycle.begin_parsing(&session, task.id).unwrap();
        let task = lifecycle
            .mark_planned(&session, task.id, serde_json::json!({}))
            .unwrap();
        assert_eq!(task.state, TaskState::Approved);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let (lifecycle, session) = setup();
        let task = lifecycle.create(
            &session,
            "intent",
            EnvironmentName::Staging,
            ExecutionPolicy::default(),
            TaskSource::Chat,
        );

        let err = lifecycle
            .transition(&session, task.id, TaskState::Executing)
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
        assert_eq!(err.code(), ErrorCode::InvalidTransition);
    }

    #[test]
    fn test_two_approver_gate() {
        let (lifecycle, session) = setup();
        let task = awaiting_task(
            &lifecycle,
            &session,
            ExecutionPolicy::default().with_two_approvers(),
        );

        // Approver A: recorded, state unchanged.
        let outcome = lifecycle
            .approve(&session, task.id, &prod_approver("alice"))
            .unwrap();
        assert_eq!(outcome, ApprovalOutcome::Pending);
        assert_eq!(
            lifecycle.get(&session, task.id).unwrap().state,
            TaskState::AwaitingApproval
        );

        // Approver B = A: policy violation.
        let err = lifecycle
            .approve(&session, task.id, &prod_approver("alice"))
            .unwrap_err();
        assert!(matches!(err, LifecycleError::PolicyViolation(_)));

        // Approver C: distinct, gate completes.
        let outcome = lifecycle
            .approve(&session, task.id, &prod_approver("carol"))
            .unwrap();
        assert_eq!(outcome, ApprovalOutcome::Approved);
        assert_eq!(
            lifecycle.get(&session, task.id).unwrap().state,
            TaskState::Approved
        );

        let approvers = lifecycle.approvers(task.id);
        assert_eq!(approvers.len(), 2);
        assert_ne!(approvers[0].id, approvers[1].id);
    }

    #[test]
    fn test_production_capability_required() {
        let (lifecycle, session) = setup();
        let task = awaiting_task(&lifecycle, &session, ExecutionPolicy::default());

        let nonprod = ActorIdentity::user("bob").with_roles(vec!["ops_approver".into()]);
        let err = lifecycle.approve(&session, task.id, &nonprod).unwrap_err();
        assert!(matches!(err, LifecycleError::PermissionDenied(_)));
    }

    #[test]
    fn test_role_required() {
        let (lifecycle, session) = setup();
        let task = awaiting_task(&lifecycle, &session, ExecutionPolicy::default());

        let no_role = ActorIdentity::user("mallory");
        let err = lifecycle.approve(&session, task.id, &no_role).unwrap_err();
        assert!(matches!(err, LifecycleError::PermissionDenied(_)));
    }

    #[test]
    fn test_reject() {
        let (lifecycle, session) = setup();
        let task = awaiting_task(&lifecycle, &session, ExecutionPolicy::default());

        let outcome = lifecycle
            .reject(&session, task.id, &prod_approver("alice"), Some("too risky".into()))
            .unwrap();
        assert_eq!(outcome, ApprovalOutcome::Rejected);
        assert!(lifecycle.get(&session, task.id).unwrap().state.is_terminal());
    }

    #[test]
    fn test_fail_records_code() {
        let (lifecycle, session) = setup();
        let task = lifecycle.create(
            &session,
            "intent",
            EnvironmentName::Staging,
            ExecutionPolicy::default(),
            TaskSource::Chat,
        );
        lifecycle.begin_parsing(&session, task.id).unwrap();

        let task = lifecycle
            .fail(&session, task.id, ErrorCode::ParseError, "unparseable intent")
            .unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.error_code, Some(ErrorCode::ParseError));
    }
}
