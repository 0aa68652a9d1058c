//! Plans.
//!
//! Plans arrive from the meta-planner as a permissive JSON envelope; the
//! validator converts them to the typed [`PlanSpec`] at the boundary. An
//! approved plan is immutable: modification creates a new plan and the old
//! one transitions to `superseded`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use fleetkern_tenancy::{EnvironmentName, OrgId, TenantSession};

use crate::validator::ValidationResult;

/// Plan document types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    DriftPlan,
    PatchPlan,
    DrRunbook,
    ComplianceReport,
}

/// Phase types within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseType {
    Preflight,
    Patch,
    Validation,
    Canary,
    Finalize,
}

impl PhaseType {
    /// Phases that only run validators and mutate nothing.
    pub fn is_validator_only(&self) -> bool {
        matches!(self, Self::Preflight | Self::Validation)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "preflight" => Some(Self::Preflight),
            "patch" => Some(Self::Patch),
            "validation" => Some(Self::Validation),
            "canary" => Some(Self::Canary),
            "finalize" => Some(Self::Finalize),
            _ => None,
        }
    }
}

/// One declared health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    /// Check name
    pub name: String,
    /// Check type (connectivity, services_running, ...)
    #[serde(rename = "type")]
    pub check_type: String,
    /// Target (URL, host, service name)
    pub target: String,
    /// Per-check timeout in seconds
    #[serde(default = "default_check_timeout")]
    pub timeout_secs: u64,
}

fn default_check_timeout() -> u64 {
    30
}

/// Typed phase specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSpec {
    /// Phase name
    pub name: String,
    /// Phase type
    pub phase_type: PhaseType,
    /// Target image `family:version`, when the phase retargets assets
    pub target_image: Option<String>,
    /// Asset identifiers in this phase
    pub assets: Vec<String>,
    /// Declared asset count when assets are resolved later
    pub asset_count: Option<u64>,
    /// Post-phase wait as a duration literal (`5m`, `1h`, `1d`)
    pub wait_time: Option<String>,
    /// Health checks run at the phase boundary
    pub health_checks: Vec<HealthCheckSpec>,
}

impl PhaseSpec {
    /// Effective asset population of the phase.
    pub fn asset_population(&self) -> u64 {
        if self.assets.is_empty() {
            self.asset_count.unwrap_or(0)
        } else {
            self.assets.len() as u64
        }
    }
}

/// Automatic rollback triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackTrigger {
    /// Observed failure rate above `max_error_rate`
    ErrorRate,
    /// Any phase health check failed
    HealthCheckFailure,
}

/// Scope of an executed rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackScope {
    /// Roll back the triggering phase only (default)
    Phase,
    /// Roll back every completed phase of the campaign
    Campaign,
}

impl Default for RollbackScope {
    fn default() -> Self {
        Self::Phase
    }
}

/// Rollback policy for a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPolicy {
    /// Failure-rate threshold triggering rollback
    pub max_error_rate: f64,
    /// Automatic triggers; validation requires at least one
    pub automatic_triggers: Vec<RollbackTrigger>,
    /// Rollback scope
    #[serde(default)]
    pub scope: RollbackScope,
}

impl Default for RollbackPolicy {
    fn default() -> Self {
        Self {
            max_error_rate: 0.25,
            automatic_triggers: vec![
                RollbackTrigger::ErrorRate,
                RollbackTrigger::HealthCheckFailure,
            ],
            scope: RollbackScope::Phase,
        }
    }
}

/// Typed plan produced by validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSpec {
    /// Target environment
    pub environment: EnvironmentName,
    /// Ordered phases
    pub phases: Vec<PhaseSpec>,
    /// Rollback policy
    pub rollback: RollbackPolicy,
}

/// Plan lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    Draft,
    Validated,
    AwaitingApproval,
    Approved,
    Rejected,
    Superseded,
}

/// A plan document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Plan id
    pub id: Uuid,
    /// Owning task
    pub task_id: Uuid,
    /// Owning organization
    pub org_id: OrgId,
    /// Document type
    pub plan_type: PlanType,
    /// Raw planner payload (permissive envelope)
    pub payload: serde_json::Value,
    /// Typed spec, set by validation
    pub spec: Option<PlanSpec>,
    /// Validation outcome
    pub validation: Option<ValidationResult>,
    /// Advisory quality score (0-100), never gating
    pub quality_score: u8,
    /// Lifecycle state
    pub state: PlanState,
    /// First approver
    pub approved_by: Option<String>,
    /// Second approver under the two-approver rule
    pub second_approver: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last state change
    pub updated_at: DateTime<Utc>,
}

/// Plan errors.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("plan {0} not found")]
    NotFound(Uuid),
    #[error("plan {0} is immutable in state {1:?}; modification supersedes")]
    Immutable(Uuid, PlanState),
    #[error("plan {0} is not validated")]
    NotValidated(Uuid),
}

/// Parse a duration literal: `<int>{s|m|h|d}`.
///
/// Returns `None` for anything unparsable; callers decide whether that is a
/// hard error (validation) or a zero-with-warning (execution wait gates).
pub fn parse_duration_literal(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.len() < 2 || !s.is_ascii() {
        return None;
    }
    let (digits, unit) = s.split_at(s.len() - 1);
    let value: u64 = digits.parse().ok()?;
    match unit {
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        "d" => Some(Duration::from_secs(value * 86_400)),
        _ => None,
    }
}

/// Tenant-partitioned plan store.
#[derive(Clone, Default)]
pub struct PlanStore {
    plans: Arc<RwLock<HashMap<OrgId, HashMap<Uuid, Plan>>>>,
}

impl PlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new draft plan from a planner payload.
    pub fn create_draft(
        &self,
        session: &TenantSession,
        task_id: Uuid,
        plan_type: PlanType,
        payload: serde_json::Value,
    ) -> Plan {
        let now = Utc::now();
        let plan = Plan {
            id: Uuid::new_v4(),
            task_id,
            org_id: session.org_id(),
            plan_type,
            payload,
            spec: None,
            validation: None,
            quality_score: 0,
            state: PlanState::Draft,
            approved_by: None,
            second_approver: None,
            created_at: now,
            updated_at: now,
        };
        self.plans
            .write()
            .entry(session.org_id())
            .or_default()
            .insert(plan.id, plan.clone());
        plan
    }

    /// Fetch a plan.
    pub fn get(&self, session: &TenantSession, plan_id: Uuid) -> Result<Plan, PlanError> {
        self.plans
            .read()
            .get(&session.org_id())
            .and_then(|m| m.get(&plan_id))
            .cloned()
            .ok_or(PlanError::NotFound(plan_id))
    }

    /// Plans belonging to a task, oldest first.
    pub fn for_task(&self, session: &TenantSession, task_id: Uuid) -> Vec<Plan> {
        let mut plans: Vec<Plan> = self
            .plans
            .read()
            .get(&session.org_id())
            .map(|m| {
                m.values()
                    .filter(|p| p.task_id == task_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        plans.sort_by_key(|p| p.created_at);
        plans
    }

    fn mutate<F>(
        &self,
        session: &TenantSession,
        plan_id: Uuid,
        f: F,
    ) -> Result<Plan, PlanError>
    where
        F: FnOnce(&mut Plan) -> Result<(), PlanError>,
    {
        let mut plans = self.plans.write();
        let plan = plans
            .get_mut(&session.org_id())
            .and_then(|m| m.get_mut(&plan_id))
            .ok_or(PlanError::NotFound(plan_id))?;
        f(plan)?;
        plan.updated_at = Utc::now();
        Ok(plan.clone())
    }

    /// Attach a validation outcome (and typed spec when valid). The plan
    /// moves to `validated` or stays draft with its violations recorded.
    pub fn attach_validation(
        &self,
        session: &TenantSession,
        plan_id: Uuid,
        validation: ValidationResult,
        spec: Option<PlanSpec>,
    ) -> Result<Plan, PlanError> {
        self.mutate(session, plan_id, |plan| {
            if matches!(plan.state, PlanState::Approved | PlanState::Superseded) {
                return Err(PlanError::Immutable(plan.id, plan.state));
            }
            plan.quality_score = validation.quality_score;
            if validation.overall_valid {
                plan.state = PlanState::Validated;
            }
            plan.validation = Some(validation);
            plan.spec = spec;
            Ok(())
        })
    }

    /// Move a validated plan into the approval gate.
    pub fn submit_for_approval(
        &self,
        session: &TenantSession,
        plan_id: Uuid,
    ) -> Result<Plan, PlanError> {
        self.mutate(session, plan_id, |plan| {
            if plan.state != PlanState::Validated {
                return Err(PlanError::NotValidated(plan.id));
            }
            plan.state = PlanState::AwaitingApproval;
            Ok(())
        })
    }

    /// Record approval identities and mark the plan approved. From here the
    /// plan is immutable.
    pub fn mark_approved(
        &self,
        session: &TenantSession,
        plan_id: Uuid,
        approved_by: impl Into<String>,
        second_approver: Option<String>,
    ) -> Result<Plan, PlanError> {
        let approved_by = approved_by.into();
        self.mutate(session, plan_id, |plan| {
            if plan.state == PlanState::Approved || plan.state == PlanState::Superseded {
                return Err(PlanError::Immutable(plan.id, plan.state));
            }
            plan.state = PlanState::Approved;
            plan.approved_by = Some(approved_by);
            plan.second_approver = second_approver;
            Ok(())
        })
    }

    /// Mark a plan rejected.
    pub fn mark_rejected(
        &self,
        session: &TenantSession,
        plan_id: Uuid,
    ) -> Result<Plan, PlanError> {
        self.mutate(session, plan_id, |plan| {
            if plan.state == PlanState::Approved || plan.state == PlanState::Superseded {
                return Err(PlanError::Immutable(plan.id, plan.state));
            }
            plan.state = PlanState::Rejected;
            Ok(())
        })
    }

    /// Modify an approved plan: the original transitions to `superseded`
    /// and a new draft is created with the updated payload.
    pub fn supersede(
        &self,
        session: &TenantSession,
        plan_id: Uuid,
        new_payload: serde_json::Value,
    ) -> Result<Plan, PlanError> {
        let old = self.mutate(session, plan_id, |plan| {
            plan.state = PlanState::Superseded;
            Ok(())
        })?;

        tracing::info!(plan_id = %plan_id, "Plan superseded");
        Ok(self.create_draft(session, old.task_id, old.plan_type, new_payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetkern_tenancy::{
        ActorIdentity, OrganizationDirectory, RlsGateway, TenantContext,
    };

    fn session() -> TenantSession {
        let dir = OrganizationDirectory::new();
        let org = dir.register("acme", "Acme").unwrap();
        RlsGateway::new(dir)
            .session(&TenantContext::new(org.id, ActorIdentity::user("planner")))
            .unwrap()
    }

    #[test]
    fn test_duration_literals() {
        assert_eq!(parse_duration_literal("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration_literal("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration_literal("1d"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_duration_literal("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration_literal("garbage"), None);
        assert_eq!(parse_duration_literal(""), None);
        assert_eq!(parse_duration_literal("h"), None);
    }

    #[test]
    fn test_approved_plan_is_immutable() {
        let store = PlanStore::new();
        let session = session();
        let plan = store.create_draft(
            &session,
            Uuid::new_v4(),
            PlanType::PatchPlan,
            serde_json::json!({ "phases": [] }),
        );

        store
            .mark_approved(&session, plan.id, "alice", None)
            .unwrap();

        let err = store
            .mark_approved(&session, plan.id, "bob", None)
            .unwrap_err();
        assert!(matches!(err, PlanError::Immutable(_, PlanState::Approved)));
    }

    #[test]
    fn test_supersede_creates_new_draft() {
        let store = PlanStore::new();
        let session = session();
        let task_id = Uuid::new_v4();
        let plan = store.create_draft(
            &session,
            task_id,
            PlanType::PatchPlan,
            serde_json::json!({ "v": 1 }),
        );
        store
            .mark_approved(&session, plan.id, "alice", None)
            .unwrap();

        let replacement = store
            .supersede(&session, plan.id, serde_json::json!({ "v": 2 }))
            .unwrap();

        let old = store.get(&session, plan.id).unwrap();
        assert_eq!(old.state, PlanState::Superseded);
        assert_eq!(replacement.state, PlanState::Draft);
        assert_eq!(replacement.task_id, task_id);
        assert_eq!(store.for_task(&session, task_id).len(), 2);
    }

    #[test]
    fn test_submit_requires_validation() {
        let store = PlanStore::new();
        let session = session();
        let plan = store.create_draft(
            &session,
            Uuid::new_v4(),
            PlanType::DrRunbook,
            serde_json::json!({}),
        );

        assert!(matches!(
            store.submit_for_approval(&session, plan.id),
            Err(PlanError::NotValidated(_))
        ));
    }

    #[test]
    fn test_phase_population() {
        let phase = PhaseSpec {
            name: "batch-1".into(),
            phase_type: PhaseType::Patch,
            target_image: None,
            assets: vec!["i-1".into(), "i-2".into()],
            asset_count: Some(99),
            wait_time: None,
            health_checks: vec![],
        };
        assert_eq!(phase.asset_population(), 2); // resolved assets win

        let unresolved = PhaseSpec {
            assets: vec![],
            ..phase
        };
        assert_eq!(unresolved.asset_population(), 99);
    }
}
