//! Runs.
//!
//! A run is the execution-side record of one plan: current phase, phase
//! bookkeeping, asset counters and the user-visible failure surface. The
//! task's coarse lifecycle state stays on the task; nothing is remapped
//! between the two.
//!
//! All mutations overwrite absolute values (per-phase counters, rollback
//! totals), so a workflow replayed after a crash converges on the same
//! record instead of double-counting.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use fleetkern_engine::RunFailure;
use fleetkern_tenancy::{EnvironmentName, OrgId, TenantSession};

/// Run states (execution detail).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Executing,
    Paused,
    Completed,
    RolledBack,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::RolledBack | Self::Failed)
    }
}

/// Asset counters (campaign-level aggregate or per-phase).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub total_assets: u64,
    pub successful: u64,
    pub failed: u64,
    pub rolled_back: u64,
    pub skipped: u64,
}

/// One run of one plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Run id
    pub id: Uuid,
    /// Plan being executed
    pub plan_id: Uuid,
    /// Owning task
    pub task_id: Uuid,
    /// Owning organization
    pub org_id: OrgId,
    /// Target environment
    pub environment: EnvironmentName,
    /// Who started the run
    pub initiated_by: String,
    /// Phase currently executing
    pub current_phase: Option<String>,
    /// Completed phase names, in order
    pub phases_completed: Vec<String>,
    /// Phases still to run, in order
    pub phases_remaining: Vec<String>,
    /// Progress percent (100 exactly when completed)
    pub percent_complete: f64,
    /// Execution state
    pub state: RunState,
    /// Per-phase counters, keyed by phase name
    pub phase_metrics: HashMap<String, RunMetrics>,
    /// Successes reclassified by a rollback
    rollback_reclassified: u64,
    /// Assets rolled back
    rollback_count: u64,
    /// Campaign-level aggregate, derived from the per-phase counters
    pub metrics: RunMetrics,
    /// User-visible failure, on failure
    pub failure: Option<RunFailure>,
    /// Audit rows written for this run
    pub audit_refs: Vec<Uuid>,
    /// Start timestamp
    pub started_at: DateTime<Utc>,
    /// Terminal timestamp
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    fn recompute_percent(&mut self) {
        let done = self.phases_completed.len() as f64;
        let total = done + self.phases_remaining.len() as f64;
        self.percent_complete = if total == 0.0 {
            100.0
        } else {
            (done / total * 100.0 * 100.0).round() / 100.0
        };
    }

    fn recompute_metrics(&mut self) {
        let mut aggregate = RunMetrics::default();
        for phase in self.phase_metrics.values() {
            aggregate.total_assets += phase.total_assets;
            aggregate.successful += phase.successful;
            aggregate.failed += phase.failed;
            aggregate.skipped += phase.skipped;
        }
        aggregate.successful = aggregate.successful.saturating_sub(self.rollback_reclassified);
        aggregate.rolled_back = self.rollback_count;
        self.metrics = aggregate;
    }
}

/// Tenant-partitioned run store.
#[derive(Clone, Default)]
pub struct RunStore {
    runs: Arc<RwLock<HashMap<OrgId, HashMap<Uuid, Run>>>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queued run for a plan.
    pub fn create(
        &self,
        session: &TenantSession,
        run_id: Uuid,
        plan_id: Uuid,
        task_id: Uuid,
        environment: EnvironmentName,
        phases: Vec<String>,
    ) -> Run {
        let run = Run {
            id: run_id,
            plan_id,
            task_id,
            org_id: session.org_id(),
            environment,
            initiated_by: session.actor().id.clone(),
            current_phase: None,
            phases_completed: Vec::new(),
            phases_remaining: phases,
            percent_complete: 0.0,
            state: RunState::Queued,
            phase_metrics: HashMap::new(),
            rollback_reclassified: 0,
            rollback_count: 0,
            metrics: RunMetrics::default(),
            failure: None,
            audit_refs: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        };
        self.runs
            .write()
            .entry(session.org_id())
            .or_default()
            .insert(run.id, run.clone());
        run
    }

    /// Fetch a run.
    pub fn get(&self, session: &TenantSession, run_id: Uuid) -> Option<Run> {
        self.runs
            .read()
            .get(&session.org_id())
            .and_then(|m| m.get(&run_id))
            .cloned()
    }

    fn mutate<F>(&self, session: &TenantSession, run_id: Uuid, f: F) -> Option<Run>
    where
        F: FnOnce(&mut Run),
    {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(&session.org_id())
            .and_then(|m| m.get_mut(&run_id))?;
        f(run);
        Some(run.clone())
    }

    /// Mark the run executing.
    pub fn begin(&self, session: &TenantSession, run_id: Uuid) -> Option<Run> {
        self.mutate(session, run_id, |run| {
            run.state = RunState::Executing;
        })
    }

    /// Enter a phase.
    pub fn enter_phase(
        &self,
        session: &TenantSession,
        run_id: Uuid,
        phase: &str,
    ) -> Option<Run> {
        self.mutate(session, run_id, |run| {
            run.current_phase = Some(phase.to_string());
        })
    }

    /// Complete the current phase and advance the bookkeeping. Idempotent:
    /// completing an already-completed phase changes nothing.
    pub fn complete_phase(
        &self,
        session: &TenantSession,
        run_id: Uuid,
        phase: &str,
    ) -> Option<Run> {
        self.mutate(session, run_id, |run| {
            run.phases_remaining.retain(|p| p != phase);
            if !run.phases_completed.iter().any(|p| p == phase) {
                run.phases_completed.push(phase.to_string());
            }
            run.current_phase = None;
            run.recompute_percent();
        })
    }

    /// Overwrite one phase's counters with its current absolute totals and
    /// re-derive the campaign aggregate.
    pub fn set_phase_metrics(
        &self,
        session: &TenantSession,
        run_id: Uuid,
        phase: &str,
        metrics: RunMetrics,
    ) -> Option<Run> {
        self.mutate(session, run_id, |run| {
            run.phase_metrics.insert(phase.to_string(), metrics);
            run.recompute_metrics();
        })
    }

    /// Record rollback totals: how many recorded successes were
    /// reclassified and how many assets rolled back. Absolute values.
    pub fn set_rollback(
        &self,
        session: &TenantSession,
        run_id: Uuid,
        reclassified_successes: u64,
        rolled_back: u64,
    ) -> Option<Run> {
        self.mutate(session, run_id, |run| {
            run.rollback_reclassified = reclassified_successes;
            run.rollback_count = rolled_back;
            run.recompute_metrics();
        })
    }

    /// Link an audit row to the run. Idempotent.
    pub fn add_audit_ref(
        &self,
        session: &TenantSession,
        run_id: Uuid,
        audit_id: Uuid,
    ) -> Option<Run> {
        self.mutate(session, run_id, |run| {
            if !run.audit_refs.contains(&audit_id) {
                run.audit_refs.push(audit_id);
            }
        })
    }

    /// Finish the run in a terminal state. Completion forces
    /// `percent_complete = 100`; every other terminal state freezes the
    /// bookkeeping as-is.
    pub fn finish(
        &self,
        session: &TenantSession,
        run_id: Uuid,
        state: RunState,
        failure: Option<RunFailure>,
    ) -> Option<Run> {
        self.mutate(session, run_id, |run| {
            run.state = state;
            run.failure = failure;
            run.finished_at = Some(Utc::now());
            run.current_phase = None;
            if state == RunState::Completed {
                run.percent_complete = 100.0;
            }
        })
    }

    /// Pause an executing run.
    pub fn pause(&self, session: &TenantSession, run_id: Uuid) -> Option<Run> {
        self.mutate(session, run_id, |run| {
            if run.state == RunState::Executing {
                run.state = RunState::Paused;
            }
        })
    }

    /// Runs belonging to a task.
    pub fn for_task(&self, session: &TenantSession, task_id: Uuid) -> Vec<Run> {
        self.runs
            .read()
            .get(&session.org_id())
            .map(|m| {
                m.values()
                    .filter(|r| r.task_id == task_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetkern_tenancy::{
        ActorIdentity, OrganizationDirectory, RlsGateway, TenantContext,
    };

    fn setup() -> (RunStore, TenantSession) {
        let dir = OrganizationDirectory::new();
        let org = dir.register("acme", "Acme").unwrap();
        let session = RlsGateway::new(dir)
            .session(&TenantContext::new(org.id, ActorIdentity::user("runner")))
            .unwrap();
        (RunStore::new(), session)
    }

    fn new_run(store: &RunStore, session: &TenantSession, phases: &[&str]) -> Run {
        store.create(
            session,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            EnvironmentName::Staging,
            phases.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_percent_tracks_phases() {
        let (store, session) = setup();
        let run = new_run(&store, &session, &["preflight", "patch", "validate"]);
        store.begin(&session, run.id).unwrap();

        let run = store.complete_phase(&session, run.id, "preflight").unwrap();
        assert_eq!(run.percent_complete, 33.33);

        let run = store.complete_phase(&session, run.id, "patch").unwrap();
        assert_eq!(run.percent_complete, 66.67);

        let run = store.complete_phase(&session, run.id, "validate").unwrap();
        assert_eq!(run.percent_complete, 100.0);
    }

    #[test]
    fn test_complete_phase_idempotent() {
        let (store, session) = setup();
        let run = new_run(&store, &session, &["a", "b"]);

        store.complete_phase(&session, run.id, "a").unwrap();
        let run = store.complete_phase(&session, run.id, "a").unwrap();
        assert_eq!(run.phases_completed, vec!["a".to_string()]);
        assert_eq!(run.percent_complete, 50.0);
    }

    #[test]
    fn test_completed_run_is_100_percent() {
        let (store, session) = setup();
        let run = new_run(&store, &session, &["a", "b"]);
        store.begin(&session, run.id).unwrap();
        store.complete_phase(&session, run.id, "a").unwrap();

        let run = store
            .finish(&session, run.id, RunState::Completed, None)
            .unwrap();
        assert_eq!(run.percent_complete, 100.0);
        assert!(run.state.is_terminal());
    }

    #[test]
    fn test_rolled_back_keeps_partial_percent() {
        let (store, session) = setup();
        let run = new_run(&store, &session, &["a", "b"]);
        store.begin(&session, run.id).unwrap();
        store.complete_phase(&session, run.id, "a").unwrap();

        let run = store
            .finish(&session, run.id, RunState::RolledBack, None)
            .unwrap();
        assert_eq!(run.percent_complete, 50.0);
    }

    #[test]
    fn test_phase_metrics_aggregate() {
        let (store, session) = setup();
        let run = new_run(&store, &session, &["p1", "p2"]);

        store
            .set_phase_metrics(
                &session,
                run.id,
                "p1",
                RunMetrics {
                    total_assets: 3,
                    successful: 3,
                    ..Default::default()
                },
            )
            .unwrap();
        let run = store
            .set_phase_metrics(
                &session,
                run.id,
                "p2",
                RunMetrics {
                    total_assets: 3,
                    successful: 1,
                    failed: 2,
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(run.metrics.total_assets, 6);
        assert_eq!(run.metrics.successful, 4);
        assert_eq!(run.metrics.failed, 2);
    }

    #[test]
    fn test_metrics_overwrite_is_idempotent() {
        let (store, session) = setup();
        let run = new_run(&store, &session, &["p1"]);
        let metrics = RunMetrics {
            total_assets: 3,
            successful: 2,
            failed: 1,
            ..Default::default()
        };

        store.set_phase_metrics(&session, run.id, "p1", metrics).unwrap();
        let run = store
            .set_phase_metrics(&session, run.id, "p1", metrics)
            .unwrap();

        // Replayed writes converge instead of double counting.
        assert_eq!(run.metrics.total_assets, 3);
    }

    #[test]
    fn test_rollback_reclassifies_successes() {
        let (store, session) = setup();
        let run = new_run(&store, &session, &["p1", "p2"]);

        store
            .set_phase_metrics(
                &session,
                run.id,
                "p1",
                RunMetrics {
                    total_assets: 3,
                    successful: 3,
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .set_phase_metrics(
                &session,
                run.id,
                "p2",
                RunMetrics {
                    total_assets: 3,
                    successful: 1,
                    failed: 2,
                    ..Default::default()
                },
            )
            .unwrap();

        // Phase-scope rollback of p2: its one success reclassifies, three
        // assets restored.
        let run = store.set_rollback(&session, run.id, 1, 3).unwrap();
        assert_eq!(run.metrics.successful, 3);
        assert_eq!(run.metrics.failed, 2);
        assert_eq!(run.metrics.rolled_back, 3);
    }
}
