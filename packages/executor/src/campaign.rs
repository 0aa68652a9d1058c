//! Phased campaign execution.
//!
//! Drives an approved plan phase by phase: validator-only phases run their
//! checks and proceed; patch phases snapshot, fan out per asset, run the
//! health battery at the boundary, hold the durable wait gate, and trigger
//! rollback when the failure rate breaches the plan's threshold, a health
//! check fails, or an explicit rollback signal arrives.
//!
//! Every externally-visible step is an activity on the durable engine, so a
//! resumed worker replays completed work instead of re-executing it, and an
//! elapsed wait gate is not re-slept.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use fleetkern_audit::{AuditChain, AuditDraft, RiskLevel};
use fleetkern_engine::{
    ActivityOptions, DurableEngine, OrchestratorError, RunFailure, WorkflowContext,
};
use fleetkern_registry::AssetRegistry;
use fleetkern_tasks::{
    parse_duration_literal, PhaseSpec, PhaseType, Plan, RollbackScope, RollbackTrigger,
    Run, RunMetrics, RunState, RunStore, Task,
};
use fleetkern_tenancy::TenantSession;

use crate::health::{run_checks, AlwaysHealthy, HealthCheckOutcome, HealthProbe};
use crate::platform::{ActionReceipt, PlatformClient, SnapshotReceipt};
use crate::rollback::{rollback_assets, RollbackReport};

/// Signal name that requests a campaign rollback.
pub const ROLLBACK_SIGNAL: &str = "rollback";

/// Terminal campaign classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Every phase completed with no asset failures
    Completed,
    /// Some assets failed but no rollback triggered
    PartialFailure,
    /// A rollback trigger fired and rollback ran
    RolledBack,
    /// Unrecoverable error or cancellation without rollback
    Failed,
}

/// Per-phase result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub name: String,
    pub phase_type: PhaseType,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub health_passed: bool,
    pub health_outcomes: Vec<HealthCheckOutcome>,
    pub rolled_back: bool,
}

/// Final campaign outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignOutcome {
    pub run_id: Uuid,
    pub status: CampaignStatus,
    pub phase_results: Vec<PhaseResult>,
    pub metrics: RunMetrics,
    pub rollback: Option<RollbackReport>,
    pub failure: Option<RunFailure>,
}

/// The phased executor.
pub struct PhasedExecutor {
    engine: DurableEngine,
    audit: AuditChain,
    runs: RunStore,
    assets: AssetRegistry,
    probe: Arc<dyn HealthProbe>,
}

impl PhasedExecutor {
    pub fn new(
        engine: DurableEngine,
        audit: AuditChain,
        runs: RunStore,
        assets: AssetRegistry,
    ) -> Self {
        Self {
            engine,
            audit,
            runs,
            assets,
            probe: Arc::new(AlwaysHealthy),
        }
    }

    /// Replace the health probe seam.
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// The engine driving this executor (for signals and cancellation).
    pub fn engine(&self) -> &DurableEngine {
        &self.engine
    }

    /// Record an audit row exactly once per workflow step.
    async fn audit_event(
        &self,
        ctx: &WorkflowContext,
        session: &TenantSession,
        label: &str,
        draft: AuditDraft,
    ) -> Result<Uuid, OrchestratorError> {
        let audit = self.audit.clone();
        let session = session.clone();
        ctx.activity(label, ActivityOptions::no_retry(), move || {
            let audit = audit.clone();
            let session = session.clone();
            let draft = draft.clone();
            async move {
                audit
                    .record(&session, draft)
                    .await
                    .map(|entry| entry.id)
                    .map_err(|e| OrchestratorError::Scope(e.to_string()))
            }
        })
        .await
    }

    /// Execute an approved plan as a phased campaign.
    ///
    /// `workflow_id` keys the durable journal: re-invoking with the same id
    /// after a crash resumes from the last checkpoint.
    pub async fn execute(
        &self,
        session: &TenantSession,
        task: &Task,
        plan: &Plan,
        client: Arc<dyn PlatformClient>,
        workflow_id: Uuid,
    ) -> Result<CampaignOutcome, OrchestratorError> {
        let spec = plan
            .spec
            .clone()
            .ok_or_else(|| OrchestratorError::Validation("plan has no validated spec".into()))?;

        let ctx = self.engine.context(workflow_id);
        let deadline =
            Instant::now() + Duration::from_secs(task.execution_policy.timeout_minutes * 60);
        let risk = if spec.environment.is_production() {
            RiskLevel::StateChangeProd
        } else {
            RiskLevel::StateChangeNonprod
        };

        let run_id = ctx.unique_id();
        if self.runs.get(session, run_id).is_none() {
            self.runs.create(
                session,
                run_id,
                plan.id,
                task.id,
                spec.environment,
                spec.phases.iter().map(|p| p.name.clone()).collect(),
            );
        }
        self.runs.begin(session, run_id);

        let start_ref = self
            .audit_event(
                &ctx,
                session,
                "audit:campaign_start",
                AuditDraft::new("campaign.start", "run", run_id.to_string()).with_changes(
                    serde_json::json!({
                        "task_id": task.id,
                        "plan_id": plan.id,
                        "environment": spec.environment.to_string(),
                        "phases": spec.phases.len(),
                        "risk_level": risk.to_string(),
                    }),
                ),
            )
            .await?;
        self.runs.add_audit_ref(session, run_id, start_ref);

        // First occurrence binds an asset's snapshot; later phases reuse it.
        let mut snapshots: HashMap<String, String> = HashMap::new();
        // Every asset dispatched so far, for campaign-scoped rollback.
        let mut campaign_assets: Vec<String> = Vec::new();
        let mut phase_results: Vec<PhaseResult> = Vec::new();
        let mut any_failure = false;

        for phase in &spec.phases {
            if Instant::now() > deadline {
                let failure = RunFailure::from_error(&OrchestratorError::Timeout(
                    task.execution_policy.timeout_minutes * 60,
                ))
                .with_remediation("raise execution_policy.timeout_minutes or split the plan");
                self.runs
                    .finish(session, run_id, RunState::Failed, Some(failure.clone()));
                return Ok(self.outcome(
                    session,
                    run_id,
                    CampaignStatus::Failed,
                    phase_results,
                    None,
                    Some(failure),
                ));
            }

            self.runs.enter_phase(session, run_id, &phase.name);
            self.audit_event(
                &ctx,
                session,
                &format!("audit:phase_start:{}", phase.name),
                AuditDraft::new("campaign.phase_start", "run", run_id.to_string()).with_changes(
                    serde_json::json!({
                        "phase": phase.name,
                        "type": phase.phase_type,
                        "assets": phase.asset_population(),
                    }),
                ),
            )
            .await?;

            let mut completed = 0u64;
            let mut failed = 0u64;
            let mut skipped = 0u64;
            let mut phase_assets: Vec<String> = Vec::new();
            let mut cancelled_mid_phase = false;

            if !phase.phase_type.is_validator_only() {
                for (index, asset) in phase.assets.iter().enumerate() {
                    // Cancellation: dispatched assets complete, new dispatch
                    // halts.
                    if ctx.is_cancelled() {
                        skipped += (phase.assets.len() - index) as u64;
                        cancelled_mid_phase = true;
                        break;
                    }

                    if !snapshots.contains_key(asset) {
                        match self.snapshot_asset(&ctx, client.clone(), asset).await {
                            Ok(receipt) => {
                                snapshots.insert(asset.clone(), receipt.snapshot_id);
                            }
                            Err(err) => {
                                tracing::error!(asset = %asset, error = %err, "Snapshot failed, asset skipped");
                                failed += 1;
                                phase_assets.push(asset.clone());
                                campaign_assets.push(asset.clone());
                                self.runs.set_phase_metrics(
                                    session,
                                    run_id,
                                    &phase.name,
                                    RunMetrics {
                                        total_assets: completed + failed + skipped,
                                        successful: completed,
                                        failed,
                                        skipped,
                                        ..Default::default()
                                    },
                                );
                                continue;
                            }
                        }
                    }

                    let result = self
                        .dispatch_asset(&ctx, client.clone(), phase, asset, run_id)
                        .await;
                    let success = result.is_ok();
                    phase_assets.push(asset.clone());
                    campaign_assets.push(asset.clone());

                    if success {
                        completed += 1;
                        if let Some(target) = &phase.target_image {
                            if let Some((_, version)) = target.split_once(':') {
                                if let Some(existing) = self.find_platform(session, asset) {
                                    self.assets.record_version(
                                        session,
                                        existing,
                                        asset,
                                        version,
                                    );
                                }
                            }
                        }
                    } else {
                        failed += 1;
                    }

                    let invocation_ref = self
                        .audit_event(
                            &ctx,
                            session,
                            &format!("audit:patch:{}:{asset}", phase.name),
                            AuditDraft::new("campaign.patch", "asset", asset.clone())
                                .with_changes(serde_json::json!({
                                    "phase": phase.name,
                                    "run_id": run_id,
                                    "success": success,
                                    "detail": match &result {
                                        Ok(receipt) => serde_json::json!({
                                            "execution_id": receipt.execution_id,
                                        }),
                                        Err(err) => serde_json::json!({
                                            "error_code": err.code(),
                                            "error": err.to_string(),
                                        }),
                                    },
                                })),
                        )
                        .await?;
                    self.runs.add_audit_ref(session, run_id, invocation_ref);

                    // Counters carry absolute phase totals, so a replayed
                    // worker converges instead of double counting.
                    self.runs.set_phase_metrics(
                        session,
                        run_id,
                        &phase.name,
                        RunMetrics {
                            total_assets: completed + failed + skipped,
                            successful: completed,
                            failed,
                            skipped,
                            ..Default::default()
                        },
                    );
                }

                if skipped > 0 {
                    self.runs.set_phase_metrics(
                        session,
                        run_id,
                        &phase.name,
                        RunMetrics {
                            total_assets: completed + failed + skipped,
                            successful: completed,
                            failed,
                            skipped,
                            ..Default::default()
                        },
                    );
                }
            }

            // Health battery at the phase boundary.
            let (health_passed, health_outcomes) = self.run_health(&ctx, phase).await?;
            self.audit_event(
                &ctx,
                session,
                &format!("audit:health:{}", phase.name),
                AuditDraft::new("campaign.health", "run", run_id.to_string()).with_changes(
                    serde_json::json!({
                        "phase": phase.name,
                        "passed": health_passed,
                        "checks": health_outcomes,
                    }),
                ),
            )
            .await?;

            // Durable wait gate; worker restarts do not re-sleep.
            if let Some(wait) = &phase.wait_time {
                match parse_duration_literal(wait) {
                    Some(duration) => ctx.sleep(duration).await,
                    None => {
                        tracing::warn!(
                            phase = %phase.name,
                            wait_time = %wait,
                            "Unparsable wait_time treated as zero"
                        );
                    }
                }
            }

            // Auto-rollback triggers.
            let dispatched = completed + failed;
            let failure_rate = if dispatched == 0 {
                0.0
            } else {
                failed as f64 / dispatched as f64
            };
            let triggers = &spec.rollback.automatic_triggers;
            let error_rate_breach = triggers.contains(&RollbackTrigger::ErrorRate)
                && failure_rate > spec.rollback.max_error_rate;
            let health_breach =
                triggers.contains(&RollbackTrigger::HealthCheckFailure) && !health_passed;
            let signalled = ctx.try_signal(ROLLBACK_SIGNAL).is_some();
            let cancellation_rollback = cancelled_mid_phase && !triggers.is_empty();

            if error_rate_breach || health_breach || signalled || cancellation_rollback {
                let reason = if error_rate_breach {
                    format!(
                        "failure rate {failure_rate:.2} exceeds {:.2}",
                        spec.rollback.max_error_rate
                    )
                } else if health_breach {
                    "health checks failed".to_string()
                } else if signalled {
                    "explicit rollback signal".to_string()
                } else {
                    "cancelled during fan-out".to_string()
                };

                let scope_assets: Vec<String> = match spec.rollback.scope {
                    RollbackScope::Phase => phase_assets.clone(),
                    RollbackScope::Campaign => campaign_assets.clone(),
                };
                // Derived from the per-phase totals, which are stable under
                // replay (the aggregate already nets out prior rollbacks).
                let reclassified = match spec.rollback.scope {
                    RollbackScope::Phase => completed,
                    RollbackScope::Campaign => self
                        .runs
                        .get(session, run_id)
                        .map(|r| r.phase_metrics.values().map(|m| m.successful).sum())
                        .unwrap_or(0),
                };

                let report =
                    rollback_assets(&ctx, client.clone(), &snapshots, &scope_assets, &reason)
                        .await;
                self.runs.set_rollback(
                    session,
                    run_id,
                    reclassified,
                    report.restored + report.reverted,
                );

                let rollback_ref = self
                    .audit_event(
                        &ctx,
                        session,
                        &format!("audit:rollback:{}", phase.name),
                        AuditDraft::new("campaign.rollback", "run", run_id.to_string())
                            .with_changes(serde_json::json!({
                                "phase": phase.name,
                                "reason": reason,
                                "scope": spec.rollback.scope,
                                "report": report,
                            })),
                    )
                    .await?;
                self.runs.add_audit_ref(session, run_id, rollback_ref);

                phase_results.push(PhaseResult {
                    name: phase.name.clone(),
                    phase_type: phase.phase_type,
                    completed,
                    failed,
                    skipped,
                    health_passed,
                    health_outcomes,
                    rolled_back: true,
                });

                self.runs
                    .finish(session, run_id, RunState::RolledBack, None);
                self.audit_event(
                    &ctx,
                    session,
                    "audit:campaign_rolled_back",
                    AuditDraft::new("campaign.rolled_back", "run", run_id.to_string())
                        .with_changes(serde_json::json!({ "reason": reason })),
                )
                .await?;

                return Ok(self.outcome(
                    session,
                    run_id,
                    CampaignStatus::RolledBack,
                    phase_results,
                    Some(report),
                    None,
                ));
            }

            if cancelled_mid_phase {
                let failure = RunFailure::from_error(&OrchestratorError::Cancelled);
                self.runs
                    .finish(session, run_id, RunState::Failed, Some(failure.clone()));
                phase_results.push(PhaseResult {
                    name: phase.name.clone(),
                    phase_type: phase.phase_type,
                    completed,
                    failed,
                    skipped,
                    health_passed,
                    health_outcomes,
                    rolled_back: false,
                });
                return Ok(self.outcome(
                    session,
                    run_id,
                    CampaignStatus::Failed,
                    phase_results,
                    None,
                    Some(failure),
                ));
            }

            // Phase complete (empty phases still emit start and complete).
            self.runs.complete_phase(session, run_id, &phase.name);
            self.audit_event(
                &ctx,
                session,
                &format!("audit:phase_complete:{}", phase.name),
                AuditDraft::new("campaign.phase_complete", "run", run_id.to_string())
                    .with_changes(serde_json::json!({
                        "phase": phase.name,
                        "completed": completed,
                        "failed": failed,
                        "skipped": skipped,
                    })),
            )
            .await?;

            any_failure |= failed > 0;
            phase_results.push(PhaseResult {
                name: phase.name.clone(),
                phase_type: phase.phase_type,
                completed,
                failed,
                skipped,
                health_passed,
                health_outcomes,
                rolled_back: false,
            });
        }

        self.runs.finish(session, run_id, RunState::Completed, None);
        let complete_ref = self
            .audit_event(
                &ctx,
                session,
                "audit:campaign_complete",
                AuditDraft::new("campaign.complete", "run", run_id.to_string()).with_changes(
                    serde_json::json!({
                        "partial_failure": any_failure,
                    }),
                ),
            )
            .await?;
        self.runs.add_audit_ref(session, run_id, complete_ref);

        let status = if any_failure {
            CampaignStatus::PartialFailure
        } else {
            CampaignStatus::Completed
        };
        Ok(self.outcome(session, run_id, status, phase_results, None, None))
    }

    fn outcome(
        &self,
        session: &TenantSession,
        run_id: Uuid,
        status: CampaignStatus,
        phase_results: Vec<PhaseResult>,
        rollback: Option<RollbackReport>,
        failure: Option<RunFailure>,
    ) -> CampaignOutcome {
        let metrics = self
            .runs
            .get(session, run_id)
            .map(|r| r.metrics)
            .unwrap_or_default();
        CampaignOutcome {
            run_id,
            status,
            phase_results,
            metrics,
            rollback,
            failure,
        }
    }

    /// The run record for an executed campaign.
    pub fn run(&self, session: &TenantSession, run_id: Uuid) -> Option<Run> {
        self.runs.get(session, run_id)
    }

    async fn snapshot_asset(
        &self,
        ctx: &WorkflowContext,
        client: Arc<dyn PlatformClient>,
        asset: &str,
    ) -> Result<SnapshotReceipt, OrchestratorError> {
        let asset2 = asset.to_string();
        ctx.activity(
            &format!("snapshot:{asset}"),
            ActivityOptions::default(),
            move || {
                let client = client.clone();
                let asset = asset2.clone();
                async move {
                    client
                        .snapshot_asset(&asset)
                        .await
                        .map_err(|e| e.to_orchestrator())
                }
            },
        )
        .await
    }

    async fn dispatch_asset(
        &self,
        ctx: &WorkflowContext,
        client: Arc<dyn PlatformClient>,
        phase: &PhaseSpec,
        asset: &str,
        run_id: Uuid,
    ) -> Result<ActionReceipt, OrchestratorError> {
        let action = if phase.target_image.is_some() {
            "reimage"
        } else {
            "patch"
        };
        let client2 = client.clone();
        let asset2 = asset.to_string();
        let target = phase.target_image.clone();
        let params = serde_json::json!({
            "idempotency_key": format!("{asset}:{action}:{run_id}"),
            "phase": phase.name,
        });

        ctx.activity(
            &format!("{action}:{}:{asset}", phase.name),
            ActivityOptions::default(),
            move || {
                let client = client2.clone();
                let asset = asset2.clone();
                let target = target.clone();
                let params = params.clone();
                async move {
                    let result = match &target {
                        Some(image) => client.reimage_asset(&asset, image).await,
                        None => client.patch_asset(&asset, &params).await,
                    };
                    result.map_err(|e| e.to_orchestrator())
                }
            },
        )
        .await
    }

    async fn run_health(
        &self,
        ctx: &WorkflowContext,
        phase: &PhaseSpec,
    ) -> Result<(bool, Vec<HealthCheckOutcome>), OrchestratorError> {
        let probe = self.probe.clone();
        let checks = phase.health_checks.clone();
        ctx.activity(
            &format!("health:{}", phase.name),
            ActivityOptions::no_retry(),
            move || {
                let probe = probe.clone();
                let checks = checks.clone();
                async move { Ok(run_checks(probe.as_ref(), &checks).await) }
            },
        )
        .await
    }

    /// Resolve which platform an asset id belongs to, for version updates.
    fn find_platform(
        &self,
        session: &TenantSession,
        instance_id: &str,
    ) -> Option<fleetkern_registry::Platform> {
        use fleetkern_registry::Platform;
        for platform in [
            Platform::Aws,
            Platform::Azure,
            Platform::Gcp,
            Platform::Vsphere,
            Platform::K8s,
        ] {
            if self.assets.get(session, platform, instance_id).is_some() {
                return Some(platform);
            }
        }
        None
    }
}
