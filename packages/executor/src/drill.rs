//! DR drill coordination.
//!
//! A drill runs the fixed six-phase pipeline (precheck, replication sync,
//! failover, validate, failback, postcheck) across a set of DR pairs.
//! Pair outcomes are independent: one pair failing its failover does not
//! stop the others. The maximum observed replication lag is the drill's RPO
//! indicator; the total drill duration is its RTO.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use fleetkern_audit::{AuditChain, AuditDraft, RiskLevel, ToolInvocation};
use fleetkern_engine::{ActivityOptions, DurableEngine, OrchestratorError, WorkflowContext};
use fleetkern_tenancy::{OrgId, TenantSession};

use crate::platform::PlatformError;

/// Site health as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteHealth {
    Healthy,
    Degraded,
    Down,
}

/// Replication pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStatus {
    InSync,
    Lagging,
    Broken,
}

/// A primary/DR site pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrPair {
    pub id: Uuid,
    pub org_id: OrgId,
    pub primary_site_id: String,
    pub dr_site_id: String,
    /// Tolerated data loss, minutes
    pub rpo_minutes: u64,
    /// Tolerated recovery time, minutes
    pub rto_minutes: u64,
    pub replication_status: ReplicationStatus,
    pub last_test_at: Option<DateTime<Utc>>,
}

/// Drill errors outside the orchestrator taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum DrillConfigError {
    #[error("primary and DR site must differ (both '{0}')")]
    SameSite(String),
}

impl DrPair {
    /// Build a pair; primary and DR sites must differ.
    pub fn new(
        org_id: OrgId,
        primary_site_id: impl Into<String>,
        dr_site_id: impl Into<String>,
    ) -> Result<Self, DrillConfigError> {
        let primary_site_id = primary_site_id.into();
        let dr_site_id = dr_site_id.into();
        if primary_site_id == dr_site_id {
            return Err(DrillConfigError::SameSite(primary_site_id));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            org_id,
            primary_site_id,
            dr_site_id,
            rpo_minutes: 15,
            rto_minutes: 60,
            replication_status: ReplicationStatus::InSync,
            last_test_at: None,
        })
    }
}

/// The fixed validation battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCheck {
    Connectivity,
    ServicesRunning,
    DataIntegrity,
    DnsResolution,
    LoadBalancer,
}

impl ValidationCheck {
    pub const ALL: [ValidationCheck; 5] = [
        ValidationCheck::Connectivity,
        ValidationCheck::ServicesRunning,
        ValidationCheck::DataIntegrity,
        ValidationCheck::DnsResolution,
        ValidationCheck::LoadBalancer,
    ];
}

/// Drill phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrillPhase {
    Precheck,
    ReplicationSync,
    Failover,
    Validate,
    Failback,
    Postcheck,
}

impl DrillPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Precheck => "precheck",
            Self::ReplicationSync => "replication_sync",
            Self::Failover => "failover",
            Self::Validate => "validate",
            Self::Failback => "failback",
            Self::Postcheck => "postcheck",
        }
    }
}

/// Site operations the drill needs from the platform layer.
#[async_trait]
pub trait DrSiteClient: Send + Sync {
    async fn site_health(&self, site_id: &str) -> Result<SiteHealth, PlatformError>;
    async fn replication_status(&self, pair: &DrPair) -> Result<ReplicationStatus, PlatformError>;
    /// Observed replication lag in seconds.
    async fn replication_lag_seconds(&self, pair: &DrPair) -> Result<u64, PlatformError>;
    async fn stop_writes(&self, site_id: &str) -> Result<(), PlatformError>;
    async fn final_sync(&self, pair: &DrPair) -> Result<(), PlatformError>;
    async fn promote(&self, site_id: &str) -> Result<(), PlatformError>;
    async fn swing_traffic(&self, from: &str, to: &str) -> Result<(), PlatformError>;
    async fn run_check(
        &self,
        site_id: &str,
        check: ValidationCheck,
    ) -> Result<bool, PlatformError>;
}

/// Drill policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DrillPolicy {
    /// Abort the drill when any pair fails precheck
    pub strict_precheck: bool,
    /// Live failover (production traffic) instead of a test drill; skips
    /// failback and raises the audit risk level
    pub live: bool,
}

impl DrillPolicy {
    pub fn risk_level(&self) -> RiskLevel {
        if self.live {
            RiskLevel::StateChangeProd
        } else {
            RiskLevel::StateChangeNonprod
        }
    }
}

/// Per-pair drill outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairOutcome {
    pub pair_id: Uuid,
    pub primary_site_id: String,
    pub dr_site_id: String,
    pub precheck_passed: bool,
    pub lag_seconds: Option<u64>,
    pub failover_ok: bool,
    pub validation: Vec<(ValidationCheck, bool)>,
    pub validation_passed: bool,
    pub failback_ok: Option<bool>,
    pub postcheck_passed: Option<bool>,
    /// First phase that failed for this pair, if any
    pub failed_phase: Option<DrillPhase>,
}

impl PairOutcome {
    fn ok(&self) -> bool {
        self.failed_phase.is_none()
    }
}

/// Drill status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrillStatus {
    Completed,
    PartialFailure,
    Failed,
}

/// Aggregate drill report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrillReport {
    pub id: Uuid,
    pub org_id: OrgId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: DrillStatus,
    pub sites_tested: u64,
    pub pairs_ok: u64,
    pub pairs_failed: u64,
    /// Total drill duration, seconds
    pub rto_achieved_seconds: u64,
    /// Maximum observed replication lag, seconds
    pub rpo_achieved_seconds: u64,
    pub pair_outcomes: Vec<PairOutcome>,
    pub policy: DrillPolicy,
}

/// DR drill coordinator.
pub struct DrillCoordinator {
    engine: DurableEngine,
    audit: AuditChain,
}

impl DrillCoordinator {
    pub fn new(engine: DurableEngine, audit: AuditChain) -> Self {
        Self { engine, audit }
    }

    /// Append one phase's result to the audit trail as a tool invocation.
    async fn audit_phase(
        &self,
        ctx: &WorkflowContext,
        session: &TenantSession,
        drill_id: Uuid,
        phase: DrillPhase,
        policy: &DrillPolicy,
        detail: serde_json::Value,
    ) -> Result<(), OrchestratorError> {
        let invocation = ToolInvocation::start(
            drill_id,
            format!("dr.{}", phase.name()),
            policy.risk_level(),
            detail.clone(),
        )
        .finish(true, detail.clone());

        let audit = self.audit.clone();
        let session2 = session.clone();
        let draft = AuditDraft::new(
            format!("drill.{}", phase.name()),
            "dr_drill",
            drill_id.to_string(),
        )
        .with_changes(serde_json::json!({
            "invocation": invocation,
            "detail": detail,
        }));

        ctx.activity(
            &format!("audit:drill:{}", phase.name()),
            ActivityOptions::no_retry(),
            move || {
                let audit = audit.clone();
                let session = session2.clone();
                let draft = draft.clone();
                async move {
                    audit
                        .record(&session, draft)
                        .await
                        .map(|_| ())
                        .map_err(|e| OrchestratorError::Scope(e.to_string()))
                }
            },
        )
        .await
    }

    /// Run a drill over a set of pairs.
    pub async fn run_drill(
        &self,
        session: &TenantSession,
        pairs: &[DrPair],
        client: Arc<dyn DrSiteClient>,
        policy: DrillPolicy,
        workflow_id: Uuid,
    ) -> Result<DrillReport, OrchestratorError> {
        let ctx = self.engine.context(workflow_id);
        let drill_id = ctx.unique_id();
        let started_at = ctx.now();
        let clock = std::time::Instant::now();

        tracing::warn!(
            drill_id = %drill_id,
            pairs = pairs.len(),
            live = policy.live,
            "Starting DR drill"
        );

        let mut outcomes: Vec<PairOutcome> = pairs
            .iter()
            .map(|p| PairOutcome {
                pair_id: p.id,
                primary_site_id: p.primary_site_id.clone(),
                dr_site_id: p.dr_site_id.clone(),
                precheck_passed: false,
                lag_seconds: None,
                failover_ok: false,
                validation: Vec::new(),
                validation_passed: false,
                failback_ok: None,
                postcheck_passed: None,
                failed_phase: None,
            })
            .collect();

        // Phase 1: precheck.
        for (pair, outcome) in pairs.iter().zip(outcomes.iter_mut()) {
            let passed = self
                .precheck_pair(&ctx, client.clone(), pair)
                .await
                .unwrap_or(false);
            outcome.precheck_passed = passed;
            if !passed {
                tracing::warn!(pair = %pair.id, "DR pair failed precheck");
            }
        }
        let unhealthy: Vec<Uuid> = outcomes
            .iter()
            .filter(|o| !o.precheck_passed)
            .map(|o| o.pair_id)
            .collect();
        self.audit_phase(
            &ctx,
            session,
            drill_id,
            DrillPhase::Precheck,
            &policy,
            serde_json::json!({ "unhealthy_pairs": unhealthy }),
        )
        .await?;

        if policy.strict_precheck && !unhealthy.is_empty() {
            for outcome in outcomes.iter_mut().filter(|o| !o.precheck_passed) {
                outcome.failed_phase = Some(DrillPhase::Precheck);
            }
            return Ok(self.finish_report(
                drill_id,
                session,
                started_at,
                clock,
                0,
                outcomes,
                policy,
                pairs.len(),
            ));
        }

        // Phase 2: replication sync; max lag is the drill's RPO indicator.
        let mut max_lag = 0u64;
        for (pair, outcome) in pairs.iter().zip(outcomes.iter_mut()) {
            match self.observe_lag(&ctx, client.clone(), pair).await {
                Ok(lag) => {
                    outcome.lag_seconds = Some(lag);
                    max_lag = max_lag.max(lag);
                }
                Err(_) => {
                    outcome.failed_phase = Some(DrillPhase::ReplicationSync);
                }
            }
        }
        self.audit_phase(
            &ctx,
            session,
            drill_id,
            DrillPhase::ReplicationSync,
            &policy,
            serde_json::json!({ "max_lag_seconds": max_lag }),
        )
        .await?;

        // Phase 3: failover; each pair is independent.
        for (pair, outcome) in pairs.iter().zip(outcomes.iter_mut()) {
            if outcome.failed_phase.is_some() {
                continue;
            }
            match self.failover_pair(&ctx, client.clone(), pair).await {
                Ok(()) => outcome.failover_ok = true,
                Err(err) => {
                    outcome.failed_phase = Some(DrillPhase::Failover);
                    tracing::error!(pair = %pair.id, error = %err, "Pair failover failed");
                }
            }
        }
        self.audit_phase(
            &ctx,
            session,
            drill_id,
            DrillPhase::Failover,
            &policy,
            serde_json::json!({
                "failed": outcomes.iter().filter(|o| o.failed_phase == Some(DrillPhase::Failover)).count(),
            }),
        )
        .await?;

        // Phase 4: validate the promoted DR sites.
        for (pair, outcome) in pairs.iter().zip(outcomes.iter_mut()) {
            if !outcome.failover_ok {
                continue;
            }
            let results = self.validate_pair(&ctx, client.clone(), pair).await?;
            outcome.validation_passed = results.iter().all(|(_, passed)| *passed);
            outcome.validation = results;
            if !outcome.validation_passed {
                outcome.failed_phase = Some(DrillPhase::Validate);
            }
        }
        self.audit_phase(
            &ctx,
            session,
            drill_id,
            DrillPhase::Validate,
            &policy,
            serde_json::json!({
                "validated": outcomes.iter().filter(|o| o.validation_passed).count(),
            }),
        )
        .await?;

        // Phase 5: failback (test drills only).
        if !policy.live {
            for (pair, outcome) in pairs.iter().zip(outcomes.iter_mut()) {
                if !outcome.failover_ok {
                    continue;
                }
                let ok = self.failback_pair(&ctx, client.clone(), pair).await.is_ok();
                outcome.failback_ok = Some(ok);
                if !ok && outcome.failed_phase.is_none() {
                    outcome.failed_phase = Some(DrillPhase::Failback);
                }
            }
            self.audit_phase(
                &ctx,
                session,
                drill_id,
                DrillPhase::Failback,
                &policy,
                serde_json::json!({}),
            )
            .await?;
        }

        // Phase 6: postcheck. Primary active, DR standby, replication
        // healthy.
        for (pair, outcome) in pairs.iter().zip(outcomes.iter_mut()) {
            if outcome.failed_phase.is_some() || (policy.live && !outcome.failover_ok) {
                continue;
            }
            let passed = self
                .postcheck_pair(&ctx, client.clone(), pair, policy.live)
                .await
                .unwrap_or(false);
            outcome.postcheck_passed = Some(passed);
            if !passed {
                outcome.failed_phase = Some(DrillPhase::Postcheck);
            }
        }
        self.audit_phase(
            &ctx,
            session,
            drill_id,
            DrillPhase::Postcheck,
            &policy,
            serde_json::json!({}),
        )
        .await?;

        Ok(self.finish_report(
            drill_id,
            session,
            started_at,
            clock,
            max_lag,
            outcomes,
            policy,
            pairs.len(),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_report(
        &self,
        drill_id: Uuid,
        session: &TenantSession,
        started_at: DateTime<Utc>,
        clock: std::time::Instant,
        max_lag: u64,
        pair_outcomes: Vec<PairOutcome>,
        policy: DrillPolicy,
        pair_count: usize,
    ) -> DrillReport {
        let pairs_ok = pair_outcomes.iter().filter(|o| o.ok()).count() as u64;
        let pairs_failed = pair_outcomes.len() as u64 - pairs_ok;
        let status = if pairs_failed == 0 {
            DrillStatus::Completed
        } else if pairs_ok > 0 {
            DrillStatus::PartialFailure
        } else {
            DrillStatus::Failed
        };

        let report = DrillReport {
            id: drill_id,
            org_id: session.org_id(),
            started_at,
            finished_at: Utc::now(),
            status,
            sites_tested: pair_count as u64 * 2,
            pairs_ok,
            pairs_failed,
            rto_achieved_seconds: clock.elapsed().as_secs(),
            rpo_achieved_seconds: max_lag,
            pair_outcomes,
            policy,
        };

        tracing::info!(
            drill_id = %drill_id,
            status = ?report.status,
            pairs_ok = pairs_ok,
            pairs_failed = pairs_failed,
            rpo_seconds = max_lag,
            "DR drill finished"
        );
        report
    }

    async fn precheck_pair(
        &self,
        ctx: &WorkflowContext,
        client: Arc<dyn DrSiteClient>,
        pair: &DrPair,
    ) -> Result<bool, OrchestratorError> {
        let pair2 = pair.clone();
        ctx.activity(
            &format!("drill:precheck:{}", pair.id),
            ActivityOptions::default(),
            move || {
                let client = client.clone();
                let pair = pair2.clone();
                async move {
                    let primary = client
                        .site_health(&pair.primary_site_id)
                        .await
                        .map_err(|e| e.to_orchestrator())?;
                    let dr = client
                        .site_health(&pair.dr_site_id)
                        .await
                        .map_err(|e| e.to_orchestrator())?;
                    let replication = client
                        .replication_status(&pair)
                        .await
                        .map_err(|e| e.to_orchestrator())?;
                    Ok(primary == SiteHealth::Healthy
                        && dr == SiteHealth::Healthy
                        && replication == ReplicationStatus::InSync)
                }
            },
        )
        .await
    }

    async fn observe_lag(
        &self,
        ctx: &WorkflowContext,
        client: Arc<dyn DrSiteClient>,
        pair: &DrPair,
    ) -> Result<u64, OrchestratorError> {
        let pair2 = pair.clone();
        ctx.activity(
            &format!("drill:lag:{}", pair.id),
            ActivityOptions::default(),
            move || {
                let client = client.clone();
                let pair = pair2.clone();
                async move {
                    client
                        .replication_lag_seconds(&pair)
                        .await
                        .map_err(|e| e.to_orchestrator())
                }
            },
        )
        .await
    }

    /// Stop writes, final-sync, promote DR, swing traffic.
    async fn failover_pair(
        &self,
        ctx: &WorkflowContext,
        client: Arc<dyn DrSiteClient>,
        pair: &DrPair,
    ) -> Result<(), OrchestratorError> {
        let pair2 = pair.clone();
        ctx.activity(
            &format!("drill:failover:{}", pair.id),
            ActivityOptions::default(),
            move || {
                let client = client.clone();
                let pair = pair2.clone();
                async move {
                    client
                        .stop_writes(&pair.primary_site_id)
                        .await
                        .map_err(|e| e.to_orchestrator())?;
                    client
                        .final_sync(&pair)
                        .await
                        .map_err(|e| e.to_orchestrator())?;
                    client
                        .promote(&pair.dr_site_id)
                        .await
                        .map_err(|e| e.to_orchestrator())?;
                    client
                        .swing_traffic(&pair.primary_site_id, &pair.dr_site_id)
                        .await
                        .map_err(|e| e.to_orchestrator())?;
                    Ok(())
                }
            },
        )
        .await
    }

    async fn validate_pair(
        &self,
        ctx: &WorkflowContext,
        client: Arc<dyn DrSiteClient>,
        pair: &DrPair,
    ) -> Result<Vec<(ValidationCheck, bool)>, OrchestratorError> {
        let pair2 = pair.clone();
        ctx.activity(
            &format!("drill:validate:{}", pair.id),
            ActivityOptions::default(),
            move || {
                let client = client.clone();
                let pair = pair2.clone();
                async move {
                    let mut results = Vec::with_capacity(ValidationCheck::ALL.len());
                    for check in ValidationCheck::ALL {
                        let passed = client
                            .run_check(&pair.dr_site_id, check)
                            .await
                            .map_err(|e| e.to_orchestrator())?;
                        results.push((check, passed));
                    }
                    Ok(results)
                }
            },
        )
        .await
    }

    /// Reverse of failover: writes stop on DR, final sync back, primary
    /// promoted, traffic swung home.
    async fn failback_pair(
        &self,
        ctx: &WorkflowContext,
        client: Arc<dyn DrSiteClient>,
        pair: &DrPair,
    ) -> Result<(), OrchestratorError> {
        let pair2 = pair.clone();
        ctx.activity(
            &format!("drill:failback:{}", pair.id),
            ActivityOptions::default(),
            move || {
                let client = client.clone();
                let pair = pair2.clone();
                async move {
                    client
                        .stop_writes(&pair.dr_site_id)
                        .await
                        .map_err(|e| e.to_orchestrator())?;
                    client
                        .final_sync(&pair)
                        .await
                        .map_err(|e| e.to_orchestrator())?;
                    client
                        .promote(&pair.primary_site_id)
                        .await
                        .map_err(|e| e.to_orchestrator())?;
                    client
                        .swing_traffic(&pair.dr_site_id, &pair.primary_site_id)
                        .await
                        .map_err(|e| e.to_orchestrator())?;
                    Ok(())
                }
            },
        )
        .await
    }

    async fn postcheck_pair(
        &self,
        ctx: &WorkflowContext,
        client: Arc<dyn DrSiteClient>,
        pair: &DrPair,
        live: bool,
    ) -> Result<bool, OrchestratorError> {
        let pair2 = pair.clone();
        ctx.activity(
            &format!("drill:postcheck:{}", pair.id),
            ActivityOptions::default(),
            move || {
                let client = client.clone();
                let pair = pair2.clone();
                async move {
                    // After a live failover the DR site is the active one;
                    // after a test drill the primary must be active again.
                    let active_site = if live {
                        &pair.dr_site_id
                    } else {
                        &pair.primary_site_id
                    };
                    let health = client
                        .site_health(active_site)
                        .await
                        .map_err(|e| e.to_orchestrator())?;
                    let replication = client
                        .replication_status(&pair)
                        .await
                        .map_err(|e| e.to_orchestrator())?;
                    Ok(health == SiteHealth::Healthy
                        && replication != ReplicationStatus::Broken)
                }
            },
        )
        .await
    }
}

// ============================================================================
// MOCK SITE CLIENT
// ============================================================================

#[derive(Default)]
struct MockSiteState {
    unhealthy_sites: HashSet<String>,
    lag_by_primary: HashMap<String, u64>,
    fail_failover_primary: HashSet<String>,
    failing_checks: HashSet<(String, ValidationCheck)>,
    promoted: Vec<String>,
    traffic_swings: Vec<(String, String)>,
}

/// Deterministic site client for drills in tests.
#[derive(Clone, Default)]
pub struct MockSiteClient {
    state: Arc<Mutex<MockSiteState>>,
}

impl MockSiteClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_unhealthy(&self, site_id: impl Into<String>) {
        self.state.lock().unhealthy_sites.insert(site_id.into());
    }

    pub fn set_lag(&self, primary_site_id: impl Into<String>, lag_seconds: u64) {
        self.state
            .lock()
            .lag_by_primary
            .insert(primary_site_id.into(), lag_seconds);
    }

    pub fn fail_failover(&self, primary_site_id: impl Into<String>) {
        self.state
            .lock()
            .fail_failover_primary
            .insert(primary_site_id.into());
    }

    pub fn fail_check(&self, site_id: impl Into<String>, check: ValidationCheck) {
        self.state
            .lock()
            .failing_checks
            .insert((site_id.into(), check));
    }

    pub fn promotions(&self) -> Vec<String> {
        self.state.lock().promoted.clone()
    }

    pub fn traffic_swings(&self) -> Vec<(String, String)> {
        self.state.lock().traffic_swings.clone()
    }
}

#[async_trait]
impl DrSiteClient for MockSiteClient {
    async fn site_health(&self, site_id: &str) -> Result<SiteHealth, PlatformError> {
        if self.state.lock().unhealthy_sites.contains(site_id) {
            Ok(SiteHealth::Degraded)
        } else {
            Ok(SiteHealth::Healthy)
        }
    }

    async fn replication_status(
        &self,
        _pair: &DrPair,
    ) -> Result<ReplicationStatus, PlatformError> {
        Ok(ReplicationStatus::InSync)
    }

    async fn replication_lag_seconds(&self, pair: &DrPair) -> Result<u64, PlatformError> {
        Ok(self
            .state
            .lock()
            .lag_by_primary
            .get(&pair.primary_site_id)
            .copied()
            .unwrap_or(0))
    }

    async fn stop_writes(&self, _site_id: &str) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn final_sync(&self, pair: &DrPair) -> Result<(), PlatformError> {
        if self
            .state
            .lock()
            .fail_failover_primary
            .contains(&pair.primary_site_id)
        {
            return Err(PlatformError::Provider(format!(
                "final sync failed for {}",
                pair.primary_site_id
            )));
        }
        Ok(())
    }

    async fn promote(&self, site_id: &str) -> Result<(), PlatformError> {
        self.state.lock().promoted.push(site_id.to_string());
        Ok(())
    }

    async fn swing_traffic(&self, from: &str, to: &str) -> Result<(), PlatformError> {
        self.state
            .lock()
            .traffic_swings
            .push((from.to_string(), to.to_string()));
        Ok(())
    }

    async fn run_check(
        &self,
        site_id: &str,
        check: ValidationCheck,
    ) -> Result<bool, PlatformError> {
        Ok(!self
            .state
            .lock()
            .failing_checks
            .contains(&(site_id.to_string(), check)))
    }
}
