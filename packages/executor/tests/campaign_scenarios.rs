//! End-to-end campaign scenarios: task intent through approval, phased
//! execution, drift refresh and the audit chain.

use std::sync::Arc;

use uuid::Uuid;

use fleetkern_audit::AuditChain;
use fleetkern_engine::{DurableEngine, ErrorCode};
use fleetkern_executor::{CampaignStatus, MockPlatform, PhasedExecutor};
use fleetkern_registry::{
    AssetFact, AssetRegistry, DriftEngine, DriftScope, DriftStatus, ImageRegistry, Platform,
};
use fleetkern_tasks::{
    ApprovalOutcome, ExecutionPolicy, Plan, PlanStore, PlanType, PlanValidator, RunStore, Task,
    TaskLifecycle, TaskSource, TaskState, UsageDraft, UsageLimits, UsageMeter,
    PRODUCTION_APPROVER_ROLE,
};
use fleetkern_tenancy::{
    ActorIdentity, DenyReason, EnvironmentName, OrganizationDirectory, QuotaEnforcer,
    RlsGateway, TenantContext, TenantSession,
};

struct Harness {
    session: TenantSession,
    quota: QuotaEnforcer,
    assets: AssetRegistry,
    images: ImageRegistry,
    drift: DriftEngine,
    audit: AuditChain,
    runs: RunStore,
    lifecycle: TaskLifecycle,
    plans: PlanStore,
    executor: PhasedExecutor,
}

fn harness() -> Harness {
    let directory = OrganizationDirectory::new();
    let org = directory.register("acme", "Acme Corp").unwrap();
    let session = RlsGateway::new(directory)
        .session(&TenantContext::new(org.id, ActorIdentity::service("orchestrator")))
        .unwrap();

    let quota = QuotaEnforcer::new();
    let assets = AssetRegistry::new(quota.clone());
    let images = ImageRegistry::new(quota.clone());
    let drift = DriftEngine::new(quota.clone());
    let audit = AuditChain::new();
    let engine = DurableEngine::new();
    let runs = RunStore::new();
    let executor = PhasedExecutor::new(
        engine.clone(),
        audit.clone(),
        runs.clone(),
        assets.clone(),
    );

    Harness {
        session,
        quota,
        assets,
        images,
        drift,
        audit,
        runs,
        lifecycle: TaskLifecycle::new(),
        plans: PlanStore::new(),
        executor,
    }
}

fn approver(id: &str) -> ActorIdentity {
    ActorIdentity::user(id).with_roles(vec![
        "ops_approver".into(),
        PRODUCTION_APPROVER_ROLE.into(),
    ])
}

const FLEET: [&str; 6] = ["i-1", "i-2", "i-3", "i-4", "i-5", "i-6"];

/// Six running AWS assets on web-linux 2.4.0; production image 2.5.0.
fn seed_fleet(h: &Harness) {
    h.images.register(&h.session, "web-linux", "2.4.0").unwrap();
    h.images
        .mark_validated(&h.session, "web-linux", "2.4.0", true, None)
        .unwrap();
    h.images.promote(&h.session, "web-linux", "2.4.0").unwrap();

    h.images.register(&h.session, "web-linux", "2.5.0").unwrap();
    h.images
        .mark_validated(&h.session, "web-linux", "2.5.0", true, Some("sbom://web-linux-2.5.0".into()))
        .unwrap();
    h.images.promote(&h.session, "web-linux", "2.5.0").unwrap();

    for id in FLEET {
        h.assets
            .upsert(
                &h.session,
                AssetFact::new(Platform::Aws, id, "web-linux", "2.4.0")
                    .with_environment(EnvironmentName::Production),
            )
            .unwrap();
    }
}

fn patch_payload() -> serde_json::Value {
    serde_json::json!({
        "phases": [
            { "name": "preflight", "type": "preflight", "asset_count": 0 },
            {
                "name": "batch-1",
                "type": "patch",
                "target_image": "web-linux:2.5.0",
                "assets": ["i-1", "i-2", "i-3"],
                "wait_time": "5m",
                "health_checks": [
                    { "name": "http", "type": "connectivity", "target": "https://web", "timeout_secs": 30 }
                ]
            },
            {
                "name": "batch-2",
                "type": "patch",
                "target_image": "web-linux:2.5.0",
                "assets": ["i-4", "i-5", "i-6"],
                "wait_time": "5m",
                "health_checks": [
                    { "name": "http", "type": "connectivity", "target": "https://web", "timeout_secs": 30 }
                ]
            },
            { "name": "validate", "type": "validation", "asset_count": 0 }
        ],
        "rollback": {
            "max_error_rate": 0.25,
            "automatic_triggers": ["error_rate", "health_check_failure"],
            "scope": "phase"
        }
    })
}

/// Create, plan, validate and two-approve a production patch task.
fn approved_plan(h: &Harness) -> (Task, Plan) {
    let policy = ExecutionPolicy::default()
        .with_two_approvers()
        .with_approver_roles(vec!["ops_approver".into()]);

    let task = h.lifecycle.create(
        &h.session,
        "patch all drifted production web servers",
        EnvironmentName::Production,
        policy,
        TaskSource::Api,
    );
    h.lifecycle.begin_parsing(&h.session, task.id).unwrap();
    let task = h
        .lifecycle
        .mark_planned(&h.session, task.id, serde_json::json!({ "family": "web-linux" }))
        .unwrap();
    assert_eq!(task.state, TaskState::AwaitingApproval);

    let plan = h
        .plans
        .create_draft(&h.session, task.id, PlanType::PatchPlan, patch_payload());
    let (validation, spec) = PlanValidator::new().validate(
        &plan.payload,
        &task.execution_policy,
        task.environment,
    );
    assert!(validation.overall_valid);
    h.plans
        .attach_validation(&h.session, plan.id, validation, spec)
        .unwrap();
    h.plans.submit_for_approval(&h.session, plan.id).unwrap();

    assert_eq!(
        h.lifecycle
            .approve(&h.session, task.id, &approver("alice"))
            .unwrap(),
        ApprovalOutcome::Pending
    );
    assert_eq!(
        h.lifecycle
            .approve(&h.session, task.id, &approver("carol"))
            .unwrap(),
        ApprovalOutcome::Approved
    );
    let plan = h
        .plans
        .mark_approved(&h.session, plan.id, "alice", Some("carol".into()))
        .unwrap();

    let task = h
        .lifecycle
        .transition(&h.session, task.id, TaskState::Executing)
        .unwrap();
    (task, plan)
}

#[tokio::test(start_paused = true)]
async fn test_patch_campaign_clean_success() {
    let h = harness();
    seed_fleet(&h);
    let (task, plan) = approved_plan(&h);
    let platform = MockPlatform::new();

    let outcome = h
        .executor
        .execute(
            &h.session,
            &task,
            &plan,
            Arc::new(platform.clone()),
            Uuid::new_v4(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, CampaignStatus::Completed);
    assert_eq!(outcome.metrics.successful, 6);
    assert_eq!(outcome.metrics.failed, 0);

    let run = h.runs.get(&h.session, outcome.run_id).unwrap();
    assert_eq!(run.percent_complete, 100.0);
    h.lifecycle
        .transition(&h.session, task.id, TaskState::Completed)
        .unwrap();

    // Drift after the run: the whole fleet is on 2.5.0.
    let report = h
        .drift
        .compute(&h.session, &h.assets, &h.images, DriftScope::org_wide())
        .unwrap();
    assert_eq!(report.total_assets, 6);
    assert_eq!(report.compliant_assets, 6);
    assert_eq!(report.coverage_pct, 100.0);
    assert_eq!(report.status, DriftStatus::Healthy);

    // Audit chain: campaign_start, 4 phase starts, 6 patches, 4 health
    // batteries, campaign_complete; the chain verifies from genesis.
    assert_eq!(h.audit.query_by_action(&h.session, "campaign.start").await.len(), 1);
    assert_eq!(
        h.audit
            .query_by_action(&h.session, "campaign.phase_start")
            .await
            .len(),
        4
    );
    assert_eq!(h.audit.query_by_action(&h.session, "campaign.patch").await.len(), 6);
    assert_eq!(h.audit.query_by_action(&h.session, "campaign.health").await.len(), 4);
    assert_eq!(
        h.audit
            .query_by_action(&h.session, "campaign.complete")
            .await
            .len(),
        1
    );
    let verification = h.audit.verify(&h.session).await;
    assert!(verification.valid);
}

#[tokio::test(start_paused = true)]
async fn test_auto_rollback_on_error_spike() {
    let h = harness();
    seed_fleet(&h);
    let (task, plan) = approved_plan(&h);

    let platform = MockPlatform::new();
    // Phase 2: two of three assets fail after retries.
    platform.fail_patch_on("i-4");
    platform.fail_patch_on("i-6");

    let outcome = h
        .executor
        .execute(
            &h.session,
            &task,
            &plan,
            Arc::new(platform.clone()),
            Uuid::new_v4(),
        )
        .await
        .unwrap();

    // 2/3 > 0.25: phase 2 rolls back, the campaign terminates.
    assert_eq!(outcome.status, CampaignStatus::RolledBack);
    assert_eq!(outcome.metrics.successful, 3);
    assert_eq!(outcome.metrics.failed, 2);
    assert_eq!(outcome.metrics.rolled_back, 3);

    // Snapshots restored for the three phase-2 assets.
    let restored: Vec<String> = platform.restores().into_iter().map(|(a, _)| a).collect();
    assert_eq!(restored.len(), 3);
    for asset in ["i-4", "i-5", "i-6"] {
        assert!(restored.contains(&asset.to_string()));
    }

    // The validation phase never ran.
    assert_eq!(outcome.phase_results.len(), 3);
    let run = h.runs.get(&h.session, outcome.run_id).unwrap();
    assert!(run.phases_remaining.contains(&"validate".to_string()));

    h.lifecycle
        .transition(&h.session, task.id, TaskState::RolledBack)
        .unwrap();
    assert!(h.audit.verify(&h.session).await.valid);
}

#[tokio::test(start_paused = true)]
async fn test_campaign_resume_is_idempotent() {
    let h = harness();
    seed_fleet(&h);
    let (task, plan) = approved_plan(&h);
    let platform = MockPlatform::new();
    let workflow_id = Uuid::new_v4();

    let first = h
        .executor
        .execute(
            &h.session,
            &task,
            &plan,
            Arc::new(platform.clone()),
            workflow_id,
        )
        .await
        .unwrap();
    let audit_rows = h.audit.count(&h.session).await;
    let patch_calls = platform.patched().len();

    // Simulated worker crash after completion: re-running the workflow
    // replays the journal instead of re-executing activities.
    let second = h
        .executor
        .execute(
            &h.session,
            &task,
            &plan,
            Arc::new(platform.clone()),
            workflow_id,
        )
        .await
        .unwrap();

    assert_eq!(first.run_id, second.run_id);
    assert_eq!(first.metrics, second.metrics);
    assert_eq!(h.audit.count(&h.session).await, audit_rows);
    assert_eq!(platform.patched().len(), patch_calls);
}

#[tokio::test]
async fn test_quota_denial_fails_task() {
    let h = harness();
    let meter = UsageMeter::new();
    meter.set_limits(
        h.session.org_id(),
        UsageLimits {
            monthly_token_limit: 1_000_000,
            monthly_cost_limit_cents: u64::MAX,
        },
    );
    meter.record(
        &h.session,
        UsageDraft::new("anthropic", "sonnet").with_tokens(999_950, 0),
    );

    let task = h.lifecycle.create(
        &h.session,
        "summarize fleet drift",
        EnvironmentName::Staging,
        ExecutionPolicy::default(),
        TaskSource::Chat,
    );
    h.lifecycle.begin_parsing(&h.session, task.id).unwrap();

    // Admission check before dispatching the model call.
    let decision = meter.check_quota(&h.session, 100, 0);
    assert!(!decision.allowed);
    assert_eq!(decision.reason, Some(DenyReason::TokenLimit));
    assert_eq!(meter.current_rollup(&h.session).total_tokens, 999_950);

    let task = h
        .lifecycle
        .fail(&h.session, task.id, ErrorCode::QuotaExceeded, "monthly token limit reached")
        .unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.error_code, Some(ErrorCode::QuotaExceeded));

    // Quota counters in the enforcer are untouched by the denial.
    let snapshot = h.quota.snapshot(&h.session);
    assert!(snapshot.entries.iter().all(|(_, value, _)| *value == 0));
}
