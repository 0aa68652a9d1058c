//! LLM usage accounting.
//!
//! Every external model call lands here: tokens (including cache creation
//! and cache reads) and integer-cent costs derived from per-model pricing.
//! Each record rolls into the `(org, month)` aggregate in the same write;
//! application writes are the single counter authority. `check_quota` runs
//! before dispatch and predicts admissibility from prior state; token and
//! cost limits are independent.

use chrono::{DateTime, Datelike, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use fleetkern_tenancy::{DenyReason, OrgId, TenantSession};

/// Pricing for one `(provider, model)` pair, in cents per million tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_cents_per_mtok: u64,
    pub output_cents_per_mtok: u64,
    pub cache_create_cents_per_mtok: u64,
    pub cache_read_cents_per_mtok: u64,
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self {
            input_cents_per_mtok: 300,
            output_cents_per_mtok: 1500,
            cache_create_cents_per_mtok: 375,
            cache_read_cents_per_mtok: 30,
        }
    }
}

/// Per-organization usage ceilings. Token and cost limits are independent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UsageLimits {
    pub monthly_token_limit: u64,
    pub monthly_cost_limit_cents: u64,
}

impl Default for UsageLimits {
    fn default() -> Self {
        Self {
            monthly_token_limit: 10_000_000,
            monthly_cost_limit_cents: 50_000,
        }
    }
}

/// Input for one usage record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageDraft {
    pub task_id: Option<Uuid>,
    pub provider: String,
    pub model: String,
    /// Agent that made the call, for rollup attribution
    pub agent: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_create_tokens: u64,
    pub cache_read_tokens: u64,
}

impl UsageDraft {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            task_id: None,
            provider: provider.into(),
            model: model.into(),
            agent: None,
            input_tokens: 0,
            output_tokens: 0,
            cache_create_tokens: 0,
            cache_read_tokens: 0,
        }
    }

    pub fn with_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn with_cache_tokens(mut self, create: u64, read: u64) -> Self {
        self.cache_create_tokens = create;
        self.cache_read_tokens = read;
        self
    }

    fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_create_tokens + self.cache_read_tokens
    }
}

/// One persisted usage row (append-only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub org_id: OrgId,
    pub task_id: Option<Uuid>,
    pub provider: String,
    pub model: String,
    pub agent: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_create_tokens: u64,
    pub cache_read_tokens: u64,
    pub input_cost_cents: u64,
    pub output_cost_cents: u64,
    pub total_cost_cents: u64,
    pub created_at: DateTime<Utc>,
}

/// Usage aggregated by model or agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub tokens: u64,
    pub cost_cents: u64,
}

/// Monthly `(org, month)` aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonthlyRollup {
    pub month: String,
    pub total_tokens: u64,
    pub total_cost_cents: u64,
    pub by_model: HashMap<String, UsageTotals>,
    pub by_agent: HashMap<String, UsageTotals>,
}

/// Pre-dispatch admission decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
    /// Usage percent of the binding limit (token or cost, whichever is
    /// closer to exhaustion)
    pub current_usage_percent: f64,
}

/// Usage meter with monthly rollups and a quota gate.
#[derive(Clone, Default)]
pub struct UsageMeter {
    records: Arc<RwLock<HashMap<OrgId, Vec<UsageRecord>>>>,
    rollups: Arc<RwLock<HashMap<(OrgId, String), MonthlyRollup>>>,
    limits: Arc<RwLock<HashMap<OrgId, UsageLimits>>>,
    pricing: Arc<RwLock<HashMap<(String, String), ModelPricing>>>,
}

fn month_key(now: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", now.year(), now.month())
}

fn cost_cents(tokens: u64, cents_per_mtok: u64) -> u64 {
    tokens * cents_per_mtok / 1_000_000
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set limits for an organization.
    pub fn set_limits(&self, org_id: OrgId, limits: UsageLimits) {
        self.limits.write().insert(org_id, limits);
    }

    /// Register effective pricing for a `(provider, model)` pair.
    pub fn set_pricing(
        &self,
        provider: impl Into<String>,
        model: impl Into<String>,
        pricing: ModelPricing,
    ) {
        self.pricing
            .write()
            .insert((provider.into(), model.into()), pricing);
    }

    fn pricing_for(&self, provider: &str, model: &str) -> ModelPricing {
        self.pricing
            .read()
            .get(&(provider.to_string(), model.to_string()))
            .copied()
            .unwrap_or_default()
    }

    /// Current month's rollup for the session's organization.
    pub fn current_rollup(&self, session: &TenantSession) -> MonthlyRollup {
        let key = (session.org_id(), month_key(Utc::now()));
        self.rollups.read().get(&key).cloned().unwrap_or_else(|| {
            MonthlyRollup {
                month: key.1.clone(),
                ..Default::default()
            }
        })
    }

    /// Pre-dispatch quota gate. Reads prior state only; usage is unchanged
    /// whatever the outcome.
    pub fn check_quota(
        &self,
        session: &TenantSession,
        estimated_tokens: u64,
        estimated_cost_cents: u64,
    ) -> QuotaDecision {
        let limits = self
            .limits
            .read()
            .get(&session.org_id())
            .copied()
            .unwrap_or_default();
        let rollup = self.current_rollup(session);

        let token_pct = percent(rollup.total_tokens, limits.monthly_token_limit);
        let cost_pct = percent(rollup.total_cost_cents, limits.monthly_cost_limit_cents);
        let current_usage_percent = token_pct.max(cost_pct);

        if rollup.total_tokens + estimated_tokens > limits.monthly_token_limit {
            return QuotaDecision {
                allowed: false,
                reason: Some(DenyReason::TokenLimit),
                current_usage_percent,
            };
        }
        if rollup.total_cost_cents + estimated_cost_cents > limits.monthly_cost_limit_cents {
            return QuotaDecision {
                allowed: false,
                reason: Some(DenyReason::CostLimit),
                current_usage_percent,
            };
        }
        QuotaDecision {
            allowed: true,
            reason: None,
            current_usage_percent,
        }
    }

    /// Record actual usage for one model call and roll it into the monthly
    /// aggregate.
    pub fn record(&self, session: &TenantSession, draft: UsageDraft) -> UsageRecord {
        let now = Utc::now();
        let pricing = self.pricing_for(&draft.provider, &draft.model);

        let input_cost = cost_cents(draft.input_tokens, pricing.input_cents_per_mtok)
            + cost_cents(draft.cache_create_tokens, pricing.cache_create_cents_per_mtok)
            + cost_cents(draft.cache_read_tokens, pricing.cache_read_cents_per_mtok);
        let output_cost = cost_cents(draft.output_tokens, pricing.output_cents_per_mtok);

        let record = UsageRecord {
            id: Uuid::new_v4(),
            org_id: session.org_id(),
            task_id: draft.task_id,
            provider: draft.provider.clone(),
            model: draft.model.clone(),
            agent: draft.agent.clone(),
            input_tokens: draft.input_tokens,
            output_tokens: draft.output_tokens,
            cache_create_tokens: draft.cache_create_tokens,
            cache_read_tokens: draft.cache_read_tokens,
            input_cost_cents: input_cost,
            output_cost_cents: output_cost,
            total_cost_cents: input_cost + output_cost,
            created_at: now,
        };

        let tokens = draft.total_tokens();
        let key = (session.org_id(), month_key(now));
        {
            let mut rollups = self.rollups.write();
            let rollup = rollups.entry(key.clone()).or_insert_with(|| MonthlyRollup {
                month: key.1.clone(),
                ..Default::default()
            });
            rollup.total_tokens += tokens;
            rollup.total_cost_cents += record.total_cost_cents;

            let by_model = rollup.by_model.entry(draft.model).or_default();
            by_model.calls += 1;
            by_model.tokens += tokens;
            by_model.cost_cents += record.total_cost_cents;

            if let Some(agent) = draft.agent {
                let by_agent = rollup.by_agent.entry(agent).or_default();
                by_agent.calls += 1;
                by_agent.tokens += tokens;
                by_agent.cost_cents += record.total_cost_cents;
            }
        }

        self.records
            .write()
            .entry(session.org_id())
            .or_default()
            .push(record.clone());
        record
    }

    /// Raw records for the session's organization.
    pub fn records(&self, session: &TenantSession) -> Vec<UsageRecord> {
        self.records
            .read()
            .get(&session.org_id())
            .cloned()
            .unwrap_or_default()
    }
}

fn percent(value: u64, limit: u64) -> f64 {
    if limit == 0 {
        100.0
    } else {
        value as f64 / limit as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetkern_tenancy::{
        ActorIdentity, OrganizationDirectory, RlsGateway, TenantContext,
    };

    fn setup() -> (UsageMeter, TenantSession) {
        let dir = OrganizationDirectory::new();
        let org = dir.register("acme", "Acme").unwrap();
        let session = RlsGateway::new(dir)
            .session(&TenantContext::new(org.id, ActorIdentity::agent("planner")))
            .unwrap();
        (UsageMeter::new(), session)
    }

    #[test]
    fn test_quota_denied_at_limit_leaves_usage_unchanged() {
        let (meter, session) = setup();
        meter.set_limits(
            session.org_id(),
            UsageLimits {
                monthly_token_limit: 1_000_000,
                monthly_cost_limit_cents: u64::MAX,
            },
        );

        // Bring usage to 999,950 tokens.
        meter.record(
            &session,
            UsageDraft::new("anthropic", "sonnet").with_tokens(999_950, 0),
        );

        let decision = meter.check_quota(&session, 100, 0);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::TokenLimit));

        // Usage unchanged by the denial.
        assert_eq!(meter.current_rollup(&session).total_tokens, 999_950);
    }

    #[test]
    fn test_cost_limit_independent_of_tokens() {
        let (meter, session) = setup();
        meter.set_limits(
            session.org_id(),
            UsageLimits {
                monthly_token_limit: u64::MAX,
                monthly_cost_limit_cents: 10,
            },
        );

        let decision = meter.check_quota(&session, 1_000, 11);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::CostLimit));
    }

    #[test]
    fn test_cost_derivation_integer_cents() {
        let (meter, session) = setup();
        meter.set_pricing(
            "anthropic",
            "sonnet",
            ModelPricing {
                input_cents_per_mtok: 300,
                output_cents_per_mtok: 1500,
                cache_create_cents_per_mtok: 375,
                cache_read_cents_per_mtok: 30,
            },
        );

        let record = meter.record(
            &session,
            UsageDraft::new("anthropic", "sonnet")
                .with_tokens(1_000_000, 100_000)
                .with_cache_tokens(0, 1_000_000),
        );

        assert_eq!(record.input_cost_cents, 300 + 30);
        assert_eq!(record.output_cost_cents, 150);
        assert_eq!(record.total_cost_cents, 480);
    }

    #[test]
    fn test_rollup_by_model_and_agent() {
        let (meter, session) = setup();
        meter.record(
            &session,
            UsageDraft::new("anthropic", "sonnet")
                .with_agent("meta-planner")
                .with_tokens(100, 50),
        );
        meter.record(
            &session,
            UsageDraft::new("anthropic", "haiku")
                .with_agent("meta-planner")
                .with_tokens(10, 5),
        );

        let rollup = meter.current_rollup(&session);
        assert_eq!(rollup.total_tokens, 165);
        assert_eq!(rollup.by_model.len(), 2);
        assert_eq!(rollup.by_agent["meta-planner"].calls, 2);
    }

    #[test]
    fn test_usage_percent_reports_binding_limit() {
        let (meter, session) = setup();
        meter.set_limits(
            session.org_id(),
            UsageLimits {
                monthly_token_limit: 1_000,
                monthly_cost_limit_cents: 1_000_000,
            },
        );
        meter.record(
            &session,
            UsageDraft::new("anthropic", "sonnet").with_tokens(500, 0),
        );

        let decision = meter.check_quota(&session, 1, 0);
        assert!(decision.allowed);
        assert!((decision.current_usage_percent - 50.0).abs() < 1.0);
    }
}
