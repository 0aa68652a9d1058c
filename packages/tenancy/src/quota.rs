//! Quota & rate-limit enforcement.
//!
//! Admission control runs before any state change that grows a counter:
//! `check` predicts admissibility, `check_and_increment` performs the same
//! decision and moves the counter in one logical step. Period counters
//! (daily, monthly, per-minute) reset idempotently on read when the stored
//! period boundary is stale.
//!
//! Counters never underflow: releases that would drop below zero are
//! clamped and reported.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::OrgId;
use crate::gateway::TenantSession;

/// Recognized quota resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaResource {
    /// Fleet assets
    Assets,
    /// Golden images
    Images,
    /// Sites
    Sites,
    /// Users
    Users,
    /// Teams
    Teams,
    /// AI task launches (daily window)
    AiTasksDaily,
    /// AI tokens (monthly window)
    AiTokensMonthly,
    /// Storage in bytes
    StorageBytes,
    /// API requests (dual window: per-minute and per-day)
    ApiRequests,
}

impl std::fmt::Display for QuotaResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Assets => "assets",
            Self::Images => "images",
            Self::Sites => "sites",
            Self::Users => "users",
            Self::Teams => "teams",
            Self::AiTasksDaily => "ai_tasks_daily",
            Self::AiTokensMonthly => "ai_tokens_monthly",
            Self::StorageBytes => "storage_bytes",
            Self::ApiRequests => "api_requests",
        };
        write!(f, "{s}")
    }
}

impl QuotaResource {
    /// The typed denial reason this resource maps to.
    pub fn deny_reason(&self) -> DenyReason {
        match self {
            Self::AiTokensMonthly => DenyReason::TokenLimit,
            Self::ApiRequests => DenyReason::RateLimit,
            _ => DenyReason::ResourceLimit,
        }
    }
}

/// Typed reason attached to every denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Token budget exhausted
    TokenLimit,
    /// Cost ceiling reached
    CostLimit,
    /// Rate limit window full
    RateLimit,
    /// Resource count limit reached
    ResourceLimit,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TokenLimit => write!(f, "token_limit"),
            Self::CostLimit => write!(f, "cost_limit"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::ResourceLimit => write!(f, "resource_limit"),
        }
    }
}

/// Per-organization quota limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub max_assets: u64,
    pub max_images: u64,
    pub max_sites: u64,
    pub max_users: u64,
    pub max_teams: u64,
    pub ai_tasks_per_day: u64,
    pub ai_tokens_per_month: u64,
    pub max_storage_bytes: u64,
    pub api_requests_per_minute: u64,
    pub api_requests_per_day: u64,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            max_assets: 10_000,
            max_images: 1_000,
            max_sites: 100,
            max_users: 500,
            max_teams: 50,
            ai_tasks_per_day: 200,
            ai_tokens_per_month: 10_000_000,
            max_storage_bytes: 100 * 1024 * 1024 * 1024,
            api_requests_per_minute: 600,
            api_requests_per_day: 100_000,
        }
    }
}

impl QuotaLimits {
    /// Primary-window limit for a resource.
    fn limit_for(&self, resource: QuotaResource) -> u64 {
        match resource {
            QuotaResource::Assets => self.max_assets,
            QuotaResource::Images => self.max_images,
            QuotaResource::Sites => self.max_sites,
            QuotaResource::Users => self.max_users,
            QuotaResource::Teams => self.max_teams,
            QuotaResource::AiTasksDaily => self.ai_tasks_per_day,
            QuotaResource::AiTokensMonthly => self.ai_tokens_per_month,
            QuotaResource::StorageBytes => self.max_storage_bytes,
            QuotaResource::ApiRequests => self.api_requests_per_day,
        }
    }
}

/// Successful admission receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaReceipt {
    /// Resource checked
    pub resource: QuotaResource,
    /// Counter value after the decision
    pub value: u64,
    /// Applicable limit
    pub limit: u64,
    /// Usage percent after the decision
    pub usage_percent: f64,
    /// Whether a release was clamped at zero
    pub underflow_clamped: bool,
}

/// Typed quota denial.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("quota denied for {resource}: {reason} ({current}+{requested} > {limit})")]
pub struct QuotaDenied {
    pub resource: QuotaResource,
    pub reason: DenyReason,
    pub limit: u64,
    pub current: u64,
    pub requested: u64,
    pub usage_percent: f64,
}

/// Point-in-time usage snapshot for one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub org_id: OrgId,
    pub taken_at: DateTime<Utc>,
    /// `(resource, value, limit)` triples for the primary windows
    pub entries: Vec<(QuotaResource, u64, u64)>,
}

/// Counter window key. `ApiRequests` keeps a second per-minute window
/// alongside its per-day primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CounterKey {
    Primary(QuotaResource),
    ApiMinute,
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: u64,
    last_reset: DateTime<Utc>,
}

/// Quota & rate-limit enforcer.
///
/// Application writes are the single counter authority; every counter
/// movement goes through `check_and_increment` / `release`.
#[derive(Clone, Default)]
pub struct QuotaEnforcer {
    limits: Arc<RwLock<HashMap<OrgId, QuotaLimits>>>,
    counters: Arc<RwLock<HashMap<OrgId, HashMap<CounterKey, Counter>>>>,
}

impl QuotaEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set limits for an organization. Unregistered organizations fall back
    /// to [`QuotaLimits::default`].
    pub fn set_limits(&self, org_id: OrgId, limits: QuotaLimits) {
        self.limits.write().insert(org_id, limits);
    }

    /// Limits currently applied to an organization.
    pub fn limits_for(&self, org_id: OrgId) -> QuotaLimits {
        self.limits.read().get(&org_id).cloned().unwrap_or_default()
    }

    /// Period start for a counter key at `now`. Lifetime gauges never reset.
    fn period_start(key: CounterKey, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let ts = now.timestamp();
        match key {
            CounterKey::ApiMinute => DateTime::from_timestamp(ts - ts % 60, 0),
            CounterKey::Primary(QuotaResource::AiTasksDaily)
            | CounterKey::Primary(QuotaResource::ApiRequests) => {
                DateTime::from_timestamp(ts - ts % 86_400, 0)
            }
            CounterKey::Primary(QuotaResource::AiTokensMonthly) => Utc
                .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
                .single(),
            _ => None,
        }
    }

    /// Read a counter, applying the idempotent period reset in place.
    fn counter_value(
        counters: &mut HashMap<CounterKey, Counter>,
        key: CounterKey,
        now: DateTime<Utc>,
    ) -> u64 {
        let entry = counters.entry(key).or_insert(Counter {
            value: 0,
            last_reset: now,
        });
        if let Some(period_start) = Self::period_start(key, now) {
            if entry.last_reset < period_start {
                entry.value = 0;
                entry.last_reset = now;
            }
        }
        entry.value
    }

    fn deny(
        resource: QuotaResource,
        limit: u64,
        current: u64,
        requested: u64,
        reason: DenyReason,
    ) -> QuotaDenied {
        QuotaDenied {
            resource,
            reason,
            limit,
            current,
            requested,
            usage_percent: usage_percent(current, limit),
        }
    }

    /// Admission check without moving the counter.
    pub fn check(
        &self,
        session: &TenantSession,
        resource: QuotaResource,
        delta: u64,
    ) -> Result<QuotaReceipt, QuotaDenied> {
        self.admit(session, resource, delta, false)
    }

    /// Admission check and counter increment as one logical step.
    pub fn check_and_increment(
        &self,
        session: &TenantSession,
        resource: QuotaResource,
        delta: u64,
    ) -> Result<QuotaReceipt, QuotaDenied> {
        self.admit(session, resource, delta, true)
    }

    fn admit(
        &self,
        session: &TenantSession,
        resource: QuotaResource,
        delta: u64,
        commit: bool,
    ) -> Result<QuotaReceipt, QuotaDenied> {
        let org_id = session.org_id();
        let limits = self.limits_for(org_id);
        let now = Utc::now();

        let mut all = self.counters.write();
        let counters = all.entry(org_id).or_default();

        // Dual-window admission for API requests: the minute window is
        // checked first, then the day window; either denies.
        if resource == QuotaResource::ApiRequests {
            let minute = Self::counter_value(counters, CounterKey::ApiMinute, now);
            if minute + delta > limits.api_requests_per_minute {
                return Err(Self::deny(
                    resource,
                    limits.api_requests_per_minute,
                    minute,
                    delta,
                    DenyReason::RateLimit,
                ));
            }
        }

        let key = CounterKey::Primary(resource);
        let current = Self::counter_value(counters, key, now);
        let limit = limits.limit_for(resource);

        if current + delta > limit {
            let denied = Self::deny(resource, limit, current, delta, resource.deny_reason());
            tracing::warn!(
                org_id = %org_id,
                resource = %resource,
                current,
                requested = delta,
                limit,
                "Quota denied"
            );
            return Err(denied);
        }

        let value = if commit {
            if resource == QuotaResource::ApiRequests {
                if let Some(minute) = counters.get_mut(&CounterKey::ApiMinute) {
                    minute.value += delta;
                }
            }
            let entry = counters.entry(key).or_insert(Counter {
                value: current,
                last_reset: now,
            });
            entry.value += delta;
            entry.value
        } else {
            current
        };

        Ok(QuotaReceipt {
            resource,
            value,
            limit,
            usage_percent: usage_percent(value, limit),
            underflow_clamped: false,
        })
    }

    /// Release previously-consumed quota. Clamped at zero; a clamp is
    /// reported on the receipt and logged.
    pub fn release(
        &self,
        session: &TenantSession,
        resource: QuotaResource,
        delta: u64,
    ) -> QuotaReceipt {
        let org_id = session.org_id();
        let limits = self.limits_for(org_id);
        let now = Utc::now();

        let mut all = self.counters.write();
        let counters = all.entry(org_id).or_default();
        let key = CounterKey::Primary(resource);
        let current = Self::counter_value(counters, key, now);

        let clamped = delta > current;
        if clamped {
            tracing::warn!(
                org_id = %org_id,
                resource = %resource,
                current,
                release = delta,
                "Quota release clamped at zero"
            );
        }
        let value = current.saturating_sub(delta);
        if let Some(entry) = counters.get_mut(&key) {
            entry.value = value;
        }

        let limit = limits.limit_for(resource);
        QuotaReceipt {
            resource,
            value,
            limit,
            usage_percent: usage_percent(value, limit),
            underflow_clamped: clamped,
        }
    }

    /// Usage snapshot across all primary windows.
    pub fn snapshot(&self, session: &TenantSession) -> QuotaSnapshot {
        let org_id = session.org_id();
        let limits = self.limits_for(org_id);
        let now = Utc::now();

        let mut all = self.counters.write();
        let counters = all.entry(org_id).or_default();

        let resources = [
            QuotaResource::Assets,
            QuotaResource::Images,
            QuotaResource::Sites,
            QuotaResource::Users,
            QuotaResource::Teams,
            QuotaResource::AiTasksDaily,
            QuotaResource::AiTokensMonthly,
            QuotaResource::StorageBytes,
            QuotaResource::ApiRequests,
        ];
        let entries = resources
            .iter()
            .map(|&r| {
                let value = Self::counter_value(counters, CounterKey::Primary(r), now);
                (r, value, limits.limit_for(r))
            })
            .collect();

        QuotaSnapshot {
            org_id,
            taken_at: now,
            entries,
        }
    }

    /// Drop all counters and limits for an organization (cascade delete).
    /// Requires an admin session; non-admin callers may only purge their
    /// own organization.
    pub fn purge(&self, session: &TenantSession, org_id: OrgId) {
        if !session.is_admin() && session.org_id() != org_id {
            return;
        }
        self.limits.write().remove(&org_id);
        self.counters.write().remove(&org_id);
    }
}

fn usage_percent(value: u64, limit: u64) -> f64 {
    if limit == 0 {
        100.0
    } else {
        value as f64 / limit as f64 * 100.0
    }
}
