//! Drift computation.
//!
//! A drift report is a point-in-time snapshot of how much of the running
//! fleet sits on the current production image version of its family. Once
//! inserted, a report is never updated: a refresh produces a new row.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use fleetkern_tenancy::{
    EnvironmentName, OrgId, QuotaDenied, QuotaEnforcer, QuotaResource, TenantSession,
};

use crate::asset::{AssetFilter, AssetRegistry, Platform};
use crate::image::ImageRegistry;

/// Fleet posture classification from coverage percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftStatus {
    Healthy,
    Warning,
    Critical,
}

impl DriftStatus {
    /// Thresholds: >= 90 healthy, >= 50 warning, else critical.
    pub fn from_coverage(coverage_pct: f64) -> Self {
        if coverage_pct >= 90.0 {
            Self::Healthy
        } else if coverage_pct >= 50.0 {
            Self::Warning
        } else {
            Self::Critical
        }
    }
}

/// Scope of one drift computation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriftScope {
    pub environment: Option<EnvironmentName>,
    pub platform: Option<Platform>,
    pub site_id: Option<String>,
}

impl DriftScope {
    /// Whole-organization scope.
    pub fn org_wide() -> Self {
        Self::default()
    }

    pub fn environment(environment: EnvironmentName) -> Self {
        Self {
            environment: Some(environment),
            ..Default::default()
        }
    }

    pub fn platform(platform: Platform) -> Self {
        Self {
            platform: Some(platform),
            ..Default::default()
        }
    }

    pub fn site(site_id: impl Into<String>) -> Self {
        Self {
            site_id: Some(site_id.into()),
            ..Default::default()
        }
    }
}

/// Immutable drift report row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    /// Row id
    pub id: Uuid,
    /// Owning organization
    pub org_id: OrgId,
    /// Environment scope, when scoped
    pub environment: Option<EnvironmentName>,
    /// Platform scope, when scoped
    pub platform: Option<Platform>,
    /// Site scope, when scoped
    pub site_id: Option<String>,
    /// Running assets in scope
    pub total_assets: u64,
    /// Running assets on the production version of their family
    pub compliant_assets: u64,
    /// `round(100 * compliant / total, 2)`; zero when total is zero
    pub coverage_pct: f64,
    /// Posture classification
    pub status: DriftStatus,
    /// Computation instant
    pub calculated_at: DateTime<Utc>,
}

/// Drift errors.
#[derive(Debug, thiserror::Error)]
pub enum DriftError {
    #[error(transparent)]
    Quota(#[from] QuotaDenied),
}

/// Drift computation engine with an insert-only report store.
#[derive(Clone)]
pub struct DriftEngine {
    reports: Arc<RwLock<HashMap<OrgId, Vec<DriftReport>>>>,
    quota: QuotaEnforcer,
}

impl DriftEngine {
    pub fn new(quota: QuotaEnforcer) -> Self {
        Self {
            reports: Arc::new(RwLock::new(HashMap::new())),
            quota,
        }
    }

    /// Compute drift for a scope and insert a new report row.
    ///
    /// Admission goes through the quota gateway (`api_requests`); the
    /// session supplies row-level isolation.
    pub fn compute(
        &self,
        session: &TenantSession,
        assets: &AssetRegistry,
        images: &ImageRegistry,
        scope: DriftScope,
    ) -> Result<DriftReport, DriftError> {
        self.quota
            .check_and_increment(session, QuotaResource::ApiRequests, 1)?;

        let filter = AssetFilter {
            platform: scope.platform,
            state: Some(crate::asset::AssetState::Running),
            environment: scope.environment,
            site_id: scope.site_id.clone(),
        };
        let running = assets.list(session, &filter);
        let production = images.production_by_family(session);

        let total = running.len() as u64;
        let compliant = running
            .iter()
            .filter(|a| {
                production
                    .get(&a.image_ref)
                    .map(|target| target.version == a.image_version)
                    .unwrap_or(false)
            })
            .count() as u64;

        let coverage_pct = if total == 0 {
            0.0
        } else {
            round2(compliant as f64 / total as f64 * 100.0)
        };

        let report = DriftReport {
            id: Uuid::new_v4(),
            org_id: session.org_id(),
            environment: scope.environment,
            platform: scope.platform,
            site_id: scope.site_id,
            total_assets: total,
            compliant_assets: compliant,
            coverage_pct,
            status: DriftStatus::from_coverage(coverage_pct),
            calculated_at: Utc::now(),
        };

        self.reports
            .write()
            .entry(session.org_id())
            .or_default()
            .push(report.clone());

        tracing::info!(
            org_id = %session.org_id(),
            total = total,
            compliant = compliant,
            coverage_pct = coverage_pct,
            status = ?report.status,
            "Drift report computed"
        );
        Ok(report)
    }

    /// Reports, newest first, for trend queries.
    pub fn trend(&self, session: &TenantSession, limit: usize) -> Vec<DriftReport> {
        self.reports
            .read()
            .get(&session.org_id())
            .map(|r| r.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// The most recent report, if any.
    pub fn latest(&self, session: &TenantSession) -> Option<DriftReport> {
        self.reports
            .read()
            .get(&session.org_id())
            .and_then(|r| r.last())
            .cloned()
    }

    /// Total stored reports for an organization.
    pub fn count(&self, session: &TenantSession) -> usize {
        self.reports
            .read()
            .get(&session.org_id())
            .map(|r| r.len())
            .unwrap_or(0)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
