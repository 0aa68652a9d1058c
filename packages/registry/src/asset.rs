//! Fleet asset inventory.
//!
//! Assets are created by connector syncs and retained; mutation is soft
//! (state changes only, never row deletion). Unique per
//! `(org, platform, instance_id)`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use fleetkern_tenancy::{
    EnvironmentName, OrgId, QuotaDenied, QuotaEnforcer, QuotaResource, TenantSession,
};

/// Supported platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Aws,
    Azure,
    Gcp,
    Vsphere,
    K8s,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aws => write!(f, "aws"),
            Self::Azure => write!(f, "azure"),
            Self::Gcp => write!(f, "gcp"),
            Self::Vsphere => write!(f, "vsphere"),
            Self::K8s => write!(f, "k8s"),
        }
    }
}

/// Asset lifecycle state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetState {
    Running,
    Stopped,
    Terminated,
    Unknown,
}

/// One inventoried asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// Row id
    pub id: Uuid,
    /// Owning organization
    pub org_id: OrgId,
    /// Platform
    pub platform: Platform,
    /// Platform-native identifier
    pub instance_id: String,
    /// Image family reference the asset runs
    pub image_ref: String,
    /// Image version the asset runs
    pub image_version: String,
    /// Lifecycle state
    pub state: AssetState,
    /// Environment, when known
    pub environment: Option<EnvironmentName>,
    /// Site, when known
    pub site_id: Option<String>,
    /// Free-form tags
    pub tags: HashMap<String, String>,
    /// First discovery
    pub first_seen: DateTime<Utc>,
    /// Last sync touch
    pub last_seen: DateTime<Utc>,
}

/// Normalized fact reported by a platform connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetFact {
    pub platform: Platform,
    pub instance_id: String,
    pub image_ref: String,
    pub image_version: String,
    pub state: AssetState,
    pub environment: Option<EnvironmentName>,
    pub site_id: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl AssetFact {
    pub fn new(
        platform: Platform,
        instance_id: impl Into<String>,
        image_ref: impl Into<String>,
        image_version: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            instance_id: instance_id.into(),
            image_ref: image_ref.into(),
            image_version: image_version.into(),
            state: AssetState::Running,
            environment: None,
            site_id: None,
            tags: HashMap::new(),
        }
    }

    pub fn with_state(mut self, state: AssetState) -> Self {
        self.state = state;
        self
    }

    pub fn with_environment(mut self, environment: EnvironmentName) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn with_site(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = Some(site_id.into());
        self
    }
}

/// Filter for inventory queries.
#[derive(Debug, Clone, Default)]
pub struct AssetFilter {
    pub platform: Option<Platform>,
    pub state: Option<AssetState>,
    pub environment: Option<EnvironmentName>,
    pub site_id: Option<String>,
}

impl AssetFilter {
    pub fn running() -> Self {
        Self {
            state: Some(AssetState::Running),
            ..Default::default()
        }
    }

    fn matches(&self, asset: &Asset) -> bool {
        self.platform.map_or(true, |p| asset.platform == p)
            && self.state.map_or(true, |s| asset.state == s)
            && self.environment.map_or(true, |e| asset.environment == Some(e))
            && self
                .site_id
                .as_ref()
                .map_or(true, |s| asset.site_id.as_deref() == Some(s.as_str()))
    }
}

/// Counters for one connector sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounters {
    pub discovered: u64,
    pub created: u64,
    pub updated: u64,
    pub removed: u64,
}

/// Tenant-partitioned asset store.
#[derive(Clone)]
pub struct AssetRegistry {
    assets: Arc<RwLock<HashMap<OrgId, HashMap<(Platform, String), Asset>>>>,
    quota: QuotaEnforcer,
}

impl AssetRegistry {
    pub fn new(quota: QuotaEnforcer) -> Self {
        Self {
            assets: Arc::new(RwLock::new(HashMap::new())),
            quota,
        }
    }

    /// Insert or refresh one asset from a connector fact.
    ///
    /// Creation is quota-gated on the `assets` resource; refreshes are not.
    /// Returns `true` when a new row was created.
    pub fn upsert(
        &self,
        session: &TenantSession,
        fact: AssetFact,
    ) -> Result<bool, QuotaDenied> {
        let org_id = session.org_id();
        let now = Utc::now();
        let key = (fact.platform, fact.instance_id.clone());

        let mut all = self.assets.write();
        let org_assets = all.entry(org_id).or_default();

        if let Some(existing) = org_assets.get_mut(&key) {
            existing.image_ref = fact.image_ref;
            existing.image_version = fact.image_version;
            existing.state = fact.state;
            existing.environment = fact.environment;
            existing.site_id = fact.site_id;
            existing.tags = fact.tags;
            existing.last_seen = now;
            return Ok(false);
        }

        // New row: admission before insert, in the same logical step.
        self.quota
            .check_and_increment(session, QuotaResource::Assets, 1)?;

        let asset = Asset {
            id: Uuid::new_v4(),
            org_id,
            platform: fact.platform,
            instance_id: fact.instance_id,
            image_ref: fact.image_ref,
            image_version: fact.image_version,
            state: fact.state,
            environment: fact.environment,
            site_id: fact.site_id,
            tags: fact.tags,
            first_seen: now,
            last_seen: now,
        };
        org_assets.insert(key, asset);
        Ok(true)
    }

    /// Apply a full connector sweep: upsert every fact, and soft-remove
    /// assets on the same platform that the sweep no longer reports
    /// (state → terminated; rows are retained).
    pub fn sync_batch(
        &self,
        session: &TenantSession,
        platform: Platform,
        facts: Vec<AssetFact>,
    ) -> Result<SyncCounters, QuotaDenied> {
        let mut counters = SyncCounters {
            discovered: facts.len() as u64,
            ..Default::default()
        };

        let seen: Vec<String> = facts.iter().map(|f| f.instance_id.clone()).collect();
        for fact in facts {
            if self.upsert(session, fact)? {
                counters.created += 1;
            } else {
                counters.updated += 1;
            }
        }

        let mut all = self.assets.write();
        if let Some(org_assets) = all.get_mut(&session.org_id()) {
            for ((p, instance_id), asset) in org_assets.iter_mut() {
                if *p == platform
                    && asset.state != AssetState::Terminated
                    && !seen.contains(instance_id)
                {
                    asset.state = AssetState::Terminated;
                    asset.last_seen = Utc::now();
                    counters.removed += 1;
                }
            }
        }

        tracing::info!(
            org_id = %session.org_id(),
            platform = %platform,
            discovered = counters.discovered,
            created = counters.created,
            updated = counters.updated,
            removed = counters.removed,
            "Asset sync applied"
        );
        Ok(counters)
    }

    /// Look up one asset.
    pub fn get(
        &self,
        session: &TenantSession,
        platform: Platform,
        instance_id: &str,
    ) -> Option<Asset> {
        self.assets
            .read()
            .get(&session.org_id())
            .and_then(|m| m.get(&(platform, instance_id.to_string())))
            .cloned()
    }

    /// List assets matching a filter.
    pub fn list(&self, session: &TenantSession, filter: &AssetFilter) -> Vec<Asset> {
        self.assets
            .read()
            .get(&session.org_id())
            .map(|m| {
                m.values()
                    .filter(|a| filter.matches(a))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Count assets matching a filter.
    pub fn count(&self, session: &TenantSession, filter: &AssetFilter) -> usize {
        self.assets
            .read()
            .get(&session.org_id())
            .map(|m| m.values().filter(|a| filter.matches(a)).count())
            .unwrap_or(0)
    }

    /// Record a new image version on an asset after a successful patch or
    /// reimage.
    pub fn record_version(
        &self,
        session: &TenantSession,
        platform: Platform,
        instance_id: &str,
        image_version: impl Into<String>,
    ) -> bool {
        let mut all = self.assets.write();
        if let Some(asset) = all
            .get_mut(&session.org_id())
            .and_then(|m| m.get_mut(&(platform, instance_id.to_string())))
        {
            asset.image_version = image_version.into();
            asset.last_seen = Utc::now();
            true
        } else {
            false
        }
    }

    /// Drop an organization's inventory (cascade delete).
    pub fn purge(&self, session: &TenantSession, org_id: OrgId) {
        if !session.is_admin() && session.org_id() != org_id {
            return;
        }
        self.assets.write().remove(&org_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetkern_tenancy::{
        ActorIdentity, OrganizationDirectory, QuotaLimits, RlsGateway, TenantContext,
    };

    fn setup() -> (AssetRegistry, TenantSession) {
        let dir = OrganizationDirectory::new();
        let org = dir.register("acme", "Acme").unwrap();
        let session = RlsGateway::new(dir)
            .session(&TenantContext::new(org.id, ActorIdentity::service("sync")))
            .unwrap();
        (AssetRegistry::new(QuotaEnforcer::new()), session)
    }

    #[test]
    fn test_upsert_create_then_update() {
        let (registry, session) = setup();
        let fact = AssetFact::new(Platform::Aws, "i-1", "web-linux", "2.4.0");

        assert!(registry.upsert(&session, fact.clone()).unwrap());
        assert!(!registry.upsert(&session, fact).unwrap());
        assert_eq!(registry.count(&session, &AssetFilter::default()), 1);
    }

    #[test]
    fn test_sync_batch_counters() {
        let (registry, session) = setup();
        registry
            .upsert(
                &session,
                AssetFact::new(Platform::Aws, "i-old", "web-linux", "2.3.0"),
            )
            .unwrap();

        let counters = registry
            .sync_batch(
                &session,
                Platform::Aws,
                vec![
                    AssetFact::new(Platform::Aws, "i-1", "web-linux", "2.4.0"),
                    AssetFact::new(Platform::Aws, "i-2", "web-linux", "2.4.0"),
                ],
            )
            .unwrap();

        assert_eq!(counters.discovered, 2);
        assert_eq!(counters.created, 2);
        assert_eq!(counters.removed, 1); // i-old no longer reported

        let old = registry.get(&session, Platform::Aws, "i-old").unwrap();
        assert_eq!(old.state, AssetState::Terminated);
    }

    #[test]
    fn test_quota_gates_creation() {
        let dir = OrganizationDirectory::new();
        let org = dir.register("acme", "Acme").unwrap();
        let session = RlsGateway::new(dir)
            .session(&TenantContext::new(org.id, ActorIdentity::service("sync")))
            .unwrap();

        let quota = QuotaEnforcer::new();
        quota.set_limits(
            session.org_id(),
            QuotaLimits {
                max_assets: 1,
                ..Default::default()
            },
        );
        let registry = AssetRegistry::new(quota);

        registry
            .upsert(&session, AssetFact::new(Platform::Aws, "i-1", "f", "1"))
            .unwrap();
        assert!(registry
            .upsert(&session, AssetFact::new(Platform::Aws, "i-2", "f", "1"))
            .is_err());

        // Refresh of an existing row is not quota-gated.
        assert!(!registry
            .upsert(&session, AssetFact::new(Platform::Aws, "i-1", "f", "2"))
            .unwrap());
    }

    #[test]
    fn test_filter_by_state_and_platform() {
        let (registry, session) = setup();
        registry
            .upsert(&session, AssetFact::new(Platform::Aws, "i-1", "f", "1"))
            .unwrap();
        registry
            .upsert(
                &session,
                AssetFact::new(Platform::Gcp, "g-1", "f", "1").with_state(AssetState::Stopped),
            )
            .unwrap();

        assert_eq!(registry.count(&session, &AssetFilter::running()), 1);
        let gcp = AssetFilter {
            platform: Some(Platform::Gcp),
            ..Default::default()
        };
        assert_eq!(registry.count(&session, &gcp), 1);
    }

    #[test]
    fn test_record_version() {
        let (registry, session) = setup();
        registry
            .upsert(
                &session,
                AssetFact::new(Platform::Aws, "i-1", "web-linux", "2.4.0"),
            )
            .unwrap();

        assert!(registry.record_version(&session, Platform::Aws, "i-1", "2.5.0"));
        let asset = registry.get(&session, Platform::Aws, "i-1").unwrap();
        assert_eq!(asset.image_version, "2.5.0");
    }
}
