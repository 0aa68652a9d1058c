//! Connector scheduling.
//!
//! A connector is due iff `enabled && sync_enabled && next_sync_at <= now`.
//! Claims are compare-and-set on `next_sync_at` plus an active-set guard,
//! so at most one sync runs per connector at a time. Schedules are duration
//! literals (`1h`, `30m`, `1d`) or cron expressions; invalid schedules
//! default to one hour with a logged warning.

use chrono::{DateTime, Duration, Utc};
use croner::Cron;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use fleetkern_registry::{AssetRegistry, Platform, SyncCounters};
use fleetkern_tasks::parse_duration_literal;
use fleetkern_tenancy::{OrgId, TenantSession};

use crate::platform::PlatformClient;

/// Compute the next sync instant for a schedule string.
///
/// Accepts `<int>{s|m|h|d}` literals and cron expressions; anything else
/// defaults to one hour with a warning.
pub fn next_sync_time(schedule: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    if let Some(duration) = parse_duration_literal(schedule) {
        return now
            + Duration::from_std(duration).unwrap_or_else(|_| Duration::hours(1));
    }

    if let Ok(cron) = Cron::new(schedule).parse() {
        if let Ok(next) = cron.find_next_occurrence(&now, false) {
            return next;
        }
    }

    tracing::warn!(schedule = %schedule, "Invalid sync schedule, defaulting to 1h");
    now + Duration::hours(1)
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Success,
    Failed,
}

/// A platform connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub id: Uuid,
    pub org_id: OrgId,
    /// Unique per organization
    pub name: String,
    pub platform: Platform,
    pub enabled: bool,
    pub sync_enabled: bool,
    /// Duration literal or cron expression
    pub sync_schedule: String,
    pub next_sync_at: DateTime<Utc>,
    pub last_outcome: Option<SyncOutcome>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// One sync history row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    pub id: Uuid,
    pub connector_id: Uuid,
    pub org_id: OrgId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Asset counters for this sweep
    pub assets: SyncCounters,
    /// Image counters for this sweep (distinct image references seen)
    pub images: SyncCounters,
    pub outcome: SyncOutcome,
    pub error_code: Option<String>,
}

/// Scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("connector name '{0}' already registered for this organization")]
    NameTaken(String),
    #[error("connector {0} not found")]
    NotFound(Uuid),
    #[error("connector {0} was not claimed before run_sync")]
    NotClaimed(Uuid),
}

/// Per-connector sync scheduler.
#[derive(Clone)]
pub struct ConnectorScheduler {
    connectors: Arc<RwLock<HashMap<OrgId, HashMap<Uuid, Connector>>>>,
    history: Arc<RwLock<HashMap<Uuid, Vec<SyncHistoryEntry>>>>,
    /// Connectors with a sync in flight (serialization by connector id)
    active: Arc<Mutex<HashSet<Uuid>>>,
    assets: AssetRegistry,
}

impl ConnectorScheduler {
    pub fn new(assets: AssetRegistry) -> Self {
        Self {
            connectors: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(HashMap::new())),
            active: Arc::new(Mutex::new(HashSet::new())),
            assets,
        }
    }

    /// Register a connector, due immediately. Names are unique per org.
    pub fn register(
        &self,
        session: &TenantSession,
        name: impl Into<String>,
        platform: Platform,
        sync_schedule: impl Into<String>,
    ) -> Result<Connector, SchedulerError> {
        let name = name.into();
        let mut all = self.connectors.write();
        let org_connectors = all.entry(session.org_id()).or_default();

        if org_connectors.values().any(|c| c.name == name) {
            return Err(SchedulerError::NameTaken(name));
        }

        let connector = Connector {
            id: Uuid::new_v4(),
            org_id: session.org_id(),
            name,
            platform,
            enabled: true,
            sync_enabled: true,
            sync_schedule: sync_schedule.into(),
            next_sync_at: Utc::now(),
            last_outcome: None,
            last_synced_at: None,
        };
        org_connectors.insert(connector.id, connector.clone());
        Ok(connector)
    }

    /// Fetch a connector.
    pub fn get(&self, session: &TenantSession, connector_id: Uuid) -> Option<Connector> {
        self.connectors
            .read()
            .get(&session.org_id())
            .and_then(|m| m.get(&connector_id))
            .cloned()
    }

    /// Enable or disable syncing.
    pub fn set_enabled(
        &self,
        session: &TenantSession,
        connector_id: Uuid,
        enabled: bool,
    ) -> Result<Connector, SchedulerError> {
        let mut all = self.connectors.write();
        let connector = all
            .get_mut(&session.org_id())
            .and_then(|m| m.get_mut(&connector_id))
            .ok_or(SchedulerError::NotFound(connector_id))?;
        connector.enabled = enabled;
        Ok(connector.clone())
    }

    /// Connectors due at `now`.
    pub fn due(&self, session: &TenantSession, now: DateTime<Utc>) -> Vec<Connector> {
        self.connectors
            .read()
            .get(&session.org_id())
            .map(|m| {
                m.values()
                    .filter(|c| c.enabled && c.sync_enabled && c.next_sync_at <= now)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Atomically claim a due connector: advances `next_sync_at` per its
    /// schedule and marks the connector active. Returns false when the
    /// connector is not due or a sync is already in flight.
    pub fn claim(
        &self,
        session: &TenantSession,
        connector_id: Uuid,
        now: DateTime<Utc>,
    ) -> bool {
        let mut active = self.active.lock();
        if active.contains(&connector_id) {
            return false;
        }

        let mut all = self.connectors.write();
        let connector = match all
            .get_mut(&session.org_id())
            .and_then(|m| m.get_mut(&connector_id))
        {
            Some(c) => c,
            None => return false,
        };
        if !(connector.enabled && connector.sync_enabled && connector.next_sync_at <= now) {
            return false;
        }

        connector.next_sync_at = next_sync_time(&connector.sync_schedule, now);
        active.insert(connector_id);
        tracing::debug!(
            connector = %connector.name,
            next_sync_at = %connector.next_sync_at,
            "Connector claimed for sync"
        );
        true
    }

    /// Run a claimed connector's sync: sweep the platform inventory into
    /// the asset registry and append a history row.
    pub async fn run_sync(
        &self,
        session: &TenantSession,
        connector_id: Uuid,
        client: &dyn PlatformClient,
    ) -> Result<SyncHistoryEntry, SchedulerError> {
        if !self.active.lock().contains(&connector_id) {
            return Err(SchedulerError::NotClaimed(connector_id));
        }
        let connector = self
            .get(session, connector_id)
            .ok_or(SchedulerError::NotFound(connector_id))?;

        let started_at = Utc::now();
        let (assets, images, outcome, error_code) = match client.list_assets(None).await {
            Ok(facts) => {
                let image_refs: HashSet<&str> =
                    facts.iter().map(|f| f.image_ref.as_str()).collect();
                let images = SyncCounters {
                    discovered: image_refs.len() as u64,
                    ..Default::default()
                };
                match self.assets.sync_batch(session, connector.platform, facts) {
                    Ok(counters) => (counters, images, SyncOutcome::Success, None),
                    Err(denied) => (
                        SyncCounters::default(),
                        images,
                        SyncOutcome::Failed,
                        Some(denied.reason.to_string()),
                    ),
                }
            }
            Err(err) => (
                SyncCounters::default(),
                SyncCounters::default(),
                SyncOutcome::Failed,
                Some(err.to_orchestrator().code().as_str().to_string()),
            ),
        };

        let entry = SyncHistoryEntry {
            id: Uuid::new_v4(),
            connector_id,
            org_id: session.org_id(),
            started_at,
            finished_at: Utc::now(),
            assets,
            images,
            outcome,
            error_code,
        };
        self.history
            .write()
            .entry(connector_id)
            .or_default()
            .push(entry.clone());

        {
            let mut all = self.connectors.write();
            if let Some(connector) = all
                .get_mut(&session.org_id())
                .and_then(|m| m.get_mut(&connector_id))
            {
                connector.last_outcome = Some(outcome);
                connector.last_synced_at = Some(entry.finished_at);
            }
        }
        self.active.lock().remove(&connector_id);

        tracing::info!(
            connector_id = %connector_id,
            outcome = ?outcome,
            created = entry.assets.created,
            updated = entry.assets.updated,
            removed = entry.assets.removed,
            "Connector sync finished"
        );
        Ok(entry)
    }

    /// Claim and run every due connector with one client.
    pub async fn sync_due(
        &self,
        session: &TenantSession,
        client: &dyn PlatformClient,
        now: DateTime<Utc>,
    ) -> Vec<SyncHistoryEntry> {
        let mut entries = Vec::new();
        for connector in self.due(session, now) {
            if self.claim(session, connector.id, now) {
                if let Ok(entry) = self.run_sync(session, connector.id, client).await {
                    entries.push(entry);
                }
            }
        }
        entries
    }

    /// Sync history for a connector, newest first.
    pub fn history(&self, connector_id: Uuid, limit: usize) -> Vec<SyncHistoryEntry> {
        self.history
            .read()
            .get(&connector_id)
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockPlatform;
    use chrono::Timelike;
    use fleetkern_registry::AssetFact;
    use fleetkern_tenancy::{
        ActorIdentity, OrganizationDirectory, QuotaEnforcer, RlsGateway, TenantContext,
    };

    fn setup() -> (ConnectorScheduler, TenantSession) {
        let dir = OrganizationDirectory::new();
        let org = dir.register("acme", "Acme").unwrap();
        let session = RlsGateway::new(dir)
            .session(&TenantContext::new(org.id, ActorIdentity::service("sync")))
            .unwrap();
        (
            ConnectorScheduler::new(AssetRegistry::new(QuotaEnforcer::new())),
            session,
        )
    }

    #[test]
    fn test_schedule_parse_laws() {
        let now = Utc::now();
        assert_eq!(next_sync_time("1h", now), now + Duration::hours(1));
        assert_eq!(next_sync_time("30m", now), now + Duration::minutes(30));
        assert_eq!(next_sync_time("1d", now), now + Duration::hours(24));
        // Invalid schedules default to one hour.
        assert_eq!(next_sync_time("garbage", now), now + Duration::hours(1));
    }

    #[test]
    fn test_cron_schedule() {
        let now = Utc::now();
        let next = next_sync_time("0 3 * * *", now);
        assert!(next > now);
        assert_eq!(next.hour(), 3);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_due_and_claim_cas() {
        let (scheduler, session) = setup();
        let connector = scheduler
            .register(&session, "aws-east", Platform::Aws, "1h")
            .unwrap();

        let now = Utc::now();
        assert_eq!(scheduler.due(&session, now).len(), 1);

        assert!(scheduler.claim(&session, connector.id, now));
        // next_sync_at advanced: no longer due, second claim fails.
        assert!(!scheduler.claim(&session, connector.id, now));
        assert!(scheduler.due(&session, now).is_empty());
    }

    #[test]
    fn test_one_active_run_per_connector() {
        let (scheduler, session) = setup();
        let connector = scheduler
            .register(&session, "aws-east", Platform::Aws, "1h")
            .unwrap();

        let now = Utc::now();
        assert!(scheduler.claim(&session, connector.id, now));

        // Even if it were due again, the active guard blocks a second run.
        let later = now + Duration::hours(2);
        assert!(!scheduler.claim(&session, connector.id, later));
    }

    #[test]
    fn test_disabled_not_due() {
        let (scheduler, session) = setup();
        let connector = scheduler
            .register(&session, "aws-east", Platform::Aws, "1h")
            .unwrap();
        scheduler
            .set_enabled(&session, connector.id, false)
            .unwrap();
        assert!(scheduler.due(&session, Utc::now()).is_empty());
    }

    #[test]
    fn test_name_unique_per_org() {
        let (scheduler, session) = setup();
        scheduler
            .register(&session, "aws-east", Platform::Aws, "1h")
            .unwrap();
        assert!(matches!(
            scheduler.register(&session, "aws-east", Platform::Aws, "30m"),
            Err(SchedulerError::NameTaken(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_records_history() {
        let (scheduler, session) = setup();
        let connector = scheduler
            .register(&session, "aws-east", Platform::Aws, "1h")
            .unwrap();
        let client = MockPlatform::new().with_assets(vec![
            AssetFact::new(Platform::Aws, "i-1", "web-linux", "2.5.0"),
            AssetFact::new(Platform::Aws, "i-2", "web-linux", "2.4.0"),
        ]);

        assert!(scheduler.claim(&session, connector.id, Utc::now()));
        let entry = scheduler
            .run_sync(&session, connector.id, &client)
            .await
            .unwrap();

        assert_eq!(entry.outcome, SyncOutcome::Success);
        assert_eq!(entry.assets.discovered, 2);
        assert_eq!(entry.assets.created, 2);
        assert_eq!(entry.images.discovered, 1);

        let history = scheduler.history(connector.id, 10);
        assert_eq!(history.len(), 1);

        // Active flag released: connector can be claimed again when due.
        let connector = scheduler.get(&session, connector.id).unwrap();
        assert_eq!(connector.last_outcome, Some(SyncOutcome::Success));
    }

    #[tokio::test]
    async fn test_run_without_claim_rejected() {
        let (scheduler, session) = setup();
        let connector = scheduler
            .register(&session, "aws-east", Platform::Aws, "1h")
            .unwrap();
        let client = MockPlatform::new();

        assert!(matches!(
            scheduler.run_sync(&session, connector.id, &client).await,
            Err(SchedulerError::NotClaimed(_))
        ));
    }
}
