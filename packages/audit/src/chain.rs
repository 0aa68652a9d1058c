//! Hash-chained audit storage.
//!
//! `integrity_hash = SHA-256(previous_hash || timestamp || actor_type ||
//! actor_id || org_id || action || resource_type || resource_id ||
//! changes_json)`. Rows for the same organization are totally ordered by the
//! chain. The storage surface is insert-and-read only; immutability is a
//! contract of the type, not a runtime check.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use fleetkern_tenancy::{ActorType, GatewayError, OrgId, TenantSession};

use crate::siem::SiemQueue;

/// Anchor hash for the first row of every org chain.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Default retention for audit rows, in days.
const DEFAULT_RETENTION_DAYS: i64 = 365;

/// One immutable audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Row id
    pub id: Uuid,
    /// Insertion timestamp
    pub timestamp: DateTime<Utc>,
    /// Actor kind
    pub actor_type: ActorType,
    /// Actor identifier
    pub actor_id: String,
    /// Owning organization
    pub org_id: OrgId,
    /// Action performed (e.g. `task.approve`, `campaign.phase_start`)
    pub action: String,
    /// Resource type acted on
    pub resource_type: String,
    /// Resource identifier
    pub resource_id: String,
    /// Structured change payload
    pub changes: serde_json::Value,
    /// Hash of this row's canonical fields chained to the predecessor
    pub integrity_hash: String,
    /// Predecessor's integrity hash (genesis anchor for the first row)
    pub previous_hash: String,
    /// Retention in days
    pub retention_days: i64,
    /// When this row may be expired out of hot storage
    pub expires_at: DateTime<Utc>,
}

/// Draft for a new audit row.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub changes: serde_json::Value,
    pub retention_days: i64,
}

impl AuditDraft {
    pub fn new(
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            changes: serde_json::Value::Null,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    /// Attach a structured change payload.
    pub fn with_changes(mut self, changes: serde_json::Value) -> Self {
        self.changes = changes;
        self
    }

    /// Override the retention window.
    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }
}

/// Kind of chain break found during verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainBreakKind {
    /// Recomputed hash disagrees with the stored `integrity_hash`
    HashMismatch,
    /// `previous_hash` does not match the stored predecessor
    LinkMismatch,
}

/// First break point in a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainBreak {
    /// Index of the first bad row
    pub index: usize,
    /// Id of the first bad row
    pub entry_id: Uuid,
    /// What disagreed
    pub kind: ChainBreakKind,
}

/// Result of replaying a chain from genesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainVerification {
    /// Whether every row verified
    pub valid: bool,
    /// Rows checked
    pub checked: usize,
    /// First break point, if any
    pub break_point: Option<ChainBreak>,
}

/// Chain statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_rows: usize,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
}

/// Append-only, hash-chained audit log, partitioned per organization.
#[derive(Clone, Default)]
pub struct AuditChain {
    chains: Arc<RwLock<HashMap<OrgId, Vec<AuditEntry>>>>,
    siem: SiemQueue,
}

impl AuditChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share the SIEM export queue fed by this chain.
    pub fn siem(&self) -> SiemQueue {
        self.siem.clone()
    }

    /// Canonical hash input for a row.
    fn compute_hash(
        previous_hash: &str,
        timestamp: DateTime<Utc>,
        actor_type: ActorType,
        actor_id: &str,
        org_id: OrgId,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        changes: &serde_json::Value,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(previous_hash.as_bytes());
        hasher.update(timestamp.to_rfc3339().as_bytes());
        hasher.update(actor_type.to_string().as_bytes());
        hasher.update(actor_id.as_bytes());
        hasher.update(org_id.to_string().as_bytes());
        hasher.update(action.as_bytes());
        hasher.update(resource_type.as_bytes());
        hasher.update(resource_id.as_bytes());
        hasher.update(changes.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Append a row to the session's org chain and enqueue it for SIEM
    /// export. Returns the stored row.
    pub async fn record(
        &self,
        session: &TenantSession,
        draft: AuditDraft,
    ) -> Result<AuditEntry, GatewayError> {
        let org_id = session.org_id();
        session.check_row(org_id)?;

        let mut chains = self.chains.write().await;
        let chain = chains.entry(org_id).or_default();

        let previous_hash = chain
            .last()
            .map(|e| e.integrity_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let timestamp = Utc::now();
        let actor = session.actor();
        let integrity_hash = Self::compute_hash(
            &previous_hash,
            timestamp,
            actor.actor_type,
            &actor.id,
            org_id,
            &draft.action,
            &draft.resource_type,
            &draft.resource_id,
            &draft.changes,
        );

        let entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp,
            actor_type: actor.actor_type,
            actor_id: actor.id.clone(),
            org_id,
            action: draft.action,
            resource_type: draft.resource_type,
            resource_id: draft.resource_id,
            changes: draft.changes,
            integrity_hash,
            previous_hash,
            retention_days: draft.retention_days,
            expires_at: timestamp + Duration::days(draft.retention_days),
        };

        chain.push(entry.clone());
        self.siem.enqueue(&entry);

        tracing::debug!(
            org_id = %org_id,
            action = %entry.action,
            resource = %entry.resource_id,
            "Audit row appended"
        );

        Ok(entry)
    }

    /// Replay the session's org chain from genesis and locate the first
    /// break point, if any.
    pub async fn verify(&self, session: &TenantSession) -> ChainVerification {
        let chains = self.chains.read().await;
        let chain = match chains.get(&session.org_id()) {
            Some(c) => c,
            None => {
                return ChainVerification {
                    valid: true,
                    checked: 0,
                    break_point: None,
                }
            }
        };

        let mut expected_previous = GENESIS_HASH.to_string();
        for (index, entry) in chain.iter().enumerate() {
            if entry.previous_hash != expected_previous {
                return ChainVerification {
                    valid: false,
                    checked: index + 1,
                    break_point: Some(ChainBreak {
                        index,
                        entry_id: entry.id,
                        kind: ChainBreakKind::LinkMismatch,
                    }),
                };
            }

            let recomputed = Self::compute_hash(
                &entry.previous_hash,
                entry.timestamp,
                entry.actor_type,
                &entry.actor_id,
                entry.org_id,
                &entry.action,
                &entry.resource_type,
                &entry.resource_id,
                &entry.changes,
            );
            if recomputed != entry.integrity_hash {
                return ChainVerification {
                    valid: false,
                    checked: index + 1,
                    break_point: Some(ChainBreak {
                        index,
                        entry_id: entry.id,
                        kind: ChainBreakKind::HashMismatch,
                    }),
                };
            }

            expected_previous = entry.integrity_hash.clone();
        }

        ChainVerification {
            valid: true,
            checked: chain.len(),
            break_point: None,
        }
    }

    /// Number of rows in the session's org chain.
    pub async fn count(&self, session: &TenantSession) -> usize {
        self.chains
            .read()
            .await
            .get(&session.org_id())
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// All rows for an action, oldest first.
    pub async fn query_by_action(
        &self,
        session: &TenantSession,
        action: &str,
    ) -> Vec<AuditEntry> {
        self.chains
            .read()
            .await
            .get(&session.org_id())
            .map(|c| c.iter().filter(|e| e.action == action).cloned().collect())
            .unwrap_or_default()
    }

    /// All rows touching a resource, oldest first.
    pub async fn query_by_resource(
        &self,
        session: &TenantSession,
        resource_type: &str,
        resource_id: &str,
    ) -> Vec<AuditEntry> {
        self.chains
            .read()
            .await
            .get(&session.org_id())
            .map(|c| {
                c.iter()
                    .filter(|e| e.resource_type == resource_type && e.resource_id == resource_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The most recent rows, newest first.
    pub async fn tail(&self, session: &TenantSession, limit: usize) -> Vec<AuditEntry> {
        self.chains
            .read()
            .await
            .get(&session.org_id())
            .map(|c| c.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Chain statistics.
    pub async fn stats(&self, session: &TenantSession) -> AuditStats {
        let chains = self.chains.read().await;
        let chain = chains.get(&session.org_id());
        AuditStats {
            total_rows: chain.map(|c| c.len()).unwrap_or(0),
            first_at: chain.and_then(|c| c.first()).map(|e| e.timestamp),
            last_at: chain.and_then(|c| c.last()).map(|e| e.timestamp),
        }
    }

    /// Export the session's chain as JSON for auditors.
    pub async fn export_json(
        &self,
        session: &TenantSession,
    ) -> Result<String, serde_json::Error> {
        let chains = self.chains.read().await;
        let empty = Vec::new();
        let chain = chains.get(&session.org_id()).unwrap_or(&empty);
        serde_json::to_string_pretty(chain)
    }

    /// Drop an organization's chain (cascade delete). Admin sessions only;
    /// non-admin callers may only purge their own organization.
    pub async fn purge(&self, session: &TenantSession, org_id: OrgId) {
        if !session.is_admin() && session.org_id() != org_id {
            return;
        }
        self.chains.write().await.remove(&org_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetkern_tenancy::{ActorIdentity, OrganizationDirectory, RlsGateway, TenantContext};

    async fn chain_session() -> (AuditChain, TenantSession) {
        let dir = OrganizationDirectory::new();
        let org = dir.register("acme", "Acme").unwrap();
        let gateway = RlsGateway::new(dir);
        let session = gateway
            .session(&TenantContext::new(org.id, ActorIdentity::user("alice")))
            .unwrap();
        (AuditChain::new(), session)
    }

    #[tokio::test]
    async fn test_genesis_anchor() {
        let (chain, session) = chain_session().await;
        let entry = chain
            .record(&session, AuditDraft::new("task.create", "task", "t-1"))
            .await
            .unwrap();
        assert_eq!(entry.previous_hash, GENESIS_HASH);
    }

    #[tokio::test]
    async fn test_chain_links() {
        let (chain, session) = chain_session().await;
        let first = chain
            .record(&session, AuditDraft::new("task.create", "task", "t-1"))
            .await
            .unwrap();
        let second = chain
            .record(&session, AuditDraft::new("task.approve", "task", "t-1"))
            .await
            .unwrap();
        assert_eq!(second.previous_hash, first.integrity_hash);
    }

    #[tokio::test]
    async fn test_replay_verifies() {
        let (chain, session) = chain_session().await;
        for i in 0..10 {
            chain
                .record(
                    &session,
                    AuditDraft::new("asset.sync", "asset", format!("a-{i}"))
                        .with_changes(serde_json::json!({ "seq": i })),
                )
                .await
                .unwrap();
        }

        let verification = chain.verify(&session).await;
        assert!(verification.valid);
        assert_eq!(verification.checked, 10);
        assert!(verification.break_point.is_none());
    }

    #[tokio::test]
    async fn test_empty_chain_is_valid() {
        let (chain, session) = chain_session().await;
        let verification = chain.verify(&session).await;
        assert!(verification.valid);
        assert_eq!(verification.checked, 0);
    }

    #[tokio::test]
    async fn test_retention_stamp() {
        let (chain, session) = chain_session().await;
        let entry = chain
            .record(
                &session,
                AuditDraft::new("image.promote", "image", "i-1").with_retention_days(30),
            )
            .await
            .unwrap();
        assert_eq!(entry.expires_at, entry.timestamp + Duration::days(30));
    }

    #[tokio::test]
    async fn test_siem_receives_rows() {
        let (chain, session) = chain_session().await;
        chain
            .record(&session, AuditDraft::new("task.create", "task", "t-1"))
            .await
            .unwrap();

        let siem = chain.siem();
        let drained = siem.drain(10);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].action, "task.create");
    }

    #[tokio::test]
    async fn test_query_by_resource() {
        let (chain, session) = chain_session().await;
        chain
            .record(&session, AuditDraft::new("task.create", "task", "t-1"))
            .await
            .unwrap();
        chain
            .record(&session, AuditDraft::new("task.create", "task", "t-2"))
            .await
            .unwrap();

        let rows = chain.query_by_resource(&session, "task", "t-1").await;
        assert_eq!(rows.len(), 1);
    }
}
