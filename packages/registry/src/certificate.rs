//! Certificate lifecycle.
//!
//! Status is derived from `(not_after, renewal_threshold_days)` on every
//! insert or update; callers never set it directly. `revoked` and
//! `pending_renewal` are sticky. Expiring certificates emit a single alert
//! per `(certificate, threshold crossed)` pair.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use fleetkern_tenancy::{OrgId, TenantSession};

/// Derived certificate status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertStatus {
    Active,
    ExpiringSoon,
    Expired,
    /// Sticky: never overwritten by derivation
    Revoked,
    /// Sticky: never overwritten by derivation
    PendingRenewal,
}

impl CertStatus {
    fn is_sticky(&self) -> bool {
        matches!(self, Self::Revoked | Self::PendingRenewal)
    }
}

/// One inventoried certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    /// Row id
    pub id: Uuid,
    /// Owning organization
    pub org_id: OrgId,
    /// Fingerprint, unique per organization
    pub fingerprint: String,
    /// Subject common name
    pub common_name: String,
    /// Subject alternative names
    pub sans: Vec<String>,
    /// Validity window start
    pub not_before: DateTime<Utc>,
    /// Validity window end
    pub not_after: DateTime<Utc>,
    /// Derived status
    pub status: CertStatus,
    /// Whether rotation is automatic
    pub auto_renew: bool,
    /// Days before expiry at which the certificate counts as expiring
    pub renewal_threshold_days: i64,
    /// Derived: whole days until `not_after`
    pub days_until_expiry: i64,
    /// Last derivation instant
    pub updated_at: DateTime<Utc>,
}

/// Inventory input for a certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateFact {
    pub fingerprint: String,
    pub common_name: String,
    #[serde(default)]
    pub sans: Vec<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub auto_renew: bool,
    pub renewal_threshold_days: i64,
}

/// Alert emitted when a certificate crosses its renewal threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryAlert {
    pub certificate_id: Uuid,
    pub fingerprint: String,
    pub common_name: String,
    pub status: CertStatus,
    pub days_until_expiry: i64,
    pub emitted_at: DateTime<Utc>,
}

/// Tenant-partitioned certificate inventory.
#[derive(Clone, Default)]
pub struct CertificateInventory {
    certs: Arc<RwLock<HashMap<OrgId, HashMap<String, Certificate>>>>,
    /// `(certificate, threshold)` pairs already alerted
    alerted: Arc<RwLock<HashSet<(Uuid, i64)>>>,
}

/// Derive `(status, days_until_expiry)` at `now`, honoring sticky states.
fn derive(
    existing: Option<CertStatus>,
    not_after: DateTime<Utc>,
    renewal_threshold_days: i64,
    now: DateTime<Utc>,
) -> (CertStatus, i64) {
    let days_until_expiry = (not_after - now).num_days();

    if let Some(status) = existing {
        if status.is_sticky() {
            return (status, days_until_expiry);
        }
    }

    let status = if not_after <= now {
        CertStatus::Expired
    } else if days_until_expiry <= renewal_threshold_days {
        CertStatus::ExpiringSoon
    } else {
        CertStatus::Active
    };
    (status, days_until_expiry)
}

impl CertificateInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a certificate; status and `days_until_expiry` are
    /// derived here, never taken from the caller.
    pub fn upsert(&self, session: &TenantSession, fact: CertificateFact) -> Certificate {
        let now = Utc::now();
        let mut all = self.certs.write();
        let org_certs = all.entry(session.org_id()).or_default();

        let existing_status = org_certs.get(&fact.fingerprint).map(|c| c.status);
        let (status, days_until_expiry) = derive(
            existing_status,
            fact.not_after,
            fact.renewal_threshold_days,
            now,
        );

        let id = org_certs
            .get(&fact.fingerprint)
            .map(|c| c.id)
            .unwrap_or_else(Uuid::new_v4);

        let cert = Certificate {
            id,
            org_id: session.org_id(),
            fingerprint: fact.fingerprint.clone(),
            common_name: fact.common_name,
            sans: fact.sans,
            not_before: fact.not_before,
            not_after: fact.not_after,
            status,
            auto_renew: fact.auto_renew,
            renewal_threshold_days: fact.renewal_threshold_days,
            days_until_expiry,
            updated_at: now,
        };
        org_certs.insert(fact.fingerprint, cert.clone());
        cert
    }

    /// Mark a certificate revoked (sticky).
    pub fn revoke(&self, session: &TenantSession, fingerprint: &str) -> Option<Certificate> {
        let mut all = self.certs.write();
        let cert = all
            .get_mut(&session.org_id())
            .and_then(|m| m.get_mut(fingerprint))?;
        cert.status = CertStatus::Revoked;
        cert.updated_at = Utc::now();
        Some(cert.clone())
    }

    /// Mark a certificate as renewal-in-flight (sticky).
    pub fn mark_pending_renewal(
        &self,
        session: &TenantSession,
        fingerprint: &str,
    ) -> Option<Certificate> {
        let mut all = self.certs.write();
        let cert = all
            .get_mut(&session.org_id())
            .and_then(|m| m.get_mut(fingerprint))?;
        cert.status = CertStatus::PendingRenewal;
        cert.updated_at = Utc::now();
        Some(cert.clone())
    }

    /// Look up a certificate by fingerprint.
    pub fn get(&self, session: &TenantSession, fingerprint: &str) -> Option<Certificate> {
        self.certs
            .read()
            .get(&session.org_id())
            .and_then(|m| m.get(fingerprint))
            .cloned()
    }

    /// All certificates for the organization.
    pub fn list(&self, session: &TenantSession) -> Vec<Certificate> {
        self.certs
            .read()
            .get(&session.org_id())
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Re-derive every certificate and emit alerts for newly-crossed
    /// thresholds. Each `(certificate, threshold)` pair alerts at most once.
    pub fn sweep_expiring(&self, session: &TenantSession) -> Vec<ExpiryAlert> {
        let now = Utc::now();
        let mut alerts = Vec::new();
        let mut all = self.certs.write();
        let mut alerted = self.alerted.write();

        if let Some(org_certs) = all.get_mut(&session.org_id()) {
            for cert in org_certs.values_mut() {
                let (status, days) = derive(
                    Some(cert.status),
                    cert.not_after,
                    cert.renewal_threshold_days,
                    now,
                );
                cert.status = status;
                cert.days_until_expiry = days;
                cert.updated_at = now;

                if matches!(status, CertStatus::ExpiringSoon | CertStatus::Expired)
                    && alerted.insert((cert.id, cert.renewal_threshold_days))
                {
                    tracing::warn!(
                        fingerprint = %cert.fingerprint,
                        common_name = %cert.common_name,
                        days_until_expiry = days,
                        "Certificate crossing renewal threshold"
                    );
                    alerts.push(ExpiryAlert {
                        certificate_id: cert.id,
                        fingerprint: cert.fingerprint.clone(),
                        common_name: cert.common_name.clone(),
                        status,
                        days_until_expiry: days,
                        emitted_at: now,
                    });
                }
            }
        }
        alerts
    }

    /// Build a rotation plan payload for one certificate, consumable by the
    /// plan validator and the phased executor (atomic swap with rollback on
    /// validation failure).
    pub fn rotation_plan(
        &self,
        session: &TenantSession,
        fingerprint: &str,
    ) -> Option<serde_json::Value> {
        let cert = self.get(session, fingerprint)?;
        Some(serde_json::json!({
            "plan_type": "patch_plan",
            "description": format!("Rotate certificate {}", cert.common_name),
            "phases": [
                {
                    "name": "preflight",
                    "type": "preflight",
                    "asset_count": 0,
                },
                {
                    "name": "swap",
                    "type": "patch",
                    "asset_ids": [cert.fingerprint],
                    "health_checks": [
                        { "name": "tls_handshake", "type": "connectivity",
                          "target": cert.common_name, "timeout_secs": 30 }
                    ],
                },
                {
                    "name": "verify",
                    "type": "validation",
                    "asset_count": 0,
                }
            ],
            "rollback": {
                "max_error_rate": 0.0,
                "automatic_triggers": ["health_check_failure"],
                "scope": "campaign",
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fleetkern_tenancy::{
        ActorIdentity, OrganizationDirectory, RlsGateway, TenantContext,
    };

    fn session() -> TenantSession {
        let dir = OrganizationDirectory::new();
        let org = dir.register("acme", "Acme").unwrap();
        RlsGateway::new(dir)
            .session(&TenantContext::new(org.id, ActorIdentity::service("certs")))
            .unwrap()
    }

    fn fact(fingerprint: &str, not_after: DateTime<Utc>, threshold: i64) -> CertificateFact {
        CertificateFact {
            fingerprint: fingerprint.into(),
            common_name: "web.example.com".into(),
            sans: vec![],
            not_before: Utc::now() - Duration::days(30),
            not_after,
            auto_renew: true,
            renewal_threshold_days: threshold,
        }
    }

    #[test]
    fn test_boundary_statuses() {
        let inventory = CertificateInventory::new();
        let session = session();
        let now = Utc::now();

        // not_after = now -> expired
        let cert = inventory.upsert(&session, fact("f-1", now, 30));
        assert_eq!(cert.status, CertStatus::Expired);

        // not_after = now + threshold days -> expiring soon
        let cert = inventory.upsert(&session, fact("f-2", now + Duration::days(30), 30));
        assert_eq!(cert.status, CertStatus::ExpiringSoon);

        // not_after = now + threshold + 1 day -> active
        let cert = inventory.upsert(&session, fact("f-3", now + Duration::days(31), 30));
        assert_eq!(cert.status, CertStatus::Active);
    }

    #[test]
    fn test_sticky_statuses() {
        let inventory = CertificateInventory::new();
        let session = session();
        let far = Utc::now() + Duration::days(365);

        inventory.upsert(&session, fact("f-1", far, 30));
        inventory.revoke(&session, "f-1").unwrap();

        // Re-upsert would derive Active, but revoked is sticky.
        let cert = inventory.upsert(&session, fact("f-1", far, 30));
        assert_eq!(cert.status, CertStatus::Revoked);
    }

    #[test]
    fn test_alert_emitted_once() {
        let inventory = CertificateInventory::new();
        let session = session();

        inventory.upsert(&session, fact("f-1", Utc::now() + Duration::days(5), 30));

        let first = inventory.sweep_expiring(&session);
        assert_eq!(first.len(), 1);

        let second = inventory.sweep_expiring(&session);
        assert!(second.is_empty());
    }

    #[test]
    fn test_days_until_expiry_derived() {
        let inventory = CertificateInventory::new();
        let session = session();

        let cert = inventory.upsert(
            &session,
            fact("f-1", Utc::now() + Duration::days(10) + Duration::hours(1), 3),
        );
        assert_eq!(cert.days_until_expiry, 10);
        assert_eq!(cert.status, CertStatus::Active);
    }

    #[test]
    fn test_rotation_plan_shape() {
        let inventory = CertificateInventory::new();
        let session = session();
        inventory.upsert(&session, fact("f-1", Utc::now() + Duration::days(5), 30));

        let plan = inventory.rotation_plan(&session, "f-1").unwrap();
        assert_eq!(plan["plan_type"], "patch_plan");
        assert_eq!(plan["phases"].as_array().unwrap().len(), 3);
        assert_eq!(plan["rollback"]["scope"], "campaign");
    }
}
