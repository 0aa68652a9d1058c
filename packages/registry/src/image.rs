//! Golden image registry.
//!
//! Images are unique per `(org, family, version)`. For a given family, at
//! most one image holds `production` status: promotion atomically demotes
//! the previous target to `deprecated`. Lineage edges form a DAG; an edge
//! that would create a cycle is rejected at insert.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use fleetkern_tenancy::{
    OrgId, QuotaDenied, QuotaEnforcer, QuotaResource, TenantSession,
};

use crate::asset::Platform;

/// Image lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Draft,
    Validated,
    Production,
    Deprecated,
}

/// A golden image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    /// Row id
    pub id: Uuid,
    /// Owning organization
    pub org_id: OrgId,
    /// Image family (e.g. `web-linux`)
    pub family: String,
    /// Version within the family
    pub version: String,
    /// Lifecycle status
    pub status: ImageStatus,
    /// Whether the image is signed
    pub signed: bool,
    /// SBOM reference, when available
    pub sbom_ref: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Promotion timestamp, once production
    pub promoted_at: Option<DateTime<Utc>>,
}

/// Platform-specific identifier for an image in one region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCoordinate {
    pub image_id: Uuid,
    pub platform: Platform,
    pub region: String,
    /// Platform-native reference (AMI id, disk image URL, ...)
    pub native_ref: String,
}

/// Image registry errors.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image {family}:{version} already registered")]
    DuplicateVersion { family: String, version: String },
    #[error("image {family}:{version} not found")]
    NotFound { family: String, version: String },
    #[error("cannot promote {family}:{version} from status {status:?}")]
    InvalidPromotion {
        family: String,
        version: String,
        status: ImageStatus,
    },
    #[error("lineage edge {parent} -> {child} would create a cycle")]
    CycleDetected { parent: Uuid, child: Uuid },
    #[error(transparent)]
    Quota(#[from] QuotaDenied),
}

/// Tenant-partitioned golden-image store.
#[derive(Clone)]
pub struct ImageRegistry {
    images: Arc<RwLock<HashMap<OrgId, HashMap<Uuid, Image>>>>,
    coordinates: Arc<RwLock<HashMap<Uuid, Vec<ImageCoordinate>>>>,
    /// parent image id -> derived image ids
    lineage: Arc<RwLock<HashMap<Uuid, Vec<Uuid>>>>,
    quota: QuotaEnforcer,
}

impl ImageRegistry {
    pub fn new(quota: QuotaEnforcer) -> Self {
        Self {
            images: Arc::new(RwLock::new(HashMap::new())),
            coordinates: Arc::new(RwLock::new(HashMap::new())),
            lineage: Arc::new(RwLock::new(HashMap::new())),
            quota,
        }
    }

    /// Register a new image in `draft` status. Quota-gated on `images`.
    pub fn register(
        &self,
        session: &TenantSession,
        family: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Image, ImageError> {
        let family = family.into();
        let version = version.into();
        let org_id = session.org_id();

        let mut all = self.images.write();
        let org_images = all.entry(org_id).or_default();

        if org_images
            .values()
            .any(|i| i.family == family && i.version == version)
        {
            return Err(ImageError::DuplicateVersion { family, version });
        }

        self.quota
            .check_and_increment(session, QuotaResource::Images, 1)?;

        let image = Image {
            id: Uuid::new_v4(),
            org_id,
            family,
            version,
            status: ImageStatus::Draft,
            signed: false,
            sbom_ref: None,
            created_at: Utc::now(),
            promoted_at: None,
        };
        org_images.insert(image.id, image.clone());
        Ok(image)
    }

    /// Mark an image validated, attaching signing and SBOM evidence.
    pub fn mark_validated(
        &self,
        session: &TenantSession,
        family: &str,
        version: &str,
        signed: bool,
        sbom_ref: Option<String>,
    ) -> Result<Image, ImageError> {
        let mut all = self.images.write();
        let org_images = all.entry(session.org_id()).or_default();
        let image = org_images
            .values_mut()
            .find(|i| i.family == family && i.version == version)
            .ok_or_else(|| ImageError::NotFound {
                family: family.into(),
                version: version.into(),
            })?;

        image.status = ImageStatus::Validated;
        image.signed = signed;
        image.sbom_ref = sbom_ref;
        Ok(image.clone())
    }

    /// Promote a validated image to production.
    ///
    /// Atomically demotes the family's previous production image to
    /// `deprecated`, preserving the single-target invariant.
    pub fn promote(
        &self,
        session: &TenantSession,
        family: &str,
        version: &str,
    ) -> Result<Image, ImageError> {
        let mut all = self.images.write();
        let org_images = all.entry(session.org_id()).or_default();

        let status = org_images
            .values()
            .find(|i| i.family == family && i.version == version)
            .map(|i| i.status)
            .ok_or_else(|| ImageError::NotFound {
                family: family.into(),
                version: version.into(),
            })?;
        if !matches!(status, ImageStatus::Validated | ImageStatus::Production) {
            return Err(ImageError::InvalidPromotion {
                family: family.into(),
                version: version.into(),
                status,
            });
        }

        for image in org_images.values_mut() {
            if image.family == family
                && image.status == ImageStatus::Production
                && image.version != version
            {
                image.status = ImageStatus::Deprecated;
            }
        }

        let image = org_images
            .values_mut()
            .find(|i| i.family == family && i.version == version)
            .ok_or_else(|| ImageError::NotFound {
                family: family.into(),
                version: version.into(),
            })?;
        image.status = ImageStatus::Production;
        image.promoted_at = Some(Utc::now());

        tracing::info!(
            org_id = %session.org_id(),
            family = %family,
            version = %version,
            "Image promoted to production"
        );
        Ok(image.clone())
    }

    /// The current production target for a family, if any.
    pub fn current_production(&self, session: &TenantSession, family: &str) -> Option<Image> {
        self.images
            .read()
            .get(&session.org_id())
            .and_then(|m| {
                m.values()
                    .find(|i| i.family == family && i.status == ImageStatus::Production)
            })
            .cloned()
    }

    /// Production targets for every family, keyed by family name.
    pub fn production_by_family(&self, session: &TenantSession) -> HashMap<String, Image> {
        self.images
            .read()
            .get(&session.org_id())
            .map(|m| {
                m.values()
                    .filter(|i| i.status == ImageStatus::Production)
                    .map(|i| (i.family.clone(), i.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Look up one image.
    pub fn get(&self, session: &TenantSession, family: &str, version: &str) -> Option<Image> {
        self.images
            .read()
            .get(&session.org_id())
            .and_then(|m| {
                m.values()
                    .find(|i| i.family == family && i.version == version)
            })
            .cloned()
    }

    /// Attach a platform coordinate to an image.
    pub fn add_coordinate(&self, coordinate: ImageCoordinate) {
        self.coordinates
            .write()
            .entry(coordinate.image_id)
            .or_default()
            .push(coordinate);
    }

    /// Coordinates of an image.
    pub fn coordinates(&self, image_id: Uuid) -> Vec<ImageCoordinate> {
        self.coordinates
            .read()
            .get(&image_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Record that `child` was derived from `parent`.
    ///
    /// Rejected when the edge would close a cycle: `parent` must not already
    /// be reachable from `child`.
    pub fn add_lineage(&self, parent: Uuid, child: Uuid) -> Result<(), ImageError> {
        if parent == child || self.is_reachable(child, parent) {
            return Err(ImageError::CycleDetected { parent, child });
        }
        self.lineage.write().entry(parent).or_default().push(child);
        Ok(())
    }

    /// Whether `target` is reachable from `start` along lineage edges.
    fn is_reachable(&self, start: Uuid, target: Uuid) -> bool {
        let lineage = self.lineage.read();
        let mut visited = HashSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if !visited.insert(node) {
                continue;
            }
            if let Some(children) = lineage.get(&node) {
                stack.extend(children.iter().copied());
            }
        }
        false
    }

    /// All images derived from `root`, transitively. The traversal tracks a
    /// visited set along the path.
    pub fn descendants(&self, root: Uuid) -> Vec<Uuid> {
        let lineage = self.lineage.read();
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<Uuid> = lineage.get(&root).cloned().unwrap_or_default();
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            order.push(node);
            if let Some(children) = lineage.get(&node) {
                stack.extend(children.iter().copied());
            }
        }
        order
    }

    /// Drop an organization's images (cascade delete).
    pub fn purge(&self, session: &TenantSession, org_id: OrgId) {
        if !session.is_admin() && session.org_id() != org_id {
            return;
        }
        self.images.write().remove(&org_id);
    }
}
