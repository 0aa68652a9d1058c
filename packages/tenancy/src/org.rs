//! Organization directory.
//!
//! Organizations are the tenant roots; every tenant-scoped row is
//! transitively reachable to exactly one of them.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::OrgId;

/// An organization (tenant root).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    /// Organization id
    pub id: OrgId,
    /// Unique slug
    pub slug: String,
    /// Display name
    pub name: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Organization errors.
#[derive(Debug, thiserror::Error)]
pub enum OrgError {
    #[error("slug '{0}' already registered")]
    SlugTaken(String),
    #[error("organization {0} not found")]
    NotFound(OrgId),
}

/// Directory of registered organizations.
#[derive(Clone, Default)]
pub struct OrganizationDirectory {
    orgs: Arc<RwLock<HashMap<OrgId, Organization>>>,
}

impl OrganizationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new organization. Slugs are unique.
    pub fn register(
        &self,
        slug: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Organization, OrgError> {
        let slug = slug.into();
        let mut orgs = self.orgs.write();

        if orgs.values().any(|o| o.slug == slug) {
            return Err(OrgError::SlugTaken(slug));
        }

        let org = Organization {
            id: OrgId::new(),
            slug,
            name: name.into(),
            created_at: Utc::now(),
        };
        orgs.insert(org.id, org.clone());

        tracing::info!(org_id = %org.id, slug = %org.slug, "Organization registered");
        Ok(org)
    }

    /// Look up an organization by id.
    pub fn get(&self, org_id: OrgId) -> Option<Organization> {
        self.orgs.read().get(&org_id).cloned()
    }

    /// Look up an organization by slug.
    pub fn get_by_slug(&self, slug: &str) -> Option<Organization> {
        self.orgs.read().values().find(|o| o.slug == slug).cloned()
    }

    /// Whether the organization exists.
    pub fn exists(&self, org_id: OrgId) -> bool {
        self.orgs.read().contains_key(&org_id)
    }

    /// Remove an organization. Callers are responsible for purging owned
    /// rows from every tenant-scoped store (cascade).
    pub fn remove(&self, org_id: OrgId) -> Result<Organization, OrgError> {
        let removed = self
            .orgs
            .write()
            .remove(&org_id)
            .ok_or(OrgError::NotFound(org_id))?;
        tracing::warn!(org_id = %org_id, slug = %removed.slug, "Organization removed");
        Ok(removed)
    }

    /// Count of registered organizations.
    pub fn count(&self) -> usize {
        self.orgs.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let dir = OrganizationDirectory::new();
        let org = dir.register("acme", "Acme Corp").unwrap();

        assert!(dir.exists(org.id));
        assert_eq!(dir.get_by_slug("acme").unwrap().id, org.id);
    }

    #[test]
    fn test_slug_unique() {
        let dir = OrganizationDirectory::new();
        dir.register("acme", "Acme Corp").unwrap();

        let err = dir.register("acme", "Other").unwrap_err();
        assert!(matches!(err, OrgError::SlugTaken(_)));
    }

    #[test]
    fn test_remove() {
        let dir = OrganizationDirectory::new();
        let org = dir.register("acme", "Acme Corp").unwrap();

        dir.remove(org.id).unwrap();
        assert!(!dir.exists(org.id));
        assert!(dir.remove(org.id).is_err());
    }
}
