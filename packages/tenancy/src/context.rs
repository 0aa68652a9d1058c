//! Tenant context types.
//!
//! The context is an explicit parameter passed through call chains; the
//! session guard in [`crate::gateway`] is the only place where it becomes
//! effectively ambient, scoped to one logical transaction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Organization identifier: the tenant root.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OrgId(pub Uuid);

impl OrgId {
    /// Generate a fresh organization id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrgId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The kind of identity performing an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    /// A human user
    User,
    /// A service identity (migrations, maintenance, schedulers)
    Service,
    /// An autonomous agent acting on behalf of a task
    Agent,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Service => write!(f, "service"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

/// Identity of the actor behind an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorIdentity {
    /// Actor kind
    pub actor_type: ActorType,
    /// Stable identifier (user id, service name, agent id)
    pub id: String,
    /// Roles held by this identity
    pub roles: Vec<String>,
}

impl ActorIdentity {
    /// Create a user identity.
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::User,
            id: id.into(),
            roles: Vec::new(),
        }
    }

    /// Create a service identity.
    pub fn service(id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::Service,
            id: id.into(),
            roles: Vec::new(),
        }
    }

    /// Create an agent identity.
    pub fn agent(id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::Agent,
            id: id.into(),
            roles: Vec::new(),
        }
    }

    /// Attach roles.
    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    /// Check whether this identity holds a role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Tenant context for one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantContext {
    /// Organization this operation is scoped to
    pub org_id: OrgId,
    /// Identity performing the operation
    pub actor: ActorIdentity,
    /// Cross-tenant maintenance mode; only service identities may request it
    pub admin_mode: bool,
    /// Request correlation id (for tracing)
    pub request_id: Option<String>,
}

impl TenantContext {
    /// Create a tenant-scoped context.
    pub fn new(org_id: OrgId, actor: ActorIdentity) -> Self {
        Self {
            org_id,
            actor,
            admin_mode: false,
            request_id: None,
        }
    }

    /// Set a request correlation id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Request admin mode. Validated by the gateway at session open: only
    /// service identities are granted cross-tenant access.
    pub fn with_admin_mode(mut self) -> Self {
        self.admin_mode = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_roles() {
        let actor = ActorIdentity::user("alice").with_roles(vec!["ops_approver".into()]);
        assert!(actor.has_role("ops_approver"));
        assert!(!actor.has_role("prod_approver"));
    }

    #[test]
    fn test_context_builder() {
        let ctx = TenantContext::new(OrgId::new(), ActorIdentity::service("scheduler"))
            .with_request_id("req-1")
            .with_admin_mode();
        assert!(ctx.admin_mode);
        assert_eq!(ctx.request_id.as_deref(), Some("req-1"));
    }
}
