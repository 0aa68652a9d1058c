//! Row-level security gateway.
//!
//! The gateway turns a [`TenantContext`] into a [`TenantSession`], the guard
//! every tenant-scoped store requires. A session binds exactly one `org_id`
//! for its lifetime; touching a row owned by a different organization is a
//! programmer error, not a user error, and is reported as
//! [`GatewayError::RowLevelViolation`].

use chrono::{DateTime, Utc};

use crate::context::{ActorIdentity, ActorType, OrgId, TenantContext};
use crate::org::OrganizationDirectory;

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("organization {0} is not registered")]
    UnknownOrganization(OrgId),
    #[error("row-level violation: session bound to {bound}, row owned by {row}")]
    RowLevelViolation { bound: OrgId, row: OrgId },
    #[error("admin mode requires a service identity (got {0})")]
    AdminModeForbidden(ActorType),
}

/// A session bound to one organization.
///
/// Stores accept `&TenantSession` instead of a raw `OrgId` so that unscoped
/// access is unrepresentable.
#[derive(Debug, Clone)]
pub struct TenantSession {
    org_id: OrgId,
    actor: ActorIdentity,
    admin_mode: bool,
    opened_at: DateTime<Utc>,
}

impl TenantSession {
    /// The bound organization.
    pub fn org_id(&self) -> OrgId {
        self.org_id
    }

    /// The actor behind this session.
    pub fn actor(&self) -> &ActorIdentity {
        &self.actor
    }

    /// Whether this is a cross-tenant maintenance session.
    pub fn is_admin(&self) -> bool {
        self.admin_mode
    }

    /// When the session was opened.
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Assert that a row owned by `row_org` may be touched by this session.
    ///
    /// Admin sessions may cross tenants; all others must match the bound
    /// organization exactly.
    pub fn check_row(&self, row_org: OrgId) -> Result<(), GatewayError> {
        if self.admin_mode || row_org == self.org_id {
            return Ok(());
        }
        tracing::error!(
            bound = %self.org_id,
            row = %row_org,
            actor = %self.actor.id,
            "Row-level security violation"
        );
        Err(GatewayError::RowLevelViolation {
            bound: self.org_id,
            row: row_org,
        })
    }
}

/// The RLS gateway: opens sessions against the organization directory.
#[derive(Clone)]
pub struct RlsGateway {
    directory: OrganizationDirectory,
}

impl RlsGateway {
    pub fn new(directory: OrganizationDirectory) -> Self {
        Self { directory }
    }

    /// Open a session for a tenant context.
    ///
    /// Fails when the organization is unknown, or when admin mode is
    /// requested by anything other than a service identity.
    pub fn session(&self, ctx: &TenantContext) -> Result<TenantSession, GatewayError> {
        if ctx.admin_mode && ctx.actor.actor_type != ActorType::Service {
            return Err(GatewayError::AdminModeForbidden(ctx.actor.actor_type));
        }
        if !self.directory.exists(ctx.org_id) {
            return Err(GatewayError::UnknownOrganization(ctx.org_id));
        }

        tracing::debug!(
            org_id = %ctx.org_id,
            actor = %ctx.actor.id,
            admin = ctx.admin_mode,
            "Tenant session opened"
        );

        Ok(TenantSession {
            org_id: ctx.org_id,
            actor: ctx.actor.clone(),
            admin_mode: ctx.admin_mode,
            opened_at: Utc::now(),
        })
    }

    /// The underlying directory.
    pub fn directory(&self) -> &OrganizationDirectory {
        &self.directory
    }
}
