//! Fleetkern-Tenancy: Tenant Context & Row-Level Isolation
//!
//! Every operation in the control plane runs on behalf of exactly one
//! organization. This crate provides:
//! - **Tenant context propagation**: `TenantContext` carried through call chains
//! - **Row-level isolation**: `TenantSession` guard bound to one `org_id`;
//!   stores refuse to operate without one
//! - **Admin escape hatch**: service identities may open cross-tenant sessions
//!   for maintenance
//! - **Quota & rate-limit enforcement**: atomic check-and-increment with
//!   idempotent period resets
//!
//! # Example
//!
//! ```rust,ignore
//! use fleetkern_tenancy::{OrganizationDirectory, RlsGateway, TenantContext};
//!
//! let directory = OrganizationDirectory::new();
//! let org = directory.register("acme", "Acme Corp")?;
//!
//! let gateway = RlsGateway::new(directory);
//! let session = gateway.session(&TenantContext::new(org.id, actor))?;
//! // every store call now requires `&session`
//! ```

pub mod context;
pub mod gateway;
pub mod org;
pub mod project;
pub mod quota;

// Re-exports
pub use context::{ActorIdentity, ActorType, OrgId, TenantContext};
pub use gateway::{GatewayError, RlsGateway, TenantSession};
pub use org::{OrgError, Organization, OrganizationDirectory};
pub use project::{Environment, EnvironmentName, Project, ProjectError, ProjectStore};
pub use quota::{
    DenyReason, QuotaDenied, QuotaEnforcer, QuotaLimits, QuotaReceipt, QuotaResource,
    QuotaSnapshot,
};
