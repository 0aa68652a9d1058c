//! Fleetkern-Audit: Immutable Audit Chain
//!
//! Every state-changing action in the control plane lands here as an
//! append-only, hash-chained row. The chain is per-organization; replaying
//! it from genesis reproduces every stored integrity hash, and the first
//! disagreement pinpoints tampering.
//!
//! Features:
//! - SHA-256 hash chain with genesis anchor
//! - Insert-only storage surface (no update or delete exists)
//! - Retention stamping (`expires_at`)
//! - SIEM export queue with bounded backpressure
//! - Tool invocations: the atomic audit unit for execution
//!
//! # Example
//!
//! ```rust,ignore
//! use fleetkern_audit::{AuditChain, AuditDraft};
//!
//! let chain = AuditChain::new();
//! chain.record(&session, AuditDraft::new("task.create", "task", task_id)).await?;
//! assert!(chain.verify(&session).await.valid);
//! ```

pub mod chain;
pub mod invocation;
pub mod siem;

// Re-exports
pub use chain::{
    AuditChain, AuditDraft, AuditEntry, AuditStats, ChainBreak, ChainBreakKind,
    ChainVerification, GENESIS_HASH,
};
pub use invocation::{InvocationStatus, RiskLevel, ToolInvocation};
pub use siem::{SiemEvent, SiemQueue, SiemQueueStats};
