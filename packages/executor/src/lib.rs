//! Fleetkern-Executor: Phased Execution
//!
//! The execution layer of the control plane:
//!
//! - **Platform client contract**: the seam to AWS / Azure / GCP / vSphere /
//!   K8s implementations, with typed errors and a deterministic mock
//! - **Phased executor**: per-phase fan-out with health checks, durable wait
//!   gates and auto-rollback on error-rate breach
//! - **DR drill coordinator**: the fixed six-phase drill pipeline with
//!   per-pair outcomes and RTO/RPO metrics
//! - **Connector scheduler**: per-connector sync claims with schedule
//!   parsing (`1h` literals or cron) and sync history
//!
//! Everything state-changing lands in the audit chain as tool invocations;
//! all long waits go through the durable engine's timers.

pub mod campaign;
pub mod drill;
pub mod health;
pub mod platform;
pub mod rollback;
pub mod scheduler;

// Re-exports
pub use campaign::{
    CampaignOutcome, CampaignStatus, PhaseResult, PhasedExecutor, ROLLBACK_SIGNAL,
};
pub use drill::{
    DrPair, DrillConfigError, DrillCoordinator, DrillPhase, DrillPolicy, DrillReport,
    DrillStatus, DrSiteClient, MockSiteClient, PairOutcome, ReplicationStatus, SiteHealth,
    ValidationCheck,
};
pub use health::{run_checks, AlwaysHealthy, HealthCheckOutcome, HealthProbe, ScriptedProbe};
pub use platform::{
    ActionReceipt, ActionStatus, ActionVerification, ImageFact, MockPlatform, PlatformClient,
    PlatformError, SnapshotReceipt,
};
pub use rollback::{RollbackOutcome, RollbackReport};
pub use scheduler::{
    next_sync_time, Connector, ConnectorScheduler, SchedulerError, SyncHistoryEntry,
    SyncOutcome,
};
