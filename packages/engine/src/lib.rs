//! Fleetkern-Engine: Durable Workflow Adapter
//!
//! The contract the control plane consumes from a durable-execution engine:
//! workflows are deterministic functions with access to a frozen clock,
//! journaled activities, durable timers, named signals, and cancellation.
//! Activities execute at-least-once with retry policies declared beside
//! them; workflows progress exactly-once from the caller's view.
//!
//! The in-process implementation here keeps an append-only
//! [`WorkflowJournal`] per workflow: re-running a workflow over an existing
//! journal replays recorded step results instead of re-executing them, so a
//! worker crash resumes from the last checkpoint with identical final state.
//!
//! # Example
//!
//! ```rust,ignore
//! use fleetkern_engine::{ActivityOptions, DurableEngine};
//!
//! let engine = DurableEngine::new();
//! let ctx = engine.context(workflow_id);
//!
//! let out: u32 = ctx
//!     .activity("fetch", ActivityOptions::default(), || async { Ok(42) })
//!     .await?;
//! ctx.sleep(std::time::Duration::from_secs(300)).await; // durable timer
//! ```

pub mod error;
pub mod retry;
pub mod signal;
pub mod workflow;

// Re-exports
pub use error::{ErrorCode, OrchestratorError, RunFailure};
pub use retry::{ActivityOptions, RetryPolicy};
pub use signal::{SignalHub, CANCEL_SIGNAL};
pub use workflow::{
    CancelToken, DurableEngine, JournalRecord, StepKind, WorkflowContext, WorkflowJournal,
};
