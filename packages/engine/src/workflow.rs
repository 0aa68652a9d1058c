//! Workflow context and journal.
//!
//! A workflow is a deterministic async function over a [`WorkflowContext`].
//! Every non-deterministic step (activity execution, timers, the clock,
//! generated ids) is journaled under a sequence number. Re-running the
//! workflow over an existing journal replays recorded outcomes in program
//! order instead of re-executing them; the first un-journaled step resumes
//! live execution. This is what makes progress exactly-once from the
//! caller's view while activities remain at-least-once.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{ErrorCode, OrchestratorError};
use crate::retry::ActivityOptions;
use crate::signal::{SignalHub, CANCEL_SIGNAL};

/// Kind of journaled step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "step")]
pub enum StepKind {
    /// An activity invocation
    Activity { name: String },
    /// A durable timer
    Timer { duration_ms: u64 },
    /// The frozen clock read
    Now,
    /// A journaled id generation
    UniqueId,
}

/// One journaled step outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Program-order sequence number
    pub seq: u64,
    /// Step kind
    pub kind: StepKind,
    /// Whether the step succeeded
    pub success: bool,
    /// Result payload for successful steps
    pub value: serde_json::Value,
    /// Taxonomy code for failed steps
    pub error_code: Option<ErrorCode>,
    /// Message for failed steps
    pub error_message: Option<String>,
    /// When the outcome was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Append-only journal for one workflow.
#[derive(Clone, Default)]
pub struct WorkflowJournal {
    records: Arc<Mutex<Vec<JournalRecord>>>,
}

impl WorkflowJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of journaled steps.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Snapshot of all records, in order.
    pub fn records(&self) -> Vec<JournalRecord> {
        self.records.lock().clone()
    }

    fn get(&self, seq: u64) -> Option<JournalRecord> {
        self.records.lock().get(seq as usize).cloned()
    }

    fn append(&self, record: JournalRecord) {
        self.records.lock().push(record);
    }
}

/// Cancellation handle observable from inside activities, between
/// heartbeats.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Heartbeat check: errors once cancellation was requested.
    pub fn check(&self) -> Result<(), OrchestratorError> {
        if self.is_cancelled() {
            Err(OrchestratorError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Execution context handed to a workflow function.
pub struct WorkflowContext {
    workflow_id: Uuid,
    journal: WorkflowJournal,
    cursor: Mutex<u64>,
    signals: SignalHub,
    cancel: CancelToken,
}

impl WorkflowContext {
    /// The workflow's id.
    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    /// The journal backing this context.
    pub fn journal(&self) -> WorkflowJournal {
        self.journal.clone()
    }

    /// Cancellation handle for long activities.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.signals.has_pending(self.workflow_id, CANCEL_SIGNAL)
    }

    /// Fail with `cancelled` once cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), OrchestratorError> {
        if self.is_cancelled() {
            Err(OrchestratorError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Durable logger: fields carry the workflow id for correlation.
    pub fn log(&self, message: &str) {
        tracing::info!(workflow_id = %self.workflow_id, "{message}");
    }

    fn next_seq(&self) -> u64 {
        let mut cursor = self.cursor.lock();
        let seq = *cursor;
        *cursor += 1;
        seq
    }

    fn replay<T: DeserializeOwned>(record: JournalRecord) -> Result<T, OrchestratorError> {
        if record.success {
            serde_json::from_value(record.value).map_err(|e| {
                OrchestratorError::Unknown(format!("journal payload mismatch: {e}"))
            })
        } else {
            Err(OrchestratorError::from_code(
                record.error_code.unwrap_or(ErrorCode::Unknown),
                record.error_message.unwrap_or_default(),
            ))
        }
    }

    /// Wall-clock time frozen at first read; replays return the recorded
    /// instant.
    pub fn now(&self) -> DateTime<Utc> {
        let seq = self.next_seq();
        if let Some(record) = self.journal.get(seq) {
            return serde_json::from_value(record.value).unwrap_or_else(|_| Utc::now());
        }
        let now = Utc::now();
        self.journal.append(JournalRecord {
            seq,
            kind: StepKind::Now,
            success: true,
            value: serde_json::to_value(now).unwrap_or(serde_json::Value::Null),
            error_code: None,
            error_message: None,
            recorded_at: now,
        });
        now
    }

    /// Journaled id generation: stable across replays.
    pub fn unique_id(&self) -> Uuid {
        let seq = self.next_seq();
        if let Some(record) = self.journal.get(seq) {
            return serde_json::from_value(record.value).unwrap_or_else(|_| Uuid::new_v4());
        }
        let id = Uuid::new_v4();
        self.journal.append(JournalRecord {
            seq,
            kind: StepKind::UniqueId,
            success: true,
            value: serde_json::to_value(id).unwrap_or(serde_json::Value::Null),
            error_code: None,
            error_message: None,
            recorded_at: Utc::now(),
        });
        id
    }

    /// Durable timer. A resumed workflow does not re-sleep a wait that
    /// already elapsed before the crash.
    pub async fn sleep(&self, duration: Duration) {
        let seq = self.next_seq();
        if self.journal.get(seq).is_some() {
            return;
        }
        tokio::time::sleep(duration).await;
        self.journal.append(JournalRecord {
            seq,
            kind: StepKind::Timer {
                duration_ms: duration.as_millis() as u64,
            },
            success: true,
            value: serde_json::Value::Null,
            error_code: None,
            error_message: None,
            recorded_at: Utc::now(),
        });
    }

    /// Execute an activity with at-least-once semantics.
    ///
    /// The retry policy lives in `options`; the final outcome (success or
    /// exhausted failure) is journaled, so a replayed workflow observes the
    /// identical result without re-executing the body.
    pub async fn activity<T, F, Fut>(
        &self,
        name: &str,
        options: ActivityOptions,
        mut f: F,
    ) -> Result<T, OrchestratorError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
    {
        let seq = self.next_seq();
        if let Some(record) = self.journal.get(seq) {
            if let StepKind::Activity { name: recorded } = &record.kind {
                if recorded != name {
                    return Err(OrchestratorError::Unknown(format!(
                        "journal divergence at seq {seq}: recorded '{recorded}', executing '{name}'"
                    )));
                }
            }
            return Self::replay(record);
        }

        let mut attempt: u32 = 1;
        let outcome = loop {
            if let Err(cancelled) = self.check_cancelled() {
                break Err(cancelled);
            }

            let result = match tokio::time::timeout(options.start_to_close, f()).await {
                Ok(result) => result,
                Err(_) => Err(OrchestratorError::Timeout(options.start_to_close.as_secs())),
            };

            match result {
                Ok(value) => break Ok(value),
                Err(err) if options.retry.should_retry(&err, attempt) => {
                    let delay = options.retry.delay_for(attempt);
                    tracing::warn!(
                        workflow_id = %self.workflow_id,
                        activity = %name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Activity failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => break Err(err),
            }
        };

        let record = match &outcome {
            Ok(value) => JournalRecord {
                seq,
                kind: StepKind::Activity { name: name.into() },
                success: true,
                value: serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
                error_code: None,
                error_message: None,
                recorded_at: Utc::now(),
            },
            Err(err) => JournalRecord {
                seq,
                kind: StepKind::Activity { name: name.into() },
                success: false,
                value: serde_json::Value::Null,
                error_code: Some(err.code()),
                error_message: Some(err.to_string()),
                recorded_at: Utc::now(),
            },
        };
        self.journal.append(record);
        outcome
    }

    /// Pop a pending signal, if any.
    pub fn try_signal(&self, name: &str) -> Option<serde_json::Value> {
        self.signals.try_recv(self.workflow_id, name)
    }

    /// Await the next signal with this name.
    pub async fn wait_signal(&self, name: &str) -> serde_json::Value {
        self.signals.recv(self.workflow_id, name).await
    }
}

/// In-process durable engine: journals, signals and cancellation per
/// workflow. `context(id)` on a known id resumes from the stored journal.
#[derive(Clone, Default)]
pub struct DurableEngine {
    journals: Arc<Mutex<HashMap<Uuid, WorkflowJournal>>>,
    cancels: Arc<Mutex<HashMap<Uuid, CancelToken>>>,
    signals: SignalHub,
}

impl DurableEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or resume) the context for a workflow id.
    pub fn context(&self, workflow_id: Uuid) -> WorkflowContext {
        let journal = self
            .journals
            .lock()
            .entry(workflow_id)
            .or_default()
            .clone();
        let cancel = self
            .cancels
            .lock()
            .entry(workflow_id)
            .or_default()
            .clone();

        WorkflowContext {
            workflow_id,
            journal,
            cursor: Mutex::new(0),
            signals: self.signals.clone(),
            cancel,
        }
    }

    /// The shared signal hub.
    pub fn signals(&self) -> SignalHub {
        self.signals.clone()
    }

    /// Request cancellation: sets the token and delivers the cancel signal.
    pub fn cancel(&self, workflow_id: Uuid) {
        if let Some(token) = self.cancels.lock().get(&workflow_id) {
            token.cancel();
        }
        self.signals
            .send(workflow_id, CANCEL_SIGNAL, &serde_json::Value::Null);
        tracing::info!(workflow_id = %workflow_id, "Workflow cancellation requested");
    }

    /// The journal for a workflow, if it ever ran.
    pub fn journal(&self, workflow_id: Uuid) -> Option<WorkflowJournal> {
        self.journals.lock().get(&workflow_id).cloned()
    }

    /// Drop all engine state for a finished workflow.
    pub fn forget(&self, workflow_id: Uuid) {
        self.journals.lock().remove(&workflow_id);
        self.cancels.lock().remove(&workflow_id);
        self.signals.forget(workflow_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_activity_executes_and_journals() {
        let engine = DurableEngine::new();
        let wf = Uuid::new_v4();
        let ctx = engine.context(wf);

        let out: u32 = ctx
            .activity("double", ActivityOptions::default(), || async { Ok(21 * 2) })
            .await
            .unwrap();
        assert_eq!(out, 42);
        assert_eq!(ctx.journal().len(), 1);
    }

    #[tokio::test]
    async fn test_replay_does_not_reexecute() {
        let engine = DurableEngine::new();
        let wf = Uuid::new_v4();
        let executions = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let ctx = engine.context(wf);
            let executions = executions.clone();
            let out: u32 = ctx
                .activity("count", ActivityOptions::default(), || {
                    let executions = executions.clone();
                    async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        Ok(7)
                    }
                })
                .await
                .unwrap();
            assert_eq!(out, 7);
        }

        // Second run replayed the journal instead of executing again.
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_crash_resume_identical_state() {
        let engine = DurableEngine::new();
        let wf = Uuid::new_v4();

        async fn run(ctx: &WorkflowContext) -> (Uuid, u32) {
            let id = ctx.unique_id();
            let n: u32 = ctx
                .activity("step", ActivityOptions::default(), || async { Ok(5) })
                .await
                .unwrap();
            (id, n)
        }

        let first = run(&engine.context(wf)).await;
        let second = run(&engine.context(wf)).await; // simulated restart
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let engine = DurableEngine::new();
        let ctx = engine.context(Uuid::new_v4());
        let attempts = Arc::new(AtomicU32::new(0));

        let options = ActivityOptions::default().with_retry(
            crate::retry::RetryPolicy::default()
                .with_initial_interval(Duration::from_millis(1))
                .with_max_attempts(3),
        );

        let attempts2 = attempts.clone();
        let out: &str = {
            let result: Result<String, _> = ctx
                .activity("flaky", options, || {
                    let attempts = attempts2.clone();
                    async move {
                        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(OrchestratorError::Transient("blip".into()))
                        } else {
                            Ok("ok".to_string())
                        }
                    }
                })
                .await;
            assert_eq!(result.unwrap(), "ok");
            "done"
        };
        assert_eq!(out, "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let engine = DurableEngine::new();
        let ctx = engine.context(Uuid::new_v4());
        let attempts = Arc::new(AtomicU32::new(0));

        let attempts2 = attempts.clone();
        let result: Result<(), _> = ctx
            .activity("denied", ActivityOptions::default(), || {
                let attempts = attempts2.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(OrchestratorError::Permission("nope".into()))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::PermissionError);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_outcome_replays_as_failure() {
        let engine = DurableEngine::new();
        let wf = Uuid::new_v4();

        for _ in 0..2 {
            let ctx = engine.context(wf);
            let result: Result<(), _> = ctx
                .activity("denied", ActivityOptions::no_retry(), || async {
                    Err(OrchestratorError::Validation("bad plan".into()))
                })
                .await;
            assert_eq!(result.unwrap_err().code(), ErrorCode::ValidationError);
        }
        assert_eq!(engine.journal(wf).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_durable_timer_does_not_resleep() {
        let engine = DurableEngine::new();
        let wf = Uuid::new_v4();

        let ctx = engine.context(wf);
        ctx.sleep(Duration::from_millis(50)).await;

        let resumed = engine.context(wf);
        let started = std::time::Instant::now();
        resumed.sleep(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_taxonomy() {
        let engine = DurableEngine::new();
        let ctx = engine.context(Uuid::new_v4());

        let options = ActivityOptions::no_retry().with_timeout(Duration::from_millis(10));
        let result: Result<(), _> = ctx
            .activity("slow", options, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(result.unwrap_err().code(), ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn test_cancellation_observed() {
        let engine = DurableEngine::new();
        let wf = Uuid::new_v4();
        let ctx = engine.context(wf);

        engine.cancel(wf);

        let result: Result<(), _> = ctx
            .activity("late", ActivityOptions::default(), || async { Ok(()) })
            .await;
        assert_eq!(result.unwrap_err().code(), ErrorCode::Cancelled);
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_frozen_clock_stable_across_replay() {
        let engine = DurableEngine::new();
        let wf = Uuid::new_v4();

        let first = engine.context(wf).now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = engine.context(wf).now();
        assert_eq!(first, second);
    }
}
