//! Durable signals.
//!
//! Signals are named, typed (JSON payload) messages delivered to a workflow.
//! Delivery is durable and ordered per workflow: a signal sent before the
//! workflow reaches its receive point is queued, not lost.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// Reserved signal name that requests workflow cancellation.
pub const CANCEL_SIGNAL: &str = "cancel";

/// Signal router shared by an engine and its workflows.
#[derive(Clone, Default)]
pub struct SignalHub {
    queues: Arc<Mutex<HashMap<Uuid, HashMap<String, VecDeque<serde_json::Value>>>>>,
    notify: Arc<Notify>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a signal to a workflow.
    pub fn send<T: Serialize>(&self, workflow_id: Uuid, name: &str, payload: &T) {
        let value = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
        let mut queues = self.queues.lock();
        queues
            .entry(workflow_id)
            .or_default()
            .entry(name.to_string())
            .or_default()
            .push_back(value);
        drop(queues);

        tracing::debug!(workflow_id = %workflow_id, signal = %name, "Signal delivered");
        self.notify.notify_waiters();
    }

    /// Pop the oldest pending signal with this name, if any.
    pub fn try_recv(&self, workflow_id: Uuid, name: &str) -> Option<serde_json::Value> {
        let mut queues = self.queues.lock();
        queues
            .get_mut(&workflow_id)
            .and_then(|by_name| by_name.get_mut(name))
            .and_then(|q| q.pop_front())
    }

    /// Await the next signal with this name.
    pub async fn recv(&self, workflow_id: Uuid, name: &str) -> serde_json::Value {
        loop {
            // Register the waiter before checking the queue, so a signal
            // delivered in between still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_recv(workflow_id, name) {
                return value;
            }
            notified.await;
        }
    }

    /// Drain all pending signals with this name, in delivery order.
    pub fn drain(&self, workflow_id: Uuid, name: &str) -> Vec<serde_json::Value> {
        let mut queues = self.queues.lock();
        queues
            .get_mut(&workflow_id)
            .and_then(|by_name| by_name.get_mut(name))
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// Whether a signal with this name is pending.
    pub fn has_pending(&self, workflow_id: Uuid, name: &str) -> bool {
        let queues = self.queues.lock();
        queues
            .get(&workflow_id)
            .and_then(|by_name| by_name.get(name))
            .map(|q| !q.is_empty())
            .unwrap_or(false)
    }

    /// Drop all state for a finished workflow.
    pub fn forget(&self, workflow_id: Uuid) {
        self.queues.lock().remove(&workflow_id);
    }
}
