//! SIEM export queue.
//!
//! Every audit row is mirrored onto this bounded queue for an external SIEM
//! shipper to drain. The queue never blocks the audit write path: when full,
//! the oldest unexported event is dropped, the drop is counted, and a
//! warning is logged.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

use fleetkern_tenancy::OrgId;

use crate::chain::AuditEntry;

/// Default queue capacity before backpressure drops.
const DEFAULT_CAPACITY: usize = 50_000;

/// One event awaiting SIEM export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiemEvent {
    /// Source audit row id
    pub entry_id: Uuid,
    /// Owning organization
    pub org_id: OrgId,
    /// Audit action
    pub action: String,
    /// Integrity hash of the source row
    pub integrity_hash: String,
    /// When the source row was written
    pub timestamp: DateTime<Utc>,
    /// When the event was enqueued
    pub enqueued_at: DateTime<Utc>,
}

/// Queue statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiemQueueStats {
    pub enqueued: u64,
    pub drained: u64,
    pub dropped: u64,
    pub pending: usize,
}

struct Inner {
    queue: VecDeque<SiemEvent>,
    capacity: usize,
    enqueued: u64,
    drained: u64,
    dropped: u64,
}

/// Bounded SIEM export queue.
#[derive(Clone)]
pub struct SiemQueue {
    inner: Arc<Mutex<Inner>>,
}

impl Default for SiemQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl SiemQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                enqueued: 0,
                drained: 0,
                dropped: 0,
            })),
        }
    }

    /// Enqueue an audit row for export.
    pub fn enqueue(&self, entry: &AuditEntry) {
        let mut inner = self.inner.lock();

        if inner.queue.len() >= inner.capacity {
            inner.queue.pop_front();
            inner.dropped += 1;
            tracing::warn!(
                entry_id = %entry.id,
                dropped_total = inner.dropped,
                "SIEM queue full, oldest event dropped"
            );
        }

        inner.queue.push_back(SiemEvent {
            entry_id: entry.id,
            org_id: entry.org_id,
            action: entry.action.clone(),
            integrity_hash: entry.integrity_hash.clone(),
            timestamp: entry.timestamp,
            enqueued_at: Utc::now(),
        });
        inner.enqueued += 1;
    }

    /// Drain up to `max` events in insertion order.
    pub fn drain(&self, max: usize) -> Vec<SiemEvent> {
        let mut inner = self.inner.lock();
        let n = max.min(inner.queue.len());
        let drained: Vec<SiemEvent> = inner.queue.drain(..n).collect();
        inner.drained += drained.len() as u64;
        drained
    }

    /// Events currently waiting.
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Queue statistics.
    pub fn stats(&self) -> SiemQueueStats {
        let inner = self.inner.lock();
        SiemQueueStats {
            enqueued: inner.enqueued,
            drained: inner.drained,
            dropped: inner.dropped,
            pending: inner.queue.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetkern_tenancy::ActorType;

    fn sample_entry(action: &str) -> AuditEntry {
        let now = Utc::now();
        AuditEntry {
            id: Uuid::new_v4(),
            timestamp: now,
            actor_type: ActorType::User,
            actor_id: "alice".into(),
            org_id: OrgId::new(),
            action: action.into(),
            resource_type: "task".into(),
            resource_id: "t-1".into(),
            changes: serde_json::Value::Null,
            integrity_hash: "h".into(),
            previous_hash: "p".into(),
            retention_days: 365,
            expires_at: now,
        }
    }

    #[test]
    fn test_enqueue_drain_order() {
        let queue = SiemQueue::new();
        queue.enqueue(&sample_entry("a"));
        queue.enqueue(&sample_entry("b"));

        let drained = queue.drain(10);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].action, "a");
        assert_eq!(drained[1].action, "b");
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_backpressure_drops_oldest() {
        let queue = SiemQueue::with_capacity(2);
        queue.enqueue(&sample_entry("a"));
        queue.enqueue(&sample_entry("b"));
        queue.enqueue(&sample_entry("c"));

        let stats = queue.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.pending, 2);

        let drained = queue.drain(10);
        assert_eq!(drained[0].action, "b");
    }

    #[test]
    fn test_partial_drain() {
        let queue = SiemQueue::new();
        for i in 0..5 {
            queue.enqueue(&sample_entry(&format!("a{i}")));
        }
        assert_eq!(queue.drain(3).len(), 3);
        assert_eq!(queue.pending(), 2);
    }
}
