use crate::aggregation::snapshot::{FrameSnapshot, SnapshotPayload};
use crate::publish::{PublishAck, SinkError, SnapshotSink};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

const CREATED: u16 = 201;

#[derive(Debug, Default)]
struct Recorded {
    payloads: VecDeque<serde_json::Value>,
    attempts: usize,
    failure: Option<String>,
}

/// In-process sink that keeps the serialized payloads it receives.
///
/// Clones share the same record, so a test can keep a handle while the
/// engine owns the sink. Also used as the dry-run sink when no endpoint is
/// configured.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    recorded: Arc<Mutex<Recorded>>,
    retain: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the most recent `limit` payloads.
    pub fn bounded(limit: usize) -> Self {
        Self {
            recorded: Arc::default(),
            retain: Some(limit.max(1)),
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        let sink = Self::new();
        sink.set_failure(Some(reason.into()));
        sink
    }

    pub fn set_failure(&self, failure: Option<String>) {
        self.lock().failure = failure;
    }

    pub fn published(&self) -> Vec<serde_json::Value> {
        self.lock().payloads.iter().cloned().collect()
    }

    pub fn published_count(&self) -> usize {
        self.lock().payloads.len()
    }

    pub fn attempt_count(&self) -> usize {
        self.lock().attempts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotSink for MemorySink {
    fn publish(&self, snapshot: &FrameSnapshot) -> Result<PublishAck, SinkError> {
        let payload = serde_json::to_value(SnapshotPayload::from_snapshot(snapshot)?)?;

        let mut recorded = self.lock();
        recorded.attempts += 1;
        if let Some(reason) = recorded.failure.clone() {
            return Err(SinkError::Rejected(reason));
        }

        recorded.payloads.push_back(payload);
        if let Some(limit) = self.retain {
            while recorded.payloads.len() > limit {
                recorded.payloads.pop_front();
            }
        }
        debug!(
            people = snapshot.overall_count,
            zones = snapshot.zones.len(),
            "Snapshot recorded in memory sink"
        );

        Ok(PublishAck {
            status: CREATED,
            alerts_triggered: Some(snapshot.alerting_zones() as u32),
        })
    }
}
