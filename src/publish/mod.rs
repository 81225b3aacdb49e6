//! Rate-limited delivery of snapshots to an external consumer.
//!
//! Publishing is last-value-wins sampling: at most one attempt per interval,
//! using whatever snapshot is current when the interval elapses. Nothing is
//! queued or retried; a failed attempt still consumes the interval.

use crate::aggregation::snapshot::{FrameSnapshot, format_timestamp};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

pub mod http;
pub mod memory;

/// Consumer acknowledgement of an accepted snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishAck {
    pub status: u16,
    /// Zones the consumer escalated into an alert, when it reports them.
    pub alerts_triggered: Option<u32>,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("dns error: {0}")]
    Dns(String),
    #[error("connect error: {0}")]
    Connect(std::io::Error),
    #[error("io error: {0}")]
    Io(std::io::Error),
    #[error("http status {0} ({1})")]
    Http(u16, String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("timestamp error: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error("sink rejected snapshot: {0}")]
    Rejected(String),
}

/// Destination for published snapshots.
///
/// Implementations must return within a bounded time; the frame loop waits
/// on this call.
pub trait SnapshotSink: Send + std::fmt::Debug {
    fn publish(&self, snapshot: &FrameSnapshot) -> Result<PublishAck, SinkError>;
}

#[derive(Debug)]
pub enum PublishOutcome {
    /// Interval not yet elapsed; nothing was sent.
    Skipped,
    Delivered(PublishAck),
    Failed(SinkError),
}

impl PublishOutcome {
    pub fn attempted(&self) -> bool {
        !matches!(self, PublishOutcome::Skipped)
    }
}

#[derive(Debug, Clone)]
pub struct PublishScheduler {
    interval: Duration,
    last_publish: Option<Instant>,
}

impl PublishScheduler {
    /// First publish happens one full interval after `started_at`.
    pub fn new(interval: Duration, started_at: Instant) -> Self {
        Self {
            interval,
            last_publish: Some(started_at),
        }
    }

    /// First publish happens on the first check.
    pub fn immediate(interval: Duration) -> Self {
        Self {
            interval,
            last_publish: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_publish(&self) -> Option<Instant> {
        self.last_publish
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_publish {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    /// Publish `snapshot` if the interval has elapsed.
    ///
    /// The stamp advances after every attempt, successful or not.
    pub fn poll(
        &mut self,
        sink: &dyn SnapshotSink,
        snapshot: &FrameSnapshot,
        now: Instant,
    ) -> PublishOutcome {
        if !self.is_due(now) {
            return PublishOutcome::Skipped;
        }

        let result = sink.publish(snapshot);
        self.last_publish = Some(now);

        match result {
            Ok(ack) => {
                info!(
                    people = snapshot.overall_count,
                    status = ack.status,
                    alerts_triggered = ?ack.alerts_triggered,
                    "Snapshot published"
                );
                if let Some(alerts) = ack.alerts_triggered
                    && alerts > 0
                {
                    warn!(zones = alerts, "Consumer raised crowd alert");
                }
                PublishOutcome::Delivered(ack)
            }
            Err(err) => {
                let timestamp = format_timestamp(snapshot.timestamp)
                    .unwrap_or_else(|_| "unknown".to_string());
                warn!(
                    %timestamp,
                    people = snapshot.overall_count,
                    error = %err,
                    "Snapshot publish failed"
                );
                PublishOutcome::Failed(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::FrameSize;
    use crate::publish::memory::MemorySink;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn empty_snapshot() -> FrameSnapshot {
        FrameSnapshot {
            timestamp: UNIX_EPOCH,
            overall_count: 0,
            zones: Vec::new(),
            frame: FrameSize {
                width: 640,
                height: 480,
            },
        }
    }

    fn run_frames(scheduler: &mut PublishScheduler, sink: &MemorySink, start: Instant) -> Vec<u64> {
        let snapshot = empty_snapshot();
        (0..=10u64)
            .filter(|t| {
                let now = start + Duration::from_secs(*t);
                scheduler.poll(sink, &snapshot, now).attempted()
            })
            .collect()
    }

    #[test]
    fn publishes_twice_over_ten_seconds_at_five_second_interval() {
        let start = Instant::now();
        let mut scheduler = PublishScheduler::new(Duration::from_secs(5), start);
        let sink = MemorySink::new();

        let attempts = run_frames(&mut scheduler, &sink, start);

        assert_eq!(attempts, vec![5, 10]);
        assert_eq!(sink.published_count(), 2);
    }

    #[test]
    fn immediate_scheduler_publishes_on_first_check() {
        let start = Instant::now();
        let mut scheduler = PublishScheduler::immediate(Duration::from_secs(5));
        let sink = MemorySink::new();

        let attempts = run_frames(&mut scheduler, &sink, start);

        assert_eq!(attempts, vec![0, 5, 10]);
        assert_eq!(sink.published_count(), 3);
    }

    #[test]
    fn failed_publish_still_advances_stamp() {
        let start = Instant::now();
        let mut scheduler = PublishScheduler::new(Duration::from_secs(5), start);
        let sink = MemorySink::failing("consumer offline");
        let snapshot = empty_snapshot();

        let at_five = start + Duration::from_secs(5);
        let outcome = scheduler.poll(&sink, &snapshot, at_five);
        assert!(matches!(outcome, PublishOutcome::Failed(SinkError::Rejected(_))));
        assert_eq!(scheduler.last_publish(), Some(at_five));

        let outcome = scheduler.poll(&sink, &snapshot, start + Duration::from_secs(6));
        assert!(matches!(outcome, PublishOutcome::Skipped));
        assert_eq!(sink.attempt_count(), 1);
    }

    #[test]
    fn skipped_frames_are_not_queued() {
        let start = Instant::now();
        let mut scheduler = PublishScheduler::new(Duration::from_secs(5), start);
        let sink = MemorySink::new();

        for t in 1..5u64 {
            let mut snapshot = empty_snapshot();
            snapshot.overall_count = t as usize;
            scheduler.poll(&sink, &snapshot, start + Duration::from_secs(t));
        }
        let mut latest = empty_snapshot();
        latest.overall_count = 42;
        latest.timestamp = SystemTime::UNIX_EPOCH + Duration::from_secs(5);
        scheduler.poll(&sink, &latest, start + Duration::from_secs(5));

        let published = sink.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0]["overallPeopleCount"], 42);
    }

    #[test]
    fn clock_going_backwards_does_not_publish() {
        let start = Instant::now() + Duration::from_secs(60);
        let scheduler = PublishScheduler::new(Duration::from_secs(5), start);

        assert!(!scheduler.is_due(start - Duration::from_secs(30)));
    }
}
