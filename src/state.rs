use crate::aggregation::grid::OccupancyGrid;
use crate::aggregation::snapshot::FrameSnapshot;
use crate::publish::PublishOutcome;
use std::time::SystemTime;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishStatus {
    Delivered { alerts_triggered: Option<u32> },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    pub at: SystemTime,
    pub status: PublishStatus,
}

impl PublishRecord {
    /// `None` when the outcome was a skipped frame.
    pub fn from_outcome(outcome: &PublishOutcome, at: SystemTime) -> Option<Self> {
        let status = match outcome {
            PublishOutcome::Skipped => return None,
            PublishOutcome::Delivered(ack) => PublishStatus::Delivered {
                alerts_triggered: ack.alerts_triggered,
            },
            PublishOutcome::Failed(err) => PublishStatus::Failed {
                reason: err.to_string(),
            },
        };
        Some(Self { at, status })
    }
}

/// Latest aggregation results shared with the status API.
#[derive(Debug)]
pub struct AppState {
    snapshot: Option<FrameSnapshot>,
    snapshot_tx: watch::Sender<Option<FrameSnapshot>>,
    grid: Option<OccupancyGrid>,
    last_publish: Option<PublishRecord>,
    publish_tx: watch::Sender<Option<PublishRecord>>,
    frames_processed: u64,
}

impl AppState {
    pub fn new() -> Self {
        let (snapshot_tx, _snapshot_rx) = watch::channel(None);
        let (publish_tx, _publish_rx) = watch::channel(None);
        Self {
            snapshot: None,
            snapshot_tx,
            grid: None,
            last_publish: None,
            publish_tx,
            frames_processed: 0,
        }
    }

    pub fn snapshot(&self) -> Option<&FrameSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn grid(&self) -> Option<&OccupancyGrid> {
        self.grid.as_ref()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<FrameSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Store the newest frame; never fails even with no subscribers.
    pub fn set_frame(&mut self, snapshot: FrameSnapshot, grid: OccupancyGrid) {
        self.snapshot = Some(snapshot.clone());
        self.grid = Some(grid);
        self.frames_processed += 1;
        self.snapshot_tx.send_replace(Some(snapshot));
    }

    pub fn last_publish(&self) -> Option<&PublishRecord> {
        self.last_publish.as_ref()
    }

    pub fn subscribe_publish(&self) -> watch::Receiver<Option<PublishRecord>> {
        self.publish_tx.subscribe()
    }

    pub fn set_last_publish(&mut self, record: PublishRecord) {
        self.last_publish = Some(record.clone());
        self.publish_tx.send_replace(Some(record));
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
