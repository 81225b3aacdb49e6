//! Background watchers over the shared state channels. They log changes in
//! consumer reachability and overall rush status once, instead of on every
//! frame.

use crate::aggregation::alert::RushStatus;
use crate::aggregation::snapshot::FrameSnapshot;
use crate::state::{PublishRecord, PublishStatus};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishTransition {
    Lost,
    Recovered,
}

/// Transition between two consecutive publish attempts, if any.
pub fn publish_transition(
    previous: Option<&PublishStatus>,
    current: &PublishStatus,
) -> Option<PublishTransition> {
    let was_failing = matches!(previous, Some(PublishStatus::Failed { .. }));
    match (was_failing, current) {
        (false, PublishStatus::Failed { .. }) => Some(PublishTransition::Lost),
        (true, PublishStatus::Delivered { .. }) => Some(PublishTransition::Recovered),
        _ => None,
    }
}

/// Runs until the sender is dropped. Returns the number of transitions seen.
pub async fn watch_publish(mut rx: watch::Receiver<Option<PublishRecord>>) -> usize {
    let mut previous: Option<PublishStatus> = None;
    let mut transitions = 0;
    while rx.changed().await.is_ok() {
        let Some(record) = rx.borrow_and_update().clone() else {
            continue;
        };
        match publish_transition(previous.as_ref(), &record.status) {
            Some(PublishTransition::Lost) => {
                transitions += 1;
                if let PublishStatus::Failed { reason } = &record.status {
                    warn!(reason = %reason, "Consumer unreachable, snapshots are being dropped");
                }
            }
            Some(PublishTransition::Recovered) => {
                transitions += 1;
                info!("Consumer reachable again");
            }
            None => {}
        }
        previous = Some(record.status);
    }
    transitions
}

/// Runs until the sender is dropped. Returns the number of status changes.
pub async fn watch_rush_status(mut rx: watch::Receiver<Option<FrameSnapshot>>) -> usize {
    let mut previous = RushStatus::Normal;
    let mut changes = 0;
    while rx.changed().await.is_ok() {
        let Some(current) = rx.borrow_and_update().as_ref().map(FrameSnapshot::rush_status)
        else {
            continue;
        };
        if current != previous {
            changes += 1;
            if current > previous {
                warn!(from = ?previous, to = ?current, "Overall rush status rising");
            } else {
                info!(from = ?previous, to = ?current, "Overall rush status easing");
            }
            previous = current;
        }
    }
    changes
}
