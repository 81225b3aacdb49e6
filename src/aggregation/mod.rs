use crate::detection::{Detection, DetectionSource, FrameSize};
use crate::error::AppError;
use crate::publish::{PublishOutcome, PublishScheduler, SnapshotSink};
use crate::state::{AppState, PublishRecord};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Instant, SystemTime};
use tracing::{debug, info, warn};

pub mod alert;
pub mod grid;
pub mod snapshot;
pub mod zones;

use grid::OccupancyGrid;
use snapshot::{FrameSnapshot, build_snapshot};
use zones::ZoneTable;

pub const DEFAULT_GRID_SIZE: usize = 20;
pub const DEFAULT_AREA_UNIT: f64 = 10_000.0;
/// Upper bound on cells per axis; the grid holds `size * size` cells.
pub const MAX_GRID_SIZE: usize = 1024;

/// Consecutive source failures after which the frame loop gives up.
const MAX_CONSECUTIVE_SOURCE_ERRORS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationSettings {
    pub frame: FrameSize,
    pub grid_size: usize,
    /// Square pixels per density unit.
    pub area_unit: f64,
}

#[derive(Debug)]
pub struct FrameReport {
    pub snapshot: FrameSnapshot,
    pub grid: OccupancyGrid,
    pub publish: PublishOutcome,
}

/// Owns everything that persists between frames: the reusable grid buffer
/// and the publish scheduler. Zones and settings are fixed at construction.
#[derive(Debug)]
pub struct AggregationEngine {
    settings: AggregationSettings,
    zones: ZoneTable,
    grid: OccupancyGrid,
    scheduler: PublishScheduler,
    sink: Box<dyn SnapshotSink>,
}

impl AggregationEngine {
    pub fn new(
        settings: AggregationSettings,
        zones: ZoneTable,
        scheduler: PublishScheduler,
        sink: Box<dyn SnapshotSink>,
    ) -> Self {
        Self {
            grid: OccupancyGrid::new(settings.grid_size),
            settings,
            zones,
            scheduler,
            sink,
        }
    }

    pub fn settings(&self) -> &AggregationSettings {
        &self.settings
    }

    pub fn zones(&self) -> &ZoneTable {
        &self.zones
    }

    pub fn scheduler(&self) -> &PublishScheduler {
        &self.scheduler
    }

    pub fn process_frame(&mut self, detections: &[Detection]) -> FrameReport {
        self.process_frame_at(detections, Instant::now(), SystemTime::now())
    }

    /// One uninterrupted frame step: reset, bin, classify, build, maybe publish.
    pub fn process_frame_at(
        &mut self,
        detections: &[Detection],
        now: Instant,
        timestamp: SystemTime,
    ) -> FrameReport {
        self.grid.reset();
        for detection in detections {
            let (cx, cy) = detection.centroid();
            self.grid.deposit(cx, cy, self.settings.frame);
        }

        let buckets = self.zones.classify(detections);
        let snapshot = build_snapshot(
            &self.grid,
            &self.zones,
            &buckets,
            detections.len(),
            &self.settings,
            timestamp,
        );
        debug!(
            people = snapshot.overall_count,
            unzoned = buckets.unzoned().len(),
            "Frame aggregated"
        );

        let publish = self.scheduler.poll(self.sink.as_ref(), &snapshot, now);

        FrameReport {
            snapshot,
            grid: self.grid.clone(),
            publish,
        }
    }
}

/// Push one frame's results into shared state.
pub fn store_report(
    state: &Arc<RwLock<AppState>>,
    report: FrameReport,
    at: SystemTime,
) -> Result<(), AppError> {
    let record = PublishRecord::from_outcome(&report.publish, at);
    let mut guard = state.write().map_err(|_| AppError::StateLock)?;
    guard.set_frame(report.snapshot, report.grid);
    if let Some(record) = record {
        guard.set_last_publish(record);
    }
    Ok(())
}

/// Drive the engine until the source ends, the stop flag is raised, or the
/// source keeps failing. Returns the number of frames processed.
pub fn run_frame_loop<S>(
    source: &mut S,
    engine: &mut AggregationEngine,
    state: &Arc<RwLock<AppState>>,
    stop: &AtomicBool,
) -> u64
where
    S: DetectionSource + ?Sized,
{
    let mut frames = 0u64;
    let mut consecutive_errors = 0u32;

    while !stop.load(Ordering::Relaxed) {
        match source.next_frame() {
            Ok(Some(frame)) => {
                consecutive_errors = 0;
                let report = engine.process_frame(&frame.detections);
                frames += 1;
                if let Err(err) = store_report(state, report, SystemTime::now()) {
                    warn!(frame = frame.frame_index, error = %err, "Failed to store frame results");
                }
            }
            Ok(None) => {
                info!(frames, "Detection stream ended");
                break;
            }
            Err(err @ AppError::SourceParse { .. }) => {
                warn!(error = %err, "Skipping malformed frame");
            }
            Err(err) => {
                consecutive_errors += 1;
                warn!(error = %err, consecutive = consecutive_errors, "Error reading frame");
                if consecutive_errors >= MAX_CONSECUTIVE_SOURCE_ERRORS {
                    warn!("Detection source keeps failing, stopping frame loop");
                    break;
                }
            }
        }
    }

    frames
}

pub fn spawn_frame_thread(
    mut source: Box<dyn DetectionSource + Send>,
    mut engine: AggregationEngine,
    state: Arc<RwLock<AppState>>,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<u64> {
    std::thread::spawn(move || run_frame_loop(&mut source, &mut engine, &state, &stop))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::jsonl::JsonLinesSource;
    use crate::detection::mock::{ScriptedFrame, ScriptedSource, detection_at};
    use crate::publish::memory::MemorySink;
    use std::time::Duration;
    use zones::{Zone, ZoneRect};

    fn settings() -> AggregationSettings {
        AggregationSettings {
            frame: FrameSize {
                width: 200,
                height: 200,
            },
            grid_size: 10,
            area_unit: DEFAULT_AREA_UNIT,
        }
    }

    fn zones() -> ZoneTable {
        ZoneTable::new(vec![
            Zone::new(
                "entrance",
                ZoneRect {
                    x1: 0.0,
                    y1: 0.0,
                    x2: 100.0,
                    y2: 100.0,
                },
                2,
            ),
            Zone::new(
                "queue",
                ZoneRect {
                    x1: 0.0,
                    y1: 0.0,
                    x2: 200.0,
                    y2: 200.0,
                },
                10,
            ),
        ])
        .expect("valid zones")
    }

    fn engine(sink: &MemorySink, start: Instant) -> AggregationEngine {
        AggregationEngine::new(
            settings(),
            zones(),
            PublishScheduler::new(Duration::from_secs(5), start),
            Box::new(sink.clone()),
        )
    }

    #[test]
    fn grid_is_rebuilt_every_frame() {
        let sink = MemorySink::new();
        let start = Instant::now();
        let mut engine = engine(&sink, start);

        let first = engine.process_frame_at(
            &[detection_at(1, 50.0, 50.0), detection_at(2, 150.0, 150.0)],
            start,
            SystemTime::UNIX_EPOCH,
        );
        let second =
            engine.process_frame_at(&[detection_at(3, 10.0, 10.0)], start, SystemTime::UNIX_EPOCH);

        assert_eq!(first.grid.total(), 2.0);
        assert_eq!(second.grid.total(), 1.0);
        assert_eq!(second.snapshot.overall_count, 1);
    }

    #[test]
    fn publishes_latest_snapshot_once_per_interval() {
        let sink = MemorySink::new();
        let start = Instant::now();
        let mut engine = engine(&sink, start);

        for t in 0..=10u64 {
            let detections: Vec<_> = (0..t as i64).map(|i| detection_at(i, 150.0, 150.0)).collect();
            engine.process_frame_at(
                &detections,
                start + Duration::from_secs(t),
                SystemTime::UNIX_EPOCH + Duration::from_secs(t),
            );
        }

        let published = sink.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0]["overallPeopleCount"], 5);
        assert_eq!(published[1]["overallPeopleCount"], 10);
    }

    #[test]
    fn sink_failure_does_not_interrupt_processing() {
        let sink = MemorySink::failing("unreachable");
        let start = Instant::now();
        let mut engine = engine(&sink, start);

        let report = engine.process_frame_at(
            &[detection_at(1, 50.0, 50.0)],
            start + Duration::from_secs(5),
            SystemTime::UNIX_EPOCH,
        );
        assert!(matches!(report.publish, PublishOutcome::Failed(_)));
        assert_eq!(report.snapshot.overall_count, 1);

        let next = engine.process_frame_at(
            &[detection_at(1, 50.0, 50.0)],
            start + Duration::from_secs(6),
            SystemTime::UNIX_EPOCH,
        );
        assert!(matches!(next.publish, PublishOutcome::Skipped));
        assert_eq!(sink.attempt_count(), 1);
    }

    #[test]
    fn frame_loop_skips_bad_frames_and_stops_at_end() {
        let mut source = ScriptedSource::new(vec![
            ScriptedFrame::Frame(vec![detection_at(1, 50.0, 50.0)]),
            ScriptedFrame::Fail("decoder hiccup".into()),
            ScriptedFrame::Frame(vec![detection_at(1, 50.0, 50.0), detection_at(2, 150.0, 150.0)]),
        ]);
        let sink = MemorySink::new();
        let mut engine = engine(&sink, Instant::now());
        let state = Arc::new(RwLock::new(AppState::new()));
        let stop = AtomicBool::new(false);

        let frames = run_frame_loop(&mut source, &mut engine, &state, &stop);

        assert_eq!(frames, 2);
        let guard = state.read().expect("state lock");
        assert_eq!(guard.frames_processed(), 2);
        assert_eq!(guard.snapshot().map(|s| s.overall_count), Some(2));
        assert!(guard.last_publish().is_none());
    }

    #[test]
    fn frame_loop_outlasts_a_run_of_garbled_lines() {
        let mut input = Vec::new();
        for _ in 0..(MAX_CONSECUTIVE_SOURCE_ERRORS + 10) {
            input.extend_from_slice(&[0xc3, 0x28, b'\n']);
        }
        input.extend_from_slice(b"{\"detections\": [{\"track_id\": 1, \"bbox\": [45, 45, 55, 55]}]}\n");
        let mut source = JsonLinesSource::new(std::io::Cursor::new(input), 0.0);
        let sink = MemorySink::new();
        let mut engine = engine(&sink, Instant::now());
        let state = Arc::new(RwLock::new(AppState::new()));
        let stop = AtomicBool::new(false);

        let frames = run_frame_loop(&mut source, &mut engine, &state, &stop);

        assert_eq!(frames, 1);
        let guard = state.read().expect("state lock");
        assert_eq!(guard.snapshot().map(|s| s.overall_count), Some(1));
    }

    #[test]
    fn frame_loop_honours_stop_flag() {
        let mut source = ScriptedSource::from_frames(vec![vec![]; 3]);
        let sink = MemorySink::new();
        let mut engine = engine(&sink, Instant::now());
        let state = Arc::new(RwLock::new(AppState::new()));
        let stop = AtomicBool::new(true);

        let frames = run_frame_loop(&mut source, &mut engine, &state, &stop);

        assert_eq!(frames, 0);
        assert_eq!(source.remaining(), 3);
    }
}
