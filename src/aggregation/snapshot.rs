//! Per-frame snapshot assembly and its wire representation.
//!
//! Building a snapshot is pure: identical grid, zones and detections always
//! produce an identical [`FrameSnapshot`].

use crate::aggregation::AggregationSettings;
use crate::aggregation::alert::{AlertLevel, RushStatus};
use crate::aggregation::grid::OccupancyGrid;
use crate::aggregation::zones::{ZoneBuckets, ZoneTable};
use crate::detection::{BoundingBox, Detection, FrameSize, TrackId};
use serde::Serialize;
use std::time::SystemTime;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedBox {
    pub bbox: BoundingBox,
    pub track_id: TrackId,
}

impl From<&Detection> for TrackedBox {
    fn from(detection: &Detection) -> Self {
        Self {
            bbox: detection.bbox,
            track_id: detection.track_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSnapshot {
    pub zone_id: String,
    pub display_name: String,
    pub people_count: usize,
    pub density: f64,
    pub alert_level: AlertLevel,
    pub grid_slice: Vec<Vec<f64>>,
    pub bounding_boxes: Vec<TrackedBox>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameSnapshot {
    pub timestamp: SystemTime,
    pub overall_count: usize,
    pub zones: Vec<ZoneSnapshot>,
    pub frame: FrameSize,
}

impl FrameSnapshot {
    pub fn zone(&self, zone_id: &str) -> Option<&ZoneSnapshot> {
        self.zones.iter().find(|zone| zone.zone_id == zone_id)
    }

    /// Detections that fell outside every zone.
    pub fn unzoned_count(&self) -> usize {
        let zoned: usize = self.zones.iter().map(|zone| zone.people_count).sum();
        self.overall_count.saturating_sub(zoned)
    }

    pub fn rush_status(&self) -> RushStatus {
        RushStatus::from_levels(self.zones.iter().map(|zone| zone.alert_level))
    }

    pub fn alerting_zones(&self) -> usize {
        self.zones
            .iter()
            .filter(|zone| zone.alert_level >= AlertLevel::High)
            .count()
    }
}

/// People per `area_unit` square pixels. Zero area or unit gives 0.
pub fn zone_density(people_count: usize, area: f64, area_unit: f64) -> f64 {
    if !(area > 0.0) || !(area_unit > 0.0) {
        return 0.0;
    }
    people_count as f64 / (area / area_unit)
}

pub fn build_snapshot(
    grid: &OccupancyGrid,
    zones: &ZoneTable,
    buckets: &ZoneBuckets<'_>,
    overall_count: usize,
    settings: &AggregationSettings,
    timestamp: SystemTime,
) -> FrameSnapshot {
    let frame = settings.frame;
    let zones = zones
        .zones()
        .iter()
        .enumerate()
        .map(|(index, zone)| {
            let members = buckets.zone(index);
            let people_count = members.len();
            let rows = grid.span_for(zone.rect.y1, zone.rect.y2, frame.height);
            let cols = grid.span_for(zone.rect.x1, zone.rect.x2, frame.width);

            ZoneSnapshot {
                zone_id: zone.id.clone(),
                display_name: zone.display_name.clone(),
                people_count,
                density: zone_density(people_count, zone.rect.area(), settings.area_unit),
                alert_level: AlertLevel::from_occupancy(people_count, zone.capacity),
                grid_slice: grid.slice(rows, cols),
                bounding_boxes: members.iter().map(|d| TrackedBox::from(*d)).collect(),
            }
        })
        .collect();

    FrameSnapshot {
        timestamp,
        overall_count,
        zones,
        frame,
    }
}

/// Bin, classify and assemble one frame from scratch.
pub fn aggregate_frame(
    detections: &[Detection],
    zones: &ZoneTable,
    settings: &AggregationSettings,
    timestamp: SystemTime,
) -> (OccupancyGrid, FrameSnapshot) {
    let mut grid = OccupancyGrid::new(settings.grid_size);
    for detection in detections {
        let (cx, cy) = detection.centroid();
        grid.deposit(cx, cy, settings.frame);
    }
    let buckets = zones.classify(detections);
    let snapshot = build_snapshot(&grid, zones, &buckets, detections.len(), settings, timestamp);
    (grid, snapshot)
}

pub fn format_timestamp(timestamp: SystemTime) -> Result<String, time::error::Format> {
    OffsetDateTime::from(timestamp).format(&Rfc3339)
}

/// JSON body delivered to the sink.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPayload<'a> {
    pub timestamp: String,
    pub overall_people_count: usize,
    pub zones: Vec<ZonePayload<'a>>,
    pub frame_width: u32,
    pub frame_height: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZonePayload<'a> {
    pub zone_id: &'a str,
    pub zone_name: &'a str,
    pub people_count: usize,
    pub density: f64,
    pub heatmap_grid: &'a [Vec<f64>],
    pub alert_level: AlertLevel,
    pub bounding_boxes: Vec<BoxPayload>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxPayload {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub track_id: TrackId,
}

impl<'a> SnapshotPayload<'a> {
    pub fn from_snapshot(snapshot: &'a FrameSnapshot) -> Result<Self, time::error::Format> {
        let zones = snapshot
            .zones
            .iter()
            .map(|zone| ZonePayload {
                zone_id: &zone.zone_id,
                zone_name: &zone.display_name,
                people_count: zone.people_count,
                density: round_density(zone.density),
                heatmap_grid: &zone.grid_slice,
                alert_level: zone.alert_level,
                bounding_boxes: zone
                    .bounding_boxes
                    .iter()
                    .map(|tracked| BoxPayload {
                        x1: tracked.bbox.x1,
                        y1: tracked.bbox.y1,
                        x2: tracked.bbox.x2,
                        y2: tracked.bbox.y2,
                        track_id: tracked.track_id,
                    })
                    .collect(),
            })
            .collect();

        Ok(Self {
            timestamp: format_timestamp(snapshot.timestamp)?,
            overall_people_count: snapshot.overall_count,
            zones,
            frame_width: snapshot.frame.width,
            frame_height: snapshot.frame.height,
        })
    }
}

pub fn round_density(density: f64) -> f64 {
    (density * 100.0).round() / 100.0
}
