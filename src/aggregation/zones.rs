//! Named zones and first-match classification.
//!
//! Zone order is part of the configuration contract: when rectangles
//! overlap, a detection belongs to the earliest zone that contains its
//! centroid and to no other.

use crate::detection::Detection;
use std::collections::HashSet;
use thiserror::Error;

/// Inclusive axis-aligned rectangle in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneRect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl ZoneRect {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.x1 <= x && x <= self.x2 && self.y1 <= y && y <= self.y2
    }

    pub fn area(&self) -> f64 {
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub id: String,
    pub display_name: String,
    pub rect: ZoneRect,
    pub capacity: u32,
}

impl Zone {
    /// Zone whose display name is the capitalised id.
    pub fn new(id: impl Into<String>, rect: ZoneRect, capacity: u32) -> Self {
        let id = id.into();
        let display_name = capitalize(&id);
        Self {
            id,
            display_name,
            rect,
            capacity,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ZoneError {
    #[error("zone id must not be empty")]
    EmptyId,
    #[error("duplicate zone id: {0}")]
    DuplicateId(String),
    #[error("zone {id}: rectangle must satisfy x1 < x2 and y1 < y2")]
    InvalidRect { id: String },
    #[error("zone {id}: capacity must be positive")]
    ZeroCapacity { id: String },
}

/// Ordered, validated zone list. Immutable once built.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ZoneTable {
    zones: Vec<Zone>,
}

impl ZoneTable {
    pub fn new(zones: Vec<Zone>) -> Result<Self, ZoneError> {
        let mut seen = HashSet::new();
        for zone in &zones {
            if zone.id.trim().is_empty() {
                return Err(ZoneError::EmptyId);
            }
            if !seen.insert(zone.id.as_str()) {
                return Err(ZoneError::DuplicateId(zone.id.clone()));
            }
            let rect = &zone.rect;
            // Negated comparisons also reject NaN coordinates.
            if !(rect.x1 < rect.x2) || !(rect.y1 < rect.y2) {
                return Err(ZoneError::InvalidRect {
                    id: zone.id.clone(),
                });
            }
            if zone.capacity == 0 {
                return Err(ZoneError::ZeroCapacity {
                    id: zone.id.clone(),
                });
            }
        }
        Ok(Self { zones })
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Index of the first zone containing `(x, y)`.
    pub fn classify_point(&self, x: f64, y: f64) -> Option<usize> {
        self.zones.iter().position(|zone| zone.rect.contains(x, y))
    }

    pub fn classify<'a>(&self, detections: &'a [Detection]) -> ZoneBuckets<'a> {
        let mut buckets = ZoneBuckets {
            per_zone: vec![Vec::new(); self.zones.len()],
            unzoned: Vec::new(),
        };
        for detection in detections {
            let (cx, cy) = detection.centroid();
            match self.classify_point(cx, cy) {
                Some(index) => buckets.per_zone[index].push(detection),
                None => buckets.unzoned.push(detection),
            }
        }
        buckets
    }
}

/// Detections grouped by zone, parallel to the table's zone order.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneBuckets<'a> {
    per_zone: Vec<Vec<&'a Detection>>,
    unzoned: Vec<&'a Detection>,
}

impl<'a> ZoneBuckets<'a> {
    pub fn zone(&self, index: usize) -> &[&'a Detection] {
        self.per_zone.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, index: usize) -> usize {
        self.zone(index).len()
    }

    pub fn unzoned(&self) -> &[&'a Detection] {
        &self.unzoned
    }

    pub fn zoned_total(&self) -> usize {
        self.per_zone.iter().map(Vec::len).sum()
    }
}

fn capitalize(id: &str) -> String {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::mock::detection_at;

    fn rect(x1: f64, y1: f64, x2: f64, y2: f64) -> ZoneRect {
        ZoneRect { x1, y1, x2, y2 }
    }

    fn entrance_then_queue() -> ZoneTable {
        ZoneTable::new(vec![
            Zone::new("entrance", rect(0.0, 0.0, 100.0, 100.0), 2),
            Zone::new("queue", rect(0.0, 0.0, 200.0, 200.0), 10),
        ])
        .expect("valid zones")
    }

    #[test]
    fn overlapping_zones_resolve_to_first_in_order() {
        let table = entrance_then_queue();
        let detections = vec![detection_at(1, 50.0, 50.0), detection_at(2, 150.0, 150.0)];

        let buckets = table.classify(&detections);

        assert_eq!(buckets.count(0), 1);
        assert_eq!(buckets.zone(0)[0].track_id, 1);
        assert_eq!(buckets.count(1), 1);
        assert_eq!(buckets.zone(1)[0].track_id, 2);
        assert_eq!(buckets.zoned_total(), 2);
    }

    #[test]
    fn reversing_order_changes_the_winner() -> Result<(), ZoneError> {
        let table = ZoneTable::new(vec![
            Zone::new("queue", rect(0.0, 0.0, 200.0, 200.0), 10),
            Zone::new("entrance", rect(0.0, 0.0, 100.0, 100.0), 2),
        ])?;
        let detections = vec![detection_at(1, 50.0, 50.0)];

        let buckets = table.classify(&detections);

        assert_eq!(buckets.count(0), 1);
        assert_eq!(buckets.count(1), 0);
        Ok(())
    }

    #[test]
    fn classification_is_deterministic_across_runs() {
        let table = entrance_then_queue();
        let detections: Vec<_> = (0..50)
            .map(|i| detection_at(i, (i * 4) as f64, (i * 3) as f64))
            .collect();

        let first: Vec<_> = (0..table.len()).map(|i| table.classify(&detections).count(i)).collect();
        for _ in 0..10 {
            let again: Vec<_> =
                (0..table.len()).map(|i| table.classify(&detections).count(i)).collect();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn rectangle_bounds_are_inclusive() {
        let zone = rect(10.0, 10.0, 20.0, 20.0);

        assert!(zone.contains(10.0, 10.0));
        assert!(zone.contains(20.0, 20.0));
        assert!(zone.contains(10.0, 20.0));
        assert!(!zone.contains(20.01, 15.0));
        assert!(!zone.contains(15.0, 9.99));
    }

    #[test]
    fn detection_outside_all_zones_lands_in_unzoned_bucket() {
        let table = entrance_then_queue();
        let detections = vec![detection_at(9, 500.0, 500.0)];

        let buckets = table.classify(&detections);

        assert_eq!(buckets.zoned_total(), 0);
        assert_eq!(buckets.unzoned().len(), 1);
        assert_eq!(buckets.unzoned()[0].track_id, 9);
    }

    #[test]
    fn detection_is_never_counted_twice() {
        let table = entrance_then_queue();
        let detections: Vec<_> = (0..30)
            .map(|i| detection_at(i, (i * 10) as f64, (i * 10) as f64))
            .collect();

        let buckets = table.classify(&detections);

        assert_eq!(
            buckets.zoned_total() + buckets.unzoned().len(),
            detections.len()
        );
    }

    #[test]
    fn rejects_inverted_rectangle() {
        let result = ZoneTable::new(vec![Zone::new("exit", rect(50.0, 0.0, 10.0, 10.0), 5)]);
        assert_eq!(
            result,
            Err(ZoneError::InvalidRect {
                id: "exit".to_string()
            })
        );
    }

    #[test]
    fn rejects_degenerate_rectangle() {
        let result = ZoneTable::new(vec![Zone::new("line", rect(0.0, 5.0, 10.0, 5.0), 5)]);
        assert!(matches!(result, Err(ZoneError::InvalidRect { .. })));
    }

    #[test]
    fn rejects_zero_capacity() {
        let result = ZoneTable::new(vec![Zone::new("exit", rect(0.0, 0.0, 10.0, 10.0), 0)]);
        assert!(matches!(result, Err(ZoneError::ZeroCapacity { .. })));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let result = ZoneTable::new(vec![
            Zone::new("exit", rect(0.0, 0.0, 10.0, 10.0), 1),
            Zone::new("exit", rect(20.0, 0.0, 30.0, 10.0), 1),
        ]);
        assert_eq!(result, Err(ZoneError::DuplicateId("exit".to_string())));
    }

    #[test]
    fn display_name_defaults_to_capitalised_id() {
        let zone = Zone::new("dARSHAN", rect(0.0, 0.0, 1.0, 1.0), 1);
        assert_eq!(zone.display_name, "Darshan");

        let named = zone.with_display_name("Inner Sanctum");
        assert_eq!(named.display_name, "Inner Sanctum");
    }
}
