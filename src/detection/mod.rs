use crate::error::AppError;

pub mod jsonl;
pub mod mock;

pub type TrackId = i64;

/// Axis-aligned box in frame pixel coordinates.
///
/// Boxes come straight from the tracker; `x2 < x1` is never corrected here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn centroid(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub track_id: TrackId,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

impl Detection {
    pub fn new(track_id: TrackId, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            track_id,
            bbox,
            confidence,
        }
    }

    pub fn centroid(&self) -> (f64, f64) {
        self.bbox.centroid()
    }
}

/// Pixel dimensions of the monitored frame, constant for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// Everything the tracker reported for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDetections {
    pub frame_index: u64,
    pub detections: Vec<Detection>,
}

/// A feed of per-frame tracker output.
///
/// `Ok(None)` marks the end of the stream.
pub trait DetectionSource {
    fn next_frame(&mut self) -> Result<Option<FrameDetections>, AppError>;
}

impl<T: DetectionSource + ?Sized> DetectionSource for Box<T> {
    fn next_frame(&mut self) -> Result<Option<FrameDetections>, AppError> {
        (**self).next_frame()
    }
}
