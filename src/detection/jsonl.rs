//! Newline-delimited JSON tracker feed.
//!
//! Each non-blank line is one frame:
//! `{"frame": 12, "detections": [{"track_id": 7, "bbox": [x1, y1, x2, y2], "confidence": 0.91}]}`

use crate::detection::{BoundingBox, Detection, DetectionSource, FrameDetections, TrackId};
use crate::error::AppError;
use serde::Deserialize;
use std::io::{BufRead, ErrorKind};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct TrackerRecord {
    #[serde(default)]
    frame: Option<u64>,
    #[serde(default)]
    detections: Vec<TrackerDetection>,
}

#[derive(Debug, Deserialize)]
struct TrackerDetection {
    track_id: TrackId,
    bbox: [f64; 4],
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

pub struct JsonLinesSource<R> {
    reader: R,
    min_confidence: f32,
    line_number: u64,
    frames_read: u64,
    buffer: String,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R, min_confidence: f32) -> Self {
        Self {
            reader,
            min_confidence,
            line_number: 0,
            frames_read: 0,
            buffer: String::new(),
        }
    }

    fn build_frame(&mut self, record: TrackerRecord) -> FrameDetections {
        let frame_index = record.frame.unwrap_or(self.frames_read);
        self.frames_read += 1;

        let total = record.detections.len();
        let detections: Vec<Detection> = record
            .detections
            .into_iter()
            .filter(|d| d.confidence >= self.min_confidence)
            .map(|d| {
                let [x1, y1, x2, y2] = d.bbox;
                Detection::new(d.track_id, BoundingBox::new(x1, y1, x2, y2), d.confidence)
            })
            .collect();

        if detections.len() < total {
            debug!(
                frame = frame_index,
                dropped = total - detections.len(),
                min_confidence = self.min_confidence,
                "Dropped low-confidence detections"
            );
        }

        FrameDetections {
            frame_index,
            detections,
        }
    }
}

impl<R: BufRead> DetectionSource for JsonLinesSource<R> {
    fn next_frame(&mut self) -> Result<Option<FrameDetections>, AppError> {
        loop {
            self.buffer.clear();
            self.line_number += 1;
            let read = match self.reader.read_line(&mut self.buffer) {
                Ok(read) => read,
                // The offending line is consumed, so the next call moves on.
                Err(err) if err.kind() == ErrorKind::InvalidData => {
                    return Err(AppError::SourceParse {
                        line: self.line_number,
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    self.line_number -= 1;
                    return Err(AppError::Source(format!("read failed: {err}")));
                }
            };
            if read == 0 {
                self.line_number -= 1;
                return Ok(None);
            }

            let line = self.buffer.trim();
            if line.is_empty() {
                continue;
            }

            let record: TrackerRecord =
                serde_json::from_str(line).map_err(|err| AppError::SourceParse {
                    line: self.line_number,
                    reason: err.to_string(),
                })?;
            return Ok(Some(self.build_frame(record)));
        }
    }
}
