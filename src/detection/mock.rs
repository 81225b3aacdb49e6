use crate::detection::{BoundingBox, Detection, DetectionSource, FrameDetections};
use crate::error::AppError;
use std::collections::VecDeque;

/// One scripted step of a [`ScriptedSource`].
#[derive(Debug, Clone)]
pub enum ScriptedFrame {
    Frame(Vec<Detection>),
    Fail(String),
}

/// In-memory detection source that replays a fixed script, then ends.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    script: VecDeque<ScriptedFrame>,
    next_index: u64,
}

impl ScriptedSource {
    pub fn new(script: Vec<ScriptedFrame>) -> Self {
        Self {
            script: script.into(),
            next_index: 0,
        }
    }

    pub fn from_frames(frames: Vec<Vec<Detection>>) -> Self {
        Self::new(frames.into_iter().map(ScriptedFrame::Frame).collect())
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl DetectionSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<FrameDetections>, AppError> {
        let Some(step) = self.script.pop_front() else {
            return Ok(None);
        };
        let frame_index = self.next_index;
        self.next_index += 1;
        match step {
            ScriptedFrame::Frame(detections) => Ok(Some(FrameDetections {
                frame_index,
                detections,
            })),
            ScriptedFrame::Fail(reason) => Err(AppError::Source(reason)),
        }
    }
}

/// Detection whose box is a 10x10 square centred on `(cx, cy)`.
pub fn detection_at(track_id: i64, cx: f64, cy: f64) -> Detection {
    Detection::new(
        track_id,
        BoundingBox::new(cx - 5.0, cy - 5.0, cx + 5.0, cy + 5.0),
        0.9,
    )
}
