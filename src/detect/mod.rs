//! Detection types and the unified fan-out (C7). Per the redesign note
//! against inheritance-style "base detector" classes, `Detection` is a
//! tagged variant rather than a class hierarchy, and detectors implement a
//! single small capability trait (`EventDetector`) rather than extending a
//! base type.

pub mod cash;
pub mod fire;
pub mod unified;
pub mod violence;

use serde::Serialize;

use crate::frame::Frame;
use crate::pose::PoseResult;

pub use cash::{CashDetector, CashMetadata};
pub use fire::{FireDetector, FireMetadata};
pub use unified::UnifiedDetector;
pub use violence::{ViolenceDetector, ViolenceMetadata};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DetectionKind {
    Cash(CashMetadata),
    Violence(ViolenceMetadata),
    Fire(FireMetadata),
}

#[derive(Debug, Clone)]
pub struct Detection {
    pub kind: DetectionKind,
    pub confidence: f32,
    pub bbox: Option<(f32, f32, f32, f32)>,
    pub frame_index: u64,
}

impl Detection {
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            DetectionKind::Cash(_) => "cash",
            DetectionKind::Violence(_) => "violence",
            DetectionKind::Fire(_) => "fire",
        }
    }
}

/// Uniform capability a detector exposes to the unified fan-out: a name, an
/// enabled flag, and a per-frame `process` call returning zero or more
/// detections. New detectors are added by extending the unified detector's
/// ordered sequence, not by subclassing.
pub trait EventDetector: Send {
    fn name(&self) -> &'static str;
    fn enabled(&self) -> bool;
    fn process(&mut self, frame: &Frame, poses: &[PoseResult]) -> Vec<Detection>;
}
