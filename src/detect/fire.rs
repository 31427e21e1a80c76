//! Fire detector (C6): a primary YOLO object method with a hand-rolled
//! HSV color-flicker fallback when the object backend finds nothing, since
//! the chosen stack carries no OpenCV dependency.

use std::collections::VecDeque;

use serde::Serialize;

use crate::backends::{FireBox, FireLabel, FireObjectBackend};
use crate::config::DetectorThresholds;
use crate::detect::{Detection, DetectionKind, EventDetector};
use crate::frame::Frame;
use crate::pose::PoseResult;

const MIN_FIRE_AREA_PX: u32 = 3000;
const FLICKER_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Yolo,
    ColorBased,
}

#[derive(Debug, Clone, Serialize)]
pub struct FireDetectionConfig {
    pub min_fire_frames: u32,
    pub fire_confidence: f32,
    pub detection_method: DetectionMethod,
}

#[derive(Debug, Clone, Serialize)]
pub struct FireMetadata {
    pub fire_detection: FireDetectionConfig,
    pub fire_area: u32,
    pub smoke_detected: bool,
    pub flickering_score: f32,
}

struct FlickerTracker {
    areas: VecDeque<f32>,
}

impl FlickerTracker {
    fn new() -> Self {
        Self { areas: VecDeque::with_capacity(FLICKER_WINDOW) }
    }

    /// Temporal variance of the masked area over the trailing window,
    /// normalized into roughly [0, 1).
    fn push(&mut self, area: f32) -> f32 {
        self.areas.push_back(area);
        while self.areas.len() > FLICKER_WINDOW {
            self.areas.pop_front();
        }

        if self.areas.len() < 2 {
            return 0.0;
        }

        let mean = self.areas.iter().sum::<f32>() / self.areas.len() as f32;
        let variance =
            self.areas.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / self.areas.len() as f32;

        variance / (variance + mean * mean + 1.0)
    }
}

fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let rf = r as f32 / 255.0;
    let gf = g as f32 / 255.0;
    let bf = b as f32 / 255.0;

    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let h_deg = if delta <= f32::EPSILON {
        0.0
    } else if max == rf {
        60.0 * (((gf - bf) / delta).rem_euclid(6.0))
    } else if max == gf {
        60.0 * (((bf - rf) / delta) + 2.0)
    } else {
        60.0 * (((rf - gf) / delta) + 4.0)
    };

    let h_cv = h_deg / 2.0; // OpenCV-style 0..179 hue scale
    let s_cv = if max <= f32::EPSILON { 0.0 } else { (delta / max) * 255.0 };
    let v_cv = max * 255.0;

    (h_cv, s_cv, v_cv)
}

fn is_orange(h: f32, s: f32, v: f32) -> bool {
    (h >= 5.0 && h <= 25.0 && s >= 150.0 && v >= 200.0) || (h >= 0.0 && h <= 5.0 && s >= 200.0 && v >= 220.0)
}

fn is_skin(h: f32, s: f32, v: f32) -> bool {
    h >= 0.0 && h <= 25.0 && s >= 20.0 && s <= 170.0 && v >= 70.0 && v <= 200.0
}

/// Builds the fire/skin mask over the frame and finds the largest
/// 4-connected fire-colored region, returning its pixel area.
fn largest_fire_region_area(frame: &Frame) -> u32 {
    let width = frame.width as usize;
    let height = frame.height as usize;
    if width == 0 || height == 0 {
        return 0;
    }

    let mut mask = vec![false; width * height];
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) * 3;
            if idx + 2 >= frame.data.len() {
                continue;
            }
            let (h, s, v) = rgb_to_hsv(frame.data[idx], frame.data[idx + 1], frame.data[idx + 2]);
            mask[y * width + x] = is_orange(h, s, v) && !is_skin(h, s, v);
        }
    }

    let mut visited = vec![false; width * height];
    let mut best = 0u32;
    let mut stack = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }
        let mut area = 0u32;
        stack.push(start);
        visited[start] = true;
        while let Some(idx) = stack.pop() {
            area += 1;
            let x = idx % width;
            let y = idx / width;
            let neighbors = [
                (x > 0).then(|| idx - 1),
                (x + 1 < width).then(|| idx + 1),
                (y > 0).then(|| idx - width),
                (y + 1 < height).then(|| idx + width),
            ];
            for n in neighbors.into_iter().flatten() {
                if mask[n] && !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            }
        }
        best = best.max(area);
    }

    best
}

pub struct FireDetector {
    fire_confidence: f32,
    min_fire_frames: u32,
    cooldown_frames: u64,
    flicker_floor: f32,
    enabled: bool,

    backend: Box<dyn FireObjectBackend>,
    flicker: FlickerTracker,
    consecutive_candidates: u32,
    last_emit_frame: Option<u64>,
}

struct Candidate {
    method: DetectionMethod,
    bbox: Option<(f32, f32, f32, f32)>,
    score: f32,
    fire_area: u32,
    smoke_detected: bool,
    flickering_score: f32,
}

impl FireDetector {
    pub fn new(backend: Box<dyn FireObjectBackend>, thresholds: &DetectorThresholds, enabled: bool) -> Self {
        Self {
            fire_confidence: thresholds.fire_confidence,
            min_fire_frames: thresholds.min_fire_frames,
            cooldown_frames: thresholds.fire_cooldown_frames as u64,
            flicker_floor: thresholds.fire_flicker_floor,
            enabled,
            backend,
            flicker: FlickerTracker::new(),
            consecutive_candidates: 0,
            last_emit_frame: None,
        }
    }

    fn cooldown_elapsed(&self, frame_index: u64) -> bool {
        match self.last_emit_frame {
            None => true,
            Some(last) => frame_index.saturating_sub(last) >= self.cooldown_frames,
        }
    }

    fn yolo_candidate(&self, boxes: &[FireBox]) -> Option<Candidate> {
        let best = boxes
            .iter()
            .filter(|b| b.label != FireLabel::Other && b.confidence >= self.fire_confidence)
            .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap())?;

        let (x1, y1, x2, y2) = best.bbox;
        let area = ((x2 - x1).max(0.0) * (y2 - y1).max(0.0)) as u32;

        Some(Candidate {
            method: DetectionMethod::Yolo,
            bbox: Some(best.bbox),
            score: best.confidence,
            fire_area: area,
            smoke_detected: boxes.iter().any(|b| b.label == FireLabel::Smoke),
            flickering_score: 0.0,
        })
    }

    fn color_candidate(&mut self, frame: &Frame) -> Option<Candidate> {
        let area = largest_fire_region_area(frame);
        let flicker_score = self.flicker.push(area as f32);

        if area < MIN_FIRE_AREA_PX || flicker_score < self.flicker_floor {
            return None;
        }

        Some(Candidate {
            method: DetectionMethod::ColorBased,
            bbox: None,
            score: flicker_score,
            fire_area: area,
            smoke_detected: false,
            flickering_score: flicker_score,
        })
    }
}

impl EventDetector for FireDetector {
    fn name(&self) -> &'static str {
        "fire"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn process(&mut self, frame: &Frame, _poses: &[PoseResult]) -> Vec<Detection> {
        if !self.enabled {
            return Vec::new();
        }

        let yolo_boxes = match self.backend.detect(frame) {
            Ok(boxes) => boxes,
            Err(_) => Vec::new(),
        };

        let candidate = self.yolo_candidate(&yolo_boxes).or_else(|| self.color_candidate(frame));

        let Some(candidate) = candidate else {
            self.consecutive_candidates = 0;
            return Vec::new();
        };

        self.consecutive_candidates += 1;

        let gate_open =
            self.consecutive_candidates >= self.min_fire_frames && self.cooldown_elapsed(frame.frame_index);

        if !gate_open {
            return Vec::new();
        }

        self.consecutive_candidates = 0;
        self.last_emit_frame = Some(frame.frame_index);

        let metadata = FireMetadata {
            fire_detection: FireDetectionConfig {
                min_fire_frames: self.min_fire_frames,
                fire_confidence: self.fire_confidence,
                detection_method: candidate.method,
            },
            fire_area: candidate.fire_area,
            smoke_detected: candidate.smoke_detected,
            flickering_score: candidate.flickering_score,
        };

        vec![Detection {
            kind: DetectionKind::Fire(metadata),
            confidence: candidate.score,
            bbox: candidate.bbox,
            frame_index: frame.frame_index,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::StubFireBackend;

    fn thresholds() -> DetectorThresholds {
        let mut t = DetectorThresholds::default();
        t.fire_confidence = 0.5;
        t.min_fire_frames = 10;
        t.fire_cooldown_frames = 300;
        t
    }

    fn frame(i: u64) -> Frame {
        Frame::new(vec![0u8; 3], 1, 1, i)
    }

    #[test]
    fn scenario_5_yolo_fire_box_emits_once() {
        let fixtures = vec![vec![FireBox {
            bbox: (10.0, 10.0, 60.0, 60.0),
            label: FireLabel::Fire,
            confidence: 0.8,
        }]];
        // StubFireBackend repeats the last fixture once exhausted, so one
        // fixture entry is enough to drive all 10 frames.
        let backend = Box::new(StubFireBackend::new(fixtures));
        let mut det = FireDetector::new(backend, &thresholds(), true);

        let mut emitted = Vec::new();
        for i in 0..10u64 {
            let out = det.process(&frame(i), &[]);
            if !out.is_empty() {
                emitted.push(i);
            }
        }

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0], 9);
    }

    #[test]
    fn emitted_metadata_reports_yolo_method() {
        let fixtures = vec![vec![FireBox {
            bbox: (10.0, 10.0, 60.0, 60.0),
            label: FireLabel::Fire,
            confidence: 0.8,
        }]];
        let backend = Box::new(StubFireBackend::new(fixtures));
        let mut det = FireDetector::new(backend, &thresholds(), true);

        let mut last = Vec::new();
        for i in 0..10u64 {
            last = det.process(&frame(i), &[]);
        }

        assert_eq!(last.len(), 1);
        match &last[0].kind {
            DetectionKind::Fire(meta) => {
                assert_eq!(meta.fire_detection.detection_method, DetectionMethod::Yolo);
            }
            _ => panic!("expected fire detection"),
        }
    }

    #[test]
    fn low_confidence_yolo_box_is_ignored() {
        let fixtures = vec![vec![FireBox {
            bbox: (0.0, 0.0, 10.0, 10.0),
            label: FireLabel::Fire,
            confidence: 0.2,
        }]];
        let backend = Box::new(StubFireBackend::new(fixtures));
        let mut det = FireDetector::new(backend, &thresholds(), true);

        for i in 0..10u64 {
            assert!(det.process(&frame(i), &[]).is_empty());
        }
    }

    #[test]
    fn rgb_to_hsv_known_orange() {
        let (h, s, v) = rgb_to_hsv(255, 140, 0);
        assert!(h >= 5.0 && h <= 25.0);
        assert!(s >= 150.0);
        assert!(v >= 200.0);
    }
}
