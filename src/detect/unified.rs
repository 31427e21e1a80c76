//! Unified detector (C7): runs the pose backend once per sampled frame,
//! fans out to each enabled `EventDetector` in fixed order, and draws the
//! overlay onto every frame regardless of whether anything fired.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect as DrawRect;

use crate::backends::PoseBackend;
use crate::detect::{Detection, EventDetector};
use crate::error::InferenceError;
use crate::frame::Frame;
use crate::pose::{PoseResult, Side};
use crate::zone::CashierZone;

const CASHIER_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const CUSTOMER_COLOR: Rgb<u8> = Rgb([0, 120, 255]);
const HAND_COLOR: Rgb<u8> = Rgb([255, 215, 0]);
const ZONE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Consecutive pose-backend failures tolerated before the worker is
/// considered unhealthy and the frame loop is asked to stop.
const INFERENCE_ERROR_BUDGET: u32 = 30;

pub struct UnifiedDetector {
    pose_backend: Box<dyn PoseBackend>,
    detectors: Vec<Box<dyn EventDetector>>,
    zone: CashierZone,
    pose_confidence_floor: f32,
    detect_every_n: u64,
    consecutive_inference_errors: u32,
}

impl UnifiedDetector {
    pub fn new(
        pose_backend: Box<dyn PoseBackend>,
        detectors: Vec<Box<dyn EventDetector>>,
        zone: CashierZone,
        pose_confidence_floor: f32,
        detect_every_n: u64,
    ) -> Self {
        Self {
            pose_backend,
            detectors,
            zone,
            pose_confidence_floor,
            detect_every_n: detect_every_n.max(1),
            consecutive_inference_errors: 0,
        }
    }

    /// Runs detection on sampled frames and always returns an annotated
    /// copy of `frame` for the rolling buffer and live viewer.
    ///
    /// A single failed pose-backend call is swallowed (the frame is treated
    /// as pose-less and still annotated); only a run of
    /// `INFERENCE_ERROR_BUDGET` consecutive failures is fatal, since a lone
    /// glitch shouldn't end the worker but a wedged model should.
    pub fn process(&mut self, frame: &Frame) -> Result<(Vec<Detection>, Frame), InferenceError> {
        let should_detect = frame.frame_index % self.detect_every_n == 0;

        let poses = if should_detect {
            match self.pose_backend.detect(frame) {
                Ok(poses) => {
                    self.consecutive_inference_errors = 0;
                    poses
                }
                Err(e) => {
                    self.consecutive_inference_errors += 1;
                    if self.consecutive_inference_errors >= INFERENCE_ERROR_BUDGET {
                        return Err(InferenceError::BudgetExceeded { count: self.consecutive_inference_errors });
                    }
                    tracing::warn!(error = %e, "pose inference failed, frame treated as pose-less");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let mut detections = Vec::new();
        if should_detect {
            for detector in self.detectors.iter_mut() {
                if detector.enabled() {
                    detections.extend(detector.process(frame, &poses));
                }
            }
        }

        let annotated = self.render_overlay(frame, &poses);
        Ok((detections, annotated))
    }

    fn render_overlay(&self, frame: &Frame, poses: &[PoseResult]) -> Frame {
        if !frame.is_valid() {
            return frame.clone();
        }

        let mut image = match RgbImage::from_raw(frame.width, frame.height, frame.data.clone()) {
            Some(img) => img,
            None => return frame.clone(),
        };

        self.draw_zone(&mut image);

        for pose in poses {
            let in_zone = pose.in_zone(&self.zone, self.pose_confidence_floor);
            let color = if in_zone { CASHIER_COLOR } else { CUSTOMER_COLOR };
            draw_bbox(&mut image, pose.bbox, color);

            for side in [Side::Left, Side::Right] {
                let wrist = pose.wrist(side);
                if wrist.confidence >= self.pose_confidence_floor {
                    draw_filled_circle_mut(&mut image, (wrist.x as i32, wrist.y as i32), 4, HAND_COLOR);
                }
            }
        }

        let mut annotated = Frame::new(image.into_raw(), frame.width, frame.height, frame.frame_index);
        annotated.captured_at = frame.captured_at;
        annotated
    }

    fn draw_zone(&self, image: &mut RgbImage) {
        match &self.zone {
            CashierZone::Rect { x1, y1, x2, y2 } => {
                draw_bbox(image, (*x1, *y1, *x2, *y2), ZONE_COLOR);
            }
            CashierZone::Polygon { vertices } => {
                if vertices.len() < 2 {
                    return;
                }
                for i in 0..vertices.len() {
                    let a = vertices[i];
                    let b = vertices[(i + 1) % vertices.len()];
                    draw_line_segment_mut(image, a, b, ZONE_COLOR);
                }
            }
        }
    }
}

fn draw_bbox(image: &mut RgbImage, bbox: (f32, f32, f32, f32), color: Rgb<u8>) {
    let (x1, y1, x2, y2) = bbox;
    let width = (x2 - x1).max(1.0) as u32;
    let height = (y2 - y1).max(1.0) as u32;
    let rect = DrawRect::at(x1 as i32, y1 as i32).of_size(width, height);
    draw_hollow_rect_mut(image, rect, color);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::StubPoseBackend;
    use crate::config::DetectorThresholds;
    use crate::detect::{CashDetector, FireDetector, ViolenceDetector};
    use crate::backends::StubFireBackend;

    fn zone() -> CashierZone {
        CashierZone::Rect { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 }
    }

    fn blank_frame(i: u64) -> Frame {
        Frame::new(vec![10u8; 8 * 8 * 3], 8, 8, i)
    }

    struct CountingDetector {
        calls: std::sync::Arc<std::sync::atomic::AtomicU32>,
    }

    impl EventDetector for CountingDetector {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn enabled(&self) -> bool {
            true
        }
        fn process(&mut self, _frame: &Frame, _poses: &[PoseResult]) -> Vec<Detection> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Vec::new()
        }
    }

    struct AlwaysFailingPoseBackend;

    impl crate::backends::PoseBackend for AlwaysFailingPoseBackend {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<PoseResult>, InferenceError> {
            Err(InferenceError::BackendFailed { backend: "test", reason: "simulated failure".into() })
        }
    }

    #[test]
    fn overlay_preserves_frame_dimensions() {
        let thresholds = DetectorThresholds::default();
        let pose_backend = Box::new(StubPoseBackend::new(vec![Vec::new()]));
        let fire_backend = Box::new(StubFireBackend::new(vec![Vec::new()]));
        let detectors: Vec<Box<dyn EventDetector>> = vec![
            Box::new(CashDetector::new(zone(), &thresholds, true)),
            Box::new(ViolenceDetector::new(zone(), &thresholds, true)),
            Box::new(FireDetector::new(fire_backend, &thresholds, true)),
        ];
        let mut unified = UnifiedDetector::new(pose_backend, detectors, zone(), 0.3, 1);

        let (_detections, annotated) = unified.process(&blank_frame(0)).unwrap();
        assert_eq!(annotated.width, 8);
        assert_eq!(annotated.height, 8);
        assert!(annotated.is_valid());
    }

    #[test]
    fn detection_skips_frames_not_on_the_sampling_boundary() {
        let pose_backend = Box::new(StubPoseBackend::new(vec![Vec::new()]));
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counting = Box::new(CountingDetector { calls: calls.clone() });
        let detectors: Vec<Box<dyn EventDetector>> = vec![counting];
        let mut unified = UnifiedDetector::new(pose_backend, detectors, zone(), 0.3, 4);

        for i in 0..8u64 {
            unified.process(&blank_frame(i)).unwrap();
        }

        // Only frame_index 0 and 4 land on the every-4th sampling boundary.
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn single_inference_failure_is_swallowed() {
        let pose_backend = Box::new(AlwaysFailingPoseBackend);
        let mut unified = UnifiedDetector::new(pose_backend, Vec::new(), zone(), 0.3, 1);

        let (detections, annotated) = unified.process(&blank_frame(0)).unwrap();
        assert!(detections.is_empty());
        assert!(annotated.is_valid());
    }

    #[test]
    fn inference_error_budget_escalates_to_fatal() {
        let pose_backend = Box::new(AlwaysFailingPoseBackend);
        let mut unified = UnifiedDetector::new(pose_backend, Vec::new(), zone(), 0.3, 1);

        let mut last = Ok((Vec::new(), blank_frame(0)));
        for i in 0..INFERENCE_ERROR_BUDGET as u64 {
            last = unified.process(&blank_frame(i));
        }

        assert!(matches!(last, Err(InferenceError::BudgetExceeded { count }) if count == INFERENCE_ERROR_BUDGET));
    }
}
