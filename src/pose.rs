//! Pose estimation result types shared by the cash and violence detectors.
//!
//! Keypoints follow COCO ordering: 0 nose, 1/2 eyes, 3/4 ears, 5/6
//! shoulders, 7/8 elbows, 9/10 wrists, 11/12 hips, 13/14 knees, 15/16
//! ankles.

use crate::zone::CashierZone;

pub const LEFT_SHOULDER: usize = 5;
pub const RIGHT_SHOULDER: usize = 6;
pub const LEFT_WRIST: usize = 9;
pub const RIGHT_WRIST: usize = 10;
pub const LEFT_HIP: usize = 11;
pub const RIGHT_HIP: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl Keypoint {
    pub const fn zero() -> Self {
        Self { x: 0.0, y: 0.0, confidence: 0.0 }
    }
}

#[derive(Debug, Clone)]
pub struct PoseResult {
    pub bbox: (f32, f32, f32, f32), // x1, y1, x2, y2
    pub keypoints: [Keypoint; 17],
}

impl PoseResult {
    /// Hip midpoint if both hip confidences clear `floor`, else shoulder
    /// midpoint under the same rule, else the bbox center.
    pub fn center(&self, confidence_floor: f32) -> (f32, f32) {
        let hips = (self.keypoints[LEFT_HIP], self.keypoints[RIGHT_HIP]);
        if hips.0.confidence >= confidence_floor && hips.1.confidence >= confidence_floor {
            return midpoint(hips.0, hips.1);
        }

        let shoulders = (self.keypoints[LEFT_SHOULDER], self.keypoints[RIGHT_SHOULDER]);
        if shoulders.0.confidence >= confidence_floor && shoulders.1.confidence >= confidence_floor
        {
            return midpoint(shoulders.0, shoulders.1);
        }

        let (x1, y1, x2, y2) = self.bbox;
        ((x1 + x2) / 2.0, (y1 + y2) / 2.0)
    }

    pub fn in_zone(&self, zone: &CashierZone, confidence_floor: f32) -> bool {
        let (x, y) = self.center(confidence_floor);
        zone.contains(x, y)
    }

    pub fn wrist(&self, side: Side) -> Keypoint {
        match side {
            Side::Left => self.keypoints[LEFT_WRIST],
            Side::Right => self.keypoints[RIGHT_WRIST],
        }
    }

    pub fn shoulder(&self, side: Side) -> Keypoint {
        match side {
            Side::Left => self.keypoints[LEFT_SHOULDER],
            Side::Right => self.keypoints[RIGHT_SHOULDER],
        }
    }

    pub fn bbox_area(&self) -> f32 {
        let (x1, y1, x2, y2) = self.bbox;
        (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
    }

    pub fn bbox_diagonal(&self) -> f32 {
        let (x1, y1, x2, y2) = self.bbox;
        ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

fn midpoint(a: Keypoint, b: Keypoint) -> (f32, f32) {
    ((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}

pub fn euclidean((ax, ay): (f32, f32), (bx, by): (f32, f32)) -> f32 {
    ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose_with_hips(hip_conf: f32) -> PoseResult {
        let mut keypoints = [Keypoint::zero(); 17];
        keypoints[LEFT_HIP] = Keypoint { x: 10.0, y: 20.0, confidence: hip_conf };
        keypoints[RIGHT_HIP] = Keypoint { x: 20.0, y: 20.0, confidence: hip_conf };
        PoseResult { bbox: (0.0, 0.0, 30.0, 40.0), keypoints }
    }

    #[test]
    fn center_prefers_hips_when_confident() {
        let pose = pose_with_hips(0.9);
        assert_eq!(pose.center(0.3), (15.0, 20.0));
    }

    #[test]
    fn center_falls_back_to_shoulders_then_bbox() {
        let mut pose = pose_with_hips(0.1);
        assert_eq!(pose.center(0.3), (15.0, 20.0)); // bbox center fallback
        pose.keypoints[LEFT_SHOULDER] = Keypoint { x: 5.0, y: 5.0, confidence: 0.9 };
        pose.keypoints[RIGHT_SHOULDER] = Keypoint { x: 15.0, y: 5.0, confidence: 0.9 };
        assert_eq!(pose.center(0.3), (10.0, 5.0));
    }

    #[test]
    fn confidence_floor_is_inclusive() {
        let pose = pose_with_hips(0.3);
        assert_eq!(pose.center(0.3), (15.0, 20.0));
    }
}
