//! Cash detector (C4): strict two-role cashier/customer hand-touch
//! detection with temporal gating and a deterministic tie-break rule so
//! recordings are reproducible.

use serde::{Serialize, Serializer};

use crate::config::DetectorThresholds;
use crate::detect::{Detection, DetectionKind, EventDetector};
use crate::frame::Frame;
use crate::pose::{euclidean, PoseResult, Side};
use crate::zone::CashierZone;

#[derive(Debug, Clone)]
pub struct Hand {
    pub x: f32,
    pub y: f32,
    pub conf: f32,
}

/// Serializes as a bare `[x, y, conf]` array, not an object, matching the
/// wire contract for `hands.left`/`hands.right` in the cash event sidecar.
impl Serialize for Hand {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (self.x, self.y, self.conf).serialize(serializer)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PartyMetadata {
    pub center: [f32; 2],
    pub bbox: [f32; 4],
    pub hands: HandPair,
    pub in_zone: bool,
    pub hand_used: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct HandPair {
    pub left: Hand,
    pub right: Hand,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashDetectionConfig {
    pub hand_touch_distance_threshold: u32,
    pub cashier_zone: serde_json::Value,
    pub pose_confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashMetadata {
    pub cashier: PartyMetadata,
    pub customer: PartyMetadata,
    pub measured_hand_distance: f32,
    pub distance_threshold: u32,
    pub interaction_point: [f32; 2],
    pub people_count: usize,
    pub cash_detection: CashDetectionConfig,
}

struct HandCandidate {
    cashier_idx: usize,
    customer_idx: usize,
    cashier_hand: Side,
    customer_hand: Side,
    distance: f32,
    min_wrist_conf: f32,
}

pub struct CashDetector {
    zone: CashierZone,
    hand_touch_distance: u32,
    pose_confidence_floor: f32,
    min_transaction_frames: u32,
    cooldown_frames: u64,
    cash_confidence: f32,
    enabled: bool,

    consecutive_candidates: u32,
    last_emit_frame: Option<u64>,
}

impl CashDetector {
    pub fn new(zone: CashierZone, thresholds: &DetectorThresholds, enabled: bool) -> Self {
        Self {
            zone,
            hand_touch_distance: thresholds.hand_touch_distance_px,
            pose_confidence_floor: thresholds.pose_confidence_floor,
            min_transaction_frames: thresholds.min_transaction_frames,
            cooldown_frames: thresholds.cash_cooldown_frames as u64,
            cash_confidence: thresholds.cash_confidence,
            enabled,
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

    fn best_candidate(&self, poses: &[PoseResult], roles: &[bool]) -> Option<HandCandidate> {
        let mut candidates = Vec::new();

        for i in 0..poses.len() {
            for j in (i + 1)..poses.len() {
                // Exactly one of the pair must be the cashier (XOR on in_zone).
                if roles[i] == roles[j] {
                    continue;
                }
                let (cashier_idx, customer_idx) = if roles[i] { (i, j) } else { (j, i) };
                let cashier = &poses[cashier_idx];
                let customer = &poses[customer_idx];

                for cashier_hand in [Side::Left, Side::Right] {
                    let cw = cashier.wrist(cashier_hand);
                    if cw.confidence < self.pose_confidence_floor {
                        continue;
                    }
                    for customer_hand in [Side::Left, Side::Right] {
                        let ow = customer.wrist(customer_hand);
                        if ow.confidence < self.pose_confidence_floor {
                            continue;
                        }
                        let distance = euclidean((cw.x, cw.y), (ow.x, ow.y));
                        candidates.push(HandCandidate {
                            cashier_idx,
                            customer_idx,
                            cashier_hand,
                            customer_hand,
                            distance,
                            min_wrist_conf: cw.confidence.min(ow.confidence),
                        });
                    }
                }
            }
        }

        if candidates.is_empty() {
            return None;
        }

        let min_distance = candidates.iter().map(|c| c.distance).fold(f32::INFINITY, f32::min);
        const EPS: f32 = 1e-6;
        candidates.retain(|c| (c.distance - min_distance).abs() <= EPS);

        candidates.sort_by(|a, b| {
            b.min_wrist_conf
                .partial_cmp(&a.min_wrist_conf)
                .unwrap()
                .then_with(|| {
                    let ax = poses[a.customer_idx].center(self.pose_confidence_floor).0;
                    let bx = poses[b.customer_idx].center(self.pose_confidence_floor).0;
                    ax.partial_cmp(&bx).unwrap()
                })
        });

        candidates.into_iter().next()
    }

    fn party_metadata(&self, pose: &PoseResult, in_zone: bool, hand_used: Side) -> PartyMetadata {
        let (x1, y1, x2, y2) = pose.bbox;
        let center = pose.center(self.pose_confidence_floor);
        let left = pose.wrist(Side::Left);
        let right = pose.wrist(Side::Right);

        PartyMetadata {
            center: [center.0, center.1],
            bbox: [x1, y1, x2, y2],
            hands: HandPair {
                left: Hand { x: left.x, y: left.y, conf: left.confidence },
                right: Hand { x: right.x, y: right.y, conf: right.confidence },
            },
            in_zone,
            hand_used: match hand_used {
                Side::Left => "left",
                Side::Right => "right",
            },
        }
    }
}

impl EventDetector for CashDetector {
    fn name(&self) -> &'static str {
        "cash"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn process(&mut self, frame: &Frame, poses: &[PoseResult]) -> Vec<Detection> {
        if !self.enabled {
            return Vec::new();
        }

        let roles: Vec<bool> =
            poses.iter().map(|p| p.in_zone(&self.zone, self.pose_confidence_floor)).collect();

        let candidate = self.best_candidate(poses, &roles);

        let Some(candidate) = candidate else {
            self.consecutive_candidates = 0;
            return Vec::new();
        };

        if candidate.distance >= self.hand_touch_distance as f32 {
            self.consecutive_candidates = 0;
            return Vec::new();
        }

        self.consecutive_candidates += 1;
        let distance_score = 1.0 - candidate.distance / self.hand_touch_distance as f32;

        let gate_open = self.consecutive_candidates >= self.min_transaction_frames
            && distance_score >= self.cash_confidence
            && self.cooldown_elapsed(frame.frame_index);

        if !gate_open {
            return Vec::new();
        }

        self.consecutive_candidates = 0;
        self.last_emit_frame = Some(frame.frame_index);

        let cashier_pose = &poses[candidate.cashier_idx];
        let customer_pose = &poses[candidate.customer_idx];
        let cashier_wrist = cashier_pose.wrist(candidate.cashier_hand);
        let customer_wrist = customer_pose.wrist(candidate.customer_hand);

        let cashier = self.party_metadata(cashier_pose, true, candidate.cashier_hand);
        let customer = self.party_metadata(customer_pose, false, candidate.customer_hand);

        let bbox = union_bbox(cashier_pose.bbox, customer_pose.bbox);

        let metadata = CashMetadata {
            cashier,
            customer,
            measured_hand_distance: candidate.distance,
            distance_threshold: self.hand_touch_distance,
            interaction_point: [
                (cashier_wrist.x + customer_wrist.x) / 2.0,
                (cashier_wrist.y + customer_wrist.y) / 2.0,
            ],
            people_count: poses.len(),
            cash_detection: CashDetectionConfig {
                hand_touch_distance_threshold: self.hand_touch_distance,
                cashier_zone: self.zone.to_json(),
                pose_confidence: self.pose_confidence_floor,
            },
        };

        vec![Detection {
            kind: DetectionKind::Cash(metadata),
            confidence: distance_score,
            bbox: Some(bbox),
            frame_index: frame.frame_index,
        }]
    }
}

fn union_bbox(a: (f32, f32, f32, f32), b: (f32, f32, f32, f32)) -> (f32, f32, f32, f32) {
    (a.0.min(b.0), a.1.min(b.1), a.2.max(b.2), a.3.max(b.3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Keypoint, LEFT_HIP, LEFT_WRIST, RIGHT_HIP, RIGHT_WRIST};

    fn person_at(cx: f32, cy: f32, wrist_x: f32, wrist_y: f32, wrist_conf: f32) -> PoseResult {
        let mut keypoints = [Keypoint::zero(); 17];
        keypoints[LEFT_HIP] = Keypoint { x: cx - 5.0, y: cy, confidence: 0.9 };
        keypoints[RIGHT_HIP] = Keypoint { x: cx + 5.0, y: cy, confidence: 0.9 };
        keypoints[LEFT_WRIST] = Keypoint { x: wrist_x, y: wrist_y, confidence: wrist_conf };
        keypoints[RIGHT_WRIST] = Keypoint { x: wrist_x, y: wrist_y, confidence: wrist_conf };
        PoseResult { bbox: (cx - 20.0, cy - 40.0, cx + 20.0, cy + 40.0), keypoints }
    }

    fn frame(i: u64) -> Frame {
        Frame::new(vec![0u8; 3], 1, 1, i)
    }

    fn thresholds() -> DetectorThresholds {
        let mut t = DetectorThresholds::default();
        t.hand_touch_distance_px = 100;
        t.pose_confidence_floor = 0.3;
        t.min_transaction_frames = 1;
        t.cash_cooldown_frames = 45;
        t.cash_confidence = 0.1;
        t
    }

    fn zone() -> CashierZone {
        CashierZone::Rect { x1: 500.0, y1: 350.0, x2: 650.0, y2: 550.0 }
    }

    #[test]
    fn scenario_1_emits_at_frame_zero_then_respects_cooldown() {
        let mut det = CashDetector::new(zone(), &thresholds(), true);
        let cashier = person_at(600.0, 450.0, 600.0, 450.0, 0.9);
        let customer = person_at(680.0, 455.0, 680.0, 455.0, 0.9);
        let poses = vec![cashier, customer];

        let mut emitted_frames = Vec::new();
        for i in 0..60u64 {
            let out = det.process(&frame(i), &poses);
            if !out.is_empty() {
                emitted_frames.push(i);
            }
        }

        assert_eq!(emitted_frames[0], 0);
        assert!(emitted_frames.iter().skip(1).all(|&f| f >= 45));
    }

    #[test]
    fn scenario_2_both_in_zone_never_fires() {
        let mut det = CashDetector::new(zone(), &thresholds(), true);
        let a = person_at(600.0, 450.0, 600.0, 450.0, 0.9);
        let b = person_at(610.0, 455.0, 610.0, 455.0, 0.9);
        let poses = vec![a, b];

        for i in 0..60u64 {
            assert!(det.process(&frame(i), &poses).is_empty());
        }
    }

    #[test]
    fn scenario_3_low_wrist_confidence_never_fires() {
        let mut t = thresholds();
        t.pose_confidence_floor = 0.3;
        let mut det = CashDetector::new(zone(), &t, true);
        let cashier = person_at(600.0, 450.0, 600.0, 450.0, 0.25);
        let customer = person_at(680.0, 455.0, 680.0, 455.0, 0.25);
        let poses = vec![cashier, customer];

        for i in 0..10u64 {
            assert!(det.process(&frame(i), &poses).is_empty());
        }
    }

    #[test]
    fn boundary_distance_equal_threshold_is_not_a_candidate() {
        let mut t = thresholds();
        t.hand_touch_distance_px = 100;
        let mut det = CashDetector::new(zone(), &t, true);
        let cashier = person_at(600.0, 450.0, 600.0, 450.0, 0.9);
        let customer = person_at(700.0, 450.0, 700.0, 450.0, 0.9); // exactly 100px away
        let poses = vec![cashier, customer];

        assert!(det.process(&frame(0), &poses).is_empty());
    }

    #[test]
    fn exact_confidence_floor_is_accepted() {
        let mut t = thresholds();
        t.pose_confidence_floor = 0.3;
        let mut det = CashDetector::new(zone(), &t, true);
        let cashier = person_at(600.0, 450.0, 600.0, 450.0, 0.3);
        let customer = person_at(680.0, 455.0, 680.0, 455.0, 0.3);
        let poses = vec![cashier, customer];

        assert!(!det.process(&frame(0), &poses).is_empty());
    }

    #[test]
    fn emitted_event_has_exactly_one_cashier_and_one_customer() {
        let mut det = CashDetector::new(zone(), &thresholds(), true);
        let cashier = person_at(600.0, 450.0, 600.0, 450.0, 0.9);
        let customer = person_at(680.0, 455.0, 680.0, 455.0, 0.9);
        let poses = vec![cashier, customer];

        let out = det.process(&frame(0), &poses);
        assert_eq!(out.len(), 1);
        if let DetectionKind::Cash(meta) = &out[0].kind {
            assert!(meta.cashier.in_zone);
            assert!(!meta.customer.in_zone);
            assert!(meta.measured_hand_distance < meta.distance_threshold as f32);
        } else {
            panic!("expected cash detection");
        }
    }
}
