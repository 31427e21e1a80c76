//! The cashier zone: an image-space rectangle or polygon whose membership
//! test classifies a person as CASHIER or CUSTOMER. Grounded on the
//! point-in-polygon ray cast used for zone occupancy counting in the
//! teacher's zone-counting module, generalized to also accept a plain
//! rectangle and operating in pixel (not normalized) coordinates.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CashierZone {
    Rect { x1: f32, y1: f32, x2: f32, y2: f32 },
    Polygon { vertices: Vec<(f32, f32)> },
}

impl CashierZone {
    pub fn is_empty(&self) -> bool {
        match self {
            CashierZone::Rect { x1, y1, x2, y2 } => x2 <= x1 || y2 <= y1,
            CashierZone::Polygon { vertices } => vertices.len() < 3,
        }
    }

    /// Point-in-rectangle or point-in-polygon test, using a ray cast for the
    /// polygon case. The center rule is authoritative for zone membership;
    /// no bbox-overlap heuristic is used here.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        match self {
            CashierZone::Rect { x1, y1, x2, y2 } => x >= *x1 && x <= *x2 && y >= *y1 && y <= *y2,
            CashierZone::Polygon { vertices } => point_in_polygon(vertices, x, y),
        }
    }

    /// Serializable form used verbatim in cash-event metadata (§4.4's
    /// `cash_detection.cashier_zone`).
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn point_in_polygon(vertices: &[(f32, f32)], x: f32, y: f32) -> bool {
    if vertices.len() < 3 {
        return false;
    }

    let mut inside = false;
    let n = vertices.len();
    let mut p1 = vertices[n - 1];
    for &p2 in vertices {
        if (p2.1 > y) != (p1.1 > y) {
            let slope = (p2.0 - p1.0) / (p2.1 - p1.1);
            if x < slope * (y - p1.1) + p1.0 {
                inside = !inside;
            }
        }
        p1 = p2;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_contains_inclusive_bounds() {
        let zone = CashierZone::Rect { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 };
        assert!(zone.contains(0.0, 0.0));
        assert!(zone.contains(10.0, 10.0));
        assert!(!zone.contains(10.1, 5.0));
    }

    #[test]
    fn polygon_contains_point() {
        let zone = CashierZone::Polygon {
            vertices: vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)],
        };
        assert!(zone.contains(5.0, 5.0));
        assert!(!zone.contains(15.0, 5.0));
    }

    #[test]
    fn degenerate_polygon_is_empty() {
        let zone = CashierZone::Polygon { vertices: vec![(0.0, 0.0), (1.0, 1.0)] };
        assert!(zone.is_empty());
    }
}
