use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in absolute pixel coordinates of the analysed frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self> {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return Err(anyhow!("bounding box coordinates must be finite"));
        }
        if x1 > x2 || y1 > y2 {
            return Err(anyhow!(
                "bounding box corners out of order: ({}, {}) .. ({}, {})",
                x1,
                y1,
                x2,
                y2
            ));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union, 0.0 when the boxes do not overlap.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// `[x1, y1, x2, y2]`, the wire layout of the incident `bbox` field.
    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// One object reported by a detector backend.
///
/// Built through `Detection::new` so every record that reaches the alert
/// policy has a finite confidence in `[0, 1]` and a well-ordered box.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    label: String,
    confidence: f32,
    bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Result<Self> {
        let label = label.into();
        if label.trim().is_empty() {
            return Err(anyhow!("detection label must not be empty"));
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(anyhow!(
                "detection confidence {} for '{}' is outside [0, 1]",
                confidence,
                label
            ));
        }
        Ok(Self {
            label,
            confidence,
            bbox,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_confidence() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        assert!(Detection::new("fire", 1.2, bbox).is_err());
        assert!(Detection::new("fire", -0.1, bbox).is_err());
        assert!(Detection::new("fire", f32::NAN, bbox).is_err());
        assert!(Detection::new("", 0.5, bbox).is_err());
        assert!(Detection::new("fire", 1.0, bbox).is_ok());
    }

    #[test]
    fn rejects_inverted_boxes() {
        assert!(BoundingBox::new(10.0, 0.0, 5.0, 4.0).is_err());
        assert!(BoundingBox::new(0.0, 0.0, f32::INFINITY, 4.0).is_err());
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0).unwrap();
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0).unwrap();
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }
}
