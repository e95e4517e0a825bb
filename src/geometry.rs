//! Geometry primitives for detector boxes
//!
//! Boxes are in page pixel space with the origin at the top-left corner.
//! Degenerate boxes have zero area and never contribute to overlaps.

use serde::{Deserialize, Serialize};

/// 2D point in pixel space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    /// Create a new point
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned bounding box: (xmin, ymin, xmax, ymax)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BBox {
    /// Create a new box from corner coordinates
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Build a box from a `[xmin, ymin, xmax, ymax]` slice.
    ///
    /// Returns `None` for the wrong arity, non-finite values, or inverted corners.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        let [x_min, y_min, x_max, y_max] = values else {
            return None;
        };
        let bbox = Self::new(*x_min, *y_min, *x_max, *y_max);
        bbox.is_valid().then_some(bbox)
    }

    /// All coordinates finite and corners ordered
    pub fn is_valid(&self) -> bool {
        [self.x_min, self.y_min, self.x_max, self.y_max]
            .iter()
            .all(|v| v.is_finite())
            && self.x_min <= self.x_max
            && self.y_min <= self.y_max
    }

    pub fn width(&self) -> f64 {
        (self.x_max - self.x_min).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y_max - self.y_min).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }

    /// Inclusive point containment (edges count as inside)
    pub fn contains_point(&self, p: &Point) -> bool {
        self.x_min <= p.x && p.x <= self.x_max && self.y_min <= p.y && p.y <= self.y_max
    }

    /// Check if this box contains another box completely
    pub fn contains_box(&self, other: &BBox) -> bool {
        other.x_min >= self.x_min
            && other.y_min >= self.y_min
            && other.x_max <= self.x_max
            && other.y_max <= self.y_max
    }

    /// Area of the intersection with another box (0 when disjoint)
    pub fn intersection_area(&self, other: &BBox) -> f64 {
        let w = (self.x_max.min(other.x_max) - self.x_min.max(other.x_min)).max(0.0);
        let h = (self.y_max.min(other.y_max) - self.y_min.max(other.y_min)).max(0.0);
        w * h
    }

    /// Intersection over union. Zero when the boxes do not overlap or the union is empty.
    pub fn iou(&self, other: &BBox) -> f64 {
        let inter = self.intersection_area(other);
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Width of the shared horizontal span
    pub fn horizontal_overlap(&self, other: &BBox) -> f64 {
        (self.x_max.min(other.x_max) - self.x_min.max(other.x_min)).max(0.0)
    }

    /// Smallest box containing both boxes
    pub fn union(&self, other: &BBox) -> BBox {
        BBox::new(
            self.x_min.min(other.x_min),
            self.y_min.min(other.y_min),
            self.x_max.max(other.x_max),
            self.y_max.max(other.y_max),
        )
    }

    /// Express this box in the coordinate space of `origin`'s top-left corner
    pub fn relative_to(&self, origin: &BBox) -> BBox {
        BBox::new(
            self.x_min - origin.x_min,
            self.y_min - origin.y_min,
            self.x_max - origin.x_min,
            self.y_max - origin.y_min,
        )
    }

    /// Corners rounded to whole pixels
    pub fn rounded(&self) -> BBox {
        BBox::new(
            self.x_min.round(),
            self.y_min.round(),
            self.x_max.round(),
            self.y_max.round(),
        )
    }
}
