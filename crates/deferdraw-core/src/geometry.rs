use serde::{Deserialize, Serialize};

const NEARLY_ZERO: f64 = 1e-9;

fn nearly_zero(v: f64) -> bool {
    v.abs() <= NEARLY_ZERO
}

/// A 2D point in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned bounding box.
///
/// A box with zero or negative width or height is *empty*. Empty boxes never
/// intersect anything and are ignored by [`BBox::union_with`], which is how
/// "unknown bounds" and "nothing dirty yet" are represented.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min: Point,
    pub max: Point,
}

impl Default for BBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BBox {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// Build a box from left, top, right and bottom edges.
    pub fn from_ltrb(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self::new(Point::new(left, top), Point::new(right, bottom))
    }

    pub fn empty() -> Self {
        Self::from_ltrb(0.0, 0.0, 0.0, 0.0)
    }

    pub fn from_points(points: &[Point]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self {
            min: Point::new(min_x, min_y),
            max: Point::new(max_x, max_y),
        })
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    /// Strict overlap test: boxes that only share an edge do not intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
    }

    pub fn intersection(&self, other: &BBox) -> Option<BBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(Self::from_ltrb(
            self.min.x.max(other.min.x),
            self.min.y.max(other.min.y),
            self.max.x.min(other.max.x),
            self.max.y.min(other.max.y),
        ))
    }

    pub fn union(&self, other: &BBox) -> Self {
        Self {
            min: Point::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Point::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    /// Grow this box to cover `other`, skipping empty boxes on either side.
    pub fn union_with(&mut self, other: &BBox) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = *other;
        } else {
            *self = self.union(other);
        }
    }
}

/// A 2x3 affine matrix mapping local coordinates to canvas coordinates.
///
/// `x' = scale_x * x + skew_x * y + translate_x`
/// `y' = skew_y * x + scale_y * y + translate_y`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub scale_x: f64,
    pub skew_x: f64,
    pub translate_x: f64,
    pub skew_y: f64,
    pub scale_y: f64,
    pub translate_y: f64,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix {
    pub fn identity() -> Self {
        Self {
            scale_x: 1.0,
            skew_x: 0.0,
            translate_x: 0.0,
            skew_y: 0.0,
            scale_y: 1.0,
            translate_y: 0.0,
        }
    }

    pub fn translate(x: f64, y: f64) -> Self {
        Self {
            translate_x: x,
            translate_y: y,
            ..Self::identity()
        }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            scale_x: sx,
            scale_y: sy,
            ..Self::identity()
        }
    }

    /// Rotation about the origin, in degrees.
    pub fn rotate(degrees: f64) -> Self {
        let rad = degrees.to_radians();
        let (sin_r, cos_r) = rad.sin_cos();
        Self {
            scale_x: cos_r,
            skew_x: -sin_r,
            skew_y: sin_r,
            scale_y: cos_r,
            ..Self::identity()
        }
    }

    /// `self * other`: the result applies `other` first, then `self`.
    pub fn concat(&self, other: &Matrix) -> Self {
        Self {
            scale_x: self.scale_x * other.scale_x + self.skew_x * other.skew_y,
            skew_x: self.scale_x * other.skew_x + self.skew_x * other.scale_y,
            translate_x: self.scale_x * other.translate_x
                + self.skew_x * other.translate_y
                + self.translate_x,
            skew_y: self.skew_y * other.scale_x + self.scale_y * other.skew_y,
            scale_y: self.skew_y * other.skew_x + self.scale_y * other.scale_y,
            translate_y: self.skew_y * other.translate_x
                + self.scale_y * other.translate_y
                + self.translate_y,
        }
    }

    /// True when the matrix only translates (no scale, skew or rotation).
    pub fn is_pure_translate(&self) -> bool {
        nearly_zero(self.scale_x - 1.0)
            && nearly_zero(self.scale_y - 1.0)
            && nearly_zero(self.skew_x)
            && nearly_zero(self.skew_y)
    }

    /// True when axis-aligned rectangles map to axis-aligned rectangles
    /// (scales, translations and quarter-turn rotations).
    pub fn rect_stays_rect(&self) -> bool {
        let axis_aligned = nearly_zero(self.skew_x)
            && nearly_zero(self.skew_y)
            && !nearly_zero(self.scale_x)
            && !nearly_zero(self.scale_y);
        let quarter_turn = nearly_zero(self.scale_x)
            && nearly_zero(self.scale_y)
            && !nearly_zero(self.skew_x)
            && !nearly_zero(self.skew_y);
        axis_aligned || quarter_turn
    }

    pub fn map_point(&self, p: &Point) -> Point {
        Point::new(
            self.scale_x * p.x + self.skew_x * p.y + self.translate_x,
            self.skew_y * p.x + self.scale_y * p.y + self.translate_y,
        )
    }

    /// Bounds of the four mapped corners of `bbox`.
    pub fn map_bbox(&self, bbox: &BBox) -> BBox {
        let corners = [
            self.map_point(&bbox.min),
            self.map_point(&Point::new(bbox.max.x, bbox.min.y)),
            self.map_point(&bbox.max),
            self.map_point(&Point::new(bbox.min.x, bbox.max.y)),
        ];
        BBox::from_points(&corners).unwrap_or_default()
    }
}
