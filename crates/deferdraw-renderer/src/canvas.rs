use serde::{Deserialize, Serialize};

use deferdraw_core::geometry::{BBox, Matrix};
use deferdraw_core::state::{ClipOp, RegionOp, SaveFlags};

/// An offscreen layer opened by `save_layer`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub bounds: BBox,
    pub alpha: u8,
}

/// One entry of the canvas save stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub matrix: Matrix,
    /// Screen-space clip bounds. For complex clips this is the bounding box.
    pub clip: BBox,
    /// The true clip is not the rectangle in `clip`.
    pub complex_clip: bool,
    pub alpha: f32,
    pub flags: SaveFlags,
    pub layer: Option<LayerInfo>,
}

/// Matrix, clip and save stack of a canvas of fixed pixel size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Canvas {
    /// Canvas width in pixels.
    pub width: f64,
    /// Canvas height in pixels.
    pub height: f64,
    stack: Vec<Snapshot>,
}

impl Canvas {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            stack: vec![Snapshot {
                matrix: Matrix::identity(),
                clip: BBox::from_ltrb(0.0, 0.0, width, height),
                complex_clip: false,
                alpha: 1.0,
                flags: SaveFlags::ALL,
                layer: None,
            }],
        }
    }

    /// Full canvas rectangle in screen space.
    pub fn bounds(&self) -> BBox {
        BBox::from_ltrb(0.0, 0.0, self.width, self.height)
    }

    pub fn save_count(&self) -> i32 {
        self.stack.len() as i32
    }

    pub fn current(&self) -> &Snapshot {
        // The base snapshot is never popped.
        &self.stack[self.stack.len() - 1]
    }

    pub fn current_mut(&mut self) -> &mut Snapshot {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    /// Push a copy of the current snapshot; returns the previous save count.
    pub fn save(&mut self, flags: SaveFlags) -> i32 {
        let previous = self.save_count();
        let mut snapshot = self.current().clone();
        snapshot.flags = flags;
        snapshot.layer = None;
        self.stack.push(snapshot);
        previous
    }

    pub fn save_layer(&mut self, bounds: &BBox, alpha: u8, flags: SaveFlags) -> i32 {
        let previous = self.save(flags);
        let current = self.current_mut();
        let mapped = current.matrix.map_bbox(bounds);
        current.clip = current.clip.intersection(&mapped).unwrap_or_default();
        current.alpha *= f32::from(alpha) / 255.0;
        current.layer = Some(LayerInfo {
            bounds: mapped,
            alpha,
        });
        previous
    }

    /// Pop one snapshot. The base snapshot stays.
    pub fn restore(&mut self) -> Option<Snapshot> {
        if self.stack.len() > 1 {
            self.stack.pop()
        } else {
            None
        }
    }

    /// Pop snapshots until the save count is `count`; returns how many were popped.
    pub fn restore_to_count(&mut self, count: i32) -> usize {
        let target = count.max(1) as usize;
        let mut popped = 0;
        while self.stack.len() > target {
            self.stack.pop();
            popped += 1;
        }
        popped
    }

    pub fn concat(&mut self, matrix: &Matrix) {
        let current = self.current_mut();
        current.matrix = current.matrix.concat(matrix);
    }

    /// Apply a clip in the current transform. The tracked rectangle is a
    /// conservative bound of the real clip; returns false if it became empty.
    pub fn clip(&mut self, clip: &ClipOp) -> bool {
        let current = self.current_mut();
        let mapped = current.matrix.map_bbox(&clip.bounds());
        if clip.can_cause_complex_clip() || !current.matrix.rect_stays_rect() {
            current.complex_clip = true;
        }
        current.clip = match clip.op {
            RegionOp::Intersect => current.clip.intersection(&mapped).unwrap_or_default(),
            RegionOp::Replace => mapped,
            RegionOp::Union | RegionOp::Xor | RegionOp::ReverseDifference => {
                let mut grown = current.clip;
                grown.union_with(&mapped);
                grown
            }
            RegionOp::Difference => current.clip,
        };
        !current.clip.is_empty()
    }
}
