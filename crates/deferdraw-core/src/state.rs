use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::geometry::{BBox, Matrix, Point};

/// What a renderer should capture when it stores an operation's display state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeferFlags(u8);

impl DeferFlags {
    pub const NONE: Self = Self(0);
    /// Map the op's bounds to screen space and quick-reject against the clip.
    pub const DRAW: Self = Self(0x1);
    /// Capture the current clip rect.
    pub const CLIP: Self = Self(0x2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for DeferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Flags passed to `save` / `save_layer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SaveFlags(u32);

impl SaveFlags {
    pub const MATRIX: Self = Self(0x01);
    pub const CLIP: Self = Self(0x02);
    pub const HAS_ALPHA_LAYER: Self = Self(0x04);
    pub const FULL_COLOR_LAYER: Self = Self(0x08);
    pub const CLIP_TO_LAYER: Self = Self(0x10);
    pub const MATRIX_CLIP: Self = Self(0x03);
    pub const ALL: Self = Self(0x1F);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for SaveFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SaveFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Renderer-wide paint modifiers active when an op was deferred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawModifiers {
    pub shader: Option<u32>,
    pub color_filter: Option<u32>,
    pub has_shadow: bool,
    pub has_draw_filter: bool,
    pub paint_filter_clear_bits: u32,
    pub paint_filter_set_bits: u32,
    pub override_layer_alpha: f32,
}

impl Default for DrawModifiers {
    fn default() -> Self {
        Self {
            shader: None,
            color_filter: None,
            has_shadow: false,
            has_draw_filter: false,
            paint_filter_clear_bits: 0,
            paint_filter_set_bits: 0,
            override_layer_alpha: 1.0,
        }
    }
}

/// Renderer state captured for an operation at defer time and restored
/// right before it is replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayState {
    /// Local bounds before deferral, screen-space bounds after.
    pub bounds: BBox,
    pub matrix: Matrix,
    /// `None` when the clip was not captured (complex clip in progress).
    pub clip: Option<BBox>,
    pub alpha: f32,
    pub modifiers: DrawModifiers,
}

impl DisplayState {
    pub fn new(bounds: BBox) -> Self {
        Self {
            bounds,
            matrix: Matrix::identity(),
            clip: None,
            alpha: 1.0,
            modifiers: DrawModifiers::default(),
        }
    }
}

impl Default for DisplayState {
    fn default() -> Self {
        Self::new(BBox::empty())
    }
}

/// Region combination mode of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionOp {
    Difference,
    Intersect,
    Union,
    Xor,
    ReverseDifference,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClipShape {
    Rect(BBox),
    Path(Vec<Point>),
    Region(Vec<BBox>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipOp {
    pub shape: ClipShape,
    pub op: RegionOp,
}

impl ClipOp {
    pub fn rect(rect: BBox, op: RegionOp) -> Self {
        Self {
            shape: ClipShape::Rect(rect),
            op,
        }
    }

    pub fn path(points: Vec<Point>, op: RegionOp) -> Self {
        Self {
            shape: ClipShape::Path(points),
            op,
        }
    }

    pub fn region(rects: Vec<BBox>, op: RegionOp) -> Self {
        Self {
            shape: ClipShape::Region(rects),
            op,
        }
    }

    /// Whether applying this clip can leave a non-rectangular clip behind.
    /// Transform effects are checked separately against the renderer.
    pub fn can_cause_complex_clip(&self) -> bool {
        match &self.shape {
            ClipShape::Rect(_) => !matches!(self.op, RegionOp::Intersect | RegionOp::Replace),
            ClipShape::Path(_) | ClipShape::Region(_) => true,
        }
    }

    pub fn bounds(&self) -> BBox {
        match &self.shape {
            ClipShape::Rect(rect) => *rect,
            ClipShape::Path(points) => BBox::from_points(points).unwrap_or_default(),
            ClipShape::Region(rects) => rects.iter().fold(BBox::empty(), |mut acc, r| {
                acc.union_with(r);
                acc
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateKind {
    Save { flags: SaveFlags },
    SaveLayer { bounds: BBox, alpha: u8, flags: SaveFlags },
    Clip(ClipOp),
    RestoreToCount { count: i32 },
}

/// A state-changing operation: save, save-layer, clip or restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateOp {
    pub kind: StateKind,
    pub state: DisplayState,
}

impl StateOp {
    pub fn new(kind: StateKind) -> Self {
        Self {
            kind,
            state: DisplayState::default(),
        }
    }

    pub fn save(flags: SaveFlags) -> Self {
        Self::new(StateKind::Save { flags })
    }

    pub fn save_layer(bounds: BBox, alpha: u8, flags: SaveFlags) -> Self {
        Self::new(StateKind::SaveLayer {
            bounds,
            alpha,
            flags,
        })
    }

    pub fn clip(clip: ClipOp) -> Self {
        Self::new(StateKind::Clip(clip))
    }

    pub fn restore_to_count(count: i32) -> Self {
        Self::new(StateKind::RestoreToCount { count })
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            StateKind::Save { .. } => "Save",
            StateKind::SaveLayer { .. } => "SaveLayer",
            StateKind::Clip(ClipOp {
                shape: ClipShape::Rect(_),
                ..
            }) => "ClipRect",
            StateKind::Clip(ClipOp {
                shape: ClipShape::Path(_),
                ..
            }) => "ClipPath",
            StateKind::Clip(ClipOp {
                shape: ClipShape::Region(_),
                ..
            }) => "ClipRegion",
            StateKind::RestoreToCount { .. } => "RestoreToCount",
        }
    }
}
