use serde::{Deserialize, Serialize};

use crate::geometry::{BBox, Point};
use crate::state::DisplayState;

/// Batch class of a draw operation. Ops of different classes never share a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchId {
    /// Don't batch.
    None = 0,
    Bitmap,
    Patch,
    AlphaVertices,
    Vertices,
    AlphaMaskTexture,
    Text,
    ColorText,
}

impl BatchId {
    pub const COUNT: usize = 8;

    pub const ALL: [BatchId; BatchId::COUNT] = [
        BatchId::None,
        BatchId::Bitmap,
        BatchId::Patch,
        BatchId::AlphaVertices,
        BatchId::Vertices,
        BatchId::AlphaMaskTexture,
        BatchId::Text,
        BatchId::ColorText,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_text(self) -> bool {
        matches!(self, BatchId::Text | BatchId::ColorText)
    }
}

/// Opaque merge identity. Tokens are unique per batch id, never compared across ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MergeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FontId(pub u32);

impl From<TextureId> for MergeId {
    fn from(id: TextureId) -> Self {
        MergeId(u64::from(id.0))
    }
}

impl From<FontId> for MergeId {
    fn from(id: FontId) -> Self {
        MergeId(u64::from(id.0))
    }
}

/// How an op wants to be batched, computed once its display state is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferInfo {
    pub batch_id: BatchId,
    pub merge_id: Option<MergeId>,
    pub mergeable: bool,
}

/// Paint attributes that take part in merge compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paint {
    /// ARGB color.
    pub color: u32,
    pub anti_alias: bool,
}

impl Default for Paint {
    fn default() -> Self {
        Self {
            color: 0xFF00_0000,
            anti_alias: false,
        }
    }
}

impl Paint {
    pub fn new(color: u32) -> Self {
        Self {
            color,
            anti_alias: false,
        }
    }

    pub fn anti_aliased(mut self) -> Self {
        self.anti_alias = true;
        self
    }

    pub fn alpha(&self) -> u8 {
        (self.color >> 24) as u8
    }
}

/// Drawing primitive with its local-space geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DrawKind {
    Bitmap {
        texture: TextureId,
        dst: BBox,
        /// Single-channel bitmap drawn through the paint color.
        alpha_mask: bool,
    },
    Patch {
        texture: TextureId,
        dst: BBox,
    },
    Rect {
        rect: BBox,
    },
    Path {
        points: Vec<Point>,
    },
    Text {
        font: FontId,
        glyph_count: usize,
        bounds: BBox,
        color_glyphs: bool,
    },
    /// Layers, functors and anything else that must not be batched.
    Opaque {
        name: String,
        bounds: BBox,
    },
}

/// A deferred draw operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawOp {
    pub kind: DrawKind,
    pub paint: Paint,
    pub state: DisplayState,
    /// When false the op keeps its exact place in the draw order.
    pub allow_reorder: bool,
}

impl DrawOp {
    pub fn new(kind: DrawKind, paint: Paint) -> Self {
        let bounds = local_bounds(&kind);
        Self {
            kind,
            paint,
            state: DisplayState::new(bounds),
            allow_reorder: true,
        }
    }

    pub fn bitmap(texture: TextureId, dst: BBox) -> Self {
        Self::new(
            DrawKind::Bitmap {
                texture,
                dst,
                alpha_mask: false,
            },
            Paint::default(),
        )
    }

    pub fn alpha_mask_bitmap(texture: TextureId, dst: BBox) -> Self {
        Self::new(
            DrawKind::Bitmap {
                texture,
                dst,
                alpha_mask: true,
            },
            Paint::default(),
        )
    }

    pub fn patch(texture: TextureId, dst: BBox) -> Self {
        Self::new(DrawKind::Patch { texture, dst }, Paint::default())
    }

    pub fn rect(rect: BBox, paint: Paint) -> Self {
        Self::new(DrawKind::Rect { rect }, paint)
    }

    pub fn path(points: Vec<Point>, paint: Paint) -> Self {
        Self::new(DrawKind::Path { points }, paint)
    }

    pub fn text(font: FontId, glyph_count: usize, bounds: BBox, paint: Paint) -> Self {
        Self::new(
            DrawKind::Text {
                font,
                glyph_count,
                bounds,
                color_glyphs: false,
            },
            paint,
        )
    }

    pub fn color_text(font: FontId, glyph_count: usize, bounds: BBox, paint: Paint) -> Self {
        Self::new(
            DrawKind::Text {
                font,
                glyph_count,
                bounds,
                color_glyphs: true,
            },
            paint,
        )
    }

    pub fn opaque(name: &str, bounds: BBox) -> Self {
        Self::new(
            DrawKind::Opaque {
                name: name.to_string(),
                bounds,
            },
            Paint::default(),
        )
    }

    pub fn with_paint(mut self, paint: Paint) -> Self {
        self.paint = paint;
        self
    }

    /// Pin the op in draw order: nothing is reordered across it.
    pub fn without_reorder(mut self) -> Self {
        self.allow_reorder = false;
        self
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            DrawKind::Bitmap { .. } => "DrawBitmap",
            DrawKind::Patch { .. } => "DrawPatch",
            DrawKind::Rect { .. } => "DrawRect",
            DrawKind::Path { .. } => "DrawPath",
            DrawKind::Text { .. } => "DrawText",
            DrawKind::Opaque { name, .. } => name,
        }
    }

    pub fn local_bounds(&self) -> BBox {
        local_bounds(&self.kind)
    }

    /// Batch id, merge identity and mergeability. Reads `state.matrix`, so it is
    /// only meaningful once the renderer has stored the op's display state.
    pub fn defer_info(&self) -> DeferInfo {
        let pure_translate = self.state.matrix.is_pure_translate();
        match &self.kind {
            DrawKind::Bitmap {
                texture,
                alpha_mask,
                ..
            } => DeferInfo {
                batch_id: if *alpha_mask {
                    BatchId::AlphaMaskTexture
                } else {
                    BatchId::Bitmap
                },
                merge_id: Some((*texture).into()),
                mergeable: pure_translate && !*alpha_mask,
            },
            DrawKind::Patch { texture, .. } => DeferInfo {
                batch_id: BatchId::Patch,
                merge_id: Some((*texture).into()),
                mergeable: pure_translate,
            },
            DrawKind::Rect { .. } => DeferInfo {
                batch_id: if self.paint.anti_alias {
                    BatchId::AlphaVertices
                } else {
                    BatchId::Vertices
                },
                merge_id: None,
                mergeable: false,
            },
            DrawKind::Path { .. } => DeferInfo {
                batch_id: BatchId::AlphaMaskTexture,
                merge_id: None,
                mergeable: false,
            },
            DrawKind::Text {
                font, color_glyphs, ..
            } => DeferInfo {
                batch_id: if *color_glyphs {
                    BatchId::ColorText
                } else {
                    BatchId::Text
                },
                merge_id: Some((*font).into()),
                mergeable: pure_translate,
            },
            DrawKind::Opaque { .. } => DeferInfo {
                batch_id: BatchId::None,
                merge_id: None,
                mergeable: false,
            },
        }
    }
}

fn local_bounds(kind: &DrawKind) -> BBox {
    match kind {
        DrawKind::Bitmap { dst, .. } | DrawKind::Patch { dst, .. } => *dst,
        DrawKind::Rect { rect } => *rect,
        DrawKind::Path { points } => BBox::from_points(points).unwrap_or_default(),
        DrawKind::Text { bounds, .. } | DrawKind::Opaque { bounds, .. } => *bounds,
    }
}
