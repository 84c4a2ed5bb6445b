use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use deferdraw_core::geometry::{BBox, Matrix};
use deferdraw_core::op::DrawOp;
use deferdraw_core::state::{
    ClipOp, DeferFlags, DisplayState, DrawModifiers, SaveFlags, StateKind, StateOp,
};

/// Outcome bits of a draw submission, OR-ed across a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DrawStatus(u8);

impl DrawStatus {
    /// Nothing was drawn.
    pub const DONE: Self = Self(0x0);
    /// Pixels were touched; the dirty region is meaningful.
    pub const DREW: Self = Self(0x1);
    /// A functor asked to be invoked again outside of the draw pass.
    pub const INVOKE: Self = Self(0x2);
    /// A functor asked for another frame.
    pub const DRAW: Self = Self(0x4);

    pub fn drew(self) -> bool {
        self.contains(Self::DREW)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for DrawStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DrawStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("Renderer rejected {op}: {reason}")]
    SubmissionRejected { op: String, reason: String },

    #[error("Renderer rejected merged submission of {count} {op} ops")]
    MultiDrawRejected { op: String, count: usize },

    #[error("Render backend failure: {0}")]
    Backend(String),
}

/// The immediate-mode renderer a deferred display list records against and
/// replays into. It owns the transform, clip and save stack.
///
/// Save counts follow canvas conventions: a fresh renderer has a save count
/// of 1, and `save` returns the count *before* the save, which is the value
/// to pass to `restore_to_count` to undo it.
pub trait Renderer {
    fn save_count(&self) -> i32;

    fn save(&mut self, flags: SaveFlags) -> i32;

    fn save_layer(&mut self, bounds: &BBox, alpha: u8, flags: SaveFlags) -> i32;

    /// Pop saved states until the save count equals `count` (never below 1).
    fn restore_to_count(&mut self, count: i32);

    /// Apply a clip; returns false when the resulting clip is empty.
    fn clip(&mut self, clip: &ClipOp) -> bool;

    fn concat(&mut self, matrix: &Matrix);

    fn has_rect_to_rect_transform(&self) -> bool;

    /// Capture the current state into `state`. With [`DeferFlags::DRAW`],
    /// `state.bounds` is mapped to screen space and clipped; returns true if
    /// the op is entirely clipped out and should be dropped.
    fn store_display_state(&mut self, state: &mut DisplayState, flags: DeferFlags) -> bool;

    fn restore_display_state(&mut self, state: &DisplayState);

    fn draw_modifiers(&self) -> DrawModifiers;

    fn set_draw_modifiers(&mut self, modifiers: DrawModifiers);

    /// Issue a single draw. Touched pixels are accumulated into `dirty`.
    fn draw(&mut self, op: &DrawOp, dirty: &mut BBox) -> Result<DrawStatus, RenderError>;

    /// Issue several ops sharing batch id and merge identity as one
    /// submission. `bounds` covers all of them.
    fn multi_draw(
        &mut self,
        ops: &[DrawOp],
        bounds: &BBox,
        dirty: &mut BBox,
    ) -> Result<DrawStatus, RenderError>;

    /// Debug overlay drawn in screen space, ignoring the current transform.
    fn draw_screen_space_color_rect(
        &mut self,
        _rect: &BBox,
        _color: u32,
    ) -> Result<DrawStatus, RenderError> {
        Ok(DrawStatus::DONE)
    }

    /// Named marker for frame debuggers.
    fn event_mark(&mut self, _name: &str) {}

    fn apply_state(&mut self, op: &StateOp) {
        match &op.kind {
            StateKind::Save { flags } => {
                self.save(*flags);
            }
            StateKind::SaveLayer {
                bounds,
                alpha,
                flags,
            } => {
                self.save_layer(bounds, *alpha, *flags);
            }
            StateKind::Clip(clip) => {
                self.clip(clip);
            }
            StateKind::RestoreToCount { count } => self.restore_to_count(*count),
        }
    }
}
