//! # deferdraw Core
//!
//! Geometry primitives, footprint indexing and the data model of deferred
//! drawing operations: draw ops with their batch class and merge identity,
//! state ops (save, save-layer, clip, restore) and the display state a
//! renderer captures for each op at defer time.

pub mod geometry;
pub mod op;
pub mod spatial;
pub mod state;

pub use geometry::{BBox, Matrix, Point};
pub use op::{BatchId, DeferInfo, DrawKind, DrawOp, FontId, MergeId, Paint, TextureId};
pub use spatial::BoundsIndex;
pub use state::{
    ClipOp, ClipShape, DeferFlags, DisplayState, DrawModifiers, RegionOp, SaveFlags, StateKind,
    StateOp,
};
