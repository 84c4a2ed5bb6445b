//! # deferdraw List
//!
//! Deferred display list for 2D rendering. Drawing operations are recorded
//! into batches instead of being drawn immediately; independent draws of the
//! same kind are pulled together, compatible ones are fused into a single
//! renderer submission, and the whole list is replayed in one pass with the
//! renderer's save stack left exactly as it was found.
//!
//! Save, save-layer, clip and restore operations act as barriers: nothing
//! recorded after one of them joins a batch recorded before it.
//!
//! ```ignore
//! let mut list = DeferredDisplayList::new();
//! {
//!     let mut canvas = DeferredCanvas::new(&mut renderer, &mut list);
//!     canvas.draw(DrawOp::bitmap(texture, dst));
//! }
//! list.flush(&mut renderer, &mut dirty)?;
//! ```

pub mod batch;
pub mod config;
pub mod list;
pub mod session;

pub use batch::{BatchKind, BatchSummary, OpSummary};
pub use config::DeferConfig;
pub use list::{DeferredDisplayList, FLUSH_SAVE_STACK_DEPTH};
pub use session::DeferredCanvas;
