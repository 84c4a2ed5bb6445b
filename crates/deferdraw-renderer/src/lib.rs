//! # deferdraw Renderer
//!
//! The immediate-mode renderer interface that deferred display lists record
//! against and replay into, plus [`RecordingRenderer`], an in-memory
//! implementation that tracks the canvas save/clip/matrix stack and logs every
//! call as a serializable [`RenderCommand`].

pub mod canvas;
pub mod recording;
pub mod renderer;

pub use canvas::{Canvas, Snapshot};
pub use recording::{RecordingRenderer, RenderCommand};
pub use renderer::{DrawStatus, RenderError, Renderer};
