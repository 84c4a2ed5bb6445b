use deferdraw_core::geometry::{BBox, Matrix};
use deferdraw_core::op::DrawOp;
use deferdraw_core::state::{ClipOp, SaveFlags, StateOp};
use deferdraw_renderer::Renderer;

use crate::list::DeferredDisplayList;

/// Canvas-style front end that keeps a renderer's save/clip/matrix stack
/// current while routing every operation into a [`DeferredDisplayList`].
///
/// Draws are only recorded; nothing reaches the renderer's draw calls until
/// the list is flushed.
pub struct DeferredCanvas<'a, R: Renderer + ?Sized> {
    renderer: &'a mut R,
    list: &'a mut DeferredDisplayList,
}

impl<'a, R: Renderer + ?Sized> DeferredCanvas<'a, R> {
    pub fn new(renderer: &'a mut R, list: &'a mut DeferredDisplayList) -> Self {
        Self { renderer, list }
    }

    pub fn renderer(&self) -> &R {
        &*self.renderer
    }

    pub fn list(&self) -> &DeferredDisplayList {
        &*self.list
    }

    pub fn save_count(&self) -> i32 {
        self.renderer.save_count()
    }

    /// Returns the count to pass to [`restore_to_count`](Self::restore_to_count) to undo the save.
    pub fn save(&mut self, flags: SaveFlags) -> i32 {
        let count = self.renderer.save(flags);
        self.list
            .add_save(&mut *self.renderer, StateOp::save(flags), count);
        count
    }

    pub fn save_layer(&mut self, bounds: BBox, alpha: u8, flags: SaveFlags) -> i32 {
        let count = self.renderer.save_count();
        self.list.add_save_layer(
            &mut *self.renderer,
            StateOp::save_layer(bounds, alpha, flags),
            count,
        );
        self.renderer.save_layer(&bounds, alpha, flags);
        count
    }

    pub fn restore(&mut self) {
        let count = self.renderer.save_count() - 1;
        self.restore_to_count(count);
    }

    pub fn restore_to_count(&mut self, count: i32) {
        // Recorded first so the barrier captures the state being unwound.
        self.list.add_restore_to_count(
            &mut *self.renderer,
            StateOp::restore_to_count(count),
            count,
        );
        self.renderer.restore_to_count(count);
    }

    /// Returns false when the clip leaves nothing visible.
    pub fn clip(&mut self, clip: ClipOp) -> bool {
        self.list.add_clip(&mut *self.renderer, clip.clone());
        self.renderer.clip(&clip)
    }

    pub fn concat(&mut self, matrix: &Matrix) {
        self.renderer.concat(matrix);
    }

    pub fn translate(&mut self, dx: f64, dy: f64) {
        self.renderer.concat(&Matrix::translate(dx, dy));
    }

    pub fn draw(&mut self, op: DrawOp) {
        self.list.add_draw_op(&mut *self.renderer, op);
    }
}
