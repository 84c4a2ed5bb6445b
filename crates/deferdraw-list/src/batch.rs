use serde::{Deserialize, Serialize};

use deferdraw_core::geometry::{BBox, Point};
use deferdraw_core::op::{BatchId, DrawOp, MergeId};
use deferdraw_core::spatial::BoundsIndex;
use deferdraw_core::state::StateOp;
use deferdraw_renderer::{DrawStatus, RenderError, Renderer};

pub const DEBUG_COLOR_BARRIER: u32 = 0x1f00_0000;
pub const DEBUG_COLOR_MERGED_BATCH: u32 = 0x5f7f_7fff;

/// Largest alpha difference still treated as equal when merging.
const ALPHA_EPSILON: f32 = 0.001;

/// Screen space covered by a debug barrier marker.
const DEBUG_BARRIER_BOUNDS: BBox = BBox {
    min: Point { x: 0.0, y: 0.0 },
    max: Point {
        x: 10000.0,
        y: 10000.0,
    },
};

/// Outline color for ops of a batch id: one channel per id bit.
fn batch_debug_color(batch_id: BatchId) -> u32 {
    let id = batch_id.index();
    let mut color = 0x1f00_0000;
    if id & 0x1 != 0 {
        color |= 0x0000_00ff;
    }
    if id & 0x2 != 0 {
        color |= 0x0000_ff00;
    }
    if id & 0x4 != 0 {
        color |= 0x00ff_0000;
    }
    color
}

/// Draw ops that replay as a unit, in insertion order.
#[derive(Debug)]
pub struct DrawBatch {
    batch_id: BatchId,
    merge_id: Option<MergeId>,
    ops: Vec<DrawOp>,
    /// Union of all op bounds.
    bounds: BBox,
    footprints: BoundsIndex,
}

impl DrawBatch {
    pub fn new(batch_id: BatchId, merge_id: Option<MergeId>) -> Self {
        Self {
            batch_id,
            merge_id,
            ops: Vec::new(),
            bounds: BBox::empty(),
            footprints: BoundsIndex::new(),
        }
    }

    pub fn add(&mut self, op: DrawOp) {
        // Empty bounds are skipped: the list never merges across such ops.
        self.bounds.union_with(&op.state.bounds);
        self.footprints.insert(self.ops.len(), op.state.bounds);
        self.ops.push(op);
    }

    /// Whether any op in the batch overlaps `rect`.
    pub fn intersects(&self, rect: &BBox) -> bool {
        if !rect.intersects(&self.bounds) {
            return false;
        }
        match self.footprints.first_overlapping(rect) {
            Some(entry) => {
                log::trace!(
                    "op intersects with {} with bounds {:?}",
                    self.ops[entry.op_index].name(),
                    entry.bbox
                );
                true
            }
            None => false,
        }
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    pub fn merge_id(&self) -> Option<MergeId> {
        self.merge_id
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn count(&self) -> usize {
        self.ops.len()
    }

    pub fn bounds(&self) -> BBox {
        self.bounds
    }

    pub fn replay<R: Renderer + ?Sized>(
        &self,
        renderer: &mut R,
        dirty: &mut BBox,
        index: usize,
        debug: bool,
    ) -> Result<DrawStatus, RenderError> {
        log::trace!(
            "{} replaying DrawBatch with {} ops (batch id {:?}, merge id {:?})",
            index,
            self.ops.len(),
            self.batch_id,
            self.merge_id
        );

        let mut status = DrawStatus::DONE;
        for op in &self.ops {
            renderer.restore_display_state(&op.state);
            status |= renderer.draw(op, dirty)?;

            if debug {
                let color = batch_debug_color(self.batch_id);
                status |= renderer.draw_screen_space_color_rect(&op.state.bounds, color)?;
            }
        }
        Ok(status)
    }
}

/// A draw batch whose ops share batch id and merge identity and may be
/// submitted to the renderer as one fused draw.
#[derive(Debug)]
pub struct MergingDrawBatch {
    inner: DrawBatch,
}

impl MergingDrawBatch {
    pub fn new(batch_id: BatchId, merge_id: MergeId) -> Self {
        Self {
            inner: DrawBatch::new(batch_id, Some(merge_id)),
        }
    }

    /// Checks if a (mergeable) op can be merged into this batch.
    ///
    /// A fused draw only sees the first op's paint state, so every attribute
    /// that the fused submission cannot vary per op has to match exactly.
    pub fn can_merge_with(&self, op: &DrawOp) -> bool {
        if !op.state.matrix.is_pure_translate() {
            return false;
        }
        let Some(first) = self.inner.ops.first() else {
            return true;
        };

        let lhs = &op.state;
        let rhs = &first.state;

        // Overlap inside a fused draw is only safe for text without shadow.
        if !self.inner.batch_id.is_text() || lhs.modifiers.has_shadow {
            if self.inner.intersects(&lhs.bounds) {
                return false;
            }
        }

        if (lhs.alpha - rhs.alpha).abs() > ALPHA_EPSILON {
            return false;
        }

        // Equal paints imply equal modifiers and paint attributes.
        if op.paint == first.paint {
            return true;
        }

        if op.paint.alpha() != first.paint.alpha() {
            return false;
        }

        // Shadows are drawn per op before the fused draw, and layer alpha
        // overrides only apply to layers, which never merge.
        let lhs_mod = &lhs.modifiers;
        let rhs_mod = &rhs.modifiers;
        lhs_mod.shader == rhs_mod.shader
            && lhs_mod.color_filter == rhs_mod.color_filter
            && lhs_mod.has_draw_filter == rhs_mod.has_draw_filter
            && lhs_mod.paint_filter_clear_bits == rhs_mod.paint_filter_clear_bits
            && lhs_mod.paint_filter_set_bits == rhs_mod.paint_filter_set_bits
    }

    pub fn add(&mut self, op: DrawOp) {
        self.inner.add(op);
    }

    pub fn inner(&self) -> &DrawBatch {
        &self.inner
    }

    pub fn replay<R: Renderer + ?Sized>(
        &self,
        renderer: &mut R,
        dirty: &mut BBox,
        index: usize,
        debug: bool,
    ) -> Result<DrawStatus, RenderError> {
        let Some(first) = self.inner.ops.first() else {
            return Ok(DrawStatus::DONE);
        };
        if self.inner.ops.len() == 1 {
            return self.inner.replay(renderer, dirty, index, debug);
        }

        log::trace!(
            "{} replaying MergingDrawBatch with {} ops (batch id {:?}, merge id {:?})",
            index,
            self.inner.ops.len(),
            self.inner.batch_id,
            self.inner.merge_id
        );
        renderer.restore_display_state(&first.state);
        let mut status = renderer.multi_draw(&self.inner.ops, &self.inner.bounds, dirty)?;

        if debug {
            status |= renderer
                .draw_screen_space_color_rect(&self.inner.bounds, DEBUG_COLOR_MERGED_BATCH)?;
        }
        Ok(status)
    }
}

/// Single save, save-layer or clip op acting as a reorder barrier.
#[derive(Debug)]
pub struct StateOpBatch {
    op: StateOp,
}

impl StateOpBatch {
    pub fn new(op: StateOp) -> Self {
        Self { op }
    }

    pub fn op(&self) -> &StateOp {
        &self.op
    }

    pub fn replay<R: Renderer + ?Sized>(&self, renderer: &mut R) -> DrawStatus {
        log::trace!("replaying state op batch {}", self.op.name());
        renderer.restore_display_state(&self.op.state);
        renderer.apply_state(&self.op);
        DrawStatus::DONE
    }
}

/// Unwinds the renderer to a flush-time save count.
#[derive(Debug)]
pub struct RestoreToCountBatch {
    /// Only the op's display state is used; its own count is a record-time value.
    op: StateOp,
    /// Target count for a flush that starts at save count 1.
    restore_count: i32,
}

impl RestoreToCountBatch {
    pub fn new(op: StateOp, restore_count: i32) -> Self {
        Self { op, restore_count }
    }

    pub fn restore_count(&self) -> i32 {
        self.restore_count
    }

    /// `base_save_count` is the renderer's save count when the flush began.
    pub fn replay<R: Renderer + ?Sized>(
        &self,
        renderer: &mut R,
        base_save_count: i32,
    ) -> DrawStatus {
        let target = self.restore_count + base_save_count - 1;
        log::trace!("batch restoring to count {}", target);
        renderer.restore_display_state(&self.op.state);
        renderer.restore_to_count(target);
        DrawStatus::DONE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchKind {
    Draw,
    Merging,
    State,
    RestoreToCount,
    DebugBarrier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpSummary {
    pub name: String,
    pub bounds: BBox,
}

/// Read-only description of a recorded batch, for inspection and dumps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub kind: BatchKind,
    pub batch_id: Option<BatchId>,
    pub merge_id: Option<MergeId>,
    pub ops: Vec<OpSummary>,
    pub restore_count: Option<i32>,
}

/// An entry in the deferred display list.
#[derive(Debug)]
pub enum Batch {
    Draw(DrawBatch),
    Merging(MergingDrawBatch),
    State(StateOpBatch),
    RestoreToCount(RestoreToCountBatch),
    DebugBarrier,
}

impl Batch {
    pub fn kind(&self) -> BatchKind {
        match self {
            Batch::Draw(_) => BatchKind::Draw,
            Batch::Merging(_) => BatchKind::Merging,
            Batch::State(_) => BatchKind::State,
            Batch::RestoreToCount(_) => BatchKind::RestoreToCount,
            Batch::DebugBarrier => BatchKind::DebugBarrier,
        }
    }

    pub fn as_draw(&self) -> Option<&DrawBatch> {
        match self {
            Batch::Draw(batch) => Some(batch),
            Batch::Merging(batch) => Some(&batch.inner),
            _ => None,
        }
    }

    pub fn as_merging(&self) -> Option<&MergingDrawBatch> {
        match self {
            Batch::Merging(batch) => Some(batch),
            _ => None,
        }
    }

    /// Append to a draw batch. Returns false for barrier batches.
    pub fn add_op(&mut self, op: DrawOp) -> bool {
        match self {
            Batch::Draw(batch) => batch.add(op),
            Batch::Merging(batch) => batch.add(op),
            _ => return false,
        }
        true
    }

    pub fn replay<R: Renderer + ?Sized>(
        &self,
        renderer: &mut R,
        dirty: &mut BBox,
        index: usize,
        debug: bool,
        base_save_count: i32,
    ) -> Result<DrawStatus, RenderError> {
        match self {
            Batch::Draw(batch) => batch.replay(renderer, dirty, index, debug),
            Batch::Merging(batch) => batch.replay(renderer, dirty, index, debug),
            Batch::State(batch) => Ok(batch.replay(renderer)),
            Batch::RestoreToCount(batch) => Ok(batch.replay(renderer, base_save_count)),
            Batch::DebugBarrier => {
                renderer.draw_screen_space_color_rect(&DEBUG_BARRIER_BOUNDS, DEBUG_COLOR_BARRIER)
            }
        }
    }

    pub fn summary(&self) -> BatchSummary {
        let ops = match self {
            Batch::State(batch) => vec![OpSummary {
                name: batch.op().name().to_string(),
                bounds: batch.op().state.bounds,
            }],
            Batch::RestoreToCount(batch) => vec![OpSummary {
                name: batch.op.name().to_string(),
                bounds: batch.op.state.bounds,
            }],
            _ => self
                .as_draw()
                .map(|batch| {
                    batch
                        .ops()
                        .iter()
                        .map(|op| OpSummary {
                            name: op.name().to_string(),
                            bounds: op.state.bounds,
                        })
                        .collect()
                })
                .unwrap_or_default(),
        };
        BatchSummary {
            kind: self.kind(),
            batch_id: self.as_draw().map(DrawBatch::batch_id),
            merge_id: self.as_draw().and_then(DrawBatch::merge_id),
            ops,
            restore_count: match self {
                Batch::RestoreToCount(batch) => Some(batch.restore_count()),
                _ => None,
            },
        }
    }
}
