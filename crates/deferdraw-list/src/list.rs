use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use deferdraw_core::geometry::BBox;
use deferdraw_core::op::{BatchId, DrawOp, MergeId};
use deferdraw_core::state::{ClipOp, DeferFlags, SaveFlags, StateOp};
use deferdraw_renderer::{DrawStatus, RenderError, Renderer};

use crate::batch::{
    Batch, BatchSummary, DrawBatch, MergingDrawBatch, RestoreToCountBatch, StateOpBatch,
};
use crate::config::DeferConfig;

/// Depth of the renderer save stack when batch playback starts from a
/// renderer at save count 1: the base snapshot plus the save issued by
/// `flush`. Deeper renderers shift every restore target by the difference.
pub const FLUSH_SAVE_STACK_DEPTH: i32 = 2;

/// Index into the batch arena. Stable until the list is cleared.
type BatchHandle = usize;

/// Buffers drawing operations into batches, reorders and merges independent
/// draws, and replays everything to a [`Renderer`] in one pass.
///
/// A list is single-use: record, then [`flush`](Self::flush) once, which
/// clears it. Batches recorded before a barrier (save, save-layer, clip or
/// restore) are closed to ops recorded after it.
#[derive(Debug)]
pub struct DeferredDisplayList {
    id: Uuid,
    config: DeferConfig,
    /// Defer-time save counts of deferred save/saveLayer ops, so that a later
    /// restoreToCount can be recorded as a RestoreToCountBatch.
    save_stack: Vec<i32>,
    /// Save count below which the open complex clip was established.
    complex_clip_stack_start: Option<i32>,
    batches: Vec<Batch>,
    /// Replay order.
    order: Vec<BatchHandle>,
    /// Most recent *non-merging* batch of each batch id.
    batch_lookup: [Option<BatchHandle>; BatchId::COUNT],
    /// Position in `order` just after the most recent barrier.
    earliest_batch_index: usize,
    /// Most recent merging batch for each merge id, per batch id.
    merging_batches: [HashMap<MergeId, BatchHandle>; BatchId::COUNT],
}

#[derive(Serialize)]
struct ListDump<'a> {
    id: Uuid,
    config: &'a DeferConfig,
    earliest_batch_index: usize,
    save_stack: &'a [i32],
    complex_clip_stack_start: Option<i32>,
    batches: Vec<BatchSummary>,
}

impl DeferredDisplayList {
    pub fn new() -> Self {
        Self::with_config(DeferConfig::default())
    }

    pub fn with_config(config: DeferConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            save_stack: Vec::new(),
            complex_clip_stack_start: None,
            batches: Vec::new(),
            order: Vec::new(),
            batch_lookup: [None; BatchId::COUNT],
            earliest_batch_index: 0,
            merging_batches: std::array::from_fn(|_| HashMap::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &DeferConfig {
        &self.config
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn batch_count(&self) -> usize {
        self.order.len()
    }

    pub fn save_stack(&self) -> &[i32] {
        &self.save_stack
    }

    pub fn recording_complex_clip(&self) -> bool {
        self.complex_clip_stack_start.is_some()
    }

    /// Batches in replay order.
    pub fn batch_summaries(&self) -> Vec<BatchSummary> {
        self.order
            .iter()
            .map(|&handle| self.batches[handle].summary())
            .collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&ListDump {
            id: self.id,
            config: &self.config,
            earliest_batch_index: self.earliest_batch_index,
            save_stack: &self.save_stack,
            complex_clip_stack_start: self.complex_clip_stack_start,
            batches: self.batch_summaries(),
        })
    }

    /// Drop every recorded batch and reset all batching state.
    pub fn clear(&mut self) {
        self.batches.clear();
        self.order.clear();
        self.batch_lookup = [None; BatchId::COUNT];
        for table in &mut self.merging_batches {
            table.clear();
        }
        self.save_stack.clear();
        self.complex_clip_stack_start = None;
        self.earliest_batch_index = 0;
    }

    // ── Operation adding ─────────────────────────────────────────────

    fn state_op_defer_flags(&self) -> DeferFlags {
        // Only a rectangular clip can be trusted as deferred state.
        if self.recording_complex_clip() {
            DeferFlags::NONE
        } else {
            DeferFlags::CLIP
        }
    }

    fn draw_op_defer_flags(&self) -> DeferFlags {
        DeferFlags::DRAW | self.state_op_defer_flags()
    }

    /// Record a clip as a barrier. A clip that can leave a non-rectangular
    /// clip behind opens a complex clip region, during which draws neither
    /// merge nor capture the clip; the region closes when a restore unwinds
    /// below the save count it was opened at.
    pub fn add_clip<R: Renderer + ?Sized>(&mut self, renderer: &mut R, clip: ClipOp) {
        let complex = self.recording_complex_clip()
            || clip.can_cause_complex_clip()
            || !renderer.has_rect_to_rect_transform();

        // The barrier is stored before the region opens so the previous clip is captured.
        self.store_state_op_barrier(renderer, StateOp::clip(clip));

        if complex && !self.recording_complex_clip() {
            let start = renderer.save_count() - 1;
            log::debug!("{} starting complex clip region, start is {}", self.id, start);
            self.complex_clip_stack_start = Some(start);
        }
    }

    /// Record a save. `new_save_count` is the count returned by the
    /// renderer's `save`, i.e. the count to restore to in order to undo it.
    pub fn add_save<R: Renderer + ?Sized>(
        &mut self,
        renderer: &mut R,
        op: StateOp,
        new_save_count: i32,
    ) {
        self.defer_save(renderer, op, new_save_count);
    }

    /// Record a save-layer. Layers are never pulled out of order: the layer
    /// and its contents replay between the barriers of the saveLayer and its
    /// matching restore.
    pub fn add_save_layer<R: Renderer + ?Sized>(
        &mut self,
        renderer: &mut R,
        op: StateOp,
        new_save_count: i32,
    ) {
        self.defer_save(renderer, op, new_save_count);
    }

    fn defer_save<R: Renderer + ?Sized>(
        &mut self,
        renderer: &mut R,
        op: StateOp,
        new_save_count: i32,
    ) {
        log::debug!(
            "{} adding {}, new count {}",
            self.id,
            op.name(),
            new_save_count
        );
        debug_assert!(
            self.save_stack
                .last()
                .map_or(true, |&top| top < new_save_count),
            "deferred save counts must strictly increase"
        );

        self.store_state_op_barrier(renderer, op);
        self.save_stack.push(new_save_count);
    }

    /// Record a restore to `new_save_count`. Deferred saves at or above that
    /// count are unwound by a single barrier targeting the flush-time count.
    pub fn add_restore_to_count<R: Renderer + ?Sized>(
        &mut self,
        renderer: &mut R,
        op: StateOp,
        new_save_count: i32,
    ) {
        log::debug!("{} addRestoreToCount {}", self.id, new_save_count);

        if let Some(start) = self.complex_clip_stack_start {
            if new_save_count <= start {
                log::debug!("{} closing complex clip region started at {}", self.id, start);
                self.complex_clip_stack_start = None;
                self.reset_batching_state();
            }
        }

        match self.save_stack.last() {
            Some(&top) if new_save_count <= top => {}
            // No deferred save to undo.
            _ => return,
        }

        while self
            .save_stack
            .last()
            .is_some_and(|&top| top >= new_save_count)
        {
            self.save_stack.pop();
        }

        let restore_count = self.save_stack.len() as i32 + FLUSH_SAVE_STACK_DEPTH;
        self.store_restore_to_count_barrier(renderer, op, restore_count);
    }

    /// Add a draw op, reordering it toward a compatible batch where no
    /// overlapping draw recorded in between forbids it.
    pub fn add_draw_op<R: Renderer + ?Sized>(&mut self, renderer: &mut R, mut op: DrawOp) {
        if renderer.store_display_state(&mut op.state, self.draw_op_defer_flags()) {
            log::trace!("{} quick rejected {}", self.id, op.name());
            return;
        }

        let info = op.defer_info();
        let batch_id = info.batch_id;

        // Complex clips expect renderer state that a fused draw cannot honor.
        let merge_id = info
            .merge_id
            .filter(|_| info.mergeable && !self.recording_complex_clip());

        if self.config.draw_reorder_disabled || batch_id == BatchId::None || !op.allow_reorder {
            let pinned = !op.allow_reorder;
            let mut batch = DrawBatch::new(batch_id, info.merge_id);
            batch.add(op);
            self.push_batch(Batch::Draw(batch));
            if pinned {
                self.reset_batching_state();
            }
            return;
        }

        let mut target: Option<BatchHandle> = None;
        // Insertion point of a new batch: right after the last batch of the same id.
        let mut insert_index = self.order.len();

        if !self.order.is_empty() {
            if op.state.bounds.is_empty() {
                // Unknown bounds: draw in place and start from scratch on the next op.
                log::debug!(
                    "{} encountered {} with empty bounds, resetting batches",
                    self.id,
                    op.name()
                );
                let mut batch = DrawBatch::new(batch_id, info.merge_id);
                batch.add(op);
                self.push_batch(Batch::Draw(batch));
                self.reset_batching_state();
                return;
            }

            target = match merge_id {
                Some(merge_id) => self.merging_batches[batch_id.index()]
                    .get(&merge_id)
                    .copied()
                    .filter(|&handle| {
                        self.batches[handle]
                            .as_merging()
                            .is_some_and(|batch| batch.can_merge_with(&op))
                    }),
                None => self.batch_lookup[batch_id.index()],
            };

            if target.is_some() || merge_id.is_some() {
                // Walk back toward the target looking for anything drawn since that
                // overlaps the op. Without a target, merging ops still walk to find
                // a similar batch to insert after.
                for i in (self.earliest_batch_index..self.order.len()).rev() {
                    let handle = self.order[i];
                    if Some(handle) == target {
                        break;
                    }

                    // Barriers never sit past the earliest index; stop conservatively if one does.
                    let Some(over) = self.batches[handle].as_draw() else {
                        target = None;
                        break;
                    };

                    if over.batch_id() == batch_id {
                        insert_index = i + 1;
                        if target.is_none() {
                            break;
                        }
                    }

                    if over.intersects(&op.state.bounds) {
                        log::trace!(
                            "{} {} couldn't join its batch, intersected by batch at {}",
                            self.id,
                            op.name(),
                            i
                        );
                        target = None;
                        break;
                    }
                }
            }
        }

        let handle = match target {
            Some(handle) => handle,
            None => {
                let handle = match merge_id {
                    Some(merge_id) => {
                        let batch = MergingDrawBatch::new(batch_id, merge_id);
                        let handle = self.insert_batch(insert_index, Batch::Merging(batch));
                        self.merging_batches[batch_id.index()].insert(merge_id, handle);
                        handle
                    }
                    None => {
                        let batch = DrawBatch::new(batch_id, info.merge_id);
                        let handle = self.insert_batch(insert_index, Batch::Draw(batch));
                        self.batch_lookup[batch_id.index()] = Some(handle);
                        handle
                    }
                };
                log::trace!(
                    "{} creating batch {:?} at {} for {}",
                    self.id,
                    batch_id,
                    insert_index,
                    op.name()
                );
                handle
            }
        };

        let added = self.batches[handle].add_op(op);
        debug_assert!(added, "draw op routed to a barrier batch");
    }

    fn push_batch(&mut self, batch: Batch) -> BatchHandle {
        let index = self.order.len();
        self.insert_batch(index, batch)
    }

    fn insert_batch(&mut self, index: usize, batch: Batch) -> BatchHandle {
        let handle = self.batches.len();
        self.batches.push(batch);
        self.order.insert(index, handle);
        handle
    }

    /// Creates a barrier in the operation stream: no op added from now on will
    /// join a batch that already exists.
    fn reset_batching_state(&mut self) {
        self.batch_lookup = [None; BatchId::COUNT];
        for table in &mut self.merging_batches {
            table.clear();
        }
        if self.config.debug_merge_behavior && !self.order.is_empty() {
            self.push_batch(Batch::DebugBarrier);
        }
        self.earliest_batch_index = self.order.len();
    }

    fn store_state_op_barrier<R: Renderer + ?Sized>(&mut self, renderer: &mut R, mut op: StateOp) {
        log::debug!(
            "{} adding state op barrier {} at pos {}",
            self.id,
            op.name(),
            self.order.len()
        );

        renderer.store_display_state(&mut op.state, self.state_op_defer_flags());
        self.push_batch(Batch::State(StateOpBatch::new(op)));
        self.reset_batching_state();
    }

    fn store_restore_to_count_barrier<R: Renderer + ?Sized>(
        &mut self,
        renderer: &mut R,
        mut op: StateOp,
        restore_count: i32,
    ) {
        log::debug!(
            "{} adding restore to count {} barrier, pos {}",
            self.id,
            restore_count,
            self.order.len()
        );

        // The restore may close a saveLayer without the clip flag, so its own state is kept.
        renderer.store_display_state(&mut op.state, self.state_op_defer_flags());
        self.push_batch(Batch::RestoreToCount(RestoreToCountBatch::new(op, restore_count)));
        self.reset_batching_state();
    }

    // ── Replay / flush ───────────────────────────────────────────────

    /// Play back every recorded batch to the renderer, then clear the list.
    ///
    /// Playback runs on top of the renderer's save count at the time of the
    /// call; the renderer is unwound back to that count afterwards and its
    /// draw modifiers are restored, so reordering never leaks state. The
    /// first renderer error stops playback and is returned as is; batches
    /// replayed before it stay applied.
    pub fn flush<R: Renderer + ?Sized>(
        &mut self,
        renderer: &mut R,
        dirty: &mut BBox,
    ) -> Result<DrawStatus, RenderError> {
        if self.is_empty() {
            return Ok(DrawStatus::DONE);
        }

        let base_save_count = renderer.save_count();
        log::debug!(
            "{} flushing {} batches at save count {}",
            self.id,
            self.order.len(),
            base_save_count
        );
        renderer.event_mark("Flush");

        let restore_modifiers = renderer.draw_modifiers();
        renderer.save(SaveFlags::MATRIX_CLIP);

        let result = self.replay_batches(renderer, dirty, base_save_count);

        renderer.restore_to_count(base_save_count);
        renderer.set_draw_modifiers(restore_modifiers);

        match &result {
            Ok(status) => log::debug!(
                "{} flush complete, returning {:#x}",
                self.id,
                status.bits()
            ),
            Err(err) => log::warn!("{} flush aborted: {}", self.id, err),
        }
        self.clear();
        result
    }

    fn replay_batches<R: Renderer + ?Sized>(
        &self,
        renderer: &mut R,
        dirty: &mut BBox,
        base_save_count: i32,
    ) -> Result<DrawStatus, RenderError> {
        let debug = self.config.debug_merge_behavior;
        let mut status = DrawStatus::DONE;
        for (index, &handle) in self.order.iter().enumerate() {
            status |=
                self.batches[handle].replay(renderer, dirty, index, debug, base_save_count)?;
        }
        log::debug!("{} flushed, drew {} batches", self.id, self.order.len());
        Ok(status)
    }
}

impl Default for DeferredDisplayList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchKind, DEBUG_COLOR_BARRIER};
    use crate::session::DeferredCanvas;
    use deferdraw_core::op::{FontId, Paint, TextureId};
    use deferdraw_core::state::{DrawModifiers, RegionOp};
    use deferdraw_core::Point;
    use deferdraw_renderer::{RecordingRenderer, RenderCommand};

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn setup() -> (RecordingRenderer, DeferredDisplayList) {
        init_logging();
        (RecordingRenderer::new(200.0, 200.0), DeferredDisplayList::new())
    }

    fn bitmap(texture: u32, left: f64) -> DrawOp {
        DrawOp::bitmap(
            TextureId(texture),
            BBox::from_ltrb(left, 0.0, left + 10.0, 10.0),
        )
    }

    fn rect(left: f64, right: f64) -> DrawOp {
        DrawOp::rect(BBox::from_ltrb(left, 0.0, right, 10.0), Paint::default())
    }

    fn kinds(list: &DeferredDisplayList) -> Vec<BatchKind> {
        list.batch_summaries().iter().map(|s| s.kind).collect()
    }

    /// Left edge of every op, per batch, in replay order.
    fn layout(list: &DeferredDisplayList) -> Vec<Vec<f64>> {
        list.batch_summaries()
            .iter()
            .map(|s| s.ops.iter().map(|op| op.bounds.min.x).collect())
            .collect()
    }

    fn drawn_lefts(renderer: &RecordingRenderer) -> Vec<f64> {
        renderer
            .commands()
            .iter()
            .filter_map(|cmd| match cmd {
                RenderCommand::Draw { bounds, .. } => Some(bounds.min.x),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_empty_flush_is_a_no_op() {
        let (mut renderer, mut list) = setup();
        assert!(list.is_empty());

        let mut dirty = BBox::empty();
        let status = list.flush(&mut renderer, &mut dirty).unwrap();
        assert_eq!(status, DrawStatus::DONE);
        assert!(dirty.is_empty());
        assert!(renderer.commands().is_empty());
    }

    #[test]
    fn test_same_merge_id_ops_share_a_batch_in_order() {
        let (mut renderer, mut list) = setup();
        for left in [0.0, 20.0, 40.0] {
            list.add_draw_op(&mut renderer, bitmap(1, left));
        }

        assert_eq!(kinds(&list), vec![BatchKind::Merging]);
        assert_eq!(layout(&list), vec![vec![0.0, 20.0, 40.0]]);

        let mut dirty = BBox::empty();
        let status = list.flush(&mut renderer, &mut dirty).unwrap();
        assert!(status.drew());
        assert_eq!(renderer.draw_log(), vec!["DrawBitmap x3"]);
        assert_eq!(dirty, BBox::from_ltrb(0.0, 0.0, 50.0, 10.0));
        assert!(list.is_empty());
    }

    #[test]
    fn test_barrier_prevents_merging() {
        let (mut renderer, mut list) = setup();
        {
            let mut canvas = DeferredCanvas::new(&mut renderer, &mut list);
            canvas.draw(bitmap(1, 0.0));
            canvas.save(SaveFlags::MATRIX_CLIP);
            canvas.draw(bitmap(1, 20.0));
        }

        assert_eq!(
            kinds(&list),
            vec![BatchKind::Merging, BatchKind::State, BatchKind::Merging]
        );
        assert_eq!(layout(&list), vec![vec![0.0], vec![0.0], vec![20.0]]);
    }

    #[test]
    fn test_clip_barrier_prevents_merging() {
        let (mut renderer, mut list) = setup();
        {
            let mut canvas = DeferredCanvas::new(&mut renderer, &mut list);
            canvas.draw(bitmap(1, 0.0));
            canvas.clip(ClipOp::rect(
                BBox::from_ltrb(0.0, 0.0, 150.0, 150.0),
                RegionOp::Intersect,
            ));
            canvas.draw(bitmap(1, 20.0));
        }
        assert_eq!(list.batch_count(), 3);
        assert!(!list.recording_complex_clip());
    }

    #[test]
    fn test_save_draw_restore_unwinds_exactly() {
        let (mut renderer, mut list) = setup();
        let depth_before = renderer.save_count();
        {
            let mut canvas = DeferredCanvas::new(&mut renderer, &mut list);
            let count = canvas.save(SaveFlags::MATRIX_CLIP);
            canvas.draw(rect(0.0, 10.0));
            canvas.restore_to_count(count);
        }

        let summaries = list.batch_summaries();
        assert_eq!(
            kinds(&list),
            vec![BatchKind::State, BatchKind::Draw, BatchKind::RestoreToCount]
        );
        assert_eq!(summaries[2].restore_count, Some(FLUSH_SAVE_STACK_DEPTH));
        assert!(list.save_stack().is_empty());

        renderer.take_commands();
        let mut dirty = BBox::empty();
        list.flush(&mut renderer, &mut dirty).unwrap();

        assert_eq!(
            renderer.commands(),
            &[
                RenderCommand::EventMark {
                    name: "Flush".to_string()
                },
                RenderCommand::Save {
                    count: 2,
                    flags: SaveFlags::MATRIX_CLIP.bits()
                },
                RenderCommand::Save {
                    count: 3,
                    flags: SaveFlags::MATRIX_CLIP.bits()
                },
                RenderCommand::Draw {
                    op: "DrawRect".to_string(),
                    bounds: BBox::from_ltrb(0.0, 0.0, 10.0, 10.0)
                },
                RenderCommand::RestoreToCount { from: 3, to: 2 },
                RenderCommand::RestoreToCount { from: 2, to: 1 },
            ]
        );
        assert_eq!(renderer.save_count(), depth_before);
    }

    #[test]
    fn test_flush_keeps_outer_saves_of_the_renderer() {
        let (mut renderer, mut list) = setup();
        renderer.save(SaveFlags::MATRIX_CLIP);
        let depth_before = renderer.save_count();
        assert_eq!(depth_before, 2);
        {
            let mut canvas = DeferredCanvas::new(&mut renderer, &mut list);
            let count = canvas.save(SaveFlags::MATRIX_CLIP);
            canvas.draw(rect(0.0, 10.0));
            canvas.restore_to_count(count);
        }

        renderer.take_commands();
        let mut dirty = BBox::empty();
        list.flush(&mut renderer, &mut dirty).unwrap();

        assert_eq!(renderer.save_count(), depth_before);
        let unwinds: Vec<&RenderCommand> = renderer
            .commands()
            .iter()
            .filter(|cmd| matches!(cmd, RenderCommand::RestoreToCount { .. }))
            .collect();
        assert_eq!(
            unwinds,
            vec![
                &RenderCommand::RestoreToCount { from: 4, to: 3 },
                &RenderCommand::RestoreToCount { from: 3, to: 2 },
            ]
        );
        assert_eq!(renderer.draw_log(), vec!["DrawRect"]);
    }

    #[test]
    fn test_nested_restore_unwinds_to_flush_time_count() {
        let (mut renderer, mut list) = setup();
        {
            let mut canvas = DeferredCanvas::new(&mut renderer, &mut list);
            let outer = canvas.save(SaveFlags::MATRIX_CLIP);
            let inner = canvas.save(SaveFlags::MATRIX_CLIP);
            canvas.draw(rect(0.0, 10.0));
            canvas.restore_to_count(inner);
            canvas.draw(rect(20.0, 30.0));
            canvas.restore_to_count(outer);
        }

        let restores: Vec<i32> = list
            .batch_summaries()
            .iter()
            .filter_map(|s| s.restore_count)
            .collect();
        assert_eq!(restores, vec![3, 2]);

        let mut dirty = BBox::empty();
        list.flush(&mut renderer, &mut dirty).unwrap();
        assert_eq!(renderer.save_count(), 1);
    }

    #[test]
    fn test_restore_without_deferred_save_is_ignored() {
        let (mut renderer, mut list) = setup();
        list.add_restore_to_count(&mut renderer, StateOp::restore_to_count(1), 1);
        assert!(list.is_empty());
    }

    #[test]
    fn test_overlap_preserves_draw_order_across_merge_ids() {
        let (mut renderer, mut list) = setup();
        list.add_draw_op(&mut renderer, bitmap(1, 0.0));
        list.add_draw_op(&mut renderer, bitmap(2, 20.0));
        // Merge-compatible with the first op, but overlaps the second.
        list.add_draw_op(&mut renderer, bitmap(1, 25.0));

        assert_eq!(layout(&list), vec![vec![0.0], vec![20.0], vec![25.0]]);

        let mut dirty = BBox::empty();
        list.flush(&mut renderer, &mut dirty).unwrap();
        assert_eq!(drawn_lefts(&renderer), vec![0.0, 20.0, 25.0]);
    }

    #[test]
    fn test_merge_identity_reattaches_past_other_batch() {
        let (mut renderer, mut list) = setup();
        list.add_draw_op(&mut renderer, bitmap(1, 0.0));
        list.add_draw_op(&mut renderer, bitmap(2, 20.0));
        list.add_draw_op(&mut renderer, bitmap(1, 40.0));

        let summaries = list.batch_summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].merge_id, Some(MergeId(1)));
        assert_eq!(layout(&list), vec![vec![0.0, 40.0], vec![20.0]]);

        let mut dirty = BBox::empty();
        list.flush(&mut renderer, &mut dirty).unwrap();
        assert_eq!(renderer.draw_log(), vec!["DrawBitmap x2", "DrawBitmap"]);
    }

    #[test]
    fn test_new_merging_batch_lands_after_last_batch_of_its_id() {
        let (mut renderer, mut list) = setup();
        list.add_draw_op(&mut renderer, bitmap(1, 0.0));
        list.add_draw_op(&mut renderer, rect(100.0, 110.0));
        list.add_draw_op(&mut renderer, bitmap(2, 20.0));

        let summaries = list.batch_summaries();
        let ids: Vec<Option<BatchId>> = summaries.iter().map(|s| s.batch_id).collect();
        assert_eq!(
            ids,
            vec![
                Some(BatchId::Bitmap),
                Some(BatchId::Bitmap),
                Some(BatchId::Vertices)
            ]
        );
        assert_eq!(layout(&list), vec![vec![0.0], vec![20.0], vec![100.0]]);
    }

    #[test]
    fn test_plain_batch_extends_unless_overlapped() {
        let (mut renderer, mut list) = setup();
        list.add_draw_op(&mut renderer, rect(0.0, 10.0));
        list.add_draw_op(&mut renderer, bitmap(1, 50.0));
        // Does not touch the bitmap: joins the first rect batch.
        list.add_draw_op(&mut renderer, rect(100.0, 110.0));
        // Overlaps the bitmap: must draw after it.
        list.add_draw_op(&mut renderer, rect(55.0, 58.0));

        assert_eq!(
            layout(&list),
            vec![vec![0.0, 100.0], vec![50.0], vec![55.0]]
        );
        assert_eq!(
            kinds(&list),
            vec![BatchKind::Draw, BatchKind::Merging, BatchKind::Draw]
        );
    }

    #[test]
    fn test_paint_mismatch_starts_new_merging_batch() {
        let (mut renderer, mut list) = setup();
        list.add_draw_op(&mut renderer, bitmap(1, 0.0));
        list.add_draw_op(
            &mut renderer,
            bitmap(1, 20.0).with_paint(Paint::new(0x8000_0000)),
        );
        assert_eq!(
            kinds(&list),
            vec![BatchKind::Merging, BatchKind::Merging]
        );
    }

    #[test]
    fn test_overlapping_text_merges_unless_shadowed() {
        let (mut renderer, mut list) = setup();
        let run = |left: f64| {
            DrawOp::text(
                FontId(9),
                4,
                BBox::from_ltrb(left, 0.0, left + 30.0, 12.0),
                Paint::default(),
            )
        };
        list.add_draw_op(&mut renderer, run(0.0));
        list.add_draw_op(&mut renderer, run(10.0));
        assert_eq!(list.batch_count(), 1);

        renderer.set_draw_modifiers(DrawModifiers {
            has_shadow: true,
            ..DrawModifiers::default()
        });
        list.add_draw_op(&mut renderer, run(20.0));
        assert_eq!(list.batch_count(), 2);
    }

    #[test]
    fn test_clear_then_flush_matches_empty_flush() {
        let (mut renderer, mut list) = setup();
        {
            let mut canvas = DeferredCanvas::new(&mut renderer, &mut list);
            canvas.save(SaveFlags::MATRIX_CLIP);
            canvas.draw(bitmap(1, 0.0));
        }
        list.clear();
        assert!(list.is_empty());
        assert!(list.save_stack().is_empty());

        renderer.take_commands();
        let mut dirty = BBox::empty();
        assert_eq!(
            list.flush(&mut renderer, &mut dirty).unwrap(),
            DrawStatus::DONE
        );
        assert!(dirty.is_empty());
        assert!(renderer.commands().is_empty());
    }

    #[test]
    fn test_quick_rejected_op_is_dropped() {
        let (mut renderer, mut list) = setup();
        {
            let mut canvas = DeferredCanvas::new(&mut renderer, &mut list);
            canvas.clip(ClipOp::rect(
                BBox::from_ltrb(0.0, 0.0, 20.0, 20.0),
                RegionOp::Intersect,
            ));
            canvas.draw(bitmap(1, 100.0));
        }
        assert_eq!(kinds(&list), vec![BatchKind::State]);
    }

    #[test]
    fn test_empty_bounds_op_resets_batching() {
        let (mut renderer, mut list) = setup();
        list.add_draw_op(&mut renderer, bitmap(1, 0.0));
        list.add_draw_op(&mut renderer, DrawOp::rect(BBox::empty(), Paint::default()));
        list.add_draw_op(&mut renderer, bitmap(1, 40.0));

        assert_eq!(
            kinds(&list),
            vec![BatchKind::Merging, BatchKind::Draw, BatchKind::Merging]
        );
    }

    #[test]
    fn test_complex_clip_disables_merging_until_restored() {
        let (mut renderer, mut list) = setup();
        {
            let mut canvas = DeferredCanvas::new(&mut renderer, &mut list);
            let count = canvas.save(SaveFlags::MATRIX_CLIP);
            canvas.clip(ClipOp::path(
                vec![
                    Point::new(0.0, 0.0),
                    Point::new(180.0, 0.0),
                    Point::new(0.0, 180.0),
                ],
                RegionOp::Intersect,
            ));
            canvas.draw(bitmap(1, 0.0));
            canvas.draw(bitmap(1, 20.0));
            canvas.restore_to_count(count);
            canvas.draw(bitmap(1, 40.0));
            canvas.draw(bitmap(1, 60.0));
        }

        assert!(!list.recording_complex_clip());
        assert_eq!(
            kinds(&list),
            vec![
                BatchKind::State,
                BatchKind::State,
                BatchKind::Draw,
                BatchKind::RestoreToCount,
                BatchKind::Merging,
            ]
        );
        assert_eq!(layout(&list)[2], vec![0.0, 20.0]);
        assert_eq!(layout(&list)[4], vec![40.0, 60.0]);
    }

    #[test]
    fn test_complex_clip_region_is_tracked() {
        let (mut renderer, mut list) = setup();
        let mut canvas = DeferredCanvas::new(&mut renderer, &mut list);
        canvas.save(SaveFlags::MATRIX_CLIP);
        canvas.clip(ClipOp::rect(
            BBox::from_ltrb(10.0, 10.0, 20.0, 20.0),
            RegionOp::Difference,
        ));
        assert!(canvas.list().recording_complex_clip());
    }

    #[test]
    fn test_renderer_error_propagates_and_clears() {
        init_logging();
        let mut renderer = RecordingRenderer::new(200.0, 200.0).reject_op("DrawPatch");
        let mut list = DeferredDisplayList::new();
        list.add_draw_op(&mut renderer, bitmap(1, 0.0));
        list.add_draw_op(
            &mut renderer,
            DrawOp::patch(TextureId(5), BBox::from_ltrb(50.0, 0.0, 60.0, 10.0)),
        );
        list.add_draw_op(&mut renderer, rect(100.0, 110.0));

        let mut dirty = BBox::empty();
        let err = list.flush(&mut renderer, &mut dirty).unwrap_err();
        assert_eq!(
            err,
            RenderError::SubmissionRejected {
                op: "DrawPatch".to_string(),
                reason: "op type refused by recording renderer".to_string(),
            }
        );
        // The bitmap before the failure stays drawn; the rect after it never runs.
        assert_eq!(renderer.draw_log(), vec!["DrawBitmap"]);
        assert_eq!(dirty, BBox::from_ltrb(0.0, 0.0, 10.0, 10.0));
        assert_eq!(renderer.save_count(), 1);
        assert!(list.is_empty());
    }

    #[test]
    fn test_reorder_disabled_keeps_record_order() {
        init_logging();
        let mut renderer = RecordingRenderer::new(200.0, 200.0);
        let mut list = DeferredDisplayList::with_config(DeferConfig {
            draw_reorder_disabled: true,
            ..DeferConfig::default()
        });
        list.add_draw_op(&mut renderer, bitmap(1, 0.0));
        list.add_draw_op(&mut renderer, rect(100.0, 110.0));
        list.add_draw_op(&mut renderer, bitmap(1, 20.0));

        assert_eq!(
            kinds(&list),
            vec![BatchKind::Draw, BatchKind::Draw, BatchKind::Draw]
        );
        assert_eq!(layout(&list), vec![vec![0.0], vec![100.0], vec![20.0]]);
    }

    #[test]
    fn test_pinned_op_blocks_reordering() {
        let (mut renderer, mut list) = setup();
        list.add_draw_op(&mut renderer, bitmap(1, 0.0));
        list.add_draw_op(&mut renderer, rect(100.0, 110.0).without_reorder());
        list.add_draw_op(&mut renderer, bitmap(1, 20.0));

        assert_eq!(layout(&list), vec![vec![0.0], vec![100.0], vec![20.0]]);
    }

    #[test]
    fn test_unbatched_ops_get_their_own_batch() {
        let (mut renderer, mut list) = setup();
        let layer = |left: f64| {
            DrawOp::opaque("DrawLayer", BBox::from_ltrb(left, 0.0, left + 10.0, 10.0))
        };
        list.add_draw_op(&mut renderer, layer(0.0));
        list.add_draw_op(&mut renderer, layer(20.0));
        assert_eq!(list.batch_count(), 2);
    }

    #[test]
    fn test_debug_merge_behavior_marks_barriers() {
        init_logging();
        let mut renderer = RecordingRenderer::new(200.0, 200.0);
        let mut list = DeferredDisplayList::with_config(DeferConfig {
            debug_merge_behavior: true,
            ..DeferConfig::default()
        });
        {
            let mut canvas = DeferredCanvas::new(&mut renderer, &mut list);
            canvas.draw(bitmap(1, 0.0));
            canvas.save(SaveFlags::MATRIX_CLIP);
            canvas.draw(bitmap(1, 20.0));
        }
        assert_eq!(
            kinds(&list),
            vec![
                BatchKind::Merging,
                BatchKind::State,
                BatchKind::DebugBarrier,
                BatchKind::Merging,
            ]
        );

        let mut dirty = BBox::empty();
        list.flush(&mut renderer, &mut dirty).unwrap();
        let barrier_marks = renderer
            .commands()
            .iter()
            .filter(|cmd| {
                matches!(
                    cmd,
                    RenderCommand::ColorRect { color, .. } if *color == DEBUG_COLOR_BARRIER
                )
            })
            .count();
        assert_eq!(barrier_marks, 1);
    }

    #[test]
    fn test_save_layer_replays_layer() {
        let (mut renderer, mut list) = setup();
        {
            let mut canvas = DeferredCanvas::new(&mut renderer, &mut list);
            let count =
                canvas.save_layer(BBox::from_ltrb(0.0, 0.0, 100.0, 100.0), 128, SaveFlags::ALL);
            canvas.draw(rect(0.0, 10.0));
            canvas.restore_to_count(count);
        }
        renderer.take_commands();

        let mut dirty = BBox::empty();
        list.flush(&mut renderer, &mut dirty).unwrap();
        assert!(renderer.commands().iter().any(|cmd| matches!(
            cmd,
            RenderCommand::SaveLayer { count: 3, alpha: 128, .. }
        )));
        assert_eq!(renderer.save_count(), 1);
    }

    #[test]
    fn test_dump_lists_batches() {
        let (mut renderer, mut list) = setup();
        list.add_draw_op(&mut renderer, bitmap(1, 0.0));
        let json = list.to_json().unwrap();
        assert!(json.contains(&list.id().to_string()));
        assert!(json.contains("\"Merging\""));
        assert!(json.contains("DrawBitmap"));
    }
}
