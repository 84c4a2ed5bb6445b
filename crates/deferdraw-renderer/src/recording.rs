use serde::{Deserialize, Serialize};

use deferdraw_core::geometry::{BBox, Matrix};
use deferdraw_core::op::DrawOp;
use deferdraw_core::state::{ClipOp, DeferFlags, DisplayState, DrawModifiers, SaveFlags};

use crate::canvas::{Canvas, Snapshot};
use crate::renderer::{DrawStatus, RenderError, Renderer};

/// One renderer call, as observed by [`RecordingRenderer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RenderCommand {
    Save {
        /// Save count after the save.
        count: i32,
        flags: u32,
    },
    SaveLayer {
        count: i32,
        bounds: BBox,
        alpha: u8,
    },
    /// Only emitted when at least one snapshot was popped.
    RestoreToCount { from: i32, to: i32 },
    Clip {
        bounds: BBox,
        complex: bool,
    },
    Draw {
        op: String,
        bounds: BBox,
    },
    MultiDraw {
        op: String,
        count: usize,
        bounds: BBox,
    },
    ColorRect {
        bounds: BBox,
        color: u32,
    },
    EventMark {
        name: String,
    },
}

/// In-memory [`Renderer`] that tracks canvas state and logs every call.
#[derive(Debug, Clone)]
pub struct RecordingRenderer {
    canvas: Canvas,
    modifiers: DrawModifiers,
    commands: Vec<RenderCommand>,
    /// Op names whose submissions are refused.
    rejected_ops: Vec<String>,
}

impl RecordingRenderer {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            canvas: Canvas::new(width, height),
            modifiers: DrawModifiers::default(),
            commands: Vec::new(),
            rejected_ops: Vec::new(),
        }
    }

    /// Refuse every submission of ops named `op_name`.
    pub fn reject_op(mut self, op_name: &str) -> Self {
        self.rejected_ops.push(op_name.to_string());
        self
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn current(&self) -> &Snapshot {
        self.canvas.current()
    }

    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<RenderCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Names of drawn ops in submission order; merged submissions expand to
    /// `"<op> x<count>"`.
    pub fn draw_log(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                RenderCommand::Draw { op, .. } => Some(op.clone()),
                RenderCommand::MultiDraw { op, count, .. } => Some(format!("{op} x{count}")),
                _ => None,
            })
            .collect()
    }

    pub fn commands_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.commands)
    }

    fn is_rejected(&self, op_name: &str) -> bool {
        self.rejected_ops.iter().any(|name| name == op_name)
    }
}

impl Renderer for RecordingRenderer {
    fn save_count(&self) -> i32 {
        self.canvas.save_count()
    }

    fn save(&mut self, flags: SaveFlags) -> i32 {
        let previous = self.canvas.save(flags);
        self.commands.push(RenderCommand::Save {
            count: self.canvas.save_count(),
            flags: flags.bits(),
        });
        previous
    }

    fn save_layer(&mut self, bounds: &BBox, alpha: u8, flags: SaveFlags) -> i32 {
        let previous = self.canvas.save_layer(bounds, alpha, flags);
        self.commands.push(RenderCommand::SaveLayer {
            count: self.canvas.save_count(),
            bounds: *bounds,
            alpha,
        });
        previous
    }

    fn restore_to_count(&mut self, count: i32) {
        let from = self.canvas.save_count();
        if self.canvas.restore_to_count(count) > 0 {
            self.commands.push(RenderCommand::RestoreToCount {
                from,
                to: self.canvas.save_count(),
            });
        }
    }

    fn clip(&mut self, clip: &ClipOp) -> bool {
        let visible = self.canvas.clip(clip);
        let current = self.canvas.current();
        self.commands.push(RenderCommand::Clip {
            bounds: current.clip,
            complex: current.complex_clip,
        });
        visible
    }

    fn concat(&mut self, matrix: &Matrix) {
        self.canvas.concat(matrix);
    }

    fn has_rect_to_rect_transform(&self) -> bool {
        self.canvas.current().matrix.rect_stays_rect()
    }

    fn store_display_state(&mut self, state: &mut DisplayState, flags: DeferFlags) -> bool {
        let current = self.canvas.current();
        if flags.contains(DeferFlags::DRAW) && !state.bounds.is_empty() {
            let mapped = current.matrix.map_bbox(&state.bounds);
            match mapped.intersection(&current.clip) {
                Some(clipped) => state.bounds = clipped,
                None => {
                    log::trace!("quick rejected bounds {:?}", mapped);
                    return true;
                }
            }
        }
        state.matrix = current.matrix;
        state.clip = flags.contains(DeferFlags::CLIP).then_some(current.clip);
        state.alpha = current.alpha;
        state.modifiers = self.modifiers.clone();
        false
    }

    fn restore_display_state(&mut self, state: &DisplayState) {
        let current = self.canvas.current_mut();
        current.matrix = state.matrix;
        if let Some(clip) = state.clip {
            current.clip = clip;
        }
        current.alpha = state.alpha;
        self.modifiers = state.modifiers.clone();
    }

    fn draw_modifiers(&self) -> DrawModifiers {
        self.modifiers.clone()
    }

    fn set_draw_modifiers(&mut self, modifiers: DrawModifiers) {
        self.modifiers = modifiers;
    }

    fn draw(&mut self, op: &DrawOp, dirty: &mut BBox) -> Result<DrawStatus, RenderError> {
        if self.is_rejected(op.name()) {
            log::warn!("refusing {} at {:?}", op.name(), op.state.bounds);
            return Err(RenderError::SubmissionRejected {
                op: op.name().to_string(),
                reason: "op type refused by recording renderer".to_string(),
            });
        }
        self.commands.push(RenderCommand::Draw {
            op: op.name().to_string(),
            bounds: op.state.bounds,
        });
        dirty.union_with(&op.state.bounds);
        Ok(DrawStatus::DREW)
    }

    fn multi_draw(
        &mut self,
        ops: &[DrawOp],
        bounds: &BBox,
        dirty: &mut BBox,
    ) -> Result<DrawStatus, RenderError> {
        let Some(first) = ops.first() else {
            return Ok(DrawStatus::DONE);
        };
        if self.is_rejected(first.name()) {
            log::warn!("refusing merged {} x{}", first.name(), ops.len());
            return Err(RenderError::MultiDrawRejected {
                op: first.name().to_string(),
                count: ops.len(),
            });
        }
        self.commands.push(RenderCommand::MultiDraw {
            op: first.name().to_string(),
            count: ops.len(),
            bounds: *bounds,
        });
        dirty.union_with(bounds);
        Ok(DrawStatus::DREW)
    }

    fn draw_screen_space_color_rect(
        &mut self,
        rect: &BBox,
        color: u32,
    ) -> Result<DrawStatus, RenderError> {
        self.commands.push(RenderCommand::ColorRect {
            bounds: *rect,
            color,
        });
        Ok(DrawStatus::DREW)
    }

    fn event_mark(&mut self, name: &str) {
        self.commands.push(RenderCommand::EventMark {
            name: name.to_string(),
        });
    }
}
