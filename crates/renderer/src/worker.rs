//! Render worker: runs prepare and composite jobs on a pool thread.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use model::{AllocError, Bitmap, Rect};
use render_protocol::{DisplayEvent, NodeKey};

use crate::Shared;
use crate::dirty::RenderJob;
use crate::snapshot::ObjectSnapshot;
use crate::snapshot_layer::LayerSnapshot;

struct ScratchEntry {
    bitmap: Bitmap,
    owner: Weak<LayerSnapshot>,
}

/// Per-worker buffers reused across jobs.
///
/// Each layer gets its own intermediate bitmap, keyed by snapshot, so nested layers
/// can be composited recursively without reallocating every tile.
#[derive(Default)]
pub(crate) struct RenderContext {
    scratch: HashMap<NodeKey, ScratchEntry>,
}

impl RenderContext {
    /// Hands out the layer's bitmap, moved to `bounds` and cleared.
    pub(crate) fn take_scratch(
        &mut self,
        layer: &LayerSnapshot,
        bounds: Rect,
    ) -> Result<Bitmap, AllocError> {
        match self.scratch.remove(&layer.key()) {
            Some(entry) if std::ptr::eq(entry.owner.as_ptr(), layer) => {
                let mut bitmap = entry.bitmap;
                bitmap.reposition(bounds)?;
                Ok(bitmap)
            }
            _ => Bitmap::try_new(bounds),
        }
    }

    pub(crate) fn return_scratch(&mut self, layer: &LayerSnapshot, bitmap: Bitmap) {
        let owner = layer.downgrade();
        self.scratch.insert(layer.key(), ScratchEntry { bitmap, owner });
    }

    /// Drops buffers of layers that no longer exist.
    pub(crate) fn prune(&mut self) {
        self.scratch.retain(|_, entry| entry.owner.strong_count() > 0);
    }

    #[cfg(test)]
    pub(crate) fn scratch_count(&self) -> usize {
        self.scratch.len()
    }
}

pub(crate) struct RenderWorker {
    index: usize,
    shared: Arc<Shared>,
    context: RenderContext,
    tile: Option<Bitmap>,
}

impl RenderWorker {
    pub(crate) fn new(index: usize, shared: Arc<Shared>) -> Self {
        Self {
            index,
            shared,
            context: RenderContext::default(),
            tile: None,
        }
    }

    pub(crate) fn run(&mut self, job: RenderJob) {
        match job {
            RenderJob::Prepare {
                snapshot,
                area,
                canvas,
            } => self.prepare(snapshot, area, canvas),
            RenderJob::Composite {
                tile,
                generation,
                root,
            } => self.composite(tile, generation, &root),
        }
    }

    fn prepare(&mut self, snapshot: Arc<dyn ObjectSnapshot>, area: Rect, canvas: Rect) {
        let result = catch_unwind(AssertUnwindSafe(|| snapshot.prepare_rendering(canvas)));
        if result.is_err() {
            log::error!(
                "[render] worker {} panicked preparing {:?}",
                self.index,
                snapshot.key()
            );
        }
        self.shared.queue.update(|queue| queue.finish_prepare(area));
        log::trace!("[render] worker {} prepared {area:?}", self.index);
    }

    fn composite(&mut self, tile: Rect, generation: u64, root: &LayerSnapshot) {
        let rendered = catch_unwind(AssertUnwindSafe(|| self.render_tile(tile, root)));
        let bitmap = match rendered {
            Ok(bitmap) => bitmap,
            Err(_) => {
                log::error!("[render] worker {} panicked compositing {tile:?}", self.index);
                None
            }
        };
        let presented = match bitmap.as_ref() {
            Some(bitmap) => self
                .shared
                .write_display()
                .present_tile(bitmap, tile, generation),
            None => false,
        };
        self.tile = bitmap;

        let shared = &self.shared;
        let piece = {
            let mut display = shared.write_display();
            let piece = shared
                .queue
                .update(|queue| queue.finish_composite(tile, generation, presented));
            if let Some(piece) = piece.as_ref() {
                display.publish(piece, generation);
            }
            piece
        };
        if let Some(piece) = piece {
            for rect in piece.rects() {
                shared.notify_display(DisplayEvent::AreaClean(*rect));
            }
        }
        self.context.prune();
        log::trace!("[render] worker {} composited {tile:?}", self.index);
    }

    fn render_tile(&mut self, tile: Rect, root: &LayerSnapshot) -> Option<Bitmap> {
        let bitmap = match self.tile.take() {
            Some(mut bitmap) => bitmap.reposition(tile).map(|()| bitmap),
            None => Bitmap::try_new(tile),
        };
        match bitmap {
            Ok(mut bitmap) => {
                root.render(&mut self.context, &mut bitmap, tile);
                Some(bitmap)
            }
            Err(error) => {
                log::warn!("[render] worker {} skipping tile {tile:?}: {error}", self.index);
                None
            }
        }
    }
}
