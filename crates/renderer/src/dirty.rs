//! Dirty/clean bookkeeping and job selection.
//!
//! All state here lives under the job queue lock. A rectangle moves from `dirty` to
//! `in_progress` when a worker claims its tile and into `clean` when the tile has
//! been published, unless it was invalidated again meanwhile.

use std::collections::VecDeque;
use std::sync::Arc;

use engine::JobPolicy;
use model::{Rect, Region};

use crate::snapshot::{ObjectSnapshot, PrepareRequest};
use crate::snapshot_layer::LayerSnapshot;

pub(crate) enum RenderJob {
    /// Compute coverage for one object ahead of compositing.
    Prepare {
        snapshot: Arc<dyn ObjectSnapshot>,
        area: Rect,
        canvas: Rect,
    },
    /// Composite the whole tree into one tile of the back buffer.
    Composite {
        tile: Rect,
        generation: u64,
        root: Arc<LayerSnapshot>,
    },
}

pub(crate) struct RenderQueue {
    root: Arc<LayerSnapshot>,
    canvas: Rect,
    visible: Rect,
    tile_size: u32,
    generation: u64,
    dirty: Region,
    in_progress: Region,
    clean: Region,
    lowest_changed_index: Option<usize>,
    prepare_queue: VecDeque<PrepareRequest>,
    preparing: Vec<Rect>,
    running: usize,
}

impl RenderQueue {
    pub(crate) fn new(root: Arc<LayerSnapshot>, canvas: Rect, visible: Rect, tile_size: u32) -> Self {
        Self {
            root,
            canvas,
            visible: visible.intersect(canvas),
            tile_size,
            generation: 0,
            dirty: Region::new(),
            in_progress: Region::new(),
            clean: Region::new(),
            lowest_changed_index: None,
            prepare_queue: VecDeque::new(),
            preparing: Vec::new(),
            running: 0,
        }
    }

    pub(crate) fn dirty(&self) -> &Region {
        &self.dirty
    }

    pub(crate) fn clean(&self) -> &Region {
        &self.clean
    }

    pub(crate) fn lowest_changed_index(&self) -> Option<usize> {
        self.lowest_changed_index
    }

    /// Starts an invalidation batch whose shallowest root-level change is `lowest`.
    ///
    /// While earlier work is still outstanding the index only moves down.
    pub(crate) fn begin_batch(&mut self, lowest: Option<usize>) {
        let Some(index) = lowest else {
            return;
        };
        self.lowest_changed_index = match self.lowest_changed_index {
            Some(current) if !self.is_idle() => Some(current.min(index)),
            _ => Some(index),
        };
    }

    pub(crate) fn add_dirty(&mut self, area: Rect) {
        let area = area.intersect(self.canvas);
        if area.is_empty() {
            return;
        }
        self.dirty.add_rect(area);
        self.clean.subtract_rect(area);
    }

    pub(crate) fn enqueue_prepare(&mut self, requests: impl IntoIterator<Item = PrepareRequest>) {
        self.prepare_queue.extend(
            requests
                .into_iter()
                .filter(|request| request.area.intersects(self.canvas)),
        );
    }

    /// Drops all regions for a new canvas; the whole canvas becomes dirty.
    ///
    /// Returns the new generation. Jobs claimed under an older generation still
    /// report back but no longer publish anything.
    pub(crate) fn reconfigure(&mut self, canvas: Rect, visible: Rect) -> u64 {
        self.generation += 1;
        self.canvas = canvas;
        self.visible = visible.intersect(canvas);
        self.dirty = Region::from_rect(canvas);
        self.in_progress.clear();
        self.clean.clear();
        self.prepare_queue.clear();
        self.lowest_changed_index = Some(0);
        self.generation
    }

    pub(crate) fn set_visible(&mut self, visible: Rect) {
        self.visible = visible.intersect(self.canvas);
    }

    pub(crate) fn finish_prepare(&mut self, area: Rect) {
        if let Some(position) = self.preparing.iter().position(|pending| *pending == area) {
            self.preparing.swap_remove(position);
        }
        self.running = self.running.saturating_sub(1);
    }

    /// Releases a claimed tile. Returns the part of it that is now clean, or `None`
    /// if the tile belongs to an older generation or was not presented.
    pub(crate) fn finish_composite(
        &mut self,
        tile: Rect,
        generation: u64,
        presented: bool,
    ) -> Option<Region> {
        self.running = self.running.saturating_sub(1);
        if generation != self.generation {
            return None;
        }
        self.in_progress.subtract_rect(tile);
        if !presented {
            return None;
        }
        let mut piece = Region::from_rect(tile);
        piece.subtract_region(&self.dirty);
        self.clean.add_region(&piece);
        Some(piece)
    }

    fn next_tile(&self) -> Option<Rect> {
        for rect in self.dirty.intersect_rect(self.visible).rects() {
            for tile in rect.tiles(self.tile_size) {
                if self.in_progress.intersects_rect(tile) {
                    continue;
                }
                if self.preparing.iter().any(|area| area.intersects(tile)) {
                    continue;
                }
                return Some(tile);
            }
        }
        None
    }
}

impl JobPolicy for RenderQueue {
    type Job = RenderJob;

    // Coverage jobs go first; a tile waits while an object overlapping it is
    // still being prepared or another job holds an overlapping tile.
    fn next_job(&mut self) -> Option<RenderJob> {
        if let Some(request) = self.prepare_queue.pop_front() {
            self.preparing.push(request.area);
            self.running += 1;
            log::trace!("[render] dispatch prepare {:?}", request.area);
            return Some(RenderJob::Prepare {
                snapshot: request.snapshot,
                area: request.area,
                canvas: self.canvas,
            });
        }
        let tile = self.next_tile()?;
        self.dirty.subtract_rect(tile);
        self.in_progress.add_rect(tile);
        self.running += 1;
        log::trace!("[render] dispatch composite {tile:?}");
        Some(RenderJob::Composite {
            tile,
            generation: self.generation,
            root: Arc::clone(&self.root),
        })
    }

    fn is_idle(&self) -> bool {
        self.prepare_queue.is_empty() && self.running == 0 && !self.dirty.intersects_rect(self.visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterSnapshot;
    use render_protocol::NodeKey;

    fn queue(canvas: Rect) -> RenderQueue {
        RenderQueue::new(LayerSnapshot::new(NodeKey::default(), None), canvas, canvas, 64)
    }

    fn claim_tile(queue: &mut RenderQueue) -> Option<(Rect, u64)> {
        match queue.next_job()? {
            RenderJob::Composite {
                tile, generation, ..
            } => Some((tile, generation)),
            RenderJob::Prepare { .. } => panic!("expected a composite job"),
        }
    }

    fn request(area: Rect) -> PrepareRequest {
        PrepareRequest {
            snapshot: Arc::new(FilterSnapshot::new(NodeKey::default())),
            area,
        }
    }

    #[test]
    fn tiles_move_from_dirty_to_clean() {
        let mut queue = queue(Rect::new(0, 0, 128, 128));
        queue.add_dirty(Rect::new(10, 10, 100, 20));
        let mut claimed = Vec::new();
        while let Some((tile, generation)) = claim_tile(&mut queue) {
            claimed.push((tile, generation));
        }
        assert_eq!(claimed.len(), 2);
        assert!(queue.dirty().is_empty());
        assert!(!queue.is_idle());
        for (tile, generation) in claimed {
            let piece = queue.finish_composite(tile, generation, true).expect("current");
            assert!(piece.same_area(&Region::from_rect(tile)));
        }
        assert!(queue.is_idle());
        assert!(queue.clean().same_area(&Region::from_rect(Rect::new(10, 10, 100, 20))));
    }

    #[test]
    fn overlapping_tiles_wait_for_the_running_one() {
        let mut queue = queue(Rect::new(0, 0, 64, 64));
        queue.add_dirty(Rect::new(0, 0, 32, 32));
        let (tile, generation) = claim_tile(&mut queue).expect("tile");
        queue.add_dirty(Rect::new(16, 16, 48, 48));
        assert!(claim_tile(&mut queue).is_none());

        let piece = queue.finish_composite(tile, generation, true).expect("current");
        assert_eq!(piece.area(), 32 * 32 - 16 * 16);
        assert!(!queue.clean().intersects_rect(Rect::new(16, 16, 32, 32)));
        let (next, _) = claim_tile(&mut queue).expect("redirtied tile");
        assert_eq!(next, Rect::new(16, 16, 48, 48));
    }

    #[test]
    fn prepare_jobs_run_first_and_gate_overlapping_tiles() {
        let mut queue = queue(Rect::new(0, 0, 256, 64));
        queue.add_dirty(Rect::new(0, 0, 256, 64));
        queue.enqueue_prepare([request(Rect::new(0, 0, 10, 10))]);
        let area = match queue.next_job() {
            Some(RenderJob::Prepare { area, .. }) => area,
            _ => panic!("prepare must be dispatched first"),
        };
        let (tile, _) = claim_tile(&mut queue).expect("unrelated tile");
        assert!(!tile.intersects(area));
        queue.finish_prepare(area);
        let (tile, _) = claim_tile(&mut queue).expect("tile");
        assert_eq!(tile, Rect::new(0, 0, 64, 64));
    }

    #[test]
    fn stale_generation_does_not_publish() {
        let mut queue = queue(Rect::new(0, 0, 64, 64));
        queue.add_dirty(Rect::new(0, 0, 8, 8));
        let (tile, generation) = claim_tile(&mut queue).expect("tile");
        let next = queue.reconfigure(Rect::new(0, 0, 128, 128), Rect::new(0, 0, 128, 128));
        assert_eq!(next, generation + 1);
        assert!(queue.finish_composite(tile, generation, true).is_none());
        assert!(queue.clean().is_empty());
        assert_eq!(queue.dirty().area(), 128 * 128);
    }

    #[test]
    fn lowest_index_resets_only_when_idle() {
        let mut queue = queue(Rect::new(0, 0, 64, 64));
        queue.begin_batch(Some(3));
        queue.add_dirty(Rect::new(0, 0, 8, 8));
        queue.begin_batch(Some(4));
        assert_eq!(queue.lowest_changed_index(), Some(3));
        let (tile, generation) = claim_tile(&mut queue).expect("tile");
        queue.finish_composite(tile, generation, true);
        queue.begin_batch(Some(4));
        assert_eq!(queue.lowest_changed_index(), Some(4));
    }

    #[test]
    fn invisible_dirt_does_not_block_idle() {
        let mut queue = queue(Rect::new(0, 0, 128, 128));
        queue.set_visible(Rect::new(0, 0, 64, 64));
        queue.add_dirty(Rect::new(80, 80, 90, 90));
        assert!(queue.is_idle());
        assert!(claim_tile(&mut queue).is_none());
        queue.set_visible(Rect::new(0, 0, 128, 128));
        assert!(!queue.is_idle());
    }
}
