//! Layer snapshots: ordered children, reconciliation against the live layer, and
//! compositing with a cached prefix of unchanged lower children.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use bitvec::vec::BitVec;
use document::LayerStyle;
use model::{Bitmap, Rect, Region};
use render_protocol::{NodeKey, opacity_to_u8};
use smallvec::SmallVec;

use crate::filter::FilterSnapshot;
use crate::snapshot::{
    ObjectSnapshot, PrepareRequest, SnapshotCounters, SnapshotKind, SnapshotStats, SyncContext,
    SyncedStamp, lock_cache, read_state, write_state,
};
use crate::snapshot_objects::{ImageSnapshot, VectorSnapshot};
use crate::worker::RenderContext;

struct LayerState {
    style: LayerStyle,
    area: Rect,
    canvas: Rect,
    children: Vec<Arc<dyn ObjectSnapshot>>,
}

/// Composite of children `[0, level)` for the pixels in `valid`.
///
/// `epoch` changes whenever the cached content is discarded, so a render that started
/// against older children cannot store its result.
#[derive(Debug, Default)]
struct PrefixCache {
    level: usize,
    epoch: u64,
    valid: Region,
    bitmap: Option<Bitmap>,
}

pub(crate) struct LayerSnapshot {
    key: NodeKey,
    parent: Option<Weak<LayerSnapshot>>,
    self_ref: Weak<LayerSnapshot>,
    synced: SyncedStamp,
    state: RwLock<LayerState>,
    prefix: Mutex<PrefixCache>,
    counters: SnapshotCounters,
}

impl LayerSnapshot {
    pub(crate) fn new(key: NodeKey, parent: Option<Weak<LayerSnapshot>>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            key,
            parent,
            self_ref: self_ref.clone(),
            synced: SyncedStamp::default(),
            state: RwLock::new(LayerState {
                style: LayerStyle::default(),
                area: Rect::EMPTY,
                canvas: Rect::EMPTY,
                children: Vec::new(),
            }),
            prefix: Mutex::new(PrefixCache::default()),
            counters: SnapshotCounters::default(),
        })
    }

    pub(crate) fn downgrade(&self) -> Weak<LayerSnapshot> {
        self.self_ref.clone()
    }

    pub(crate) fn parent(&self) -> Option<Arc<LayerSnapshot>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn index_of(&self, key: NodeKey) -> Option<usize> {
        read_state(&self.state)
            .children
            .iter()
            .position(|child| child.key() == key)
    }

    pub(crate) fn children(&self) -> Vec<Arc<dyn ObjectSnapshot>> {
        read_state(&self.state).children.clone()
    }

    /// Sum of the filter outsets of children at `index` and above.
    pub(crate) fn filter_outset_from(&self, index: usize) -> i32 {
        read_state(&self.state)
            .children
            .iter()
            .skip(index)
            .fold(0i32, |total, child| total.saturating_add(child.filter_outset()))
    }

    /// Depth-first lookup of a descendant snapshot.
    pub(crate) fn find(&self, key: NodeKey) -> Option<Arc<dyn ObjectSnapshot>> {
        for child in self.children() {
            if child.key() == key {
                return Some(child);
            }
            if let Some(found) = child.as_layer().and_then(|layer| layer.find(key)) {
                return Some(found);
            }
        }
        None
    }

    pub(crate) fn prefix_level(&self) -> usize {
        lock_cache(&self.prefix).level
    }

    fn create_child(
        &self,
        key: NodeKey,
        kind: SnapshotKind,
        ctx: &mut SyncContext<'_>,
    ) -> Arc<dyn ObjectSnapshot> {
        match kind {
            SnapshotKind::Vector => Arc::new(VectorSnapshot::new(key)),
            SnapshotKind::Image => Arc::new(ImageSnapshot::new(key)),
            SnapshotKind::Filter => Arc::new(FilterSnapshot::new(key)),
            SnapshotKind::Layer => {
                let layer = LayerSnapshot::new(key, Some(self.self_ref.clone()));
                ctx.register_layer(&layer);
                layer
            }
        }
    }

    // Children below `index` are unchanged; the prefix survives only if it already
    // ends there.
    fn note_changed(&self, index: usize) {
        let mut prefix = lock_cache(&self.prefix);
        if prefix.level == index && !prefix.valid.is_empty() {
            return;
        }
        prefix.level = index;
        prefix.epoch = prefix.epoch.wrapping_add(1);
        prefix.valid.clear();
    }

    fn restore_prefix(&self, scratch: &mut Bitmap, needed: Rect, level: usize, epoch: u64) -> bool {
        let prefix = lock_cache(&self.prefix);
        if prefix.epoch != epoch || prefix.level != level || !prefix.valid.contains_rect(needed) {
            return false;
        }
        match prefix.bitmap.as_ref() {
            Some(bitmap) => {
                scratch.copy_from(bitmap, needed);
                true
            }
            None => false,
        }
    }

    fn store_prefix(&self, scratch: &Bitmap, needed: Rect, canvas: Rect, level: usize, epoch: u64) {
        let mut prefix = lock_cache(&self.prefix);
        if prefix.epoch != epoch || prefix.level != level {
            return;
        }
        let PrefixCache { bitmap, valid, .. } = &mut *prefix;
        if bitmap.as_ref().map(Bitmap::bounds) != Some(canvas) {
            valid.clear();
            match Bitmap::try_new(canvas) {
                Ok(fresh) => *bitmap = Some(fresh),
                Err(error) => {
                    log::warn!("[render] layer {:?} runs without a prefix cache: {error}", self.key);
                    *bitmap = None;
                    return;
                }
            }
        }
        if let Some(bitmap) = bitmap.as_mut() {
            bitmap.copy_from(scratch, needed);
            valid.add_rect(needed);
        }
    }
}

impl ObjectSnapshot for LayerSnapshot {
    fn key(&self) -> NodeKey {
        self.key
    }

    fn kind(&self) -> SnapshotKind {
        SnapshotKind::Layer
    }

    /// Reconciles children with the live layer by key, syncing each one.
    ///
    /// Layers whose subtree did not change since the last sync are skipped whole.
    fn sync(&self, ctx: &mut SyncContext<'_>) -> bool {
        let Some(node) = ctx.tree.node(self.key) else {
            return false;
        };
        let Some(live) = node.as_layer() else {
            return false;
        };
        let stamp = ctx.stamp(node);
        if self.synced.matches(stamp) {
            return false;
        }
        let mut state = write_state(&self.state);

        let previous: HashMap<NodeKey, usize> = state
            .children
            .iter()
            .enumerate()
            .map(|(index, child)| (child.key(), index))
            .collect();
        let mut reused: BitVec = BitVec::repeat(false, state.children.len());
        let mut children: Vec<Arc<dyn ObjectSnapshot>> = Vec::with_capacity(live.children().len());
        let mut lowest_changed: Option<usize> = None;
        let mut note = |index: usize| {
            lowest_changed = Some(lowest_changed.map_or(index, |lowest| lowest.min(index)));
        };

        for &child_key in live.children() {
            let Some(child_node) = ctx.tree.node(child_key) else {
                continue;
            };
            let index = children.len();
            let kind = SnapshotKind::of(child_node);
            let existing = previous
                .get(&child_key)
                .copied()
                .filter(|&old| state.children[old].kind() == kind);
            let snapshot = match existing {
                Some(old) => {
                    reused.set(old, true);
                    Arc::clone(&state.children[old])
                }
                None => self.create_child(child_key, kind, ctx),
            };
            let changed = snapshot.sync(ctx) || existing.is_none();
            if changed || existing != Some(index) {
                note(index);
            }
            if changed && kind != SnapshotKind::Layer && snapshot.needs_rasterizing() {
                ctx.prepare.push(PrepareRequest {
                    area: snapshot.area(),
                    snapshot: Arc::clone(&snapshot),
                });
            }
            children.push(snapshot);
        }
        for removed in reused.iter_zeros() {
            note(removed.min(children.len()));
        }

        let canvas = ctx.canvas();
        state.area = children
            .iter()
            .fold(Rect::EMPTY, |area, child| area.union(child.area()))
            .intersect(canvas);
        state.children = children;
        state.style = live.style();
        state.canvas = canvas;
        if let Some(index) = lowest_changed {
            self.note_changed(index);
        }
        drop(state);
        self.synced.store(stamp);
        self.counters.note_sync();
        true
    }

    fn prepare_rendering(&self, _canvas_bounds: Rect) {}

    fn render(&self, ctx: &mut RenderContext, target: &mut Bitmap, area: Rect) {
        let (children, style, canvas, layer_area, level, epoch) = {
            let state = read_state(&self.state);
            let prefix = lock_cache(&self.prefix);
            (
                state.children.clone(),
                state.style,
                state.canvas,
                state.area,
                prefix.level.min(state.children.len()),
                prefix.epoch,
            )
        };
        let opacity = opacity_to_u8(style.opacity);
        let area = area
            .intersect(target.bounds())
            .intersect(canvas)
            .intersect(layer_area);
        if area.is_empty() || children.is_empty() || opacity == 0 {
            return;
        }

        let outsets: SmallVec<[i32; 16]> = children.iter().map(|child| child.filter_outset()).collect();
        let total = outsets.iter().fold(0i32, |sum, outset| sum.saturating_add(*outset));
        let above = outsets[level..]
            .iter()
            .fold(0i32, |sum, outset| sum.saturating_add(*outset));
        let full = area.inflate(total).intersect(canvas);
        let needed = area.inflate(above).intersect(canvas);

        let mut scratch = match ctx.take_scratch(self, full) {
            Ok(scratch) => scratch,
            Err(error) => {
                log::warn!("[render] skipping layer {:?} this frame: {error}", self.key);
                return;
            }
        };
        if level > 0 && !self.restore_prefix(&mut scratch, needed, level, epoch) {
            for child in &children[..level] {
                child.render(ctx, &mut scratch, full);
            }
            self.store_prefix(&scratch, needed, canvas, level, epoch);
        }
        for child in &children[level..] {
            child.render(ctx, &mut scratch, needed);
        }
        target.blend_from(&scratch, area, style.blend, opacity);
        ctx.return_scratch(self, scratch);
    }

    fn area(&self) -> Rect {
        read_state(&self.state).area
    }

    fn needs_rasterizing(&self) -> bool {
        false
    }

    fn stats(&self) -> SnapshotStats {
        self.counters.stats()
    }

    fn as_layer(&self) -> Option<&LayerSnapshot> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use document::{Content, Document, NodeSpec};
    use model::{Color, Point};
    use render_protocol::{FilterKind, Paint};
    use view::{ViewState, ZoomLevel};

    fn square(x: f64, color: Color) -> NodeSpec {
        NodeSpec::object(Content::rectangle(Point::new(x, 0.0), Point::new(x + 10.0, 10.0)))
            .with_paint(Paint::solid(color))
    }

    fn sync_root(document: &Document, root: &LayerSnapshot, epoch: u64) -> (bool, Vec<NodeKey>) {
        let tree = document.read();
        let view = ViewState::fit_document(document.bounds(), ZoomLevel::default()).expect("view");
        let mut ctx = SyncContext::new(&tree, view, epoch);
        let changed = root.sync(&mut ctx);
        let prepared = ctx.prepare.iter().map(|request| request.snapshot.key()).collect();
        (changed, prepared)
    }

    #[test]
    fn second_sync_without_edits_is_a_no_op() {
        let document = Document::new(64, 64);
        let root_key = {
            let mut tree = document.write();
            let root = tree.root();
            tree.push_object(root, square(0.0, Color::BLACK)).expect("add");
            root
        };
        let root = LayerSnapshot::new(root_key, None);
        let (first, prepared) = sync_root(&document, &root, 0);
        assert!(first);
        assert_eq!(prepared.len(), 1);
        let (second, prepared) = sync_root(&document, &root, 0);
        assert!(!second);
        assert!(prepared.is_empty());
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.area(), Rect::new(0, 0, 10, 10));
    }

    #[test]
    fn edits_move_the_prefix_to_the_lowest_changed_child() {
        let document = Document::new(64, 64);
        let (root_key, keys) = {
            let mut tree = document.write();
            let root = tree.root();
            let keys: Vec<NodeKey> = (0..5)
                .map(|index| {
                    tree.push_object(root, square(f64::from(index) * 10.0, Color::BLACK))
                        .expect("add")
                })
                .collect();
            (root, keys)
        };
        let root = LayerSnapshot::new(root_key, None);
        sync_root(&document, &root, 0);
        assert_eq!(root.prefix_level(), 0);

        document
            .write()
            .set_paint(keys[2], Paint::solid(Color::WHITE))
            .expect("paint");
        let (changed, prepared) = sync_root(&document, &root, 0);
        assert!(changed);
        assert_eq!(prepared, vec![keys[2]]);
        assert_eq!(root.prefix_level(), 2);
    }

    #[test]
    fn removal_and_kind_change_rebuild_children() {
        let document = Document::new(64, 64);
        let (root_key, first) = {
            let mut tree = document.write();
            let root = tree.root();
            let first = tree.push_object(root, square(0.0, Color::BLACK)).expect("add");
            tree.push_object(root, square(20.0, Color::BLACK)).expect("add");
            (root, first)
        };
        let root = LayerSnapshot::new(root_key, None);
        sync_root(&document, &root, 0);

        document.write().remove_object(root_key, 1).expect("remove");
        document
            .write()
            .set_content(first, Content::Filter(FilterKind::Invert))
            .expect("content");
        sync_root(&document, &root, 0);
        let children = root.children();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].kind(), SnapshotKind::Filter);
        assert_eq!(root.prefix_level(), 0);
    }

    #[test]
    fn nested_layers_are_found_and_know_their_parent() {
        let document = Document::new(64, 64);
        let (root_key, nested, leaf) = {
            let mut tree = document.write();
            let root = tree.root();
            let nested = tree
                .push_object(root, NodeSpec::layer(LayerStyle::default()))
                .expect("layer");
            let leaf = tree.push_object(nested, square(0.0, Color::BLACK)).expect("add");
            (root, nested, leaf)
        };
        let root = LayerSnapshot::new(root_key, None);
        let tree = document.read();
        let view = ViewState::fit_document(document.bounds(), ZoomLevel::default()).expect("view");
        let mut ctx = SyncContext::new(&tree, view, 0);
        root.sync(&mut ctx);
        assert_eq!(ctx.new_layers.len(), 1);
        let registered = ctx.new_layers[0].upgrade().expect("layer alive");
        assert_eq!(registered.key(), nested);
        assert_eq!(registered.parent().map(|parent| parent.key()), Some(root_key));
        assert_eq!(root.index_of(nested), Some(0));
        assert_eq!(root.find(leaf).map(|found| found.key()), Some(leaf));
    }
}
