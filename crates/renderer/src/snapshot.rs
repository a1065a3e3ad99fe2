//! Render-side mirror of the scene tree.
//!
//! Every live node the manager has seen gets one snapshot. A snapshot copies the
//! renderable state of its node during `sync` and is read by workers afterwards. Each
//! snapshot guards its state with its own lock; the document lock is only held while
//! syncing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crossbeam_channel::Sender;
use document::{Content, SceneNode, SceneTree};
use model::{AllocError, Bitmap, Rect, Region, Transform};
use render_protocol::{NodeKey, SceneEvent};
use view::ViewState;

use crate::snapshot_layer::LayerSnapshot;
use crate::worker::RenderContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SyncStamp {
    pub(crate) change_counter: u64,
    pub(crate) view_epoch: u64,
}

/// The stamp a snapshot last synced from, readable without the snapshot's state lock.
///
/// Lets an unchanged snapshot skip `sync` while a worker holds its state.
#[derive(Debug, Default)]
pub(crate) struct SyncedStamp(Mutex<Option<SyncStamp>>);

impl SyncedStamp {
    pub(crate) fn matches(&self, stamp: SyncStamp) -> bool {
        *lock_cache(&self.0) == Some(stamp)
    }

    pub(crate) fn store(&self, stamp: SyncStamp) {
        *lock_cache(&self.0) = Some(stamp);
    }
}

/// Per-snapshot instrumentation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotStats {
    pub sync_count: u64,
    pub prepare_count: u64,
    pub rasterize_count: u64,
}

#[derive(Debug, Default)]
pub(crate) struct SnapshotCounters {
    sync: AtomicU64,
    prepare: AtomicU64,
    rasterize: AtomicU64,
}

impl SnapshotCounters {
    pub(crate) fn note_sync(&self) {
        self.sync.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_prepare(&self) {
        self.prepare.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_rasterize(&self) {
        self.rasterize.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            sync_count: self.sync.load(Ordering::Relaxed),
            prepare_count: self.prepare.load(Ordering::Relaxed),
            rasterize_count: self.rasterize.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SnapshotKind {
    Vector,
    Image,
    Filter,
    Layer,
}

impl SnapshotKind {
    pub(crate) fn of(node: &SceneNode) -> Self {
        match node.content() {
            None => SnapshotKind::Layer,
            Some(Content::Image { .. }) => SnapshotKind::Image,
            Some(Content::Filter(_)) => SnapshotKind::Filter,
            Some(_) => SnapshotKind::Vector,
        }
    }
}

/// An object whose coverage must be computed before it can be composited.
#[derive(Clone)]
pub(crate) struct PrepareRequest {
    pub(crate) snapshot: Arc<dyn ObjectSnapshot>,
    pub(crate) area: Rect,
}

/// Inputs and outputs of one synchronization pass, built under the document read lock.
pub(crate) struct SyncContext<'a> {
    pub(crate) tree: &'a SceneTree,
    pub(crate) view: ViewState,
    pub(crate) view_epoch: u64,
    listener: Option<&'a Sender<SceneEvent>>,
    pub(crate) new_layers: Vec<Weak<LayerSnapshot>>,
    pub(crate) prepare: Vec<PrepareRequest>,
}

impl<'a> SyncContext<'a> {
    pub(crate) fn new(tree: &'a SceneTree, view: ViewState, view_epoch: u64) -> Self {
        Self {
            tree,
            view,
            view_epoch,
            listener: None,
            new_layers: Vec::new(),
            prepare: Vec::new(),
        }
    }

    /// New layer snapshots subscribe `listener` to their live layer.
    pub(crate) fn with_listener(mut self, listener: &'a Sender<SceneEvent>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub(crate) fn stamp(&self, node: &SceneNode) -> SyncStamp {
        SyncStamp {
            change_counter: node.change_counter(),
            view_epoch: self.view_epoch,
        }
    }

    pub(crate) fn canvas(&self) -> Rect {
        self.view.canvas_rect()
    }

    /// Maps a node's own transform into canvas space.
    pub(crate) fn to_canvas(&self, node: &SceneNode) -> Transform {
        node.transform().then(&self.view.document_to_canvas())
    }

    pub(crate) fn register_layer(&mut self, layer: &Arc<LayerSnapshot>) {
        if let Some(listener) = self.listener {
            if self
                .tree
                .add_listener(layer.key(), listener.clone())
                .is_err()
            {
                log::warn!("[render] could not subscribe to layer {:?}", layer.key());
            }
        }
        self.new_layers.push(Arc::downgrade(layer));
    }
}

/// Renderable copy of one scene node.
///
/// `sync` takes the snapshot's write lock only when the node changed. `prepare_rendering`
/// rasterizes with no lock held and installs the result under the write lock if no sync
/// happened in between. `render` only reads.
pub(crate) trait ObjectSnapshot: Send + Sync {
    fn key(&self) -> NodeKey;

    fn kind(&self) -> SnapshotKind;

    /// Copies live state if the node changed since the last sync. Returns whether it did.
    fn sync(&self, ctx: &mut SyncContext<'_>) -> bool;

    /// Computes coverage for the synced state if it is outdated.
    fn prepare_rendering(&self, canvas_bounds: Rect);

    /// Composites the node into `target` inside `area`.
    fn render(&self, ctx: &mut RenderContext, target: &mut Bitmap, area: Rect);

    /// Canvas-space bounds of what the node paints.
    fn area(&self) -> Rect;

    fn needs_rasterizing(&self) -> bool;

    /// Distance the node reads around each pixel it writes; non-zero only for blurs.
    fn filter_outset(&self) -> i32 {
        0
    }

    fn stats(&self) -> SnapshotStats;

    fn as_layer(&self) -> Option<&LayerSnapshot> {
        None
    }
}

/// Rasterized pixels of one object and the part of them that is up to date.
#[derive(Debug, Default)]
pub(crate) struct ContentCache {
    bitmap: Option<Bitmap>,
    valid: Region,
}

impl ContentCache {
    pub(crate) fn invalidate(&mut self) {
        self.valid.clear();
    }

    /// Makes `area` valid inside a cache covering `bounds`, calling `fill` on each
    /// missing rect after clearing it. Returns whether anything was rasterized.
    pub(crate) fn ensure(
        &mut self,
        bounds: Rect,
        area: Rect,
        mut fill: impl FnMut(&mut Bitmap, Rect),
    ) -> Result<bool, AllocError> {
        let area = area.intersect(bounds);
        if area.is_empty() {
            return Ok(false);
        }
        if self.bitmap.as_ref().map(Bitmap::bounds) != Some(bounds) {
            self.valid.clear();
            if let Some(bitmap) = self.bitmap.as_mut() {
                bitmap.reposition(bounds)?;
            } else {
                self.bitmap = Some(Bitmap::try_new(bounds)?);
            }
        }
        let Some(bitmap) = self.bitmap.as_mut() else {
            return Ok(false);
        };
        let mut missing = Region::from_rect(area);
        missing.subtract_region(&self.valid);
        if missing.is_empty() {
            return Ok(false);
        }
        for rect in missing.rects() {
            bitmap.clear(*rect);
            fill(bitmap, *rect);
        }
        self.valid.add_region(&missing);
        Ok(true)
    }

    pub(crate) fn bitmap(&self) -> Option<&Bitmap> {
        self.bitmap.as_ref()
    }
}

pub(crate) fn read_state<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        log::error!("[render] snapshot lock poisoned, recovering");
        poisoned.into_inner()
    })
}

pub(crate) fn write_state<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        log::error!("[render] snapshot lock poisoned, recovering");
        poisoned.into_inner()
    })
}

pub(crate) fn lock_cache<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        log::error!("[render] cache lock poisoned, recovering");
        poisoned.into_inner()
    })
}
