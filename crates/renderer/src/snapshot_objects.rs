//! Snapshots of drawable leaves: vector geometry and placed images.

use std::sync::{Arc, Mutex, RwLock};

use document::{Content, SceneNode};
use model::{AllocError, Bitmap, BlendMode, Coverage, Pixel, Point, Rect, Transform};
use render_protocol::{NodeKey, Paint};

use crate::raster;
use crate::snapshot::{
    ContentCache, ObjectSnapshot, SnapshotCounters, SnapshotKind, SnapshotStats, SyncContext,
    SyncStamp, SyncedStamp, lock_cache, read_state, write_state,
};
use crate::worker::RenderContext;

/// Canvas-space bounds of `content` drawn through `transform`, clipped to `canvas`.
fn canvas_area(content: &Content, transform: &Transform, canvas: Rect) -> Rect {
    let mapped = match content {
        Content::Stroke { points, width } => {
            let half_width = width.max(0.0) / 2.0 * transform.approximate_scale();
            if !half_width.is_finite() || half_width <= 0.0 {
                return Rect::EMPTY;
            }
            let mut low = Point::new(f64::INFINITY, f64::INFINITY);
            let mut high = Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
            for point in points.iter() {
                let Some(mapped) = transform.map_point(*point) else {
                    return Rect::EMPTY;
                };
                low = Point::new(low.x.min(mapped.x), low.y.min(mapped.y));
                high = Point::new(high.x.max(mapped.x), high.y.max(mapped.y));
            }
            Rect::round_out(
                low.x - half_width,
                low.y - half_width,
                high.x + half_width,
                high.y + half_width,
            )
        }
        _ => {
            let Some((min, max)) = content.local_bounds() else {
                return Rect::EMPTY;
            };
            match transform.map_bounds(min, max) {
                Some((low, high)) => Rect::round_out(low.x, low.y, high.x, high.y),
                None => Rect::EMPTY,
            }
        }
    };
    mapped.intersect(canvas)
}

/// Fills the missing part of `cache` inside `clip` and blends it onto `target`.
///
/// Without a cache bitmap the object is painted straight into `target`.
fn composite_cached(
    cache: &Mutex<ContentCache>,
    counters: &SnapshotCounters,
    target: &mut Bitmap,
    bounds: Rect,
    clip: Rect,
    paint: &Paint,
    mut fill: impl FnMut(&mut Bitmap, Rect),
) {
    let mut cache = lock_cache(cache);
    match cache.ensure(bounds, clip, &mut fill) {
        Ok(true) => counters.note_rasterize(),
        Ok(false) => {}
        Err(error) => {
            log::warn!("[render] content cache unavailable, painting uncached: {error}");
            drop(cache);
            paint_uncached(target, clip, paint, fill);
            return;
        }
    }
    if let Some(bitmap) = cache.bitmap() {
        target.blend_from(bitmap, clip, paint.blend, paint.opacity_u8());
    }
}

fn paint_uncached(
    target: &mut Bitmap,
    clip: Rect,
    paint: &Paint,
    mut fill: impl FnMut(&mut Bitmap, Rect),
) {
    match Bitmap::try_new(clip) {
        Ok(mut scratch) => {
            fill(&mut scratch, clip);
            target.blend_from(&scratch, clip, paint.blend, paint.opacity_u8());
        }
        Err(error) => log::warn!("[render] skipping object this frame: {error}"),
    }
}

#[derive(Debug)]
struct VectorState {
    stamp: Option<SyncStamp>,
    content: Option<Content>,
    transform: Transform,
    paint: Paint,
    area: Rect,
    canvas: Rect,
    needs_rasterizing: bool,
    coverage: Option<Coverage>,
}

/// Snapshot of a rectangle, shape or stroke.
#[derive(Debug)]
pub(crate) struct VectorSnapshot {
    key: NodeKey,
    synced: SyncedStamp,
    state: RwLock<VectorState>,
    content: Mutex<ContentCache>,
    counters: SnapshotCounters,
}

impl VectorSnapshot {
    pub(crate) fn new(key: NodeKey) -> Self {
        Self {
            key,
            synced: SyncedStamp::default(),
            state: RwLock::new(VectorState {
                stamp: None,
                content: None,
                transform: Transform::IDENTITY,
                paint: Paint::default(),
                area: Rect::EMPTY,
                canvas: Rect::EMPTY,
                needs_rasterizing: false,
                coverage: None,
            }),
            content: Mutex::new(ContentCache::default()),
            counters: SnapshotCounters::default(),
        }
    }
}

fn rasterize_or_skip(
    content: &Content,
    transform: &Transform,
    clip: Rect,
    key: NodeKey,
) -> Option<Coverage> {
    match raster::rasterize(content, transform, clip) {
        Ok(coverage) => Some(coverage),
        Err(AllocError { width, height }) => {
            log::warn!("[render] no coverage for {key:?} this frame ({width}x{height} mask)");
            None
        }
    }
}

impl ObjectSnapshot for VectorSnapshot {
    fn key(&self) -> NodeKey {
        self.key
    }

    fn kind(&self) -> SnapshotKind {
        SnapshotKind::Vector
    }

    fn sync(&self, ctx: &mut SyncContext<'_>) -> bool {
        let Some(node) = ctx.tree.node(self.key) else {
            return false;
        };
        let Some(content) = node.content() else {
            return false;
        };
        let stamp = ctx.stamp(node);
        if self.synced.matches(stamp) {
            return false;
        }
        let mut state = write_state(&self.state);
        let transform = ctx.to_canvas(node);
        let canvas = ctx.canvas();
        state.stamp = Some(stamp);
        state.area = canvas_area(content, &transform, canvas);
        state.content = Some(content.clone());
        state.transform = transform;
        state.paint = node.paint();
        state.canvas = canvas;
        state.needs_rasterizing = true;
        lock_cache(&self.content).invalidate();
        drop(state);
        self.synced.store(stamp);
        self.counters.note_sync();
        true
    }

    fn prepare_rendering(&self, canvas_bounds: Rect) {
        let (stamp, content, transform, clip) = {
            let state = read_state(&self.state);
            if !state.needs_rasterizing {
                return;
            }
            (
                state.stamp,
                state.content.clone(),
                state.transform,
                state.area.intersect(canvas_bounds),
            )
        };
        let coverage = content
            .as_ref()
            .and_then(|content| rasterize_or_skip(content, &transform, clip, self.key));

        let mut state = write_state(&self.state);
        if state.stamp != stamp || !state.needs_rasterizing {
            // Synced again or prepared by another thread meanwhile.
            return;
        }
        state.coverage = coverage;
        state.needs_rasterizing = false;
        lock_cache(&self.content).invalidate();
        drop(state);
        self.counters.note_prepare();
    }

    fn render(&self, _ctx: &mut RenderContext, target: &mut Bitmap, area: Rect) {
        let mut state = read_state(&self.state);
        if state.needs_rasterizing {
            let canvas = state.canvas;
            drop(state);
            self.prepare_rendering(canvas);
            state = read_state(&self.state);
        }
        let clip = area.intersect(state.area).intersect(target.bounds());
        if clip.is_empty() {
            return;
        }
        let Some(coverage) = state.coverage.as_ref() else {
            return;
        };
        let pixel = Pixel::from_color(state.paint.color);
        composite_cached(
            &self.content,
            &self.counters,
            target,
            state.area,
            clip,
            &state.paint,
            |bitmap, rect| coverage.paint(bitmap, rect, pixel, BlendMode::Normal),
        );
    }

    fn area(&self) -> Rect {
        read_state(&self.state).area
    }

    fn needs_rasterizing(&self) -> bool {
        read_state(&self.state).needs_rasterizing
    }

    fn stats(&self) -> SnapshotStats {
        self.counters.stats()
    }
}

#[derive(Debug)]
struct ImageState {
    stamp: Option<SyncStamp>,
    source: Option<Arc<Bitmap>>,
    transform: Transform,
    inverse: Option<Transform>,
    paint: Paint,
    area: Rect,
    canvas: Rect,
    needs_rasterizing: bool,
}

/// Snapshot of an image node. The source bitmap is shared with the document.
#[derive(Debug)]
pub(crate) struct ImageSnapshot {
    key: NodeKey,
    synced: SyncedStamp,
    state: RwLock<ImageState>,
    content: Mutex<ContentCache>,
    counters: SnapshotCounters,
}

impl ImageSnapshot {
    pub(crate) fn new(key: NodeKey) -> Self {
        Self {
            key,
            synced: SyncedStamp::default(),
            state: RwLock::new(ImageState {
                stamp: None,
                source: None,
                transform: Transform::IDENTITY,
                inverse: None,
                paint: Paint::default(),
                area: Rect::EMPTY,
                canvas: Rect::EMPTY,
                needs_rasterizing: false,
            }),
            content: Mutex::new(ContentCache::default()),
            counters: SnapshotCounters::default(),
        }
    }
}

fn image_source(node: &SceneNode) -> Option<(&Content, Arc<Bitmap>)> {
    match node.content() {
        Some(content @ Content::Image { bitmap }) => Some((content, Arc::clone(bitmap))),
        _ => None,
    }
}

impl ObjectSnapshot for ImageSnapshot {
    fn key(&self) -> NodeKey {
        self.key
    }

    fn kind(&self) -> SnapshotKind {
        SnapshotKind::Image
    }

    fn sync(&self, ctx: &mut SyncContext<'_>) -> bool {
        let Some(node) = ctx.tree.node(self.key) else {
            return false;
        };
        let Some((content, source)) = image_source(node) else {
            return false;
        };
        let stamp = ctx.stamp(node);
        if self.synced.matches(stamp) {
            return false;
        }
        let mut state = write_state(&self.state);
        let transform = ctx.to_canvas(node);
        let canvas = ctx.canvas();
        state.stamp = Some(stamp);
        state.area = canvas_area(content, &transform, canvas);
        state.source = Some(source);
        state.transform = transform;
        state.paint = node.paint();
        state.canvas = canvas;
        state.needs_rasterizing = true;
        lock_cache(&self.content).invalidate();
        drop(state);
        self.synced.store(stamp);
        self.counters.note_sync();
        true
    }

    fn prepare_rendering(&self, _canvas_bounds: Rect) {
        let (stamp, transform) = {
            let state = read_state(&self.state);
            if !state.needs_rasterizing {
                return;
            }
            (state.stamp, state.transform)
        };
        let inverse = transform.inverse();
        if inverse.is_none() {
            log::warn!("[render] image {:?} has a singular transform", self.key);
        }

        let mut state = write_state(&self.state);
        if state.stamp != stamp || !state.needs_rasterizing {
            return;
        }
        state.inverse = inverse;
        state.needs_rasterizing = false;
        lock_cache(&self.content).invalidate();
        drop(state);
        self.counters.note_prepare();
    }

    fn render(&self, _ctx: &mut RenderContext, target: &mut Bitmap, area: Rect) {
        let mut state = read_state(&self.state);
        if state.needs_rasterizing {
            let canvas = state.canvas;
            drop(state);
            self.prepare_rendering(canvas);
            state = read_state(&self.state);
        }
        let clip = area.intersect(state.area).intersect(target.bounds());
        if clip.is_empty() {
            return;
        }
        let (Some(source), Some(inverse)) = (state.source.as_ref(), state.inverse.as_ref()) else {
            return;
        };
        composite_cached(
            &self.content,
            &self.counters,
            target,
            state.area,
            clip,
            &state.paint,
            |bitmap, rect| raster::sample_image(source, inverse, bitmap, rect),
        );
    }

    fn area(&self) -> Rect {
        read_state(&self.state).area
    }

    fn needs_rasterizing(&self) -> bool {
        read_state(&self.state).needs_rasterizing
    }

    fn stats(&self) -> SnapshotStats {
        self.counters.stats()
    }
}
