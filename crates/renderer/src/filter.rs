//! Filter nodes: pixel operations over everything composited below them in their layer.

use std::sync::RwLock;

use document::Content;
use model::{Bitmap, Pixel, Rect};
use render_protocol::{FilterKind, NodeKey};

use crate::snapshot::{
    ObjectSnapshot, SnapshotCounters, SnapshotKind, SnapshotStats, SyncContext, SyncedStamp,
    read_state, write_state,
};
use crate::worker::RenderContext;

#[derive(Debug)]
struct FilterState {
    kind: FilterKind,
    opacity: u8,
    area: Rect,
    outset: i32,
}

/// Snapshot of a filter node. Filters hold no coverage; rendering rewrites the
/// target in place.
#[derive(Debug)]
pub(crate) struct FilterSnapshot {
    key: NodeKey,
    synced: SyncedStamp,
    state: RwLock<FilterState>,
    counters: SnapshotCounters,
}

impl FilterSnapshot {
    pub(crate) fn new(key: NodeKey) -> Self {
        Self {
            key,
            synced: SyncedStamp::default(),
            state: RwLock::new(FilterState {
                kind: FilterKind::Invert,
                opacity: 255,
                area: Rect::EMPTY,
                outset: 0,
            }),
            counters: SnapshotCounters::default(),
        }
    }
}

impl ObjectSnapshot for FilterSnapshot {
    fn key(&self) -> NodeKey {
        self.key
    }

    fn kind(&self) -> SnapshotKind {
        SnapshotKind::Filter
    }

    fn sync(&self, ctx: &mut SyncContext<'_>) -> bool {
        let Some(node) = ctx.tree.node(self.key) else {
            return false;
        };
        let stamp = ctx.stamp(node);
        if self.synced.matches(stamp) {
            return false;
        }
        let Some(Content::Filter(kind)) = node.content() else {
            return false;
        };
        let mut state = write_state(&self.state);
        state.kind = *kind;
        state.opacity = node.paint().opacity_u8();
        state.area = ctx.canvas();
        state.outset = kind.outset(ctx.view.zoom().get());
        drop(state);
        self.synced.store(stamp);
        self.counters.note_sync();
        true
    }

    fn prepare_rendering(&self, _canvas_bounds: Rect) {
        self.counters.note_prepare();
    }

    fn render(&self, _ctx: &mut RenderContext, target: &mut Bitmap, area: Rect) {
        let state = read_state(&self.state);
        let area = area.intersect(state.area);
        if area.is_empty() || state.opacity == 0 {
            return;
        }
        apply_filter(state.kind, state.outset, state.opacity, target, area);
    }

    fn area(&self) -> Rect {
        read_state(&self.state).area
    }

    fn needs_rasterizing(&self) -> bool {
        false
    }

    fn filter_outset(&self) -> i32 {
        read_state(&self.state).outset
    }

    fn stats(&self) -> SnapshotStats {
        self.counters.stats()
    }
}

/// Runs `kind` over `area` of `target`, mixing the result with the input by `opacity`.
///
/// `outset` is the blur radius in canvas pixels; pixels outside `target` count as transparent.
pub(crate) fn apply_filter(
    kind: FilterKind,
    outset: i32,
    opacity: u8,
    target: &mut Bitmap,
    area: Rect,
) {
    let area = area.intersect(target.bounds());
    if area.is_empty() {
        return;
    }
    match kind {
        FilterKind::Invert => map_pixels(target, area, opacity, invert),
        FilterKind::Grayscale => map_pixels(target, area, opacity, grayscale),
        FilterKind::BoxBlur { .. } => {
            if outset > 0 {
                box_blur(target, area, outset, opacity);
            }
        }
    }
}

fn invert(pixel: Pixel) -> Pixel {
    Pixel {
        r: pixel.a - pixel.r.min(pixel.a),
        g: pixel.a - pixel.g.min(pixel.a),
        b: pixel.a - pixel.b.min(pixel.a),
        a: pixel.a,
    }
}

fn grayscale(pixel: Pixel) -> Pixel {
    let luma = (77 * u32::from(pixel.r) + 150 * u32::from(pixel.g) + 29 * u32::from(pixel.b)) >> 8;
    let luma = luma.min(u32::from(pixel.a)) as u8;
    Pixel {
        r: luma,
        g: luma,
        b: luma,
        a: pixel.a,
    }
}

fn mix(original: Pixel, filtered: Pixel, opacity: u8) -> Pixel {
    if opacity == 255 {
        return filtered;
    }
    let weight = u32::from(opacity);
    let lerp = |from: u8, to: u8| {
        ((u32::from(from) * (255 - weight) + u32::from(to) * weight + 127) / 255) as u8
    };
    Pixel {
        r: lerp(original.r, filtered.r),
        g: lerp(original.g, filtered.g),
        b: lerp(original.b, filtered.b),
        a: lerp(original.a, filtered.a),
    }
}

fn map_pixels(target: &mut Bitmap, area: Rect, opacity: u8, op: fn(Pixel) -> Pixel) {
    target.for_each_row_mut(area, |_, _, row| {
        for pixel in row {
            *pixel = mix(*pixel, op(*pixel), opacity);
        }
    });
}

type Sum = [u32; 4];

fn add(sum: &mut Sum, pixel: Pixel) {
    sum[0] += u32::from(pixel.r);
    sum[1] += u32::from(pixel.g);
    sum[2] += u32::from(pixel.b);
    sum[3] += u32::from(pixel.a);
}

fn average(high: Sum, low: Sum, divisor: u32) -> Pixel {
    let channel = |index: usize| ((high[index] - low[index] + divisor / 2) / divisor).min(255) as u8;
    Pixel {
        r: channel(0),
        g: channel(1),
        b: channel(2),
        a: channel(3),
    }
}

// Separable box blur: a horizontal pass over every row the vertical pass reads, then
// a vertical pass that writes `area`. The divisor stays 2r+1 at the edges.
fn box_blur(target: &mut Bitmap, area: Rect, radius: i32, opacity: u8) {
    let work = area.inflate(radius).intersect(target.bounds());
    let divisor = (2 * radius + 1) as u32;
    let columns = area.width() as usize;
    let rows = work.height() as usize;
    let mut horizontal = vec![Pixel::TRANSPARENT; columns * rows];
    let mut prefix: Vec<Sum> = Vec::with_capacity(work.width().max(work.height()) as usize + 1);

    for (row_index, y) in (work.min_y..work.max_y).enumerate() {
        prefix.clear();
        let mut running = [0u32; 4];
        prefix.push(running);
        for pixel in target.row(y, work.min_x, work.max_x) {
            add(&mut running, *pixel);
            prefix.push(running);
        }
        let out = &mut horizontal[row_index * columns..(row_index + 1) * columns];
        for (column, value) in out.iter_mut().enumerate() {
            let x = area.min_x + column as i32;
            let low = ((x - radius).max(work.min_x) - work.min_x) as usize;
            let high = ((x + radius + 1).min(work.max_x) - work.min_x) as usize;
            *value = average(prefix[high], prefix[low], divisor);
        }
    }

    for column in 0..columns {
        prefix.clear();
        let mut running = [0u32; 4];
        prefix.push(running);
        for row_index in 0..rows {
            add(&mut running, horizontal[row_index * columns + column]);
            prefix.push(running);
        }
        let x = area.min_x + column as i32;
        for y in area.min_y..area.max_y {
            let low = ((y - radius).max(work.min_y) - work.min_y) as usize;
            let high = ((y + radius + 1).min(work.max_y) - work.min_y) as usize;
            let blurred = average(prefix[high], prefix[low], divisor);
            if let Some(original) = target.pixel(x, y) {
                target.set_pixel(x, y, mix(original, blurred, opacity));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::Color;

    fn solid(bounds: Rect, color: Color) -> Bitmap {
        let mut bitmap = Bitmap::try_new(bounds).expect("alloc");
        bitmap.fill(bounds, Pixel::from_color(color));
        bitmap
    }

    #[test]
    fn invert_keeps_alpha_and_stays_premultiplied() {
        let mut bitmap = solid(Rect::new(0, 0, 2, 2), Color::rgba(255, 0, 0, 128));
        apply_filter(FilterKind::Invert, 0, 255, &mut bitmap, Rect::new(0, 0, 1, 1));
        let inverted = bitmap.pixel(0, 0).expect("in bounds");
        assert_eq!(inverted, Pixel { r: 0, g: 128, b: 128, a: 128 });
        assert_eq!(bitmap.pixel(1, 1), Some(Pixel::from_color(Color::rgba(255, 0, 0, 128))));
    }

    #[test]
    fn grayscale_equalizes_channels() {
        let mut bitmap = solid(Rect::new(0, 0, 1, 1), Color::rgb(255, 0, 0));
        let bounds = bitmap.bounds();
        apply_filter(FilterKind::Grayscale, 0, 255, &mut bitmap, bounds);
        let gray = bitmap.pixel(0, 0).expect("in bounds");
        assert_eq!((gray.r, gray.g, gray.b, gray.a), (76, 76, 76, 255));
    }

    #[test]
    fn blur_spreads_an_edge_and_leaves_flat_areas_alone() {
        let bounds = Rect::new(0, 0, 12, 4);
        let mut bitmap = Bitmap::try_new(bounds).expect("alloc");
        bitmap.fill(Rect::new(0, 0, 6, 4), Pixel::from_color(Color::WHITE));
        let blur = FilterKind::BoxBlur { radius: 1.0 };
        apply_filter(blur, blur.outset(1.0), 255, &mut bitmap, Rect::new(2, 1, 10, 3));
        assert_eq!(bitmap.pixel(3, 1).map(|pixel| pixel.a), Some(255));
        assert_eq!(bitmap.pixel(5, 1).map(|pixel| pixel.a), Some(170));
        assert_eq!(bitmap.pixel(6, 1).map(|pixel| pixel.a), Some(85));
        assert_eq!(bitmap.pixel(8, 1).map(|pixel| pixel.a), Some(0));
        assert_eq!(bitmap.pixel(5, 0).map(|pixel| pixel.a), Some(255));
    }

    #[test]
    fn half_opacity_mixes_with_the_input() {
        let mut bitmap = solid(Rect::new(0, 0, 1, 1), Color::BLACK);
        let bounds = bitmap.bounds();
        apply_filter(FilterKind::Invert, 0, 128, &mut bitmap, bounds);
        let mixed = bitmap.pixel(0, 0).expect("in bounds");
        assert_eq!((mixed.r, mixed.a), (128, 255));
    }
}
