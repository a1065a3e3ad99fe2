//! Anti-aliased coverage for vector geometry.
//!
//! Fills use 4x4 supersampling with the non-zero winding rule. Strokes test each
//! subsample against the distance to the polyline, which yields round caps and joins.

use document::Content;
use model::{AllocError, Bitmap, Coverage, Point, Rect, Transform};

const SUBSAMPLES: i32 = 4;
const SAMPLES_PER_PIXEL: u32 = (SUBSAMPLES * SUBSAMPLES) as u32;
const ARC_SEGMENTS: usize = 8;
// Half the diagonal of a pixel: pixels this far from the stroke edge are all-or-nothing.
const HALF_PIXEL_DIAGONAL: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Coverage of `content` under `transform`, restricted to `clip`.
///
/// Images and filters have no coverage and yield an empty mask.
pub(crate) fn rasterize(
    content: &Content,
    transform: &Transform,
    clip: Rect,
) -> Result<Coverage, AllocError> {
    if clip.is_empty() {
        return Ok(Coverage::empty());
    }
    match content {
        Content::Rectangle {
            min,
            max,
            corner_radius,
        } => fill_contours(
            &[rounded_rect(*min, *max, *corner_radius)],
            transform,
            clip,
        ),
        Content::Shape { contours } => fill_contours(contours, transform, clip),
        Content::Stroke { points, width } => stroke_polyline(points, *width, transform, clip),
        Content::Image { .. } | Content::Filter(_) => Ok(Coverage::empty()),
    }
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    x_top: f64,
    y_top: f64,
    y_bottom: f64,
    slope: f64,
    winding: i32,
}

impl Edge {
    fn new(from: Point, to: Point) -> Option<Self> {
        if from.y == to.y {
            return None;
        }
        let (top, bottom, winding) = if from.y < to.y {
            (from, to, 1)
        } else {
            (to, from, -1)
        };
        Some(Self {
            x_top: top.x,
            y_top: top.y,
            y_bottom: bottom.y,
            slope: (bottom.x - top.x) / (bottom.y - top.y),
            winding,
        })
    }

    fn x_at(&self, y: f64) -> f64 {
        self.x_top + (y - self.y_top) * self.slope
    }
}

fn rounded_rect(min: Point, max: Point, corner_radius: f64) -> Vec<Point> {
    let low = Point::new(min.x.min(max.x), min.y.min(max.y));
    let high = Point::new(min.x.max(max.x), min.y.max(max.y));
    let radius = if corner_radius.is_finite() {
        corner_radius
            .max(0.0)
            .min((high.x - low.x) / 2.0)
            .min((high.y - low.y) / 2.0)
    } else {
        0.0
    };
    if radius <= 0.0 {
        return vec![
            low,
            Point::new(high.x, low.y),
            high,
            Point::new(low.x, high.y),
        ];
    }
    let corners = [
        (Point::new(low.x + radius, low.y + radius), 1.0),
        (Point::new(high.x - radius, low.y + radius), 1.5),
        (Point::new(high.x - radius, high.y - radius), 0.0),
        (Point::new(low.x + radius, high.y - radius), 0.5),
    ];
    let mut points = Vec::with_capacity(corners.len() * (ARC_SEGMENTS + 1));
    for (center, start_turns) in corners {
        for step in 0..=ARC_SEGMENTS {
            let angle = std::f64::consts::PI
                * (start_turns + 0.5 * step as f64 / ARC_SEGMENTS as f64);
            points.push(Point::new(
                center.x + radius * angle.cos(),
                center.y + radius * angle.sin(),
            ));
        }
    }
    points
}

fn fill_contours(
    contours: &[Vec<Point>],
    transform: &Transform,
    clip: Rect,
) -> Result<Coverage, AllocError> {
    let mut edges = Vec::new();
    for contour in contours {
        if contour.len() < 3 {
            continue;
        }
        let Some(mapped) = contour
            .iter()
            .map(|point| transform.map_point(*point))
            .collect::<Option<Vec<Point>>>()
        else {
            return Ok(Coverage::empty());
        };
        for (index, from) in mapped.iter().enumerate() {
            let to = mapped[(index + 1) % mapped.len()];
            edges.extend(Edge::new(*from, to));
        }
    }
    if edges.is_empty() {
        return Ok(Coverage::empty());
    }
    edges.sort_by(|left, right| left.y_top.total_cmp(&right.y_top));

    let mut coverage = Coverage::try_new(clip)?;
    let width = clip.width() as usize;
    let mut counts = vec![0u8; width];
    let mut active: Vec<usize> = Vec::new();
    let mut crossings: Vec<(f64, i32)> = Vec::new();
    let mut next_edge = 0;

    for y in clip.min_y..clip.max_y {
        let row_top = f64::from(y);
        let row_bottom = row_top + 1.0;
        while next_edge < edges.len() && edges[next_edge].y_top < row_bottom {
            active.push(next_edge);
            next_edge += 1;
        }
        active.retain(|index| edges[*index].y_bottom > row_top);
        if active.is_empty() {
            continue;
        }

        counts.fill(0);
        let mut touched = false;
        for sub_row in 0..SUBSAMPLES {
            let sample_y = row_top + (f64::from(sub_row) + 0.5) / f64::from(SUBSAMPLES);
            crossings.clear();
            for index in &active {
                let edge = &edges[*index];
                if edge.y_top <= sample_y && sample_y < edge.y_bottom {
                    crossings.push((edge.x_at(sample_y), edge.winding));
                }
            }
            if crossings.len() < 2 {
                continue;
            }
            crossings.sort_by(|left, right| left.0.total_cmp(&right.0));
            let mut winding = 0;
            let mut span_start = 0.0;
            for (x, direction) in &crossings {
                let before = winding;
                winding += direction;
                if before == 0 && winding != 0 {
                    span_start = *x;
                } else if before != 0 && winding == 0 {
                    touched |= accumulate_span(&mut counts, clip.min_x, span_start, *x);
                }
            }
        }

        if !touched {
            continue;
        }
        if let Some(row) = coverage.row_mut(y) {
            for (alpha, count) in row.iter_mut().zip(&counts) {
                *alpha = count_to_alpha(u32::from(*count));
            }
        }
    }
    Ok(coverage)
}

// Adds one hit per horizontal subsample whose center lies in [start, end).
fn accumulate_span(counts: &mut [u8], origin_x: i32, start: f64, end: f64) -> bool {
    let scale = f64::from(SUBSAMPLES);
    let limit = (counts.len() as i64) * i64::from(SUBSAMPLES);
    let local_start = (start - f64::from(origin_x)) * scale - 0.5;
    let local_end = (end - f64::from(origin_x)) * scale - 0.5;
    let first = (local_start.ceil().max(0.0) as i64).min(limit);
    let last = (local_end.ceil().max(0.0) as i64).min(limit);
    if first >= last {
        return false;
    }
    for sample in first..last {
        counts[(sample / i64::from(SUBSAMPLES)) as usize] += 1;
    }
    true
}

fn count_to_alpha(count: u32) -> u8 {
    ((count.min(SAMPLES_PER_PIXEL) * 255 + SAMPLES_PER_PIXEL / 2) / SAMPLES_PER_PIXEL) as u8
}

fn stroke_polyline(
    points: &[Point],
    width: f64,
    transform: &Transform,
    clip: Rect,
) -> Result<Coverage, AllocError> {
    let half_width = width.max(0.0) / 2.0 * transform.approximate_scale();
    if !half_width.is_finite() || half_width <= 0.0 || points.is_empty() {
        return Ok(Coverage::empty());
    }
    let Some(mapped) = points
        .iter()
        .map(|point| transform.map_point(*point))
        .collect::<Option<Vec<Point>>>()
    else {
        return Ok(Coverage::empty());
    };
    let segments: Vec<(Point, Point)> = if mapped.len() == 1 {
        vec![(mapped[0], mapped[0])]
    } else {
        mapped.windows(2).map(|pair| (pair[0], pair[1])).collect()
    };

    let allocation_error = AllocError {
        width: clip.width(),
        height: clip.height(),
    };
    let len = usize::try_from(clip.area()).map_err(|_| allocation_error)?;
    let mut masks: Vec<u16> = Vec::new();
    masks
        .try_reserve_exact(len)
        .map_err(|_| allocation_error)?;
    masks.resize(len, 0);
    let row_len = clip.width() as usize;

    for (from, to) in &segments {
        let bounds = Rect::round_out(
            from.x.min(to.x) - half_width,
            from.y.min(to.y) - half_width,
            from.x.max(to.x) + half_width,
            from.y.max(to.y) + half_width,
        )
        .intersect(clip);
        for y in bounds.min_y..bounds.max_y {
            let row_offset = (y - clip.min_y) as usize * row_len;
            for x in bounds.min_x..bounds.max_x {
                let mask = &mut masks[row_offset + (x - clip.min_x) as usize];
                if *mask == u16::MAX {
                    continue;
                }
                let center = Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5);
                let distance = distance_to_segment(center, *from, *to);
                if distance <= half_width - HALF_PIXEL_DIAGONAL {
                    *mask = u16::MAX;
                    continue;
                }
                if distance > half_width + HALF_PIXEL_DIAGONAL {
                    continue;
                }
                *mask |= subsample_mask(x, y, *from, *to, half_width);
            }
        }
    }

    let mut coverage = Coverage::try_new(clip)?;
    for (row_index, row_masks) in masks.chunks(row_len).enumerate() {
        if row_masks.iter().all(|mask| *mask == 0) {
            continue;
        }
        if let Some(row) = coverage.row_mut(clip.min_y + row_index as i32) {
            for (alpha, mask) in row.iter_mut().zip(row_masks) {
                *alpha = count_to_alpha(mask.count_ones());
            }
        }
    }
    Ok(coverage)
}

fn subsample_mask(x: i32, y: i32, from: Point, to: Point, half_width: f64) -> u16 {
    let mut mask = 0u16;
    for sub_y in 0..SUBSAMPLES {
        for sub_x in 0..SUBSAMPLES {
            let sample = Point::new(
                f64::from(x) + (f64::from(sub_x) + 0.5) / f64::from(SUBSAMPLES),
                f64::from(y) + (f64::from(sub_y) + 0.5) / f64::from(SUBSAMPLES),
            );
            if distance_to_segment(sample, from, to) <= half_width {
                mask |= 1 << (sub_y * SUBSAMPLES + sub_x);
            }
        }
    }
    mask
}

fn distance_to_segment(point: Point, from: Point, to: Point) -> f64 {
    let delta_x = to.x - from.x;
    let delta_y = to.y - from.y;
    let length_squared = delta_x * delta_x + delta_y * delta_y;
    let t = if length_squared <= f64::EPSILON {
        0.0
    } else {
        (((point.x - from.x) * delta_x + (point.y - from.y) * delta_y) / length_squared)
            .clamp(0.0, 1.0)
    };
    let closest_x = from.x + t * delta_x;
    let closest_y = from.y + t * delta_y;
    ((point.x - closest_x).powi(2) + (point.y - closest_y).powi(2)).sqrt()
}

/// Nearest-neighbour resampling of `source` through `inverse` (canvas to image space).
pub(crate) fn sample_image(source: &Bitmap, inverse: &Transform, target: &mut Bitmap, area: Rect) {
    target.for_each_row_mut(area, |y, min_x, row| {
        let center_y = f64::from(y) + 0.5;
        for (offset, pixel) in row.iter_mut().enumerate() {
            let center = Point::new(f64::from(min_x) + offset as f64 + 0.5, center_y);
            let Some(local) = inverse.map_point(center) else {
                continue;
            };
            if let Some(sampled) = source.pixel(local.x.floor() as i32, local.y.floor() as i32) {
                *pixel = sampled;
            }
        }
    });
}
