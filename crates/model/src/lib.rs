//! Geometry and pixel model shared by the document and the renderer.
//!
//! Everything in here is plain data: integer rectangles and rect-set regions for
//! dirty/clean bookkeeping, a 3x3 projective transform, premultiplied RGBA bitmaps
//! and the alpha coverage masks produced by the rasterizer.

mod bitmap;
mod coverage;
mod region;
mod transform;

use smallvec::SmallVec;

pub use bitmap::{AllocError, Bitmap, BlendMode, Color, MAX_BITMAP_PIXELS, Pixel};
pub use coverage::Coverage;
pub use region::Region;
pub use transform::{Point, Transform};

/// Edge length of the square render tiles the dirty region is split into.
pub const TILE_SIZE: u32 = 64;

// Keeps rounded-out float rects far away from i32 overflow in later arithmetic.
const COORDINATE_LIMIT: f64 = (1 << 29) as f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Rect {
    pub const EMPTY: Self = Self {
        min_x: 0,
        min_y: 0,
        max_x: 0,
        max_y: 0,
    };

    pub const fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self::new(x, y, x.saturating_add(width), y.saturating_add(height))
    }

    /// Smallest integer rect containing the given float bounds.
    ///
    /// Non-finite input yields [`Rect::EMPTY`].
    pub fn round_out(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        if !(min_x.is_finite() && min_y.is_finite() && max_x.is_finite() && max_y.is_finite()) {
            return Self::EMPTY;
        }
        let clamp = |value: f64| value.clamp(-COORDINATE_LIMIT, COORDINATE_LIMIT);
        Self::new(
            clamp(min_x).floor() as i32,
            clamp(min_y).floor() as i32,
            clamp(max_x).ceil() as i32,
            clamp(max_y).ceil() as i32,
        )
    }

    pub fn width(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.max_x.abs_diff(self.min_x)
        }
    }

    pub fn height(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.max_y.abs_diff(self.min_y)
        }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    pub fn is_empty(&self) -> bool {
        self.min_x >= self.max_x || self.min_y >= self.max_y
    }

    pub fn intersect(&self, other: Rect) -> Rect {
        let clipped = Rect::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        );
        if clipped.is_empty() {
            Rect::EMPTY
        } else {
            clipped
        }
    }

    pub fn intersects(&self, other: Rect) -> bool {
        !self.intersect(other).is_empty()
    }

    pub fn union(&self, other: Rect) -> Rect {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.min_x && x < self.max_x && y >= self.min_y && y < self.max_y
    }

    pub fn contains_rect(&self, other: Rect) -> bool {
        other.is_empty()
            || (other.min_x >= self.min_x
                && other.min_y >= self.min_y
                && other.max_x <= self.max_x
                && other.max_y <= self.max_y)
    }

    pub fn inflate(&self, amount: i32) -> Rect {
        if self.is_empty() || amount == 0 {
            return *self;
        }
        let inflated = Rect::new(
            self.min_x.saturating_sub(amount),
            self.min_y.saturating_sub(amount),
            self.max_x.saturating_add(amount),
            self.max_y.saturating_add(amount),
        );
        if inflated.is_empty() {
            Rect::EMPTY
        } else {
            inflated
        }
    }

    pub fn translate(&self, delta_x: i32, delta_y: i32) -> Rect {
        Rect::new(
            self.min_x.saturating_add(delta_x),
            self.min_y.saturating_add(delta_y),
            self.max_x.saturating_add(delta_x),
            self.max_y.saturating_add(delta_y),
        )
    }

    /// The parts of `self` not covered by `other`, as at most four disjoint rects.
    pub fn subtract(&self, other: Rect) -> SmallVec<[Rect; 4]> {
        let mut pieces = SmallVec::new();
        if self.is_empty() {
            return pieces;
        }
        let overlap = self.intersect(other);
        if overlap.is_empty() {
            pieces.push(*self);
            return pieces;
        }
        if self.min_y < overlap.min_y {
            pieces.push(Rect::new(self.min_x, self.min_y, self.max_x, overlap.min_y));
        }
        if overlap.max_y < self.max_y {
            pieces.push(Rect::new(self.min_x, overlap.max_y, self.max_x, self.max_y));
        }
        if self.min_x < overlap.min_x {
            pieces.push(Rect::new(self.min_x, overlap.min_y, overlap.min_x, overlap.max_y));
        }
        if overlap.max_x < self.max_x {
            pieces.push(Rect::new(overlap.max_x, overlap.min_y, self.max_x, overlap.max_y));
        }
        pieces
    }

    /// Splits the rect along a grid of `tile_size` cells anchored at the origin.
    ///
    /// Tiles are yielded row by row, top to bottom, each clipped to `self`.
    pub fn tiles(self, tile_size: u32) -> impl Iterator<Item = Rect> {
        let size = tile_size.clamp(1, i32::MAX as u32) as i32;
        let (first_x, first_y, end_x, end_y) = if self.is_empty() {
            (0, 0, 0, 0)
        } else {
            (
                self.min_x.div_euclid(size),
                self.min_y.div_euclid(size),
                (self.max_x - 1).div_euclid(size) + 1,
                (self.max_y - 1).div_euclid(size) + 1,
            )
        };
        (first_y..end_y).flat_map(move |tile_y| {
            (first_x..end_x).map(move |tile_x| {
                Rect::from_xywh(tile_x * size, tile_y * size, size, size).intersect(self)
            })
        })
    }
}
