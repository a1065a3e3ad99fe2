use bitvec::vec::BitVec;

use crate::{AllocError, Bitmap, BlendMode, MAX_BITMAP_PIXELS, Pixel, Rect};

/// 8-bit alpha mask over `bounds`, with one occupancy bit per row.
///
/// Rows never touched by the rasterizer stay unmarked and are skipped when painting.
#[derive(Debug, Clone)]
pub struct Coverage {
    bounds: Rect,
    alpha: Vec<u8>,
    occupied_rows: BitVec,
}

impl Coverage {
    pub fn empty() -> Self {
        Self {
            bounds: Rect::EMPTY,
            alpha: Vec::new(),
            occupied_rows: BitVec::new(),
        }
    }

    pub fn try_new(bounds: Rect) -> Result<Self, AllocError> {
        if bounds.is_empty() {
            return Ok(Self::empty());
        }
        let error = AllocError {
            width: bounds.width(),
            height: bounds.height(),
        };
        if bounds.area() > MAX_BITMAP_PIXELS {
            return Err(error);
        }
        let len = usize::try_from(bounds.area()).map_err(|_| error)?;
        let mut alpha = Vec::new();
        alpha.try_reserve_exact(len).map_err(|_| error)?;
        alpha.resize(len, 0);
        Ok(Self {
            bounds,
            alpha,
            occupied_rows: BitVec::repeat(false, bounds.height() as usize),
        })
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn is_empty(&self) -> bool {
        self.occupied_rows.not_any()
    }

    pub fn alpha_at(&self, x: i32, y: i32) -> u8 {
        if !self.bounds.contains_point(x, y) {
            return 0;
        }
        let row = (y - self.bounds.min_y) as usize;
        let column = (x - self.bounds.min_x) as usize;
        self.alpha[row * self.bounds.width() as usize + column]
    }

    pub fn row(&self, y: i32) -> Option<&[u8]> {
        if y < self.bounds.min_y || y >= self.bounds.max_y {
            return None;
        }
        let row = (y - self.bounds.min_y) as usize;
        if !self.occupied_rows[row] {
            return None;
        }
        let width = self.bounds.width() as usize;
        Some(&self.alpha[row * width..(row + 1) * width])
    }

    /// Mutable row `y`, marking it occupied.
    pub fn row_mut(&mut self, y: i32) -> Option<&mut [u8]> {
        if y < self.bounds.min_y || y >= self.bounds.max_y {
            return None;
        }
        let row = (y - self.bounds.min_y) as usize;
        self.occupied_rows.set(row, true);
        let width = self.bounds.width() as usize;
        Some(&mut self.alpha[row * width..(row + 1) * width])
    }

    /// Tight bounds of the occupied rows, spanning the full mask width.
    pub fn occupied_bounds(&self) -> Rect {
        let first = self.occupied_rows.first_one();
        let last = self.occupied_rows.last_one();
        match (first, last) {
            (Some(first), Some(last)) => Rect::new(
                self.bounds.min_x,
                self.bounds.min_y + first as i32,
                self.bounds.max_x,
                self.bounds.min_y + last as i32 + 1,
            ),
            _ => Rect::EMPTY,
        }
    }

    /// Fills `pixel` through the mask into `target` inside `area`.
    pub fn paint(&self, target: &mut Bitmap, area: Rect, pixel: Pixel, mode: BlendMode) {
        let area = area.intersect(self.bounds).intersect(target.bounds());
        if area.is_empty() {
            return;
        }
        let offset = (area.min_x - self.bounds.min_x) as usize;
        let span = area.width() as usize;
        for y in area.min_y..area.max_y {
            let Some(mask) = self.row(y) else {
                continue;
            };
            let mask = &mask[offset..offset + span];
            let dst = target.row_mut(y, area.min_x, area.max_x);
            for (dst_pixel, alpha) in dst.iter_mut().zip(mask) {
                if *alpha != 0 {
                    *dst_pixel = pixel.scale(*alpha).blend_onto(*dst_pixel, mode);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Color;

    #[test]
    fn untouched_rows_are_unoccupied() {
        let mut coverage = Coverage::try_new(Rect::new(0, 0, 4, 4)).expect("alloc");
        assert!(coverage.is_empty());
        coverage.row_mut(2).expect("row in bounds")[1] = 255;
        assert!(!coverage.is_empty());
        assert!(coverage.row(1).is_none());
        assert_eq!(coverage.alpha_at(1, 2), 255);
        assert_eq!(coverage.occupied_bounds(), Rect::new(0, 2, 4, 3));
    }

    #[test]
    fn paint_only_touches_covered_pixels() {
        let mut coverage = Coverage::try_new(Rect::new(0, 0, 4, 4)).expect("alloc");
        coverage.row_mut(0).expect("row")[0] = 255;
        let mut target = Bitmap::try_new(Rect::new(0, 0, 4, 4)).expect("alloc");
        let red = Pixel::from_color(Color::rgb(255, 0, 0));
        let bounds = target.bounds();
        coverage.paint(&mut target, bounds, red, BlendMode::Normal);
        assert_eq!(target.pixel(0, 0), Some(red));
        assert_eq!(target.pixel(1, 0), Some(Pixel::TRANSPARENT));
        assert_eq!(target.pixel(0, 1), Some(Pixel::TRANSPARENT));
    }
}
