use smallvec::SmallVec;

use crate::Rect;

/// A set of pixels stored as disjoint rectangles.
///
/// The representation is not canonical: two regions covering the same pixels may
/// hold different rect lists. Compare with [`Region::same_area`].
#[derive(Debug, Clone, Default)]
pub struct Region {
    rects: SmallVec<[Rect; 8]>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.add_rect(rect);
        region
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn bounds(&self) -> Rect {
        self.rects
            .iter()
            .fold(Rect::EMPTY, |bounds, rect| bounds.union(*rect))
    }

    pub fn area(&self) -> u64 {
        self.rects.iter().map(Rect::area).sum()
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    pub fn add_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        let mut pieces: SmallVec<[Rect; 8]> = SmallVec::new();
        pieces.push(rect);
        for existing in &self.rects {
            if pieces.is_empty() {
                return;
            }
            if !existing.intersects(rect) {
                continue;
            }
            pieces = pieces
                .into_iter()
                .flat_map(|piece| piece.subtract(*existing))
                .collect();
        }
        self.rects.extend(pieces);
        self.coalesce();
    }

    pub fn add_region(&mut self, other: &Region) {
        for rect in &other.rects {
            self.add_rect(*rect);
        }
    }

    pub fn subtract_rect(&mut self, rect: Rect) {
        if rect.is_empty() || !self.intersects_rect(rect) {
            return;
        }
        self.rects = self
            .rects
            .iter()
            .flat_map(|existing| existing.subtract(rect))
            .collect();
        self.coalesce();
    }

    pub fn subtract_region(&mut self, other: &Region) {
        for rect in &other.rects {
            self.subtract_rect(*rect);
        }
    }

    pub fn intersect_rect(&self, rect: Rect) -> Region {
        Region {
            rects: self
                .rects
                .iter()
                .map(|existing| existing.intersect(rect))
                .filter(|clipped| !clipped.is_empty())
                .collect(),
        }
    }

    pub fn intersects_rect(&self, rect: Rect) -> bool {
        self.rects.iter().any(|existing| existing.intersects(rect))
    }

    pub fn contains_rect(&self, rect: Rect) -> bool {
        let mut remainder = Region::from_rect(rect);
        remainder.subtract_region(self);
        remainder.is_empty()
    }

    pub fn covers(&self, other: &Region) -> bool {
        other.rects.iter().all(|rect| self.contains_rect(*rect))
    }

    pub fn same_area(&self, other: &Region) -> bool {
        self.area() == other.area() && self.covers(other)
    }

    // Merges neighbours sharing a full edge so tile-by-tile growth does not fragment
    // the list without bound.
    fn coalesce(&mut self) {
        let mut merged = true;
        while merged {
            merged = false;
            'outer: for first in 0..self.rects.len() {
                for second in (first + 1)..self.rects.len() {
                    if let Some(joined) = join_adjacent(self.rects[first], self.rects[second]) {
                        self.rects[first] = joined;
                        self.rects.swap_remove(second);
                        merged = true;
                        break 'outer;
                    }
                }
            }
        }
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::from_rect(rect)
    }
}

fn join_adjacent(a: Rect, b: Rect) -> Option<Rect> {
    let same_columns = a.min_x == b.min_x && a.max_x == b.max_x;
    if same_columns && (a.max_y == b.min_y || b.max_y == a.min_y) {
        return Some(a.union(b));
    }
    let same_rows = a.min_y == b.min_y && a.max_y == b.max_y;
    if same_rows && (a.max_x == b.min_x || b.max_x == a.min_x) {
        return Some(a.union(b));
    }
    None
}
