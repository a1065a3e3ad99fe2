//! Double-buffered output surface.

use std::ops::Deref;
use std::sync::RwLockReadGuard;

use model::{AllocError, Bitmap, Rect, Region};

/// Front and back buffers over the same canvas rect.
///
/// Workers write finished tiles into the back buffer; rectangles are copied to the
/// front buffer once they are clean. Readers only ever see the front buffer through
/// a [`DisplayGuard`].
#[derive(Debug)]
pub struct DisplaySurface {
    front: Bitmap,
    back: Bitmap,
    generation: u64,
}

impl DisplaySurface {
    pub(crate) fn try_new(canvas: Rect) -> Result<Self, AllocError> {
        Ok(Self {
            front: Bitmap::try_new(canvas)?,
            back: Bitmap::try_new(canvas)?,
            generation: 0,
        })
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn bounds(&self) -> Rect {
        self.front.bounds()
    }

    /// The buffer currently presented.
    pub fn front(&self) -> &Bitmap {
        &self.front
    }

    /// The buffer tiles are composited into. May hold pixels not yet published.
    pub fn back(&self) -> &Bitmap {
        &self.back
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Copies a rendered tile into the back buffer if it targets this surface.
    pub(crate) fn present_tile(&mut self, tile: &Bitmap, area: Rect, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.back.copy_from(tile, area);
        true
    }

    pub(crate) fn publish(&mut self, region: &Region, generation: u64) {
        if generation != self.generation {
            return;
        }
        for rect in region.rects() {
            self.front.copy_from(&self.back, *rect);
        }
    }
}

/// Read view of the display surface; holds the display lock until dropped.
pub struct DisplayGuard<'a> {
    surface: RwLockReadGuard<'a, DisplaySurface>,
}

impl<'a> DisplayGuard<'a> {
    pub(crate) fn new(surface: RwLockReadGuard<'a, DisplaySurface>) -> Self {
        Self { surface }
    }

    pub fn display_bitmap(&self) -> &Bitmap {
        self.surface.front()
    }

    pub fn back_bitmap(&self) -> &Bitmap {
        self.surface.back()
    }
}

impl Deref for DisplayGuard<'_> {
    type Target = DisplaySurface;

    fn deref(&self) -> &DisplaySurface {
        &self.surface
    }
}
