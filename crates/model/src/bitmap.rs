use crate::Rect;

/// Upper bound on the pixel count of a single bitmap or coverage mask.
///
/// Requests above it fail with [`AllocError`] without touching the allocator.
pub const MAX_BITMAP_PIXELS: u64 = 1 << 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("failed to allocate a {width}x{height} pixel buffer")]
pub struct AllocError {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
}

/// Straight (non-premultiplied) RGBA color as authored in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Self = Self::rgba(0, 0, 0, 0);
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    pub const WHITE: Self = Self::rgb(255, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }
}

/// Premultiplied RGBA pixel as stored in bitmaps.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Pixel {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

#[inline]
fn mul_255(left: u32, right: u32) -> u32 {
    let product = left * right + 128;
    (product + (product >> 8)) >> 8
}

impl Pixel {
    pub const TRANSPARENT: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    pub fn from_color(color: Color) -> Self {
        let alpha = u32::from(color.a);
        Self {
            r: mul_255(u32::from(color.r), alpha) as u8,
            g: mul_255(u32::from(color.g), alpha) as u8,
            b: mul_255(u32::from(color.b), alpha) as u8,
            a: color.a,
        }
    }

    pub fn to_color(self) -> Color {
        if self.a == 0 {
            return Color::TRANSPARENT;
        }
        let alpha = u32::from(self.a);
        let unpremultiply =
            |channel: u8| ((u32::from(channel) * 255 + alpha / 2) / alpha).min(255) as u8;
        Color::rgba(
            unpremultiply(self.r),
            unpremultiply(self.g),
            unpremultiply(self.b),
            self.a,
        )
    }

    #[inline]
    pub fn scale(self, factor: u8) -> Self {
        if factor == 255 {
            return self;
        }
        let factor = u32::from(factor);
        Self {
            r: mul_255(u32::from(self.r), factor) as u8,
            g: mul_255(u32::from(self.g), factor) as u8,
            b: mul_255(u32::from(self.b), factor) as u8,
            a: mul_255(u32::from(self.a), factor) as u8,
        }
    }

    /// Composites `self` on top of `dst`.
    #[inline]
    pub fn blend_onto(self, dst: Pixel, mode: BlendMode) -> Pixel {
        if self.a == 0 {
            return dst;
        }
        let inverse_src = 255 - u32::from(self.a);
        match mode {
            BlendMode::Normal => {
                if self.a == 255 {
                    return self;
                }
                let over = |src: u8, dst: u8| {
                    (u32::from(src) + mul_255(u32::from(dst), inverse_src)).min(255) as u8
                };
                Pixel {
                    r: over(self.r, dst.r),
                    g: over(self.g, dst.g),
                    b: over(self.b, dst.b),
                    a: over(self.a, dst.a),
                }
            }
            BlendMode::Multiply => {
                let inverse_dst = 255 - u32::from(dst.a);
                let multiply = |src: u8, dst: u8| {
                    let src = u32::from(src);
                    let dst = u32::from(dst);
                    (mul_255(src, dst) + mul_255(src, inverse_dst) + mul_255(dst, inverse_src))
                        .min(255) as u8
                };
                Pixel {
                    r: multiply(self.r, dst.r),
                    g: multiply(self.g, dst.g),
                    b: multiply(self.b, dst.b),
                    a: (u32::from(self.a) + mul_255(u32::from(dst.a), inverse_src)).min(255)
                        as u8,
                }
            }
        }
    }
}

/// Premultiplied RGBA pixels covering `bounds` in canvas coordinates.
#[derive(Debug, Clone)]
pub struct Bitmap {
    bounds: Rect,
    pixels: Vec<Pixel>,
}

fn pixel_len(bounds: Rect) -> Result<usize, AllocError> {
    let error = AllocError {
        width: bounds.width(),
        height: bounds.height(),
    };
    if bounds.area() > MAX_BITMAP_PIXELS {
        return Err(error);
    }
    usize::try_from(bounds.area()).map_err(|_| error)
}

impl Bitmap {
    pub fn try_new(bounds: Rect) -> Result<Self, AllocError> {
        let bounds = if bounds.is_empty() { Rect::EMPTY } else { bounds };
        let len = pixel_len(bounds)?;
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(len).map_err(|_| AllocError {
            width: bounds.width(),
            height: bounds.height(),
        })?;
        pixels.resize(len, Pixel::TRANSPARENT);
        Ok(Self { bounds, pixels })
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn width(&self) -> u32 {
        self.bounds.width()
    }

    pub fn height(&self) -> u32 {
        self.bounds.height()
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    /// Moves the bitmap to new bounds, keeping the allocation when it is large enough.
    ///
    /// Pixel contents are cleared to transparent.
    pub fn reposition(&mut self, bounds: Rect) -> Result<(), AllocError> {
        let bounds = if bounds.is_empty() { Rect::EMPTY } else { bounds };
        let len = pixel_len(bounds)?;
        if len > self.pixels.capacity() {
            let additional = len - self.pixels.len();
            self.pixels
                .try_reserve_exact(additional)
                .map_err(|_| AllocError {
                    width: bounds.width(),
                    height: bounds.height(),
                })?;
        }
        self.pixels.clear();
        self.pixels.resize(len, Pixel::TRANSPARENT);
        self.bounds = bounds;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.pixels.capacity()
    }

    #[inline]
    fn offset(&self, x: i32, y: i32) -> usize {
        let column = (x - self.bounds.min_x) as usize;
        let row = (y - self.bounds.min_y) as usize;
        row * self.bounds.width() as usize + column
    }

    pub fn pixel(&self, x: i32, y: i32) -> Option<Pixel> {
        self.bounds
            .contains_point(x, y)
            .then(|| self.pixels[self.offset(x, y)])
    }

    pub fn set_pixel(&mut self, x: i32, y: i32, pixel: Pixel) {
        if self.bounds.contains_point(x, y) {
            let offset = self.offset(x, y);
            self.pixels[offset] = pixel;
        }
    }

    /// Pixels of row `y` between `min_x` and `max_x`; the span must lie inside the bounds.
    pub fn row(&self, y: i32, min_x: i32, max_x: i32) -> &[Pixel] {
        let start = self.offset(min_x, y);
        &self.pixels[start..start + (max_x - min_x) as usize]
    }

    pub fn row_mut(&mut self, y: i32, min_x: i32, max_x: i32) -> &mut [Pixel] {
        let start = self.offset(min_x, y);
        &mut self.pixels[start..start + (max_x - min_x) as usize]
    }

    pub fn fill(&mut self, area: Rect, pixel: Pixel) {
        let area = area.intersect(self.bounds);
        for y in area.min_y..area.max_y {
            self.row_mut(y, area.min_x, area.max_x).fill(pixel);
        }
    }

    pub fn clear(&mut self, area: Rect) {
        self.fill(area, Pixel::TRANSPARENT);
    }

    pub fn copy_from(&mut self, source: &Bitmap, area: Rect) {
        let area = area.intersect(self.bounds).intersect(source.bounds);
        for y in area.min_y..area.max_y {
            let src = source.row(y, area.min_x, area.max_x);
            self.row_mut(y, area.min_x, area.max_x).copy_from_slice(src);
        }
    }

    /// Composites `source` over `self` inside `area`, scaled by `opacity`.
    pub fn blend_from(&mut self, source: &Bitmap, area: Rect, mode: BlendMode, opacity: u8) {
        if opacity == 0 {
            return;
        }
        let area = area.intersect(self.bounds).intersect(source.bounds);
        for y in area.min_y..area.max_y {
            let src = source.row(y, area.min_x, area.max_x);
            let dst = self.row_mut(y, area.min_x, area.max_x);
            for (dst_pixel, src_pixel) in dst.iter_mut().zip(src) {
                *dst_pixel = src_pixel.scale(opacity).blend_onto(*dst_pixel, mode);
            }
        }
    }

    /// Mutable access to `area` one row at a time, as `(y, min_x, pixels)`.
    pub fn for_each_row_mut(&mut self, area: Rect, mut visit: impl FnMut(i32, i32, &mut [Pixel])) {
        let area = area.intersect(self.bounds);
        for y in area.min_y..area.max_y {
            visit(y, area.min_x, self.row_mut(y, area.min_x, area.max_x));
        }
    }
}
