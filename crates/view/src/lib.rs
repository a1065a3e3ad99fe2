//! Target resolution and visible area of the render output.
//!
//! Canvas space is document space scaled by the zoom level; display buffers are
//! addressed directly in canvas coordinates.

use model::{MAX_BITMAP_PIXELS, Rect, Transform};

pub const MIN_ZOOM: f64 = 1.0 / 64.0;
pub const MAX_ZOOM: f64 = 64.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ViewError {
    #[error("zoom level must be finite and within [{MIN_ZOOM}, {MAX_ZOOM}]")]
    InvalidZoom,
    #[error("canvas layout must have a non-empty data rect of bounded size")]
    InvalidCanvasLayout,
    #[error("non-finite value in view computation")]
    NonFiniteValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomLevel(f64);

impl Default for ZoomLevel {
    fn default() -> Self {
        Self(1.0)
    }
}

impl ZoomLevel {
    pub fn new(zoom: f64) -> Result<Self, ViewError> {
        if !zoom.is_finite() || !(MIN_ZOOM..=MAX_ZOOM).contains(&zoom) {
            return Err(ViewError::InvalidZoom);
        }
        Ok(Self(zoom))
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

/// The canvas rect backed by display buffers and the part of it worth rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasLayout {
    data_rect: Rect,
    visible_rect: Rect,
}

impl CanvasLayout {
    /// `visible_rect` is clipped to `data_rect`; an empty result renders nothing.
    pub fn new(data_rect: Rect, visible_rect: Rect) -> Result<Self, ViewError> {
        if data_rect.is_empty() || data_rect.area() > MAX_BITMAP_PIXELS {
            return Err(ViewError::InvalidCanvasLayout);
        }
        Ok(Self {
            data_rect,
            visible_rect: visible_rect.intersect(data_rect),
        })
    }

    pub fn data_rect(&self) -> Rect {
        self.data_rect
    }

    pub fn visible_rect(&self) -> Rect {
        self.visible_rect
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    zoom: ZoomLevel,
    layout: CanvasLayout,
}

impl ViewState {
    /// Whole document at `zoom`, fully visible.
    pub fn fit_document(document_bounds: Rect, zoom: ZoomLevel) -> Result<Self, ViewError> {
        let data_rect = map_rect(document_bounds, zoom)?;
        Ok(Self {
            zoom,
            layout: CanvasLayout::new(data_rect, data_rect)?,
        })
    }

    pub fn new(zoom: ZoomLevel, layout: CanvasLayout) -> Self {
        Self { zoom, layout }
    }

    pub fn zoom(&self) -> ZoomLevel {
        self.zoom
    }

    pub fn layout(&self) -> CanvasLayout {
        self.layout
    }

    pub fn canvas_rect(&self) -> Rect {
        self.layout.data_rect
    }

    pub fn visible_rect(&self) -> Rect {
        self.layout.visible_rect
    }

    /// Keeps the layout shape, rescaling both rects to the new zoom.
    pub fn with_zoom(&self, zoom: ZoomLevel) -> Result<Self, ViewError> {
        let ratio = checked_div(zoom.get(), self.zoom.get())?;
        let data_rect = scale_rect(self.layout.data_rect, ratio)?;
        let visible_rect = scale_rect(self.layout.visible_rect, ratio)?;
        Ok(Self {
            zoom,
            layout: CanvasLayout::new(data_rect, visible_rect)?,
        })
    }

    pub fn with_layout(&self, layout: CanvasLayout) -> Self {
        Self {
            zoom: self.zoom,
            layout,
        }
    }

    pub fn document_to_canvas(&self) -> Transform {
        let zoom = self.zoom.get();
        Transform::scale(zoom, zoom)
    }

    /// Smallest canvas rect covering a document-space rect.
    pub fn map_area(&self, area: Rect) -> Rect {
        map_rect(area, self.zoom).unwrap_or(Rect::EMPTY)
    }
}

fn map_rect(area: Rect, zoom: ZoomLevel) -> Result<Rect, ViewError> {
    scale_rect(area, zoom.get())
}

fn scale_rect(area: Rect, factor: f64) -> Result<Rect, ViewError> {
    if area.is_empty() {
        return Ok(Rect::EMPTY);
    }
    Ok(Rect::round_out(
        checked_mul(f64::from(area.min_x), factor)?,
        checked_mul(f64::from(area.min_y), factor)?,
        checked_mul(f64::from(area.max_x), factor)?,
        checked_mul(f64::from(area.max_y), factor)?,
    ))
}

fn checked_mul(left: f64, right: f64) -> Result<f64, ViewError> {
    if !left.is_finite() || !right.is_finite() {
        return Err(ViewError::NonFiniteValue);
    }
    let next = left * right;
    if !next.is_finite() {
        return Err(ViewError::NonFiniteValue);
    }
    Ok(next)
}

fn checked_div(left: f64, right: f64) -> Result<f64, ViewError> {
    if !left.is_finite() || !right.is_finite() || right == 0.0 {
        return Err(ViewError::NonFiniteValue);
    }
    let next = left / right;
    if !next.is_finite() {
        return Err(ViewError::NonFiniteValue);
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_level_rejects_out_of_range_values() {
        assert_eq!(ZoomLevel::new(0.0), Err(ViewError::InvalidZoom));
        assert_eq!(ZoomLevel::new(f64::NAN), Err(ViewError::InvalidZoom));
        assert_eq!(ZoomLevel::new(1000.0), Err(ViewError::InvalidZoom));
        assert!(ZoomLevel::new(0.5).is_ok());
    }

    #[test]
    fn map_area_rounds_out_to_cover_partial_pixels() {
        let view = ViewState::fit_document(
            Rect::new(0, 0, 100, 100),
            ZoomLevel::new(0.3).expect("zoom"),
        )
        .expect("view");
        assert_eq!(view.canvas_rect(), Rect::new(0, 0, 30, 30));
        assert_eq!(view.map_area(Rect::new(5, 5, 11, 11)), Rect::new(1, 1, 4, 4));
    }

    #[test]
    fn layout_clips_visible_to_data() {
        let layout = CanvasLayout::new(Rect::new(0, 0, 50, 50), Rect::new(-10, 20, 30, 90))
            .expect("layout");
        assert_eq!(layout.visible_rect(), Rect::new(0, 20, 30, 50));
        assert_eq!(
            CanvasLayout::new(Rect::EMPTY, Rect::EMPTY),
            Err(ViewError::InvalidCanvasLayout)
        );
    }

    #[test]
    fn with_zoom_rescales_the_layout() {
        let view = ViewState::fit_document(Rect::new(0, 0, 40, 20), ZoomLevel::default())
            .expect("view");
        let zoomed = view
            .with_zoom(ZoomLevel::new(2.0).expect("zoom"))
            .expect("rescale");
        assert_eq!(zoomed.canvas_rect(), Rect::new(0, 0, 80, 40));
        assert_eq!(zoomed.visible_rect(), Rect::new(0, 0, 80, 40));
    }
}
