//! Messages and descriptors exchanged between the live scene, the render manager and
//! the presentation surface.

pub use model::{BlendMode, Color, Rect};

slotmap::new_key_type! {
    /// Generational handle of a node in the scene arena.
    pub struct NodeKey;
}

/// How an object's coverage is turned into pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paint {
    pub color: Color,
    pub opacity: f32,
    pub blend: BlendMode,
}

impl Default for Paint {
    fn default() -> Self {
        Self::solid(Color::BLACK)
    }
}

impl Paint {
    pub const fn solid(color: Color) -> Self {
        Self {
            color,
            opacity: 1.0,
            blend: BlendMode::Normal,
        }
    }

    pub const fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = clamp_unit(opacity);
        self
    }

    /// Opacity as an 8-bit scale factor.
    pub fn opacity_u8(&self) -> u8 {
        opacity_to_u8(self.opacity)
    }
}

pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

pub fn opacity_to_u8(opacity: f32) -> u8 {
    (clamp_unit(opacity) * 255.0).round() as u8
}

/// Pixel filters applied to everything composited below them in their layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterKind {
    Invert,
    Grayscale,
    BoxBlur { radius: f32 },
}

impl FilterKind {
    /// How far, in canvas pixels at `zoom`, the filter reads around each output pixel.
    pub fn outset(&self, zoom: f64) -> i32 {
        match self {
            FilterKind::Invert | FilterKind::Grayscale => 0,
            FilterKind::BoxBlur { radius } => {
                let scaled = f64::from(radius.max(0.0)) * zoom;
                if scaled.is_finite() {
                    scaled.ceil().min(f64::from(MAX_FILTER_OUTSET)) as i32
                } else {
                    0
                }
            }
        }
    }
}

/// Blur radii are capped so one filter cannot invalidate an unbounded area.
pub const MAX_FILTER_OUTSET: i32 = 256;

/// Notifications a layer sends to its listeners.
///
/// `AreaInvalidated` carries `child_index`, the index inside `layer` of the child the
/// change came from, or `None` when the layer's own style changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneEvent {
    ObjectAdded {
        layer: NodeKey,
        node: NodeKey,
        index: usize,
    },
    ObjectRemoved {
        layer: NodeKey,
        node: NodeKey,
        index: usize,
    },
    AreaInvalidated {
        layer: NodeKey,
        area: Rect,
        child_index: Option<usize>,
    },
}

impl SceneEvent {
    pub fn layer(&self) -> NodeKey {
        match self {
            SceneEvent::ObjectAdded { layer, .. }
            | SceneEvent::ObjectRemoved { layer, .. }
            | SceneEvent::AreaInvalidated { layer, .. } => *layer,
        }
    }
}

/// Notifications the render manager sends to the presentation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
    /// The rectangle of the front buffer now reflects the latest rendered state.
    AreaClean(Rect),
    /// The display buffers were reallocated for a new canvas size.
    Reconfigured { canvas: Rect },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blur_outset_scales_with_zoom_and_is_capped() {
        let blur = FilterKind::BoxBlur { radius: 2.5 };
        assert_eq!(blur.outset(1.0), 3);
        assert_eq!(blur.outset(2.0), 5);
        assert_eq!(FilterKind::BoxBlur { radius: 1e9 }.outset(1.0), MAX_FILTER_OUTSET);
        assert_eq!(FilterKind::Invert.outset(4.0), 0);
    }

    #[test]
    fn opacity_is_clamped() {
        assert_eq!(Paint::default().with_opacity(2.0).opacity_u8(), 255);
        assert_eq!(Paint::default().with_opacity(f32::NAN).opacity_u8(), 0);
        assert_eq!(opacity_to_u8(0.5), 128);
    }
}
