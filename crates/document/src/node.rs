use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use model::{Bitmap, BlendMode, Point, Rect, Transform};
use render_protocol::{FilterKind, NodeKey, Paint, SceneEvent};

/// Drawable payload of a non-layer node, in the node's local coordinates.
#[derive(Debug, Clone)]
pub enum Content {
    Rectangle {
        min: Point,
        max: Point,
        corner_radius: f64,
    },
    /// Closed polygons filled with the non-zero rule.
    Shape { contours: Arc<[Vec<Point>]> },
    /// Polyline with round caps and joins.
    Stroke { points: Arc<[Point]>, width: f64 },
    /// Bitmap placed at its own bounds, then transformed.
    Image { bitmap: Arc<Bitmap> },
    Filter(FilterKind),
}

impl Content {
    pub fn rectangle(min: Point, max: Point) -> Self {
        Content::Rectangle {
            min,
            max,
            corner_radius: 0.0,
        }
    }

    pub fn shape(contours: Vec<Vec<Point>>) -> Self {
        Content::Shape {
            contours: contours.into(),
        }
    }

    pub fn stroke(points: Vec<Point>, width: f64) -> Self {
        Content::Stroke {
            points: points.into(),
            width,
        }
    }

    pub fn is_filter(&self) -> bool {
        matches!(self, Content::Filter(_))
    }

    /// Local-space bounds, `None` for filters and empty geometry.
    pub fn local_bounds(&self) -> Option<(Point, Point)> {
        match self {
            Content::Rectangle { min, max, .. } => {
                let low = Point::new(min.x.min(max.x), min.y.min(max.y));
                let high = Point::new(min.x.max(max.x), min.y.max(max.y));
                (low.x < high.x && low.y < high.y).then_some((low, high))
            }
            Content::Shape { contours } => points_bounds(contours.iter().flatten(), 0.0),
            Content::Stroke { points, width } => {
                let half_width = if width.is_finite() { width.max(0.0) / 2.0 } else { 0.0 };
                if half_width == 0.0 {
                    return None;
                }
                points_bounds(points.iter(), half_width)
            }
            Content::Image { bitmap } => {
                let bounds = bitmap.bounds();
                (!bounds.is_empty()).then(|| {
                    (
                        Point::new(f64::from(bounds.min_x), f64::from(bounds.min_y)),
                        Point::new(f64::from(bounds.max_x), f64::from(bounds.max_y)),
                    )
                })
            }
            Content::Filter(_) => None,
        }
    }
}

fn points_bounds<'a>(
    points: impl Iterator<Item = &'a Point>,
    outset: f64,
) -> Option<(Point, Point)> {
    let mut low = Point::new(f64::INFINITY, f64::INFINITY);
    let mut high = Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
    for point in points {
        if !(point.x.is_finite() && point.y.is_finite()) {
            continue;
        }
        low.x = low.x.min(point.x);
        low.y = low.y.min(point.y);
        high.x = high.x.max(point.x);
        high.y = high.y.max(point.y);
    }
    if low.x > high.x {
        return None;
    }
    Some((
        Point::new(low.x - outset, low.y - outset),
        Point::new(high.x + outset, high.y + outset),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerStyle {
    pub opacity: f32,
    pub blend: BlendMode,
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            blend: BlendMode::Normal,
        }
    }
}

#[derive(Debug, Default)]
pub struct LayerNode {
    pub(crate) children: Vec<NodeKey>,
    pub(crate) style: LayerStyle,
    // Registered from reader threads, so guarded separately from the tree lock.
    pub(crate) listeners: Mutex<Vec<Sender<SceneEvent>>>,
    pub(crate) pending: Option<PendingInvalidation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingInvalidation {
    pub area: Rect,
    pub child_index: Option<usize>,
}

impl PendingInvalidation {
    pub(crate) fn merge(&mut self, area: Rect, child_index: Option<usize>) {
        self.area = self.area.union(area);
        self.child_index = match (self.child_index, child_index) {
            (Some(current), Some(next)) => Some(current.min(next)),
            (current, next) => current.or(next),
        };
    }
}

impl LayerNode {
    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    pub fn style(&self) -> LayerStyle {
        self.style
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Layer(LayerNode),
    Object(Content),
}

#[derive(Debug)]
pub struct SceneNode {
    pub(crate) parent: Option<NodeKey>,
    pub(crate) area: Rect,
    pub(crate) transform: Transform,
    pub(crate) paint: Paint,
    pub(crate) change_counter: u64,
    pub(crate) kind: NodeKind,
}

impl SceneNode {
    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    /// Document-space bounds of everything the node paints.
    pub fn area(&self) -> Rect {
        self.area
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn paint(&self) -> Paint {
        self.paint
    }

    /// Bumped on every change to the node, and for layers on every change in their subtree.
    pub fn change_counter(&self) -> u64 {
        self.change_counter
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn as_layer(&self) -> Option<&LayerNode> {
        match &self.kind {
            NodeKind::Layer(layer) => Some(layer),
            NodeKind::Object(_) => None,
        }
    }

    pub fn content(&self) -> Option<&Content> {
        match &self.kind {
            NodeKind::Layer(_) => None,
            NodeKind::Object(content) => Some(content),
        }
    }

    pub(crate) fn as_layer_mut(&mut self) -> Option<&mut LayerNode> {
        match &mut self.kind {
            NodeKind::Layer(layer) => Some(layer),
            NodeKind::Object(_) => None,
        }
    }
}

/// Description of a node to insert.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub(crate) kind: SpecKind,
    pub(crate) transform: Transform,
    pub(crate) paint: Paint,
}

#[derive(Debug, Clone)]
pub(crate) enum SpecKind {
    Layer(LayerStyle),
    Object(Content),
}

impl NodeSpec {
    pub fn layer(style: LayerStyle) -> Self {
        Self {
            kind: SpecKind::Layer(style),
            transform: Transform::IDENTITY,
            paint: Paint::default(),
        }
    }

    pub fn object(content: Content) -> Self {
        Self {
            kind: SpecKind::Object(content),
            transform: Transform::IDENTITY,
            paint: Paint::default(),
        }
    }

    pub fn filter(filter: FilterKind) -> Self {
        Self::object(Content::Filter(filter))
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_paint(mut self, paint: Paint) -> Self {
        self.paint = paint;
        self
    }
}

/// Document-space area of an object; filters cover the whole document.
pub(crate) fn object_area(content: &Content, transform: &Transform, document: Rect) -> Rect {
    if content.is_filter() {
        return document;
    }
    let Some((min, max)) = content.local_bounds() else {
        return Rect::EMPTY;
    };
    match transform.map_bounds(min, max) {
        Some((low, high)) => Rect::round_out(low.x, low.y, high.x, high.y),
        None => Rect::EMPTY,
    }
}
