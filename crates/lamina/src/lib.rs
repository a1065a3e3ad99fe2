//! Headless drawing session.
//!
//! A `Session` owns a document and the render manager that keeps its pixels current.
//! Edits go through `edit`, which holds the document write lock with updates suspended
//! so one call reaches the renderer as a single batch.

use std::sync::Arc;
use std::time::Duration;

use document::{Content, Document, LayerStyle, NodeSpec, SceneError, SceneTree};
use model::{AllocError, Bitmap, BlendMode, Color, Pixel, Point, Rect, Transform};
use render_protocol::{FilterKind, Paint};
use renderer::{RenderConfig, RenderManager, RenderManagerError};

pub struct Session {
    document: Arc<Document>,
    renderer: RenderManager,
}

/// Straight-alpha RGBA8 copy of the front buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub bounds: Rect,
    pub rgba: Vec<u8>,
}

impl Session {
    pub fn new(width: u32, height: u32, config: RenderConfig) -> Result<Self, RenderManagerError> {
        let document = Arc::new(Document::new(width, height));
        let renderer = RenderManager::new(Arc::clone(&document), config)?;
        log::info!(
            "[session] {width}x{height} document, {} render workers",
            renderer.worker_count()
        );
        Ok(Self { document, renderer })
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn renderer(&self) -> &RenderManager {
        &self.renderer
    }

    pub fn edit<R>(&self, apply: impl FnOnce(&mut SceneTree) -> R) -> R {
        let mut tree = self.document.write();
        tree.suspend_updates(true);
        let result = apply(&mut tree);
        tree.suspend_updates(false);
        result
    }

    /// Waits for the renderer to settle and copies the front buffer out.
    ///
    /// Returns `None` if rendering does not settle within `timeout`.
    pub fn capture(&self, timeout: Duration) -> Option<Frame> {
        if !self.renderer.flush(timeout) {
            log::warn!("[session] renderer did not settle within {timeout:?}");
            return None;
        }
        let display = self.renderer.lock_display()?;
        let front = display.display_bitmap();
        let rgba = front
            .pixels()
            .iter()
            .flat_map(|pixel| {
                let color = pixel.to_color();
                [color.r, color.g, color.b, color.a]
            })
            .collect();
        Some(Frame {
            bounds: front.bounds(),
            rgba,
        })
    }
}

/// Fills the root layer of `tree` with a small scene exercising every node kind.
pub fn populate_sample_scene(tree: &mut SceneTree) -> Result<(), SceneError> {
    let root = tree.root();
    let bounds = tree.bounds();
    let width = f64::from(bounds.width());
    let height = f64::from(bounds.height());

    tree.push_object(
        root,
        NodeSpec::object(Content::rectangle(
            Point::new(0.0, 0.0),
            Point::new(width, height),
        ))
        .with_paint(Paint::solid(Color::rgb(244, 240, 230))),
    )?;
    tree.push_object(
        root,
        NodeSpec::object(Content::Rectangle {
            min: Point::new(width * 0.08, height * 0.1),
            max: Point::new(width * 0.45, height * 0.55),
            corner_radius: width.min(height) * 0.05,
        })
        .with_paint(Paint::solid(Color::rgb(38, 110, 190))),
    )?;
    tree.push_object(
        root,
        NodeSpec::object(Content::shape(vec![star(
            Point::new(width * 0.7, height * 0.32),
            width.min(height) * 0.22,
        )]))
        .with_paint(Paint::solid(Color::rgb(232, 168, 40))),
    )?;
    tree.push_object(
        root,
        NodeSpec::object(Content::stroke(
            (0..=24)
                .map(|step| {
                    let t = f64::from(step) / 24.0;
                    Point::new(
                        width * (0.1 + 0.8 * t),
                        height * (0.78 + 0.08 * (t * std::f64::consts::TAU).sin()),
                    )
                })
                .collect(),
            width.min(height) * 0.02,
        ))
        .with_paint(Paint::solid(Color::rgb(60, 60, 60))),
    )?;

    let glaze = tree.push_object(
        root,
        NodeSpec::layer(LayerStyle {
            opacity: 0.8,
            blend: BlendMode::Multiply,
        }),
    )?;
    match checkerboard(8, 8) {
        Ok(bitmap) => {
            tree.push_object(
                glaze,
                NodeSpec::object(Content::Image {
                    bitmap: Arc::new(bitmap),
                })
                .with_transform(
                    Transform::scale(width * 0.03, height * 0.03)
                        .then(&Transform::translate(width * 0.3, height * 0.35)),
                ),
            )?;
        }
        Err(error) => log::warn!("[session] sample image skipped: {error}"),
    }
    tree.push_object(glaze, NodeSpec::filter(FilterKind::BoxBlur { radius: 2.0 }))?;
    tree.push_object(
        root,
        NodeSpec::object(Content::rectangle(
            Point::new(width * 0.55, height * 0.6),
            Point::new(width * 0.9, height * 0.7),
        ))
        .with_paint(Paint::solid(Color::rgb(200, 40, 70)).with_opacity(0.6)),
    )?;
    Ok(())
}

fn star(center: Point, radius: f64) -> Vec<Point> {
    (0..10)
        .map(|index| {
            let angle = std::f64::consts::PI * f64::from(index) / 5.0 - std::f64::consts::FRAC_PI_2;
            let reach = if index % 2 == 0 { radius } else { radius * 0.45 };
            Point::new(center.x + reach * angle.cos(), center.y + reach * angle.sin())
        })
        .collect()
}

fn checkerboard(columns: i32, rows: i32) -> Result<Bitmap, AllocError> {
    let mut bitmap = Bitmap::try_new(Rect::new(0, 0, columns, rows))?;
    let light = Pixel::from_color(Color::rgb(250, 220, 235));
    let dark = Pixel::from_color(Color::rgb(150, 90, 170));
    for y in 0..rows {
        for x in 0..columns {
            let pixel = if (x + y) % 2 == 0 { light } else { dark };
            bitmap.set_pixel(x, y, pixel);
        }
    }
    Ok(bitmap)
}
