//! Manager thread: turns scene events into synchronized snapshots and dirty areas.
//!
//! The manager is the only thread that holds the document read lock on the render
//! side. It drains every pending event into one batch, syncs the snapshot tree once
//! per batch, and hands dirty areas and prepare requests to the job queue.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender, select};
use document::Document;
use model::{Rect, Region};
use render_protocol::{DisplayEvent, NodeKey, SceneEvent};
use view::{CanvasLayout, ViewState, ZoomLevel};

use crate::display::DisplaySurface;
use crate::snapshot::{ObjectSnapshot, PrepareRequest, SyncContext};
use crate::snapshot_layer::LayerSnapshot;
use crate::{RenderManagerError, Shared};

pub(crate) enum ManagerCommand {
    SetZoom {
        zoom: ZoomLevel,
        reply: Sender<Result<(), RenderManagerError>>,
    },
    SetLayout {
        layout: CanvasLayout,
        reply: Sender<Result<(), RenderManagerError>>,
    },
    /// Acknowledged once every event sent before it has been processed.
    Flush { reply: Sender<()> },
    Shutdown,
}

pub(crate) struct ManagerThread {
    document: Arc<Document>,
    shared: Arc<Shared>,
    events: Receiver<SceneEvent>,
    listener: Sender<SceneEvent>,
    commands: Receiver<ManagerCommand>,
    layers: HashMap<NodeKey, Weak<LayerSnapshot>>,
    view_epoch: u64,
}

/// Output of one synchronization pass.
pub(crate) struct Synced {
    pub(crate) new_layers: Vec<Weak<LayerSnapshot>>,
    pub(crate) prepare: Vec<PrepareRequest>,
}

/// Syncs `root` against the document under its read lock.
pub(crate) fn synchronize(
    document: &Document,
    root: &LayerSnapshot,
    view: ViewState,
    view_epoch: u64,
    listener: &Sender<SceneEvent>,
) -> Synced {
    let tree = document.read();
    let mut ctx = SyncContext::new(&tree, view, view_epoch).with_listener(listener);
    let changed = root.sync(&mut ctx);
    log::debug!(
        "[render] sync changed={changed} new_layers={} prepare={}",
        ctx.new_layers.len(),
        ctx.prepare.len()
    );
    Synced {
        new_layers: std::mem::take(&mut ctx.new_layers),
        prepare: std::mem::take(&mut ctx.prepare),
    }
}

impl ManagerThread {
    pub(crate) fn new(
        document: Arc<Document>,
        shared: Arc<Shared>,
        events: Receiver<SceneEvent>,
        listener: Sender<SceneEvent>,
        commands: Receiver<ManagerCommand>,
        layers: HashMap<NodeKey, Weak<LayerSnapshot>>,
    ) -> Self {
        Self {
            document,
            shared,
            events,
            listener,
            commands,
            layers,
            view_epoch: 0,
        }
    }

    pub(crate) fn run(mut self) {
        log::debug!("[render] manager started");
        loop {
            select! {
                recv(self.events) -> event => {
                    let Ok(event) = event else {
                        break;
                    };
                    let mut batch = vec![event];
                    batch.extend(self.events.try_iter());
                    self.process_batch(&batch);
                }
                recv(self.commands) -> command => match command {
                    Ok(ManagerCommand::Shutdown) | Err(_) => break,
                    Ok(command) => self.handle_command(command),
                },
            }
        }
        log::debug!("[render] manager exiting");
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::SetZoom { zoom, reply } => {
                let view = self.shared.view();
                let result = view
                    .with_zoom(zoom)
                    .map_err(RenderManagerError::from)
                    .and_then(|next| self.apply_view(next));
                let _ = reply.send(result);
            }
            ManagerCommand::SetLayout { layout, reply } => {
                let next = self.shared.view().with_layout(layout);
                let _ = reply.send(self.apply_view(next));
            }
            ManagerCommand::Flush { reply } => {
                let batch: Vec<SceneEvent> = self.events.try_iter().collect();
                if !batch.is_empty() {
                    self.process_batch(&batch);
                }
                let _ = reply.send(());
            }
            ManagerCommand::Shutdown => {}
        }
    }

    fn synchronize(&mut self, view: ViewState) -> Vec<PrepareRequest> {
        let synced = synchronize(
            &self.document,
            &self.shared.root,
            view,
            self.view_epoch,
            &self.listener,
        );
        for layer in synced.new_layers {
            if let Some(snapshot) = layer.upgrade() {
                self.layers.insert(snapshot.key(), layer);
            }
        }
        self.layers.retain(|_, layer| layer.strong_count() > 0);
        synced.prepare
    }

    fn process_batch(&mut self, batch: &[SceneEvent]) {
        let view = self.shared.view();
        let prepare = self.synchronize(view);
        let root_key = self.shared.root.key();

        let mut dirty = Region::new();
        let mut lowest: Option<usize> = None;
        for event in batch {
            let SceneEvent::AreaInvalidated {
                layer,
                area,
                child_index,
            } = *event
            else {
                continue;
            };
            let canvas_area = view.map_area(area);
            if canvas_area.is_empty() {
                continue;
            }
            dirty.add_rect(self.expand_for_filters(layer, canvas_area, child_index));
            if layer == root_key {
                let index = child_index.unwrap_or(0);
                lowest = Some(lowest.map_or(index, |current| current.min(index)));
            }
        }
        log::debug!(
            "[render] batch of {} events, dirty {:?}, lowest index {lowest:?}",
            batch.len(),
            dirty.bounds()
        );

        self.shared.queue.update(|queue| {
            queue.begin_batch(lowest);
            for rect in dirty.rects() {
                queue.add_dirty(*rect);
            }
            queue.enqueue_prepare(prepare);
        });
    }

    /// Grows `area` by the outsets of every filter above the change, layer by layer
    /// up to the root.
    fn expand_for_filters(&self, layer: NodeKey, area: Rect, child_index: Option<usize>) -> Rect {
        let Some(mut current) = self.layers.get(&layer).and_then(Weak::upgrade) else {
            return area;
        };
        let mut area = area;
        let mut index = child_index.unwrap_or(0);
        loop {
            area = area.inflate(current.filter_outset_from(index));
            let Some(parent) = current.parent() else {
                break;
            };
            index = parent.index_of(current.key()).unwrap_or(0);
            current = parent;
        }
        area
    }

    fn apply_view(&mut self, next: ViewState) -> Result<(), RenderManagerError> {
        let current = self.shared.view();
        if next == current {
            return Ok(());
        }
        if next.zoom() == current.zoom() && next.canvas_rect() == current.canvas_rect() {
            self.shared.set_view(next);
            self.shared
                .queue
                .update(|queue| queue.set_visible(next.visible_rect()));
            log::debug!("[render] visible rect now {:?}", next.visible_rect());
            return Ok(());
        }

        let surface = DisplaySurface::try_new(next.canvas_rect())?;
        self.view_epoch += 1;
        self.shared.set_view(next);
        let prepare = self.synchronize(next);
        let shared = &self.shared;
        let mut display = shared.write_display();
        shared.queue.update(|queue| {
            let generation = queue.reconfigure(next.canvas_rect(), next.visible_rect());
            *display = surface.with_generation(generation);
            queue.enqueue_prepare(prepare);
        });
        drop(display);
        log::debug!(
            "[render] reconfigured: zoom {} canvas {:?}",
            next.zoom().get(),
            next.canvas_rect()
        );
        shared.notify_display(DisplayEvent::Reconfigured {
            canvas: next.canvas_rect(),
        });
        Ok(())
    }
}
