//! Renderer crate root.
//!
//! This module defines the public API (`RenderManager`, `RenderConfig`, `DisplayGuard`)
//! and the state shared between the manager thread and the render workers.
//!
//! Internal architecture overview:
//! - `snapshot`/`snapshot_layer`/`snapshot_objects`/`filter`: render-side mirror of the scene.
//! - `raster`: coverage computation for vector geometry and image sampling.
//! - `dirty`: dirty/clean/in-progress regions and the job selection policy.
//! - `manager`: event batching, snapshot synchronization and view changes.
//! - `worker`: prepare and composite jobs running on the pool threads.
//! - `display`: front/back buffer pair handed to the presentation side.

mod config;
mod dirty;
mod display;
mod filter;
mod manager;
mod raster;
mod snapshot;
mod snapshot_layer;
mod snapshot_objects;
mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockWriteGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, bounded, unbounded};
use document::{Document, SceneError};
use engine::{JobQueue, PoolError, WorkerPool};
use model::{AllocError, Rect, Region};
use render_protocol::{DisplayEvent, NodeKey};
use view::{CanvasLayout, ViewError, ViewState, ZoomLevel};

pub use config::{MAX_TILE_SIZE, MAX_WORKERS, RenderConfig, RenderConfigError};
pub use display::{DisplayGuard, DisplaySurface};
pub use snapshot::SnapshotStats;

use dirty::RenderQueue;
use manager::{ManagerCommand, ManagerThread};
use snapshot::ObjectSnapshot;
use snapshot_layer::LayerSnapshot;
use worker::RenderWorker;

#[derive(Debug, thiserror::Error)]
pub enum RenderManagerError {
    #[error("invalid render config: {0}")]
    Config(#[from] RenderConfigError),
    #[error("invalid view: {0}")]
    View(#[from] ViewError),
    #[error("display buffers: {0}")]
    Display(#[from] AllocError),
    #[error("scene: {0}")]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Spawn(#[from] PoolError),
    #[error("render manager is shut down")]
    ShutDown,
}

/// State reachable from the manager thread, every worker and the public handle.
///
/// Whoever needs both the display lock and the queue lock takes the display lock first.
pub(crate) struct Shared {
    pub(crate) queue: Arc<JobQueue<RenderQueue>>,
    pub(crate) root: Arc<LayerSnapshot>,
    display: RwLock<DisplaySurface>,
    display_listeners: Mutex<Vec<Sender<DisplayEvent>>>,
    view: Mutex<ViewState>,
    shutting_down: AtomicBool,
}

impl Shared {
    pub(crate) fn view(&self) -> ViewState {
        *lock(&self.view)
    }

    pub(crate) fn set_view(&self, view: ViewState) {
        *lock(&self.view) = view;
    }

    pub(crate) fn write_display(&self) -> RwLockWriteGuard<'_, DisplaySurface> {
        self.display.write().unwrap_or_else(|poisoned| {
            log::error!("[render] display lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Delivers `event` to every display listener, dropping disconnected ones.
    pub(crate) fn notify_display(&self, event: DisplayEvent) {
        lock(&self.display_listeners).retain(|listener| listener.send(event).is_ok());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::error!("[render] shared state lock poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Keeps a document's pixels up to date on a pool of worker threads.
///
/// Edits made through the document's write lock are picked up asynchronously; the
/// front buffer of the display surface converges to the latest state, and display
/// listeners are told which rectangles became clean.
pub struct RenderManager {
    shared: Arc<Shared>,
    commands: Sender<ManagerCommand>,
    manager: Option<JoinHandle<()>>,
    workers: Option<WorkerPool<RenderQueue>>,
}

impl RenderManager {
    pub fn new(document: Arc<Document>, config: RenderConfig) -> Result<Self, RenderManagerError> {
        config.validate()?;
        let zoom = ZoomLevel::new(config.initial_zoom)?;
        let view = ViewState::fit_document(document.bounds(), zoom)?;
        let display = DisplaySurface::try_new(view.canvas_rect())?;

        let (listener, events) = unbounded();
        let root_key = document.read().root();
        let root = LayerSnapshot::new(root_key, None);
        document.read().add_listener(root_key, listener.clone())?;
        let synced = manager::synchronize(&document, &root, view, 0, &listener);

        let mut layers = HashMap::new();
        layers.insert(root_key, root.downgrade());
        for layer in synced.new_layers {
            if let Some(snapshot) = layer.upgrade() {
                layers.insert(snapshot.key(), layer);
            }
        }

        let mut queue = RenderQueue::new(
            Arc::clone(&root),
            view.canvas_rect(),
            view.visible_rect(),
            config.tile_size,
        );
        queue.add_dirty(root.area());
        queue.enqueue_prepare(synced.prepare);
        let queue = Arc::new(JobQueue::new(queue));

        let shared = Arc::new(Shared {
            queue: Arc::clone(&queue),
            root,
            display: RwLock::new(display),
            display_listeners: Mutex::new(Vec::new()),
            view: Mutex::new(view),
            shutting_down: AtomicBool::new(false),
        });

        let workers = WorkerPool::spawn(
            "render",
            config.resolved_worker_count(),
            queue,
            |index| {
                let mut worker = RenderWorker::new(index, Arc::clone(&shared));
                move |job| worker.run(job)
            },
        )?;

        let (commands, command_receiver) = unbounded();
        let manager = ManagerThread::new(
            document,
            Arc::clone(&shared),
            events,
            listener,
            command_receiver,
            layers,
        );
        let manager = std::thread::Builder::new()
            .name("render-manager".to_owned())
            .spawn(move || manager.run())
            .map_err(PoolError::Spawn)?;

        Ok(Self {
            shared,
            commands,
            manager: Some(manager),
            workers: Some(workers),
        })
    }

    /// Read access to the display buffers, or `None` once shutdown has begun.
    ///
    /// The region queries below may be called while the guard is held; the clean region
    /// then matches what the front buffer shows.
    pub fn lock_display(&self) -> Option<DisplayGuard<'_>> {
        if self.shared.shutting_down.load(Ordering::Acquire) {
            return None;
        }
        match self.shared.display.read() {
            Ok(guard) => Some(DisplayGuard::new(guard)),
            Err(poisoned) => {
                log::error!("[render] display lock poisoned, recovering");
                Some(DisplayGuard::new(poisoned.into_inner()))
            }
        }
    }

    /// Registers a channel that receives clean-rectangle and reconfiguration notices.
    pub fn add_display_listener(&self, listener: Sender<DisplayEvent>) {
        lock(&self.shared.display_listeners).push(listener);
    }

    /// Re-targets rendering to a new zoom; the whole canvas is rendered again.
    pub fn set_zoom_level(&self, zoom: f64) -> Result<(), RenderManagerError> {
        let zoom = ZoomLevel::new(zoom)?;
        self.request(|reply| ManagerCommand::SetZoom { zoom, reply })
    }

    /// Changes the canvas rect backed by the display and the part of it rendered.
    pub fn set_canvas_layout(
        &self,
        data_rect: Rect,
        visible_rect: Rect,
    ) -> Result<(), RenderManagerError> {
        let layout = CanvasLayout::new(data_rect, visible_rect)?;
        self.request(|reply| ManagerCommand::SetLayout { layout, reply })
    }

    fn request(
        &self,
        command: impl FnOnce(Sender<Result<(), RenderManagerError>>) -> ManagerCommand,
    ) -> Result<(), RenderManagerError> {
        let (reply, response) = bounded(1);
        self.commands
            .send(command(reply))
            .map_err(|_| RenderManagerError::ShutDown)?;
        response.recv().map_err(|_| RenderManagerError::ShutDown)?
    }

    /// Processes every event sent so far and waits until the visible canvas is clean.
    ///
    /// Returns `false` on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (reply, ack) = bounded(1);
        if self.commands.send(ManagerCommand::Flush { reply }).is_err() {
            return false;
        }
        if ack.recv_timeout(timeout).is_err() {
            return false;
        }
        self.shared
            .queue
            .wait_idle(deadline.saturating_duration_since(Instant::now()))
    }

    pub fn zoom_level(&self) -> f64 {
        self.shared.view().zoom().get()
    }

    pub fn canvas_layout(&self) -> CanvasLayout {
        self.shared.view().layout()
    }

    pub fn dirty_region(&self) -> Region {
        self.shared.queue.inspect(|queue| queue.dirty().clone())
    }

    pub fn clean_region(&self) -> Region {
        self.shared.queue.inspect(|queue| queue.clean().clone())
    }

    pub fn lowest_changed_index(&self) -> Option<usize> {
        self.shared.queue.inspect(RenderQueue::lowest_changed_index)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.as_ref().map_or(0, WorkerPool::len)
    }

    /// Instrumentation counters of the snapshot mirroring `key`, if it exists.
    pub fn snapshot_stats(&self, key: NodeKey) -> Option<SnapshotStats> {
        if key == self.shared.root.key() {
            return Some(self.shared.root.stats());
        }
        self.find_snapshot(key).map(|snapshot| snapshot.stats())
    }

    pub(crate) fn find_snapshot(&self, key: NodeKey) -> Option<Arc<dyn ObjectSnapshot>> {
        self.shared.root.find(key)
    }
}

impl Drop for RenderManager {
    fn drop(&mut self) {
        self.shared.shutting_down.store(true, Ordering::Release);
        let _ = self.commands.send(ManagerCommand::Shutdown);
        if let Some(manager) = self.manager.take() {
            if manager.join().is_err() {
                log::error!("[render] manager thread panicked");
            }
        }
        drop(self.workers.take());
    }
}
