//! Worker threading shared by the renderer: a blocking, closable job queue whose
//! selection logic is supplied by a [`JobPolicy`], and a fixed pool of named threads
//! draining it.

use std::num::NonZeroUsize;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Scheduling state kept under the queue lock.
pub trait JobPolicy: Send {
    type Job: Send;

    /// Claims the next runnable job, if any.
    fn next_job(&mut self) -> Option<Self::Job>;

    /// True when nothing is queued or running.
    fn is_idle(&self) -> bool;
}

struct QueueInner<P> {
    policy: P,
    closed: bool,
}

pub struct JobQueue<P: JobPolicy> {
    inner: Mutex<QueueInner<P>>,
    work_ready: Condvar,
    idle: Condvar,
}

impl<P: JobPolicy> JobQueue<P> {
    pub fn new(policy: P) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                policy,
                closed: false,
            }),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<P>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            log::error!("[engine] job queue lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Mutates the policy under the queue lock, then wakes workers and idle waiters.
    pub fn update<R>(&self, apply: impl FnOnce(&mut P) -> R) -> R {
        let result = {
            let mut inner = self.lock();
            apply(&mut inner.policy)
        };
        self.work_ready.notify_all();
        self.idle.notify_all();
        result
    }

    /// Reads the policy under the queue lock without waking anyone.
    pub fn inspect<R>(&self, read: impl FnOnce(&P) -> R) -> R {
        let inner = self.lock();
        read(&inner.policy)
    }

    /// Blocks until a job is available. Returns `None` once the queue is closed.
    pub fn wait_next(&self) -> Option<P::Job> {
        let mut inner = self.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(job) = inner.policy.next_job() {
                return Some(job);
            }
            inner = self
                .work_ready
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Waits until the policy reports idle. Returns `false` on timeout or close.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if inner.closed {
                return false;
            }
            if inner.policy.is_idle() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            inner = self
                .idle
                .wait_timeout(inner, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Wakes every waiter; subsequent `wait_next` calls return `None`.
    ///
    /// Jobs still queued at that point are abandoned.
    pub fn close(&self) {
        self.lock().closed = true;
        self.work_ready.notify_all();
        self.idle.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Fixed set of threads draining one [`JobQueue`]. Closing the queue stops them;
/// dropping the pool closes the queue and joins every thread.
pub struct WorkerPool<P: JobPolicy + 'static> {
    name: String,
    queue: Arc<JobQueue<P>>,
    handles: Vec<JoinHandle<()>>,
}

impl<P: JobPolicy + 'static> WorkerPool<P> {
    /// Spawns `count` threads named `{name}-{index}`.
    ///
    /// `make_worker` builds each thread's job handler up front so per-worker state
    /// (caches, scratch buffers) is owned by that thread alone.
    pub fn spawn<W>(
        name: &str,
        count: NonZeroUsize,
        queue: Arc<JobQueue<P>>,
        mut make_worker: impl FnMut(usize) -> W,
    ) -> Result<Self, PoolError>
    where
        W: FnMut(P::Job) + Send + 'static,
    {
        let mut pool = Self {
            name: name.to_owned(),
            queue,
            handles: Vec::with_capacity(count.get()),
        };
        for index in 0..count.get() {
            let mut handler = make_worker(index);
            let queue = Arc::clone(&pool.queue);
            let thread_name = format!("{name}-{index}");
            let handle = std::thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    log::trace!("[engine] {thread_name} started");
                    while let Some(job) = queue.wait_next() {
                        handler(job);
                    }
                    log::trace!("[engine] {thread_name} exiting");
                })
                .map_err(PoolError::Spawn)?;
            pool.handles.push(handle);
        }
        log::info!("[engine] started {} {} workers", count, pool.name);
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn queue(&self) -> &Arc<JobQueue<P>> {
        &self.queue
    }

    fn shutdown(&mut self) {
        self.queue.close();
        for handle in self.handles.drain(..) {
            let thread_name = handle.thread().name().unwrap_or("worker").to_owned();
            if handle.join().is_err() {
                log::error!("[engine] {thread_name} panicked");
            }
        }
    }
}

impl<P: JobPolicy + 'static> Drop for WorkerPool<P> {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.shutdown();
            log::info!("[engine] stopped {} workers", self.name);
        }
    }
}

/// One worker per available processing unit.
pub fn default_worker_count() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct CountingPolicy {
        queued: VecDeque<u32>,
        running: usize,
        done: Vec<u32>,
    }

    impl JobPolicy for CountingPolicy {
        type Job = u32;

        fn next_job(&mut self) -> Option<u32> {
            let job = self.queued.pop_front()?;
            self.running += 1;
            Some(job)
        }

        fn is_idle(&self) -> bool {
            self.queued.is_empty() && self.running == 0
        }
    }

    #[test]
    fn pool_drains_queue_and_reports_idle() {
        let queue = Arc::new(JobQueue::new(CountingPolicy::default()));
        let pool = WorkerPool::spawn(
            "test",
            NonZeroUsize::new(3).expect("non-zero"),
            Arc::clone(&queue),
            |_| {
                let queue = Arc::clone(&queue);
                move |job: u32| {
                    queue.update(|policy| {
                        policy.running -= 1;
                        policy.done.push(job);
                    });
                }
            },
        )
        .expect("spawn pool");
        assert_eq!(pool.len(), 3);

        queue.update(|policy| policy.queued.extend(0..100));
        assert!(queue.wait_idle(Duration::from_secs(10)));

        let mut done = queue.inspect(|policy| policy.done.clone());
        done.sort_unstable();
        assert_eq!(done, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn closing_releases_blocked_workers() {
        let queue = Arc::new(JobQueue::new(CountingPolicy::default()));
        let (exit_sender, exit_receiver) = crossbeam_channel::unbounded();
        let pool = WorkerPool::spawn(
            "closing",
            NonZeroUsize::new(2).expect("non-zero"),
            Arc::clone(&queue),
            |_| |_job: u32| {},
        )
        .expect("spawn pool");
        std::thread::spawn(move || {
            drop(pool);
            let _ = exit_sender.send(());
        });
        assert!(exit_receiver.recv_timeout(Duration::from_secs(10)).is_ok());
        assert!(queue.is_closed());
        assert_eq!(queue.wait_next(), None);
    }

    #[test]
    fn wait_idle_times_out_while_work_is_pending() {
        let queue = JobQueue::new(CountingPolicy::default());
        queue.update(|policy| policy.queued.push_back(1));
        assert!(!queue.wait_idle(Duration::from_millis(20)));
    }
}
