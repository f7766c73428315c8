//! Store configuration and the task queue used for root futures.
//!
//! Root futures are the only asynchronous part of a store. They are handed to
//! a [`Spawner`], which stands in for the host's task queue; when the future
//! settles it re-enters the store on whatever thread drives that queue.
//!
//! The default spawner is the calling thread's [`LocalQueue`], which the host
//! drives with [`LocalQueue::current`]`().run_pending()`. Tokio hosts opt in
//! with [`TokioSpawner`].

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_util::future::LocalBoxFuture;
use futures_util::task::noop_waker;
use tokio::task::LocalSet;

use crate::deps::DependencyMode;

/// Host task queue for root-future settlements.
pub trait Spawner {
    /// Queue a task. The task must eventually be polled to completion on the
    /// thread that owns the store.
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

/// Spawns settlements onto a tokio `LocalSet`.
///
/// Tasks are queued on the set itself, so spawning never needs a runtime
/// context; they run once the host drives the set (`run_until` or `.await`).
#[derive(Clone)]
pub struct TokioSpawner {
    local: Rc<LocalSet>,
}

impl TokioSpawner {
    pub fn new(local: Rc<LocalSet>) -> Self {
        Self { local }
    }

    pub fn local_set(&self) -> &Rc<LocalSet> {
        &self.local
    }
}

impl Spawner for TokioSpawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        // Dropping the join handle detaches the task.
        drop(self.local.spawn_local(task));
    }
}

impl fmt::Debug for TokioSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioSpawner").finish_non_exhaustive()
    }
}

thread_local! {
    static CURRENT_QUEUE: Rc<LocalQueue> = LocalQueue::new();
}

/// Task queue driven by the host.
///
/// Suited to UI loops that own their event pump: queued settlements only make
/// progress when [`LocalQueue::run_pending`] is called.
#[derive(Default)]
pub struct LocalQueue {
    tasks: RefCell<Vec<LocalBoxFuture<'static, ()>>>,
}

impl LocalQueue {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// The calling thread's shared queue, used by [`Config::default`].
    pub fn current() -> Rc<Self> {
        CURRENT_QUEUE.with(Rc::clone)
    }

    /// Number of tasks still waiting to complete.
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Poll queued tasks until a full pass completes none of them.
    ///
    /// Returns how many tasks completed.
    pub fn run_pending(&self) -> usize {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut completed = 0;

        loop {
            // Tasks may spawn more tasks while being polled, so the queue is
            // never borrowed across a poll.
            let batch = std::mem::take(&mut *self.tasks.borrow_mut());
            if batch.is_empty() {
                break;
            }
            let mut still_pending = Vec::with_capacity(batch.len());
            let mut progressed = false;
            for mut task in batch {
                match task.as_mut().poll(&mut cx) {
                    Poll::Ready(()) => {
                        completed += 1;
                        progressed = true;
                    }
                    Poll::Pending => still_pending.push(task),
                }
            }
            let mut tasks = self.tasks.borrow_mut();
            progressed |= !tasks.is_empty();
            still_pending.append(&mut tasks);
            *tasks = still_pending;
            if !progressed {
                break;
            }
        }

        completed
    }
}

impl Spawner for LocalQueue {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        self.tasks.borrow_mut().push(task);
    }
}

impl fmt::Debug for LocalQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalQueue")
            .field("pending", &self.len())
            .finish()
    }
}

/// Per-store configuration.
#[derive(Clone)]
pub struct Config {
    spawner: Rc<dyn Spawner>,
    dependency_mode: DependencyMode,
}

impl Config {
    /// Replace the task queue used for root futures.
    pub fn with_spawner(mut self, spawner: Rc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Choose how state handles found in dependency lists are treated.
    pub fn with_dependency_mode(mut self, mode: DependencyMode) -> Self {
        self.dependency_mode = mode;
        self
    }

    pub fn spawner(&self) -> &Rc<dyn Spawner> {
        &self.spawner
    }

    pub fn dependency_mode(&self) -> DependencyMode {
        self.dependency_mode
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spawner: LocalQueue::current(),
            dependency_mode: DependencyMode::from_env(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("dependency_mode", &self.dependency_mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn local_queue_runs_ready_tasks() {
        let queue = LocalQueue::new();
        let hits = Rc::new(Cell::new(0));

        for _ in 0..3 {
            let hits = hits.clone();
            queue.spawn(Box::pin(async move {
                hits.set(hits.get() + 1);
            }));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(hits.get(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn local_queue_keeps_pending_tasks() {
        let queue = LocalQueue::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let seen = Rc::new(Cell::new(None));

        let seen_task = seen.clone();
        queue.spawn(Box::pin(async move {
            seen_task.set(rx.await.ok());
        }));

        assert_eq!(queue.run_pending(), 0);
        assert_eq!(queue.len(), 1);

        tx.send(7).unwrap();
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(seen.get(), Some(7));
    }

    #[test]
    fn default_config_queues_on_the_thread_queue() {
        let before = LocalQueue::current().len();
        Config::default().spawner().spawn(Box::pin(async {}));
        assert_eq!(LocalQueue::current().len(), before + 1);
        LocalQueue::current().run_pending();
        assert!(LocalQueue::current().is_empty());
    }

    #[test]
    fn tokio_spawner_queues_without_a_runtime() {
        let local = Rc::new(LocalSet::new());
        let hits = Rc::new(Cell::new(0));
        let spawner = TokioSpawner::new(local.clone());

        let task_hits = hits.clone();
        spawner.spawn(Box::pin(async move {
            task_hits.set(task_hits.get() + 1);
        }));
        assert_eq!(hits.get(), 0);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(local.run_until(async {
            for _ in 0..100 {
                if hits.get() == 1 {
                    break;
                }
                tokio::task::yield_now().await;
            }
        }));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn config_builder_overrides_defaults() {
        let queue = LocalQueue::new();
        let config = Config::default()
            .with_spawner(queue.clone())
            .with_dependency_mode(DependencyMode::Reject);

        assert_eq!(config.dependency_mode(), DependencyMode::Reject);
        config.spawner().spawn(Box::pin(async {}));
        assert_eq!(queue.len(), 1);
    }
}
