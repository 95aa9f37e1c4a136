use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    thread::ThreadId,
    time::{Duration, Instant},
};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

/// The host's UI task queue as seen by the bridge.
///
/// `post` may be called from any thread (engine callbacks, the debounce worker);
/// the task itself runs later on the UI thread.
pub trait UiScheduler: Send + Sync {
    fn post(&self, task: UiTask) -> TaskId;
    /// Drops a task that has not started yet. Returns whether it was still queued.
    fn cancel(&self, id: TaskId) -> bool;
}

struct QueuedTask {
    id: TaskId,
    task: UiTask,
}

/// FIFO implementation of [`UiScheduler`] for hosts without their own task runner.
/// The owning thread calls [`UiTaskQueue::run_pending`] from its loop.
pub struct UiTaskQueue {
    queue: Mutex<VecDeque<QueuedTask>>,
    condvar: Condvar,
    next_id: AtomicU64,
    runner_thread: Mutex<Option<ThreadId>>,
}

impl Default for UiTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl UiTaskQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            next_id: AtomicU64::new(1),
            runner_thread: Mutex::new(None),
        }
    }

    /// Marks the calling thread as the one that runs tasks.
    pub fn bind_to_current_thread(&self) {
        *self.runner_thread.lock() = Some(std::thread::current().id());
    }

    pub fn runs_tasks_on_current_thread(&self) -> bool {
        match *self.runner_thread.lock() {
            Some(id) => id == std::thread::current().id(),
            None => {
                warn!("[UiTaskQueue] runner thread not bound");
                false
            }
        }
    }

    /// Runs every task queued at the time of the call. Tasks posted while
    /// running wait for the next call, so a task that re-posts itself cannot
    /// starve the loop.
    pub fn run_pending(&self) -> usize {
        let batch: Vec<QueuedTask> = self.queue.lock().drain(..).collect();
        let count = batch.len();
        for queued in batch {
            (queued.task)();
        }
        count
    }

    /// Blocks up to `timeout` for work, then runs what is pending.
    pub fn wait_and_run(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        {
            let mut queue = self.queue.lock();
            while queue.is_empty() {
                if self.condvar.wait_until(&mut queue, deadline).timed_out() {
                    break;
                }
            }
        }
        self.run_pending()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl UiScheduler for UiTaskQueue {
    fn post(&self, task: UiTask) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.queue.lock().push_back(QueuedTask { id, task });
        self.condvar.notify_one();
        id
    }

    fn cancel(&self, id: TaskId) -> bool {
        let mut queue = self.queue.lock();
        let before = queue.len();
        queue.retain(|queued| queued.id != id);
        let removed = queue.len() != before;
        if removed {
            debug!("[UiTaskQueue] cancelled {:?}", id);
        }
        removed
    }
}
