use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;

use super::task_queue::{TaskId, UiScheduler};

/// Coalescing trampoline from an engine thread onto the UI thread.
///
/// `raise` is all an engine callback does: at most one UI task is queued at a
/// time, and the action runs there. Once detached, queued work is cancelled and
/// later raises are ignored.
pub(crate) struct UiSignal {
    scheduler: Arc<dyn UiScheduler>,
    scheduled: Mutex<Option<TaskId>>,
    detached: AtomicBool,
    action: Box<dyn Fn() + Send + Sync>,
}

impl UiSignal {
    pub fn new(scheduler: Arc<dyn UiScheduler>, action: Box<dyn Fn() + Send + Sync>) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            scheduled: Mutex::new(None),
            detached: AtomicBool::new(false),
            action,
        })
    }

    pub fn raise(self: &Arc<Self>) {
        if self.detached.load(Ordering::Acquire) {
            return;
        }
        let mut scheduled = self.scheduled.lock();
        if scheduled.is_some() {
            return;
        }
        let signal = self.clone();
        *scheduled = Some(self.scheduler.post(Box::new(move || signal.fire())));
    }

    fn fire(&self) {
        // Cleared before running so a raise during the action queues a fresh task.
        self.scheduled.lock().take();
        if self.detached.load(Ordering::Acquire) {
            return;
        }
        (self.action)();
    }

    pub fn detach(&self) {
        self.detached.store(true, Ordering::Release);
        if let Some(id) = self.scheduled.lock().take() {
            self.scheduler.cancel(id);
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::UiTaskQueue;
    use std::sync::atomic::AtomicUsize;

    fn counting_signal(queue: &Arc<UiTaskQueue>) -> (Arc<UiSignal>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let signal = UiSignal::new(
            queue.clone(),
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (signal, hits)
    }

    #[test]
    fn bursts_coalesce_into_one_task() {
        let queue = Arc::new(UiTaskQueue::new());
        let (signal, hits) = counting_signal(&queue);
        for _ in 0..10 {
            signal.raise();
        }
        assert_eq!(queue.len(), 1);
        queue.run_pending();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!signal.is_scheduled());
    }

    #[test]
    fn detach_cancels_queued_work() {
        let queue = Arc::new(UiTaskQueue::new());
        let (signal, hits) = counting_signal(&queue);
        signal.raise();
        signal.detach();
        signal.raise();
        assert!(queue.is_empty());
        queue.run_pending();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
