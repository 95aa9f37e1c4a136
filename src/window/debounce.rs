use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::BridgeError;

pub type DebounceAction = Box<dyn FnOnce() + Send + 'static>;

/// A single-slot delayed action. Scheduling replaces whatever was pending, so a
/// burst of triggers runs the action at most once, `delay` after the last one.
pub trait DebounceTimer: Send + Sync {
    fn schedule(&self, delay: Duration, action: DebounceAction);
    fn cancel(&self);
}

impl<T: DebounceTimer + ?Sized> DebounceTimer for Arc<T> {
    fn schedule(&self, delay: Duration, action: DebounceAction) {
        (**self).schedule(delay, action)
    }

    fn cancel(&self) {
        (**self).cancel()
    }
}

struct Pending {
    due: Instant,
    action: DebounceAction,
}

#[derive(Default)]
struct TimerState {
    pending: Option<Pending>,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    condvar: Condvar,
}

/// [`DebounceTimer`] backed by one worker thread. The action runs on the worker,
/// so it should only hand work to the UI thread.
pub struct Debouncer {
    shared: Arc<TimerShared>,
    worker: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(name: &str) -> Result<Self, BridgeError> {
        let shared = Arc::new(TimerShared { state: Mutex::new(TimerState::default()), condvar: Condvar::new() });
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_worker(&worker_shared))
            .map_err(|e| BridgeError::Platform(format!("debounce worker: {e}")))?;
        debug!("[Debouncer] worker '{}' started", name);
        Ok(Self { shared, worker: Some(worker) })
    }
}

fn run_worker(shared: &TimerShared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        match state.pending.as_ref().map(|p| p.due) {
            None => shared.condvar.wait(&mut state),
            Some(due) if Instant::now() >= due => {
                if let Some(pending) = state.pending.take() {
                    MutexGuard::unlocked(&mut state, || (pending.action)());
                }
            }
            Some(due) => {
                shared.condvar.wait_until(&mut state, due);
            }
        }
    }
}

impl DebounceTimer for Debouncer {
    fn schedule(&self, delay: Duration, action: DebounceAction) {
        let mut state = self.shared.state.lock();
        state.pending = Some(Pending { due: Instant::now() + delay, action });
        self.shared.condvar.notify_one();
    }

    fn cancel(&self) {
        self.shared.state.lock().pending = None;
        self.shared.condvar.notify_one();
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.pending = None;
            state.shutdown = true;
        }
        self.shared.condvar.notify_one();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                error!("[Debouncer] worker panicked");
            }
        }
    }
}
