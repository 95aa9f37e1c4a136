//! Host-window translucency and container visibility around OS animations.
//!
//! Minimize/maximize animations and off-screen parking make the host opaque and
//! hide the container at once; compositing resumes only after the host has been
//! quiet for the settle delay. The state lock is never held across a window
//! manager call: moving the host's neighbours can re-enter the host window
//! procedure, which calls back in here.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use log::{debug, info, warn};
use parking_lot::Mutex;

use super::{
    debounce::DebounceTimer,
    manager::{Rect, SizeKind, WindowManager},
};
use crate::{bridge::UiScheduler, error::BridgeError, handles::WindowRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositionState {
    /// Host translucent, container shown behind it.
    Composited,
    /// Host opaque, container hidden.
    #[default]
    Opaque,
    /// A host animation is running; waiting for the settle timer.
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowOp {
    PlaceContainer(Rect),
    ShowContainer(bool),
    Composition(bool),
    RefreshHostFrame,
    Flush,
    RedrawHost,
}

#[derive(Debug, Default)]
struct GovernorState {
    state: CompositionState,
    desired_visible: bool,
    container: Option<WindowRef>,
    composition_enabled: bool,
    last_size: SizeKind,
    hidden_offscreen: bool,
    generation: u64,
    settle_count: u64,
}

impl GovernorState {
    fn suspend(&mut self) -> Vec<WindowOp> {
        self.state = CompositionState::Suspended;
        self.composition_enabled = false;
        vec![WindowOp::Composition(false), WindowOp::ShowContainer(false), WindowOp::Flush]
    }

    fn arm(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

struct GovernorInner {
    wm: Arc<dyn WindowManager>,
    scheduler: Arc<dyn UiScheduler>,
    timer: Box<dyn DebounceTimer>,
    host: WindowRef,
    settle_delay: Duration,
    state: Mutex<GovernorState>,
}

/// Drives [`CompositionState`] from host window events. UI thread only, apart
/// from the timer, which only posts back to the UI thread.
pub struct CompositionGovernor {
    inner: Arc<GovernorInner>,
}

impl CompositionGovernor {
    pub fn new(
        wm: Arc<dyn WindowManager>,
        scheduler: Arc<dyn UiScheduler>,
        timer: Box<dyn DebounceTimer>,
        host: WindowRef,
        settle_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(GovernorInner {
                wm,
                scheduler,
                timer,
                host,
                settle_delay,
                state: Mutex::new(GovernorState::default()),
            }),
        }
    }

    pub fn host(&self) -> WindowRef {
        self.inner.host
    }

    pub fn state(&self) -> CompositionState {
        self.inner.state.lock().state
    }

    pub fn desired_visible(&self) -> bool {
        self.inner.state.lock().desired_visible
    }

    pub fn is_composition_enabled(&self) -> bool {
        self.inner.state.lock().composition_enabled
    }

    /// Settle steps that actually ran; superseded timer firings do not count.
    pub fn settle_count(&self) -> u64 {
        self.inner.state.lock().settle_count
    }

    /// Starts governing `container`. It is expected hidden.
    pub fn attach_container(&self, container: WindowRef) {
        let mut s = self.inner.state.lock();
        s.container = Some(container);
        s.state = CompositionState::Opaque;
        info!("[CompositionGovernor] governing container {:?} behind {:?}", container, self.inner.host);
    }

    /// Stops governing: cancels a pending settle, makes the host opaque and
    /// hides the container.
    pub fn detach_container(&self) {
        self.inner.timer.cancel();
        let (container, ops) = {
            let mut s = self.inner.state.lock();
            s.generation += 1;
            let Some(container) = s.container.take() else {
                return;
            };
            let mut ops = Vec::new();
            if s.composition_enabled {
                ops.push(WindowOp::Composition(false));
            }
            ops.push(WindowOp::ShowContainer(false));
            s.composition_enabled = false;
            s.state = CompositionState::Opaque;
            (Some(container), ops)
        };
        self.apply(container, ops);
        debug!("[CompositionGovernor] container detached");
    }

    /// Records the caller's visibility wish and acts on it unless an animation
    /// is in progress, in which case the settle step honours it later.
    pub fn set_visible(&self, visible: bool) {
        let rect = self.host_rect();
        let (container, ops) = {
            let mut s = self.inner.state.lock();
            s.desired_visible = visible;
            let Some(container) = s.container else {
                debug!("[CompositionGovernor] set_visible({}) before a container exists", visible);
                return;
            };
            if s.state == CompositionState::Suspended {
                debug!("[CompositionGovernor] set_visible({}) deferred until settle", visible);
                return;
            }
            let mut ops = Vec::new();
            if visible {
                if let Some(rect) = rect.filter(|r| !r.is_empty()) {
                    ops.push(WindowOp::PlaceContainer(rect));
                }
                ops.push(WindowOp::RefreshHostFrame);
                if !s.composition_enabled {
                    ops.push(WindowOp::Composition(true));
                    s.composition_enabled = true;
                }
                ops.push(WindowOp::ShowContainer(true));
                ops.push(WindowOp::Flush);
                s.state = CompositionState::Composited;
            } else {
                ops.extend([WindowOp::Composition(false), WindowOp::ShowContainer(false), WindowOp::Flush]);
                s.composition_enabled = false;
                s.state = CompositionState::Opaque;
            }
            (Some(container), ops)
        };
        self.apply(container, ops);
    }

    /// Host moved or its position changed. Keeps the container glued to the
    /// host; parking off-screen and coming back both count as animations.
    pub fn on_host_moved(&self) {
        let Some(rect) = self.host_rect().filter(|r| !r.is_empty()) else {
            return;
        };
        let (container, ops, armed) = {
            let mut s = self.inner.state.lock();
            let Some(container) = s.container else {
                return;
            };
            let (ops, armed) = match (rect.is_offscreen(), s.hidden_offscreen) {
                (true, false) => {
                    debug!("[CompositionGovernor] host parked off-screen at {:?}", rect);
                    s.hidden_offscreen = true;
                    let ops = s.suspend();
                    (ops, Some(s.arm()))
                }
                (true, true) => (Vec::new(), None),
                (false, true) => {
                    debug!("[CompositionGovernor] host back on-screen at {:?}", rect);
                    s.hidden_offscreen = false;
                    let mut ops = s.suspend();
                    ops.insert(0, WindowOp::PlaceContainer(rect));
                    (ops, Some(s.arm()))
                }
                (false, false) => (vec![WindowOp::PlaceContainer(rect)], None),
            };
            (Some(container), ops, armed)
        };
        self.apply(container, ops);
        if let Some(generation) = armed {
            self.schedule_settle(generation);
        }
    }

    /// Host size notification. Entering or leaving minimized/maximized, or
    /// coming back from off-screen, suspends composition and (re)arms the
    /// settle timer; a plain resize just repositions the container.
    pub fn on_host_size(&self, kind: SizeKind) {
        let rect = self.host_rect();
        let (container, ops, armed) = {
            let mut s = self.inner.state.lock();
            let previous = s.last_size;
            s.last_size = kind;
            let Some(container) = s.container else {
                return;
            };
            let transition = kind != SizeKind::Restored || previous != SizeKind::Restored || s.hidden_offscreen;
            if transition {
                debug!("[CompositionGovernor] size {:?} -> {:?}: suspending", previous, kind);
                s.hidden_offscreen = false;
                let ops = s.suspend();
                let generation = s.arm();
                (Some(container), ops, Some(generation))
            } else {
                let ops = rect
                    .filter(|r| !r.is_empty())
                    .map(WindowOp::PlaceContainer)
                    .into_iter()
                    .collect();
                (Some(container), ops, None)
            }
        };
        self.apply(container, ops);
        if let Some(generation) = armed {
            self.schedule_settle(generation);
        }
    }

    pub fn on_host_activated(&self) {
        let Some(rect) = self.host_rect().filter(|r| !r.is_empty()) else {
            return;
        };
        let container = self.inner.state.lock().container;
        self.apply(container, vec![WindowOp::PlaceContainer(rect)]);
    }

    fn schedule_settle(&self, generation: u64) {
        let weak: Weak<GovernorInner> = Arc::downgrade(&self.inner);
        let scheduler = self.inner.scheduler.clone();
        self.inner.timer.schedule(
            self.inner.settle_delay,
            Box::new(move || {
                scheduler.post(Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        CompositionGovernor { inner }.settle(generation);
                    }
                }));
            }),
        );
    }

    /// Second phase of a transition: the host has been quiet for the settle
    /// delay. A stale `generation` means a newer transition owns the timer.
    fn settle(&self, generation: u64) {
        let rect = self.host_rect();
        let (container, ops) = {
            let mut s = self.inner.state.lock();
            if generation != s.generation || s.state != CompositionState::Suspended {
                debug!("[CompositionGovernor] settle #{} superseded (now #{})", generation, s.generation);
                return;
            }
            let Some(container) = s.container else {
                return;
            };
            s.settle_count += 1;

            let mut ops = Vec::new();
            if let Some(rect) = rect.filter(|r| !r.is_empty() && !r.is_offscreen()) {
                ops.push(WindowOp::PlaceContainer(rect));
            }
            if rect.is_some_and(|r| r.is_offscreen()) {
                // Still minimized; the restore notification arms the next settle.
                s.hidden_offscreen = true;
                debug!("[CompositionGovernor] settle #{}: host still off-screen", generation);
            } else if s.desired_visible {
                ops.push(WindowOp::RefreshHostFrame);
                if !s.composition_enabled {
                    ops.push(WindowOp::Composition(true));
                    s.composition_enabled = true;
                }
                ops.extend([WindowOp::ShowContainer(true), WindowOp::Flush, WindowOp::RedrawHost]);
                s.state = CompositionState::Composited;
            } else {
                s.state = CompositionState::Opaque;
            }
            debug!("[CompositionGovernor] settle #{} -> {:?}", generation, s.state);
            (Some(container), ops)
        };
        self.apply(container, ops);
    }

    fn host_rect(&self) -> Option<Rect> {
        self.inner.wm.window_rect(self.inner.host)
    }

    fn apply(&self, container: Option<WindowRef>, ops: Vec<WindowOp>) {
        let wm = &self.inner.wm;
        let host = self.inner.host;
        for op in ops {
            let result: Result<(), BridgeError> = match (op, container) {
                (WindowOp::PlaceContainer(rect), Some(c)) => wm.place_behind(c, host, rect),
                (WindowOp::ShowContainer(shown), Some(c)) => wm.set_shown(c, shown),
                (WindowOp::PlaceContainer(_) | WindowOp::ShowContainer(_), None) => Ok(()),
                (WindowOp::Composition(enabled), _) => wm.set_composition(host, enabled),
                (WindowOp::RefreshHostFrame, _) => wm.refresh_frame(host),
                (WindowOp::Flush, _) => wm.flush_composition(),
                (WindowOp::RedrawHost, _) => wm.redraw(host),
            };
            if let Err(e) = result {
                warn!("[CompositionGovernor] {:?} failed: {}", op, e);
            }
        }
    }
}
