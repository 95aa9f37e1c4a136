use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use log::{debug, info, trace, warn};

use super::manager::{ContainerEvent, ContainerEventHandler, Rect, WindowManager};
use crate::{
    error::BridgeError,
    handles::{OwnedWindow, WindowRef},
};

/// The container behind the host window plus the embedded windows inside it.
///
/// Rectangles in the table are in host client coordinates, as the host sent
/// them; [`WindowStack::global_rect`] turns them into container coordinates.
pub struct WindowStack {
    wm: Arc<dyn WindowManager>,
    host: WindowRef,
    container: Option<OwnedWindow>,
    views: HashMap<WindowRef, Rect>,
    device_pixel_ratio: f64,
    host_closed: bool,
}

impl WindowStack {
    pub fn new(wm: Arc<dyn WindowManager>, host: WindowRef) -> Self {
        Self { wm, host, container: None, views: HashMap::new(), device_pixel_ratio: 1.0, host_closed: false }
    }

    pub fn host(&self) -> WindowRef {
        self.host
    }

    pub fn container(&self) -> Option<WindowRef> {
        self.container.as_ref().map(OwnedWindow::window)
    }

    pub fn is_host_closed(&self) -> bool {
        self.host_closed
    }

    /// Creates the container on first use, hidden and stacked behind the host.
    pub fn ensure_container(&mut self) -> Result<WindowRef, BridgeError> {
        if let Some(container) = &self.container {
            return Ok(container.window());
        }
        if self.host_closed {
            return Err(BridgeError::Platform("host window already closed".to_string()));
        }
        let handler = container_event_handler(Arc::downgrade(&self.wm), self.host);
        let container = self.wm.create_container(self.host, handler)?;
        let window = container.window();
        if let Some(rect) = self.wm.window_rect(self.host).filter(|r| !r.is_empty()) {
            if let Err(e) = self.wm.place_behind(window, self.host, rect) {
                warn!("[WindowStack] initial placement of {:?} failed: {}", window, e);
            }
        }
        self.container = Some(container);
        info!("[WindowStack] Container {:?} created behind {:?}", window, self.host);
        Ok(window)
    }

    /// Adopts `window` into the container and places it at `rect`.
    pub fn track(&mut self, window: WindowRef, rect: Rect, device_pixel_ratio: f64) -> Result<(), BridgeError> {
        let container = self.ensure_container()?;
        if let Err(e) = self.wm.adopt(window, container) {
            warn!("[WindowStack] adopting {:?} failed: {}", window, e);
        }
        self.device_pixel_ratio = sanitize_ratio(device_pixel_ratio);
        self.views.insert(window, rect);
        self.move_view(window, rect);
        if let Err(e) = self.wm.set_shown(window, true) {
            warn!("[WindowStack] showing {:?} failed: {}", window, e);
        }
        debug!("[WindowStack] tracking {:?} at {:?}", window, rect);
        Ok(())
    }

    /// Records the new rectangle for a tracked window and moves it there.
    /// Returns `false` for windows that are not tracked.
    pub fn resize(&mut self, window: WindowRef, rect: Rect, device_pixel_ratio: f64) -> bool {
        let Some(entry) = self.views.get_mut(&window) else {
            debug!("[WindowStack] resize of untracked {:?}", window);
            return false;
        };
        *entry = rect;
        self.device_pixel_ratio = sanitize_ratio(device_pixel_ratio);
        self.move_view(window, rect);
        true
    }

    pub fn untrack(&mut self, window: WindowRef) -> Option<Rect> {
        self.views.remove(&window)
    }

    pub fn rect_of(&self, window: WindowRef) -> Option<Rect> {
        self.views.get(&window).copied()
    }

    pub fn tracked(&self) -> usize {
        self.views.len()
    }

    /// `rect` grown by `ceil(device_pixel_ratio)` on each side, so rounding never
    /// leaves a transparent seam, then shifted by the host's frame so that host
    /// client coordinates line up inside the full-window container.
    pub fn global_rect(&self, rect: Rect) -> Rect {
        let grow = self.device_pixel_ratio.ceil() as i32;
        let (dx, dy) = match (self.wm.window_rect(self.host), self.wm.client_origin(self.host)) {
            (Some(frame), Some((x, y))) => (x - frame.left, y - frame.top),
            _ => (0, 0),
        };
        rect.expand(grow).offset(dx, dy)
    }

    fn move_view(&self, window: WindowRef, rect: Rect) {
        let global = self.global_rect(rect);
        if let Err(e) = self.wm.move_window(window, global) {
            warn!("[WindowStack] moving {:?} to {:?} failed: {}", window, global, e);
        }
    }

    pub fn redraw_views(&self) {
        if let Some(container) = self.container() {
            if let Err(e) = self.wm.redraw(container) {
                debug!("[WindowStack] redraw failed: {}", e);
            }
        }
    }

    pub fn set_input_passthrough(&self, enabled: bool) {
        if let Err(e) = self.wm.set_input_passthrough(self.host, enabled) {
            warn!("[WindowStack] input pass-through={} failed: {}", enabled, e);
        }
    }

    /// The host is closing: close the container and every tracked window, and
    /// forget them. The OS destroys closed windows itself.
    pub fn on_host_close(&mut self) {
        info!("[WindowStack] Host closing; closing {} embedded window(s)", self.views.len());
        self.host_closed = true;
        if let Some(container) = self.container.take() {
            if let Err(e) = self.wm.close(container.window()) {
                warn!("[WindowStack] closing container failed: {}", e);
            }
            container.release();
        }
        for window in self.views.keys() {
            if let Err(e) = self.wm.close(*window) {
                warn!("[WindowStack] closing {:?} failed: {}", window, e);
            }
        }
        self.views.clear();
    }

    /// Forgets tracked windows and destroys the container.
    pub fn dispose(&mut self) {
        self.views.clear();
        if let Some(container) = self.container.take() {
            debug!("[WindowStack] destroying container {:?}", container.window());
            self.wm.destroy_window(container);
        }
    }
}

impl Drop for WindowStack {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn sanitize_ratio(ratio: f64) -> f64 {
    if ratio.is_finite() && ratio > 0.0 { ratio } else { 1.0 }
}

/// Anything happening over the container hands input straight back to the host.
fn container_event_handler(wm: Weak<dyn WindowManager>, host: WindowRef) -> ContainerEventHandler {
    Arc::new(move |event: ContainerEvent| {
        let Some(wm) = wm.upgrade() else {
            return;
        };
        trace!("[WindowStack] container {:?}; returning input to {:?}", event, host);
        if let Err(e) = wm.set_input_passthrough(host, false) {
            debug!("[WindowStack] clearing pass-through failed: {}", e);
        }
        if let Err(e) = wm.focus(host) {
            debug!("[WindowStack] refocusing host failed: {}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeWindowManager, WmOp};

    const HOST: WindowRef = WindowRef::from_raw(0x100);
    const BOUNDS: Rect = Rect::new(100, 100, 900, 700);

    fn stack() -> (WindowStack, Arc<FakeWindowManager>) {
        let wm = Arc::new(FakeWindowManager::default());
        wm.set_window_rect(HOST, BOUNDS);
        wm.set_client_origin(HOST, (108, 131));
        (WindowStack::new(wm.clone(), HOST), wm)
    }

    #[test]
    fn container_is_created_once_hidden_behind_the_host() {
        let (mut stack, wm) = stack();
        let a = stack.ensure_container().unwrap();
        let b = stack.ensure_container().unwrap();
        assert_eq!(a, b);
        assert_eq!(wm.count(|op| matches!(op, WmOp::CreateContainer(_))), 1);
        assert_eq!(wm.last_rect(a), Some(BOUNDS));
        assert!(!wm.is_shown(a));
    }

    #[test]
    fn tracked_window_is_adopted_and_placed_in_container_coordinates() {
        let (mut stack, wm) = stack();
        let view = wm.create_engine_window().unwrap();
        stack.track(view.window(), Rect::new(10, 20, 110, 80), 1.5).unwrap();

        let container = stack.container().unwrap();
        assert_eq!(wm.parent_of(view.window()), Some(container));
        assert_eq!(wm.last_rect(view.window()), Some(Rect::new(16, 49, 120, 113)));
        assert!(wm.is_shown(view.window()));

        assert!(stack.resize(view.window(), Rect::new(0, 0, 640, 360), 1.0));
        assert_eq!(stack.rect_of(view.window()), Some(Rect::new(0, 0, 640, 360)));
        assert_eq!(wm.last_rect(view.window()), Some(Rect::new(7, 30, 649, 392)));
        assert!(!stack.resize(WindowRef::from_raw(0x999), Rect::new(0, 0, 1, 1), 1.0));
        wm.destroy_window(view);
    }

    #[test]
    fn container_activity_returns_input_to_the_host() {
        let (mut stack, wm) = stack();
        stack.ensure_container().unwrap();
        stack.set_input_passthrough(true);
        assert!(wm.passthrough(HOST));

        wm.fire_container_event(ContainerEvent::MouseMove);
        assert!(!wm.passthrough(HOST));
        assert_eq!(wm.count(|op| matches!(op, WmOp::Focus(w) if *w == HOST)), 1);

        wm.fire_container_event(ContainerEvent::Sized);
        assert_eq!(wm.count(|op| matches!(op, WmOp::Focus(w) if *w == HOST)), 2);
    }

    #[test]
    fn host_close_closes_container_and_every_tracked_window() {
        let (mut stack, wm) = stack();
        let first = wm.create_engine_window().unwrap();
        let second = wm.create_engine_window().unwrap();
        stack.track(first.window(), Rect::new(0, 0, 10, 10), 1.0).unwrap();
        stack.track(second.window(), Rect::new(0, 0, 20, 20), 1.0).unwrap();
        let container = stack.container().unwrap();

        stack.on_host_close();
        assert_eq!(stack.tracked(), 0);
        let mut closed = wm.closed();
        closed.sort_by_key(|w| w.raw());
        let mut expected = vec![container, first.window(), second.window()];
        expected.sort_by_key(|w| w.raw());
        assert_eq!(closed, expected);

        // Closed windows are gone; dispose must not destroy them again.
        stack.dispose();
        assert_eq!(wm.count(|op| matches!(op, WmOp::Destroy(w) if *w == container)), 0);
        assert!(stack.ensure_container().is_err());
        first.release();
        second.release();
    }

    #[test]
    fn dispose_destroys_the_container() {
        let (mut stack, wm) = stack();
        let container = stack.ensure_container().unwrap();
        drop(stack);
        assert_eq!(wm.count(|op| matches!(op, WmOp::Destroy(w) if *w == container)), 1);
    }
}
