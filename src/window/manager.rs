//! The native window-manager seam.
//!
//! Every call is best-effort: failures come back as [`BridgeError::Platform`] so
//! callers can log them, and nobody re-reads OS state to find out what actually
//! happened.

use std::sync::Arc;

use crate::{
    error::BridgeError,
    handles::{OwnedWindow, WindowRef},
};

/// Screen-space rectangle, right/bottom exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// A minimized window is parked entirely in negative coordinates.
    pub fn is_offscreen(&self) -> bool {
        self.left < 0 && self.top < 0 && self.right < 0 && self.bottom < 0
    }

    /// Grows every edge outward by `by` pixels.
    pub fn expand(&self, by: i32) -> Rect {
        Rect::new(self.left - by, self.top - by, self.right + by, self.bottom + by)
    }

    pub fn offset(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }
}

/// Size state reported with a host size notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeKind {
    #[default]
    Restored,
    Minimized,
    Maximized,
}

/// Host top-level window notifications the bridge reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostWindowEvent {
    Activated,
    Size(SizeKind),
    Moved,
    Close,
}

/// Notifications raised by the container window's own procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerEvent {
    MouseMove,
    Sized,
    Moved,
    Activated,
}

pub type ContainerEventHandler = Arc<dyn Fn(ContainerEvent) + Send + Sync>;

pub trait WindowManager: Send + Sync {
    fn window_rect(&self, window: WindowRef) -> Option<Rect>;
    /// Screen position of the client area's top-left corner.
    fn client_origin(&self, window: WindowRef) -> Option<(i32, i32)>;

    /// Creates the hidden, taskbar-less container that sits behind `host`.
    fn create_container(&self, host: WindowRef, on_event: ContainerEventHandler) -> Result<OwnedWindow, BridgeError>;
    /// Creates a window for the engine to draw into.
    fn create_engine_window(&self) -> Result<OwnedWindow, BridgeError>;
    fn destroy_window(&self, window: OwnedWindow);
    /// Strips decorations from `child` and reparents it into `parent`.
    fn adopt(&self, child: WindowRef, parent: WindowRef) -> Result<(), BridgeError>;

    /// Stacks `window` directly behind `host` at `rect`, without activating it.
    fn place_behind(&self, window: WindowRef, host: WindowRef, rect: Rect) -> Result<(), BridgeError>;
    /// Moves and repaints `window`.
    fn move_window(&self, window: WindowRef, rect: Rect) -> Result<(), BridgeError>;
    fn set_shown(&self, window: WindowRef, shown: bool) -> Result<(), BridgeError>;

    /// Per-pixel alpha composition of `host` against what is behind it.
    fn set_composition(&self, host: WindowRef, enabled: bool) -> Result<(), BridgeError>;
    /// Forces the window frame to be recalculated.
    fn refresh_frame(&self, window: WindowRef) -> Result<(), BridgeError>;
    /// One synchronisation with the desktop compositor.
    fn flush_composition(&self) -> Result<(), BridgeError>;
    fn redraw(&self, window: WindowRef) -> Result<(), BridgeError>;

    /// Lets mouse input fall through `host` to whatever is behind it.
    fn set_input_passthrough(&self, host: WindowRef, enabled: bool) -> Result<(), BridgeError>;
    fn focus(&self, window: WindowRef) -> Result<(), BridgeError>;
    /// Asks `window` to close itself.
    fn close(&self, window: WindowRef) -> Result<(), BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimized_rect_is_offscreen() {
        assert!(Rect::new(-32000, -32000, -31840, -31972).is_offscreen());
        assert!(!Rect::new(-8, -8, 1928, 1048).is_offscreen());
    }

    #[test]
    fn expand_and_offset() {
        let r = Rect::new(10, 20, 110, 80).expand(2).offset(8, 31);
        assert_eq!(r, Rect::new(16, 49, 120, 113));
        assert_eq!((r.width(), r.height()), (104, 64));
        assert!(Rect::new(5, 5, 5, 10).is_empty());
    }
}
