//! Native handle wrappers that encode ownership in the type.
//!
//! [`WindowRef`] is a borrowed reference to a window someone else destroys and is
//! freely copied. [`OwnedWindow`] is exclusively owned by the bridge: it is not
//! `Clone`, and the only way to destroy it is to hand it back to the window
//! manager by value.

use std::fmt;

/// Borrowed native window handle (an `HWND` on Windows).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WindowRef(isize);

impl WindowRef {
    pub const NULL: WindowRef = WindowRef(0);

    pub const fn from_raw(raw: isize) -> Self {
        WindowRef(raw)
    }

    pub const fn raw(self) -> isize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for WindowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WindowRef({:#x})", self.0)
    }
}

/// A native window created by the bridge and destroyed only by it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct OwnedWindow(WindowRef);

impl OwnedWindow {
    /// Takes ownership of a freshly created window.
    ///
    /// # Safety contract
    /// Callers must only wrap windows they created and nobody else destroys.
    pub(crate) fn adopt_created(window: WindowRef) -> Self {
        OwnedWindow(window)
    }

    pub fn window(&self) -> WindowRef {
        self.0
    }

    /// Gives up ownership without destroying, e.g. after the OS already closed it.
    pub(crate) fn release(self) -> WindowRef {
        self.0
    }
}
