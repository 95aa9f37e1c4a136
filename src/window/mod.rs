pub mod composition;
pub mod debounce;
pub mod manager;
pub mod stack;
#[cfg(windows)]
pub mod win32;

pub use composition::{CompositionGovernor, CompositionState};
pub use debounce::{DebounceAction, DebounceTimer, Debouncer};
pub use manager::{ContainerEvent, ContainerEventHandler, HostWindowEvent, Rect, SizeKind, WindowManager};
pub use stack::WindowStack;
#[cfg(windows)]
pub use win32::{Win32WindowManager, host_window_event};
