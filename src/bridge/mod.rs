pub mod events;
pub mod handle;
pub mod observed;
pub mod pending;
pub(crate) mod signal;
pub mod task_queue;

pub use events::{EventSink, HostEvent};
pub use handle::{EngineHandle, RedrawListener};
pub use pending::CommandCompletion;
pub use task_queue::{TaskId, UiScheduler, UiTask, UiTaskQueue};
