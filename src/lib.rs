/// Media-render bridge between an embedded, independently threaded video engine
/// and a host application's own composited UI.
///
/// - `engine`: dynamic loading of the engine library and its command/event API
/// - `bridge`: the UI-thread side of the engine (`EngineHandle`), event draining,
///   property observation and async command correlation
/// - `surface`: the cross-GPU-context texture hand-off (`FrameSurface`)
/// - `window`: native window stacking plus the composition state machine
/// - `host`: the host-facing player object and its method-call dispatcher
pub mod bridge;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod handles;
pub mod host;
pub mod surface;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Once;

use env_logger::{Builder, Env};
use log::LevelFilter;

pub use bridge::{EngineHandle, EventSink, HostEvent, UiScheduler, UiTaskQueue};
pub use config::BridgeConfig;
pub use engine::{PropertyFormat, SurfaceTarget};
pub use error::BridgeError;
pub use host::{HostError, MediaPlayer, NativeWindowOutput, TextureOutput, VideoOutput};
pub use surface::{FrameSurface, TextureRegistry};
pub use window::{CompositionGovernor, CompositionState, WindowStack};

// A host may tear a player down and build a new one inside the same process;
// the logger can only be installed once.
static LOGGER_INIT: Once = Once::new();

/// Installs the `env_logger` backend. Safe to call any number of times.
pub fn init_logging() {
    LOGGER_INIT.call_once(|| {
        let _ = Builder::from_env(Env::default().default_filter_or("debug"))
            .filter_module("libloading", LevelFilter::Off)
            .try_init();
    });
}
