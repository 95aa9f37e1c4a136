//! What the host application talks to: a [`MediaPlayer`] driving one of the
//! two [`VideoOutput`] strategies, plus its method-call dispatcher.

mod args;
pub mod output;
pub mod player;

pub use args::HostError;
pub use output::{BackendFactory, NativeWindowOutput, TextureOutput, VideoOutput};
pub use player::{MediaPlayer, Responder};
