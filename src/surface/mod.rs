pub mod backend;
pub mod egl;
pub mod frame_surface;
pub mod guard;
pub mod shared_frame;

pub use backend::{ContextBinding, ContextMode, FrameSize, GpuBackend};
pub use egl::EglGpuBackend;
pub use frame_surface::{FrameSurface, PopulatedFrame, TextureRegistry};
pub use shared_frame::SharedFrameResource;
