//! The GPU seam of the texture bridge.
//!
//! Context A is the engine's own GL context, context B the host's. Every
//! resource-creating call documents which one must be current. GPU object
//! handles are owned: none of them is `Clone`, and they are only released by
//! handing them back to the backend by value.

use crate::{engine::ProcAddressResolver, error::BridgeError};

/// How the engine's rendering reaches the host context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// The engine renders in its own context A; frames cross over through a shared image.
    Separate,
    /// The engine renders directly in the host's context, inside a state guard.
    Shared,
}

/// A make-current tuple. All zero means "no context".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ContextBinding {
    pub display: usize,
    pub draw_surface: usize,
    pub read_surface: usize,
    pub context: usize,
}

impl ContextBinding {
    pub const NONE: ContextBinding = ContextBinding { display: 0, draw_surface: 0, read_surface: 0, context: 0 };

    pub fn is_none(&self) -> bool {
        self.context == 0
    }
}

/// Physical pixel size of the bridged frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameSize {
    pub width: i32,
    pub height: i32,
}

impl FrameSize {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Layout size in logical pixels times the device scale.
    pub fn from_layout(width: i32, height: i32, scale: f64) -> Self {
        let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
        Self {
            width: (width as f64 * scale).round() as i32,
            height: (height as f64 * scale).round() as i32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// GL texture name, exclusively owned.
#[derive(Debug, PartialEq, Eq)]
pub struct GlTexture(u32);

impl GlTexture {
    pub(crate) fn from_raw(name: u32) -> Self {
        GlTexture(name)
    }

    pub fn name(&self) -> u32 {
        self.0
    }
}

/// GL framebuffer name, exclusively owned.
#[derive(Debug, PartialEq, Eq)]
pub struct GlFramebuffer(u32);

impl GlFramebuffer {
    pub(crate) fn from_raw(name: u32) -> Self {
        GlFramebuffer(name)
    }

    pub fn name(&self) -> u32 {
        self.0
    }
}

/// Shared-image handle (an `EGLImage`), exclusively owned.
#[derive(Debug, PartialEq, Eq)]
pub struct SharedImage(usize);

impl SharedImage {
    pub(crate) fn from_raw(raw: usize) -> Self {
        SharedImage(raw)
    }

    pub fn raw(&self) -> usize {
        self.0
    }
}

/// Texture plus the framebuffer that renders into it.
#[derive(Debug, PartialEq, Eq)]
pub struct RenderTarget {
    pub texture: GlTexture,
    pub framebuffer: GlFramebuffer,
}

/// The GL state the engine is known to touch while rendering, plus what the
/// transparent clear touches.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlStateSnapshot {
    pub viewport: [i32; 4],
    pub scissor_box: [i32; 4],
    pub scissor_test: bool,
    pub blend: bool,
    pub blend_src_rgb: i32,
    pub blend_dst_rgb: i32,
    pub blend_src_alpha: i32,
    pub blend_dst_alpha: i32,
    pub framebuffer: i32,
    pub clear_color: [f32; 4],
}

pub trait GpuBackend {
    fn mode(&self) -> ContextMode;

    fn current_binding(&self) -> ContextBinding;
    fn make_current(&self, binding: ContextBinding) -> bool;

    /// Binding the engine renders under. In [`ContextMode::Separate`] this lazily
    /// creates context A; in [`ContextMode::Shared`] it is the host's context.
    fn engine_binding(&self) -> Result<ContextBinding, BridgeError>;
    /// Destroys context A if one was created. Nothing may be current on it.
    fn destroy_engine_context(&self);

    /// Context A current (or the host's, in shared mode).
    fn create_render_target(&self, size: FrameSize) -> Result<RenderTarget, BridgeError>;
    fn delete_render_target(&self, target: RenderTarget);

    /// Context A current. Derives a shared image from the target's texture.
    fn export_image(&self, target: &RenderTarget) -> Result<SharedImage, BridgeError>;
    fn destroy_image(&self, image: SharedImage);

    /// Context B current. Builds a host texture backed by `image`.
    fn import_image(&self, image: &SharedImage, size: FrameSize) -> Result<GlTexture, BridgeError>;
    fn delete_texture(&self, texture: GlTexture);

    fn capture_state(&self) -> GlStateSnapshot;
    fn restore_state(&self, snapshot: &GlStateSnapshot);

    /// Binds the target's framebuffer and sets a full-size viewport.
    fn bind_target(&self, target: &RenderTarget, size: FrameSize);
    fn clear_transparent(&self, target: &RenderTarget, size: FrameSize);
    /// Makes the current context's rendering visible to the other context.
    fn flush(&self);

    fn proc_resolver(&self) -> ProcAddressResolver;
}
