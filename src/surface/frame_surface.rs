use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicI64, Ordering},
};

use log::{debug, error, info, warn};

use super::{
    backend::{ContextBinding, ContextMode, FrameSize, GpuBackend},
    guard::{ContextSwitch, ForeignRenderGuard},
    shared_frame::SharedFrameResource,
};
use crate::{bridge::EngineHandle, error::BridgeError};

/// The host compositor's texture registry.
pub trait TextureRegistry: Send + Sync {
    fn register_texture(&self) -> Result<i64, BridgeError>;
    fn unregister_texture(&self, texture_id: i64);
    /// Asks the host to call populate for `texture_id` on its next frame.
    fn mark_frame_available(&self, texture_id: i64);
}

/// What the host samples after a successful populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulatedFrame {
    pub target: u32,
    pub name: u32,
    pub width: u32,
    pub height: u32,
}

const NO_TEXTURE: i64 = -1;

/// Engine-side half of the surface, reached from the redraw listener.
struct FrameNotifier {
    registry: Arc<dyn TextureRegistry>,
    texture_id: AtomicI64,
    visible: AtomicBool,
    rendering: AtomicBool,
    deferred: AtomicBool,
}

impl FrameNotifier {
    fn frame_ready(&self) {
        if !self.visible.load(Ordering::Acquire) {
            return;
        }
        if self.rendering.load(Ordering::Acquire) {
            self.deferred.store(true, Ordering::Release);
            return;
        }
        self.mark();
    }

    fn mark(&self) {
        let id = self.texture_id.load(Ordering::Acquire);
        if id != NO_TEXTURE {
            self.registry.mark_frame_available(id);
        }
    }
}

/// Engine frames exposed as a host texture.
///
/// `populate` runs on the host's render thread with the host context (B)
/// current. In [`ContextMode::Separate`] the engine renders under its own
/// context A and the frame crosses over through a shared image.
pub struct FrameSurface<G: GpuBackend> {
    backend: G,
    engine: EngineHandle,
    notifier: Arc<FrameNotifier>,
    engine_ctx: Option<ContextBinding>,
    resources: Option<SharedFrameResource>,
    allocations: u64,
    disposed: bool,
}

impl<G: GpuBackend> FrameSurface<G> {
    /// Registers with the host and starts listening for engine frames. The
    /// surface starts invisible.
    pub fn new(backend: G, engine: EngineHandle, registry: Arc<dyn TextureRegistry>) -> Result<Self, BridgeError> {
        let texture_id = registry.register_texture()?;
        let notifier = Arc::new(FrameNotifier {
            registry,
            texture_id: AtomicI64::new(texture_id),
            visible: AtomicBool::new(false),
            rendering: AtomicBool::new(false),
            deferred: AtomicBool::new(false),
        });
        let listener = notifier.clone();
        engine.set_redraw_listener(Some(Arc::new(move || listener.frame_ready())));
        info!("[FrameSurface] Registered texture {} ({:?})", texture_id, backend.mode());
        Ok(Self {
            backend,
            engine,
            notifier,
            engine_ctx: None,
            resources: None,
            allocations: 0,
            disposed: false,
        })
    }

    pub fn texture_id(&self) -> Option<i64> {
        match self.notifier.texture_id.load(Ordering::Acquire) {
            NO_TEXTURE => None,
            id => Some(id),
        }
    }

    pub fn set_visible(&self, visible: bool) {
        let was = self.notifier.visible.swap(visible, Ordering::AcqRel);
        if visible != was {
            debug!("[FrameSurface] visible={}", visible);
            // Either way the host should repopulate: real content or a clear.
            self.notifier.mark();
        }
    }

    pub fn is_visible(&self) -> bool {
        self.notifier.visible.load(Ordering::Acquire)
    }

    /// Asks the host for a populate call, e.g. after a layout change.
    pub fn request_frame(&self) {
        if self.is_visible() {
            self.notifier.mark();
        }
    }

    /// Size of the currently allocated shared resources.
    pub fn allocated_size(&self) -> Option<FrameSize> {
        self.resources.as_ref().map(SharedFrameResource::size)
    }

    /// How many resource generations have been built.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn backend(&self) -> &G {
        &self.backend
    }

    /// Produces a frame for a host layout of `width`x`height` logical pixels at
    /// `scale`. A failure drops this frame only; the next call retries.
    pub fn populate(&mut self, width: i32, height: i32, scale: f64) -> Result<PopulatedFrame, BridgeError> {
        if self.disposed {
            return Err(BridgeError::Disposed("frame surface disposed".to_string()));
        }
        if !self.engine.is_initialized() {
            return Err(BridgeError::not_initialized());
        }
        let size = FrameSize::from_layout(width, height, scale);
        if size.is_empty() {
            return Err(BridgeError::ResourceBridge(format!(
                "empty frame size {}x{}",
                size.width, size.height
            )));
        }

        let engine_ctx = self.engine_context()?;
        self.ensure_render_context(engine_ctx)?;
        self.ensure_resources(engine_ctx, size)?;
        let Some(resources) = self.resources.as_ref() else {
            return Err(BridgeError::ResourceBridge("shared frame missing".to_string()));
        };

        if self.notifier.visible.load(Ordering::Acquire) {
            self.notifier.rendering.store(true, Ordering::Release);
            let rendered = self.render_into(engine_ctx, resources);
            self.notifier.rendering.store(false, Ordering::Release);
            rendered?;
            if self.notifier.deferred.swap(false, Ordering::AcqRel) {
                self.notifier.frame_ready();
            }
        } else {
            self.clear_into(engine_ctx, resources)?;
        }

        Ok(PopulatedFrame {
            target: gl::TEXTURE_2D,
            name: resources.host_texture_name(),
            width: size.width as u32,
            height: size.height as u32,
        })
    }

    fn engine_context(&mut self) -> Result<ContextBinding, BridgeError> {
        if let Some(ctx) = self.engine_ctx {
            return Ok(ctx);
        }
        let ctx = self.backend.engine_binding()?;
        self.engine_ctx = Some(ctx);
        Ok(ctx)
    }

    fn ensure_render_context(&self, engine_ctx: ContextBinding) -> Result<(), BridgeError> {
        if self.engine.has_render_context() {
            return Ok(());
        }
        let _switch = ContextSwitch::enter(&self.backend, engine_ctx)?;
        self.engine.init_render_context(self.backend.proc_resolver())
    }

    fn ensure_resources(&mut self, engine_ctx: ContextBinding, size: FrameSize) -> Result<(), BridgeError> {
        if self.allocated_size() == Some(size) {
            return Ok(());
        }
        if let Some(old) = self.resources.take() {
            debug!(
                "[FrameSurface] resizing {}x{} -> {}x{}",
                old.size().width,
                old.size().height,
                size.width,
                size.height
            );
            old.release(&self.backend, engine_ctx);
        }
        match SharedFrameResource::create(&self.backend, engine_ctx, size) {
            Ok(resources) => {
                self.allocations += 1;
                self.resources = Some(resources);
                Ok(())
            }
            Err(e) => {
                warn!("[FrameSurface] allocation at {}x{} failed: {}", size.width, size.height, e);
                Err(e)
            }
        }
    }

    fn render_into(&self, engine_ctx: ContextBinding, resources: &SharedFrameResource) -> Result<(), BridgeError> {
        let size = resources.size();
        let fbo = resources.target().framebuffer.name();
        match self.backend.mode() {
            ContextMode::Separate => {
                let _switch = ContextSwitch::enter(&self.backend, engine_ctx)?;
                self.engine.render(fbo, size.width, size.height)?;
                self.backend.flush();
            }
            ContextMode::Shared => {
                let _guard = ForeignRenderGuard::capture(&self.backend);
                self.backend.bind_target(resources.target(), size);
                self.engine.render(fbo, size.width, size.height)?;
            }
        }
        Ok(())
    }

    fn clear_into(&self, engine_ctx: ContextBinding, resources: &SharedFrameResource) -> Result<(), BridgeError> {
        let size = resources.size();
        match self.backend.mode() {
            ContextMode::Separate => {
                let _switch = ContextSwitch::enter(&self.backend, engine_ctx)?;
                self.backend.clear_transparent(resources.target(), size);
                self.backend.flush();
            }
            ContextMode::Shared => {
                let _guard = ForeignRenderGuard::capture(&self.backend);
                self.backend.clear_transparent(resources.target(), size);
            }
        }
        Ok(())
    }

    /// Tears down in order: host registration, shared image, host texture,
    /// render target, engine render context. Context B must be current.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        let id = self.notifier.texture_id.swap(NO_TEXTURE, Ordering::AcqRel);
        self.notifier.visible.store(false, Ordering::Release);
        if id != NO_TEXTURE {
            self.notifier.registry.unregister_texture(id);
        }
        self.engine.set_redraw_listener(None);

        let engine_ctx = self.engine_ctx.unwrap_or_else(|| self.backend.current_binding());
        if let Some(resources) = self.resources.take() {
            resources.release(&self.backend, engine_ctx);
        }

        if self.engine.has_render_context() {
            match ContextSwitch::enter(&self.backend, engine_ctx) {
                Ok(_switch) => self.engine.release_render_context(),
                Err(e) => {
                    error!("[FrameSurface] releasing render context without its GL context: {}", e);
                    self.engine.release_render_context();
                }
            }
        }
        self.backend.destroy_engine_context();
        info!("[FrameSurface] Disposed texture {}", id);
    }
}

impl<G: GpuBackend> Drop for FrameSurface<G> {
    fn drop(&mut self) {
        self.dispose();
    }
}
