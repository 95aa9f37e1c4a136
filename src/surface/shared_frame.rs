use log::{debug, error};

use super::{
    backend::{ContextBinding, ContextMode, FrameSize, GlTexture, GpuBackend, RenderTarget, SharedImage},
    guard::ContextSwitch,
};
use crate::error::BridgeError;

/// Texture the host samples from.
#[derive(Debug, PartialEq, Eq)]
pub enum HostTexture {
    /// Context-B texture bound to the shared image; owned here.
    Imported(GlTexture),
    /// Single-context mode: the host samples the render target's own texture.
    Aliased(u32),
}

/// One generation of bridged GPU objects at a fixed size.
///
/// Built and released as a unit. A shared image never outlives either texture
/// it connects, because nothing hands out the parts separately.
#[derive(Debug)]
pub struct SharedFrameResource {
    target: RenderTarget,
    image: Option<SharedImage>,
    host: HostTexture,
    size: FrameSize,
}

impl SharedFrameResource {
    /// Builds every object for `size`, or none of them. Context B must be current;
    /// it is current again on return.
    pub fn create<G: GpuBackend + ?Sized>(
        backend: &G,
        engine_ctx: ContextBinding,
        size: FrameSize,
    ) -> Result<Self, BridgeError> {
        if backend.mode() == ContextMode::Shared {
            let target = backend.create_render_target(size)?;
            let name = target.texture.name();
            return Ok(Self { target, image: None, host: HostTexture::Aliased(name), size });
        }

        let (target, image) = {
            let _switch = ContextSwitch::enter(backend, engine_ctx)?;
            let target = backend.create_render_target(size)?;
            match backend.export_image(&target) {
                Ok(image) => (target, image),
                Err(e) => {
                    backend.delete_render_target(target);
                    return Err(e);
                }
            }
        };

        match backend.import_image(&image, size) {
            Ok(texture) => {
                debug!("[SharedFrame] bridged {}x{}", size.width, size.height);
                Ok(Self { target, image: Some(image), host: HostTexture::Imported(texture), size })
            }
            Err(e) => {
                backend.destroy_image(image);
                delete_target_in(backend, engine_ctx, target);
                Err(e)
            }
        }
    }

    /// Frees the shared image, then the host texture, then (under context A) the
    /// render target. Context B must be current.
    pub fn release<G: GpuBackend + ?Sized>(self, backend: &G, engine_ctx: ContextBinding) {
        let Self { target, image, host, size } = self;
        if let Some(image) = image {
            backend.destroy_image(image);
        }
        if let HostTexture::Imported(texture) = host {
            backend.delete_texture(texture);
        }
        delete_target_in(backend, engine_ctx, target);
        debug!("[SharedFrame] released {}x{}", size.width, size.height);
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    /// GL name the host samples.
    pub fn host_texture_name(&self) -> u32 {
        match &self.host {
            HostTexture::Imported(texture) => texture.name(),
            HostTexture::Aliased(name) => *name,
        }
    }
}

fn delete_target_in<G: GpuBackend + ?Sized>(backend: &G, engine_ctx: ContextBinding, target: RenderTarget) {
    match ContextSwitch::enter(backend, engine_ctx) {
        Ok(_switch) => backend.delete_render_target(target),
        Err(e) => error!("[SharedFrame] leaking render target {:?}: {}", target, e),
    }
}
