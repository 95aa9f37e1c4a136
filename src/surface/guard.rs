use log::{debug, error};

use super::backend::{ContextBinding, GlStateSnapshot, GpuBackend};
use crate::error::BridgeError;

/// Makes `target` current for the guard's lifetime and puts the previous binding
/// back on drop, on every exit path.
pub struct ContextSwitch<'a, G: GpuBackend + ?Sized> {
    backend: &'a G,
    previous: ContextBinding,
    switched: bool,
}

impl<'a, G: GpuBackend + ?Sized> ContextSwitch<'a, G> {
    pub fn enter(backend: &'a G, target: ContextBinding) -> Result<Self, BridgeError> {
        let previous = backend.current_binding();
        if previous == target {
            return Ok(Self { backend, previous, switched: false });
        }
        if !backend.make_current(target) {
            return Err(BridgeError::ResourceBridge("failed to make the engine context current".to_string()));
        }
        Ok(Self { backend, previous, switched: true })
    }
}

impl<G: GpuBackend + ?Sized> Drop for ContextSwitch<'_, G> {
    fn drop(&mut self) {
        if self.switched && !self.backend.make_current(self.previous) {
            error!("[ContextSwitch] failed to restore previous context {:?}", self.previous);
        }
    }
}

/// Captures the GL state a foreign renderer may clobber and restores it on drop.
pub struct ForeignRenderGuard<'a, G: GpuBackend + ?Sized> {
    backend: &'a G,
    saved: GlStateSnapshot,
}

impl<'a, G: GpuBackend + ?Sized> ForeignRenderGuard<'a, G> {
    pub fn capture(backend: &'a G) -> Self {
        let saved = backend.capture_state();
        debug!("[ForeignRenderGuard] saved {:?}", saved);
        Self { backend, saved }
    }
}

impl<G: GpuBackend + ?Sized> Drop for ForeignRenderGuard<'_, G> {
    fn drop(&mut self) {
        self.backend.restore_state(&self.saved);
    }
}
