//! The two ways engine pixels reach the host, behind one lifecycle.
//!
//! [`MediaPlayer`](super::MediaPlayer) drives an output through
//! `prepare -> (engine init) -> attach -> ... -> detach -> (engine dispose) -> release`,
//! or `prepare -> abandon` when engine init fails.

use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};

use crate::{
    bridge::{EngineHandle, UiScheduler},
    config::BridgeConfig,
    constants::DEFAULT_VIDEO_RECT,
    engine::SurfaceTarget,
    error::BridgeError,
    handles::{OwnedWindow, WindowRef},
    surface::{ContextMode, EglGpuBackend, FrameSurface, GpuBackend, PopulatedFrame, TextureRegistry},
    window::{
        CompositionGovernor, CompositionState, DebounceTimer, Debouncer, HostWindowEvent, Rect, WindowManager,
        WindowStack,
    },
};

pub trait VideoOutput {
    /// Builds what the engine will render into. Runs before engine init.
    fn prepare(&mut self) -> Result<SurfaceTarget, BridgeError>;
    /// The engine initialized against the prepared target.
    fn attach(&mut self, engine: &EngineHandle) -> Result<(), BridgeError>;
    /// Engine init failed; undoes `prepare`.
    fn abandon(&mut self);

    /// Visibility requested before `attach` takes effect once attached.
    fn set_visible(&mut self, visible: bool);
    /// `rect` is in host client coordinates.
    fn set_video_rect(&mut self, rect: Rect, device_pixel_ratio: f64);

    /// Runs while the engine is still alive.
    fn detach(&mut self, engine: &EngineHandle);
    /// Runs after the engine has been terminated.
    fn release(&mut self);
}

pub type BackendFactory<G> = Box<dyn Fn() -> Result<G, BridgeError>>;

/// Engine frames as a host texture ([`FrameSurface`]).
///
/// `attach`, `populate` and `detach` must run on the host's render thread with
/// its GL context current.
pub struct TextureOutput<G: GpuBackend> {
    make_backend: BackendFactory<G>,
    registry: Arc<dyn TextureRegistry>,
    surface: Option<FrameSurface<G>>,
    visible: bool,
}

impl<G: GpuBackend> TextureOutput<G> {
    pub fn new(
        make_backend: impl Fn() -> Result<G, BridgeError> + 'static,
        registry: Arc<dyn TextureRegistry>,
    ) -> Self {
        Self { make_backend: Box::new(make_backend), registry, surface: None, visible: false }
    }

    pub fn texture_id(&self) -> Option<i64> {
        self.surface.as_ref().and_then(FrameSurface::texture_id)
    }

    pub fn surface(&self) -> Option<&FrameSurface<G>> {
        self.surface.as_ref()
    }

    /// The host compositor's populate callback.
    pub fn populate(&mut self, width: i32, height: i32, scale: f64) -> Result<PopulatedFrame, BridgeError> {
        self.surface
            .as_mut()
            .ok_or_else(BridgeError::not_initialized)?
            .populate(width, height, scale)
    }
}

impl TextureOutput<EglGpuBackend> {
    pub fn egl(mode: ContextMode, registry: Arc<dyn TextureRegistry>) -> Self {
        Self::new(move || EglGpuBackend::load(mode).map_err(BridgeError::from), registry)
    }
}

impl<G: GpuBackend> VideoOutput for TextureOutput<G> {
    fn prepare(&mut self) -> Result<SurfaceTarget, BridgeError> {
        Ok(SurfaceTarget::RenderApi)
    }

    fn attach(&mut self, engine: &EngineHandle) -> Result<(), BridgeError> {
        let backend = (self.make_backend)()?;
        let surface = FrameSurface::new(backend, engine.clone(), self.registry.clone())?;
        surface.set_visible(self.visible);
        self.surface = Some(surface);
        Ok(())
    }

    fn abandon(&mut self) {}

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        if let Some(surface) = &self.surface {
            surface.set_visible(visible);
        }
    }

    fn set_video_rect(&mut self, _rect: Rect, _device_pixel_ratio: f64) {
        // Size comes from the host layout at populate time; just ask for a frame.
        if let Some(surface) = &self.surface {
            surface.request_frame();
        }
    }

    fn detach(&mut self, _engine: &EngineHandle) {
        if let Some(mut surface) = self.surface.take() {
            surface.dispose();
        }
    }

    fn release(&mut self) {}
}

/// Engine-owned native window stacked behind a transparent host window.
pub struct NativeWindowOutput {
    wm: Arc<dyn WindowManager>,
    stack: WindowStack,
    governor: CompositionGovernor,
    engine_window: Option<OwnedWindow>,
    video_rect: Rect,
    device_pixel_ratio: f64,
    visible: bool,
}

impl NativeWindowOutput {
    pub fn new(
        wm: Arc<dyn WindowManager>,
        host: WindowRef,
        scheduler: Arc<dyn UiScheduler>,
        timer: Box<dyn DebounceTimer>,
        settle_delay: Duration,
    ) -> Self {
        let (left, top, right, bottom) = DEFAULT_VIDEO_RECT;
        Self {
            stack: WindowStack::new(wm.clone(), host),
            governor: CompositionGovernor::new(wm.clone(), scheduler, timer, host, settle_delay),
            wm,
            engine_window: None,
            video_rect: Rect::new(left, top, right, bottom),
            device_pixel_ratio: 1.0,
            visible: false,
        }
    }

    /// Uses a worker-thread [`Debouncer`] with the configured settle delay.
    pub fn with_config(
        wm: Arc<dyn WindowManager>,
        host: WindowRef,
        scheduler: Arc<dyn UiScheduler>,
        config: &BridgeConfig,
    ) -> Result<Self, BridgeError> {
        let timer = Debouncer::new("media-bridge-settle")?;
        Ok(Self::new(wm, host, scheduler, Box::new(timer), config.settle_delay()))
    }

    #[cfg(windows)]
    pub fn win32(host: WindowRef, scheduler: Arc<dyn UiScheduler>, config: &BridgeConfig) -> Result<Self, BridgeError> {
        Self::with_config(Arc::new(crate::window::Win32WindowManager::new()), host, scheduler, config)
    }

    pub fn engine_window(&self) -> Option<WindowRef> {
        self.engine_window.as_ref().map(OwnedWindow::window)
    }

    pub fn composition_state(&self) -> CompositionState {
        self.governor.state()
    }

    pub fn governor(&self) -> &CompositionGovernor {
        &self.governor
    }

    pub fn stack(&self) -> &WindowStack {
        &self.stack
    }

    /// Lets mouse input fall through the host to the video. Any activity over
    /// the container turns it back off.
    pub fn set_input_passthrough(&self, enabled: bool) {
        self.stack.set_input_passthrough(enabled);
    }

    /// Feed from the host's top-level window procedure.
    pub fn handle_host_event(&mut self, event: HostWindowEvent) {
        match event {
            HostWindowEvent::Activated => self.governor.on_host_activated(),
            HostWindowEvent::Size(kind) => self.governor.on_host_size(kind),
            HostWindowEvent::Moved => self.governor.on_host_moved(),
            HostWindowEvent::Close => {
                self.governor.detach_container();
                self.stack.on_host_close();
                // Closed along with the host; nothing left to destroy.
                if let Some(window) = self.engine_window.take() {
                    window.release();
                }
            }
        }
    }

    fn destroy_engine_window(&mut self) {
        if let Some(window) = self.engine_window.take() {
            self.stack.untrack(window.window());
            self.wm.destroy_window(window);
        }
    }
}

impl VideoOutput for NativeWindowOutput {
    fn prepare(&mut self) -> Result<SurfaceTarget, BridgeError> {
        let container = self.stack.ensure_container()?;
        self.governor.attach_container(container);
        if self.engine_window.is_some() {
            self.destroy_engine_window();
        }

        let window = self.wm.create_engine_window()?;
        let raw = window.window();
        self.engine_window = Some(window);
        if let Err(e) = self.stack.track(raw, self.video_rect, self.device_pixel_ratio) {
            self.destroy_engine_window();
            return Err(e);
        }
        info!("[NativeWindowOutput] Engine window {:?} inside container {:?}", raw, container);
        Ok(SurfaceTarget::Window(raw))
    }

    fn attach(&mut self, _engine: &EngineHandle) -> Result<(), BridgeError> {
        self.governor.set_visible(self.visible);
        Ok(())
    }

    fn abandon(&mut self) {
        debug!("[NativeWindowOutput] abandoning engine window");
        self.destroy_engine_window();
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        if let Some(window) = self.engine_window() {
            if let Err(e) = self.wm.set_shown(window, visible) {
                warn!("[NativeWindowOutput] showing engine window failed: {}", e);
            }
        }
        self.governor.set_visible(visible);
    }

    fn set_video_rect(&mut self, rect: Rect, device_pixel_ratio: f64) {
        self.video_rect = rect;
        self.device_pixel_ratio = device_pixel_ratio;
        if let Some(window) = self.engine_window() {
            if self.stack.resize(window, rect, device_pixel_ratio) {
                self.stack.redraw_views();
            }
        }
    }

    fn detach(&mut self, _engine: &EngineHandle) {}

    fn release(&mut self) {
        self.destroy_engine_window();
        self.governor.detach_container();
        self.stack.dispose();
        debug!("[NativeWindowOutput] released");
    }
}

impl Drop for NativeWindowOutput {
    fn drop(&mut self) {
        self.destroy_engine_window();
    }
}
