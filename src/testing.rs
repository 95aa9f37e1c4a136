//! In-process stand-ins for the engine, the GPU, the host compositor and the
//! native window manager.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    ffi::c_void,
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{
    bridge::{CommandCompletion, EventSink, HostEvent},
    engine::{
        Engine, EngineEvent, EngineFactory, ProcAddressResolver, PropertyFormat, RenderContext, WakeupCallback,
    },
    error::BridgeError,
    handles::{OwnedWindow, WindowRef},
    surface::{
        ContextBinding, ContextMode, FrameSize, GpuBackend, TextureRegistry,
        backend::{GlFramebuffer, GlStateSnapshot, GlTexture, RenderTarget, SharedImage},
    },
    window::{ContainerEvent, ContainerEventHandler, DebounceAction, DebounceTimer, Rect, WindowManager},
};

/// Ordered record of interesting calls, shared between fakes.
pub type OpLog = Arc<Mutex<Vec<String>>>;

pub fn null_resolver() -> ProcAddressResolver {
    Arc::new(|_: &str| std::ptr::null::<c_void>())
}

pub fn completion_recorder() -> (CommandCompletion, Arc<Mutex<Vec<Result<(), BridgeError>>>>) {
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    (Box::new(move |result| sink.lock().push(result)), results)
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<HostEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn send(&self, event: HostEvent) {
        self.events.lock().push(event);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FactoryState {
    engines: Vec<Arc<FakeEngineState>>,
    fail_next_initialize: bool,
    fail_next_create: bool,
}

#[derive(Default)]
pub struct FakeEngineFactory {
    state: Mutex<FactoryState>,
}

impl FakeEngineFactory {
    /// Engines successfully created so far.
    pub fn created(&self) -> usize {
        self.state.lock().engines.len()
    }

    pub fn last_engine(&self) -> Option<Arc<FakeEngineState>> {
        self.state.lock().engines.last().cloned()
    }

    pub fn fail_next_initialize(&self) {
        self.state.lock().fail_next_initialize = true;
    }

    pub fn fail_next_create(&self) {
        self.state.lock().fail_next_create = true;
    }
}

impl EngineFactory for FakeEngineFactory {
    fn create(&self) -> Result<Box<dyn Engine>, BridgeError> {
        let mut s = self.state.lock();
        if std::mem::take(&mut s.fail_next_create) {
            return Err(BridgeError::Initialization("engine library unavailable".to_string()));
        }
        let state = Arc::new(FakeEngineState::default());
        state.inner.lock().fail_initialize = std::mem::take(&mut s.fail_next_initialize);
        s.engines.push(state.clone());
        Ok(Box::new(FakeEngine { state }))
    }
}

#[derive(Default)]
struct EngineInner {
    fail_initialize: bool,
    destroyed: bool,
    reject_async: bool,
    frame_during_render: bool,
    options: Vec<(String, String)>,
    observations: Vec<(u64, String, PropertyFormat)>,
    commands: Vec<Vec<String>>,
    async_commands: Vec<(u64, Vec<String>)>,
    properties: HashMap<String, String>,
    log_levels: Vec<String>,
    events: VecDeque<EngineEvent>,
    wakeup: Option<WakeupCallback>,
    update: Option<WakeupCallback>,
    renders: Vec<(u32, i32, i32, bool)>,
    clobber: Option<FakeGpu>,
    lifecycle: Vec<String>,
    log: Option<OpLog>,
}

/// What a fake engine was asked to do, plus knobs to drive it.
#[derive(Default)]
pub struct FakeEngineState {
    inner: Mutex<EngineInner>,
}

impl FakeEngineState {
    pub fn options(&self) -> Vec<(String, String)> {
        self.inner.lock().options.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }

    pub fn observations(&self) -> Vec<(u64, String, PropertyFormat)> {
        self.inner.lock().observations.clone()
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.inner.lock().commands.clone()
    }

    pub fn async_reply_ids(&self) -> Vec<u64> {
        self.inner.lock().async_commands.iter().map(|(id, _)| *id).collect()
    }

    pub fn property(&self, name: &str) -> Option<String> {
        self.inner.lock().properties.get(name).cloned()
    }

    pub fn log_levels(&self) -> Vec<String> {
        self.inner.lock().log_levels.clone()
    }

    pub fn renders(&self) -> Vec<(u32, i32, i32, bool)> {
        self.inner.lock().renders.clone()
    }

    pub fn lifecycle(&self) -> Vec<String> {
        self.inner.lock().lifecycle.clone()
    }

    pub fn push_event(&self, event: EngineEvent) {
        self.inner.lock().events.push_back(event);
    }

    /// Fires the wakeup callback as an engine thread would.
    pub fn wake(&self) {
        let callback = self.inner.lock().wakeup.clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn reject_async_commands(&self) {
        self.inner.lock().reject_async = true;
    }

    /// Fires the render context's update callback.
    pub fn request_frame(&self) {
        let callback = self.inner.lock().update.clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn request_frame_during_next_render(&self) {
        self.inner.lock().frame_during_render = true;
    }

    /// Makes every render scribble over `gpu`'s GL state.
    pub fn clobber_gl_on_render(&self, gpu: FakeGpu) {
        self.inner.lock().clobber = Some(gpu);
    }

    pub fn log_into(&self, log: OpLog) {
        self.inner.lock().log = Some(log);
    }

    fn record_lifecycle(inner: &mut EngineInner, entry: &str) {
        inner.lifecycle.push(entry.to_string());
        if let Some(log) = &inner.log {
            log.lock().push(entry.to_string());
        }
    }
}

struct FakeEngine {
    state: Arc<FakeEngineState>,
}

impl Engine for FakeEngine {
    fn set_option(&self, name: &str, value: &str) -> Result<(), i32> {
        self.state.inner.lock().options.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn initialize(&self) -> Result<(), i32> {
        if self.state.inner.lock().fail_initialize { Err(-1) } else { Ok(()) }
    }

    fn request_log_messages(&self, level: &str) -> Result<(), i32> {
        self.state.inner.lock().log_levels.push(level.to_string());
        Ok(())
    }

    fn command(&self, args: &[String]) -> Result<(), i32> {
        self.state.inner.lock().commands.push(args.to_vec());
        Ok(())
    }

    fn command_async(&self, reply_id: u64, args: &[String]) -> Result<(), i32> {
        let mut inner = self.state.inner.lock();
        if inner.reject_async {
            return Err(-12);
        }
        inner.async_commands.push((reply_id, args.to_vec()));
        Ok(())
    }

    fn set_property(&self, name: &str, value: &str) -> Result<(), i32> {
        self.state.inner.lock().properties.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn get_property(&self, name: &str) -> Option<String> {
        self.state.inner.lock().properties.get(name).cloned()
    }

    fn observe_property(&self, reply_id: u64, name: &str, format: PropertyFormat) -> Result<(), i32> {
        self.state.inner.lock().observations.push((reply_id, name.to_string(), format));
        Ok(())
    }

    fn poll_event(&self) -> Option<EngineEvent> {
        self.state.inner.lock().events.pop_front()
    }

    fn set_wakeup_callback(&self, callback: Option<WakeupCallback>) {
        let mut inner = self.state.inner.lock();
        if callback.is_none() {
            FakeEngineState::record_lifecycle(&mut inner, "wakeup-detached");
        }
        inner.wakeup = callback;
    }

    fn create_render_context(&self, _resolver: ProcAddressResolver) -> Result<Box<dyn RenderContext>, i32> {
        Ok(Box::new(FakeRenderContext { state: self.state.clone() }))
    }

    fn error_string(&self, code: i32) -> String {
        format!("fake engine error {code}")
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        let mut inner = self.state.inner.lock();
        inner.destroyed = true;
        inner.wakeup = None;
        FakeEngineState::record_lifecycle(&mut inner, "terminated");
    }
}

struct FakeRenderContext {
    state: Arc<FakeEngineState>,
}

impl RenderContext for FakeRenderContext {
    fn set_update_callback(&mut self, callback: Option<WakeupCallback>) {
        let mut inner = self.state.inner.lock();
        if callback.is_none() {
            FakeEngineState::record_lifecycle(&mut inner, "update-detached");
        }
        inner.update = callback;
    }

    fn render(&mut self, fbo: u32, width: i32, height: i32, flip_y: bool) -> Result<(), i32> {
        let (clobber, update) = {
            let mut inner = self.state.inner.lock();
            inner.renders.push((fbo, width, height, flip_y));
            let update = if std::mem::take(&mut inner.frame_during_render) { inner.update.clone() } else { None };
            (inner.clobber.clone(), update)
        };
        if let Some(gpu) = clobber {
            gpu.clobber_state();
        }
        if let Some(update) = update {
            update();
        }
        Ok(())
    }
}

impl Drop for FakeRenderContext {
    fn drop(&mut self) {
        let mut inner = self.state.inner.lock();
        inner.update = None;
        FakeEngineState::record_lifecycle(&mut inner, "render-context-freed");
    }
}

// ---------------------------------------------------------------------------
// GPU
// ---------------------------------------------------------------------------

const HOST_CONTEXT: ContextBinding = ContextBinding { display: 1, draw_surface: 1, read_surface: 1, context: 1 };
const ENGINE_CONTEXT: ContextBinding = ContextBinding { display: 1, draw_surface: 0, read_surface: 0, context: 2 };

struct GpuState {
    mode: ContextMode,
    current: ContextBinding,
    engine_context: bool,
    make_current_calls: usize,
    fail_make_current: bool,
    fail_import: bool,
    next_name: u32,
    textures: HashSet<u32>,
    framebuffers: HashMap<u32, FrameSize>,
    images: HashSet<usize>,
    targets_created: usize,
    violations: Vec<String>,
    gl: GlStateSnapshot,
    log: OpLog,
}

impl GpuState {
    fn name(&mut self) -> u32 {
        self.next_name += 1;
        self.next_name
    }

    fn log(&self, op: &str) {
        self.log.lock().push(op.to_string());
    }

    fn engine_side(&self) -> ContextBinding {
        match self.mode {
            ContextMode::Separate => ENGINE_CONTEXT,
            ContextMode::Shared => HOST_CONTEXT,
        }
    }

    fn expect_current(&mut self, expected: ContextBinding, op: &str) {
        if self.current != expected {
            self.violations.push(format!("{op} with context {} current", self.current.context));
        }
    }
}

/// GL bookkeeping without GL. Context 1 is the host's and starts current;
/// context 2 is the engine's, created lazily in separate mode.
#[derive(Clone)]
pub struct FakeGpu {
    state: Arc<Mutex<GpuState>>,
}

impl FakeGpu {
    pub fn new(mode: ContextMode) -> Self {
        Self {
            state: Arc::new(Mutex::new(GpuState {
                mode,
                current: HOST_CONTEXT,
                engine_context: false,
                make_current_calls: 0,
                fail_make_current: false,
                fail_import: false,
                next_name: 0,
                textures: HashSet::new(),
                framebuffers: HashMap::new(),
                images: HashSet::new(),
                targets_created: 0,
                violations: Vec::new(),
                gl: GlStateSnapshot {
                    viewport: [0, 0, 1280, 720],
                    scissor_test: true,
                    blend: true,
                    clear_color: [0.1, 0.2, 0.3, 1.0],
                    ..GlStateSnapshot::default()
                },
                log: Arc::new(Mutex::new(Vec::new())),
            })),
        }
    }

    pub fn host_binding(&self) -> ContextBinding {
        HOST_CONTEXT
    }

    pub fn make_current_calls(&self) -> usize {
        self.state.lock().make_current_calls
    }

    /// Textures, framebuffers and shared images still alive.
    pub fn live_objects(&self) -> usize {
        let s = self.state.lock();
        s.textures.len() + s.framebuffers.len() + s.images.len()
    }

    pub fn live_sizes(&self) -> Vec<FrameSize> {
        self.state.lock().framebuffers.values().copied().collect()
    }

    pub fn targets_created(&self) -> usize {
        self.state.lock().targets_created
    }

    /// Calls made while the wrong context was current.
    pub fn context_violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    /// The logged ops whose name is one of `names`, in call order.
    pub fn ops_matching(&self, names: &[&str]) -> Vec<String> {
        let log = self.state.lock().log.clone();
        let ops = log.lock();
        ops.iter().filter(|op| names.contains(&op.as_str())).cloned().collect()
    }

    pub fn op_log(&self) -> OpLog {
        self.state.lock().log.clone()
    }

    pub fn fail_make_current(&self, fail: bool) {
        self.state.lock().fail_make_current = fail;
    }

    pub fn fail_import(&self, fail: bool) {
        self.state.lock().fail_import = fail;
    }

    /// What a foreign renderer might leave behind.
    pub fn clobber_state(&self) {
        let mut s = self.state.lock();
        s.gl.viewport = [3, 7, 11, 13];
        s.gl.scissor_test = !s.gl.scissor_test;
        s.gl.blend = !s.gl.blend;
        s.gl.blend_src_rgb += 1;
        s.gl.framebuffer = 99;
    }
}

impl GpuBackend for FakeGpu {
    fn mode(&self) -> ContextMode {
        self.state.lock().mode
    }

    fn current_binding(&self) -> ContextBinding {
        self.state.lock().current
    }

    fn make_current(&self, binding: ContextBinding) -> bool {
        let mut s = self.state.lock();
        s.make_current_calls += 1;
        s.log("make-current");
        if s.fail_make_current {
            return false;
        }
        s.current = binding;
        true
    }

    fn engine_binding(&self) -> Result<ContextBinding, BridgeError> {
        let mut s = self.state.lock();
        if s.mode == ContextMode::Shared {
            return Ok(HOST_CONTEXT);
        }
        s.engine_context = true;
        Ok(ENGINE_CONTEXT)
    }

    fn destroy_engine_context(&self) {
        let mut s = self.state.lock();
        if !s.engine_context {
            return;
        }
        if s.current == ENGINE_CONTEXT {
            s.violations.push("engine context destroyed while current".to_string());
        }
        s.engine_context = false;
        s.log("destroy-engine-context");
    }

    fn create_render_target(&self, size: FrameSize) -> Result<RenderTarget, BridgeError> {
        let mut s = self.state.lock();
        let expected = s.engine_side();
        s.expect_current(expected, "create-target");
        let texture = s.name();
        let framebuffer = s.name();
        s.textures.insert(texture);
        s.framebuffers.insert(framebuffer, size);
        s.targets_created += 1;
        s.log("create-target");
        Ok(RenderTarget { texture: GlTexture::from_raw(texture), framebuffer: GlFramebuffer::from_raw(framebuffer) })
    }

    fn delete_render_target(&self, target: RenderTarget) {
        let mut s = self.state.lock();
        let expected = s.engine_side();
        s.expect_current(expected, "delete-target");
        s.textures.remove(&target.texture.name());
        s.framebuffers.remove(&target.framebuffer.name());
        s.log("delete-target");
    }

    fn export_image(&self, target: &RenderTarget) -> Result<SharedImage, BridgeError> {
        let mut s = self.state.lock();
        let expected = s.engine_side();
        s.expect_current(expected, "export");
        if !s.textures.contains(&target.texture.name()) {
            return Err(BridgeError::ResourceBridge("export of a deleted texture".to_string()));
        }
        let image = s.name() as usize;
        s.images.insert(image);
        s.log("export");
        Ok(SharedImage::from_raw(image))
    }

    fn destroy_image(&self, image: SharedImage) {
        let mut s = self.state.lock();
        s.images.remove(&image.raw());
        s.log("destroy-image");
    }

    fn import_image(&self, image: &SharedImage, _size: FrameSize) -> Result<GlTexture, BridgeError> {
        let mut s = self.state.lock();
        s.expect_current(HOST_CONTEXT, "import");
        if s.fail_import {
            return Err(BridgeError::ResourceBridge("glEGLImageTargetTexture2DOES failed".to_string()));
        }
        if !s.images.contains(&image.raw()) {
            return Err(BridgeError::ResourceBridge("import of a destroyed image".to_string()));
        }
        let texture = s.name();
        s.textures.insert(texture);
        s.log("import");
        Ok(GlTexture::from_raw(texture))
    }

    fn delete_texture(&self, texture: GlTexture) {
        let mut s = self.state.lock();
        s.expect_current(HOST_CONTEXT, "delete-texture");
        s.textures.remove(&texture.name());
        s.log("delete-texture");
    }

    fn capture_state(&self) -> GlStateSnapshot {
        self.state.lock().gl
    }

    fn restore_state(&self, snapshot: &GlStateSnapshot) {
        self.state.lock().gl = *snapshot;
    }

    fn bind_target(&self, target: &RenderTarget, size: FrameSize) {
        let mut s = self.state.lock();
        s.gl.framebuffer = target.framebuffer.name() as i32;
        s.gl.viewport = [0, 0, size.width, size.height];
    }

    fn clear_transparent(&self, target: &RenderTarget, size: FrameSize) {
        let mut s = self.state.lock();
        s.gl.framebuffer = target.framebuffer.name() as i32;
        s.gl.viewport = [0, 0, size.width, size.height];
        s.gl.scissor_test = false;
        s.gl.clear_color = [0.0; 4];
        s.log("clear");
    }

    fn flush(&self) {
        self.state.lock().log("flush");
    }

    fn proc_resolver(&self) -> ProcAddressResolver {
        null_resolver()
    }
}

// ---------------------------------------------------------------------------
// Host compositor
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RegistryState {
    next_id: i64,
    frames: HashMap<i64, usize>,
    unregistered: Vec<i64>,
    log: Option<OpLog>,
}

#[derive(Default)]
pub struct RecordingRegistry {
    state: Mutex<RegistryState>,
}

impl RecordingRegistry {
    /// Frame-available notifications received for `id`.
    pub fn frames_for(&self, id: i64) -> usize {
        self.state.lock().frames.get(&id).copied().unwrap_or(0)
    }

    pub fn unregistered(&self) -> Vec<i64> {
        self.state.lock().unregistered.clone()
    }

    pub fn log_into(&self, log: OpLog) {
        self.state.lock().log = Some(log);
    }
}

impl TextureRegistry for RecordingRegistry {
    fn register_texture(&self) -> Result<i64, BridgeError> {
        let mut s = self.state.lock();
        s.next_id += 1;
        Ok(s.next_id)
    }

    fn unregister_texture(&self, texture_id: i64) {
        let mut s = self.state.lock();
        s.unregistered.push(texture_id);
        if let Some(log) = &s.log {
            log.lock().push("unregister".to_string());
        }
    }

    fn mark_frame_available(&self, texture_id: i64) {
        *self.state.lock().frames.entry(texture_id).or_default() += 1;
    }
}

// ---------------------------------------------------------------------------
// Window manager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WmOp {
    CreateContainer(WindowRef),
    CreateEngineWindow(WindowRef),
    Destroy(WindowRef),
    Adopt { child: WindowRef, parent: WindowRef },
    PlaceBehind { window: WindowRef, host: WindowRef, rect: Rect },
    Move { window: WindowRef, rect: Rect },
    Shown { window: WindowRef, shown: bool },
    Composition { host: WindowRef, enabled: bool },
    RefreshFrame(WindowRef),
    Flush,
    Redraw(WindowRef),
    Passthrough { host: WindowRef, enabled: bool },
    Focus(WindowRef),
    Close(WindowRef),
}

#[derive(Default)]
struct WmState {
    ops: Vec<WmOp>,
    next_window: isize,
    fail: bool,
    window_rects: HashMap<WindowRef, Rect>,
    client_origins: HashMap<WindowRef, (i32, i32)>,
    last_rects: HashMap<WindowRef, Rect>,
    shown: HashMap<WindowRef, bool>,
    composition: HashMap<WindowRef, bool>,
    passthrough: HashMap<WindowRef, bool>,
    parents: HashMap<WindowRef, WindowRef>,
    live: HashSet<WindowRef>,
    closed: Vec<WindowRef>,
    container_handler: Option<ContainerEventHandler>,
}

impl WmState {
    fn new_window(&mut self) -> WindowRef {
        self.next_window += 1;
        let window = WindowRef::from_raw(0x1000 + self.next_window);
        self.live.insert(window);
        window
    }
}

/// Records every call. With [`FakeWindowManager::fail_calls`] set, calls are
/// still recorded but change nothing and return an error.
#[derive(Default)]
pub struct FakeWindowManager {
    state: Mutex<WmState>,
}

impl FakeWindowManager {
    pub fn set_window_rect(&self, window: WindowRef, rect: Rect) {
        self.state.lock().window_rects.insert(window, rect);
    }

    pub fn set_client_origin(&self, window: WindowRef, origin: (i32, i32)) {
        self.state.lock().client_origins.insert(window, origin);
    }

    pub fn fail_calls(&self, fail: bool) {
        self.state.lock().fail = fail;
    }

    /// Delivers `event` the way the container's window procedure would.
    pub fn fire_container_event(&self, event: ContainerEvent) {
        let handler = self.state.lock().container_handler.clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn ops(&self) -> Vec<WmOp> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    pub fn count(&self, pred: impl Fn(&WmOp) -> bool) -> usize {
        self.state.lock().ops.iter().filter(|op| pred(op)).count()
    }

    pub fn last_rect(&self, window: WindowRef) -> Option<Rect> {
        self.state.lock().last_rects.get(&window).copied()
    }

    pub fn is_shown(&self, window: WindowRef) -> bool {
        self.state.lock().shown.get(&window).copied().unwrap_or(false)
    }

    pub fn composition(&self, host: WindowRef) -> bool {
        self.state.lock().composition.get(&host).copied().unwrap_or(false)
    }

    pub fn passthrough(&self, host: WindowRef) -> bool {
        self.state.lock().passthrough.get(&host).copied().unwrap_or(false)
    }

    pub fn parent_of(&self, window: WindowRef) -> Option<WindowRef> {
        self.state.lock().parents.get(&window).copied()
    }

    pub fn closed(&self) -> Vec<WindowRef> {
        self.state.lock().closed.clone()
    }

    /// Created windows neither destroyed nor closed.
    pub fn live_windows(&self) -> usize {
        self.state.lock().live.len()
    }

    fn record(&self, op: WmOp, apply: impl FnOnce(&mut WmState)) -> Result<(), BridgeError> {
        let mut s = self.state.lock();
        s.ops.push(op);
        if s.fail {
            return Err(BridgeError::Platform("injected failure".to_string()));
        }
        apply(&mut s);
        Ok(())
    }
}

impl WindowManager for FakeWindowManager {
    fn window_rect(&self, window: WindowRef) -> Option<Rect> {
        self.state.lock().window_rects.get(&window).copied()
    }

    fn client_origin(&self, window: WindowRef) -> Option<(i32, i32)> {
        self.state.lock().client_origins.get(&window).copied()
    }

    fn create_container(&self, _host: WindowRef, on_event: ContainerEventHandler) -> Result<OwnedWindow, BridgeError> {
        let mut s = self.state.lock();
        if s.fail {
            return Err(BridgeError::Platform("CreateWindowExW failed".to_string()));
        }
        let window = s.new_window();
        s.container_handler = Some(on_event);
        s.ops.push(WmOp::CreateContainer(window));
        Ok(OwnedWindow::adopt_created(window))
    }

    fn create_engine_window(&self) -> Result<OwnedWindow, BridgeError> {
        let mut s = self.state.lock();
        if s.fail {
            return Err(BridgeError::Platform("CreateWindowExW failed".to_string()));
        }
        let window = s.new_window();
        s.ops.push(WmOp::CreateEngineWindow(window));
        Ok(OwnedWindow::adopt_created(window))
    }

    fn destroy_window(&self, window: OwnedWindow) {
        let window = window.release();
        let mut s = self.state.lock();
        s.ops.push(WmOp::Destroy(window));
        s.live.remove(&window);
        s.parents.remove(&window);
    }

    fn adopt(&self, child: WindowRef, parent: WindowRef) -> Result<(), BridgeError> {
        self.record(WmOp::Adopt { child, parent }, |s| {
            s.parents.insert(child, parent);
        })
    }

    fn place_behind(&self, window: WindowRef, host: WindowRef, rect: Rect) -> Result<(), BridgeError> {
        self.record(WmOp::PlaceBehind { window, host, rect }, |s| {
            s.last_rects.insert(window, rect);
        })
    }

    fn move_window(&self, window: WindowRef, rect: Rect) -> Result<(), BridgeError> {
        self.record(WmOp::Move { window, rect }, |s| {
            s.last_rects.insert(window, rect);
        })
    }

    fn set_shown(&self, window: WindowRef, shown: bool) -> Result<(), BridgeError> {
        self.record(WmOp::Shown { window, shown }, |s| {
            s.shown.insert(window, shown);
        })
    }

    fn set_composition(&self, host: WindowRef, enabled: bool) -> Result<(), BridgeError> {
        self.record(WmOp::Composition { host, enabled }, |s| {
            s.composition.insert(host, enabled);
        })
    }

    fn refresh_frame(&self, window: WindowRef) -> Result<(), BridgeError> {
        self.record(WmOp::RefreshFrame(window), |_| {})
    }

    fn flush_composition(&self) -> Result<(), BridgeError> {
        self.record(WmOp::Flush, |_| {})
    }

    fn redraw(&self, window: WindowRef) -> Result<(), BridgeError> {
        self.record(WmOp::Redraw(window), |_| {})
    }

    fn set_input_passthrough(&self, host: WindowRef, enabled: bool) -> Result<(), BridgeError> {
        self.record(WmOp::Passthrough { host, enabled }, |s| {
            s.passthrough.insert(host, enabled);
        })
    }

    fn focus(&self, window: WindowRef) -> Result<(), BridgeError> {
        self.record(WmOp::Focus(window), |_| {})
    }

    fn close(&self, window: WindowRef) -> Result<(), BridgeError> {
        self.record(WmOp::Close(window), |s| {
            s.closed.push(window);
            s.live.remove(&window);
        })
    }
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ManualTimerState {
    actions: Vec<DebounceAction>,
    cancels: usize,
}

/// Fires only when told to. Unlike the real debouncer it keeps superseded
/// actions, so stale settle steps actually run and must be ignored.
#[derive(Default)]
pub struct ManualTimer {
    state: Mutex<ManualTimerState>,
}

impl ManualTimer {
    pub fn fire_all(&self) -> usize {
        let actions = std::mem::take(&mut self.state.lock().actions);
        let count = actions.len();
        for action in actions {
            action();
        }
        count
    }

    pub fn scheduled(&self) -> usize {
        self.state.lock().actions.len()
    }

    pub fn cancels(&self) -> usize {
        self.state.lock().cancels
    }
}

impl DebounceTimer for ManualTimer {
    fn schedule(&self, _delay: std::time::Duration, action: DebounceAction) {
        self.state.lock().actions.push(action);
    }

    fn cancel(&self) {
        let mut s = self.state.lock();
        s.actions.clear();
        s.cancels += 1;
    }
}
