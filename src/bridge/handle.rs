//! The UI-thread owner of one engine session.
//!
//! Engine threads only ever reach this module through [`UiSignal::raise`]; every
//! drain, sink delivery and completion runs on the UI thread via the host's
//! [`UiScheduler`].

use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};

use super::{
    events::{EventSink, host_event_for},
    observed::{ObservedProperties, ObservedProperty},
    pending::{CommandCompletion, PendingCommands},
    signal::UiSignal,
    task_queue::UiScheduler,
};
use crate::{
    config::{BridgeConfig, is_truthy},
    constants::{COLORSPACE_HINT_PROPERTY, HDR_OUTPUT_OPTIONS, HDR_PROPERTY, SIG_PEAK_PROPERTY},
    engine::{
        Engine, EngineEvent, EngineFactory, EngineValue, LogMessage, ProcAddressResolver, PropertyFormat,
        RenderContext, SurfaceTarget,
    },
    error::BridgeError,
};

/// Listener told that the engine has a new frame to render. Runs on the UI thread.
pub type RedrawListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Default)]
struct HdrState {
    enabled: bool,
    sig_peak: Option<f64>,
}

struct Shared {
    factory: Arc<dyn EngineFactory>,
    config: BridgeConfig,

    engine: RwLock<Option<Arc<dyn Engine>>>,
    render_context: Mutex<Option<Box<dyn RenderContext>>>,
    init_lock: Mutex<()>,

    disposed: AtomicBool,
    shut_down: AtomicBool,
    needs_redraw: AtomicBool,
    next_reply_id: AtomicU64,

    drain_signal: Arc<UiSignal>,
    redraw_signal: Arc<UiSignal>,

    observed: Mutex<ObservedProperties>,
    pending: Mutex<PendingCommands>,
    sink: Mutex<Option<Arc<dyn EventSink>>>,
    redraw_listener: Mutex<Option<RedrawListener>>,
    hdr: Mutex<HdrState>,
}

/// Cheaply cloneable handle to one engine session.
///
/// A session runs from a successful [`initialize`](EngineHandle::initialize) to
/// [`dispose`](EngineHandle::dispose). A disposed handle never comes back; build
/// a new one for the next session.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    pub fn new(factory: Arc<dyn EngineFactory>, scheduler: Arc<dyn UiScheduler>, config: BridgeConfig) -> Self {
        let hdr = HdrState { enabled: config.hdr_output(), sig_peak: None };
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let drain_target = weak.clone();
            let redraw_target = weak.clone();
            Shared {
                factory,
                config,
                engine: RwLock::new(None),
                render_context: Mutex::new(None),
                init_lock: Mutex::new(()),
                disposed: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                needs_redraw: AtomicBool::new(false),
                next_reply_id: AtomicU64::new(1),
                drain_signal: UiSignal::new(
                    scheduler.clone(),
                    Box::new(move || {
                        if let Some(shared) = drain_target.upgrade() {
                            EngineHandle { shared }.drain_events();
                        }
                    }),
                ),
                redraw_signal: UiSignal::new(
                    scheduler,
                    Box::new(move || {
                        if let Some(shared) = redraw_target.upgrade() {
                            EngineHandle { shared }.on_frame_ready();
                        }
                    }),
                ),
                observed: Mutex::new(ObservedProperties::default()),
                pending: Mutex::new(PendingCommands::default()),
                sink: Mutex::new(None),
                redraw_listener: Mutex::new(None),
                hdr: Mutex::new(hdr),
            }
        });
        Self { shared }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub fn set_event_sink(&self, sink: Option<Arc<dyn EventSink>>) {
        *self.shared.sink.lock() = sink;
    }

    pub fn set_redraw_listener(&self, listener: Option<RedrawListener>) {
        *self.shared.redraw_listener.lock() = listener;
    }

    /// The engine, if calls into it are currently allowed.
    fn live_engine(&self) -> Option<Arc<dyn Engine>> {
        if self.shared.disposed.load(Ordering::Acquire) || self.shared.shut_down.load(Ordering::Acquire) {
            return None;
        }
        self.shared.engine.read().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.live_engine().is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Creates, configures and starts the engine. Idempotent once it succeeded.
    /// On failure nothing of the attempt survives and the call may be retried.
    pub fn initialize(&self, target: SurfaceTarget) -> Result<(), BridgeError> {
        let _guard = self.shared.init_lock.lock();
        if self.is_disposed() {
            return Err(BridgeError::NotInitialized("engine handle already disposed".to_string()));
        }
        if self.shared.engine.read().is_some() {
            debug!("[EngineHandle] initialize: already initialized");
            return Ok(());
        }

        info!("[EngineHandle] Initializing engine for {:?}", target);
        let engine = self.shared.factory.create()?;
        let config = &self.shared.config;

        let hdr = config.hdr_output();
        self.shared.hdr.lock().enabled = hdr;
        let hdr_options: &[(&str, &str)] = if hdr { HDR_OUTPUT_OPTIONS } else { &[(COLORSPACE_HINT_PROPERTY, "no")] };
        for (name, value) in hdr_options {
            if let Err(code) = engine.set_option(name, value) {
                warn!("[EngineHandle] option {}={} rejected: {}", name, value, engine.error_string(code));
            }
        }
        for (name, value) in &config.engine_options {
            if let Err(code) = engine.set_option(name, value) {
                warn!("[EngineHandle] option {}={} rejected: {}", name, value, engine.error_string(code));
            }
        }
        let surface_option = match target {
            SurfaceTarget::RenderApi => ("vo", "libmpv".to_string()),
            SurfaceTarget::Window(window) => ("wid", window.raw().to_string()),
        };
        for (name, value) in [("hwdec", config.hwdec.clone()), (surface_option.0, surface_option.1)] {
            if let Err(code) = engine.set_option(name, &value) {
                warn!("[EngineHandle] option {}={} rejected: {}", name, value, engine.error_string(code));
            }
        }
        if let Err(code) = engine.request_log_messages(&config.log_level) {
            warn!("[EngineHandle] log level '{}' rejected: {}", config.log_level, engine.error_string(code));
        }

        if let Err(code) = engine.initialize() {
            let message = engine.error_string(code);
            error!("[EngineHandle] engine initialization failed: {}", message);
            // Dropping the instance terminates it; nothing of this attempt is kept.
            drop(engine);
            return Err(BridgeError::Initialization(message));
        }

        let engine: Arc<dyn Engine> = Arc::from(engine);
        self.observe_with(&engine, SIG_PEAK_PROPERTY, PropertyFormat::Double, None);

        let drain = self.shared.drain_signal.clone();
        engine.set_wakeup_callback(Some(Arc::new(move || drain.raise())));
        *self.shared.engine.write() = Some(engine);

        // Events queued before the callback was installed would otherwise wait
        // for the next wakeup.
        self.shared.drain_signal.raise();
        info!("[EngineHandle] Engine initialized");
        Ok(())
    }

    /// Fire-and-forget command. Failures are logged only.
    pub fn command(&self, args: &[String]) {
        let Some(engine) = self.live_engine() else {
            warn!("[EngineHandle] command {:?} ignored: not initialized", args.first());
            return;
        };
        if let Err(code) = engine.command(args) {
            warn!("[EngineHandle] command {:?} failed: {}", args, engine.error_string(code));
        }
    }

    /// Issues `args` asynchronously. `on_complete` runs exactly once: with the
    /// engine's result, with a failure if the engine refuses the command, or with
    /// [`BridgeError::Disposed`] if the session ends first.
    pub fn command_async(&self, args: Vec<String>, on_complete: CommandCompletion) {
        let Some(engine) = self.live_engine() else {
            on_complete(Err(BridgeError::not_initialized()));
            return;
        };
        let reply_id = self.shared.next_reply_id.fetch_add(1, Ordering::Relaxed);
        let name = args.first().cloned().unwrap_or_default();
        debug!("[EngineHandle] async command #{} {:?}", reply_id, args);
        self.shared.pending.lock().insert(reply_id, name, on_complete);

        if let Err(code) = engine.command_async(reply_id, &args) {
            // Whoever takes the entry owns the completion; disposal may have beaten us.
            let entry = self.shared.pending.lock().take(reply_id);
            if let Some(entry) = entry {
                entry.complete(Err(BridgeError::CommandFailure { code, message: engine.error_string(code) }));
            }
        }
    }

    pub fn set_property(&self, name: &str, value: &str) {
        let Some(engine) = self.live_engine() else {
            warn!("[EngineHandle] set_property {} ignored: not initialized", name);
            return;
        };
        if name == HDR_PROPERTY {
            self.set_hdr_enabled(&engine, value);
            return;
        }
        if let Err(code) = engine.set_property(name, value) {
            warn!("[EngineHandle] set_property {}={} failed: {}", name, value, engine.error_string(code));
        }
    }

    /// `None` when uninitialized or when the engine has no value.
    pub fn get_property(&self, name: &str) -> Option<String> {
        if name == HDR_PROPERTY {
            self.live_engine()?;
            let enabled = self.shared.hdr.lock().enabled;
            return Some(if enabled { "yes" } else { "no" }.to_string());
        }
        self.live_engine()?.get_property(name)
    }

    /// Observes `name` once; repeated requests for the same name are no-ops.
    pub fn observe_property(&self, name: &str, format: PropertyFormat, client_id: Option<i64>) {
        let Some(engine) = self.live_engine() else {
            warn!("[EngineHandle] observe_property {} ignored: not initialized", name);
            return;
        };
        self.observe_with(&engine, name, format, client_id);
    }

    fn observe_with(&self, engine: &Arc<dyn Engine>, name: &str, format: PropertyFormat, client_id: Option<i64>) {
        let reply_id = self.shared.next_reply_id.fetch_add(1, Ordering::Relaxed);
        let fresh = self.shared.observed.lock().register(ObservedProperty {
            name: name.to_string(),
            format,
            reply_id,
            client_id,
        });
        if !fresh {
            debug!("[EngineHandle] {} already observed", name);
            return;
        }
        if let Err(code) = engine.observe_property(reply_id, name, format) {
            warn!("[EngineHandle] observe {} failed: {}", name, engine.error_string(code));
            self.shared.observed.lock().remove(name);
        }
    }

    pub fn observed_count(&self) -> usize {
        self.shared.observed.lock().len()
    }

    pub fn pending_command_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn set_log_level(&self, level: &str) {
        let Some(engine) = self.live_engine() else {
            warn!("[EngineHandle] set_log_level ignored: not initialized");
            return;
        };
        if let Err(code) = engine.request_log_messages(level) {
            warn!("[EngineHandle] log level '{}' rejected: {}", level, engine.error_string(code));
        }
    }

    fn set_hdr_enabled(&self, engine: &Arc<dyn Engine>, value: &str) {
        let enabled = is_truthy(value);
        let peak = {
            let mut hdr = self.shared.hdr.lock();
            hdr.enabled = enabled;
            hdr.sig_peak
        };
        let hint = if enabled { "yes" } else { "no" };
        if let Err(code) = engine.set_property(COLORSPACE_HINT_PROPERTY, hint) {
            warn!("[EngineHandle] {}={} failed: {}", COLORSPACE_HINT_PROPERTY, hint, engine.error_string(code));
        }
        info!(
            "[EngineHandle] HDR output {} (content peak {:?})",
            if enabled { "enabled" } else { "disabled" },
            peak
        );
    }

    pub fn is_hdr_content(&self) -> bool {
        self.shared.hdr.lock().sig_peak.is_some_and(|peak| peak > 1.0)
    }

    /// Pops and dispatches every queued engine event. UI thread only.
    pub fn drain_events(&self) {
        let Some(engine) = self.live_engine() else {
            return;
        };
        while !self.is_disposed() {
            let Some(event) = engine.poll_event() else {
                break;
            };
            if event == EngineEvent::Shutdown {
                info!("[EngineHandle] Engine shut down");
                self.shared.shut_down.store(true, Ordering::Release);
                self.fail_pending("engine shut down");
                break;
            }
            self.dispatch(&engine, event);
        }
    }

    fn dispatch(&self, engine: &Arc<dyn Engine>, event: EngineEvent) {
        match &event {
            EngineEvent::LogMessage(msg) => log_engine_message(msg),
            EngineEvent::CommandReply { reply_id, error } => {
                let entry = self.shared.pending.lock().take(*reply_id);
                match entry {
                    Some(entry) => {
                        debug!("[EngineHandle] reply #{} for {} ({})", reply_id, entry.command, error);
                        let result = if *error < 0 {
                            Err(BridgeError::CommandFailure { code: *error, message: engine.error_string(*error) })
                        } else {
                            Ok(())
                        };
                        entry.complete(result);
                    }
                    None => debug!("[EngineHandle] reply #{} without pending command", reply_id),
                }
                return;
            }
            EngineEvent::PropertyChange { name, value, .. } if name == SIG_PEAK_PROPERTY => {
                self.record_sig_peak(value);
            }
            _ => {}
        }

        if let Some(host_event) = host_event_for(&event) {
            let sink = self.shared.sink.lock().clone();
            match sink {
                Some(sink) => sink.send(host_event),
                None => trace!("[EngineHandle] no sink for {}", host_event.name()),
            }
        }
    }

    fn record_sig_peak(&self, value: &EngineValue) {
        let peak = value.as_f64();
        let mut hdr = self.shared.hdr.lock();
        if hdr.sig_peak != peak {
            hdr.sig_peak = peak;
            debug!("[EngineHandle] content sig-peak {:?} (HDR: {})", peak, peak.is_some_and(|p| p > 1.0));
        }
    }

    /// Creates the engine's render context against the GL context current on the
    /// calling thread. No-op if it already exists.
    pub fn init_render_context(&self, resolver: ProcAddressResolver) -> Result<(), BridgeError> {
        let engine = self.live_engine().ok_or_else(BridgeError::not_initialized)?;
        let mut slot = self.shared.render_context.lock();
        if slot.is_some() {
            return Ok(());
        }
        let mut context = engine.create_render_context(resolver).map_err(|code| {
            BridgeError::Initialization(format!("render context: {}", engine.error_string(code)))
        })?;
        let redraw = self.shared.redraw_signal.clone();
        context.set_update_callback(Some(Arc::new(move || redraw.raise())));
        *slot = Some(context);
        info!("[EngineHandle] Render context created");
        Ok(())
    }

    pub fn has_render_context(&self) -> bool {
        self.shared.render_context.lock().is_some()
    }

    /// Renders the current frame into `fbo`. The GL context the render context
    /// was created under must be current.
    pub fn render(&self, fbo: u32, width: i32, height: i32) -> Result<(), BridgeError> {
        let engine = self.live_engine().ok_or_else(BridgeError::not_initialized)?;
        let mut slot = self.shared.render_context.lock();
        let context = slot
            .as_mut()
            .ok_or_else(|| BridgeError::ResourceBridge("render context not created".to_string()))?;
        self.shared.needs_redraw.store(false, Ordering::Release);
        context
            .render(fbo, width, height, self.shared.config.flip_y)
            .map_err(|code| BridgeError::ResourceBridge(format!("render: {}", engine.error_string(code))))
    }

    /// Frees the render context. Its GL context must be current.
    pub fn release_render_context(&self) {
        let context = self.shared.render_context.lock().take();
        if let Some(mut context) = context {
            context.set_update_callback(None);
            drop(context);
            info!("[EngineHandle] Render context released");
        }
    }

    fn on_frame_ready(&self) {
        if self.is_disposed() {
            return;
        }
        self.shared.needs_redraw.store(true, Ordering::Release);
        let listener = self.shared.redraw_listener.lock().clone();
        if let Some(listener) = listener {
            listener();
        }
    }

    /// Whether the engine announced a frame that has not been rendered yet.
    pub fn needs_redraw(&self) -> bool {
        self.shared.needs_redraw.load(Ordering::Acquire)
    }

    fn fail_pending(&self, reason: &str) {
        let outstanding = self.shared.pending.lock().drain_all();
        for (reply_id, entry) in outstanding {
            debug!("[EngineHandle] failing #{} {}: {}", reply_id, entry.command, reason);
            entry.complete(Err(BridgeError::Disposed(reason.to_string())));
        }
    }

    /// Ends the session. The second and later calls do nothing.
    pub fn dispose(&self) {
        if self
            .shared
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("[EngineHandle] dispose: already disposed");
            return;
        }
        info!("[EngineHandle] Disposing");

        let engine = self.shared.engine.write().take();
        if let Some(engine) = &engine {
            engine.set_wakeup_callback(None);
        }
        if let Some(context) = self.shared.render_context.lock().as_mut() {
            context.set_update_callback(None);
        }

        self.shared.drain_signal.detach();
        self.shared.redraw_signal.detach();

        if self.shared.render_context.lock().take().is_some() {
            debug!("[EngineHandle] render context freed during dispose");
        }

        drop(engine);

        self.shared.observed.lock().clear();
        self.fail_pending("engine disposed");
        *self.shared.redraw_listener.lock() = None;
        info!("[EngineHandle] Disposed");
    }
}

fn log_engine_message(msg: &LogMessage) {
    match msg.level.as_str() {
        "fatal" | "error" => error!("[Engine:{}] {}", msg.prefix, msg.text),
        "warn" => warn!("[Engine:{}] {}", msg.prefix, msg.text),
        "info" => info!("[Engine:{}] {}", msg.prefix, msg.text),
        _ => debug!("[Engine:{}] {}", msg.prefix, msg.text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bridge::{HostEvent, UiTaskQueue},
        engine::{EngineValue, LogMessage},
        handles::WindowRef,
        testing::{FakeEngineFactory, RecordingSink, completion_recorder, null_resolver},
    };
    use serde_json::json;

    fn setup() -> (EngineHandle, Arc<FakeEngineFactory>, Arc<UiTaskQueue>, Arc<RecordingSink>) {
        let factory = Arc::new(FakeEngineFactory::default());
        let queue = Arc::new(UiTaskQueue::new());
        let handle = EngineHandle::new(factory.clone(), queue.clone(), BridgeConfig::default());
        let sink = Arc::new(RecordingSink::default());
        handle.set_event_sink(Some(sink.clone()));
        (handle, factory, queue, sink)
    }

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn initialize_applies_options_and_is_idempotent() {
        let (handle, factory, _queue, _sink) = setup();
        handle.initialize(SurfaceTarget::Window(WindowRef::from_raw(77))).unwrap();
        handle.initialize(SurfaceTarget::Window(WindowRef::from_raw(77))).unwrap();

        assert_eq!(factory.created(), 1);
        let state = factory.last_engine().unwrap();
        let options = state.options();
        assert!(options.contains(&("wid".to_string(), "77".to_string())));
        assert!(options.contains(&("keep-open".to_string(), "yes".to_string())));
        assert!(options.contains(&("hwdec".to_string(), "auto".to_string())));
        assert!(handle.is_initialized());
    }

    #[test]
    fn failed_initialize_leaves_nothing_behind_and_can_be_retried() {
        let (handle, factory, _queue, _sink) = setup();
        factory.fail_next_initialize();

        let err = handle.initialize(SurfaceTarget::RenderApi).unwrap_err();
        assert_eq!(err.code(), "INIT_FAILED");
        assert!(!handle.is_initialized());
        assert!(factory.last_engine().unwrap().is_destroyed());

        handle.initialize(SurfaceTarget::RenderApi).unwrap();
        assert!(handle.is_initialized());
        assert_eq!(factory.created(), 2);
        assert!(!factory.last_engine().unwrap().is_destroyed());
    }

    #[test]
    fn factory_failure_is_reported() {
        let (handle, factory, _queue, _sink) = setup();
        factory.fail_next_create();
        assert!(matches!(handle.initialize(SurfaceTarget::RenderApi), Err(BridgeError::Initialization(_))));
        handle.initialize(SurfaceTarget::RenderApi).unwrap();
    }

    #[test]
    fn calls_before_initialize_fail_quietly() {
        let (handle, factory, _queue, _sink) = setup();
        handle.command(&strings(&["stop"]));
        handle.set_property("pause", "yes");
        handle.observe_property("pause", PropertyFormat::Flag, None);
        assert_eq!(handle.get_property("pause"), None);
        assert_eq!(factory.created(), 0);

        let (completion, results) = completion_recorder();
        handle.command_async(strings(&["loadfile", "a.mkv"]), completion);
        assert_eq!(results.lock().len(), 1);
        assert_eq!(results.lock()[0].as_ref().unwrap_err().code(), "NOT_INITIALIZED");
    }

    #[test]
    fn observing_a_name_twice_registers_once_and_notifies_once() {
        let (handle, factory, queue, sink) = setup();
        handle.initialize(SurfaceTarget::RenderApi).unwrap();
        let engine = factory.last_engine().unwrap();
        let baseline = engine.observations().len();

        handle.observe_property("time-pos", PropertyFormat::Double, Some(1));
        handle.observe_property("time-pos", PropertyFormat::Double, Some(2));
        assert_eq!(engine.observations().len(), baseline + 1);

        engine.push_event(EngineEvent::PropertyChange {
            reply_id: 0,
            name: "time-pos".into(),
            value: EngineValue::Double(1.5),
        });
        queue.run_pending();

        let deliveries: Vec<_> = sink.events().into_iter().filter(|e| e.name() == "time-pos").collect();
        assert_eq!(deliveries, vec![HostEvent::property("time-pos", json!(1.5))]);
    }

    #[test]
    fn wakeup_schedules_a_single_drain_on_the_ui_queue() {
        let (handle, factory, queue, sink) = setup();
        handle.initialize(SurfaceTarget::RenderApi).unwrap();
        queue.run_pending();
        let engine = factory.last_engine().unwrap();

        engine.push_event(EngineEvent::FileLoaded);
        engine.push_event(EngineEvent::Seek);
        engine.wake();
        engine.wake();
        // Nothing is delivered from the waking thread.
        assert!(sink.events().is_empty());
        assert_eq!(queue.len(), 1);

        queue.run_pending();
        let names: Vec<_> = sink.events().iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec!["file-loaded", "seek"]);
    }

    #[test]
    fn shutdown_stops_the_drain_and_forbids_further_calls() {
        let (handle, factory, queue, sink) = setup();
        handle.initialize(SurfaceTarget::RenderApi).unwrap();
        let engine = factory.last_engine().unwrap();
        engine.push_event(EngineEvent::FileLoaded);
        engine.push_event(EngineEvent::Shutdown);
        engine.push_event(EngineEvent::Seek);
        queue.run_pending();

        assert_eq!(sink.events().len(), 1);
        assert!(!handle.is_initialized());
        let before = engine.commands().len();
        handle.command(&strings(&["stop"]));
        assert_eq!(engine.commands().len(), before);
    }

    #[test]
    fn async_command_completes_with_engine_result() {
        let (handle, factory, queue, _sink) = setup();
        handle.initialize(SurfaceTarget::RenderApi).unwrap();
        let engine = factory.last_engine().unwrap();

        let (ok_completion, ok_results) = completion_recorder();
        let (bad_completion, bad_results) = completion_recorder();
        handle.command_async(strings(&["loadfile", "a.mkv"]), ok_completion);
        handle.command_async(strings(&["seek", "nope"]), bad_completion);
        let ids = engine.async_reply_ids();
        assert_eq!(ids.len(), 2);

        // Replies arrive out of order.
        engine.push_event(EngineEvent::CommandReply { reply_id: ids[1], error: -12 });
        engine.push_event(EngineEvent::CommandReply { reply_id: ids[0], error: 0 });
        queue.run_pending();

        assert_eq!(ok_results.lock().as_slice(), &[Ok(())]);
        assert!(matches!(bad_results.lock()[0], Err(BridgeError::CommandFailure { code: -12, .. })));
        assert_eq!(handle.pending_command_count(), 0);
    }

    #[test]
    fn rejected_async_command_fails_immediately() {
        let (handle, factory, _queue, _sink) = setup();
        handle.initialize(SurfaceTarget::RenderApi).unwrap();
        factory.last_engine().unwrap().reject_async_commands();

        let (completion, results) = completion_recorder();
        handle.command_async(strings(&["loadfile", "a.mkv"]), completion);
        assert_eq!(results.lock().len(), 1);
        assert_eq!(results.lock()[0].as_ref().unwrap_err().code(), "COMMAND_FAILED");
        assert_eq!(handle.pending_command_count(), 0);
    }

    #[test]
    fn dispose_cancels_outstanding_commands_exactly_once() {
        let (handle, factory, queue, _sink) = setup();
        handle.initialize(SurfaceTarget::RenderApi).unwrap();
        let engine = factory.last_engine().unwrap();

        let (completion, results) = completion_recorder();
        handle.command_async(strings(&["loadfile", "a.mkv"]), completion);
        let id = engine.async_reply_ids()[0];

        handle.dispose();
        handle.dispose();
        assert_eq!(results.lock().len(), 1);
        assert_eq!(results.lock()[0].as_ref().unwrap_err().code(), "DISPOSED");

        // A late reply finds nothing to complete.
        engine.push_event(EngineEvent::CommandReply { reply_id: id, error: 0 });
        queue.run_pending();
        assert_eq!(results.lock().len(), 1);
        assert!(engine.is_destroyed());
        assert_eq!(handle.observed_count(), 0);
    }

    #[test]
    fn dispose_detaches_callbacks_before_terminating() {
        let (handle, factory, queue, sink) = setup();
        handle.initialize(SurfaceTarget::RenderApi).unwrap();
        handle.init_render_context(null_resolver()).unwrap();
        let engine = factory.last_engine().unwrap();
        engine.push_event(EngineEvent::FileLoaded);
        engine.wake();

        handle.dispose();
        assert_eq!(
            engine.lifecycle(),
            vec!["wakeup-detached", "update-detached", "render-context-freed", "terminated"]
        );
        // The drain scheduled before disposal was cancelled.
        assert!(queue.is_empty());
        engine.wake();
        queue.run_pending();
        assert!(sink.events().is_empty());
        assert!(matches!(handle.initialize(SurfaceTarget::RenderApi), Err(BridgeError::NotInitialized(_))));
    }

    #[test]
    fn render_requires_a_render_context() {
        let (handle, factory, queue, _sink) = setup();
        handle.initialize(SurfaceTarget::RenderApi).unwrap();
        assert!(matches!(handle.render(1, 10, 10), Err(BridgeError::ResourceBridge(_))));

        let frames = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let f = frames.clone();
        handle.set_redraw_listener(Some(Arc::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        })));
        handle.init_render_context(null_resolver()).unwrap();
        let engine = factory.last_engine().unwrap();

        engine.request_frame();
        assert_eq!(frames.load(Ordering::SeqCst), 0);
        queue.run_pending();
        assert_eq!(frames.load(Ordering::SeqCst), 1);
        assert!(handle.needs_redraw());

        handle.render(5, 640, 360).unwrap();
        assert!(!handle.needs_redraw());
        assert_eq!(engine.renders(), vec![(5, 640, 360, true)]);
    }

    #[test]
    fn hdr_output_is_on_by_default() {
        let (handle, factory, _queue, _sink) = setup();
        handle.initialize(SurfaceTarget::Window(WindowRef::from_raw(77))).unwrap();
        let options = factory.last_engine().unwrap().options();

        for (name, value) in [("target-colorspace-hint", "yes"), ("tone-mapping", "auto"), ("hdr-compute-peak", "auto")] {
            assert!(options.contains(&(name.to_string(), value.to_string())), "missing {name}={value}");
        }
        assert_eq!(handle.get_property("hdr-enabled").as_deref(), Some("yes"));
    }

    #[test]
    fn configured_colorspace_hint_drives_the_hdr_flag() {
        let factory = Arc::new(FakeEngineFactory::default());
        let queue = Arc::new(UiTaskQueue::new());
        let mut config = BridgeConfig { hdr_enabled: true, ..BridgeConfig::default() };
        config.set_engine_option("target-colorspace-hint", "no");
        let handle = EngineHandle::new(factory.clone(), queue, config);
        handle.initialize(SurfaceTarget::RenderApi).unwrap();

        let options = factory.last_engine().unwrap().options();
        assert!(!options.contains(&("tone-mapping".to_string(), "auto".to_string())));
        assert_eq!(options.iter().filter(|(k, _)| k == "target-colorspace-hint").last().map(|(_, v)| v.as_str()), Some("no"));
        assert_eq!(handle.get_property("hdr-enabled").as_deref(), Some("no"));
    }

    #[test]
    fn hdr_pseudo_property_toggles_colorspace_hint() {
        let (handle, factory, queue, _sink) = setup();
        handle.initialize(SurfaceTarget::RenderApi).unwrap();
        let engine = factory.last_engine().unwrap();

        handle.set_property("hdr-enabled", "yes");
        assert_eq!(engine.property("target-colorspace-hint").as_deref(), Some("yes"));
        assert_eq!(engine.property("hdr-enabled"), None);
        assert_eq!(handle.get_property("hdr-enabled").as_deref(), Some("yes"));

        handle.set_property("hdr-enabled", "off");
        assert_eq!(engine.property("target-colorspace-hint").as_deref(), Some("no"));

        engine.push_event(EngineEvent::PropertyChange {
            reply_id: 0,
            name: SIG_PEAK_PROPERTY.into(),
            value: EngineValue::Double(4.9),
        });
        queue.run_pending();
        assert!(handle.is_hdr_content());
    }

    #[test]
    fn log_messages_reach_the_sink() {
        let (handle, factory, queue, sink) = setup();
        handle.initialize(SurfaceTarget::RenderApi).unwrap();
        factory.last_engine().unwrap().push_event(EngineEvent::LogMessage(LogMessage {
            prefix: "cplayer".into(),
            level: "error".into(),
            text: "boom".into(),
        }));
        queue.run_pending();
        assert_eq!(
            sink.events()[0],
            HostEvent::event("log-message", Some(json!({"prefix": "cplayer", "level": "error", "text": "boom"})))
        );

        handle.set_log_level("warn");
        assert_eq!(factory.last_engine().unwrap().log_levels().last().map(String::as_str), Some("warn"));
    }
}
