use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;

use super::{
    args::{HostError, arg_map, f64_or, int_or_zero, required_bool, required_i64, required_str, required_string_list},
    output::VideoOutput,
};
use crate::{
    bridge::{CommandCompletion, EngineHandle, EventSink, UiScheduler},
    config::BridgeConfig,
    engine::{EngineFactory, LibMpvFactory, PropertyFormat},
    error::BridgeError,
    window::Rect,
};

/// Reply callback for one method call. Invoked exactly once, possibly later
/// (after an async command completes).
pub type Responder = Box<dyn FnOnce(Result<Value, HostError>) + Send + 'static>;

/// The host-facing player: one [`VideoOutput`] plus a fresh [`EngineHandle`]
/// per initialize/dispose session. UI thread only.
pub struct MediaPlayer<O: VideoOutput> {
    output: O,
    factory: Arc<dyn EngineFactory>,
    scheduler: Arc<dyn UiScheduler>,
    config: BridgeConfig,
    sink: Option<Arc<dyn EventSink>>,
    engine: Option<EngineHandle>,
}

impl<O: VideoOutput> MediaPlayer<O> {
    pub fn new(output: O, factory: Arc<dyn EngineFactory>, scheduler: Arc<dyn UiScheduler>, config: BridgeConfig) -> Self {
        Self { output, factory, scheduler, config, sink: None, engine: None }
    }

    /// Loads the engine library named by `config` (or the platform default) on
    /// first initialize.
    pub fn with_libmpv(output: O, scheduler: Arc<dyn UiScheduler>, config: BridgeConfig) -> Self {
        let factory = Arc::new(LibMpvFactory::new(config.library_path.clone()));
        Self::new(output, factory, scheduler, config)
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    pub fn engine(&self) -> Option<&EngineHandle> {
        self.engine.as_ref()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn set_event_sink(&mut self, sink: Option<Arc<dyn EventSink>>) {
        if let Some(engine) = &self.engine {
            engine.set_event_sink(sink.clone());
        }
        self.sink = sink;
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.as_ref().is_some_and(EngineHandle::is_initialized)
    }

    fn live_engine(&self) -> Result<EngineHandle, BridgeError> {
        self.engine
            .as_ref()
            .filter(|engine| engine.is_initialized())
            .cloned()
            .ok_or_else(BridgeError::not_initialized)
    }

    /// Starts a session. A no-op while one is running; a session the engine
    /// ended on its own is torn down and replaced.
    pub fn initialize(&mut self) -> Result<(), BridgeError> {
        if self.is_initialized() {
            return Ok(());
        }
        if let Some(stale) = self.engine.take() {
            info!("[MediaPlayer] Replacing a session the engine already ended");
            self.teardown(stale);
        }

        let target = self.output.prepare()?;
        let engine = EngineHandle::new(self.factory.clone(), self.scheduler.clone(), self.config.clone());
        engine.set_event_sink(self.sink.clone());

        if let Err(e) = engine.initialize(target) {
            warn!("[MediaPlayer] initialize failed: {}", e);
            engine.dispose();
            self.output.abandon();
            return Err(e);
        }
        if let Err(e) = self.output.attach(&engine) {
            warn!("[MediaPlayer] attaching output failed: {}", e);
            self.teardown(engine);
            return Err(e);
        }
        self.engine = Some(engine);
        info!("[MediaPlayer] Initialized");
        Ok(())
    }

    /// Ends the session. Outstanding commands complete with `DISPOSED`.
    pub fn dispose(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.teardown(engine);
            info!("[MediaPlayer] Disposed");
        }
    }

    fn teardown(&mut self, engine: EngineHandle) {
        self.output.detach(&engine);
        engine.dispose();
        self.output.release();
    }

    pub fn command(&self, args: Vec<String>, on_complete: CommandCompletion) {
        match self.live_engine() {
            Ok(engine) => engine.command_async(args, on_complete),
            Err(e) => on_complete(Err(e)),
        }
    }

    pub fn set_property(&self, name: &str, value: &str) -> Result<(), BridgeError> {
        self.live_engine()?.set_property(name, value);
        Ok(())
    }

    /// Empty engine values read as absent.
    pub fn get_property(&self, name: &str) -> Result<Option<String>, BridgeError> {
        Ok(self.live_engine()?.get_property(name).filter(|v| !v.is_empty()))
    }

    pub fn observe_property(&self, name: &str, format: PropertyFormat, id: i64) -> Result<(), BridgeError> {
        self.live_engine()?.observe_property(name, format, Some(id));
        Ok(())
    }

    pub fn set_log_level(&self, level: &str) -> Result<(), BridgeError> {
        self.live_engine()?.set_log_level(level);
        Ok(())
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.output.set_visible(visible);
    }

    pub fn set_video_rect(&mut self, rect: Rect, device_pixel_ratio: f64) {
        self.output.set_video_rect(rect, device_pixel_ratio);
    }

    /// Dispatches one call from the host's method channel.
    pub fn handle_method_call(&mut self, method: &str, args: &Value, reply: Responder) {
        debug!("[MediaPlayer] {}", method);
        if method == "command" {
            self.handle_command(args, reply);
            return;
        }
        let result = self.handle_sync(method, args);
        if let Err(e) = &result {
            debug!("[MediaPlayer] {} failed: {}", method, e);
        }
        reply(result);
    }

    fn handle_sync(&mut self, method: &str, args: &Value) -> Result<Value, HostError> {
        match method {
            "initialize" => {
                self.initialize()?;
                Ok(Value::Bool(true))
            }
            "dispose" => {
                self.dispose();
                Ok(Value::Null)
            }
            "isInitialized" => Ok(Value::Bool(self.is_initialized())),
            "setProperty" => {
                let engine = self.live_engine()?;
                let map = arg_map(args)?;
                engine.set_property(required_str(map, "name")?, required_str(map, "value")?);
                Ok(Value::Null)
            }
            "getProperty" => {
                self.live_engine()?;
                let name = required_str(arg_map(args)?, "name")?;
                Ok(self.get_property(name)?.map(Value::String).unwrap_or(Value::Null))
            }
            "observeProperty" => {
                self.live_engine()?;
                let map = arg_map(args)?;
                let name = required_str(map, "name")?;
                let format_name = required_str(map, "format")?;
                let format = PropertyFormat::parse(format_name)
                    .ok_or_else(|| BridgeError::InvalidArgument(format!("unknown format '{format_name}'")))?;
                self.observe_property(name, format, required_i64(map, "id")?)?;
                Ok(Value::Null)
            }
            "setLogLevel" => {
                self.live_engine()?;
                self.set_log_level(required_str(arg_map(args)?, "level")?)?;
                Ok(Value::Null)
            }
            "setVisible" => {
                let visible = required_bool(arg_map(args)?, "visible")?;
                self.set_visible(visible);
                Ok(Value::Null)
            }
            "setVideoRect" => {
                let map = arg_map(args)?;
                let rect = Rect::new(
                    int_or_zero(map, "left"),
                    int_or_zero(map, "top"),
                    int_or_zero(map, "right"),
                    int_or_zero(map, "bottom"),
                );
                self.set_video_rect(rect, f64_or(map, "devicePixelRatio", 1.0));
                Ok(Value::Null)
            }
            other => {
                warn!("[MediaPlayer] unknown method '{}'", other);
                Err(HostError::not_implemented(other))
            }
        }
    }

    fn handle_command(&self, args: &Value, reply: Responder) {
        let parsed = self.live_engine().and_then(|engine| {
            let command = required_string_list(arg_map(args)?, "args")?;
            if command.is_empty() {
                return Err(BridgeError::InvalidArgument("empty 'args' list".to_string()));
            }
            Ok((engine, command))
        });
        let (engine, command) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                reply(Err(e.into()));
                return;
            }
        };

        let name = command[0].clone();
        engine.command_async(
            command,
            Box::new(move |result| {
                let result = result.map(|()| Value::Null).map_err(|e| match e {
                    BridgeError::CommandFailure { code, message } => {
                        HostError::new("COMMAND_FAILED", format!("command '{name}' failed ({code}): {message}"))
                    }
                    other => HostError::from(other),
                });
                reply(result);
            }),
        );
    }
}

impl<O: VideoOutput> Drop for MediaPlayer<O> {
    fn drop(&mut self) {
        self.dispose();
    }
}
