//! The embedded engine seen through a narrow, thread-safe trait.
//!
//! [`Engine`] is what the rest of the crate talks to; [`libmpv`] implements it on
//! top of the dynamically loaded engine library. Error codes are the engine's own
//! negative integers, rendered to text with [`Engine::error_string`].

pub mod ffi;
pub mod libmpv;

use std::{ffi::c_void, sync::Arc};

use serde_json::{Map, Value};

use crate::{error::BridgeError, handles::WindowRef};

pub use libmpv::{LibMpvFactory, MpvLibrary};

/// Wakeup / update notification. Called from arbitrary engine threads, so the body
/// must only enqueue work and return.
pub type WakeupCallback = Arc<dyn Fn() + Send + Sync>;

/// Resolves GL entry points by name for the engine's render context.
pub type ProcAddressResolver = Arc<dyn Fn(&str) -> *const c_void + Send + Sync>;

/// Where the engine puts its pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceTarget {
    /// The engine renders through its render API into a host-provided GL context.
    RenderApi,
    /// The engine draws into its own native window.
    Window(WindowRef),
}

/// Value format requested when observing a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyFormat {
    String,
    Flag,
    Int64,
    Double,
    Node,
}

impl PropertyFormat {
    /// Accepts both the engine's names and the host's (`boolean`, `integer`, `float`, `structured`).
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "string" | "str" => Some(PropertyFormat::String),
            "flag" | "bool" | "boolean" => Some(PropertyFormat::Flag),
            "int64" | "int" | "integer" => Some(PropertyFormat::Int64),
            "double" | "float" => Some(PropertyFormat::Double),
            "node" | "structured" => Some(PropertyFormat::Node),
            _ => None,
        }
    }

    pub(crate) fn as_raw(self) -> ffi::mpv_format {
        match self {
            PropertyFormat::String => ffi::MPV_FORMAT_STRING,
            PropertyFormat::Flag => ffi::MPV_FORMAT_FLAG,
            PropertyFormat::Int64 => ffi::MPV_FORMAT_INT64,
            PropertyFormat::Double => ffi::MPV_FORMAT_DOUBLE,
            PropertyFormat::Node => ffi::MPV_FORMAT_NODE,
        }
    }
}

/// A property value as delivered by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineValue {
    None,
    String(String),
    Flag(bool),
    Int64(i64),
    Double(f64),
    List(Vec<EngineValue>),
    Map(Vec<(String, EngineValue)>),
}

impl EngineValue {
    pub fn to_json(&self) -> Value {
        match self {
            EngineValue::None => Value::Null,
            EngineValue::String(s) => Value::String(s.clone()),
            EngineValue::Flag(b) => Value::Bool(*b),
            EngineValue::Int64(i) => Value::from(*i),
            EngineValue::Double(d) => serde_json::Number::from_f64(*d)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            EngineValue::List(items) => Value::Array(items.iter().map(EngineValue::to_json).collect()),
            EngineValue::Map(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (key, value) in entries {
                    map.insert(key.clone(), value.to_json());
                }
                Value::Object(map)
            }
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EngineValue::Double(d) => Some(*d),
            EngineValue::Int64(i) => Some(*i as f64),
            EngineValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogMessage {
    pub prefix: String,
    pub level: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndFileReason {
    Eof,
    Stop,
    Quit,
    Error,
    Redirect,
    Unknown(i32),
}

impl EndFileReason {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            ffi::MPV_END_FILE_REASON_EOF => EndFileReason::Eof,
            ffi::MPV_END_FILE_REASON_STOP => EndFileReason::Stop,
            ffi::MPV_END_FILE_REASON_QUIT => EndFileReason::Quit,
            ffi::MPV_END_FILE_REASON_ERROR => EndFileReason::Error,
            ffi::MPV_END_FILE_REASON_REDIRECT => EndFileReason::Redirect,
            other => EndFileReason::Unknown(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            EndFileReason::Eof => ffi::MPV_END_FILE_REASON_EOF,
            EndFileReason::Stop => ffi::MPV_END_FILE_REASON_STOP,
            EndFileReason::Quit => ffi::MPV_END_FILE_REASON_QUIT,
            EndFileReason::Error => ffi::MPV_END_FILE_REASON_ERROR,
            EndFileReason::Redirect => ffi::MPV_END_FILE_REASON_REDIRECT,
            EndFileReason::Unknown(raw) => raw,
        }
    }
}

/// One event popped from the engine queue.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Shutdown,
    LogMessage(LogMessage),
    PropertyChange { reply_id: u64, name: String, value: EngineValue },
    CommandReply { reply_id: u64, error: i32 },
    EndFile { reason: EndFileReason, error: i32 },
    FileLoaded,
    PlaybackRestart,
    Seek,
    /// Anything the bridge does not translate, by raw event id.
    Other(i32),
}

/// Thread-safe engine instance. Dropping it terminates and frees the engine.
pub trait Engine: Send + Sync {
    fn set_option(&self, name: &str, value: &str) -> Result<(), i32>;
    fn initialize(&self) -> Result<(), i32>;
    fn request_log_messages(&self, level: &str) -> Result<(), i32>;
    fn command(&self, args: &[String]) -> Result<(), i32>;
    fn command_async(&self, reply_id: u64, args: &[String]) -> Result<(), i32>;
    fn set_property(&self, name: &str, value: &str) -> Result<(), i32>;
    /// `None` when the property is unavailable.
    fn get_property(&self, name: &str) -> Option<String>;
    fn observe_property(&self, reply_id: u64, name: &str, format: PropertyFormat) -> Result<(), i32>;
    /// Pops one queued event without blocking.
    fn poll_event(&self) -> Option<EngineEvent>;
    /// Installs or removes the wakeup callback. After `None` returns, the previous
    /// callback is never invoked again.
    fn set_wakeup_callback(&self, callback: Option<WakeupCallback>);
    /// Creates the GL render context. Must be called with the target GL context current.
    fn create_render_context(&self, resolver: ProcAddressResolver) -> Result<Box<dyn RenderContext>, i32>;
    fn error_string(&self, code: i32) -> String;
}

/// The engine's GL renderer. Dropping it frees the render context, which must
/// happen with the same GL context current it was created under.
pub trait RenderContext: Send {
    fn set_update_callback(&mut self, callback: Option<WakeupCallback>);
    /// Renders the current frame into framebuffer `fbo`.
    fn render(&mut self, fbo: u32, width: i32, height: i32, flip_y: bool) -> Result<(), i32>;
}

/// Creates fresh engine instances; one per `initialize` attempt.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Engine>, BridgeError>;
}
