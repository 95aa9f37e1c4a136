use serde::Serialize;
use serde_json::{Value, json};

use crate::engine::{EndFileReason, EngineEvent};

/// Record delivered on the host's one-way event stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostEvent {
    Event {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Property {
        name: String,
        value: Value,
    },
}

impl HostEvent {
    pub fn event(name: &str, data: Option<Value>) -> Self {
        HostEvent::Event { name: name.to_string(), data }
    }

    pub fn property(name: &str, value: Value) -> Self {
        HostEvent::Property { name: name.to_string(), value }
    }

    pub fn name(&self) -> &str {
        match self {
            HostEvent::Event { name, .. } | HostEvent::Property { name, .. } => name,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// The host's event stream. Only ever invoked on the UI thread.
pub trait EventSink: Send + Sync {
    fn send(&self, event: HostEvent);
}

impl<F> EventSink for F
where
    F: Fn(HostEvent) + Send + Sync,
{
    fn send(&self, event: HostEvent) {
        self(event)
    }
}

/// Host record for a drained engine event, if it has one. Command replies and
/// shutdown are handled by the bridge itself.
pub(crate) fn host_event_for(event: &EngineEvent) -> Option<HostEvent> {
    match event {
        EngineEvent::LogMessage(msg) => Some(HostEvent::event(
            "log-message",
            Some(json!({ "prefix": msg.prefix, "level": msg.level, "text": msg.text })),
        )),
        EngineEvent::PropertyChange { name, value, .. } => Some(HostEvent::property(name, value.to_json())),
        EngineEvent::EndFile { reason, error } => {
            let data = if *reason == EndFileReason::Error {
                json!({ "reason": reason.code(), "error": error })
            } else {
                json!({ "reason": reason.code() })
            };
            Some(HostEvent::event("end-file", Some(data)))
        }
        EngineEvent::FileLoaded => Some(HostEvent::event("file-loaded", None)),
        EngineEvent::PlaybackRestart => Some(HostEvent::event("playback-restart", None)),
        EngineEvent::Seek => Some(HostEvent::event("seek", None)),
        EngineEvent::Shutdown | EngineEvent::CommandReply { .. } | EngineEvent::Other(_) => None,
    }
}
