use thiserror::Error;

/// Errors surfaced by the bridge to its callers.
///
/// Each variant carries a stable host error code (see [`BridgeError::code`])
/// so the host's RPC layer can forward failures as `(code, message)` pairs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// Engine or GPU-context creation failed. Fatal for the session; a later
    /// `initialize` may be retried.
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// Operation attempted before init or after dispose.
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// Malformed request from the host.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine rejected a command.
    #[error("command failed ({code}): {message}")]
    CommandFailure { code: i32, message: String },

    /// Shared-image or texture allocation failed; the frame is dropped.
    #[error("resource bridge failure: {0}")]
    ResourceBridge(String),

    /// The session was disposed while the operation was outstanding.
    #[error("disposed: {0}")]
    Disposed(String),

    /// A best-effort native window-manager call failed.
    #[error("window manager call failed: {0}")]
    Platform(String),
}

impl BridgeError {
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Initialization(_) => "INIT_FAILED",
            BridgeError::NotInitialized(_) => "NOT_INITIALIZED",
            BridgeError::InvalidArgument(_) => "INVALID_ARGS",
            BridgeError::CommandFailure { .. } => "COMMAND_FAILED",
            BridgeError::ResourceBridge(_) => "RESOURCE_BRIDGE_FAILED",
            BridgeError::Disposed(_) => "DISPOSED",
            BridgeError::Platform(_) => "PLATFORM_FAILED",
        }
    }

    pub(crate) fn not_initialized() -> Self {
        BridgeError::NotInitialized("engine not initialized".to_string())
    }
}

impl From<anyhow::Error> for BridgeError {
    fn from(err: anyhow::Error) -> Self {
        BridgeError::Initialization(format!("{err:#}"))
    }
}
