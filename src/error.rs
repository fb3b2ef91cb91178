//! Error types for guest-bridge
//!
//! Provides structured error handling across loading, instantiation and
//! guest calls.

use host_bridge::{BridgeError, HostException};
use thiserror::Error;

/// Main error type for the guest runtime
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Module bytes could not be obtained
    #[error("Fetch error: {message}")]
    Fetch { message: String },

    /// Malformed module, import/export mismatch or failed start routine
    #[error("Instantiation failed: {message}")]
    Instantiation {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// A previous initialisation failed; the loader does not retry
    #[error("Loader failed earlier: {message}")]
    Failed { message: String },

    /// An exported entry point trapped or threw
    #[error("Guest call `{entry}` failed: {source}")]
    GuestCall {
        entry: String,
        #[source]
        source: BridgeError,
    },

    /// Error raised by the bridge outside a guest call
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {message}")]
    WithContext { context: String, message: String },
}

impl RuntimeError {
    /// Create a fetch error
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
        }
    }

    /// Create an instantiation error
    pub fn instantiation(message: impl Into<String>) -> Self {
        Self::Instantiation {
            message: message.into(),
            source: None,
        }
    }

    /// Create an instantiation error with source
    pub fn instantiation_with_source(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Instantiation {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a guest call error, recovering bridge errors carried by traps
    pub fn guest_call(entry: impl Into<String>, trap: wasmtime::Error) -> Self {
        Self::GuestCall {
            entry: entry.into(),
            source: BridgeError::from_trap(trap),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            message: self.to_string(),
        }
    }

    /// Host exception behind a failed guest call, if that is what failed
    pub fn host_exception(&self) -> Option<&HostException> {
        match self {
            Self::GuestCall {
                source: BridgeError::HostOperation(exception),
                ..
            }
            | Self::Bridge(BridgeError::HostOperation(exception)) => Some(exception),
            _ => None,
        }
    }

    /// Message payload as the guest or host reported it
    pub fn message(&self) -> String {
        match self {
            Self::GuestCall { source, .. } | Self::Bridge(source) => source.message(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RuntimeError::instantiation("unknown import wbg::__wbg_missing");
        assert!(err.to_string().contains("__wbg_missing"));

        let err = RuntimeError::fetch("file:///nowhere.wasm not found");
        assert!(err.to_string().starts_with("Fetch error"));

        let err = RuntimeError::config("bad base url").with_context("loading config");
        assert_eq!(err.to_string(), "loading config: Configuration error: bad base url");
    }

    #[test]
    fn test_guest_call_keeps_host_exception() {
        let trap = wasmtime::Error::new(HostException::type_error("boom"));
        let err = RuntimeError::guest_call("run", trap);

        let exception = err.host_exception().expect("host exception");
        assert_eq!(exception.name, "TypeError");
        assert_eq!(err.message(), "boom");
        assert!(err.to_string().contains("`run`"));
    }

    #[test]
    fn test_guest_throw_message_is_preserved() {
        let trap = wasmtime::Error::new(BridgeError::GuestThrow("panicked at lib.rs:3".into()));
        let err = RuntimeError::guest_call("main", trap);
        assert!(err.host_exception().is_none());
        assert_eq!(err.message(), "panicked at lib.rs:3");
    }
}
