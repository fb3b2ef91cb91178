//! Error types for host-bridge
//!
//! Provides error types used throughout the host-bridge crate.

use crate::value::HostException;
use thiserror::Error;

/// Bridge error type
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Bytes crossing the boundary were not valid UTF-8
    #[error("Decode error: {len} bytes at {ptr} are not valid UTF-8: {source}")]
    Decode {
        ptr: u32,
        len: u32,
        #[source]
        source: std::str::Utf8Error,
    },

    /// The guest allocator could not satisfy a request
    #[error("Allocation failure: guest allocator returned {ptr} for {size} bytes (align {align})")]
    AllocationFailure { size: u32, align: u32, ptr: i32 },

    /// A bound host capability raised an exception
    #[error("Host operation failed: {0}")]
    HostOperation(HostException),

    /// The guest reported an error through the throw operation
    #[error("Guest error: {0}")]
    GuestThrow(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Missing guest export: {0}")]
    MissingExport(String),

    #[error("Closure error: {0}")]
    Closure(String),

    #[error("Wasmtime error: {0}")]
    Wasmtime(#[from] wasmtime::Error),
}

impl BridgeError {
    pub fn memory(message: impl Into<String>) -> Self {
        Self::Memory(message.into())
    }

    pub fn closure(message: impl Into<String>) -> Self {
        Self::Closure(message.into())
    }

    /// Recover a bridge error (or host exception) from a wasmtime trap.
    ///
    /// Host functions return `wasmtime::Result`, so errors raised by the
    /// bridge come back out of guest calls wrapped in `anyhow` context.
    pub fn from_trap(err: wasmtime::Error) -> Self {
        if let Some(exception) = err.downcast_ref::<HostException>() {
            return Self::HostOperation(exception.clone());
        }
        match err.downcast::<BridgeError>() {
            Ok(bridge) => bridge,
            Err(other) => Self::Wasmtime(other),
        }
    }

    /// Message payload surfaced to the host caller.
    pub fn message(&self) -> String {
        match self {
            Self::HostOperation(exception) => exception.message.clone(),
            Self::GuestThrow(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<HostException> for BridgeError {
    fn from(exception: HostException) -> Self {
        Self::HostOperation(exception)
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_roundtrip_keeps_host_exception() {
        let exception = HostException::type_error("boom");
        let trap = wasmtime::Error::new(exception).context("wasm backtrace");
        let err = BridgeError::from_trap(trap);
        match err {
            BridgeError::HostOperation(e) => {
                assert_eq!(e.name, "TypeError");
                assert_eq!(e.message, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_trap_roundtrip_keeps_guest_throw() {
        let trap = wasmtime::Error::new(BridgeError::GuestThrow("unreachable reached".into()));
        let err = BridgeError::from_trap(trap);
        assert!(matches!(err, BridgeError::GuestThrow(ref m) if m == "unreachable reached"));
        assert_eq!(err.message(), "unreachable reached");
    }
}
