//! WASM State Management
//!
//! Defines the state held by each WASM store instance and the core trait
//! that allows host functions to work with any compatible state type.

use crate::context::BridgeContext;
use crate::platform::Platform;

// ============================================================================
// CORE TRAIT - Implement this to use host-bridge functions with any state
// ============================================================================

/// Core trait that any WASM state must implement to use host-bridge functions.
///
/// This allows different runtimes (CLI, embedded, tests) to use the same
/// capability surface while carrying their own extended state.
///
/// # Example
///
/// ```ignore
/// struct MyRuntimeState {
///     bridge: BridgeContext,
///     frames: u64,  // Runtime-specific
/// }
///
/// impl WasmStateCore for MyRuntimeState {
///     fn bridge(&self) -> &BridgeContext { &self.bridge }
///     fn bridge_mut(&mut self) -> &mut BridgeContext { &mut self.bridge }
/// }
/// ```
pub trait WasmStateCore: Send + 'static {
    /// Get immutable reference to the bridge context
    fn bridge(&self) -> &BridgeContext;

    /// Get mutable reference to the bridge context
    fn bridge_mut(&mut self) -> &mut BridgeContext;

    /// Set last error message
    fn set_error(&mut self, _error: String) {
        // Default implementation does nothing
    }

    /// Get last error message
    fn last_error(&self) -> Option<&str> {
        None
    }
}

/// State held by each WASM store instance
#[derive(Default)]
pub struct WasmState {
    pub bridge: BridgeContext,
    /// Last error (for error reporting)
    pub last_error: Option<String>,
}

impl WasmState {
    pub fn new(platform: Platform) -> Self {
        Self {
            bridge: BridgeContext::new(platform),
            last_error: None,
        }
    }
}

impl WasmStateCore for WasmState {
    fn bridge(&self) -> &BridgeContext {
        &self.bridge
    }

    fn bridge_mut(&mut self) -> &mut BridgeContext {
        &mut self.bridge
    }

    fn set_error(&mut self, error: String) {
        self.last_error = Some(error);
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wasm_state_error_slot() {
        let mut state = WasmState::default();
        assert!(state.last_error().is_none());
        state.set_error("guest trapped".to_string());
        assert_eq!(state.last_error(), Some("guest trapped"));
        assert!(!state.bridge().is_attached());
    }
}
