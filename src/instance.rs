//! Guest Instance
//!
//! A live guest bound to the bridge: its store (carrying the
//! [`BridgeContext`]), the wasmtime instance and the compiled module. All
//! host → guest traffic after initialisation goes through here: entry-point
//! calls with trap translation, string-carrying calls, and driving the
//! bridge's event loop.

use crate::bridge::check_imports;
use crate::config::BridgeConfig;
use crate::error::{RuntimeError, RuntimeResult};
use host_bridge::capability::Console;
use host_bridge::closure::FinalizationWatch;
use host_bridge::codec::{guest_free, guest_malloc, pass_string, read_deferred_slot, read_string, take_vector_len, DEFERRED_SLOT_SIZE};
use host_bridge::event_loop::{self, LoopStats};
use host_bridge::{BridgeContext, GuestExports, ObjectRef, Platform, WasmStateCore};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use wasmtime::{Engine, Instance, Linker, Module, Store, WasmParams, WasmResults};

/// State held by the guest's store
#[derive(Default)]
pub struct GuestState {
    pub bridge: BridgeContext,
    /// Last error (for error reporting)
    pub last_error: Option<String>,
    /// Times the start export ran
    start_calls: u32,
}

impl GuestState {
    pub fn new(bridge: BridgeContext) -> Self {
        Self {
            bridge,
            last_error: None,
            start_calls: 0,
        }
    }
}

impl WasmStateCore for GuestState {
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

/// Guest module instance ready for execution
pub struct GuestInstance {
    store: Store<GuestState>,
    instance: Instance,
    module: Module,
}

impl GuestInstance {
    /// Instantiate `module` against the bridge surface and bind its exports.
    ///
    /// The start export is not run here; see [`GuestInstance::start`].
    pub fn instantiate(
        engine: &Engine,
        linker: &Linker<GuestState>,
        module: Module,
        config: &BridgeConfig,
        console: Option<Arc<dyn Console>>,
    ) -> RuntimeResult<Self> {
        let mut platform = Platform::headless(config.platform.clone());
        if let Some(console) = console {
            platform = platform.with_console(console);
        }
        let bridge = BridgeContext::new(platform).with_export_names(config.exports.clone());
        let mut store = Store::new(engine, GuestState::new(bridge));

        check_imports(linker, &mut store, &module)?;

        let instance = linker.instantiate(&mut store, &module).map_err(|e| {
            RuntimeError::instantiation_with_source("Failed to instantiate guest module", e)
        })?;

        let exports = GuestExports::bind(&mut store, &instance, &config.exports)
            .map_err(|e| RuntimeError::instantiation(format!("Guest export contract not met: {}", e)))?;
        store.data_mut().bridge.attach(exports);

        debug!("guest instantiated with {} exports", module.exports().len());
        Ok(Self {
            store,
            instance,
            module,
        })
    }

    /// Run the start export. Only the first call does anything.
    pub fn start(&mut self) -> RuntimeResult<()> {
        if self.store.data().start_calls > 0 {
            debug!("start export already ran");
            return Ok(());
        }
        self.store.data_mut().start_calls += 1;

        let start = self.store.data().bridge.exports()?.start.clone();
        match start {
            Some(start) => {
                let name = self.store.data().bridge.export_names().start.clone();
                info!("Calling guest start export: {}", name);
                start
                    .call(&mut self.store, ())
                    .map_err(|e| RuntimeError::guest_call(name, e))?;
                event_loop::run_microtasks(&mut self.store)?;
            }
            None => debug!("guest has no start export"),
        }
        Ok(())
    }

    /// Times the start export ran (0 or 1)
    pub fn start_calls(&self) -> u32 {
        self.store.data().start_calls
    }

    /// Call an exported entry point; microtasks queued by the call run
    /// before this returns.
    pub fn call_typed<P, R>(&mut self, entry: &str, params: P) -> RuntimeResult<R>
    where
        P: WasmParams,
        R: WasmResults,
    {
        let func = self
            .instance
            .get_typed_func::<P, R>(&mut self.store, entry)
            .map_err(|e| RuntimeError::guest_call(entry, e))?;
        debug!("Calling guest entry point: {}", entry);
        let result = func
            .call(&mut self.store, params)
            .map_err(|e| RuntimeError::guest_call(entry, e))?;
        event_loop::run_microtasks(&mut self.store)
            .map_err(|e| RuntimeError::GuestCall { entry: entry.to_string(), source: e })?;
        Ok(result)
    }

    /// Call a `() -> ()` entry point
    pub fn call(&mut self, entry: &str) -> RuntimeResult<()> {
        self.call_typed::<(), ()>(entry, ())
    }

    /// Call an `(ptr, len) -> ()` entry point with a string argument.
    ///
    /// The guest owns the string once the call starts.
    pub fn call_with_str(&mut self, entry: &str, input: &str) -> RuntimeResult<()> {
        let ptr = pass_string(&mut self.store, input)?;
        let len = take_vector_len(&mut self.store)?;
        self.call_typed::<(u32, u32), ()>(entry, (ptr, len))
    }

    /// Call a `(ret, ptr, len) -> ()` entry point that answers with a string
    /// through the deferred slot at `ret`
    pub fn call_str_to_str(&mut self, entry: &str, input: &str) -> RuntimeResult<String> {
        let slot = guest_malloc(&mut self.store, DEFERRED_SLOT_SIZE, 4)?;
        let ptr = pass_string(&mut self.store, input)?;
        let len = take_vector_len(&mut self.store)?;

        let called = self.call_typed::<(u32, u32, u32), ()>(entry, (slot, ptr, len));
        let answer = called.and_then(|()| {
            let (out_ptr, out_len) = read_deferred_slot(&mut self.store, slot)?;
            let text = read_string(&mut self.store, out_ptr, out_len);
            guest_free(&mut self.store, out_ptr, out_len, 1)?;
            Ok(text?)
        });
        guest_free(&mut self.store, slot, DEFERRED_SLOT_SIZE, 4)?;
        answer
    }

    /// Advance the virtual clock, firing due timers
    pub fn advance(&mut self, ms: f64) -> RuntimeResult<usize> {
        Ok(event_loop::advance(&mut self.store, ms)?)
    }

    /// Run one animation frame
    pub fn animation_frame(&mut self) -> RuntimeResult<usize> {
        Ok(event_loop::animation_frame(&mut self.store)?)
    }

    /// Run timers and microtasks due within `horizon_ms`
    pub fn run_until_idle(&mut self, horizon_ms: f64) -> RuntimeResult<usize> {
        Ok(event_loop::run_until_idle(&mut self.store, horizon_ms)?)
    }

    /// Deliver a host event to the listeners registered on `target`.
    /// Returns whether a listener called `preventDefault`.
    pub fn dispatch_event(&mut self, target: &ObjectRef, event: &ObjectRef) -> RuntimeResult<bool> {
        Ok(event_loop::dispatch_event(&mut self.store, target, event)?)
    }

    /// Finalise closures the host dropped without releasing
    pub fn sweep_closures(&mut self) -> RuntimeResult<usize> {
        Ok(FinalizationWatch::sweep(&mut self.store)?)
    }

    pub fn loop_stats(&self) -> LoopStats {
        self.store.data().bridge.event_loop.stats()
    }

    /// The platform's global window object
    pub fn window(&self) -> ObjectRef {
        self.store.data().bridge.platform().window().clone()
    }

    pub fn bridge(&self) -> &BridgeContext {
        &self.store.data().bridge
    }

    pub fn bridge_mut(&mut self) -> &mut BridgeContext {
        &mut self.store.data_mut().bridge
    }

    pub fn store_mut(&mut self) -> &mut Store<GuestState> {
        &mut self.store
    }

    /// Get export names (for debugging)
    pub fn export_names(&self) -> Vec<String> {
        self.module.exports().map(|e| e.name().to_string()).collect()
    }

    /// Check if an export exists
    pub fn has_export(&self, name: &str) -> bool {
        self.module.exports().any(|e| e.name() == name)
    }
}

impl fmt::Debug for GuestInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestInstance")
            .field("exports", &self.export_names())
            .field("start_calls", &self.start_calls())
            .field("event_loop", &self.loop_stats())
            .finish_non_exhaustive()
    }
}

/// Guest instance shared across the process; the lock serialises every
/// host → guest call
pub type SharedGuestInstance = Arc<Mutex<GuestInstance>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_state_error_slot() {
        let mut state = GuestState::default();
        assert!(state.last_error().is_none());
        state.set_error("guest panicked".to_string());
        assert_eq!(state.last_error(), Some("guest panicked"));
        assert_eq!(state.start_calls, 0);
    }
}
