//! Exception/Trap Bridge
//!
//! WebAssembly has no exceptions the host can throw into, so host failures
//! are turned into values:
//!
//! 1. A thunk wrapped with [`handle_error`] catches the [`HostException`].
//! 2. The exception object is stored in the reference table and its handle
//!    recorded in the last-exception register (and forwarded to the guest's
//!    `__wbindgen_exn_store` export when it has one).
//! 3. The thunk returns a sentinel (`0`, `NaN` or nothing).
//! 4. The guest checks `__wbindgen_exn_take()` and either handles the error
//!    or re-raises it with `__wbindgen_rethrow(handle)`, which traps with
//!    the original exception attached.
//!
//! `__wbindgen_throw(ptr, len)` is the guest-originated direction: the
//! message becomes a trap that surfaces at the entry point the host called.

use crate::error::BridgeError;
use crate::value::{HostException, HostValue};
use crate::wasm_linker::WasmStateCore;
use tracing::{debug, error, warn};
use wasmtime::AsContextMut;

/// Value a handled thunk returns when the host operation failed
pub trait Sentinel {
    fn sentinel() -> Self;
}

impl Sentinel for () {
    fn sentinel() -> Self {}
}

impl Sentinel for i32 {
    fn sentinel() -> Self {
        0
    }
}

impl Sentinel for u32 {
    fn sentinel() -> Self {
        0
    }
}

impl Sentinel for f32 {
    fn sentinel() -> Self {
        f32::NAN
    }
}

impl Sentinel for f64 {
    fn sentinel() -> Self {
        f64::NAN
    }
}

/// Route the result of a throwing host operation.
///
/// Host exceptions (and undecodable guest strings) become a stored exception
/// plus the sentinel; anything else is a trap.
pub fn handle_error<S, R>(
    mut ctx: impl AsContextMut<Data = S>,
    operation: &str,
    result: Result<R, BridgeError>,
) -> wasmtime::Result<R>
where
    S: WasmStateCore,
    R: Sentinel,
{
    let exception = match result {
        Ok(value) => return Ok(value),
        Err(BridgeError::HostOperation(exception)) => exception,
        Err(err @ BridgeError::Decode { .. }) => HostException::type_error(err.to_string()),
        Err(other) => {
            error!("{}: bridge failure: {}", operation, other);
            return Err(wasmtime::Error::new(other));
        }
    };

    error!("{} threw {}", operation, exception);
    store_exception(&mut ctx, exception)?;
    Ok(R::sentinel())
}

/// Put an exception into the reference table and publish its handle
pub fn store_exception<S: WasmStateCore>(
    mut ctx: impl AsContextMut<Data = S>,
    exception: HostException,
) -> wasmtime::Result<u32> {
    let mut store = ctx.as_context_mut();
    let bridge = store.data_mut().bridge_mut();
    let handle = bridge.table.alloc(HostValue::object(exception));
    bridge.set_last_exception(handle);
    let exn_store = bridge.exports().ok().and_then(|e| e.exn_store.clone());

    if let Some(exn_store) = exn_store {
        exn_store.call(&mut store, handle)?;
    }
    debug!("exception stored at handle {}", handle);
    Ok(handle)
}

/// Convert whatever the guest rethrows back into a host exception
pub fn exception_from_value(value: &HostValue) -> HostException {
    match value {
        HostValue::Object(obj) => match obj.as_exception() {
            Some(exception) => exception.clone(),
            None => HostException::error(crate::value::debug_string(value)),
        },
        HostValue::String(message) => HostException::error(message.clone()),
        other => HostException::error(crate::value::debug_string(other)),
    }
}

/// `__wbindgen_rethrow`: take the value at `handle` and trap with it
pub fn rethrow<S: WasmStateCore>(
    mut ctx: impl AsContextMut<Data = S>,
    handle: u32,
) -> wasmtime::Error {
    let mut store = ctx.as_context_mut();
    let bridge = store.data_mut().bridge_mut();
    let value = bridge.table.get_or_undefined(handle);
    bridge.table.free(handle);
    let exception = exception_from_value(&value);
    warn!("guest rethrew {}", exception);
    wasmtime::Error::new(exception)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PlainObject;

    #[test]
    fn test_sentinels() {
        assert_eq!(<i32 as Sentinel>::sentinel(), 0);
        assert_eq!(<u32 as Sentinel>::sentinel(), 0);
        assert!(<f64 as Sentinel>::sentinel().is_nan());
        assert!(<f32 as Sentinel>::sentinel().is_nan());
    }

    #[test]
    fn test_exception_from_value() {
        let err = HostValue::object(HostException::range_error("too big"));
        assert_eq!(exception_from_value(&err), HostException::range_error("too big"));

        let msg = exception_from_value(&HostValue::string("plain"));
        assert_eq!(msg.name, "Error");
        assert_eq!(msg.message, "plain");

        let obj = exception_from_value(&HostValue::object(PlainObject::new().with("x", 1.0)));
        assert_eq!(obj.message, r#"Object({"x":1.0})"#);
    }

    #[test]
    fn test_thrown_type_error_round_trips_through_the_guest() {
        let engine = wasmtime::Engine::default();
        let mut store = wasmtime::Store::new(&engine, crate::wasm_linker::WasmState::default());

        let boom: Result<u32, BridgeError> = Err(HostException::type_error("boom").into());
        let sentinel = handle_error(&mut store, "op", boom).unwrap();
        assert_eq!(sentinel, 0);

        let handle = store.data_mut().bridge.take_last_exception().unwrap();
        assert!(store.data_mut().bridge.take_last_exception().is_none());

        let trap = rethrow(&mut store, handle);
        assert!(store.data().bridge.table.get(handle).is_none());
        match BridgeError::from_trap(trap) {
            BridgeError::HostOperation(exception) => {
                assert_eq!(exception.name, "TypeError");
                assert_eq!(exception.message, "boom");
            }
            other => panic!("expected a host exception, got {:?}", other),
        }
    }

    #[test]
    fn test_float_operations_return_nan() {
        let engine = wasmtime::Engine::default();
        let mut store = wasmtime::Store::new(&engine, crate::wasm_linker::WasmState::default());

        let failed: Result<f64, BridgeError> = Err(HostException::range_error("out of range").into());
        assert!(handle_error(&mut store, "op", failed).unwrap().is_nan());
    }

    #[test]
    fn test_non_host_failures_trap() {
        let engine = wasmtime::Engine::default();
        let mut store = wasmtime::Store::new(&engine, crate::wasm_linker::WasmState::default());

        let failed: Result<u32, BridgeError> = Err(BridgeError::memory("out of bounds"));
        assert!(handle_error(&mut store, "op", failed).is_err());
        assert!(store.data_mut().bridge.take_last_exception().is_none());
    }
}
