//! Caller Helpers for Host Functions
//!
//! Handle lookup, receiver checks and result encoding shared by every group
//! of the capability surface.
//!
//! All functions are generic over `WasmStateCore` to work with any runtime.

use super::state::WasmStateCore;
use crate::closure::{self, ClosureToken};
use crate::codec::{guest_malloc, read_string, write_bytes, write_deferred_slot};
use crate::error::{BridgeError, BridgeResult};
use crate::exception::{handle_error, Sentinel};
use crate::table::HANDLE_ABSENT;
use crate::value::{HostException, HostValue, ObjectRef};
use wasmtime::Caller;

/// Import module every thunk is registered under
pub const IMPORT_MODULE: &str = "wbg";

/// Value behind a guest handle; unknown handles read as `undefined`
pub fn value<S: WasmStateCore>(caller: &Caller<'_, S>, idx: u32) -> HostValue {
    caller.data().bridge().table.get_or_undefined(idx)
}

/// Receiver object for `Interface.member`
pub fn object<S: WasmStateCore>(
    caller: &Caller<'_, S>,
    idx: u32,
    interface: &str,
    member: &str,
) -> BridgeResult<ObjectRef> {
    match value(caller, idx) {
        HostValue::Object(obj) => Ok(obj),
        _ => Err(HostException::illegal_invocation(interface, member).into()),
    }
}

/// Object or nothing (`null`/`undefined` and absent handles)
pub fn optional_object<S: WasmStateCore>(caller: &Caller<'_, S>, idx: u32) -> Option<ObjectRef> {
    value(caller, idx).as_object().cloned()
}

/// Narrow a receiver to one capability view
pub fn require<'a, T: ?Sized + 'a>(
    obj: &'a ObjectRef,
    view: impl FnOnce(&'a ObjectRef) -> Option<&'a T>,
    interface: &str,
    member: &str,
) -> BridgeResult<&'a T> {
    view(obj).ok_or_else(|| HostException::illegal_invocation(interface, member).into())
}

/// A callable argument (guest closure)
pub fn callback<S: WasmStateCore>(
    caller: &Caller<'_, S>,
    idx: u32,
    member: &str,
) -> BridgeResult<ObjectRef> {
    let value = value(caller, idx);
    match value.as_object() {
        Some(obj) if obj.as_closure().is_some() => Ok(obj.clone()),
        _ => Err(HostException::type_error(format!(
            "{}: parameter is not of type 'Function'",
            member
        ))
        .into()),
    }
}

/// Closure argument the host keeps past the call; the token goes back to
/// `closure::release` when the host is done with it
pub fn retained<S: WasmStateCore>(
    caller: &Caller<'_, S>,
    idx: u32,
    member: &str,
) -> BridgeResult<ClosureToken> {
    closure::retain(&callback(caller, idx, member)?)
}

/// Store a value and return its handle
pub fn alloc<S: WasmStateCore>(caller: &mut Caller<'_, S>, value: impl Into<HostValue>) -> u32 {
    caller.data_mut().bridge_mut().table.alloc(value.into())
}

/// Store an optional object; `None` is handle 0
pub fn alloc_optional<S: WasmStateCore>(caller: &mut Caller<'_, S>, obj: Option<ObjectRef>) -> u32 {
    match obj {
        Some(obj) => alloc(caller, obj),
        None => HANDLE_ABSENT,
    }
}

/// Decode a borrowed guest string argument
pub fn string_arg<S: WasmStateCore>(
    caller: &mut Caller<'_, S>,
    ptr: u32,
    len: u32,
) -> BridgeResult<String> {
    read_string(caller, ptr, len)
}

/// Copy `data` into a fresh guest allocation and publish it through the
/// `(ptr, count)` slot at `slot`
pub fn write_deferred_bytes<S: WasmStateCore>(
    caller: &mut Caller<'_, S>,
    slot: u32,
    data: &[u8],
    element_size: u32,
) -> BridgeResult<()> {
    let ptr = guest_malloc(&mut *caller, data.len() as u32, element_size)?;
    write_bytes(&mut *caller, ptr, data)?;
    write_deferred_slot(caller, slot, ptr, data.len() as u32 / element_size)
}

/// Run a throwing host operation through the exception bridge
pub fn handled<S, R>(
    caller: &mut Caller<'_, S>,
    operation: &str,
    f: impl FnOnce(&mut Caller<'_, S>) -> BridgeResult<R>,
) -> wasmtime::Result<R>
where
    S: WasmStateCore,
    R: Sentinel,
{
    let result = f(caller);
    handle_error(caller, operation, result)
}

/// Turn a host result into a settled promise handle
pub fn settle<S: WasmStateCore>(
    caller: &mut Caller<'_, S>,
    result: Result<HostValue, HostException>,
) -> u32 {
    let event_loop = &mut caller.data_mut().bridge_mut().event_loop;
    let promise = match result {
        Ok(value) => event_loop.resolved(value),
        Err(exception) => event_loop.rejected(exception),
    };
    alloc(caller, promise)
}

/// Interpret an `f64` argument as a byte offset or size
pub fn byte_count(value: f64, what: &str) -> BridgeResult<u64> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
        Ok(value as u64)
    } else {
        Err(BridgeError::HostOperation(HostException::type_error(format!(
            "{} ({}) is not a valid unsigned size",
            what, value
        ))))
    }
}

pub fn flag(value: bool) -> u32 {
    u32::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_count_rejects_fractions_and_negatives() {
        assert_eq!(byte_count(16.0, "size").unwrap(), 16);
        assert!(byte_count(-1.0, "size").is_err());
        assert!(byte_count(1.5, "offset").is_err());
        assert!(byte_count(f64::NAN, "size").is_err());
    }

    #[test]
    fn test_require_names_the_member() {
        let obj = ObjectRef::new(crate::value::PlainObject::new());
        let err = require(&obj, |o| o.as_window(), "Window", "innerWidth").unwrap_err();
        match err {
            BridgeError::HostOperation(e) => {
                assert_eq!(e.name, "TypeError");
                assert!(e.message.contains("innerWidth"));
            }
            other => panic!("unexpected {other}"),
        }
    }
}
