//! Bridge Intrinsics
//!
//! The `__wbindgen_*` imports every guest needs regardless of which host
//! APIs it binds: reference-table maintenance, value constructors and
//! type checks, closures and the exception channel.

use super::helpers::{alloc, flag, string_arg, value, IMPORT_MODULE};
use super::state::WasmStateCore;
use crate::closure::{self, GuestClosure};
use crate::codec::{write_deferred_string, write_number_out, write_optional_string, BoolTriState};
use crate::error::{BridgeError, BridgeResult};
use crate::exception::rethrow;
use crate::table::HANDLE_ABSENT;
use crate::value::{debug_string, HostValue};
use tracing::{debug, error, trace};
use wasmtime::{Caller, Linker};

/// Register all intrinsic functions with the linker
pub fn register_functions<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    // =========================================
    // REFERENCE TABLE
    // =========================================

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_init_externref_table",
        |mut caller: Caller<'_, S>| {
            caller.data_mut().bridge_mut().table.init();
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_object_drop_ref",
        |mut caller: Caller<'_, S>, idx: u32| {
            caller.data_mut().bridge_mut().table.free(idx);
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_object_clone_ref",
        |mut caller: Caller<'_, S>, idx: u32| -> u32 {
            caller.data_mut().bridge_mut().table.clone_ref(idx)
        },
    )?;

    // =========================================
    // CONSTRUCTORS AND PROBES
    // =========================================

    // Undecodable bytes trap: the guest handed over a malformed string.
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_string_new",
        |mut caller: Caller<'_, S>, ptr: u32, len: u32| -> wasmtime::Result<u32> {
            let s = string_arg(&mut caller, ptr, len)?;
            Ok(alloc(&mut caller, s))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_number_new",
        |mut caller: Caller<'_, S>, n: f64| -> u32 { alloc(&mut caller, n) },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_number_get",
        |mut caller: Caller<'_, S>, ret: u32, idx: u32| -> wasmtime::Result<()> {
            let n = value(&caller, idx).as_number();
            write_number_out(&mut caller, ret, n)?;
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_boolean_get",
        |caller: Caller<'_, S>, idx: u32| -> u32 { BoolTriState::from(&value(&caller, idx)) as u32 },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_string_get",
        |mut caller: Caller<'_, S>, ret: u32, idx: u32| -> wasmtime::Result<()> {
            let v = value(&caller, idx);
            write_optional_string(&mut caller, ret, v.as_str())?;
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_is_null",
        |caller: Caller<'_, S>, idx: u32| -> u32 { flag(value(&caller, idx).is_null()) },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_is_undefined",
        |caller: Caller<'_, S>, idx: u32| -> u32 { flag(value(&caller, idx).is_undefined()) },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_is_object",
        |caller: Caller<'_, S>, idx: u32| -> u32 {
            flag(matches!(value(&caller, idx), HostValue::Object(_)))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_is_string",
        |caller: Caller<'_, S>, idx: u32| -> u32 { flag(value(&caller, idx).as_str().is_some()) },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_is_function",
        |caller: Caller<'_, S>, idx: u32| -> u32 { flag(value(&caller, idx).is_function()) },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_jsval_eq",
        |caller: Caller<'_, S>, a: u32, b: u32| -> u32 {
            flag(value(&caller, a).strict_eq(&value(&caller, b)))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_debug_string",
        |mut caller: Caller<'_, S>, ret: u32, idx: u32| -> wasmtime::Result<()> {
            let rendered = debug_string(&value(&caller, idx));
            write_deferred_string(&mut caller, ret, &rendered)?;
            Ok(())
        },
    )?;

    // =========================================
    // ERRORS
    // =========================================

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_throw",
        |mut caller: Caller<'_, S>, ptr: u32, len: u32| -> wasmtime::Result<()> {
            let message = string_arg(&mut caller, ptr, len)?;
            error!("guest threw: {}", message);
            caller.data_mut().set_error(message.clone());
            Err(wasmtime::Error::new(BridgeError::GuestThrow(message)))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_rethrow",
        |mut caller: Caller<'_, S>, idx: u32| -> wasmtime::Result<()> {
            Err(rethrow(&mut caller, idx))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_exn_take",
        |mut caller: Caller<'_, S>| -> u32 {
            caller
                .data_mut()
                .bridge_mut()
                .take_last_exception()
                .unwrap_or(HANDLE_ABSENT)
        },
    )?;

    // =========================================
    // CLOSURES
    // =========================================

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_closure_new",
        |mut caller: Caller<'_, S>, a: u32, b: u32, dtor: u32, invoke: u32| -> u32 {
            let closure = GuestClosure::create(caller.data_mut().bridge_mut(), a, b, dtor, invoke);
            trace!("closure created: a={} b={} dtor={} invoke={}", a, b, dtor, invoke);
            alloc(&mut caller, closure)
        },
    )?;

    // The handle is consumed; the guest frees its environment when this
    // returns 1.
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbindgen_cb_drop",
        |mut caller: Caller<'_, S>, idx: u32| -> wasmtime::Result<u32> {
            let target = value(&caller, idx);
            let bridge = caller.data_mut().bridge_mut();
            bridge.table.free(idx);
            let Some(obj) = target.as_object() else {
                debug!("cb_drop on non-closure handle {}", idx);
                return Ok(0);
            };
            let last = closure::guest_drop(bridge, obj)?;
            Ok(flag(last))
        },
    )?;

    Ok(())
}
