//! Timer and Promise Host Functions
//!
//! Everything here only queues work on the bridge's event loop; callbacks
//! run when the embedder drives the loop, never re-entrantly.

use super::helpers::{
    alloc, callback, handled, object, optional_object, retained, value, IMPORT_MODULE,
};
use super::state::WasmStateCore;
use crate::closure;
use crate::error::BridgeResult;
use crate::event_loop::Task;
use crate::value::HostValue;
use tracing::trace;
use wasmtime::{Caller, Linker};

/// Register all timer and promise functions with the linker
pub fn register_functions<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    // =========================================
    // TIMERS
    // =========================================

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_setTimeout",
        |mut caller: Caller<'_, S>, cb: u32, delay_ms: i32| -> wasmtime::Result<u32> {
            handled(&mut caller, "setTimeout", |c| {
                let token = retained(c, cb, "setTimeout")?;
                let id = c.data_mut().bridge_mut().event_loop.set_timeout(
                    token,
                    HostValue::Undefined,
                    f64::from(delay_ms.max(0)),
                );
                trace!("setTimeout({}ms) = {}", delay_ms, id);
                Ok(id)
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_clearTimeout",
        |mut caller: Caller<'_, S>, id: u32| -> wasmtime::Result<()> {
            if let Some(token) = caller.data_mut().bridge_mut().event_loop.clear_timeout(id) {
                closure::release(&mut caller, token)?;
            }
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_requestAnimationFrame",
        |mut caller: Caller<'_, S>, cb: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "requestAnimationFrame", |c| {
                let token = retained(c, cb, "requestAnimationFrame")?;
                Ok(c.data_mut().bridge_mut().event_loop.request_animation_frame(token))
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_cancelAnimationFrame",
        |mut caller: Caller<'_, S>, id: u32| -> wasmtime::Result<()> {
            if let Some(token) = caller.data_mut().bridge_mut().event_loop.cancel_animation_frame(id) {
                closure::release(&mut caller, token)?;
            }
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_queueMicrotask",
        |mut caller: Caller<'_, S>, cb: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "queueMicrotask", |c| {
                let token = retained(c, cb, "queueMicrotask")?;
                c.data_mut().bridge_mut().event_loop.queue_microtask(Task::Invoke {
                    token,
                    arg: HostValue::Undefined,
                });
                Ok(())
            })
        },
    )?;

    // =========================================
    // PROMISES
    // =========================================

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Promise_resolve",
        |mut caller: Caller<'_, S>, v: u32| -> u32 {
            let v = value(&caller, v);
            let promise = caller.data_mut().bridge_mut().event_loop.resolved(v);
            alloc(&mut caller, promise)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Promise_then",
        |mut caller: Caller<'_, S>, promise: u32, on_fulfilled: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "Promise.then", |c| {
                let promise = object(c, promise, "Promise", "then")?;
                let on_fulfilled = callback(c, on_fulfilled, "Promise.then")?;
                let derived = c
                    .data_mut()
                    .bridge_mut()
                    .event_loop
                    .then(&promise, Some(on_fulfilled), None)?;
                Ok(alloc(c, derived))
            })
        },
    )?;

    // Either handler may be absent (`undefined`)
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Promise_then2",
        |mut caller: Caller<'_, S>, promise: u32, on_fulfilled: u32, on_rejected: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "Promise.then", |c| {
                let promise = object(c, promise, "Promise", "then")?;
                let on_fulfilled = optional_object(c, on_fulfilled);
                let on_rejected = optional_object(c, on_rejected);
                let derived = c
                    .data_mut()
                    .bridge_mut()
                    .event_loop
                    .then(&promise, on_fulfilled, on_rejected)?;
                Ok(alloc(c, derived))
            })
        },
    )?;

    Ok(())
}
