//! Console, Performance and Date Host Functions
//!
//! Console messages arrive as deferred strings: the host owns them once the
//! call is made and hands the buffer back to the guest allocator.
//!
//! All functions are generic over `WasmStateCore` to work with any runtime.

use super::helpers::{handled, object, require, string_arg, value, IMPORT_MODULE};
use super::state::WasmStateCore;
use crate::capability::ConsoleLevel;
use crate::codec::take_string;
use crate::error::BridgeResult;
use crate::value::debug_string;
use wasmtime::{Caller, Linker};

fn console_message<S: WasmStateCore>(
    caller: &mut Caller<'_, S>,
    level: ConsoleLevel,
    ptr: u32,
    len: u32,
) -> wasmtime::Result<()> {
    let text = take_string(&mut *caller, ptr, len)?;
    caller.data().bridge().platform().console().message(level, &text);
    Ok(())
}

/// Register all console/performance functions with the linker
pub fn register_functions<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    // =========================================
    // CONSOLE
    // =========================================

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_console_log",
        |mut caller: Caller<'_, S>, ptr: u32, len: u32| -> wasmtime::Result<()> {
            console_message(&mut caller, ConsoleLevel::Log, ptr, len)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_console_warn",
        |mut caller: Caller<'_, S>, ptr: u32, len: u32| -> wasmtime::Result<()> {
            console_message(&mut caller, ConsoleLevel::Warn, ptr, len)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_console_error",
        |mut caller: Caller<'_, S>, ptr: u32, len: u32| -> wasmtime::Result<()> {
            console_message(&mut caller, ConsoleLevel::Error, ptr, len)
        },
    )?;

    // console.log(value) with any host value
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_console_log1",
        |caller: Caller<'_, S>, idx: u32| {
            let v = value(&caller, idx);
            let text = match v.as_str() {
                Some(s) => s.to_string(),
                None => debug_string(&v),
            };
            caller
                .data()
                .bridge()
                .platform()
                .console()
                .message(ConsoleLevel::Log, &text);
        },
    )?;

    // =========================================
    // PERFORMANCE / DATE
    // =========================================

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Performance_now",
        |caller: Caller<'_, S>, perf: u32| -> wasmtime::Result<f64> {
            let obj = object(&caller, perf, "Performance", "now")?;
            Ok(require(&obj, |o| o.as_performance(), "Performance", "now")?.now())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Performance_mark",
        |mut caller: Caller<'_, S>, perf: u32, ptr: u32, len: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "Performance.mark", |c| {
                let name = string_arg(c, ptr, len)?;
                let obj = object(c, perf, "Performance", "mark")?;
                require(&obj, |o| o.as_performance(), "Performance", "mark")?.mark(&name);
                Ok(())
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Performance_measure",
        |mut caller: Caller<'_, S>,
         perf: u32,
         name_ptr: u32,
         name_len: u32,
         start_ptr: u32,
         start_len: u32|
         -> wasmtime::Result<f64> {
            handled(&mut caller, "Performance.measure", |c| {
                let name = string_arg(c, name_ptr, name_len)?;
                let start = string_arg(c, start_ptr, start_len)?;
                let obj = object(c, perf, "Performance", "measure")?;
                let perf = require(&obj, |o| o.as_performance(), "Performance", "measure")?;
                Ok(perf.measure(&name, &start)?)
            })
        },
    )?;

    // Wall-clock milliseconds since the Unix epoch
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Date_now",
        |_: Caller<'_, S>| -> f64 { chrono::Utc::now().timestamp_millis() as f64 },
    )?;

    Ok(())
}
