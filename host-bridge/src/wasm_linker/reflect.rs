//! Reflection Host Functions
//!
//! Plain objects, arrays, `Reflect.*`, `Function.prototype.call` and
//! `Error` objects.

use super::helpers::{alloc, callback, flag, handled, object, string_arg, value, IMPORT_MODULE};
use super::state::WasmStateCore;
use crate::closure;
use crate::codec::{write_deferred_string, write_optional_string};
use crate::error::BridgeResult;
use crate::table::HANDLE_UNDEFINED;
use crate::value::{ArrayObject, HostException, HostValue, PlainObject};
use wasmtime::{Caller, Linker};

fn not_an_object(member: &str) -> HostException {
    HostException::type_error(format!("{} called on non-object", member))
}

/// Register all reflection functions with the linker
pub fn register_functions<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    // =========================================
    // OBJECTS AND ARRAYS
    // =========================================

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Object_new",
        |mut caller: Caller<'_, S>| -> u32 { alloc(&mut caller, HostValue::object(PlainObject::new())) },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Array_new",
        |mut caller: Caller<'_, S>| -> u32 { alloc(&mut caller, HostValue::object(ArrayObject::new())) },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Array_push",
        |caller: Caller<'_, S>, arr: u32, item: u32| -> wasmtime::Result<u32> {
            let target = object(&caller, arr, "Array", "push")?;
            let array = target
                .as_array()
                .ok_or_else(|| HostException::illegal_invocation("Array", "push"))?;
            Ok(array.push(value(&caller, item)))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Array_length",
        |caller: Caller<'_, S>, arr: u32| -> wasmtime::Result<u32> {
            let target = object(&caller, arr, "Array", "length")?;
            let array = target
                .as_array()
                .ok_or_else(|| HostException::illegal_invocation("Array", "length"))?;
            Ok(array.len())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Array_get",
        |mut caller: Caller<'_, S>, arr: u32, index: u32| -> wasmtime::Result<u32> {
            let target = object(&caller, arr, "Array", "get")?;
            let item = target
                .as_array()
                .ok_or_else(|| HostException::illegal_invocation("Array", "get"))?
                .get_index(index)
                .unwrap_or_default();
            Ok(alloc(&mut caller, item))
        },
    )?;

    // =========================================
    // REFLECT
    // =========================================

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Reflect_get",
        |mut caller: Caller<'_, S>, target: u32, key: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "Reflect.get", |c| {
                let obj = value(c, target)
                    .as_object()
                    .cloned()
                    .ok_or_else(|| not_an_object("Reflect.get"))?;
                let key = value(c, key).to_property_key();
                let found = obj.get(&key).unwrap_or_default();
                Ok(alloc(c, found))
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Reflect_set",
        |mut caller: Caller<'_, S>, target: u32, key: u32, val: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "Reflect.set", |c| {
                let obj = value(c, target)
                    .as_object()
                    .cloned()
                    .ok_or_else(|| not_an_object("Reflect.set"))?;
                let key = value(c, key).to_property_key();
                Ok(flag(obj.set(&key, value(c, val))?))
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Reflect_has",
        |mut caller: Caller<'_, S>, target: u32, key: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "Reflect.has", |c| {
                let obj = value(c, target)
                    .as_object()
                    .cloned()
                    .ok_or_else(|| not_an_object("Reflect.has"))?;
                Ok(flag(obj.has(&value(c, key).to_property_key())))
            })
        },
    )?;

    // Named property read with the key passed as a guest string
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Object_get",
        |mut caller: Caller<'_, S>, target: u32, ptr: u32, len: u32| -> wasmtime::Result<u32> {
            let key = string_arg(&mut caller, ptr, len)?;
            let found = value(&caller, target).property(&key).unwrap_or_default();
            Ok(alloc(&mut caller, found))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Object_set",
        |mut caller: Caller<'_, S>, target: u32, ptr: u32, len: u32, val: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "Object.set", |c| {
                let key = string_arg(c, ptr, len)?;
                let obj = object(c, target, "Object", "set")?;
                obj.set(&key, value(c, val))?;
                Ok(())
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Object_is",
        |caller: Caller<'_, S>, a: u32, b: u32| -> u32 {
            flag(value(&caller, a).same_value(&value(&caller, b)))
        },
    )?;

    // =========================================
    // FUNCTIONS
    // =========================================

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Function_call0",
        |mut caller: Caller<'_, S>, func: u32, _this: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "Function.call", |c| {
                let callee = callback(c, func, "Function.call")?;
                closure::invoke(&mut *c, &callee, HostValue::Undefined)?;
                Ok(HANDLE_UNDEFINED)
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Function_call1",
        |mut caller: Caller<'_, S>, func: u32, _this: u32, arg: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "Function.call", |c| {
                let callee = callback(c, func, "Function.call")?;
                let arg = value(c, arg);
                closure::invoke(&mut *c, &callee, arg)?;
                Ok(HANDLE_UNDEFINED)
            })
        },
    )?;

    // =========================================
    // ERROR OBJECTS
    // =========================================

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Error_new",
        |mut caller: Caller<'_, S>, ptr: u32, len: u32| -> wasmtime::Result<u32> {
            let message = string_arg(&mut caller, ptr, len)?;
            Ok(alloc(&mut caller, HostValue::object(HostException::error(message))))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Error_message",
        |mut caller: Caller<'_, S>, ret: u32, err: u32| -> wasmtime::Result<()> {
            let message = value(&caller, err).property("message").unwrap_or_default();
            write_deferred_string(&mut caller, ret, message.as_str().unwrap_or(""))?;
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Error_name",
        |mut caller: Caller<'_, S>, ret: u32, err: u32| -> wasmtime::Result<()> {
            let name = value(&caller, err).property("name").unwrap_or_default();
            write_deferred_string(&mut caller, ret, name.as_str().unwrap_or("Error"))?;
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Error_stack",
        |mut caller: Caller<'_, S>, ret: u32, err: u32| -> wasmtime::Result<()> {
            let stack = value(&caller, err).property("stack").unwrap_or_default();
            write_optional_string(&mut caller, ret, stack.as_str())?;
            Ok(())
        },
    )?;

    Ok(())
}
