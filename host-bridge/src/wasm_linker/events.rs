//! Event Host Functions
//!
//! Listener registration on any event target plus the accessors of the
//! event interfaces the guest reads (keyboard, mouse, pointer, wheel).
//!
//! All functions are generic over `WasmStateCore` to work with any runtime.

use super::helpers::{
    alloc_optional, callback, flag, handled, object, require, retained, string_arg, value,
    IMPORT_MODULE,
};
use super::state::WasmStateCore;
use crate::closure;
use crate::capability::{KeyboardEvent, ListenerOptions, ModifierState, MouseEvent, WheelEvent};
use crate::codec::write_deferred_string;
use crate::error::BridgeResult;
use crate::value::{HostValue, ObjectRef};
use wasmtime::{Caller, Linker};

/// Interfaces exposing the modifier-key getters
const MODIFIER_INTERFACES: &[&str] = &["KeyboardEvent", "MouseEvent"];

fn add_listener<S: WasmStateCore>(
    caller: &mut Caller<'_, S>,
    target: u32,
    ptr: u32,
    len: u32,
    cb: u32,
    options: HostValue,
) -> BridgeResult<()> {
    let event_type = string_arg(caller, ptr, len)?;
    let obj = object(caller, target, "EventTarget", "addEventListener")?;
    let registry = require(&obj, |o| o.as_event_target(), "EventTarget", "addEventListener")?;
    let token = retained(caller, cb, "EventTarget.addEventListener")?;
    if let Some(duplicate) =
        registry.add_event_listener(&event_type, token, ListenerOptions::from_value(&options))
    {
        closure::release(caller, duplicate)?;
    }
    Ok(())
}

fn event_of<S: WasmStateCore>(caller: &Caller<'_, S>, idx: u32, member: &str) -> BridgeResult<ObjectRef> {
    let obj = object(caller, idx, "Event", member)?;
    require(&obj, |o| o.as_event(), "Event", member)?;
    Ok(obj)
}

/// Register all event functions with the linker
pub fn register_functions<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    register_targets(linker)?;
    register_event(linker)?;
    register_keyboard(linker)?;
    register_modifiers(linker)?;
    register_mouse(linker)?;
    register_pointer_and_wheel(linker)?;
    Ok(())
}

fn register_targets<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_EventTarget_addEventListener",
        |mut caller: Caller<'_, S>, target: u32, ptr: u32, len: u32, cb: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "EventTarget.addEventListener", |c| {
                add_listener(c, target, ptr, len, cb, HostValue::Undefined)
            })
        },
    )?;

    // Third argument is a boolean (`useCapture`) or an options object
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_EventTarget_addEventListener_with_options",
        |mut caller: Caller<'_, S>, target: u32, ptr: u32, len: u32, cb: u32, opts: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "EventTarget.addEventListener", |c| {
                let options = value(c, opts);
                add_listener(c, target, ptr, len, cb, options)
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_EventTarget_removeEventListener",
        |mut caller: Caller<'_, S>, target: u32, ptr: u32, len: u32, cb: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "EventTarget.removeEventListener", |c| {
                let event_type = string_arg(c, ptr, len)?;
                let listener = callback(c, cb, "EventTarget.removeEventListener")?;
                let obj = object(c, target, "EventTarget", "removeEventListener")?;
                let removed =
                    require(&obj, |o| o.as_event_target(), "EventTarget", "removeEventListener")?
                        .remove_event_listener(&event_type, &listener, false);
                match removed {
                    Some(token) => closure::release(c, token),
                    None => Ok(()),
                }
            })
        },
    )?;

    Ok(())
}

fn register_event<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Event_type",
        |mut caller: Caller<'_, S>, ret: u32, ev: u32| -> wasmtime::Result<()> {
            let obj = event_of(&caller, ev, "type")?;
            let ty = obj.as_event().map(|e| e.event_type()).unwrap_or_default();
            write_deferred_string(&mut caller, ret, &ty)?;
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Event_target",
        |mut caller: Caller<'_, S>, ev: u32| -> wasmtime::Result<u32> {
            let obj = event_of(&caller, ev, "target")?;
            let target = obj.as_event().and_then(|e| e.target());
            Ok(alloc_optional(&mut caller, target))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Event_preventDefault",
        |caller: Caller<'_, S>, ev: u32| -> wasmtime::Result<()> {
            let obj = event_of(&caller, ev, "preventDefault")?;
            if let Some(e) = obj.as_event() {
                e.prevent_default();
            }
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Event_defaultPrevented",
        |caller: Caller<'_, S>, ev: u32| -> wasmtime::Result<u32> {
            let obj = event_of(&caller, ev, "defaultPrevented")?;
            Ok(flag(obj.as_event().is_some_and(|e| e.default_prevented())))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Event_stopPropagation",
        |caller: Caller<'_, S>, ev: u32| -> wasmtime::Result<()> {
            let obj = event_of(&caller, ev, "stopPropagation")?;
            if let Some(e) = obj.as_event() {
                e.stop_propagation();
            }
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Event_cancelBubble",
        |caller: Caller<'_, S>, ev: u32| -> wasmtime::Result<u32> {
            let obj = event_of(&caller, ev, "cancelBubble")?;
            Ok(flag(obj.as_event().is_some_and(|e| e.cancel_bubble())))
        },
    )?;

    for interface in ["KeyboardEvent", "MouseEvent", "PointerEvent", "WheelEvent"] {
        linker.func_wrap(
            IMPORT_MODULE,
            &format!("__wbg_instanceof_{}", interface),
            move |caller: Caller<'_, S>, idx: u32| -> u32 {
                let v = value(&caller, idx);
                let Some(obj) = v.as_object() else {
                    return 0;
                };
                flag(match interface {
                    "KeyboardEvent" => obj.as_keyboard_event().is_some(),
                    "MouseEvent" => obj.as_mouse_event().is_some(),
                    "PointerEvent" => obj.as_pointer_event().is_some(),
                    _ => obj.as_wheel_event().is_some(),
                })
            },
        )?;
    }

    Ok(())
}

fn with_keyboard<S: WasmStateCore, R>(
    caller: &Caller<'_, S>,
    ev: u32,
    member: &str,
    f: impl FnOnce(&dyn KeyboardEvent) -> R,
) -> BridgeResult<R> {
    let obj = object(caller, ev, "KeyboardEvent", member)?;
    Ok(f(require(&obj, |o| o.as_keyboard_event(), "KeyboardEvent", member)?))
}

fn register_keyboard<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_KeyboardEvent_key",
        |mut caller: Caller<'_, S>, ret: u32, ev: u32| -> wasmtime::Result<()> {
            let key = with_keyboard(&caller, ev, "key", |k| k.key())?;
            write_deferred_string(&mut caller, ret, &key)?;
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_KeyboardEvent_code",
        |mut caller: Caller<'_, S>, ret: u32, ev: u32| -> wasmtime::Result<()> {
            let code = with_keyboard(&caller, ev, "code", |k| k.code())?;
            write_deferred_string(&mut caller, ret, &code)?;
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_KeyboardEvent_keyCode",
        |caller: Caller<'_, S>, ev: u32| -> wasmtime::Result<u32> {
            Ok(with_keyboard(&caller, ev, "keyCode", |k| k.key_code())?)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_KeyboardEvent_charCode",
        |caller: Caller<'_, S>, ev: u32| -> wasmtime::Result<u32> {
            Ok(with_keyboard(&caller, ev, "charCode", |k| k.char_code())?)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_KeyboardEvent_repeat",
        |caller: Caller<'_, S>, ev: u32| -> wasmtime::Result<u32> {
            Ok(flag(with_keyboard(&caller, ev, "repeat", |k| k.repeat())?))
        },
    )?;

    Ok(())
}

fn register_modifiers<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    type Getter = fn(&dyn ModifierState) -> bool;
    let getters: [(&'static str, Getter); 4] = [
        ("altKey", |m| m.alt_key()),
        ("ctrlKey", |m| m.ctrl_key()),
        ("shiftKey", |m| m.shift_key()),
        ("metaKey", |m| m.meta_key()),
    ];

    for &interface in MODIFIER_INTERFACES {
        for (member, getter) in getters {
            linker.func_wrap(
                IMPORT_MODULE,
                &format!("__wbg_{}_{}", interface, member),
                move |caller: Caller<'_, S>, ev: u32| -> wasmtime::Result<u32> {
                    let obj = object(&caller, ev, interface, member)?;
                    Ok(flag(getter(require(&obj, |o| o.as_modifier_state(), interface, member)?)))
                },
            )?;
        }

        linker.func_wrap(
            IMPORT_MODULE,
            &format!("__wbg_{}_getModifierState", interface),
            move |mut caller: Caller<'_, S>, ev: u32, ptr: u32, len: u32| -> wasmtime::Result<u32> {
                let key = string_arg(&mut caller, ptr, len)?;
                let obj = object(&caller, ev, interface, "getModifierState")?;
                let state = require(&obj, |o| o.as_modifier_state(), interface, "getModifierState")?;
                Ok(flag(state.get_modifier_state(&key)))
            },
        )?;
    }

    Ok(())
}

fn register_mouse<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    type Getter = fn(&dyn MouseEvent) -> i32;
    let getters: [(&'static str, Getter); 8] = [
        ("clientX", |m| m.client_x()),
        ("clientY", |m| m.client_y()),
        ("offsetX", |m| m.offset_x()),
        ("offsetY", |m| m.offset_y()),
        ("movementX", |m| m.movement_x()),
        ("movementY", |m| m.movement_y()),
        ("button", |m| i32::from(m.button())),
        ("buttons", |m| i32::from(m.buttons())),
    ];

    for (member, getter) in getters {
        linker.func_wrap(
            IMPORT_MODULE,
            &format!("__wbg_MouseEvent_{}", member),
            move |caller: Caller<'_, S>, ev: u32| -> wasmtime::Result<i32> {
                let obj = object(&caller, ev, "MouseEvent", member)?;
                Ok(getter(require(&obj, |o| o.as_mouse_event(), "MouseEvent", member)?))
            },
        )?;
    }

    Ok(())
}

fn register_pointer_and_wheel<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_PointerEvent_pointerId",
        |caller: Caller<'_, S>, ev: u32| -> wasmtime::Result<i32> {
            let obj = object(&caller, ev, "PointerEvent", "pointerId")?;
            Ok(require(&obj, |o| o.as_pointer_event(), "PointerEvent", "pointerId")?.pointer_id())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_PointerEvent_pointerType",
        |mut caller: Caller<'_, S>, ret: u32, ev: u32| -> wasmtime::Result<()> {
            let obj = object(&caller, ev, "PointerEvent", "pointerType")?;
            let ty = require(&obj, |o| o.as_pointer_event(), "PointerEvent", "pointerType")?.pointer_type();
            write_deferred_string(&mut caller, ret, &ty)?;
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_PointerEvent_pressure",
        |caller: Caller<'_, S>, ev: u32| -> wasmtime::Result<f32> {
            let obj = object(&caller, ev, "PointerEvent", "pressure")?;
            Ok(require(&obj, |o| o.as_pointer_event(), "PointerEvent", "pressure")?.pressure())
        },
    )?;

    type Delta = fn(&dyn WheelEvent) -> f64;
    let deltas: [(&'static str, Delta); 2] = [("deltaX", |w| w.delta_x()), ("deltaY", |w| w.delta_y())];
    for (member, getter) in deltas {
        linker.func_wrap(
            IMPORT_MODULE,
            &format!("__wbg_WheelEvent_{}", member),
            move |caller: Caller<'_, S>, ev: u32| -> wasmtime::Result<f64> {
                let obj = object(&caller, ev, "WheelEvent", member)?;
                Ok(getter(require(&obj, |o| o.as_wheel_event(), "WheelEvent", member)?))
            },
        )?;
    }

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_WheelEvent_deltaMode",
        |caller: Caller<'_, S>, ev: u32| -> wasmtime::Result<u32> {
            let obj = object(&caller, ev, "WheelEvent", "deltaMode")?;
            Ok(require(&obj, |o| o.as_wheel_event(), "WheelEvent", "deltaMode")?.delta_mode())
        },
    )?;

    Ok(())
}
