//! DOM Host Functions
//!
//! Window, media queries, document, elements, style and canvas.
//!
//! All functions are generic over `WasmStateCore` to work with any runtime.

use super::helpers::{
    alloc, alloc_optional, callback, flag, handled, object, require, string_arg, value,
    IMPORT_MODULE,
};
use super::state::WasmStateCore;
use crate::codec::{write_deferred_string, write_optional_string};
use crate::error::BridgeResult;
use crate::value::{HostValue, ObjectRef, PlainObject};
use wasmtime::{Caller, Linker};

/// Register all DOM functions with the linker
pub fn register_functions<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    register_window(linker)?;
    register_document(linker)?;
    register_element(linker)?;
    register_canvas(linker)?;
    Ok(())
}

fn register_window<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_globalThis_window",
        |mut caller: Caller<'_, S>| -> u32 {
            let window = caller.data().bridge().platform().window().clone();
            alloc(&mut caller, window)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_instanceof_Window",
        |caller: Caller<'_, S>, idx: u32| -> u32 {
            flag(value(&caller, idx).as_object().is_some_and(|o| o.as_window().is_some()))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Window_document",
        |mut caller: Caller<'_, S>, win: u32| -> wasmtime::Result<u32> {
            let obj = object(&caller, win, "Window", "document")?;
            let document = require(&obj, |o| o.as_window(), "Window", "document")?.document();
            Ok(alloc_optional(&mut caller, document))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Window_navigator",
        |mut caller: Caller<'_, S>, win: u32| -> wasmtime::Result<u32> {
            let obj = object(&caller, win, "Window", "navigator")?;
            let navigator = require(&obj, |o| o.as_window(), "Window", "navigator")?.navigator();
            Ok(alloc(&mut caller, navigator))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Window_performance",
        |mut caller: Caller<'_, S>, win: u32| -> wasmtime::Result<u32> {
            let obj = object(&caller, win, "Window", "performance")?;
            let perf = require(&obj, |o| o.as_window(), "Window", "performance")?.performance();
            Ok(alloc_optional(&mut caller, perf))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Window_crypto",
        |mut caller: Caller<'_, S>, win: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "Window.crypto", |c| {
                let obj = object(c, win, "Window", "crypto")?;
                let crypto = require(&obj, |o| o.as_window(), "Window", "crypto")?.crypto()?;
                Ok(alloc(c, crypto))
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Window_innerWidth",
        |mut caller: Caller<'_, S>, win: u32| -> wasmtime::Result<f64> {
            handled(&mut caller, "Window.innerWidth", |c| {
                let obj = object(c, win, "Window", "innerWidth")?;
                Ok(require(&obj, |o| o.as_window(), "Window", "innerWidth")?.inner_width()?)
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Window_innerHeight",
        |mut caller: Caller<'_, S>, win: u32| -> wasmtime::Result<f64> {
            handled(&mut caller, "Window.innerHeight", |c| {
                let obj = object(c, win, "Window", "innerHeight")?;
                Ok(require(&obj, |o| o.as_window(), "Window", "innerHeight")?.inner_height()?)
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Window_devicePixelRatio",
        |caller: Caller<'_, S>, win: u32| -> wasmtime::Result<f64> {
            let obj = object(&caller, win, "Window", "devicePixelRatio")?;
            Ok(require(&obj, |o| o.as_window(), "Window", "devicePixelRatio")?.device_pixel_ratio())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Window_isSecureContext",
        |caller: Caller<'_, S>, win: u32| -> wasmtime::Result<u32> {
            let obj = object(&caller, win, "Window", "isSecureContext")?;
            let secure = require(&obj, |o| o.as_window(), "Window", "isSecureContext")?
                .is_secure_context();
            Ok(flag(secure))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Window_matchMedia",
        |mut caller: Caller<'_, S>, win: u32, ptr: u32, len: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "Window.matchMedia", |c| {
                let query = string_arg(c, ptr, len)?;
                let obj = object(c, win, "Window", "matchMedia")?;
                let list = require(&obj, |o| o.as_window(), "Window", "matchMedia")?
                    .match_media(&query)?;
                Ok(alloc_optional(c, list))
            })
        },
    )?;

    // =========================================
    // MEDIA QUERY LISTS
    // =========================================

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_MediaQueryList_matches",
        |caller: Caller<'_, S>, mql: u32| -> wasmtime::Result<u32> {
            let obj = object(&caller, mql, "MediaQueryList", "matches")?;
            let list = require(&obj, |o| o.as_media_query_list(), "MediaQueryList", "matches")?;
            Ok(flag(list.matches()))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_MediaQueryList_media",
        |mut caller: Caller<'_, S>, ret: u32, mql: u32| -> wasmtime::Result<()> {
            let obj = object(&caller, mql, "MediaQueryList", "media")?;
            let media = require(&obj, |o| o.as_media_query_list(), "MediaQueryList", "media")?.media();
            write_deferred_string(&mut caller, ret, &media)?;
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_MediaQueryList_addListener",
        |mut caller: Caller<'_, S>, mql: u32, cb: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "MediaQueryList.addListener", |c| {
                let listener = callback(c, cb, "MediaQueryList.addListener")?;
                let obj = object(c, mql, "MediaQueryList", "addListener")?;
                require(&obj, |o| o.as_media_query_list(), "MediaQueryList", "addListener")?
                    .add_listener(listener)?;
                Ok(())
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_MediaQueryList_removeListener",
        |mut caller: Caller<'_, S>, mql: u32, cb: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "MediaQueryList.removeListener", |c| {
                let listener = callback(c, cb, "MediaQueryList.removeListener")?;
                let obj = object(c, mql, "MediaQueryList", "removeListener")?;
                require(&obj, |o| o.as_media_query_list(), "MediaQueryList", "removeListener")?
                    .remove_listener(&listener)?;
                Ok(())
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Navigator_userAgent",
        |mut caller: Caller<'_, S>, ret: u32, nav: u32| -> wasmtime::Result<()> {
            let obj = object(&caller, nav, "Navigator", "userAgent")?;
            let ua = require(&obj, |o| o.as_navigator(), "Navigator", "userAgent")?.user_agent();
            write_deferred_string(&mut caller, ret, &ua)?;
            Ok(())
        },
    )?;

    Ok(())
}

fn register_document<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Document_body",
        |mut caller: Caller<'_, S>, doc: u32| -> wasmtime::Result<u32> {
            let obj = object(&caller, doc, "Document", "body")?;
            let body = require(&obj, |o| o.as_document(), "Document", "body")?.body();
            Ok(alloc_optional(&mut caller, body))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Document_createElement",
        |mut caller: Caller<'_, S>, doc: u32, ptr: u32, len: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "Document.createElement", |c| {
                let tag = string_arg(c, ptr, len)?;
                let obj = object(c, doc, "Document", "createElement")?;
                let element =
                    require(&obj, |o| o.as_document(), "Document", "createElement")?.create_element(&tag)?;
                Ok(alloc(c, element))
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Document_querySelector",
        |mut caller: Caller<'_, S>, doc: u32, ptr: u32, len: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "Document.querySelector", |c| {
                let selector = string_arg(c, ptr, len)?;
                let obj = object(c, doc, "Document", "querySelector")?;
                let found = require(&obj, |o| o.as_document(), "Document", "querySelector")?
                    .query_selector(&selector)?;
                Ok(alloc_optional(c, found))
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Document_fullscreenElement",
        |mut caller: Caller<'_, S>, doc: u32| -> wasmtime::Result<u32> {
            let obj = object(&caller, doc, "Document", "fullscreenElement")?;
            let element =
                require(&obj, |o| o.as_document(), "Document", "fullscreenElement")?.fullscreen_element();
            Ok(alloc_optional(&mut caller, element))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Document_exitFullscreen",
        |caller: Caller<'_, S>, doc: u32| -> wasmtime::Result<()> {
            let obj = object(&caller, doc, "Document", "exitFullscreen")?;
            require(&obj, |o| o.as_document(), "Document", "exitFullscreen")?.exit_fullscreen();
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Document_pointerLockElement",
        |mut caller: Caller<'_, S>, doc: u32| -> wasmtime::Result<u32> {
            let obj = object(&caller, doc, "Document", "pointerLockElement")?;
            let element = require(&obj, |o| o.as_document(), "Document", "pointerLockElement")?
                .pointer_lock_element();
            Ok(alloc_optional(&mut caller, element))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Document_exitPointerLock",
        |caller: Caller<'_, S>, doc: u32| -> wasmtime::Result<()> {
            let obj = object(&caller, doc, "Document", "exitPointerLock")?;
            require(&obj, |o| o.as_document(), "Document", "exitPointerLock")?.exit_pointer_lock();
            Ok(())
        },
    )?;

    Ok(())
}

fn register_element<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Element_tagName",
        |mut caller: Caller<'_, S>, ret: u32, el: u32| -> wasmtime::Result<()> {
            let obj = object(&caller, el, "Element", "tagName")?;
            let tag = require(&obj, |o| o.as_element(), "Element", "tagName")?.tag_name();
            write_deferred_string(&mut caller, ret, &tag)?;
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Element_id",
        |mut caller: Caller<'_, S>, ret: u32, el: u32| -> wasmtime::Result<()> {
            let obj = object(&caller, el, "Element", "id")?;
            let id = require(&obj, |o| o.as_element(), "Element", "id")?.id();
            write_deferred_string(&mut caller, ret, &id)?;
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Element_parentElement",
        |mut caller: Caller<'_, S>, el: u32| -> wasmtime::Result<u32> {
            let obj = object(&caller, el, "Element", "parentElement")?;
            let parent = require(&obj, |o| o.as_element(), "Element", "parentElement")?.parent_element();
            Ok(alloc_optional(&mut caller, parent))
        },
    )?;

    // Returns the appended child, as the host API does
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Element_appendChild",
        |mut caller: Caller<'_, S>, el: u32, child: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "Element.appendChild", |c| {
                let obj = object(c, el, "Element", "appendChild")?;
                let child_obj = object(c, child, "Element", "appendChild")?;
                require(&obj, |o| o.as_element(), "Element", "appendChild")?
                    .append_child(&obj, &child_obj)?;
                Ok(alloc(c, child_obj))
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Element_setAttribute",
        |mut caller: Caller<'_, S>,
         el: u32,
         name_ptr: u32,
         name_len: u32,
         value_ptr: u32,
         value_len: u32|
         -> wasmtime::Result<()> {
            handled(&mut caller, "Element.setAttribute", |c| {
                let name = string_arg(c, name_ptr, name_len)?;
                let val = string_arg(c, value_ptr, value_len)?;
                let obj = object(c, el, "Element", "setAttribute")?;
                require(&obj, |o| o.as_element(), "Element", "setAttribute")?.set_attribute(&name, &val)?;
                Ok(())
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Element_getAttribute",
        |mut caller: Caller<'_, S>, ret: u32, el: u32, ptr: u32, len: u32| -> wasmtime::Result<()> {
            let name = string_arg(&mut caller, ptr, len)?;
            let obj = object(&caller, el, "Element", "getAttribute")?;
            let attr = require(&obj, |o| o.as_element(), "Element", "getAttribute")?.get_attribute(&name);
            write_optional_string(&mut caller, ret, attr.as_deref())?;
            Ok(())
        },
    )?;

    // The rect comes back as a plain `{x, y, width, height}` object
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Element_getBoundingClientRect",
        |mut caller: Caller<'_, S>, el: u32| -> wasmtime::Result<u32> {
            let obj = object(&caller, el, "Element", "getBoundingClientRect")?;
            let rect = require(&obj, |o| o.as_element(), "Element", "getBoundingClientRect")?
                .bounding_client_rect();
            let rect = PlainObject::new()
                .with("x", rect.x)
                .with("y", rect.y)
                .with("width", rect.width)
                .with("height", rect.height);
            Ok(alloc(&mut caller, HostValue::object(rect)))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Element_style",
        |mut caller: Caller<'_, S>, el: u32| -> wasmtime::Result<u32> {
            let obj = object(&caller, el, "Element", "style")?;
            let style = require(&obj, |o| o.as_element(), "Element", "style")?.style();
            Ok(alloc(&mut caller, style))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Element_requestFullscreen",
        |mut caller: Caller<'_, S>, el: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "Element.requestFullscreen", |c| {
                let obj = object(c, el, "Element", "requestFullscreen")?;
                require(&obj, |o| o.as_element(), "Element", "requestFullscreen")?
                    .request_fullscreen(&obj)?;
                Ok(())
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Element_requestPointerLock",
        |caller: Caller<'_, S>, el: u32| -> wasmtime::Result<()> {
            let obj = object(&caller, el, "Element", "requestPointerLock")?;
            require(&obj, |o| o.as_element(), "Element", "requestPointerLock")?.request_pointer_lock(&obj);
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Element_setPointerCapture",
        |mut caller: Caller<'_, S>, el: u32, pointer_id: i32| -> wasmtime::Result<()> {
            handled(&mut caller, "Element.setPointerCapture", |c| {
                let obj = object(c, el, "Element", "setPointerCapture")?;
                require(&obj, |o| o.as_element(), "Element", "setPointerCapture")?
                    .set_pointer_capture(pointer_id)?;
                Ok(())
            })
        },
    )?;

    // =========================================
    // STYLE
    // =========================================

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_CssStyle_setProperty",
        |mut caller: Caller<'_, S>,
         style: u32,
         name_ptr: u32,
         name_len: u32,
         value_ptr: u32,
         value_len: u32|
         -> wasmtime::Result<()> {
            handled(&mut caller, "CSSStyleDeclaration.setProperty", |c| {
                let name = string_arg(c, name_ptr, name_len)?;
                let val = string_arg(c, value_ptr, value_len)?;
                let obj = object(c, style, "CSSStyleDeclaration", "setProperty")?;
                require(&obj, |o| o.as_css_style(), "CSSStyleDeclaration", "setProperty")?
                    .set_property(&name, &val)?;
                Ok(())
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_CssStyle_getPropertyValue",
        |mut caller: Caller<'_, S>, ret: u32, style: u32, ptr: u32, len: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "CSSStyleDeclaration.getPropertyValue", |c| {
                let name = string_arg(c, ptr, len)?;
                let obj = object(c, style, "CSSStyleDeclaration", "getPropertyValue")?;
                let v = require(&obj, |o| o.as_css_style(), "CSSStyleDeclaration", "getPropertyValue")?
                    .get_property_value(&name);
                write_deferred_string(&mut *c, ret, &v)
            })
        },
    )?;

    Ok(())
}

fn canvas_of<S: WasmStateCore>(caller: &Caller<'_, S>, idx: u32, member: &str) -> BridgeResult<ObjectRef> {
    let obj = object(caller, idx, "HTMLCanvasElement", member)?;
    require(&obj, |o| o.as_canvas(), "HTMLCanvasElement", member)?;
    Ok(obj)
}

fn register_canvas<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_instanceof_HtmlCanvasElement",
        |caller: Caller<'_, S>, idx: u32| -> u32 {
            flag(value(&caller, idx).as_object().is_some_and(|o| o.as_canvas().is_some()))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_HtmlCanvasElement_width",
        |caller: Caller<'_, S>, canvas: u32| -> wasmtime::Result<u32> {
            let obj = canvas_of(&caller, canvas, "width")?;
            Ok(obj.as_canvas().map_or(0, |c| c.width()))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_HtmlCanvasElement_setWidth",
        |caller: Caller<'_, S>, canvas: u32, width: u32| -> wasmtime::Result<()> {
            let obj = canvas_of(&caller, canvas, "width")?;
            if let Some(c) = obj.as_canvas() {
                c.set_width(width);
            }
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_HtmlCanvasElement_height",
        |caller: Caller<'_, S>, canvas: u32| -> wasmtime::Result<u32> {
            let obj = canvas_of(&caller, canvas, "height")?;
            Ok(obj.as_canvas().map_or(0, |c| c.height()))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_HtmlCanvasElement_setHeight",
        |caller: Caller<'_, S>, canvas: u32, height: u32| -> wasmtime::Result<()> {
            let obj = canvas_of(&caller, canvas, "height")?;
            if let Some(c) = obj.as_canvas() {
                c.set_height(height);
            }
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_HtmlCanvasElement_getContext",
        |mut caller: Caller<'_, S>, canvas: u32, ptr: u32, len: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "HTMLCanvasElement.getContext", |c| {
                let kind = string_arg(c, ptr, len)?;
                let obj = canvas_of(c, canvas, "getContext")?;
                let context = require(&obj, |o| o.as_canvas(), "HTMLCanvasElement", "getContext")?
                    .get_context(&kind)?;
                Ok(alloc_optional(c, context))
            })
        },
    )?;

    Ok(())
}
