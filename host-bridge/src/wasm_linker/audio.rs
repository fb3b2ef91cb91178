//! Web Audio Host Functions
//!
//! Contexts, nodes, buffers and buffer sources. `resume`/`close` return
//! promises settled immediately; a started source fires its `onended`
//! handler through the event loop once its buffer has played out.

use super::helpers::{
    alloc, alloc_optional, handled, object, optional_object, require, settle, value,
    write_deferred_bytes, IMPORT_MODULE,
};
use super::state::WasmStateCore;
use crate::capability::{AudioBuffer, AudioContext, AudioNode};
use crate::codec::{read_f32_array, write_deferred_string};
use crate::closure;
use crate::error::{BridgeError, BridgeResult};
use crate::platform::InputEvent;
use crate::value::{HostValue, ObjectRef};
use tracing::{debug, warn};
use wasmtime::{Caller, Linker};

fn with_context<S: WasmStateCore, R>(
    caller: &Caller<'_, S>,
    idx: u32,
    member: &str,
    f: impl FnOnce(&dyn AudioContext) -> R,
) -> BridgeResult<R> {
    let obj = object(caller, idx, "AudioContext", member)?;
    Ok(f(require(&obj, |o| o.as_audio_context(), "AudioContext", member)?))
}

fn with_node<S: WasmStateCore, R>(
    caller: &Caller<'_, S>,
    idx: u32,
    member: &str,
    f: impl FnOnce(&dyn AudioNode) -> R,
) -> BridgeResult<R> {
    let obj = object(caller, idx, "AudioNode", member)?;
    Ok(f(require(&obj, |o| o.as_audio_node(), "AudioNode", member)?))
}

fn with_buffer<S: WasmStateCore, R>(
    caller: &Caller<'_, S>,
    idx: u32,
    member: &str,
    f: impl FnOnce(&dyn AudioBuffer) -> R,
) -> BridgeResult<R> {
    let obj = object(caller, idx, "AudioBuffer", member)?;
    Ok(f(require(&obj, |o| o.as_audio_buffer(), "AudioBuffer", member)?))
}

fn source_of<S: WasmStateCore>(caller: &Caller<'_, S>, idx: u32, member: &str) -> BridgeResult<ObjectRef> {
    let obj = object(caller, idx, "AudioBufferSourceNode", member)?;
    require(&obj, |o| o.as_audio_buffer_source(), "AudioBufferSourceNode", member)?;
    Ok(obj)
}

/// Register all audio functions with the linker
pub fn register_functions<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    register_context(linker)?;
    register_nodes(linker)?;
    register_buffers(linker)?;
    register_sources(linker)?;
    Ok(())
}

fn register_context<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioContext_new",
        |mut caller: Caller<'_, S>| -> u32 {
            let context = caller.data().bridge().platform().create_audio_context();
            debug!("AudioContext created");
            alloc(&mut caller, context)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioContext_currentTime",
        |caller: Caller<'_, S>, ctx: u32| -> wasmtime::Result<f64> {
            Ok(with_context(&caller, ctx, "currentTime", |c| c.current_time())?)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioContext_sampleRate",
        |caller: Caller<'_, S>, ctx: u32| -> wasmtime::Result<f32> {
            Ok(with_context(&caller, ctx, "sampleRate", |c| c.sample_rate())?)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioContext_state",
        |mut caller: Caller<'_, S>, ret: u32, ctx: u32| -> wasmtime::Result<()> {
            let state = with_context(&caller, ctx, "state", |c| c.state())?;
            write_deferred_string(&mut caller, ret, &state)?;
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioContext_destination",
        |mut caller: Caller<'_, S>, ctx: u32| -> wasmtime::Result<u32> {
            let destination = with_context(&caller, ctx, "destination", |c| c.destination())?;
            Ok(alloc(&mut caller, destination))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioContext_createBuffer",
        |mut caller: Caller<'_, S>, ctx: u32, channels: u32, length: u32, sample_rate: f32| -> wasmtime::Result<u32> {
            handled(&mut caller, "AudioContext.createBuffer", |c| {
                let buffer = with_context(c, ctx, "createBuffer", |a| {
                    a.create_buffer(channels, length, sample_rate)
                })??;
                Ok(alloc(c, buffer))
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioContext_createBufferSource",
        |mut caller: Caller<'_, S>, ctx: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "AudioContext.createBufferSource", |c| {
                let source = with_context(c, ctx, "createBufferSource", |a| a.create_buffer_source())??;
                Ok(alloc(c, source))
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioContext_resume",
        |mut caller: Caller<'_, S>, ctx: u32| -> wasmtime::Result<u32> {
            let result = with_context(&caller, ctx, "resume", |c| c.resume())?;
            Ok(settle(&mut caller, result.map(|()| HostValue::Undefined)))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioContext_close",
        |mut caller: Caller<'_, S>, ctx: u32| -> wasmtime::Result<u32> {
            let result = with_context(&caller, ctx, "close", |c| c.close())?;
            Ok(settle(&mut caller, result.map(|()| HostValue::Undefined)))
        },
    )?;

    Ok(())
}

fn register_nodes<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    // Returns the destination so calls can be chained
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioNode_connect",
        |mut caller: Caller<'_, S>, node: u32, dest: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "AudioNode.connect", |c| {
                let destination = object(c, dest, "AudioNode", "connect")?;
                with_node(c, node, "connect", |n| n.connect(&destination))??;
                Ok(alloc(c, destination))
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioNode_channelCount",
        |caller: Caller<'_, S>, node: u32| -> wasmtime::Result<u32> {
            Ok(with_node(&caller, node, "channelCount", |n| n.channel_count())?)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioNode_setChannelCount",
        |mut caller: Caller<'_, S>, node: u32, count: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "AudioNode.channelCount", |c| {
                with_node(c, node, "channelCount", |n| n.set_channel_count(count))??;
                Ok(())
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioNode_maxChannelCount",
        |caller: Caller<'_, S>, node: u32| -> wasmtime::Result<u32> {
            Ok(with_node(&caller, node, "maxChannelCount", |n| n.max_channel_count())?)
        },
    )?;

    Ok(())
}

fn register_buffers<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioBuffer_numberOfChannels",
        |caller: Caller<'_, S>, buf: u32| -> wasmtime::Result<u32> {
            Ok(with_buffer(&caller, buf, "numberOfChannels", |b| b.number_of_channels())?)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioBuffer_length",
        |caller: Caller<'_, S>, buf: u32| -> wasmtime::Result<u32> {
            Ok(with_buffer(&caller, buf, "length", |b| b.length())?)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioBuffer_sampleRate",
        |caller: Caller<'_, S>, buf: u32| -> wasmtime::Result<f32> {
            Ok(with_buffer(&caller, buf, "sampleRate", |b| b.sample_rate())?)
        },
    )?;

    // Samples are read straight out of guest memory (`Float32Array` view)
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioBuffer_copyToChannel",
        |mut caller: Caller<'_, S>, buf: u32, ptr: u32, len: u32, channel: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "AudioBuffer.copyToChannel", |c| {
                let samples = read_f32_array(&mut *c, ptr, len)?;
                with_buffer(c, buf, "copyToChannel", |b| b.copy_to_channel(&samples, channel))??;
                Ok(())
            })
        },
    )?;

    // Channel data is copied into a guest allocation; the slot receives
    // `(ptr, sample_count)`
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioBuffer_getChannelData",
        |mut caller: Caller<'_, S>, ret: u32, buf: u32, channel: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "AudioBuffer.getChannelData", |c| {
                let samples = with_buffer(c, buf, "getChannelData", |b| b.channel_data(channel))??;
                let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                write_deferred_bytes(c, ret, &bytes, 4)
            })
        },
    )?;

    Ok(())
}

fn register_sources<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioBufferSourceNode_buffer",
        |mut caller: Caller<'_, S>, src: u32| -> wasmtime::Result<u32> {
            let obj = source_of(&caller, src, "buffer")?;
            let buffer = obj.as_audio_buffer_source().and_then(|s| s.buffer());
            Ok(alloc_optional(&mut caller, buffer))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioBufferSourceNode_setBuffer",
        |caller: Caller<'_, S>, src: u32, buf: u32| -> wasmtime::Result<()> {
            let obj = source_of(&caller, src, "buffer")?;
            if let Some(source) = obj.as_audio_buffer_source() {
                source.set_buffer(optional_object(&caller, buf));
            }
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioBufferSourceNode_onended",
        |mut caller: Caller<'_, S>, src: u32| -> wasmtime::Result<u32> {
            let obj = source_of(&caller, src, "onended")?;
            let handler = obj.as_audio_buffer_source().and_then(|s| s.onended());
            Ok(alloc_optional(&mut caller, handler))
        },
    )?;

    // Anything that is not a function clears the handler
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioBufferSourceNode_setOnended",
        |caller: Caller<'_, S>, src: u32, cb: u32| -> wasmtime::Result<()> {
            let obj = source_of(&caller, src, "onended")?;
            let handler = value(&caller, cb)
                .as_object()
                .filter(|o| o.as_closure().is_some())
                .cloned();
            if let Some(source) = obj.as_audio_buffer_source() {
                source.set_onended(handler);
            }
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_AudioBufferSourceNode_start",
        |mut caller: Caller<'_, S>, src: u32, when: f64| -> wasmtime::Result<()> {
            handled(&mut caller, "AudioBufferSourceNode.start", |c| {
                let obj = source_of(c, src, "start")?;
                let Some(source) = obj.as_audio_buffer_source() else {
                    return Ok(());
                };
                let ends_in = source.start(when)?;
                if let (Some(seconds), Some(handler)) = (ends_in, source.onended()) {
                    let token = match closure::retain(&handler) {
                        Ok(token) => token,
                        Err(BridgeError::Closure(message)) => {
                            warn!("onended not scheduled: {}", message);
                            return Ok(());
                        }
                        Err(other) => return Err(other),
                    };
                    let ended = InputEvent::plain("ended");
                    if let Some(event) = ended.as_event() {
                        event.set_target(obj.clone());
                    }
                    let id = c.data_mut().bridge_mut().event_loop.set_timeout(
                        token,
                        HostValue::Object(ended),
                        seconds * 1000.0,
                    );
                    debug!("source ends in {:.3}s (timer {})", seconds, id);
                }
                Ok(())
            })
        },
    )?;

    Ok(())
}
