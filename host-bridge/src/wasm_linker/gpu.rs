//! WebGPU Host Functions
//!
//! Adapter and device requests, `mapAsync` and `popErrorScope` return
//! promises; validation failures surface through error scopes, not throws.
//! Sizes and offsets travel as `f64` since they may exceed 32 bits.

use super::helpers::{
    alloc, alloc_optional, byte_count, handled, object, require, settle, string_arg, value,
    IMPORT_MODULE,
};
use super::state::WasmStateCore;
use crate::capability::{GpuBuffer, GpuBufferDescriptor, GpuCommandEncoder, GpuDevice};
use crate::codec::{read_bytes, write_bytes, write_deferred_string};
use crate::error::BridgeResult;
use crate::platform::{GpuErrorObject, DEFAULT_GPU_LIMITS};
use crate::value::{HostException, HostValue, ObjectRef};
use tracing::debug;
use wasmtime::{Caller, Linker};

fn with_device<S: WasmStateCore, R>(
    caller: &Caller<'_, S>,
    idx: u32,
    member: &str,
    f: impl FnOnce(&dyn GpuDevice) -> R,
) -> BridgeResult<R> {
    let obj = object(caller, idx, "GPUDevice", member)?;
    Ok(f(require(&obj, |o| o.as_gpu_device(), "GPUDevice", member)?))
}

fn with_buffer<S: WasmStateCore, R>(
    caller: &Caller<'_, S>,
    idx: u32,
    member: &str,
    f: impl FnOnce(&dyn GpuBuffer) -> R,
) -> BridgeResult<R> {
    let obj = object(caller, idx, "GPUBuffer", member)?;
    Ok(f(require(&obj, |o| o.as_gpu_buffer(), "GPUBuffer", member)?))
}

fn with_encoder<S: WasmStateCore, R>(
    caller: &Caller<'_, S>,
    idx: u32,
    member: &str,
    f: impl FnOnce(&dyn GpuCommandEncoder) -> R,
) -> BridgeResult<R> {
    let obj = object(caller, idx, "GPUCommandEncoder", member)?;
    Ok(f(require(&obj, |o| o.as_gpu_command_encoder(), "GPUCommandEncoder", member)?))
}

fn map_async<S: WasmStateCore>(
    caller: &mut Caller<'_, S>,
    buf: u32,
    mode: u32,
    offset: u64,
    size: Option<u64>,
) -> BridgeResult<u32> {
    let result = with_buffer(caller, buf, "mapAsync", |b| b.map_async(mode, offset, size))?;
    Ok(settle(caller, result.map(|()| HostValue::Undefined)))
}

/// Register all GPU functions with the linker
pub fn register_functions<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    register_adapter(linker)?;
    register_limits(linker)?;
    register_device(linker)?;
    register_buffer(linker)?;
    register_commands(linker)?;
    Ok(())
}

fn register_adapter<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Navigator_gpu",
        |mut caller: Caller<'_, S>, nav: u32| -> wasmtime::Result<u32> {
            let obj = object(&caller, nav, "Navigator", "gpu")?;
            let gpu = require(&obj, |o| o.as_navigator(), "Navigator", "gpu")?.gpu();
            Ok(alloc_optional(&mut caller, gpu))
        },
    )?;

    // Resolves with `null` when no adapter is available
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Gpu_requestAdapter",
        |mut caller: Caller<'_, S>, gpu: u32, options: u32| -> wasmtime::Result<u32> {
            let options = value(&caller, options);
            let obj = object(&caller, gpu, "GPU", "requestAdapter")?;
            let adapter = require(&obj, |o| o.as_gpu(), "GPU", "requestAdapter")?.request_adapter(&options);
            debug!("GPU adapter requested (available: {})", adapter.is_some());
            Ok(settle(&mut caller, Ok(adapter.into())))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuAdapter_requestDevice",
        |mut caller: Caller<'_, S>, adapter: u32, descriptor: u32| -> wasmtime::Result<u32> {
            let descriptor = value(&caller, descriptor);
            let obj = object(&caller, adapter, "GPUAdapter", "requestDevice")?;
            let device = require(&obj, |o| o.as_gpu_adapter(), "GPUAdapter", "requestDevice")?
                .request_device(&descriptor);
            Ok(settle(&mut caller, device.map(HostValue::Object)))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuAdapter_limits",
        |mut caller: Caller<'_, S>, adapter: u32| -> wasmtime::Result<u32> {
            let obj = object(&caller, adapter, "GPUAdapter", "limits")?;
            let limits = require(&obj, |o| o.as_gpu_adapter(), "GPUAdapter", "limits")?.limits();
            Ok(alloc(&mut caller, limits))
        },
    )?;

    Ok(())
}

// One getter per `GPUSupportedLimits` member
fn register_limits<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    for &(name, _) in DEFAULT_GPU_LIMITS {
        linker.func_wrap(
            IMPORT_MODULE,
            &format!("__wbg_GpuSupportedLimits_{}", name),
            move |caller: Caller<'_, S>, limits: u32| -> wasmtime::Result<f64> {
                let obj = object(&caller, limits, "GPUSupportedLimits", name)?;
                Ok(obj.get(name).and_then(|v| v.as_number()).unwrap_or(f64::NAN))
            },
        )?;
    }
    Ok(())
}

fn register_device<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuDevice_limits",
        |mut caller: Caller<'_, S>, dev: u32| -> wasmtime::Result<u32> {
            let limits = with_device(&caller, dev, "limits", |d| d.limits())?;
            Ok(alloc(&mut caller, limits))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuDevice_queue",
        |mut caller: Caller<'_, S>, dev: u32| -> wasmtime::Result<u32> {
            let queue = with_device(&caller, dev, "queue", |d| d.queue())?;
            Ok(alloc(&mut caller, queue))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuDevice_createBuffer",
        |mut caller: Caller<'_, S>, dev: u32, descriptor: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "GPUDevice.createBuffer", |c| {
                let descriptor = GpuBufferDescriptor::from_value(&value(c, descriptor))?;
                let buffer = with_device(c, dev, "createBuffer", |d| d.create_buffer(&descriptor))??;
                Ok(alloc(c, buffer))
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuDevice_createCommandEncoder",
        |mut caller: Caller<'_, S>, dev: u32| -> wasmtime::Result<u32> {
            let encoder = with_device(&caller, dev, "createCommandEncoder", |d| d.create_command_encoder())?;
            Ok(alloc(&mut caller, encoder))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuDevice_pushErrorScope",
        |mut caller: Caller<'_, S>, dev: u32, ptr: u32, len: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "GPUDevice.pushErrorScope", |c| {
                let filter = string_arg(c, ptr, len)?;
                with_device(c, dev, "pushErrorScope", |d| d.push_error_scope(&filter))??;
                Ok(())
            })
        },
    )?;

    // Resolves with the captured error, or `null` when the scope stayed clean
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuDevice_popErrorScope",
        |mut caller: Caller<'_, S>, dev: u32| -> wasmtime::Result<u32> {
            let popped = with_device(&caller, dev, "popErrorScope", |d| d.pop_error_scope())?;
            Ok(settle(&mut caller, popped.map(|error| error.map_or(HostValue::Null, HostValue::Object))))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuDevice_destroy",
        |caller: Caller<'_, S>, dev: u32| -> wasmtime::Result<()> {
            Ok(with_device(&caller, dev, "destroy", |d| d.destroy())?)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuError_message",
        |mut caller: Caller<'_, S>, ret: u32, err: u32| -> wasmtime::Result<()> {
            let obj = object(&caller, err, "GPUError", "message")?;
            let message = obj
                .downcast_ref::<GpuErrorObject>()
                .map(|e| e.message().to_string())
                .ok_or_else(|| HostException::illegal_invocation("GPUError", "message"))?;
            write_deferred_string(&mut caller, ret, &message)?;
            Ok(())
        },
    )?;

    Ok(())
}

fn register_buffer<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuBuffer_size",
        |caller: Caller<'_, S>, buf: u32| -> wasmtime::Result<f64> {
            Ok(with_buffer(&caller, buf, "size", |b| b.size() as f64)?)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuBuffer_usage",
        |caller: Caller<'_, S>, buf: u32| -> wasmtime::Result<u32> {
            Ok(with_buffer(&caller, buf, "usage", |b| b.usage())?)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuBuffer_mapAsync",
        |mut caller: Caller<'_, S>, buf: u32, mode: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "GPUBuffer.mapAsync", |c| map_async(c, buf, mode, 0, None))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuBuffer_mapAsync_with_range",
        |mut caller: Caller<'_, S>, buf: u32, mode: u32, offset: f64, size: f64| -> wasmtime::Result<u32> {
            handled(&mut caller, "GPUBuffer.mapAsync", |c| {
                let offset = byte_count(offset, "offset")?;
                let size = byte_count(size, "size")?;
                map_async(c, buf, mode, offset, Some(size))
            })
        },
    )?;

    // Copies `dst_len` bytes of the mapped range into guest memory
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuBuffer_readMappedRange",
        |mut caller: Caller<'_, S>, buf: u32, offset: f64, dst_ptr: u32, dst_len: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "GPUBuffer.getMappedRange", |c| {
                let offset = byte_count(offset, "offset")?;
                let bytes = with_buffer(c, buf, "getMappedRange", |b| {
                    b.mapped_range(offset, Some(u64::from(dst_len)))
                })??;
                write_bytes(c, dst_ptr, &bytes)
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuBuffer_unmap",
        |caller: Caller<'_, S>, buf: u32| -> wasmtime::Result<()> {
            Ok(with_buffer(&caller, buf, "unmap", |b| b.unmap())?)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuBuffer_destroy",
        |caller: Caller<'_, S>, buf: u32| -> wasmtime::Result<()> {
            Ok(with_buffer(&caller, buf, "destroy", |b| b.destroy())?)
        },
    )?;

    Ok(())
}

fn register_commands<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuQueue_writeBuffer",
        |mut caller: Caller<'_, S>, queue: u32, buf: u32, offset: f64, ptr: u32, len: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "GPUQueue.writeBuffer", |c| {
                let offset = byte_count(offset, "bufferOffset")?;
                let data = read_bytes(&mut *c, ptr, len)?;
                let target = object(c, buf, "GPUBuffer", "writeBuffer")?;
                let obj = object(c, queue, "GPUQueue", "writeBuffer")?;
                require(&obj, |o| o.as_gpu_queue(), "GPUQueue", "writeBuffer")?
                    .write_buffer(&target, offset, &data);
                Ok(())
            })
        },
    )?;

    // The command buffers arrive as a host array
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuQueue_submit",
        |mut caller: Caller<'_, S>, queue: u32, buffers: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "GPUQueue.submit", |c| {
                let list = object(c, buffers, "Array", "submit")?;
                let items: Vec<ObjectRef> = list
                    .as_array()
                    .ok_or_else(|| HostException::type_error("GPUQueue.submit: expected a sequence"))?
                    .to_vec()
                    .into_iter()
                    .filter_map(|v| v.as_object().cloned())
                    .collect();
                let obj = object(c, queue, "GPUQueue", "submit")?;
                require(&obj, |o| o.as_gpu_queue(), "GPUQueue", "submit")?.submit(&items);
                Ok(())
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuCommandEncoder_copyBufferToBuffer",
        |mut caller: Caller<'_, S>,
         enc: u32,
         src: u32,
         src_offset: f64,
         dst: u32,
         dst_offset: f64,
         size: f64|
         -> wasmtime::Result<()> {
            handled(&mut caller, "GPUCommandEncoder.copyBufferToBuffer", |c| {
                let src_offset = byte_count(src_offset, "sourceOffset")?;
                let dst_offset = byte_count(dst_offset, "destinationOffset")?;
                let size = byte_count(size, "size")?;
                let source = object(c, src, "GPUBuffer", "copyBufferToBuffer")?;
                let destination = object(c, dst, "GPUBuffer", "copyBufferToBuffer")?;
                with_encoder(c, enc, "copyBufferToBuffer", |e| {
                    e.copy_buffer_to_buffer(&source, src_offset, &destination, dst_offset, size)
                })?;
                Ok(())
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_GpuCommandEncoder_finish",
        |mut caller: Caller<'_, S>, enc: u32| -> wasmtime::Result<u32> {
            handled(&mut caller, "GPUCommandEncoder.finish", |c| {
                let command_buffer = with_encoder(c, enc, "finish", |e| e.finish())??;
                Ok(alloc(c, command_buffer))
            })
        },
    )?;

    Ok(())
}
