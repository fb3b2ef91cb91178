//! Scalar/String Codec
//!
//! Moves strings, numbers, booleans and arrays across the linear-memory
//! boundary.
//!
//! # Strings into the guest
//!
//! [`pass_string`] allocates with the guest's `malloc(size, 1)` and returns
//! the pointer; the byte length goes into the context's length register,
//! read back with [`take_vector_len`]. With a `realloc` export the host
//! first assumes one byte per UTF-16 code unit, copies the ASCII prefix, and
//! only on the first non-ASCII unit grows the buffer to
//! `prefix + remaining_units * 3` bytes (the UTF-8 worst case).
//!
//! # Out-slots
//!
//! Guest-allocated slots the host fills in:
//!
//! - deferred string: `[ptr: i32, len: i32]`
//! - optional number: `[present: i32, _pad: i32, value: f64]`
//!
//! Booleans come back as a tri-state `u32` (`0`, `1`, `2` = not a boolean).

use crate::error::{BridgeError, BridgeResult};
use crate::value::HostValue;
use crate::views::with_view;
use crate::wasm_linker::WasmStateCore;
use tracing::{debug, error, trace};
use wasmtime::AsContextMut;

/// Size in bytes of a deferred `(ptr, len)` slot
pub const DEFERRED_SLOT_SIZE: u32 = 8;

/// Decode `[ptr, ptr + len)` as strict UTF-8
pub fn decode_utf8(bytes: &[u8], ptr: u32, len: u32) -> BridgeResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|source| BridgeError::Decode { ptr, len, source })
}

/// Read a guest string without taking ownership of it
pub fn read_string<S: WasmStateCore>(
    ctx: impl AsContextMut<Data = S>,
    ptr: u32,
    len: u32,
) -> BridgeResult<String> {
    if len == 0 {
        return Ok(String::new());
    }
    with_view::<S, u8, _>(ctx, |view| {
        let bytes = view.bytes(ptr, len)?;
        decode_utf8(bytes, ptr, len)
    })?
}

/// Read a guest-owned deferred string and release it with the guest's
/// `free(ptr, len, 1)`, whether or not decoding succeeded
pub fn take_string<S: WasmStateCore>(
    mut ctx: impl AsContextMut<Data = S>,
    ptr: u32,
    len: u32,
) -> BridgeResult<String> {
    let decoded = read_string(&mut ctx, ptr, len);
    let freed = guest_free(&mut ctx, ptr, len, 1);
    let value = decoded?;
    freed?;
    Ok(value)
}

/// Allocate through the guest allocator
pub fn guest_malloc<S: WasmStateCore>(
    mut ctx: impl AsContextMut<Data = S>,
    size: u32,
    align: u32,
) -> BridgeResult<u32> {
    let malloc = ctx.as_context().data().bridge().exports()?.malloc.clone();
    let ptr = malloc.call(&mut ctx, (size, align))?;
    if ptr == 0 && size != 0 {
        error!("guest malloc({}, {}) returned null", size, align);
        return Err(BridgeError::AllocationFailure {
            size,
            align,
            ptr: ptr as i32,
        });
    }
    trace!("guest malloc({}, {}) = {}", size, align, ptr);
    Ok(ptr)
}

/// Release guest memory
pub fn guest_free<S: WasmStateCore>(
    mut ctx: impl AsContextMut<Data = S>,
    ptr: u32,
    len: u32,
    align: u32,
) -> BridgeResult<()> {
    if ptr == 0 && len == 0 {
        return Ok(());
    }
    let free = ctx.as_context().data().bridge().exports()?.free.clone();
    free.call(&mut ctx, (ptr, len, align))?;
    Ok(())
}

/// Encode `value` into freshly allocated guest memory.
///
/// Returns the pointer; the written length is left in the length register.
pub fn pass_string<S: WasmStateCore>(
    mut ctx: impl AsContextMut<Data = S>,
    value: &str,
) -> BridgeResult<u32> {
    let realloc = ctx.as_context().data().bridge().exports()?.realloc.clone();
    let bytes = value.as_bytes();

    let Some(realloc) = realloc else {
        let len = bytes.len() as u32;
        let ptr = guest_malloc(&mut ctx, len, 1)?;
        write_bytes(&mut ctx, ptr, bytes)?;
        ctx.as_context_mut().data_mut().bridge_mut().set_vector_len(len);
        return Ok(ptr);
    };

    let units = value.encode_utf16().count() as u32;
    let mut ptr = guest_malloc(&mut ctx, units, 1)?;

    let ascii = bytes.iter().take_while(|b| b.is_ascii()).count();
    write_bytes(&mut ctx, ptr, &bytes[..ascii])?;
    let mut written = ascii as u32;

    if ascii < bytes.len() {
        let rest = &value[ascii..];
        let grown = written + rest.encode_utf16().count() as u32 * 3;
        let new_ptr = realloc.call(&mut ctx, (ptr, units, grown, 1))?;
        if new_ptr == 0 {
            error!("guest realloc({}, {}, {}, 1) returned null", ptr, units, grown);
            return Err(BridgeError::AllocationFailure {
                size: grown,
                align: 1,
                ptr: new_ptr as i32,
            });
        }
        ptr = new_ptr;
        write_bytes(&mut ctx, ptr + written, rest.as_bytes())?;
        written += rest.len() as u32;
        debug!(
            "pass_string: non-ASCII at {}, buffer {} -> {} bytes, wrote {}",
            ascii, units, grown, written
        );
    }

    ctx.as_context_mut()
        .data_mut()
        .bridge_mut()
        .set_vector_len(written);
    Ok(ptr)
}

/// Read and clear the length register left by [`pass_string`]
pub fn take_vector_len<S: WasmStateCore>(
    mut ctx: impl AsContextMut<Data = S>,
) -> BridgeResult<u32> {
    ctx.as_context_mut()
        .data_mut()
        .bridge_mut()
        .take_vector_len()
        .ok_or_else(|| BridgeError::memory("length register read before any string was passed"))
}

/// Populate a deferred `(ptr, len)` slot
pub fn write_deferred_slot<S: WasmStateCore>(
    ctx: impl AsContextMut<Data = S>,
    slot: u32,
    ptr: u32,
    len: u32,
) -> BridgeResult<()> {
    with_view::<S, i32, _>(ctx, |view| {
        view.write_slice((slot / 4) as usize, &[ptr as i32, len as i32])
    })?
}

/// Encode `value` and publish it through a deferred slot
pub fn write_deferred_string<S: WasmStateCore>(
    mut ctx: impl AsContextMut<Data = S>,
    slot: u32,
    value: &str,
) -> BridgeResult<()> {
    let ptr = pass_string(&mut ctx, value)?;
    let len = take_vector_len(&mut ctx)?;
    write_deferred_slot(ctx, slot, ptr, len)
}

/// Publish an optional string; `None` writes `(0, 0)`
pub fn write_optional_string<S: WasmStateCore>(
    ctx: impl AsContextMut<Data = S>,
    slot: u32,
    value: Option<&str>,
) -> BridgeResult<()> {
    match value {
        Some(s) => write_deferred_string(ctx, slot, s),
        None => write_deferred_slot(ctx, slot, 0, 0),
    }
}

/// Read a deferred slot back (host-side tests and tooling)
pub fn read_deferred_slot<S: WasmStateCore>(
    ctx: impl AsContextMut<Data = S>,
    slot: u32,
) -> BridgeResult<(u32, u32)> {
    let words = with_view::<S, i32, _>(ctx, |view| view.to_vec((slot / 4) as usize, 2))??;
    Ok((words[0] as u32, words[1] as u32))
}

/// Fill an optional-number slot: presence flag at word 0, value at byte 8
pub fn write_number_out<S: WasmStateCore>(
    mut ctx: impl AsContextMut<Data = S>,
    slot: u32,
    value: Option<f64>,
) -> BridgeResult<()> {
    with_view::<S, f64, _>(&mut ctx, |view| {
        view.set((slot / 8 + 1) as usize, value.unwrap_or(0.0))
    })??;
    with_view::<S, i32, _>(ctx, |view| {
        view.set((slot / 4) as usize, value.is_some() as i32)
    })?
}

pub fn decode_number_out<S: WasmStateCore>(
    mut ctx: impl AsContextMut<Data = S>,
    slot: u32,
) -> BridgeResult<Option<f64>> {
    let present = with_view::<S, i32, _>(&mut ctx, |view| view.get((slot / 4) as usize))?;
    let value = with_view::<S, f64, _>(ctx, |view| view.get((slot / 8 + 1) as usize))?;
    match (present, value) {
        (Some(0), Some(_)) => Ok(None),
        (Some(_), Some(v)) => Ok(Some(v)),
        _ => Err(BridgeError::memory(format!("number slot {} out of bounds", slot))),
    }
}

/// Boolean result encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BoolTriState {
    False = 0,
    True = 1,
    NotBoolean = 2,
}

impl From<&HostValue> for BoolTriState {
    fn from(value: &HostValue) -> Self {
        match value.as_bool() {
            Some(true) => Self::True,
            Some(false) => Self::False,
            None => Self::NotBoolean,
        }
    }
}

pub fn decode_boolean_out(raw: u32) -> Option<bool> {
    match raw {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}

/// Copy `len` bytes out of guest memory
pub fn read_bytes<S: WasmStateCore>(
    ctx: impl AsContextMut<Data = S>,
    ptr: u32,
    len: u32,
) -> BridgeResult<Vec<u8>> {
    with_view::<S, u8, _>(ctx, |view| view.bytes(ptr, len).map(<[u8]>::to_vec))?
}

/// Copy bytes into guest memory at `ptr`
pub fn write_bytes<S: WasmStateCore>(
    ctx: impl AsContextMut<Data = S>,
    ptr: u32,
    data: &[u8],
) -> BridgeResult<()> {
    if data.is_empty() {
        return Ok(());
    }
    with_view::<S, u8, _>(ctx, |view| view.write_slice(ptr as usize, data))?
}

/// `len` u32 elements starting at byte address `ptr`
pub fn read_u32_array<S: WasmStateCore>(
    ctx: impl AsContextMut<Data = S>,
    ptr: u32,
    len: u32,
) -> BridgeResult<Vec<u32>> {
    with_view::<S, u32, _>(ctx, |view| view.to_vec((ptr / 4) as usize, len as usize))?
}

/// `len` f32 elements starting at byte address `ptr`
pub fn read_f32_array<S: WasmStateCore>(
    ctx: impl AsContextMut<Data = S>,
    ptr: u32,
    len: u32,
) -> BridgeResult<Vec<f32>> {
    with_view::<S, f32, _>(ctx, |view| view.to_vec((ptr / 4) as usize, len as usize))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8_rejects_invalid_bytes() {
        assert_eq!(decode_utf8("héllo".as_bytes(), 8, 6).unwrap(), "héllo");
        let err = decode_utf8(&[0x68, 0xff, 0x69], 16, 3).unwrap_err();
        match err {
            BridgeError::Decode { ptr, len, .. } => {
                assert_eq!(ptr, 16);
                assert_eq!(len, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_read_needs_no_memory() {
        let engine = wasmtime::Engine::default();
        let mut store = wasmtime::Store::new(&engine, crate::wasm_linker::WasmState::default());

        assert_eq!(read_string(&mut store, u32::MAX, 0).unwrap(), "");
        assert!(read_string(&mut store, u32::MAX, 1).is_err());
        assert_eq!(store.data().bridge.views.rebuilds(), 0);
    }

    #[test]
    fn test_bool_tristate() {
        assert_eq!(BoolTriState::from(&HostValue::Bool(true)) as u32, 1);
        assert_eq!(BoolTriState::from(&HostValue::Bool(false)) as u32, 0);
        assert_eq!(BoolTriState::from(&HostValue::Number(1.0)) as u32, 2);
        assert_eq!(decode_boolean_out(2), None);
        assert_eq!(decode_boolean_out(1), Some(true));
    }
}
