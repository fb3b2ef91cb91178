//! Crypto Host Functions
//!
//! `crypto.getRandomValues` fills a guest byte range in place. Oversized
//! requests are refused before any host buffer is allocated.

use super::helpers::{handled, object, require, IMPORT_MODULE};
use super::state::WasmStateCore;
use crate::codec::write_bytes;
use crate::error::BridgeResult;
use wasmtime::{Caller, Linker};

/// Register all crypto functions with the linker
pub fn register_functions<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "__wbg_Crypto_getRandomValues",
        |mut caller: Caller<'_, S>, crypto: u32, ptr: u32, len: u32| -> wasmtime::Result<()> {
            handled(&mut caller, "Crypto.getRandomValues", |c| {
                let obj = object(c, crypto, "Crypto", "getRandomValues")?;
                let source = require(&obj, |o| o.as_crypto(), "Crypto", "getRandomValues")?;
                source.check_quota(len as usize)?;
                let mut buf = vec![0u8; len as usize];
                source.get_random_values(&mut buf)?;
                write_bytes(c, ptr, &buf)
            })
        },
    )?;

    Ok(())
}
