//! Host side of a bindgen-style bridge between a WebAssembly guest and the
//! capabilities it imports.
//!
//! The guest only ever sees integers: handles into the [`table`], pointers and
//! lengths into its own linear memory, and numbers. Everything in this crate
//! turns those integers back into host values and host calls, and back again.

pub mod capability;
pub mod closure;
pub mod codec;
pub mod context;
pub mod error;
pub mod event_loop;
pub mod exception;
pub mod platform;
pub mod table;
pub mod value;
pub mod views;
pub mod wasm_linker;

pub use capability::HostResult;
pub use closure::{ClosureRecord, ClosureToken, GuestClosure};
pub use context::{BridgeContext, ExportNames, GuestExports};
pub use error::{BridgeError, BridgeResult};
pub use event_loop::{EventLoop, LoopStats, PromiseObject, PromiseState, VirtualClock};
pub use platform::{HeadlessConfig, Platform};
pub use table::ExternrefTable;
pub use value::{ArrayObject, HostException, HostObject, HostValue, ObjectRef, PlainObject};
pub use views::{MemoryViewCache, ViewKind};
pub use wasm_linker::{
    // Linker creation
    create_linker, register_all_functions,
    // Core types and trait
    WasmState, WasmStateCore, IMPORT_MODULE,
};
