//! Guest Bridge
//!
//! Host runtime that loads a WebAssembly guest and bridges it to host
//! capabilities through a bindgen-style calling convention.
//!
//! # Overview
//!
//! The guest owns a private linear memory and can only hand the host
//! integers. Guest Bridge provides:
//!
//! - **Module Loader**: byte, streaming-response, URL and pre-compiled
//!   sources, with a streaming structural parse and a buffered fallback
//! - **Linker Composition**: the whole `wbg` import surface from host-bridge,
//!   checked against the guest's imports before instantiation
//! - **Guest Instance**: entry-point calls with trap translation, string
//!   marshalling, and the host event loop (timers, frames, input events)
//!
//! # Architecture
//!
//! ```text
//!   Module source
//!        │
//!        ▼
//! ┌─────────────┐
//! │   Loader    │──► fetch, stream-parse, compile
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │   Linker    │──► host-bridge `wbg` surface
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │   Guest     │──► start export, entry points
//! │  Instance   │◄── reference table, closures, exceptions
//! └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use guest_bridge::{BridgeConfig, Loader, ModuleSource};
//!
//! #[tokio::main]
//! async fn main() -> guest_bridge::RuntimeResult<()> {
//!     let loader = Loader::new(BridgeConfig::default().with_module_name("app"));
//!     let instance = loader.init(ModuleSource::Default).await?;
//!
//!     let mut guest = instance.lock();
//!     guest.call("run")?;
//!     guest.animation_frame()?;
//!     Ok(())
//! }
//! ```
//!
//! # Guest Module Requirements
//!
//! Guest modules must:
//!
//! 1. Import host functions from the `wbg` namespace only
//! 2. Export `memory`, `__wbindgen_malloc(size, align)` and
//!    `__wbindgen_free(ptr, size, align)`
//! 3. Optionally export `__wbindgen_realloc`, `__indirect_function_table`,
//!    `__wbindgen_exn_store` and `__wbindgen_start`

pub mod bridge;
pub mod config;
pub mod error;
pub mod instance;
pub mod loader;

// Re-exports for convenience
pub use config::BridgeConfig;
pub use error::{RuntimeError, RuntimeResult};
pub use instance::{GuestInstance, GuestState, SharedGuestInstance};
pub use loader::{
    ByteStream, FileFetcher, Loader, LoaderState, ModuleFetcher, ModuleSource, StreamingResponse,
    WASM_CONTENT_TYPE,
};

// Re-export host-bridge types embedders configure or inspect
pub use host_bridge::{ExportNames, HeadlessConfig, HostException, HostValue, ObjectRef};

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runtime name
pub const NAME: &str = "Guest Bridge";

/// Print version information
pub fn print_version() {
    println!("{} v{}", NAME, VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "Guest Bridge");
    }
}
