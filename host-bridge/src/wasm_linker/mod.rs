//! WASM Linker Host Functions
//!
//! Provides every host function a bindgen-style guest imports from the
//! `wbg` module. This module creates wasmtime-compatible host function
//! bindings.
//!
//! ## Generic Architecture
//!
//! All registration functions are generic over `WasmStateCore`, allowing any
//! runtime (CLI, test harness, embedder) to use them with its own state type.
//!
//! ## Host Function Groups
//!
//! ### Intrinsics (`__wbindgen_*`)
//! - Reference table: init, drop, clone
//! - Value boxing and type checks: strings, numbers, booleans, `typeof` checks
//! - Exceptions: throw, rethrow, exn_take
//! - Closures: closure_new, cb_drop
//!
//! ### Capability surface (`__wbg_<Interface>_<member>`)
//! - Reflection: Object, Array, Reflect, Function, Error
//! - Console and Performance
//! - DOM: Window, Navigator, Document, Element, style, canvas, media queries
//! - Input events: keyboard, mouse, pointer, wheel
//! - Timers, animation frames, microtasks and promises
//! - Web Audio
//! - WebGPU
//! - Crypto

mod state;
mod helpers;
mod intrinsics;
mod reflect;
mod console;
mod dom;
mod events;
mod timers;
mod audio;
mod gpu;
mod crypto;

// Re-export core types
pub use helpers::IMPORT_MODULE;
pub use state::{WasmState, WasmStateCore};

use crate::error::BridgeResult;
use wasmtime::{Engine, Linker};

/// Register all bridge host functions with a linker
///
/// This is the main entry point for any runtime. It registers:
/// - Bindgen intrinsics (reference table, values, exceptions, closures)
/// - Reflection helpers (Object, Array, Reflect, Function, Error)
/// - Console, Performance and Date
/// - DOM and input events
/// - Timers and promises
/// - Web Audio, WebGPU and Crypto
///
/// # Type Parameter
///
/// `S` must implement `WasmStateCore` which provides access to the bridge context.
///
/// # Example
///
/// ```ignore
/// use host_bridge::wasm_linker::{register_all_functions, WasmState};
/// use wasmtime::{Engine, Linker};
///
/// let engine = Engine::default();
/// let mut linker = Linker::<WasmState>::new(&engine);
/// register_all_functions(&mut linker)?;
/// ```
pub fn register_all_functions<S: WasmStateCore>(linker: &mut Linker<S>) -> BridgeResult<()> {
    // Core functions
    intrinsics::register_functions(linker)?;
    reflect::register_functions(linker)?;
    console::register_functions(linker)?;

    // Capability surface
    dom::register_functions(linker)?;
    events::register_functions(linker)?;
    timers::register_functions(linker)?;
    audio::register_functions(linker)?;
    gpu::register_functions(linker)?;
    crypto::register_functions(linker)?;

    Ok(())
}

/// Create a fully configured linker with all host functions
///
/// Convenience function that creates a new linker and registers all functions.
/// Uses the default `WasmState` type from host-bridge.
pub fn create_linker(engine: &Engine) -> BridgeResult<Linker<WasmState>> {
    let mut linker = Linker::new(engine);
    register_all_functions(&mut linker)?;
    Ok(linker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::{Module, Store};

    #[test]
    fn test_create_linker() {
        let engine = Engine::default();
        let linker = create_linker(&engine);
        assert!(linker.is_ok());
    }

    // --- Registry TOML types ---

    #[derive(serde::Deserialize)]
    struct Registry {
        meta: RegistryMeta,
        functions: Vec<FunctionEntry>,
    }

    #[derive(serde::Deserialize)]
    struct RegistryMeta {
        #[allow(dead_code)]
        version: String,
        module: String,
    }

    #[derive(serde::Deserialize)]
    struct FunctionEntry {
        name: String,
        #[allow(dead_code)]
        group: String,
        params: Vec<String>,
        returns: String,
    }

    fn wasm_type(t: &str) -> Option<&'static str> {
        match t {
            "void" => None,
            "u32" | "i32" => Some("i32"),
            "f32" => Some("f32"),
            "f64" => Some("f64"),
            other => panic!("Unknown type in registry: '{}'", other),
        }
    }

    fn generate_wat_import(module: &str, name: &str, params: &[String], returns: &str) -> String {
        let mut import = format!("  (import \"{}\" \"{}\" (func", module, name);

        let wasm_params: Vec<&str> = params.iter().filter_map(|t| wasm_type(t)).collect();

        if !wasm_params.is_empty() {
            import.push_str(" (param");
            for p in &wasm_params {
                import.push_str(&format!(" {}", p));
            }
            import.push(')');
        }

        if let Some(ret) = wasm_type(returns) {
            import.push_str(&format!(" (result {})", ret));
        }

        import.push_str("))\n");
        import
    }

    fn load_registry() -> Registry {
        let registry_path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("registry/surface.toml");
        let toml_str = std::fs::read_to_string(&registry_path)
            .unwrap_or_else(|e| panic!("Failed to read surface.toml at {:?}: {}", registry_path, e));
        toml::from_str(&toml_str).expect("Failed to parse surface.toml")
    }

    /// Validates that every import listed in `registry/surface.toml` is
    /// provided by the linker with exactly the listed signature.
    ///
    /// A WAT module importing every registry entry is generated and
    /// instantiated against the linker; any missing name or mismatched
    /// signature fails instantiation.
    ///
    /// To update: modify surface.toml first, then the implementation.
    #[test]
    fn test_surface_compliance() {
        let registry = load_registry();
        assert_eq!(registry.meta.module, IMPORT_MODULE);
        assert!(
            registry.functions.len() >= 200,
            "Expected at least 200 imports in registry, found {}",
            registry.functions.len()
        );

        let mut wat = String::from("(module\n");
        for func in &registry.functions {
            wat.push_str(&generate_wat_import(&registry.meta.module, &func.name, &func.params, &func.returns));
        }
        wat.push_str(")\n");

        let engine = Engine::default();
        let linker = create_linker(&engine).expect("Failed to create linker");
        let module = Module::new(&engine, &wat).unwrap_or_else(|e| {
            panic!(
                "Failed to parse generated WAT ({} imports): {}\n\nGenerated WAT:\n{}",
                registry.functions.len(),
                e,
                wat
            )
        });

        let mut store = Store::new(&engine, WasmState::default());
        linker.instantiate(&mut store, &module).unwrap_or_else(|e| {
            panic!(
                "SURFACE COMPLIANCE FAILURE ({} imports):\n{}\n\n\
                 Fix the implementation to match surface.toml, not the other way around.",
                registry.functions.len(),
                e
            )
        });
    }

    #[test]
    fn test_registry_names_are_unique_and_namespaced() {
        let registry = load_registry();
        let mut seen = std::collections::HashSet::new();
        for func in &registry.functions {
            assert!(
                func.name.starts_with("__wbindgen_") || func.name.starts_with("__wbg_"),
                "{} is outside the bindgen naming scheme",
                func.name
            );
            assert!(seen.insert(func.name.as_str()), "duplicate import {}", func.name);
        }
    }
}
