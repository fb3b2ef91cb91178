//! Bridge Context
//!
//! All per-instance bridge state lives in one [`BridgeContext`] carried as
//! (part of) the wasmtime store data. Nothing in the bridge is global: the
//! reference table, view cache, length and exception registers, closure
//! watch, event loop and platform adapters are all reached through the
//! store handed to every host function.

use crate::closure::FinalizationWatch;
use crate::error::{BridgeError, BridgeResult};
use crate::event_loop::EventLoop;
use crate::platform::{HeadlessConfig, Platform};
use crate::table::ExternrefTable;
use crate::views::MemoryViewCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use wasmtime::{AsContextMut, Instance, Memory, Table, TypedFunc};

/// Names of the guest exports the bridge consumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportNames {
    pub memory: String,
    pub malloc: String,
    pub realloc: String,
    pub free: String,
    pub function_table: String,
    pub exn_store: String,
    pub start: String,
}

impl Default for ExportNames {
    fn default() -> Self {
        Self {
            memory: "memory".to_string(),
            malloc: "__wbindgen_malloc".to_string(),
            realloc: "__wbindgen_realloc".to_string(),
            free: "__wbindgen_free".to_string(),
            function_table: "__indirect_function_table".to_string(),
            exn_store: "__wbindgen_exn_store".to_string(),
            start: "__wbindgen_start".to_string(),
        }
    }
}

/// Resolved guest exports
///
/// `memory`, `malloc` and `free` are required; the rest are optional and
/// change which code path the bridge takes.
#[derive(Clone)]
pub struct GuestExports {
    pub memory: Memory,
    pub malloc: TypedFunc<(u32, u32), u32>,
    pub realloc: Option<TypedFunc<(u32, u32, u32, u32), u32>>,
    pub free: TypedFunc<(u32, u32, u32), ()>,
    pub function_table: Option<Table>,
    pub exn_store: Option<TypedFunc<u32, ()>>,
    pub start: Option<TypedFunc<(), ()>>,
}

impl GuestExports {
    /// Resolve the export contract of an instantiated guest
    pub fn bind(
        mut store: impl AsContextMut,
        instance: &Instance,
        names: &ExportNames,
    ) -> BridgeResult<Self> {
        let memory = instance
            .get_memory(&mut store, &names.memory)
            .ok_or_else(|| BridgeError::MissingExport(names.memory.clone()))?;

        let malloc = instance
            .get_typed_func::<(u32, u32), u32>(&mut store, &names.malloc)
            .map_err(|e| BridgeError::MissingExport(format!("{}: {}", names.malloc, e)))?;
        let free = instance
            .get_typed_func::<(u32, u32, u32), ()>(&mut store, &names.free)
            .map_err(|e| BridgeError::MissingExport(format!("{}: {}", names.free, e)))?;

        let realloc = match instance.get_func(&mut store, &names.realloc) {
            Some(func) => Some(func.typed::<(u32, u32, u32, u32), u32>(&store)?),
            None => {
                debug!("guest exports no {}; strings use the encode-then-copy path", names.realloc);
                None
            }
        };

        let function_table = instance.get_table(&mut store, &names.function_table);
        if function_table.is_none() {
            debug!("guest exports no {}; closures cannot be invoked", names.function_table);
        }

        let exn_store = match instance.get_func(&mut store, &names.exn_store) {
            Some(func) => Some(func.typed::<u32, ()>(&store)?),
            None => {
                debug!("guest exports no {}; exceptions stay in the host register", names.exn_store);
                None
            }
        };

        let start = match instance.get_func(&mut store, &names.start) {
            Some(func) => Some(func.typed::<(), ()>(&store)?),
            None => None,
        };

        Ok(Self {
            memory,
            malloc,
            realloc,
            free,
            function_table,
            exn_store,
            start,
        })
    }
}

/// Per-instance bridge state
pub struct BridgeContext {
    pub table: ExternrefTable,
    pub views: MemoryViewCache,
    pub closures: FinalizationWatch,
    pub event_loop: EventLoop,
    platform: Platform,
    exports: Option<GuestExports>,
    export_names: ExportNames,
    vector_len: Option<u32>,
    last_exception: Option<u32>,
}

impl BridgeContext {
    pub fn new(platform: Platform) -> Self {
        Self {
            table: ExternrefTable::new(),
            views: MemoryViewCache::new(),
            closures: FinalizationWatch::new(),
            event_loop: EventLoop::new(platform.clock()),
            platform,
            exports: None,
            export_names: ExportNames::default(),
            vector_len: None,
            last_exception: None,
        }
    }

    pub fn with_export_names(mut self, names: ExportNames) -> Self {
        self.export_names = names;
        self
    }

    pub fn export_names(&self) -> &ExportNames {
        &self.export_names
    }

    /// Finalise a freshly instantiated guest: record its exports, write the
    /// reserved table block and drop every cached view.
    pub fn attach(&mut self, exports: GuestExports) {
        self.exports = Some(exports);
        self.table.init();
        self.views.invalidate();
        info!(
            "bridge attached (realloc: {}, exn_store: {}, function table: {})",
            self.has_realloc(),
            self.exports.as_ref().is_some_and(|e| e.exn_store.is_some()),
            self.exports.as_ref().is_some_and(|e| e.function_table.is_some()),
        );
    }

    pub fn is_attached(&self) -> bool {
        self.exports.is_some()
    }

    pub fn exports(&self) -> BridgeResult<&GuestExports> {
        self.exports
            .as_ref()
            .ok_or_else(|| BridgeError::memory("no guest instance bound to the bridge"))
    }

    fn has_realloc(&self) -> bool {
        self.exports.as_ref().is_some_and(|e| e.realloc.is_some())
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Record the byte length of the last string written into guest memory
    pub fn set_vector_len(&mut self, len: u32) {
        self.vector_len = Some(len);
    }

    /// Read and clear the length register
    pub fn take_vector_len(&mut self) -> Option<u32> {
        self.vector_len.take()
    }

    pub fn set_last_exception(&mut self, handle: u32) {
        self.last_exception = Some(handle);
    }

    /// Read and clear the last-exception register
    pub fn take_last_exception(&mut self) -> Option<u32> {
        self.last_exception.take()
    }
}

impl Default for BridgeContext {
    fn default() -> Self {
        Self::new(Platform::headless(HeadlessConfig::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_names_from_json_keep_defaults() {
        let names: ExportNames =
            serde_json::from_str(r#"{ "malloc": "alloc", "start": "main" }"#).unwrap();
        assert_eq!(names.malloc, "alloc");
        assert_eq!(names.start, "main");
        assert_eq!(names.free, "__wbindgen_free");
        assert_eq!(names.memory, "memory");
    }

    #[test]
    fn test_registers_are_single_use() {
        let mut ctx = BridgeContext::default();
        ctx.set_vector_len(5);
        assert_eq!(ctx.take_vector_len(), Some(5));
        assert_eq!(ctx.take_vector_len(), None);

        ctx.set_last_exception(9);
        assert_eq!(ctx.take_last_exception(), Some(9));
        assert_eq!(ctx.take_last_exception(), None);
    }

    #[test]
    fn test_unattached_context_reports_missing_instance() {
        let ctx = BridgeContext::default();
        assert!(!ctx.is_attached());
        assert!(ctx.exports().is_err());
    }
}
