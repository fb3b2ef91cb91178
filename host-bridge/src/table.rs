//! External Reference Table
//!
//! Host-side slot table mapping small integer handles to [`HostValue`]s. The
//! guest never holds a host value directly; it holds an index into this
//! table.
//!
//! # Layout
//!
//! | Handle | Value                       |
//! |--------|-----------------------------|
//! | 0      | absent / `undefined`        |
//! | 1      | `undefined`                 |
//! | 2      | `null`                      |
//! | 3      | `true`                      |
//! | 4      | `false`                     |
//! | 5..    | dynamically allocated slots |
//!
//! The reserved block is written once by [`ExternrefTable::init`] and is
//! never freed. The table only grows; freed dynamic slots go on a free list
//! and are reused before the table grows again.

use crate::value::HostValue;
use tracing::{debug, trace, warn};

pub const HANDLE_ABSENT: u32 = 0;
pub const HANDLE_UNDEFINED: u32 = 1;
pub const HANDLE_NULL: u32 = 2;
pub const HANDLE_TRUE: u32 = 3;
pub const HANDLE_FALSE: u32 = 4;

/// First handle handed out by [`ExternrefTable::alloc`]
pub const FIRST_DYNAMIC_HANDLE: u32 = 5;

const INITIAL_CAPACITY: usize = 128;

#[derive(Debug)]
pub struct ExternrefTable {
    slots: Vec<Option<HostValue>>,
    free: Vec<u32>,
    initialized: bool,
    live: usize,
}

impl ExternrefTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(INITIAL_CAPACITY),
            free: Vec::new(),
            initialized: false,
            live: 0,
        }
    }

    /// Write the reserved block. Runs once; later calls are no-ops.
    pub fn init(&mut self) {
        if self.initialized {
            debug!("externref table already initialized");
            return;
        }
        self.slots.clear();
        self.free.clear();
        self.slots.push(Some(HostValue::Undefined));
        self.slots.push(Some(HostValue::Undefined));
        self.slots.push(Some(HostValue::Null));
        self.slots.push(Some(HostValue::Bool(true)));
        self.slots.push(Some(HostValue::Bool(false)));
        self.live = 0;
        self.initialized = true;
        debug!("externref table initialized ({} reserved slots)", FIRST_DYNAMIC_HANDLE);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Store a value and return its handle.
    ///
    /// Constants map to their reserved handles instead of consuming a slot.
    pub fn alloc(&mut self, value: HostValue) -> u32 {
        if !self.initialized {
            self.init();
        }
        if let Some(reserved) = reserved_handle(&value) {
            return reserved;
        }

        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(value);
                idx
            }
            None => {
                if self.slots.len() == self.slots.capacity() {
                    let grow_to = (self.slots.capacity() * 2).max(INITIAL_CAPACITY);
                    self.slots.reserve_exact(grow_to - self.slots.len());
                    trace!("externref table grown to {} slots", grow_to);
                }
                self.slots.push(Some(value));
                (self.slots.len() - 1) as u32
            }
        };
        self.live += 1;
        idx
    }

    /// Look up a live handle
    pub fn get(&self, idx: u32) -> Option<&HostValue> {
        self.slots.get(idx as usize).and_then(|slot| slot.as_ref())
    }

    /// Look up a handle, treating absent or stale handles as `undefined`
    pub fn get_or_undefined(&self, idx: u32) -> HostValue {
        self.get(idx).cloned().unwrap_or_default()
    }

    /// Release a guest-held handle. Reserved handles are ignored.
    pub fn free(&mut self, idx: u32) {
        if idx < FIRST_DYNAMIC_HANDLE {
            return;
        }
        match self.slots.get_mut(idx as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.free.push(idx);
                self.live -= 1;
            }
            Some(None) => warn!("externref handle {} freed twice", idx),
            None => warn!("externref handle {} out of range ({} slots)", idx, self.slots.len()),
        }
    }

    /// Duplicate a handle so the guest can free each copy independently
    pub fn clone_ref(&mut self, idx: u32) -> u32 {
        let value = self.get_or_undefined(idx);
        self.alloc(value)
    }

    /// Number of dynamically allocated handles currently in use
    pub fn live(&self) -> usize {
        self.live
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}

impl Default for ExternrefTable {
    fn default() -> Self {
        Self::new()
    }
}

fn reserved_handle(value: &HostValue) -> Option<u32> {
    match value {
        HostValue::Undefined => Some(HANDLE_UNDEFINED),
        HostValue::Null => Some(HANDLE_NULL),
        HostValue::Bool(true) => Some(HANDLE_TRUE),
        HostValue::Bool(false) => Some(HANDLE_FALSE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ObjectRef, PlainObject};

    #[test]
    fn test_reserved_block() {
        let mut table = ExternrefTable::new();
        table.init();
        assert!(table.get(HANDLE_ABSENT).unwrap().is_undefined());
        assert!(table.get(HANDLE_UNDEFINED).unwrap().is_undefined());
        assert!(table.get(HANDLE_NULL).unwrap().is_null());
        assert_eq!(table.get(HANDLE_TRUE).unwrap().as_bool(), Some(true));
        assert_eq!(table.get(HANDLE_FALSE).unwrap().as_bool(), Some(false));
        assert_eq!(table.alloc(HostValue::Null), HANDLE_NULL);
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut table = ExternrefTable::new();
        table.init();
        let h = table.alloc(HostValue::string("kept"));
        table.init();
        assert_eq!(table.get(h).and_then(|v| v.as_str()), Some("kept"));
    }

    #[test]
    fn test_first_dynamic_handle_and_reuse() {
        let mut table = ExternrefTable::new();
        table.init();
        let a = table.alloc(HostValue::Number(1.0));
        let b = table.alloc(HostValue::Number(2.0));
        assert_eq!(a, FIRST_DYNAMIC_HANDLE);
        assert_eq!(b, FIRST_DYNAMIC_HANDLE + 1);

        table.free(a);
        assert!(table.get(a).is_none());
        let c = table.alloc(HostValue::string("reused"));
        assert_eq!(c, a);
        assert_eq!(table.get(c).and_then(|v| v.as_str()), Some("reused"));
    }

    #[test]
    fn test_freed_handle_never_returns_stale_value() {
        let mut table = ExternrefTable::new();
        let obj = ObjectRef::new(PlainObject::new());
        let h = table.alloc(HostValue::Object(obj));
        table.free(h);
        assert!(table.get(h).is_none());
        assert!(table.get_or_undefined(h).is_undefined());

        // double free is ignored
        table.free(h);
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn test_reserved_slots_are_never_freed() {
        let mut table = ExternrefTable::new();
        table.init();
        for h in 0..FIRST_DYNAMIC_HANDLE {
            table.free(h);
        }
        assert!(table.get(HANDLE_NULL).unwrap().is_null());
        assert_eq!(table.alloc(HostValue::Number(0.0)), FIRST_DYNAMIC_HANDLE);
    }

    #[test]
    fn test_growth_keeps_existing_handles() {
        let mut table = ExternrefTable::new();
        let handles: Vec<u32> = (0..300)
            .map(|i| table.alloc(HostValue::Number(i as f64)))
            .collect();
        assert!(table.capacity() >= 305);
        for (i, h) in handles.iter().enumerate() {
            assert_eq!(table.get(*h).and_then(|v| v.as_number()), Some(i as f64));
        }
        assert_eq!(table.live(), 300);
    }

    #[test]
    fn test_clone_ref_is_independent() {
        let mut table = ExternrefTable::new();
        let h = table.alloc(HostValue::string("shared"));
        let dup = table.clone_ref(h);
        assert_ne!(h, dup);
        table.free(h);
        assert_eq!(table.get(dup).and_then(|v| v.as_str()), Some("shared"));
    }
}
