//! Closure Lifetime Manager
//!
//! A guest closure is a pair of opaque words `(a, b)` describing the
//! closure environment, plus two function-table indices: `invoke(a, b, arg)`
//! and `dtor(a, b)`. The host wraps it in a [`GuestClosure`] object so it
//! can be stored in the reference table, attached as an event listener, or
//! scheduled as a timer callback.
//!
//! # Protocol
//!
//! The record starts with `cnt = 1` (the guest's own reference).
//!
//! - invoke: `cnt += 1`, take `a` (leaving 0 behind so re-entrant calls see
//!   a cleared environment), call `invoke(a, b, arg)`, then on every path
//!   `cnt -= 1`; at zero call `dtor(a, b)`, otherwise put `a` back.
//! - guest drop (`__wbindgen_cb_drop`): `cnt -= 1`; returns whether that was
//!   the last reference, in which case the guest frees the environment.
//! - host retain/release: [`retain`] hands out a [`ClosureToken`] that must
//!   be given back to [`release`].
//!
//! Closures that become unreachable without reaching zero are found by
//! [`FinalizationWatch::sweep`], which runs their destructor and logs the
//! leak. The destructor runs at most once per closure.

use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::value::{HostException, HostObject, HostValue, ObjectRef};
use crate::wasm_linker::WasmStateCore;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use wasmtime::{AsContextMut, TypedFunc, WasmParams, WasmResults};

#[derive(Debug, Clone)]
pub struct ClosureRecord {
    pub a: u32,
    pub b: u32,
    pub cnt: u32,
    pub dtor: u32,
    pub invoke: u32,
    pub destroyed: bool,
}

/// Host-side wrapper around a guest closure
pub struct GuestClosure {
    id: u64,
    record: Arc<Mutex<ClosureRecord>>,
}

impl GuestClosure {
    /// Wrap a guest closure and register it with the finalization watch
    pub fn create(bridge: &mut BridgeContext, a: u32, b: u32, dtor: u32, invoke: u32) -> ObjectRef {
        let record = Arc::new(Mutex::new(ClosureRecord {
            a,
            b,
            cnt: 1,
            dtor,
            invoke,
            destroyed: false,
        }));
        let id = bridge.closures.next_id();
        let closure = Arc::new(GuestClosure {
            id,
            record: record.clone(),
        });
        bridge.closures.register(id, Arc::downgrade(&closure), record);
        debug!("closure#{} created (a={}, b={}, dtor={}, invoke={})", id, a, b, dtor, invoke);
        ObjectRef::from_arc(closure)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Snapshot of the state record
    pub fn record(&self) -> ClosureRecord {
        self.record.lock().clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.record.lock().destroyed
    }
}

impl HostObject for GuestClosure {
    fn class_name(&self) -> &str {
        "Function"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_closure(&self) -> Option<&GuestClosure> {
        Some(self)
    }
}

/// Weak registry of live closures
#[derive(Default)]
pub struct FinalizationWatch {
    entries: HashMap<u64, WatchEntry>,
    next_id: u64,
}

struct WatchEntry {
    closure: Weak<GuestClosure>,
    record: Arc<Mutex<ClosureRecord>>,
}

impl FinalizationWatch {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn register(&mut self, id: u64, closure: Weak<GuestClosure>, record: Arc<Mutex<ClosureRecord>>) {
        self.entries.insert(id, WatchEntry { closure, record });
    }

    fn unregister(&mut self, id: u64) {
        self.entries.remove(&id);
    }

    /// Number of closures still being watched
    pub fn watched(&self) -> usize {
        self.entries.len()
    }

    /// Remove closures nobody can reach any more and return their records
    fn collect_unreachable(&mut self) -> Vec<(u64, Arc<Mutex<ClosureRecord>>)> {
        let dead: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.closure.strong_count() == 0)
            .map(|(id, _)| *id)
            .collect();
        dead.into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|entry| (id, entry.record)))
            .collect()
    }

    /// Run destructors for closures that were dropped by the host without
    /// reaching a zero count. Returns how many destructors ran.
    pub fn sweep<S: WasmStateCore>(mut ctx: impl AsContextMut<Data = S>) -> BridgeResult<usize> {
        let unreachable = ctx
            .as_context_mut()
            .data_mut()
            .bridge_mut()
            .closures
            .collect_unreachable();

        let mut finalized = 0;
        for (id, record) in unreachable {
            let (a, b, dtor) = {
                let mut r = record.lock();
                if r.destroyed {
                    continue;
                }
                r.destroyed = true;
                (r.a, r.b, r.dtor)
            };
            warn!(
                "closure#{} became unreachable without being released; running destructor",
                id
            );
            call_table::<S, (u32, u32), ()>(&mut ctx, dtor, (a, b))?;
            finalized += 1;
        }
        Ok(finalized)
    }
}

/// Look up and call a function in the guest's indirect function table
pub(crate) fn call_table<S, P, R>(
    mut ctx: impl AsContextMut<Data = S>,
    index: u32,
    params: P,
) -> BridgeResult<R>
where
    S: WasmStateCore,
    P: WasmParams,
    R: WasmResults,
{
    let names = ctx.as_context().data().bridge().export_names().function_table.clone();
    let table = ctx
        .as_context()
        .data()
        .bridge()
        .exports()?
        .function_table
        .ok_or(BridgeError::MissingExport(names))?;
    let func = table
        .get(&mut ctx, u64::from(index))
        .and_then(|r| r.as_func().flatten().copied())
        .ok_or_else(|| BridgeError::closure(format!("function table slot {} is empty", index)))?;
    let typed: TypedFunc<P, R> = func.typed(&ctx)?;
    typed.call(&mut ctx, params).map_err(BridgeError::from_trap)
}

fn closure_of<'a>(callee: &'a ObjectRef) -> BridgeResult<&'a GuestClosure> {
    callee.as_closure().ok_or_else(|| {
        BridgeError::HostOperation(HostException::type_error(format!(
            "{:?} is not a function",
            callee
        )))
    })
}

/// Invoke a guest closure with one argument
///
/// The argument is stored in the reference table and its handle is handed
/// to the guest, which owns it from then on.
pub fn invoke<S: WasmStateCore>(
    mut ctx: impl AsContextMut<Data = S>,
    callee: &ObjectRef,
    arg: HostValue,
) -> BridgeResult<()> {
    let closure = closure_of(callee)?;
    let (a, b, invoke_idx) = {
        let mut r = closure.record.lock();
        if r.destroyed {
            return Err(BridgeError::closure(format!(
                "closure#{} invoked after it was destroyed",
                closure.id
            )));
        }
        r.cnt += 1;
        let a = r.a;
        r.a = 0;
        (a, r.b, r.invoke)
    };

    let arg_handle = ctx.as_context_mut().data_mut().bridge_mut().table.alloc(arg);
    let result = call_table::<S, (u32, u32, u32), ()>(&mut ctx, invoke_idx, (a, b, arg_handle));

    let finished = {
        let mut r = closure.record.lock();
        r.cnt = r.cnt.saturating_sub(1);
        if r.cnt == 0 {
            r.destroyed = true;
            true
        } else {
            r.a = a;
            false
        }
    };

    if finished {
        let dtor = closure.record.lock().dtor;
        debug!("closure#{} reached zero after invoke; running destructor", closure.id);
        let dropped = call_table::<S, (u32, u32), ()>(&mut ctx, dtor, (a, b));
        ctx.as_context_mut()
            .data_mut()
            .bridge_mut()
            .closures
            .unregister(closure.id);
        result?;
        return dropped;
    }
    result
}

/// Guest-side drop. Returns `true` when this was the last reference.
pub fn guest_drop(bridge: &mut BridgeContext, callee: &ObjectRef) -> BridgeResult<bool> {
    let closure = closure_of(callee)?;
    let mut r = closure.record.lock();
    if r.destroyed {
        warn!("closure#{} dropped after destruction", closure.id);
        return Ok(false);
    }
    r.cnt = r.cnt.saturating_sub(1);
    if r.cnt == 0 {
        r.a = 0;
        r.destroyed = true;
        drop(r);
        bridge.closures.unregister(closure.id);
        debug!("closure#{} dropped by guest (last reference)", closure.id);
        return Ok(true);
    }
    Ok(false)
}

/// Explicit host ownership of a closure
#[must_use = "a closure token must be handed back to `release`"]
pub struct ClosureToken {
    callee: ObjectRef,
    id: u64,
    released: bool,
}

impl ClosureToken {
    pub fn callee(&self) -> &ObjectRef {
        &self.callee
    }
}

impl Drop for ClosureToken {
    fn drop(&mut self) {
        if !self.released {
            warn!("closure token for closure#{} dropped without release", self.id);
        }
    }
}

/// Take a host-side reference to a closure
pub fn retain(callee: &ObjectRef) -> BridgeResult<ClosureToken> {
    let closure = closure_of(callee)?;
    let mut r = closure.record.lock();
    if r.destroyed {
        return Err(BridgeError::closure(format!(
            "cannot retain destroyed closure#{}",
            closure.id
        )));
    }
    r.cnt += 1;
    Ok(ClosureToken {
        callee: callee.clone(),
        id: closure.id,
        released: false,
    })
}

/// Give a host reference back; runs the destructor when it was the last one
pub fn release<S: WasmStateCore>(
    mut ctx: impl AsContextMut<Data = S>,
    mut token: ClosureToken,
) -> BridgeResult<()> {
    token.released = true;
    let closure = closure_of(&token.callee)?;
    let pending = {
        let mut r = closure.record.lock();
        r.cnt = r.cnt.saturating_sub(1);
        if r.cnt == 0 && !r.destroyed {
            r.destroyed = true;
            Some((r.a, r.b, r.dtor))
        } else {
            None
        }
    };
    if let Some((a, b, dtor)) = pending {
        debug!("closure#{} released by host (last reference)", closure.id);
        ctx.as_context_mut()
            .data_mut()
            .bridge_mut()
            .closures
            .unregister(closure.id);
        call_table::<S, (u32, u32), ()>(&mut ctx, dtor, (a, b))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_drop_reports_last_reference() {
        let mut bridge = BridgeContext::default();
        let callee = GuestClosure::create(&mut bridge, 8, 16, 1, 2);
        assert_eq!(bridge.closures.watched(), 1);

        let token = retain(&callee).unwrap();
        assert!(!guest_drop(&mut bridge, &callee).unwrap());
        assert_eq!(callee.as_closure().unwrap().record().cnt, 1);

        // host still holds a token; drop it the unchecked way for the test
        std::mem::forget(token);
        assert!(guest_drop(&mut bridge, &callee).unwrap());
        let record = callee.as_closure().unwrap().record();
        assert!(record.destroyed);
        assert_eq!(record.a, 0);
        assert_eq!(bridge.closures.watched(), 0);
    }

    #[test]
    fn test_destroyed_closure_cannot_be_retained() {
        let mut bridge = BridgeContext::default();
        let callee = GuestClosure::create(&mut bridge, 1, 2, 3, 4);
        assert!(guest_drop(&mut bridge, &callee).unwrap());
        assert!(retain(&callee).is_err());
        assert!(!guest_drop(&mut bridge, &callee).unwrap());
    }

    #[test]
    fn test_unreachable_closures_are_collected_once() {
        let mut bridge = BridgeContext::default();
        let kept = GuestClosure::create(&mut bridge, 1, 1, 0, 0);
        let lost = GuestClosure::create(&mut bridge, 2, 2, 0, 0);
        drop(lost);

        let dead = bridge.closures.collect_unreachable();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].1.lock().a, 2);
        assert!(bridge.closures.collect_unreachable().is_empty());
        assert_eq!(bridge.closures.watched(), 1);
        drop(kept);
    }

    #[test]
    fn test_non_function_is_a_type_error() {
        let obj = ObjectRef::new(crate::value::PlainObject::new());
        match retain(&obj) {
            Err(BridgeError::HostOperation(e)) => assert_eq!(e.name, "TypeError"),
            _ => panic!("expected TypeError"),
        }
    }
}
