//! Host Event Loop
//!
//! The guest never blocks; everything asynchronous it asks for (timers,
//! animation frames, promise reactions, GPU and audio completions) is queued
//! here and run later by the host, one callback at a time, against a
//! virtual clock.
//!
//! # Ordering
//!
//! - microtasks run to exhaustion after every callback
//! - timers fire in deadline order, ties in scheduling order
//! - animation frames requested during a frame run on the next one
//!
//! Timers, frames and queued microtasks hold their closure through a
//! [`ClosureToken`], released once the callback has run or the entry is
//! cancelled.
//!
//! The queues live in the [`BridgeContext`](crate::context::BridgeContext);
//! the runner functions here take the store so they can call back into the
//! guest between queue operations.

use crate::closure::{self, ClosureToken};
use crate::error::{BridgeError, BridgeResult};
use crate::value::{HostException, HostObject, HostValue, ObjectRef};
use crate::wasm_linker::WasmStateCore;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};
use wasmtime::AsContextMut;

/// Default frame interval used by [`animation_frame`]
pub const FRAME_INTERVAL_MS: f64 = 1000.0 / 60.0;

/// Shared millisecond clock read by `performance.now()`, `Date.now()` and
/// audio contexts
#[derive(Clone, Debug, Default)]
pub struct VirtualClock {
    now_ms: Arc<Mutex<f64>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        *self.now_ms.lock()
    }

    /// Move the clock forward; it never goes backwards
    pub fn advance_to(&self, ms: f64) {
        let mut now = self.now_ms.lock();
        if ms > *now {
            *now = ms;
        }
    }
}

// ============================================================================
// PROMISES
// ============================================================================

#[derive(Clone, Debug)]
pub enum PromiseState {
    Pending,
    Fulfilled(HostValue),
    Rejected(HostValue),
}

struct Reaction {
    on_fulfilled: Option<ObjectRef>,
    on_rejected: Option<ObjectRef>,
    derived: ObjectRef,
}

/// Host promise object
pub struct PromiseObject {
    inner: Mutex<PromiseInner>,
}

struct PromiseInner {
    state: PromiseState,
    reactions: Vec<Reaction>,
}

impl PromiseObject {
    pub fn pending() -> ObjectRef {
        ObjectRef::new(PromiseObject {
            inner: Mutex::new(PromiseInner {
                state: PromiseState::Pending,
                reactions: Vec::new(),
            }),
        })
    }

    pub fn state(&self) -> PromiseState {
        self.inner.lock().state.clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.inner.lock().state, PromiseState::Pending)
    }
}

impl HostObject for PromiseObject {
    fn class_name(&self) -> &str {
        "Promise"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_promise(&self) -> Option<&PromiseObject> {
        Some(self)
    }
}

// ============================================================================
// QUEUES
// ============================================================================

/// Unit of work the loop runs
pub enum Task {
    /// Call a retained guest closure with one argument, then release it
    Invoke { token: ClosureToken, arg: HostValue },
    /// Run a promise reaction and settle the derived promise
    Reaction {
        handler: Option<ObjectRef>,
        value: HostValue,
        derived: ObjectRef,
        rejected: bool,
    },
}

struct Timer {
    id: u32,
    token: ClosureToken,
    arg: HostValue,
}

/// Timer, frame and microtask queues
pub struct EventLoop {
    clock: VirtualClock,
    timers: BTreeMap<(u64, u64), Timer>,
    timer_keys: HashMap<u32, (u64, u64)>,
    next_timer_id: u32,
    timer_seq: u64,
    frames: Vec<(u32, ClosureToken)>,
    next_frame_id: u32,
    microtasks: VecDeque<Task>,
}

/// Snapshot of queued work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub timers: usize,
    pub frames: usize,
    pub microtasks: usize,
}

impl LoopStats {
    pub fn is_idle(&self) -> bool {
        self.timers == 0 && self.frames == 0 && self.microtasks == 0
    }
}

fn deadline_key(ms: f64) -> u64 {
    (ms.max(0.0) * 1000.0) as u64
}

impl EventLoop {
    pub fn new(clock: VirtualClock) -> Self {
        Self {
            clock,
            timers: BTreeMap::new(),
            timer_keys: HashMap::new(),
            next_timer_id: 0,
            timer_seq: 0,
            frames: Vec::new(),
            next_frame_id: 0,
            microtasks: VecDeque::new(),
        }
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            timers: self.timers.len(),
            frames: self.frames.len(),
            microtasks: self.microtasks.len(),
        }
    }

    /// `setTimeout`; returns a non-zero id. The token is released after the
    /// timer fires.
    pub fn set_timeout(&mut self, token: ClosureToken, arg: HostValue, delay_ms: f64) -> u32 {
        self.next_timer_id = self.next_timer_id.wrapping_add(1).max(1);
        self.timer_seq += 1;
        let id = self.next_timer_id;
        let delay = if delay_ms.is_finite() { delay_ms.max(0.0) } else { 0.0 };
        let key = (deadline_key(self.clock.now() + delay), self.timer_seq);
        self.timers.insert(key, Timer { id, token, arg });
        self.timer_keys.insert(id, key);
        trace!("timer {} scheduled in {}ms", id, delay);
        id
    }

    /// `clearTimeout`; returns the token of the cleared timer. Unknown ids
    /// are ignored.
    pub fn clear_timeout(&mut self, id: u32) -> Option<ClosureToken> {
        let key = self.timer_keys.remove(&id)?;
        let timer = self.timers.remove(&key)?;
        trace!("timer {} cleared", id);
        Some(timer.token)
    }

    /// `requestAnimationFrame`; returns a non-zero id
    pub fn request_animation_frame(&mut self, token: ClosureToken) -> u32 {
        self.next_frame_id = self.next_frame_id.wrapping_add(1).max(1);
        self.frames.push((self.next_frame_id, token));
        self.next_frame_id
    }

    pub fn cancel_animation_frame(&mut self, id: u32) -> Option<ClosureToken> {
        let at = self.frames.iter().position(|(frame_id, _)| *frame_id == id)?;
        Some(self.frames.remove(at).1)
    }

    /// `queueMicrotask`
    pub fn queue_microtask(&mut self, task: Task) {
        self.microtasks.push_back(task);
    }

    fn pop_due_timer(&mut self, until_ms: f64) -> Option<(f64, Timer)> {
        let (&key, _) = self.timers.first_key_value()?;
        if key.0 > deadline_key(until_ms) {
            return None;
        }
        let timer = self.timers.remove(&key)?;
        self.timer_keys.remove(&timer.id);
        Some((key.0 as f64 / 1000.0, timer))
    }

    fn next_deadline(&self) -> Option<f64> {
        self.timers.keys().next().map(|(at, _)| *at as f64 / 1000.0)
    }

    // ------------------------------------------------------------------------
    // promise plumbing
    // ------------------------------------------------------------------------

    /// Fulfil `promise`. Resolving with another promise adopts its state.
    pub fn resolve(&mut self, promise: &ObjectRef, value: HostValue) {
        if let Some(inner) = value.as_object().filter(|o| o.as_promise().is_some()) {
            if !inner.ptr_eq(promise) {
                let inner = inner.clone();
                self.subscribe(&inner, None, None, promise.clone());
                return;
            }
        }
        self.settle(promise, PromiseState::Fulfilled(value));
    }

    pub fn reject(&mut self, promise: &ObjectRef, reason: HostValue) {
        self.settle(promise, PromiseState::Rejected(reason));
    }

    /// A promise already fulfilled with `value` (`Promise.resolve`)
    pub fn resolved(&mut self, value: HostValue) -> ObjectRef {
        if let Some(obj) = value.as_object().filter(|o| o.as_promise().is_some()) {
            return obj.clone();
        }
        let promise = PromiseObject::pending();
        self.resolve(&promise, value);
        promise
    }

    /// A promise already rejected with `exception`
    pub fn rejected(&mut self, exception: HostException) -> ObjectRef {
        let promise = PromiseObject::pending();
        self.reject(&promise, HostValue::object(exception));
        promise
    }

    /// `promise.then(on_fulfilled, on_rejected)`; returns the derived promise
    pub fn then(
        &mut self,
        promise: &ObjectRef,
        on_fulfilled: Option<ObjectRef>,
        on_rejected: Option<ObjectRef>,
    ) -> BridgeResult<ObjectRef> {
        if promise.as_promise().is_none() {
            return Err(BridgeError::HostOperation(HostException::illegal_invocation(
                "Promise", "then",
            )));
        }
        let derived = PromiseObject::pending();
        self.subscribe(promise, on_fulfilled, on_rejected, derived.clone());
        Ok(derived)
    }

    fn subscribe(
        &mut self,
        promise: &ObjectRef,
        on_fulfilled: Option<ObjectRef>,
        on_rejected: Option<ObjectRef>,
        derived: ObjectRef,
    ) {
        let Some(p) = promise.as_promise() else {
            return;
        };
        let mut inner = p.inner.lock();
        match inner.state.clone() {
            PromiseState::Pending => inner.reactions.push(Reaction {
                on_fulfilled,
                on_rejected,
                derived,
            }),
            PromiseState::Fulfilled(value) => self.microtasks.push_back(Task::Reaction {
                handler: on_fulfilled,
                value,
                derived,
                rejected: false,
            }),
            PromiseState::Rejected(value) => self.microtasks.push_back(Task::Reaction {
                handler: on_rejected,
                value,
                derived,
                rejected: true,
            }),
        }
    }

    fn settle(&mut self, promise: &ObjectRef, state: PromiseState) {
        let Some(p) = promise.as_promise() else {
            return;
        };
        let reactions = {
            let mut inner = p.inner.lock();
            if !matches!(inner.state, PromiseState::Pending) {
                return;
            }
            inner.state = state.clone();
            std::mem::take(&mut inner.reactions)
        };
        let (value, rejected) = match state {
            PromiseState::Fulfilled(v) => (v, false),
            PromiseState::Rejected(v) => (v, true),
            PromiseState::Pending => return,
        };
        if rejected && reactions.is_empty() {
            debug!("promise rejected with no reactions: {}", crate::value::debug_string(&value));
        }
        for reaction in reactions {
            self.microtasks.push_back(Task::Reaction {
                handler: if rejected {
                    reaction.on_rejected
                } else {
                    reaction.on_fulfilled
                },
                value: value.clone(),
                derived: reaction.derived,
                rejected,
            });
        }
    }
}

// ============================================================================
// RUNNERS
// ============================================================================

fn with_loop<S: WasmStateCore, R>(
    ctx: &mut impl AsContextMut<Data = S>,
    f: impl FnOnce(&mut EventLoop) -> R,
) -> R {
    f(&mut ctx.as_context_mut().data_mut().bridge_mut().event_loop)
}

/// Call a guest callback from the loop. Errors the guest can recover from
/// are logged and returned as the uncaught exception; traps propagate.
fn run_callback<S: WasmStateCore>(
    ctx: &mut impl AsContextMut<Data = S>,
    callee: &ObjectRef,
    arg: HostValue,
) -> BridgeResult<Option<HostException>> {
    match closure::invoke(&mut *ctx, callee, arg) {
        Ok(()) => Ok(None),
        Err(BridgeError::HostOperation(exception)) => {
            error!("uncaught exception in callback: {}", exception);
            Ok(Some(exception))
        }
        Err(BridgeError::GuestThrow(message)) => {
            error!("uncaught guest error in callback: {}", message);
            Ok(Some(HostException::error(message)))
        }
        Err(BridgeError::Closure(message)) => {
            warn!("skipping callback: {}", message);
            Ok(None)
        }
        Err(other) => Err(other),
    }
}

fn run_task<S: WasmStateCore>(ctx: &mut impl AsContextMut<Data = S>, task: Task) -> BridgeResult<()> {
    match task {
        Task::Invoke { token, arg } => {
            run_callback(ctx, token.callee(), arg)?;
            closure::release(&mut *ctx, token)?;
        }
        Task::Reaction {
            handler,
            value,
            derived,
            rejected,
        } => match handler {
            Some(handler) => match run_callback(ctx, &handler, value)? {
                None => with_loop(ctx, |lp| lp.resolve(&derived, HostValue::Undefined)),
                Some(exception) => {
                    with_loop(ctx, |lp| lp.reject(&derived, HostValue::object(exception)))
                }
            },
            None if rejected => with_loop(ctx, |lp| lp.reject(&derived, value)),
            None => with_loop(ctx, |lp| lp.resolve(&derived, value)),
        },
    }
    Ok(())
}

/// Drain the microtask queue, including tasks queued while draining
pub fn run_microtasks<S: WasmStateCore>(mut ctx: impl AsContextMut<Data = S>) -> BridgeResult<usize> {
    let mut ran = 0;
    while let Some(task) = with_loop(&mut ctx, |lp| lp.microtasks.pop_front()) {
        run_task(&mut ctx, task)?;
        ran += 1;
    }
    Ok(ran)
}

/// Advance the clock by `ms`, firing every timer that comes due.
/// Returns the number of callbacks run (timers plus microtasks).
pub fn advance<S: WasmStateCore>(mut ctx: impl AsContextMut<Data = S>, ms: f64) -> BridgeResult<usize> {
    let target = with_loop(&mut ctx, |lp| lp.clock.now()) + ms.max(0.0);
    let mut ran = run_microtasks(&mut ctx)?;
    while let Some((at, timer)) = with_loop(&mut ctx, |lp| lp.pop_due_timer(target)) {
        with_loop(&mut ctx, |lp| lp.clock.advance_to(at));
        trace!("timer {} fired at {}ms", timer.id, at);
        run_callback(&mut ctx, timer.token.callee(), timer.arg)?;
        closure::release(&mut ctx, timer.token)?;
        ran += 1 + run_microtasks(&mut ctx)?;
    }
    with_loop(&mut ctx, |lp| lp.clock.advance_to(target));
    Ok(ran)
}

/// Run one animation frame: every callback queued before the frame started
/// is called with the frame timestamp.
pub fn animation_frame<S: WasmStateCore>(mut ctx: impl AsContextMut<Data = S>) -> BridgeResult<usize> {
    let mut ran = advance(&mut ctx, FRAME_INTERVAL_MS)?;
    let (frames, timestamp) =
        with_loop(&mut ctx, |lp| (std::mem::take(&mut lp.frames), lp.clock.now()));
    for (id, token) in frames {
        trace!("animation frame callback {} at {}ms", id, timestamp);
        run_callback(&mut ctx, token.callee(), HostValue::Number(timestamp))?;
        closure::release(&mut ctx, token)?;
        ran += 1 + run_microtasks(&mut ctx)?;
    }
    Ok(ran)
}

/// Run microtasks and timers until nothing is due within `horizon_ms`.
/// Animation frames are not run; they need an explicit [`animation_frame`].
pub fn run_until_idle<S: WasmStateCore>(
    mut ctx: impl AsContextMut<Data = S>,
    horizon_ms: f64,
) -> BridgeResult<usize> {
    let limit = with_loop(&mut ctx, |lp| lp.clock.now()) + horizon_ms.max(0.0);
    let mut ran = run_microtasks(&mut ctx)?;
    while let Some(next) = with_loop(&mut ctx, |lp| lp.next_deadline()) {
        if next > limit {
            break;
        }
        let now = with_loop(&mut ctx, |lp| lp.clock.now());
        ran += advance(&mut ctx, (next - now).max(0.0))?;
    }
    Ok(ran)
}

/// Dispatch `event` at `target`, synchronously calling every listener for
/// its type. Returns whether the default action was prevented.
pub fn dispatch_event<S: WasmStateCore>(
    mut ctx: impl AsContextMut<Data = S>,
    target: &ObjectRef,
    event: &ObjectRef,
) -> BridgeResult<bool> {
    let ev = event.as_event().ok_or_else(|| {
        BridgeError::HostOperation(HostException::illegal_invocation("Event", "dispatchEvent"))
    })?;
    let listeners = target
        .as_event_target()
        .ok_or_else(|| {
            BridgeError::HostOperation(HostException::illegal_invocation(
                "EventTarget",
                "dispatchEvent",
            ))
        })?
        .take_listeners(&ev.event_type());

    ev.set_target(target.clone());
    debug!("dispatching {} to {} listener(s)", ev.event_type(), listeners.len());
    for (listener, once) in listeners {
        run_callback(&mut ctx, &listener, HostValue::Object(event.clone()))?;
        if let Some(token) = once {
            closure::release(&mut ctx, token)?;
        }
        run_microtasks(&mut ctx)?;
    }
    Ok(ev.default_prevented())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> ClosureToken {
        let mut bridge = crate::context::BridgeContext::default();
        closure::retain(&closure::GuestClosure::create(&mut bridge, 1, 1, 0, 0)).unwrap()
    }

    #[test]
    fn test_clock_is_monotonic() {
        let clock = VirtualClock::new();
        clock.advance_to(10.0);
        clock.advance_to(5.0);
        assert_eq!(clock.now(), 10.0);
    }

    #[test]
    fn test_timers_fire_in_deadline_then_schedule_order() {
        let mut lp = EventLoop::new(VirtualClock::new());
        let late = lp.set_timeout(token(), HostValue::Undefined, 20.0);
        let a = lp.set_timeout(token(), HostValue::Undefined, 5.0);
        let b = lp.set_timeout(token(), HostValue::Undefined, 5.0);
        assert_eq!(lp.stats().timers, 3);

        assert_eq!(lp.pop_due_timer(10.0).map(|(_, t)| t.id), Some(a));
        assert_eq!(lp.pop_due_timer(10.0).map(|(_, t)| t.id), Some(b));
        assert!(lp.pop_due_timer(10.0).is_none());
        let (at, timer) = lp.pop_due_timer(20.0).unwrap();
        assert_eq!((at, timer.id), (20.0, late));
    }

    #[test]
    fn test_clear_timeout() {
        let mut lp = EventLoop::new(VirtualClock::new());
        let id = lp.set_timeout(token(), HostValue::Undefined, 1.0);
        assert!(lp.clear_timeout(id).is_some());
        assert!(lp.clear_timeout(id).is_none());
        assert!(lp.clear_timeout(999).is_none());
        assert!(lp.stats().is_idle());
    }

    #[test]
    fn test_cancel_animation_frame() {
        let mut lp = EventLoop::new(VirtualClock::new());
        let first = lp.request_animation_frame(token());
        let second = lp.request_animation_frame(token());
        assert_ne!(first, 0);
        assert!(lp.cancel_animation_frame(first).is_some());
        assert!(lp.cancel_animation_frame(first).is_none());
        assert_eq!(lp.frames.len(), 1);
        assert_eq!(lp.frames[0].0, second);
    }

    #[test]
    fn test_then_on_settled_promise_queues_reaction() {
        let mut lp = EventLoop::new(VirtualClock::new());
        let p = lp.resolved(HostValue::Number(3.0));
        let derived = lp.then(&p, None, None).unwrap();
        assert_eq!(lp.stats().microtasks, 1);
        assert!(derived.as_promise().unwrap().is_pending());
    }

    #[test]
    fn test_settle_only_once_and_wake_reactions() {
        let mut lp = EventLoop::new(VirtualClock::new());
        let p = PromiseObject::pending();
        lp.then(&p, None, None).unwrap();
        lp.then(&p, None, None).unwrap();
        assert_eq!(lp.stats().microtasks, 0);

        lp.reject(&p, HostValue::string("no"));
        lp.resolve(&p, HostValue::Number(1.0));
        assert_eq!(lp.stats().microtasks, 2);
        assert!(matches!(p.as_promise().unwrap().state(), PromiseState::Rejected(_)));
    }

    #[test]
    fn test_resolve_with_promise_adopts_it() {
        let mut lp = EventLoop::new(VirtualClock::new());
        let inner = PromiseObject::pending();
        let outer = PromiseObject::pending();
        lp.resolve(&outer, HostValue::Object(inner.clone()));
        assert!(outer.as_promise().unwrap().is_pending());
        assert!(lp.resolved(HostValue::Object(inner.clone())).ptr_eq(&inner));

        lp.resolve(&inner, HostValue::Bool(true));
        assert_eq!(lp.stats().microtasks, 1);
    }

    #[test]
    fn test_then_on_non_promise_is_type_error() {
        let mut lp = EventLoop::new(VirtualClock::new());
        let plain = ObjectRef::new(crate::value::PlainObject::new());
        assert!(lp.then(&plain, None, None).is_err());
    }
}
