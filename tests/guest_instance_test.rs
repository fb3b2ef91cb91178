//! Integration tests for a started guest
//!
//! Strings crossing the boundary in both directions, the exception channel
//! and closure lifetimes, all against the fixture guest in `common`.

mod common;

use common::{counter, started_guest, started_no_realloc_guest};
use guest_bridge::RuntimeError;
use host_bridge::codec::{pass_string, read_bytes, read_string, take_vector_len};
use host_bridge::error::BridgeError;
use host_bridge::platform::InputEvent;
use host_bridge::table::FIRST_DYNAMIC_HANDLE;

// =========================================
// STRINGS
// =========================================

#[test]
fn test_string_round_trip() {
    let instance = started_guest();
    let mut guest = instance.lock();

    for input in ["hello", "héllo", "", "日本語のテキスト", "mixed ascii then ü and 🦀"] {
        let echoed = guest.call_str_to_str("echo", input).unwrap();
        assert_eq!(echoed, input);
    }
}

#[test]
fn test_ascii_string_is_written_in_place() {
    let instance = started_guest();
    let mut guest = instance.lock();
    let store = guest.store_mut();

    let ptr = pass_string(&mut *store, "hello").unwrap();
    let len = take_vector_len(&mut *store).unwrap();
    assert_eq!(len, 5);
    assert_eq!(read_bytes(&mut *store, ptr, len).unwrap(), b"hello");
    assert_eq!(counter(&mut guest, "realloc_calls"), 0);
}

#[test]
fn test_non_ascii_string_grows_through_realloc() {
    let instance = started_guest();
    let mut guest = instance.lock();
    let store = guest.store_mut();

    let ptr = pass_string(&mut *store, "héllo").unwrap();
    let len = take_vector_len(&mut *store).unwrap();
    assert_eq!(len, 6);
    assert_eq!(read_bytes(&mut *store, ptr, len).unwrap(), "héllo".as_bytes());
    assert_eq!(counter(&mut guest, "realloc_calls"), 1);
}

#[test]
fn test_empty_string_has_zero_length() {
    let instance = started_guest();
    let mut guest = instance.lock();
    let store = guest.store_mut();

    pass_string(&mut *store, "").unwrap();
    assert_eq!(take_vector_len(&mut *store).unwrap(), 0);
}

#[test]
fn test_strings_without_realloc_are_copied_whole() {
    let instance = started_no_realloc_guest();
    let mut guest = instance.lock();
    assert!(!guest.has_export("__wbindgen_realloc"));

    for (input, expected) in [("hello", 5), ("héllo", 6), ("", 0)] {
        let before = counter(&mut guest, "malloc_calls");
        let store = guest.store_mut();
        let ptr = pass_string(&mut *store, input).unwrap();
        let len = take_vector_len(&mut *store).unwrap();
        assert_eq!(len, expected);
        assert_eq!(read_bytes(&mut *store, ptr, len).unwrap(), input.as_bytes());
        assert_eq!(counter(&mut guest, "malloc_calls"), before + 1);
    }

    for input in ["hello", "héllo", "", "🦀"] {
        assert_eq!(guest.call_str_to_str("echo", input).unwrap(), input);
    }
}

#[test]
fn test_empty_read_does_not_touch_memory() {
    let instance = started_guest();
    let mut guest = instance.lock();

    let rebuilds = guest.bridge().views.rebuilds();
    let store = guest.store_mut();
    assert_eq!(read_string(&mut *store, u32::MAX, 0).unwrap(), "");
    assert_eq!(guest.bridge().views.rebuilds(), rebuilds);

    let store = guest.store_mut();
    assert!(read_string(&mut *store, u32::MAX, 1).is_err());
}

#[test]
fn test_length_register_is_consumed() {
    let instance = started_guest();
    let mut guest = instance.lock();
    let store = guest.store_mut();

    pass_string(&mut *store, "once").unwrap();
    assert_eq!(take_vector_len(&mut *store).unwrap(), 4);
    assert!(take_vector_len(&mut *store).is_err());
}

#[test]
fn test_returned_strings_are_freed() {
    let instance = started_guest();
    let mut guest = instance.lock();

    let before = counter(&mut guest, "free_calls");
    guest.call_str_to_str("echo", "abc").unwrap();
    // the answer buffer and the return slot
    assert_eq!(counter(&mut guest, "free_calls"), before + 2);
}

// =========================================
// EXCEPTIONS
// =========================================

#[test]
fn test_host_exception_reaches_the_caller() {
    let instance = started_guest();
    let mut guest = instance.lock();

    let err = guest.call_typed::<(), i32>("bad_timeout", ()).unwrap_err();
    let exception = err.host_exception().expect("a host exception");
    assert_eq!(exception.name, "TypeError");
    assert!(exception.message.contains("setTimeout"));
    assert!(exception.message.contains("not of type 'Function'"));
}

#[test]
fn test_rethrown_exception_handle_is_released() {
    let instance = started_guest();
    let mut guest = instance.lock();

    let live = guest.bridge().table.live();
    let _ = guest.call_typed::<(), i32>("bad_timeout", ());
    assert_eq!(guest.bridge().table.live(), live);
}

#[test]
fn test_oversized_random_request_is_refused() {
    let instance = started_guest();
    let mut guest = instance.lock();

    let handle = guest.call_typed::<(), i32>("huge_random", ()).unwrap();
    assert!(handle > 0);
    let exception = guest
        .bridge()
        .table
        .get(handle as u32)
        .and_then(|v| v.as_object())
        .and_then(|o| o.as_exception().cloned())
        .expect("an exception handle");
    assert_eq!(exception.name, "QuotaExceededError");
    assert!(exception.message.contains("4294967295"));
}

#[test]
fn test_guest_throw_carries_its_message() {
    let instance = started_guest();
    let mut guest = instance.lock();

    let err = guest.call("panic").unwrap_err();
    assert_eq!(err.message(), "guest panicked");
    assert!(matches!(
        err,
        RuntimeError::GuestCall {
            source: BridgeError::GuestThrow(_),
            ..
        }
    ));
    assert_eq!(
        guest.store_mut().data().last_error.as_deref(),
        Some("guest panicked")
    );
}

#[test]
fn test_missing_entry_point_is_a_guest_call_error() {
    let instance = started_guest();
    let mut guest = instance.lock();

    let err = guest.call("no_such_export").unwrap_err();
    assert!(err.to_string().contains("no_such_export"));
}

// =========================================
// CLOSURES
// =========================================

#[test]
fn test_timer_invokes_closure() {
    let instance = started_guest();
    let mut guest = instance.lock();

    let id = guest.call_typed::<i32, i32>("schedule", 10).unwrap();
    assert!(id > 0);
    assert_eq!(guest.loop_stats().timers, 1);

    assert_eq!(guest.advance(5.0).unwrap(), 0);
    assert_eq!(counter(&mut guest, "invoke_calls"), 0);

    assert_eq!(guest.advance(5.0).unwrap(), 1);
    assert_eq!(counter(&mut guest, "invoke_calls"), 1);
    assert_eq!(guest.loop_stats().timers, 0);
}

#[test]
fn test_released_closure_is_destroyed_exactly_once() {
    let instance = started_guest();
    let mut guest = instance.lock();

    guest.call_typed::<i32, i32>("schedule", 0).unwrap();
    guest.advance(1.0).unwrap();

    assert_eq!(guest.call_typed::<(), i32>("release", ()).unwrap(), 1);
    assert_eq!(counter(&mut guest, "dtor_calls"), 1);

    assert_eq!(guest.sweep_closures().unwrap(), 0);
    assert_eq!(counter(&mut guest, "dtor_calls"), 1);
    assert_eq!(guest.bridge().closures.watched(), 0);
}

#[test]
fn test_forgotten_closure_is_finalised_by_sweep() {
    let instance = started_guest();
    let mut guest = instance.lock();

    guest.call_typed::<i32, i32>("schedule", 0).unwrap();
    guest.advance(1.0).unwrap();
    guest.call("forget").unwrap();

    assert_eq!(guest.sweep_closures().unwrap(), 1);
    assert_eq!(counter(&mut guest, "dtor_calls"), 1);

    assert_eq!(guest.sweep_closures().unwrap(), 0);
    assert_eq!(counter(&mut guest, "dtor_calls"), 1);
}

#[test]
fn test_pending_timer_keeps_closure_alive() {
    let instance = started_guest();
    let mut guest = instance.lock();

    guest.call_typed::<i32, i32>("schedule", 50).unwrap();
    guest.call("forget").unwrap();
    assert_eq!(guest.sweep_closures().unwrap(), 0);

    guest.advance(50.0).unwrap();
    assert_eq!(counter(&mut guest, "invoke_calls"), 1);
    assert_eq!(guest.sweep_closures().unwrap(), 1);
}

#[test]
fn test_listener_keeps_closure_alive_after_guest_release() {
    let instance = started_guest();
    let mut guest = instance.lock();

    guest.call("listen").unwrap();
    // the listener still holds a reference
    assert_eq!(guest.call_typed::<(), i32>("release", ()).unwrap(), 0);

    let window = guest.window();
    guest.dispatch_event(&window, &InputEvent::plain("click")).unwrap();
    assert_eq!(counter(&mut guest, "invoke_calls"), 1);
    assert_eq!(counter(&mut guest, "dtor_calls"), 0);

    guest.call("unlisten").unwrap();
    assert_eq!(counter(&mut guest, "dtor_calls"), 1);
    assert_eq!(guest.sweep_closures().unwrap(), 0);
    assert_eq!(counter(&mut guest, "dtor_calls"), 1);
    assert_eq!(guest.bridge().closures.watched(), 0);

    guest.dispatch_event(&window, &InputEvent::plain("click")).unwrap();
    assert_eq!(counter(&mut guest, "invoke_calls"), 1);
}

#[test]
fn test_timer_outlives_guest_release() {
    let instance = started_guest();
    let mut guest = instance.lock();

    guest.call_typed::<i32, i32>("schedule", 20).unwrap();
    assert_eq!(guest.call_typed::<(), i32>("release", ()).unwrap(), 0);

    guest.advance(20.0).unwrap();
    assert_eq!(counter(&mut guest, "invoke_calls"), 1);
    assert_eq!(counter(&mut guest, "dtor_calls"), 1);
    assert_eq!(guest.sweep_closures().unwrap(), 0);
    assert_eq!(counter(&mut guest, "dtor_calls"), 1);
}

#[test]
fn test_cleared_timer_releases_its_closure() {
    let instance = started_guest();
    let mut guest = instance.lock();

    let id = guest.call_typed::<i32, i32>("schedule", 20).unwrap();
    assert_eq!(guest.call_typed::<(), i32>("release", ()).unwrap(), 0);
    guest.call_typed::<i32, ()>("cancel", id).unwrap();
    assert_eq!(counter(&mut guest, "dtor_calls"), 1);
    assert_eq!(guest.loop_stats().timers, 0);

    guest.advance(20.0).unwrap();
    assert_eq!(counter(&mut guest, "invoke_calls"), 0);
    assert_eq!(counter(&mut guest, "dtor_calls"), 1);
}

// =========================================
// REFERENCE TABLE
// =========================================

#[test]
fn test_handles_do_not_leak_across_calls() {
    let instance = started_guest();
    let mut guest = instance.lock();

    let live = guest.bridge().table.live();
    for _ in 0..16 {
        guest.call_str_to_str("echo", "transient").unwrap();
    }
    assert_eq!(guest.bridge().table.live(), live);
}

#[test]
fn test_freed_handle_reads_as_undefined() {
    let instance = started_guest();
    let mut guest = instance.lock();

    let table = &mut guest.bridge_mut().table;
    let handle = table.alloc(guest_bridge::HostValue::string("short-lived"));
    assert!(handle >= FIRST_DYNAMIC_HANDLE);
    table.free(handle);
    assert!(table.get(handle).is_none());
    assert!(table.get_or_undefined(handle).is_undefined());
}

#[test]
fn test_instance_debug_names_its_exports() {
    let instance = started_guest();
    let guest = instance.lock();

    let shown = format!("{:?}", *guest);
    assert!(shown.starts_with("GuestInstance"));
    assert!(shown.contains("echo"));
    assert!(shown.contains("start_calls: 1"));
}
