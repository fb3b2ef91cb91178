//! Shared guest fixture for the integration tests
//!
//! A hand-written guest that follows the bindgen export contract: a bump
//! allocator, counters the tests read back, and a handful of entry points
//! that exercise strings, closures and the exception channel.

#![allow(dead_code)]

use guest_bridge::{BridgeConfig, GuestInstance, Loader, SharedGuestInstance};

pub const GUEST_WAT: &str = r#"
(module
  (import "wbg" "__wbindgen_init_externref_table" (func $init_table))
  (import "wbg" "__wbindgen_string_new" (func $string_new (param i32 i32) (result i32)))
  (import "wbg" "__wbindgen_string_get" (func $string_get (param i32 i32)))
  (import "wbg" "__wbindgen_object_drop_ref" (func $drop_ref (param i32)))
  (import "wbg" "__wbindgen_throw" (func $throw (param i32 i32)))
  (import "wbg" "__wbindgen_rethrow" (func $rethrow (param i32)))
  (import "wbg" "__wbindgen_exn_take" (func $exn_take (result i32)))
  (import "wbg" "__wbindgen_closure_new" (func $closure_new (param i32 i32 i32 i32) (result i32)))
  (import "wbg" "__wbindgen_cb_drop" (func $cb_drop (param i32) (result i32)))
  (import "wbg" "__wbindgen_object_clone_ref" (func $clone_ref (param i32) (result i32)))
  (import "wbg" "__wbg_setTimeout" (func $set_timeout (param i32 i32) (result i32)))
  (import "wbg" "__wbg_clearTimeout" (func $clear_timeout (param i32)))
  (import "wbg" "__wbg_globalThis_window" (func $window (result i32)))
  (import "wbg" "__wbg_Window_crypto" (func $crypto (param i32) (result i32)))
  (import "wbg" "__wbg_Crypto_getRandomValues" (func $random_values (param i32 i32 i32)))
  (import "wbg" "__wbg_EventTarget_addEventListener" (func $add_listener (param i32 i32 i32 i32)))
  (import "wbg" "__wbg_EventTarget_removeEventListener" (func $remove_listener (param i32 i32 i32 i32)))

  (memory (export "memory") 2)
  (data (i32.const 16) "guest panicked")
  (data (i32.const 32) "click")

  (table (export "__indirect_function_table") 4 funcref)
  (elem (i32.const 1) $invoke $dtor)

  (global $heap (mut i32) (i32.const 1024))
  (global $starts (mut i32) (i32.const 0))
  (global $frees (mut i32) (i32.const 0))
  (global $reallocs (mut i32) (i32.const 0))
  (global $invokes (mut i32) (i32.const 0))
  (global $dtors (mut i32) (i32.const 0))
  (global $cb (mut i32) (i32.const 0))
  (global $alias (mut i32) (i32.const 0))
  (global $win (mut i32) (i32.const 0))

  (func $malloc (export "__wbindgen_malloc") (param $size i32) (param $align i32) (result i32)
    (local $ptr i32)
    (local.set $ptr
      (i32.and
        (i32.add (global.get $heap) (i32.sub (local.get $align) (i32.const 1)))
        (i32.sub (i32.const 0) (local.get $align))))
    (global.set $heap (i32.add (local.get $ptr) (local.get $size)))
    (local.get $ptr))

  (func (export "__wbindgen_realloc")
    (param $ptr i32) (param $old i32) (param $new i32) (param $align i32) (result i32)
    (local $fresh i32)
    (global.set $reallocs (i32.add (global.get $reallocs) (i32.const 1)))
    (local.set $fresh (call $malloc (local.get $new) (local.get $align)))
    (memory.copy (local.get $fresh) (local.get $ptr) (local.get $old))
    (local.get $fresh))

  (func (export "__wbindgen_free") (param i32 i32 i32)
    (global.set $frees (i32.add (global.get $frees) (i32.const 1))))

  (func (export "__wbindgen_start")
    (global.set $starts (i32.add (global.get $starts) (i32.const 1)))
    (call $init_table))

  (func $invoke (param $a i32) (param $b i32) (param $arg i32)
    (global.set $invokes (i32.add (global.get $invokes) (i32.const 1)))
    (call $drop_ref (local.get $arg)))

  (func $dtor (param $a i32) (param $b i32)
    (global.set $dtors (i32.add (global.get $dtors) (i32.const 1))))

  ;; (ret, ptr, len): answer with the same string through the slot at ret
  (func (export "echo") (param $ret i32) (param $ptr i32) (param $len i32)
    (local $h i32)
    (local.set $h (call $string_new (local.get $ptr) (local.get $len)))
    (call $string_get (local.get $ret) (local.get $h))
    (call $drop_ref (local.get $h)))

  (func (export "schedule") (param $delay i32) (result i32)
    (global.set $cb (call $closure_new (i32.const 7) (i32.const 0) (i32.const 2) (i32.const 1)))
    (call $set_timeout (global.get $cb) (local.get $delay)))

  (func (export "cancel") (param $id i32)
    (call $clear_timeout (local.get $id)))

  ;; click listener on window; a second handle to the closure is kept so
  ;; the guest can still remove it after `release`
  (func (export "listen")
    (global.set $cb (call $closure_new (i32.const 7) (i32.const 0) (i32.const 2) (i32.const 1)))
    (global.set $alias (call $clone_ref (global.get $cb)))
    (global.set $win (call $window))
    (call $add_listener (global.get $win) (i32.const 32) (i32.const 5) (global.get $cb)))

  (func (export "unlisten")
    (call $remove_listener (global.get $win) (i32.const 32) (i32.const 5) (global.get $alias))
    (call $drop_ref (global.get $alias)))

  ;; guest-side release; the guest frees its own environment on the last drop
  (func (export "release") (result i32)
    (local $last i32)
    (local.set $last (call $cb_drop (global.get $cb)))
    (if (local.get $last)
      (then (call $dtor (i32.const 7) (i32.const 0))))
    (local.get $last))

  ;; drop the handle without releasing the closure
  (func (export "forget")
    (call $drop_ref (global.get $cb)))

  ;; handle 3 is `true`, not a function
  (func (export "bad_timeout") (result i32)
    (local $exn i32)
    (drop (call $set_timeout (i32.const 3) (i32.const 0)))
    (local.set $exn (call $exn_take))
    (if (local.get $exn)
      (then (call $rethrow (local.get $exn))))
    (local.get $exn))

  ;; ask for 4 GiB of entropy; answers the exception handle
  (func (export "huge_random") (result i32)
    (call $random_values
      (call $crypto (call $window))
      (i32.const 0)
      (i32.const -1))
    (call $exn_take))

  (func (export "panic")
    (call $throw (i32.const 16) (i32.const 14)))

  (func (export "start_calls") (result i32) (global.get $starts))
  (func (export "free_calls") (result i32) (global.get $frees))
  (func (export "realloc_calls") (result i32) (global.get $reallocs))
  (func (export "invoke_calls") (result i32) (global.get $invokes))
  (func (export "dtor_calls") (result i32) (global.get $dtors)))
"#;

/// A guest without `__wbindgen_realloc`; strings take the encode-then-copy
/// path
pub const NO_REALLOC_WAT: &str = r#"
(module
  (import "wbg" "__wbindgen_string_new" (func $string_new (param i32 i32) (result i32)))
  (import "wbg" "__wbindgen_string_get" (func $string_get (param i32 i32)))
  (import "wbg" "__wbindgen_object_drop_ref" (func $drop_ref (param i32)))

  (memory (export "memory") 1)

  (global $heap (mut i32) (i32.const 1024))
  (global $mallocs (mut i32) (i32.const 0))

  (func (export "__wbindgen_malloc") (param $size i32) (param $align i32) (result i32)
    (local $ptr i32)
    (global.set $mallocs (i32.add (global.get $mallocs) (i32.const 1)))
    (local.set $ptr
      (i32.and
        (i32.add (global.get $heap) (i32.sub (local.get $align) (i32.const 1)))
        (i32.sub (i32.const 0) (local.get $align))))
    (global.set $heap (i32.add (local.get $ptr) (local.get $size)))
    (local.get $ptr))

  (func (export "__wbindgen_free") (param i32 i32 i32))

  (func (export "echo") (param $ret i32) (param $ptr i32) (param $len i32)
    (local $h i32)
    (local.set $h (call $string_new (local.get $ptr) (local.get $len)))
    (call $string_get (local.get $ret) (local.get $h))
    (call $drop_ref (local.get $h)))

  (func (export "malloc_calls") (result i32) (global.get $mallocs)))
"#;

/// The guest with an import the bridge does not provide
pub const UNSATISFIABLE_WAT: &str = r#"
(module
  (import "wbg" "__wbg_Nothing_here" (func (param i32) (result i32)))
  (memory (export "memory") 1)
  (func (export "__wbindgen_malloc") (param i32 i32) (result i32) (i32.const 8))
  (func (export "__wbindgen_free") (param i32 i32 i32)))
"#;

pub fn guest_bytes() -> Vec<u8> {
    wat::parse_str(GUEST_WAT).expect("guest fixture parses")
}

pub fn unsatisfiable_bytes() -> Vec<u8> {
    wat::parse_str(UNSATISFIABLE_WAT).expect("fixture parses")
}

pub fn no_realloc_bytes() -> Vec<u8> {
    wat::parse_str(NO_REALLOC_WAT).expect("fixture parses")
}

/// A started guest from a fresh loader
pub fn started_guest() -> SharedGuestInstance {
    Loader::new(BridgeConfig::default())
        .init_sync(guest_bytes())
        .expect("guest loads")
}

/// The realloc-less guest, started
pub fn started_no_realloc_guest() -> SharedGuestInstance {
    Loader::new(BridgeConfig::default())
        .init_sync(no_realloc_bytes())
        .expect("guest loads")
}

/// Read one of the guest's counter exports
pub fn counter(guest: &mut GuestInstance, name: &str) -> i32 {
    guest
        .call_typed::<(), i32>(name, ())
        .unwrap_or_else(|e| panic!("{} failed: {}", name, e))
}
