//! The `GuestRuntime` port — everything the Guest Lifecycle Controller needs
//! from a concrete wasm runtime, expressed in terms of named exports and raw
//! (ptr, len) regions. The guest's own ABI internals are out of scope; the
//! controller is the sole point where guest addresses are translated to/from
//! host pointers (SPEC_FULL.md §4.4).

use crate::error::{GuestError, Result};

/// An instantiated guest module ready to be called.
pub trait GuestInstance {
    /// Resolve whether an optional export is present.
    fn has_export(&self, name: &str) -> bool;

    /// `contract_version() -> i32`.
    fn contract_version(&mut self) -> Result<i32>;

    /// `alloc(len: i32) -> i32`. Returns the guest pointer.
    fn alloc(&mut self, len: i32) -> Result<i32>;

    /// `free(ptr: i32, len: i32)`.
    fn free(&mut self, ptr: i32, len: i32) -> Result<()>;

    /// Copy `data` into guest memory at `ptr`.
    fn write_guest_memory(&mut self, ptr: i32, data: &[u8]) -> Result<()>;

    /// Borrow `len` bytes of guest memory starting at `ptr`.
    fn read_guest_memory(&self, ptr: i32, len: i32) -> Result<Vec<u8>>;

    /// `init(api_version, args_ptr, args_len) -> i32`. Only called if the
    /// optional export is present.
    fn call_init(&mut self, api_version: i32, args_ptr: i32, args_len: i32) -> Result<i32>;

    /// `microtask_step(handle, now_ms) -> i64`.
    fn call_microtask_step(&mut self, handle: i32, now_ms: i32) -> Result<i64>;

    /// `on_gesture(kind, x, y, dx, dy, duration_ms, now_ms, flags)`.
    #[allow(clippy::too_many_arguments)]
    fn call_on_gesture(
        &mut self,
        kind: i32,
        x: i32,
        y: i32,
        dx: i32,
        dy: i32,
        duration_ms: i32,
        now_ms: i32,
        flags: i32,
    ) -> Result<()>;

    /// `on_http_request(req_id, method, uri_ptr, uri_len, body_ptr, body_len, content_len, now_ms, flags)`.
    #[allow(clippy::too_many_arguments)]
    fn call_on_http_request(
        &mut self,
        req_id: i32,
        method: i32,
        uri_ptr: i32,
        uri_len: i32,
        body_ptr: i32,
        body_len: i32,
        content_len: i32,
        now_ms: i32,
        flags: i32,
    ) -> Result<()>;

    /// `on_wifi_event(kind, now_ms, arg0, arg1)`.
    fn call_on_wifi_event(&mut self, kind: i32, now_ms: i32, arg0: i32, arg1: i32) -> Result<()>;

    /// `shutdown()`. Best-effort; never fatal to the caller.
    fn call_shutdown(&mut self);
}

/// Loads wasm bytes and produces instances. The controller owns exactly one
/// live instance at a time (SPEC_FULL.md §9: "only one instance is current").
pub trait GuestRuntime {
    type Instance: GuestInstance;

    /// Validate and instantiate a module from raw bytes.
    fn instantiate(&self, wasm_bytes: &[u8]) -> std::result::Result<Self::Instance, GuestError>;
}
