//! Port traits — the hexagonal boundary between the core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ host_loop (core)
//! ```
//!
//! Every external collaborator named in the system overview — touch hardware,
//! HTTP server, Wi-Fi service, filesystem/KV store, developer devserver, the
//! guest runtime itself, configuration storage, and wall-clock time — is
//! represented here as a trait with no behavior beyond what the core needs to
//! compile and test against a fake. Concrete adapters live outside this
//! crate's test boundary; only fakes are provided alongside the tests.
//!
//! ## Security notes
//!
//! - **ConfigSource** implementations load host tunables only; they MUST NOT
//!   be reachable from the guest.
//! - **DevServer** implementations own the only cross-thread mutable state
//!   besides the event queue; they MUST serialize their own internal access.

use crate::config::HostConfig;

// ───────────────────────────────────────────────────────────────
// Touch source (driven adapter: touch hardware → core)
// ───────────────────────────────────────────────────────────────

/// A single touch transition as abstracted by the (out-of-scope) touch
/// hardware driver. The core never reads raw ADC samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TouchEvent {
    Down { pointer_id: u32, x: f32, y: f32 },
    Move { pointer_id: u32, x: f32, y: f32 },
    Up { pointer_id: u32, x: f32, y: f32 },
    Cancel { pointer_id: u32 },
}

/// Read-side port: the loop polls this at its current cadence.
pub trait TouchSource {
    /// Return the next pending touch transition, if any, without blocking.
    fn poll(&mut self) -> Option<TouchEvent>;
}

// ───────────────────────────────────────────────────────────────
// HTTP server (driven adapter: HTTP server → core, core → HTTP server)
// ───────────────────────────────────────────────────────────────

/// A pending HTTP request owned by the HTTP server collaborator, looked up
/// by the opaque id carried in [`crate::events::HostEvent::HttpRequest`].
pub struct HttpRequestHandle {
    pub method: heapless::String<8>,
    pub uri: heapless::String<256>,
    pub content_len: u32,
}

/// Port through which the loop reads a queued request's metadata/body and
/// reports the handler outcome back to the HTTP server.
pub trait HttpServer {
    /// Look up a previously queued request by id.
    fn get_request(&self, req_id: u32) -> Option<HttpRequestHandle>;

    /// Read up to `buf.len()` body bytes for `req_id`. Returns the number of
    /// bytes actually read; fewer than requested means the transport read
    /// underran (the caller must still set the truncation flag).
    fn read_body(&self, req_id: u32, buf: &mut [u8]) -> usize;
}

// ───────────────────────────────────────────────────────────────
// Wi-Fi service (driven adapter: Wi-Fi service → core)
// ───────────────────────────────────────────────────────────────

/// Kinds mirrored from the guest ABI's wifi event constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiEventKind {
    StaStart,
    StaDisconnected,
    StaGotIp,
}

/// Port the loop uses to tell the Wi-Fi service collaborator to stop acting
/// as an access point (e.g. when the devserver should go offline).
pub trait WifiService {
    fn is_access_point_running(&self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Guest filesystem (driven adapter: core ↔ external filesystem/KV store)
// ───────────────────────────────────────────────────────────────

/// Port for resolving and reading guest module bytes from the mounted
/// external filesystem (uploaded apps, launcher override).
pub trait AppFilesystem {
    /// Read the full contents of `path` (e.g. `<mount>/apps/<id>/app.wasm`).
    fn read_file(&self, path: &str) -> Result<Vec<u8>, AppFilesystemError>;

    /// Check whether a host override launcher exists at `<mount>/entrypoint.wasm`.
    fn read_entrypoint_override(&self) -> Option<Vec<u8>>;
}

#[derive(Debug)]
pub enum AppFilesystemError {
    NotFound,
    IoError,
}

// ───────────────────────────────────────────────────────────────
// Developer devserver (driven adapter: core ↔ devserver surface)
// ───────────────────────────────────────────────────────────────

/// Port through which the loop reports guest lifecycle outcomes to the
/// developer-facing HTTP devserver and queries its activity state for the
/// idle timer. Mirrors the pre-distillation devserver service surface.
pub trait DevServer {
    /// True if the devserver is running OR starting; both suppress the idle
    /// timer identically (see SPEC_FULL.md design notes — not an oversight).
    fn is_active(&self) -> bool;

    /// Record that the uploaded app started successfully.
    fn notify_uploaded_started(&self);

    /// Record that the uploaded app stopped (requested, not a crash).
    fn notify_uploaded_stopped(&self);

    /// Record that the uploaded app crashed, with a human-readable reason.
    fn notify_uploaded_crashed(&self, reason: &str);

    /// Record a non-crash devserver-level error (e.g. STA disconnected with
    /// no access point running).
    fn notify_server_error(&self, message: &str);

    /// Whether the uploaded app is currently marked running.
    fn uploaded_running(&self) -> bool;

    /// Whether the uploaded app is currently marked crashed.
    fn uploaded_crashed(&self) -> bool;

    /// Request the devserver itself stop (e.g. on STA disconnect).
    fn request_stop(&self);
}

// ───────────────────────────────────────────────────────────────
// Guest runtime (driven adapter: core ↔ wasm runtime)
// ───────────────────────────────────────────────────────────────

/// Everything the Guest Lifecycle Controller needs from a concrete wasm
/// runtime, expressed in terms of named exports and raw (ptr, len) regions.
/// See `src/guest/runtime.rs` for the full trait and `src/guest/wasmtime_runtime.rs`
/// for the adapter.
pub use crate::guest::runtime::GuestRuntime;

// ───────────────────────────────────────────────────────────────
// Configuration source (driven adapter: core ↔ config storage)
// ───────────────────────────────────────────────────────────────

/// Loads host-internal configuration. Never guest-visible, never part of the
/// guest contract.
pub trait ConfigSource {
    /// Load configuration, falling back to [`HostConfig::default`] on any
    /// read or parse failure (the caller logs the fallback, this port does
    /// not).
    fn load(&self) -> Result<HostConfig, ConfigSourceError>;
}

#[derive(Debug)]
pub enum ConfigSourceError {
    NotFound,
    ParseError,
    IoError,
}

// ───────────────────────────────────────────────────────────────
// Clock (driven adapter: core ↔ wall clock)
// ───────────────────────────────────────────────────────────────

/// Monotonic milliseconds-since-boot clock, abstracted so tests can control
/// time deterministically.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

// ───────────────────────────────────────────────────────────────
// Power control (driven adapter: core → power/display hardware)
// ───────────────────────────────────────────────────────────────

/// The loop calls this on idle timeout or system-sleep-gesture match. The
/// GPIO pulse sequence / deep-sleep entry is entirely out of scope here.
pub trait PowerControl {
    fn power_off(&self);
}
