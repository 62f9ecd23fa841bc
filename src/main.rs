//! Paper Portal Host Kernel — Main Entry Point
//!
//! Hexagonal architecture: the host loop is pure logic behind the port
//! traits in `ports.rs`; this binary supplies the concrete adapters and
//! wires them together.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  JsonFileConfigSource   SystemClock   ProcessPowerControl      │
//! │  (ConfigSource)         (Clock)       (PowerControl)           │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              HostLoop (pure logic)                     │    │
//! │  │  Gesture Engine · Microtask Scheduler · GLC             │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The touch/HTTP/Wi-Fi/filesystem/devserver adapters are out of this
//! specification's scope (SPEC_FULL.md §1); this binary wires in inert
//! stand-ins so the loop is runnable standalone. A deployment that owns
//! real hardware and an HTTP devserver supplies its own adapters and
//! calls into `paperportal_kernel::host_loop` directly.
#![deny(unused_must_use)]

use std::fs;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use log::{info, warn};

use paperportal_kernel::config::HostConfig;
use paperportal_kernel::events::EventQueue;
use paperportal_kernel::guest::wasmtime_runtime::WasmtimeRuntime;
use paperportal_kernel::host_loop::{HostLoop, LoopPorts};
use paperportal_kernel::ports::{
    AppFilesystem, AppFilesystemError, Clock, ConfigSource, ConfigSourceError, DevServer,
    HttpRequestHandle, HttpServer, PowerControl, TouchEvent, TouchSource, WifiService,
};

const CONFIG_PATH: &str = "paperportal.json";
const LAUNCHER_PATH: &str = "launcher.wasm";

/// Reads `paperportal.json` next to the binary; falls back to
/// [`HostConfig::default`] on any read or parse failure (§10).
struct JsonFileConfigSource {
    path: &'static str,
}

impl ConfigSource for JsonFileConfigSource {
    fn load(&self) -> std::result::Result<HostConfig, ConfigSourceError> {
        let text = fs::read_to_string(self.path).map_err(|_| ConfigSourceError::NotFound)?;
        serde_json::from_str(&text).map_err(|_| ConfigSourceError::ParseError)
    }
}

/// Monotonic milliseconds since process start.
struct SystemClock {
    start: Instant,
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

/// No touch hardware wired in; a real deployment supplies its own driver
/// behind this port.
struct NullTouchSource;

impl TouchSource for NullTouchSource {
    fn poll(&mut self) -> Option<TouchEvent> {
        None
    }
}

/// No HTTP server wired in.
struct NullHttpServer;

impl HttpServer for NullHttpServer {
    fn get_request(&self, _req_id: u32) -> Option<HttpRequestHandle> {
        None
    }
    fn read_body(&self, _req_id: u32, _buf: &mut [u8]) -> usize {
        0
    }
}

/// No Wi-Fi service wired in; reports access-point-down so a (never-sent)
/// STA-disconnected event would trigger devserver shutdown rather than
/// silently doing nothing.
struct NullWifiService;

impl WifiService for NullWifiService {
    fn is_access_point_running(&self) -> bool {
        false
    }
}

/// No devserver wired in; always inactive so the idle timer behaves as if
/// no developer session is in progress.
struct NullDevServer;

impl DevServer for NullDevServer {
    fn is_active(&self) -> bool {
        false
    }
    fn notify_uploaded_started(&self) {}
    fn notify_uploaded_stopped(&self) {}
    fn notify_uploaded_crashed(&self, reason: &str) {
        warn!("uploaded app crashed: {reason}");
    }
    fn notify_server_error(&self, message: &str) {
        warn!("devserver error: {message}");
    }
    fn uploaded_running(&self) -> bool {
        false
    }
    fn uploaded_crashed(&self) -> bool {
        false
    }
    fn request_stop(&self) {}
}

/// Reads guest module bytes from the current working directory's `apps/`
/// tree, mirroring the contract's `apps/<id>/app.wasm` path convention.
struct CwdAppFilesystem;

impl AppFilesystem for CwdAppFilesystem {
    fn read_file(&self, path: &str) -> std::result::Result<Vec<u8>, AppFilesystemError> {
        fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppFilesystemError::NotFound
            } else {
                AppFilesystemError::IoError
            }
        })
    }

    fn read_entrypoint_override(&self) -> Option<Vec<u8>> {
        fs::read("entrypoint.wasm").ok()
    }
}

/// Logs and exits the process; a real deployment wires this to its
/// display/GPIO power-off sequence.
struct ProcessPowerControl;

impl PowerControl for ProcessPowerControl {
    fn power_off(&self) {
        info!("power-off requested; exiting");
        std::process::exit(0);
    }
}

fn main() -> Result<()> {
    env_logger::init();

    info!("paperportal-kernel v{}", env!("CARGO_PKG_VERSION"));

    // ── Config load with fallback ──────────────────────────────
    let config_source = JsonFileConfigSource { path: CONFIG_PATH };
    let config = match config_source.load() {
        Ok(cfg) => {
            info!("config loaded from {CONFIG_PATH}");
            cfg
        }
        Err(_) => {
            warn!("no usable config at {CONFIG_PATH}, using defaults");
            HostConfig::default()
        }
    };

    // ── Launcher module bytes ──────────────────────────────────
    let filesystem = CwdAppFilesystem;
    let launcher_bytes = filesystem
        .read_entrypoint_override()
        .or_else(|| fs::read(LAUNCHER_PATH).ok())
        .unwrap_or_default();
    if launcher_bytes.is_empty() {
        warn!("no launcher module found at {LAUNCHER_PATH} or entrypoint.wasm; starting with an empty module");
    }

    // ── Construct adapters ─────────────────────────────────────
    let queue = Arc::new(EventQueue::new(config.queue_depth));
    let runtime = WasmtimeRuntime::new();
    let clock = SystemClock { start: Instant::now() };
    let now_ms = clock.now_ms();

    let mut host_loop = HostLoop::new(config, runtime, queue.clone(), now_ms);
    if let Err(e) = host_loop.request_app_switch("launcher", "") {
        warn!("launcher app id rejected at startup: {e}");
    }

    let mut touch = NullTouchSource;
    let http = NullHttpServer;
    let wifi = NullWifiService;
    let devserver = NullDevServer;
    let power = ProcessPowerControl;

    info!("system ready, entering event loop");

    loop {
        let mut ports = LoopPorts {
            touch: &mut touch,
            http: &http,
            wifi: &wifi,
            devserver: &devserver,
            power: &power,
            filesystem: &filesystem,
            clock: &clock,
        };
        host_loop.run_iteration(&mut ports, &launcher_bytes);
    }
}
