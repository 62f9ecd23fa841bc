//! Guest Lifecycle Controller — owns the guest's load → instantiate → call →
//! unload cycle, validates the contract, and recovers from crashes.
//!
//! ```text
//!  Stopped ──Load──▶ Loaded ──Instantiate──▶ Ready ──Init──▶ Running
//!     ▲                                         │              │
//!     │                                         ▼              ▼
//!     └───────────── Unload ◀───────── Faulted ◀── exception ──┘
//! ```

use log::{error, info, warn};

use super::contract::{self, is_valid_app_id};
use super::runtime::{GuestInstance, GuestRuntime};
use crate::error::{GuestError, Result};
use crate::ports::AppFilesystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestState {
    Stopped,
    Loaded,
    Ready,
    Running,
    Faulted,
}

/// Where a given app id resolves to, per SPEC_FULL.md §4.4/§6.
pub enum AppSource {
    Embedded,
    FilesystemPath(String),
}

/// Resolve an app id to a source. Returns `None` for a malformed id —
/// callers must reject before mutating any pending-switch state.
pub fn resolve_app_id(app_id: &str) -> Option<AppSource> {
    if !is_valid_app_id(app_id) {
        return None;
    }
    if app_id == contract::EMBEDDED_APP_LAUNCHER || app_id == contract::EMBEDDED_APP_SETTINGS {
        Some(AppSource::Embedded)
    } else {
        Some(AppSource::FilesystemPath(format!("apps/{app_id}/app.wasm")))
    }
}

pub struct GuestLifecycleController<R: GuestRuntime> {
    runtime: R,
    state: GuestState,
    instance: Option<R::Instance>,
    module_bytes: Option<Vec<u8>>,
    current_app_id: Option<String>,
    is_uploaded: bool,
    dispatch_enabled: bool,
    last_crash_reason: Option<String>,
}

impl<R: GuestRuntime> GuestLifecycleController<R> {
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            state: GuestState::Stopped,
            instance: None,
            module_bytes: None,
            current_app_id: None,
            is_uploaded: false,
            dispatch_enabled: false,
            last_crash_reason: None,
        }
    }

    pub fn state(&self) -> GuestState {
        self.state
    }

    pub fn dispatch_enabled(&self) -> bool {
        self.dispatch_enabled
    }

    pub fn last_crash_reason(&self) -> Option<&str> {
        self.last_crash_reason.as_deref()
    }

    /// Take ownership of module bytes without reading from any source
    /// (direct upload path).
    pub fn load_bytes(&mut self, app_id: &str, bytes: Vec<u8>, is_uploaded: bool) {
        self.module_bytes = Some(bytes);
        self.current_app_id = Some(app_id.to_string());
        self.is_uploaded = is_uploaded;
        self.state = GuestState::Loaded;
        info!("guest loaded: app_id={app_id}");
    }

    /// Load from the mounted external filesystem.
    pub fn load_file(&mut self, fs: &dyn AppFilesystem, app_id: &str, path: &str) -> Result<()> {
        let bytes = fs
            .read_file(path)
            .map_err(|_| GuestError::LoadFailed(format!("read failed: {path}")))?;
        self.load_bytes(app_id, bytes, true);
        Ok(())
    }

    /// Build an instance and resolve required/optional exports. Validates
    /// the contract version.
    pub fn instantiate(&mut self) -> Result<()> {
        let bytes = self
            .module_bytes
            .as_ref()
            .ok_or_else(|| GuestError::WrongState { expected: "Loaded", actual: "Stopped" })?;
        let mut instance = self.runtime.instantiate(bytes)?;

        let got = instance.contract_version()?;
        if got != contract::CONTRACT_VERSION {
            return Err(GuestError::ContractMismatch { expected: contract::CONTRACT_VERSION, got }.into());
        }

        self.instance = Some(instance);
        self.state = GuestState::Ready;
        info!("guest instantiated and contract verified");
        Ok(())
    }

    /// Invoke `init(api_version, args_ptr, args_len)` if present, else
    /// transition straight to Running.
    pub fn call_init(&mut self, api_version: i32, args: &str) -> Result<()> {
        let instance = self.require_instance()?;
        if instance.has_export(contract::EXPORT_INIT) {
            let args_bytes = args.as_bytes();
            let args_ptr = if args_bytes.is_empty() {
                0
            } else {
                let ptr = instance.alloc(args_bytes.len() as i32)?;
                instance.write_guest_memory(ptr, args_bytes)?;
                ptr
            };
            let result = instance.call_init(api_version, args_ptr, args_bytes.len() as i32);
            if args_ptr != 0 {
                let _ = instance.free(args_ptr, args_bytes.len() as i32);
            }
            match result {
                Ok(_) => {}
                Err(e) => return self.fault(e.to_string()),
            }
        }
        self.state = GuestState::Running;
        self.dispatch_enabled = true;
        Ok(())
    }

    pub fn call_on_gesture(
        &mut self,
        kind: i32,
        x: i32,
        y: i32,
        dx: i32,
        dy: i32,
        duration_ms: i32,
        now_ms: i32,
        flags: i32,
    ) -> Result<()> {
        if !self.dispatch_enabled {
            return Ok(());
        }
        let instance = self.require_instance()?;
        if !instance.has_export(contract::EXPORT_ON_GESTURE) {
            return Ok(());
        }
        match instance.call_on_gesture(kind, x, y, dx, dy, duration_ms, now_ms, flags) {
            Ok(()) => Ok(()),
            Err(e) => self.fault(e.to_string()),
        }
    }

    pub fn call_on_wifi(&mut self, kind: i32, now_ms: i32, arg0: i32, arg1: i32) -> Result<()> {
        if !self.dispatch_enabled {
            return Ok(());
        }
        let instance = self.require_instance()?;
        if !instance.has_export(contract::EXPORT_ON_WIFI_EVENT) {
            return Ok(());
        }
        match instance.call_on_wifi_event(kind, now_ms, arg0, arg1) {
            Ok(()) => Ok(()),
            Err(e) => self.fault(e.to_string()),
        }
    }

    /// Copy `uri`/`body` into guest memory and forward the HTTP request.
    #[allow(clippy::too_many_arguments)]
    pub fn call_on_http(
        &mut self,
        req_id: i32,
        method: i32,
        uri: &str,
        body: &[u8],
        content_len: i32,
        now_ms: i32,
        flags: i32,
    ) -> Result<()> {
        if !self.dispatch_enabled {
            return Ok(());
        }
        let instance = self.require_instance()?;
        if !instance.has_export(contract::EXPORT_ON_HTTP_REQUEST) {
            return Ok(());
        }

        let uri_bytes = uri.as_bytes();
        let uri_ptr = instance.alloc(uri_bytes.len() as i32)?;
        instance.write_guest_memory(uri_ptr, uri_bytes)?;

        let body_ptr = if body.is_empty() { 0 } else { instance.alloc(body.len() as i32)? };
        if body_ptr != 0 {
            instance.write_guest_memory(body_ptr, body)?;
        }

        let result = instance.call_on_http_request(
            req_id,
            method,
            uri_ptr,
            uri_bytes.len() as i32,
            body_ptr,
            body.len() as i32,
            content_len,
            now_ms,
            flags,
        );

        let _ = instance.free(uri_ptr, uri_bytes.len() as i32);
        if body_ptr != 0 {
            let _ = instance.free(body_ptr, body.len() as i32);
        }

        match result {
            Ok(()) => Ok(()),
            Err(e) => self.fault(e.to_string()),
        }
    }

    pub fn call_microtask_step(&mut self, handle: i32, now_ms: i32) -> std::result::Result<i64, ()> {
        if !self.dispatch_enabled {
            return Err(());
        }
        let instance = match &mut self.instance {
            Some(i) => i,
            None => return Err(()),
        };
        match instance.call_microtask_step(handle, now_ms) {
            Ok(raw) => Ok(raw),
            Err(e) => {
                let _ = self.fault(e.to_string());
                Err(())
            }
        }
    }

    /// Best-effort; never fatal.
    pub fn call_shutdown(&mut self) {
        if let Some(instance) = &mut self.instance {
            if instance.has_export(contract::EXPORT_SHUTDOWN) {
                instance.call_shutdown();
            }
        }
    }

    pub fn unload(&mut self) {
        self.call_shutdown();
        self.instance = None;
        self.module_bytes = None;
        self.current_app_id = None;
        self.is_uploaded = false;
        self.dispatch_enabled = false;
        self.state = GuestState::Stopped;
        info!("guest unloaded");
    }

    /// Called after each dispatch and microtask run. If dispatch is
    /// disabled and the uploaded app is confirmed crashed by the devserver,
    /// unload and reload the embedded launcher.
    pub fn maybe_recover_uploaded_crash(
        &mut self,
        devserver_confirms_crashed: bool,
        launcher_bytes: Vec<u8>,
    ) -> Result<bool> {
        if self.dispatch_enabled || !self.is_uploaded || !devserver_confirms_crashed {
            return Ok(false);
        }
        self.unload();
        self.load_bytes(contract::EMBEDDED_APP_LAUNCHER, launcher_bytes, false);
        match self.instantiate().and_then(|()| self.call_init(1, "")) {
            Ok(()) => {
                info!("crashed; returned to launcher");
                Ok(true)
            }
            Err(e) => {
                error!("launcher recovery failed: {e}");
                Err(e)
            }
        }
    }

    fn fault(&mut self, reason: String) -> Result<()> {
        warn!("guest trapped: {reason}");
        self.last_crash_reason = Some(reason.clone());
        self.dispatch_enabled = false;
        self.state = GuestState::Faulted;
        Err(GuestError::GuestTrapped(reason).into())
    }

    fn require_instance(&mut self) -> Result<&mut R::Instance> {
        self.instance
            .as_mut()
            .ok_or_else(|| GuestError::WrongState { expected: "Ready/Running", actual: "Stopped" }.into())
    }
}
