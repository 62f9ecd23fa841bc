//! Event Loop — the single thread that owns the Gesture Engine, Microtask
//! Scheduler, and Guest Lifecycle Controller, and serializes all dispatch
//! to the guest.
//!
//! One iteration, in order: compute the nearest deadline → block on the
//! queue → dispatch any delivered event → apply deferred app switch/exit →
//! idle-timeout check → touch poll step → microtask run.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::config::HostConfig;
use crate::devcommand::{DevCommand, DevCommandKind, DevCommandResult};
use crate::error::{GuestError, Result};
use crate::events::{EventQueue, GestureKind, HostEvent, WifiEventKind};
use crate::gesture::{GestureEngine, Point};
use crate::guest::{self, GuestLifecycleController, GuestRuntime};
use crate::ports::{AppFilesystem, Clock, DevServer, HttpServer, PowerControl, TouchEvent, TouchSource, WifiService};
use crate::scheduler::MicrotaskScheduler;

/// `"SLP"` — the built-in system sleep gesture (SPEC_FULL.md §4.2, §8 S3).
const SLEEP_GESTURE_ID: &str = "SLP";
const SLEEP_GESTURE_POINTS: [(f32, f32); 3] = [(280.0, 860.0), (280.0, 500.0), (280.0, 860.0)];
const SLEEP_GESTURE_TOLERANCE_PX: f32 = 100.0;
const SLEEP_GESTURE_PRIORITY: i32 = 10;
const SLEEP_GESTURE_MAX_DURATION_MS: u32 = 1500;

/// Bundle of external collaborators injected per iteration, following the
/// hexagonal port-injection style: the loop's own state lives on `HostLoop`,
/// the outside world is passed in at the call site.
pub struct LoopPorts<'a> {
    pub touch: &'a mut dyn TouchSource,
    pub http: &'a dyn HttpServer,
    pub wifi: &'a dyn WifiService,
    pub devserver: &'a dyn DevServer,
    pub power: &'a dyn PowerControl,
    pub filesystem: &'a dyn AppFilesystem,
    pub clock: &'a dyn Clock,
}

#[derive(Debug, Clone, Copy, Default)]
struct TouchTrackSynthesis {
    pointer_id: u32,
    down_ms: u32,
    down_pos: (f32, f32),
    last_pos: (f32, f32),
    dragging: bool,
    long_press_emitted: bool,
}

pub struct HostLoop<R: GuestRuntime> {
    config: HostConfig,
    queue: Arc<EventQueue>,
    gesture: GestureEngine,
    scheduler: MicrotaskScheduler,
    glc: GuestLifecycleController<R>,
    sleep_gesture_handle: u32,
    next_touch_poll_ms: u32,
    idle_deadline_ms: u32,
    touch_active: Option<TouchTrackSynthesis>,
    pending_app_switch: Option<(String, String)>,
    pending_app_exit: bool,
}

impl<R: GuestRuntime> HostLoop<R> {
    pub fn new(config: HostConfig, runtime: R, queue: Arc<EventQueue>, now_ms: u32) -> Self {
        let mut gesture = GestureEngine::new();
        let sleep_gesture_handle = gesture
            .register_polyline(
                SLEEP_GESTURE_ID,
                SLEEP_GESTURE_POINTS.iter().map(|&(x, y)| Point { x, y }).collect(),
                SLEEP_GESTURE_TOLERANCE_PX,
                true,
                true,
                SLEEP_GESTURE_PRIORITY,
                SLEEP_GESTURE_MAX_DURATION_MS,
                true,
            )
            .expect("system sleep gesture definition is well-formed");

        Self {
            config,
            queue,
            gesture,
            scheduler: MicrotaskScheduler::new(),
            glc: GuestLifecycleController::new(runtime),
            sleep_gesture_handle,
            next_touch_poll_ms: now_ms,
            idle_deadline_ms: now_ms.wrapping_add(180_000),
            touch_active: None,
            pending_app_switch: None,
            pending_app_exit: false,
        }
    }

    /// Validates the app id before mutating any pending-switch state
    /// (SPEC_FULL.md §4.4, §4.5).
    pub fn request_app_switch(&mut self, app_id: &str, args: &str) -> Result<()> {
        if guest::resolve_app_id(app_id).is_none() {
            return Err(GuestError::InvalidAppId.into());
        }
        self.pending_app_switch = Some((app_id.to_string(), args.to_string()));
        Ok(())
    }

    pub fn request_app_exit(&mut self) {
        self.pending_app_exit = true;
    }

    fn set_earliest_deadline(&self) -> u32 {
        let mut deadline = self.next_touch_poll_ms;
        let mts_due = self.scheduler.next_due_ms();
        if mts_due != crate::scheduler::NO_DUE_MS
            && crate::scheduler::time_reached(deadline, mts_due)
        {
            deadline = mts_due;
        }
        if crate::scheduler::time_reached(deadline, self.idle_deadline_ms) {
            self.idle_deadline_ms
        } else {
            deadline
        }
    }

    fn wait_duration(&self, now_ms: u32, deadline_ms: u32) -> Duration {
        if crate::scheduler::time_reached(now_ms, deadline_ms) {
            Duration::from_millis(0)
        } else {
            Duration::from_millis(deadline_ms.wrapping_sub(now_ms) as u64)
        }
    }

    /// Run exactly one iteration of the loop, per SPEC_FULL.md §4.1.
    pub fn run_iteration(&mut self, ports: &mut LoopPorts, launcher_bytes: &[u8]) {
        let now = ports.clock.now_ms();
        let deadline = self.set_earliest_deadline();
        let wait_for = self.wait_duration(now, deadline);

        if let Some(event) = self.queue.recv_timeout(wait_for) {
            self.dispatch_event(event, ports);
            self.attempt_crash_recovery(ports, launcher_bytes);
        }

        self.apply_deferred_transitions(ports, launcher_bytes);

        let now = ports.clock.now_ms();
        if ports.devserver.is_active() {
            self.idle_deadline_ms = now.wrapping_add(self.config.idle_sleep_timeout_ms);
        } else if crate::scheduler::time_reached(now, self.idle_deadline_ms) {
            info!("idle timeout reached; powering off");
            ports.power.power_off();
        }

        if crate::scheduler::time_reached(now, self.next_touch_poll_ms) {
            let observed = self.touch_poll_step(ports, now);
            let poll_interval = if self.touch_active.is_some() {
                self.config.touch_poll_active_ms
            } else {
                self.config.touch_poll_idle_ms
            };
            self.next_touch_poll_ms = now.wrapping_add(poll_interval);
            if observed {
                self.idle_deadline_ms = now.wrapping_add(self.config.idle_sleep_timeout_ms);
            }
        }

        if self.scheduler.next_due_ms() != crate::scheduler::NO_DUE_MS {
            let glc = &mut self.glc;
            self.scheduler.run_due(now, self.config.microtask_max_steps_per_wake, |handle, t| {
                glc.call_microtask_step(handle, t as i32)
            });
            self.attempt_crash_recovery(ports, launcher_bytes);
        }
    }

    fn dispatch_event(&mut self, event: HostEvent, ports: &mut LoopPorts) {
        match event {
            HostEvent::Tick { .. } => {}
            HostEvent::Gesture { kind, x, y, dx, dy, duration_ms, flags, now_ms } => {
                let _ = self.glc.call_on_gesture(
                    kind as i32, x as i32, y as i32, dx as i32, dy as i32,
                    duration_ms as i32, now_ms as i32, flags as i32,
                );
            }
            HostEvent::HttpRequest { req_id, method, content_len, now_ms } => {
                self.dispatch_http_request(req_id, &method, content_len, now_ms, ports);
            }
            HostEvent::WifiEvent { kind, arg0, arg1, now_ms } => {
                if kind == WifiEventKind::StaDisconnected && !ports.wifi.is_access_point_running() {
                    ports.devserver.request_stop();
                    ports.devserver.notify_server_error("station disconnected, no AP running");
                }
                let _ = self.glc.call_on_wifi(kind as i32, now_ms as i32, arg0, arg1);
            }
            HostEvent::DevCommand { cmd, now_ms } => {
                self.handle_dev_command(cmd, now_ms, ports);
            }
        }
    }

    fn dispatch_http_request(&mut self, req_id: u32, method: &str, content_len: u32, now_ms: u32, ports: &mut LoopPorts) {
        let Some(req) = ports.http.get_request(req_id) else {
            warn!("http request {req_id} not found at dispatch time");
            return;
        };
        let cap = self.config.http_max_body_bytes;
        let to_read = content_len.min(cap) as usize;
        let mut body = vec![0u8; to_read];
        let read = ports.http.read_body(req_id, &mut body);
        body.truncate(read);
        let truncated = content_len > cap || read < to_read;
        let flags = if truncated { crate::guest::contract::HTTP_FLAG_BODY_TRUNCATED } else { 0 };

        let method_code = match method {
            "GET" => 1,
            "POST" => 2,
            "PUT" => 3,
            "DELETE" => 4,
            _ => 0,
        };

        let _ = self.glc.call_on_http(
            req_id as i32, method_code, &req.uri, &body, content_len as i32, now_ms as i32, flags as i32,
        );
    }

    fn handle_dev_command(&mut self, cmd: DevCommand, _now_ms: u32, ports: &mut LoopPorts) {
        match cmd.kind {
            DevCommandKind::RunUploadedWasm => {
                let Some(bytes) = cmd.module_bytes else {
                    self.finish_dev_command(cmd.reply, DevCommandResult::Failed, "no module bytes supplied");
                    return;
                };
                if ports.devserver.uploaded_running() {
                    ports.devserver.notify_uploaded_stopped();
                }
                self.glc.unload();
                self.glc.load_bytes("uploaded", bytes, true);
                let outcome = self.glc.instantiate().and_then(|()| self.glc.call_init(1, cmd.args.as_str()));
                match outcome {
                    Ok(()) => {
                        ports.devserver.notify_uploaded_started();
                        self.finish_dev_command(cmd.reply, DevCommandResult::Ok, "running");
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        ports.devserver.notify_uploaded_crashed(&reason);
                        self.finish_dev_command(cmd.reply, DevCommandResult::Failed, &reason);
                    }
                }
            }
            DevCommandKind::StopUploadedWasm => {
                if !ports.devserver.uploaded_running() {
                    self.finish_dev_command(cmd.reply, DevCommandResult::Ok, "ok");
                    return;
                }
                self.glc.unload();
                ports.devserver.notify_uploaded_stopped();
                self.finish_dev_command(cmd.reply, DevCommandResult::Ok, "stopped");
            }
        }
    }

    fn finish_dev_command(&self, reply: Arc<crate::devcommand::DevCommandReply>, result: DevCommandResult, message: &str) {
        reply.complete(result, message);
    }

    fn apply_deferred_transitions(&mut self, ports: &mut LoopPorts, launcher_bytes: &[u8]) {
        if self.pending_app_switch.is_some() {
            let (app_id, args) = self.pending_app_switch.take().unwrap();
            self.pending_app_exit = false;
            self.execute_switch(&app_id, &args, ports, launcher_bytes);
        } else if self.pending_app_exit {
            self.pending_app_exit = false;
            self.glc.unload();
            self.execute_switch(crate::guest::contract::EMBEDDED_APP_LAUNCHER, "", ports, launcher_bytes);
        }
    }

    fn execute_switch(&mut self, app_id: &str, args: &str, ports: &mut LoopPorts, launcher_bytes: &[u8]) {
        self.glc.unload();
        let source = guest::resolve_app_id(app_id);
        let load_result = match source {
            Some(guest::AppSource::Embedded) => {
                self.glc.load_bytes(app_id, launcher_bytes.to_vec(), false);
                Ok(())
            }
            Some(guest::AppSource::FilesystemPath(path)) => self.glc.load_file(ports.filesystem, app_id, &path),
            None => Err(GuestError::InvalidAppId.into()),
        };

        let outcome = load_result
            .and_then(|()| self.glc.instantiate())
            .and_then(|()| self.glc.call_init(1, args));

        if let Err(e) = outcome {
            warn!("app switch to '{app_id}' failed ({e}); reloading launcher");
            self.glc.unload();
            self.glc.load_bytes(crate::guest::contract::EMBEDDED_APP_LAUNCHER, launcher_bytes.to_vec(), false);
            if let Err(e2) = self.glc.instantiate().and_then(|()| self.glc.call_init(1, "")) {
                warn!("launcher reload also failed: {e2}");
            }
        }
    }

    fn attempt_crash_recovery(&mut self, ports: &mut LoopPorts, launcher_bytes: &[u8]) {
        if self.glc.dispatch_enabled() {
            return;
        }
        match self.glc.maybe_recover_uploaded_crash(ports.devserver.uploaded_crashed(), launcher_bytes.to_vec()) {
            Ok(true) => info!("crash recovery succeeded"),
            Ok(false) => {}
            Err(e) => ports.devserver.notify_server_error(&format!("crash recovery failed: {e}")),
        }
    }

    fn touch_poll_step(&mut self, ports: &mut LoopPorts, now_ms: u32) -> bool {
        let Some(event) = ports.touch.poll() else { return false };
        self.process_touch(event, now_ms, ports);
        true
    }

    fn process_touch(&mut self, event: TouchEvent, now_ms: u32, ports: &mut LoopPorts) {
        match event {
            TouchEvent::Down { pointer_id, x, y } => {
                self.touch_active = Some(TouchTrackSynthesis {
                    pointer_id,
                    down_ms: now_ms,
                    down_pos: (x, y),
                    last_pos: (x, y),
                    dragging: false,
                    long_press_emitted: false,
                });
                self.gesture.process_touch_event(event, now_ms);
            }
            TouchEvent::Move { pointer_id, x, y } => {
                self.gesture.process_touch_event(event, now_ms);
                let Some(track) = self.touch_active.as_mut() else { return };
                if track.pointer_id != pointer_id {
                    return;
                }
                track.last_pos = (x, y);
                let dx = x - track.down_pos.0;
                let dy = y - track.down_pos.1;
                let duration = now_ms.wrapping_sub(track.down_ms);

                if !track.dragging && (dx.abs() > crate::guest::contract::TAP_MAX_MOVE_PX || dy.abs() > crate::guest::contract::TAP_MAX_MOVE_PX) {
                    track.dragging = true;
                    self.emit_synth_gesture(GestureKind::DragStart, x, y, dx, dy, duration, now_ms);
                } else if track.dragging {
                    self.emit_synth_gesture(GestureKind::DragMove, x, y, dx, dy, duration, now_ms);
                } else if !track.long_press_emitted
                    && duration >= crate::guest::contract::LONG_PRESS_MIN_DURATION_MS
                    && dx.abs() <= crate::guest::contract::TAP_MAX_MOVE_PX
                    && dy.abs() <= crate::guest::contract::TAP_MAX_MOVE_PX
                {
                    track.long_press_emitted = true;
                    self.emit_synth_gesture(GestureKind::LongPress, x, y, dx, dy, duration, now_ms);
                }
            }
            TouchEvent::Up { pointer_id, x, y } => {
                let winner = self.gesture.process_touch_event(event, now_ms);
                let Some(track) = self.touch_active.take() else { return };
                if track.pointer_id != pointer_id {
                    return;
                }
                let dx = x - track.down_pos.0;
                let dy = y - track.down_pos.1;
                let duration = now_ms.wrapping_sub(track.down_ms);

                if Some(self.sleep_gesture_handle) == winner {
                    info!("system sleep gesture matched; powering off");
                    ports.power.power_off();
                    return;
                }

                // CustomPolyline is independent of the Tap/Flick/DragEnd synthesis
                // below: a registered polyline can win alongside a drag or a tap.
                if let Some(handle) = winner {
                    let _ = self.glc.call_on_gesture(
                        GestureKind::CustomPolyline as i32, x as i32, y as i32, dx as i32, dy as i32,
                        duration as i32, now_ms as i32, handle as i32,
                    );
                }

                if track.dragging {
                    self.emit_synth_gesture(GestureKind::DragEnd, x, y, dx, dy, duration, now_ms);
                } else if !track.long_press_emitted
                    && duration <= crate::guest::contract::TAP_MAX_DURATION_MS
                    && dx.abs() <= crate::guest::contract::TAP_MAX_MOVE_PX
                    && dy.abs() <= crate::guest::contract::TAP_MAX_MOVE_PX
                {
                    self.emit_synth_gesture(GestureKind::Tap, x, y, dx, dy, duration, now_ms);
                } else if duration <= crate::guest::contract::FLICK_MAX_DURATION_MS
                    && (dx.abs() >= crate::guest::contract::FLICK_MIN_DISTANCE_PX || dy.abs() >= crate::guest::contract::FLICK_MIN_DISTANCE_PX)
                {
                    self.emit_synth_gesture(GestureKind::Flick, x, y, dx, dy, duration, now_ms);
                }
            }
            TouchEvent::Cancel { pointer_id } => {
                self.gesture.process_touch_event(event, now_ms);
                if self.touch_active.map(|t| t.pointer_id) == Some(pointer_id) {
                    self.touch_active = None;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_synth_gesture(&mut self, kind: GestureKind, x: f32, y: f32, dx: f32, dy: f32, duration_ms: u32, now_ms: u32) {
        let _ = self.glc.call_on_gesture(
            kind as i32, x as i32, y as i32, dx as i32, dy as i32, duration_ms as i32, now_ms as i32, 0,
        );
    }

    pub fn gesture_engine_mut(&mut self) -> &mut GestureEngine {
        &mut self.gesture
    }

    pub fn scheduler_mut(&mut self) -> &mut MicrotaskScheduler {
        &mut self.scheduler
    }

    pub fn glc(&self) -> &GuestLifecycleController<R> {
        &self.glc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;

    use crate::devcommand::{self, DevCommandKind};
    use crate::error::GuestError;
    use crate::guest::contract;
    use crate::guest::{GuestInstance, GuestRuntime};
    use crate::ports::{AppFilesystem, AppFilesystemError, Clock, DevServer, HttpRequestHandle, HttpServer, PowerControl, WifiService};

    #[derive(Default)]
    struct Recorder {
        gestures: RefCell<Vec<(i32, i32, i32, i32, i32, i32, i32, i32)>>,
        fail_next_gesture: Cell<bool>,
    }

    struct FakeInstance {
        recorder: Rc<Recorder>,
        alloc_cursor: i32,
    }

    impl GuestInstance for FakeInstance {
        fn has_export(&self, name: &str) -> bool {
            matches!(
                name,
                contract::EXPORT_INIT | contract::EXPORT_ON_GESTURE | contract::EXPORT_MICROTASK_STEP
            )
        }
        fn contract_version(&mut self) -> Result<i32> {
            Ok(contract::CONTRACT_VERSION)
        }
        fn alloc(&mut self, len: i32) -> Result<i32> {
            self.alloc_cursor += len.max(1);
            Ok(self.alloc_cursor)
        }
        fn free(&mut self, _ptr: i32, _len: i32) -> Result<()> {
            Ok(())
        }
        fn write_guest_memory(&mut self, _ptr: i32, _data: &[u8]) -> Result<()> {
            Ok(())
        }
        fn read_guest_memory(&self, _ptr: i32, len: i32) -> Result<Vec<u8>> {
            Ok(vec![0u8; len as usize])
        }
        fn call_init(&mut self, _api_version: i32, _args_ptr: i32, _args_len: i32) -> Result<i32> {
            Ok(0)
        }
        fn call_microtask_step(&mut self, _handle: i32, _now_ms: i32) -> Result<i64> {
            Ok(0)
        }
        fn call_on_gesture(
            &mut self, kind: i32, x: i32, y: i32, dx: i32, dy: i32, duration_ms: i32, now_ms: i32, flags: i32,
        ) -> Result<()> {
            if self.recorder.fail_next_gesture.get() {
                self.recorder.fail_next_gesture.set(false);
                return Err(GuestError::GuestTrapped("forced crash".into()).into());
            }
            self.recorder.gestures.borrow_mut().push((kind, x, y, dx, dy, duration_ms, now_ms, flags));
            Ok(())
        }
        fn call_on_http_request(
            &mut self, _r: i32, _m: i32, _up: i32, _ul: i32, _bp: i32, _bl: i32, _cl: i32, _n: i32, _f: i32,
        ) -> Result<()> {
            Ok(())
        }
        fn call_on_wifi_event(&mut self, _k: i32, _n: i32, _a0: i32, _a1: i32) -> Result<()> {
            Ok(())
        }
        fn call_shutdown(&mut self) {}
    }

    struct FakeRuntime {
        recorder: Rc<Recorder>,
    }

    impl GuestRuntime for FakeRuntime {
        type Instance = FakeInstance;
        fn instantiate(&self, _wasm_bytes: &[u8]) -> std::result::Result<Self::Instance, GuestError> {
            Ok(FakeInstance { recorder: self.recorder.clone(), alloc_cursor: 0 })
        }
    }

    struct ScriptedTouch {
        events: VecDeque<TouchEvent>,
    }

    impl TouchSource for ScriptedTouch {
        fn poll(&mut self) -> Option<TouchEvent> {
            self.events.pop_front()
        }
    }

    struct NullHttp;
    impl HttpServer for NullHttp {
        fn get_request(&self, _req_id: u32) -> Option<HttpRequestHandle> {
            None
        }
        fn read_body(&self, _req_id: u32, _buf: &mut [u8]) -> usize {
            0
        }
    }

    struct NullWifi;
    impl WifiService for NullWifi {
        fn is_access_point_running(&self) -> bool {
            false
        }
    }

    struct FakeDevServer {
        crashed: Cell<bool>,
    }
    impl DevServer for FakeDevServer {
        fn is_active(&self) -> bool {
            false
        }
        fn notify_uploaded_started(&self) {}
        fn notify_uploaded_stopped(&self) {}
        fn notify_uploaded_crashed(&self, _reason: &str) {}
        fn notify_server_error(&self, _message: &str) {}
        fn uploaded_running(&self) -> bool {
            false
        }
        fn uploaded_crashed(&self) -> bool {
            self.crashed.get()
        }
        fn request_stop(&self) {}
    }

    struct NoFilesystem;
    impl AppFilesystem for NoFilesystem {
        fn read_file(&self, _path: &str) -> std::result::Result<Vec<u8>, AppFilesystemError> {
            Err(AppFilesystemError::NotFound)
        }
        fn read_entrypoint_override(&self) -> Option<Vec<u8>> {
            None
        }
    }

    struct FakeClock {
        now: Cell<u32>,
    }
    impl Clock for FakeClock {
        fn now_ms(&self) -> u32 {
            self.now.get()
        }
    }

    struct FakePower {
        called: Cell<bool>,
    }
    impl PowerControl for FakePower {
        fn power_off(&self) {
            self.called.set(true);
        }
    }

    fn new_harness(start_ms: u32) -> (HostLoop<FakeRuntime>, Rc<Recorder>, Arc<EventQueue>) {
        let recorder = Rc::new(Recorder::default());
        let runtime = FakeRuntime { recorder: recorder.clone() };
        let queue = Arc::new(EventQueue::new(16));
        let host_loop = HostLoop::new(HostConfig::default(), runtime, queue.clone(), start_ms);
        (host_loop, recorder, queue)
    }

    // Scenario S1 — Tap (SPEC_FULL.md §8).
    #[test]
    fn tap_is_synthesized_on_quick_small_lift() {
        let (mut host_loop, recorder, _queue) = new_harness(1000);
        host_loop.request_app_switch("launcher", "").unwrap();

        let clock = FakeClock { now: Cell::new(1000) };
        let mut touch = ScriptedTouch { events: VecDeque::new() };
        let http = NullHttp;
        let wifi = NullWifi;
        let devserver = FakeDevServer { crashed: Cell::new(false) };
        let power = FakePower { called: Cell::new(false) };
        let filesystem = NoFilesystem;
        let launcher_bytes = vec![0u8, 1, 2];

        macro_rules! run {
            () => {{
                let mut ports = LoopPorts {
                    touch: &mut touch, http: &http, wifi: &wifi, devserver: &devserver,
                    power: &power, filesystem: &filesystem, clock: &clock,
                };
                host_loop.run_iteration(&mut ports, &launcher_bytes);
            }};
        }

        run!(); // applies the pending switch to launcher

        touch.events.push_back(TouchEvent::Down { pointer_id: 1, x: 100.0, y: 100.0 });
        clock.now.set(1050);
        run!();

        touch.events.push_back(TouchEvent::Up { pointer_id: 1, x: 102.0, y: 101.0 });
        clock.now.set(1070);
        run!();

        assert!(recorder.gestures.borrow().iter().any(|g| g.0 == GestureKind::Tap as i32));
        assert!(!power.called.get());
    }

    // Scenario S2 — Drag start/move/end (SPEC_FULL.md §4.2).
    #[test]
    fn drag_sequence_is_synthesized_on_large_move() {
        let (mut host_loop, recorder, _queue) = new_harness(1000);
        host_loop.request_app_switch("launcher", "").unwrap();

        let clock = FakeClock { now: Cell::new(1000) };
        let mut touch = ScriptedTouch { events: VecDeque::new() };
        let http = NullHttp;
        let wifi = NullWifi;
        let devserver = FakeDevServer { crashed: Cell::new(false) };
        let power = FakePower { called: Cell::new(false) };
        let filesystem = NoFilesystem;
        let launcher_bytes = vec![0u8, 1, 2];

        macro_rules! run {
            () => {{
                let mut ports = LoopPorts {
                    touch: &mut touch, http: &http, wifi: &wifi, devserver: &devserver,
                    power: &power, filesystem: &filesystem, clock: &clock,
                };
                host_loop.run_iteration(&mut ports, &launcher_bytes);
            }};
        }

        run!();

        touch.events.push_back(TouchEvent::Down { pointer_id: 1, x: 50.0, y: 50.0 });
        clock.now.set(1050);
        run!();

        touch.events.push_back(TouchEvent::Move { pointer_id: 1, x: 80.0, y: 50.0 });
        clock.now.set(1070);
        run!();

        touch.events.push_back(TouchEvent::Move { pointer_id: 1, x: 150.0, y: 50.0 });
        clock.now.set(1090);
        run!();

        touch.events.push_back(TouchEvent::Up { pointer_id: 1, x: 160.0, y: 50.0 });
        clock.now.set(1110);
        run!();

        let kinds: Vec<i32> = recorder.gestures.borrow().iter().map(|g| g.0).collect();
        assert!(kinds.contains(&(GestureKind::DragStart as i32)));
        assert!(kinds.contains(&(GestureKind::DragMove as i32)));
        assert!(kinds.contains(&(GestureKind::DragEnd as i32)));
    }

    // A registered custom polyline must win and dispatch to the guest even
    // when its path also triggers drag synthesis — CustomPolyline dispatch
    // is independent of Tap/Flick/DragEnd, not preempted by it.
    #[test]
    fn custom_polyline_dispatches_independently_of_drag_end() {
        let (mut host_loop, recorder, _queue) = new_harness(1000);
        host_loop.request_app_switch("launcher", "").unwrap();
        let custom_handle = host_loop
            .gesture_engine_mut()
            .register_polyline(
                "CUST",
                vec![Point { x: 0.0, y: 0.0 }, Point { x: 100.0, y: 0.0 }],
                30.0,
                false,
                false,
                5,
                0,
                false,
            )
            .unwrap();

        let clock = FakeClock { now: Cell::new(1000) };
        let mut touch = ScriptedTouch { events: VecDeque::new() };
        let http = NullHttp;
        let wifi = NullWifi;
        let devserver = FakeDevServer { crashed: Cell::new(false) };
        let power = FakePower { called: Cell::new(false) };
        let filesystem = NoFilesystem;
        let launcher_bytes = vec![0u8, 1, 2];

        macro_rules! run {
            () => {{
                let mut ports = LoopPorts {
                    touch: &mut touch, http: &http, wifi: &wifi, devserver: &devserver,
                    power: &power, filesystem: &filesystem, clock: &clock,
                };
                host_loop.run_iteration(&mut ports, &launcher_bytes);
            }};
        }

        run!();

        touch.events.push_back(TouchEvent::Down { pointer_id: 1, x: 50.0, y: 50.0 });
        clock.now.set(1050);
        run!();

        touch.events.push_back(TouchEvent::Move { pointer_id: 1, x: 150.0, y: 50.0 });
        clock.now.set(1070);
        run!();

        touch.events.push_back(TouchEvent::Up { pointer_id: 1, x: 150.0, y: 50.0 });
        clock.now.set(1090);
        run!();

        let gestures = recorder.gestures.borrow();
        let kinds: Vec<i32> = gestures.iter().map(|g| g.0).collect();
        assert!(kinds.contains(&(GestureKind::DragEnd as i32)));
        assert!(gestures.iter().any(|g| {
            g.0 == GestureKind::CustomPolyline as i32 && g.7 == custom_handle as i32
        }));
    }

    // Scenario S3 — system sleep gesture preemption (SPEC_FULL.md §8).
    #[test]
    fn sleep_gesture_powers_off_without_forwarding_custom_polyline() {
        let (mut host_loop, recorder, _queue) = new_harness(0);
        host_loop.request_app_switch("launcher", "").unwrap();

        let clock = FakeClock { now: Cell::new(0) };
        let mut touch = ScriptedTouch { events: VecDeque::new() };
        let http = NullHttp;
        let wifi = NullWifi;
        let devserver = FakeDevServer { crashed: Cell::new(false) };
        let power = FakePower { called: Cell::new(false) };
        let filesystem = NoFilesystem;
        let launcher_bytes = vec![0u8, 1, 2];

        macro_rules! run {
            () => {{
                let mut ports = LoopPorts {
                    touch: &mut touch, http: &http, wifi: &wifi, devserver: &devserver,
                    power: &power, filesystem: &filesystem, clock: &clock,
                };
                host_loop.run_iteration(&mut ports, &launcher_bytes);
            }};
        }

        run!(); // applies the pending switch

        // Offset by the poll interval consumed by the switch-applying
        // iteration above, so each step still lands on or after the loop's
        // next touch-poll deadline.
        let steps = [
            (50u32, TouchEvent::Down { pointer_id: 1, x: 280.0, y: 860.0 }),
            (450, TouchEvent::Move { pointer_id: 1, x: 280.0, y: 680.0 }),
            (850, TouchEvent::Move { pointer_id: 1, x: 280.0, y: 500.0 }),
            (1050, TouchEvent::Move { pointer_id: 1, x: 280.0, y: 680.0 }),
            (1250, TouchEvent::Up { pointer_id: 1, x: 280.0, y: 860.0 }),
        ];
        for (t, ev) in steps {
            touch.events.push_back(ev);
            clock.now.set(t);
            run!();
        }

        assert!(power.called.get());
        assert!(!recorder.gestures.borrow().iter().any(|g| g.0 == GestureKind::CustomPolyline as i32));
    }

    // Scenario S6 — crash recovery (SPEC_FULL.md §8).
    #[test]
    fn crash_during_gesture_dispatch_reloads_launcher() {
        let (mut host_loop, recorder, queue) = new_harness(1000);
        host_loop.request_app_switch("launcher", "").unwrap();

        let clock = FakeClock { now: Cell::new(1000) };
        let mut touch = ScriptedTouch { events: VecDeque::new() };
        let http = NullHttp;
        let wifi = NullWifi;
        let devserver = FakeDevServer { crashed: Cell::new(false) };
        let power = FakePower { called: Cell::new(false) };
        let filesystem = NoFilesystem;
        let launcher_bytes = vec![0u8, 1, 2];

        macro_rules! run {
            () => {{
                let mut ports = LoopPorts {
                    touch: &mut touch, http: &http, wifi: &wifi, devserver: &devserver,
                    power: &power, filesystem: &filesystem, clock: &clock,
                };
                host_loop.run_iteration(&mut ports, &launcher_bytes);
            }};
        }

        run!(); // applies switch to launcher

        let (cmd, reply) = devcommand::new_dev_command(DevCommandKind::RunUploadedWasm, Some(vec![9, 9, 9]), "");
        queue.try_send(crate::events::HostEvent::DevCommand { cmd, now_ms: 1000 });
        run!();
        assert!(matches!(reply.wait(Duration::from_millis(10)).unwrap().0, crate::devcommand::DevCommandResult::Ok));
        assert_eq!(host_loop.glc().state(), crate::guest::GuestState::Running);

        recorder.fail_next_gesture.set(true);
        devserver.crashed.set(true);
        queue.try_send(crate::events::HostEvent::Gesture {
            kind: GestureKind::Tap, x: 1.0, y: 1.0, dx: 0.0, dy: 0.0, duration_ms: 0, flags: 0, now_ms: 1000,
        });
        run!();

        assert_eq!(host_loop.glc().state(), crate::guest::GuestState::Running);
        assert!(host_loop.glc().dispatch_enabled());
    }
}
