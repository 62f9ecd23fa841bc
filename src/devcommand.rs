//! Developer devserver commands and their cross-thread reply lifecycle.
//!
//! A [`DevCommand`] is produced by the devserver's HTTP handler thread,
//! enqueued onto the loop's [`crate::events::EventQueue`], and consumed
//! exactly once by the loop thread. The command carries a [`DevCommandReply`]
//! with two owners — the producer (who may wait on it) and the loop (who
//! always writes a result and signals completion before releasing its
//! share). This mirrors the pre-distillation source's refcounted reply cell
//! (refcount starts at 2, a binary semaphore signals completion, the last
//! release frees both); here a `Mutex`/`Condvar` one-shot cell plays the role
//! of the semaphore and `Arc`'s strong count plays the role of the refcount.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevCommandKind {
    RunUploadedWasm,
    StopUploadedWasm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevCommandResult {
    Ok,
    Failed,
}

struct ReplyState {
    result: Option<DevCommandResult>,
    message: heapless::String<160>,
}

/// One-shot completion cell shared by the producer and the loop. Analogous
/// to the source's `DevCommandReply`: the loop always writes a result and
/// notifies before dropping its `Arc`; the producer may wait on
/// [`DevCommandReply::wait`] or drop its `Arc` without waiting.
pub struct DevCommandReply {
    state: Mutex<ReplyState>,
    done: Condvar,
}

impl DevCommandReply {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ReplyState {
                result: None,
                message: heapless::String::new(),
            }),
            done: Condvar::new(),
        })
    }

    /// Called by the loop exactly once after processing the command.
    pub fn complete(&self, result: DevCommandResult, message: &str) {
        let mut state = self.state.lock().unwrap();
        state.result = Some(result);
        let _ = state.message.push_str(message);
        self.done.notify_all();
    }

    /// Block until [`DevCommandReply::complete`] has been called, or the
    /// timeout elapses. Returns `None` on timeout.
    pub fn wait(&self, timeout: Duration) -> Option<(DevCommandResult, heapless::String<160>)> {
        let state = self.state.lock().unwrap();
        let (state, _) = self
            .done
            .wait_timeout_while(state, timeout, |s| s.result.is_none())
            .unwrap();
        state.result.map(|r| (r, state.message.clone()))
    }
}

/// A command enqueued by the devserver, owned by the loop once dequeued.
pub struct DevCommand {
    pub kind: DevCommandKind,
    /// Uploaded module bytes, present only for `RunUploadedWasm`.
    pub module_bytes: Option<Vec<u8>>,
    /// Arguments string passed through to the guest's `init`.
    pub args: heapless::String<256>,
    pub reply: Arc<DevCommandReply>,
}

/// Produced by the devserver handler thread. Returns the command to enqueue
/// plus the producer's own `Arc` handle to wait on.
pub fn new_dev_command(
    kind: DevCommandKind,
    module_bytes: Option<Vec<u8>>,
    args: &str,
) -> (DevCommand, Arc<DevCommandReply>) {
    let reply = DevCommandReply::new();
    let mut args_buf = heapless::String::new();
    let _ = args_buf.push_str(args);
    let cmd = DevCommand {
        kind,
        module_bytes,
        args: args_buf,
        reply: reply.clone(),
    };
    (cmd, reply)
}
