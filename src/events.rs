//! Host event queue — bounded, multi-producer, single-consumer, blocking
//! with a deadline-derived timeout.
//!
//! Events are produced by:
//! - HTTP handler threads (`HttpRequest`)
//! - The Wi-Fi event dispatcher thread (`WifiEvent`)
//! - The devserver start task (`DevCommand`)
//!
//! Events are consumed exclusively by the loop thread, which blocks via
//! [`EventQueue::recv_until`] until an event arrives or the computed deadline
//! passes.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐                   ┌──────────────┐
//! │ HTTP handler │────▶│              │                   │              │
//! │ Wi-Fi thread │────▶│ Event Queue  │──────────────────▶│  Loop Thread  │
//! │ Dev start    │────▶│ (Mutex+Cvar) │                   │  (consumer)   │
//! └──────────────┘     └──────────────┘                   └──────────────┘
//! ```
//!
//! Multiple concurrent producers rule out the teacher firmware's lock-free
//! SPSC ring buffer; a `Mutex`-guarded `VecDeque` with a `Condvar` plays the
//! same role as the pre-distillation source's `xQueueSend`/`xQueueReceive`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Gesture kinds mirrored from the guest ABI contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureKind {
    Tap = 1,
    LongPress = 2,
    Flick = 3,
    DragStart = 4,
    DragMove = 5,
    DragEnd = 6,
    CustomPolyline = 100,
}

/// Wi-Fi event kinds mirrored from the guest ABI contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiEventKind {
    StaStart = 1,
    StaDisconnected = 2,
    StaGotIp = 3,
}

/// A tagged union delivered through the event queue. Every variant carries
/// `now_ms`, the monotonic milliseconds-since-boot timestamp at the moment
/// the event was produced.
pub enum HostEvent {
    /// Reserved; not currently produced. Kept inert per design note.
    #[allow(dead_code)]
    Tick { now_ms: u32 },
    /// Synthesized by the loop itself from touch/gesture-engine state, never
    /// by an external producer thread.
    Gesture {
        kind: GestureKind,
        x: f32,
        y: f32,
        dx: f32,
        dy: f32,
        duration_ms: u32,
        flags: u32,
        now_ms: u32,
    },
    /// `req_id` references an entry owned by the HTTP server collaborator.
    HttpRequest {
        req_id: u32,
        method: heapless::String<8>,
        content_len: u32,
        now_ms: u32,
    },
    WifiEvent {
        kind: WifiEventKind,
        arg0: i32,
        arg1: i32,
        now_ms: u32,
    },
    /// Owns the enqueued [`crate::devcommand::DevCommand`].
    DevCommand {
        cmd: crate::devcommand::DevCommand,
        now_ms: u32,
    },
}

struct QueueState {
    items: VecDeque<HostEvent>,
}

/// Bounded FIFO of [`HostEvent`] values shared between producer threads and
/// the loop thread.
pub struct EventQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    not_empty: Condvar,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueue an event, non-blocking. Returns `false` if the queue is full
    /// (event dropped — it is the producer's policy whether to retry).
    pub fn try_send(&self, event: HostEvent) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.items.len() >= self.capacity {
            return false;
        }
        state.items.push_back(event);
        self.not_empty.notify_one();
        true
    }

    /// Block for at most `timeout` waiting for an event. Returns `None` on
    /// timeout with nothing delivered.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<HostEvent> {
        let state = self.state.lock().unwrap();
        let (mut state, _) = self
            .not_empty
            .wait_timeout_while(state, timeout, |s| s.items.is_empty())
            .unwrap();
        state.items.pop_front()
    }

    /// Drain everything currently queued into `handler`, FIFO order,
    /// without blocking.
    pub fn drain_events(&self, mut handler: impl FnMut(HostEvent)) {
        loop {
            let next = {
                let mut state = self.state.lock().unwrap();
                state.items.pop_front()
            };
            match next {
                Some(event) => handler(event),
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
