//! Host kernel configuration parameters
//!
//! Tunable parameters for the host kernel itself: queue sizing, idle timing,
//! touch poll cadence, microtask budgets, HTTP body caps. Never guest-visible
//! and never persisted by the core; loaded through the [`crate::ports::ConfigSource`]
//! port (file, NVS-equivalent KV store, or compiled-in default, depending on
//! the adapter) and falls back to [`HostConfig::default`] if the source has
//! nothing stored yet.

use serde::{Deserialize, Serialize};

/// Core host kernel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    // --- Event queue ---
    /// Bounded depth of the host event queue shared by all producer threads
    pub queue_depth: usize,

    // --- Idle / sleep ---
    /// Milliseconds of no gesture, touch, or host event before the system
    /// sleep gesture's action (power-off) is synthesized automatically
    pub idle_sleep_timeout_ms: u32,

    // --- Touch polling ---
    /// Touch poll interval while no touch is active, milliseconds
    pub touch_poll_idle_ms: u32,
    /// Touch poll interval while a touch is in progress, milliseconds
    pub touch_poll_active_ms: u32,

    // --- Microtask scheduler ---
    /// Maximum number of due microtasks resumed per loop wake
    pub microtask_max_steps_per_wake: u32,

    // --- HTTP ---
    /// Maximum HTTP request/response body bytes copied into guest memory
    /// before the truncation flag is set
    pub http_max_body_bytes: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            queue_depth: 16,

            idle_sleep_timeout_ms: 180_000,

            touch_poll_idle_ms: 50,
            touch_poll_active_ms: 20,

            microtask_max_steps_per_wake: 16,

            http_max_body_bytes: 8192,
        }
    }
}
