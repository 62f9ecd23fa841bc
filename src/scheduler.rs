//! Microtask Scheduler — fixed-capacity, generation-indexed periodic/one-shot
//! task table driven by guest return codes.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MicrotaskScheduler                      │
//! │                                                              │
//! │   alloc_cursor ──▶ [ slot 0 ][ slot 1 ] ... [ slot 63 ]      │
//! │                         generation, next_run_ms, period_ms   │
//! │                                                              │
//! │   run_cursor   ──▶ rotating due-search start point           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The guest never sees slot indices directly — only opaque handles that
//! encode `(index+1, generation)`, so a stale handle from a released slot
//! is always rejected rather than silently aliasing a new task.

use crate::error::{Result, SchedulerError};
use log::warn;

pub const MAX_TASKS: usize = 64;
const MAX_GENERATION: u16 = 0x7fff;
const DEFAULT_YIELD_DELAY_MS: u32 = 50;
/// Sentinel returned by [`MicrotaskScheduler::next_due_ms`] when nothing is due.
pub const NO_DUE_MS: u32 = 0xffff_ffff;

/// Decoded guest return value from a microtask step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Done,
    Yield,
    SleepMs(u32),
}

fn decode_action(raw: i64) -> Option<StepAction> {
    let kind = (raw >> 32) as i32;
    let arg = (raw & 0xffff_ffff) as u32;
    match kind {
        0 => Some(StepAction::Done),
        1 => Some(StepAction::Yield),
        2 => Some(StepAction::SleepMs(arg)),
        _ => None,
    }
}

/// `(now - target) as u32 < 0x8000_0000` — wraparound-tolerant "reached".
pub fn time_reached(now: u32, target: u32) -> bool {
    now.wrapping_sub(target) < 0x8000_0000
}

/// Skip missed periods rather than bursting: the next boundary strictly
/// after `now`, given the last fired boundary `previous_due`.
fn next_periodic_boundary(previous_due: u32, period_ms: u32, now: u32) -> u32 {
    let elapsed = now.wrapping_sub(previous_due);
    if elapsed >= 0x8000_0000 {
        // now has not reached previous_due (mod wrap) — nothing missed yet.
        return previous_due;
    }
    let periods_missed = elapsed / period_ms;
    previous_due.wrapping_add((periods_missed + 1).wrapping_mul(period_ms))
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    occupied: bool,
    generation: u16,
    next_run_ms: u32,
    period_ms: u32,
}

impl Slot {
    const fn empty() -> Self {
        Self { occupied: false, generation: 1, next_run_ms: 0, period_ms: 0 }
    }
}

/// Encode `(index, generation)` into the opaque i32 handle seen by the guest.
fn encode_handle(index: usize, generation: u16) -> i32 {
    (((generation as i32) << 16) | ((index as i32) + 1)) as i32
}

/// Decode a handle into `(index, generation)`. Rejects handle 0 and negatives.
fn decode_handle(handle: i32) -> Option<(usize, u16)> {
    if handle <= 0 {
        return None;
    }
    let index = ((handle & 0xffff) - 1) as usize;
    let generation = (handle >> 16) as u16;
    Some((index, generation))
}

/// Fixed-capacity table of up to [`MAX_TASKS`] cooperative microtasks.
pub struct MicrotaskScheduler {
    slots: [Slot; MAX_TASKS],
    alloc_cursor: usize,
    run_cursor: usize,
}

impl MicrotaskScheduler {
    pub fn new() -> Self {
        Self {
            slots: [Slot::empty(); MAX_TASKS],
            alloc_cursor: 0,
            run_cursor: 0,
        }
    }

    /// Allocate a slot for a new task and return its handle. `period_ms = 0`
    /// means one-shot, driven entirely by guest yields/sleeps.
    pub fn start(&mut self, now_ms: u32, start_after_ms: u32, period_ms: u32) -> Result<i32> {
        for offset in 0..MAX_TASKS {
            let idx = (self.alloc_cursor + offset) % MAX_TASKS;
            if !self.slots[idx].occupied {
                self.slots[idx].occupied = true;
                self.slots[idx].next_run_ms = now_ms.wrapping_add(start_after_ms);
                self.slots[idx].period_ms = period_ms;
                let handle = encode_handle(idx, self.slots[idx].generation);
                self.alloc_cursor = (idx + 1) % MAX_TASKS;
                return Ok(handle);
            }
        }
        Err(SchedulerError::TableFull.into())
    }

    /// Cancel a task before it fires. Fails if the handle is stale or unknown.
    pub fn cancel(&mut self, handle: i32) -> Result<()> {
        let idx = self.resolve(handle)?;
        self.release(idx);
        Ok(())
    }

    /// Release every slot.
    pub fn clear_all(&mut self) {
        for slot in &mut self.slots {
            if slot.occupied {
                slot.occupied = false;
                slot.generation = next_generation(slot.generation);
            }
        }
    }

    /// Milliseconds until the soonest due task, or [`NO_DUE_MS`] if none occupied.
    pub fn next_due_ms(&self) -> u32 {
        let mut best: Option<u32> = None;
        for slot in &self.slots {
            if slot.occupied {
                best = Some(match best {
                    None => slot.next_run_ms,
                    Some(b) => {
                        if time_reached(slot.next_run_ms, b) {
                            b
                        } else {
                            slot.next_run_ms
                        }
                    }
                });
            }
        }
        best.unwrap_or(NO_DUE_MS)
    }

    /// Run up to `max_steps` due tasks, invoking `step` for each. `step`
    /// receives `(handle, now_ms)` and returns the raw guest i64 return
    /// value. A failed guest call (the `step` closure returning `Err`)
    /// stops `run_due` immediately without releasing the slot or
    /// decrementing the remaining budget further.
    pub fn run_due(
        &mut self,
        now_ms: u32,
        max_steps: u32,
        mut step: impl FnMut(i32, u32) -> std::result::Result<i64, ()>,
    ) {
        let mut remaining = max_steps;
        while remaining > 0 {
            let Some(idx) = self.find_due(now_ms) else { break };
            let handle = encode_handle(idx, self.slots[idx].generation);

            let raw = match step(handle, now_ms) {
                Ok(raw) => raw,
                Err(()) => return,
            };

            match decode_action(raw) {
                Some(StepAction::Done) => self.release(idx),
                Some(StepAction::Yield) => {
                    self.slots[idx].next_run_ms = if self.slots[idx].period_ms > 0 {
                        next_periodic_boundary(self.slots[idx].next_run_ms, self.slots[idx].period_ms, now_ms)
                    } else {
                        now_ms.wrapping_add(DEFAULT_YIELD_DELAY_MS)
                    };
                }
                Some(StepAction::SleepMs(ms)) => {
                    let sleep = if ms == 0 { DEFAULT_YIELD_DELAY_MS } else { ms };
                    self.slots[idx].next_run_ms = if self.slots[idx].period_ms > 0 {
                        let boundary = next_periodic_boundary(
                            self.slots[idx].next_run_ms,
                            self.slots[idx].period_ms,
                            now_ms,
                        );
                        let sleep_target = now_ms.wrapping_add(sleep);
                        if time_reached(sleep_target, boundary) {
                            sleep_target
                        } else {
                            boundary
                        }
                    } else {
                        now_ms.wrapping_add(sleep)
                    };
                }
                None => {
                    warn!("microtask {handle} returned invalid action kind, releasing slot");
                    self.release(idx);
                }
            }

            self.run_cursor = (idx + 1) % MAX_TASKS;
            remaining -= 1;
        }
    }

    fn find_due(&self, now_ms: u32) -> Option<usize> {
        for offset in 0..MAX_TASKS {
            let idx = (self.run_cursor + offset) % MAX_TASKS;
            let slot = &self.slots[idx];
            if slot.occupied && time_reached(now_ms, slot.next_run_ms) {
                return Some(idx);
            }
        }
        None
    }

    fn resolve(&self, handle: i32) -> Result<usize> {
        let (idx, generation) = decode_handle(handle).ok_or(SchedulerError::NotFound)?;
        if idx >= MAX_TASKS {
            return Err(SchedulerError::NotFound.into());
        }
        let slot = &self.slots[idx];
        if !slot.occupied || slot.generation != generation {
            return Err(SchedulerError::NotFound.into());
        }
        Ok(idx)
    }

    fn release(&mut self, idx: usize) {
        self.slots[idx].occupied = false;
        self.slots[idx].generation = next_generation(self.slots[idx].generation);
    }

    #[cfg(test)]
    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.occupied).count()
    }
}

impl Default for MicrotaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn next_generation(current: u16) -> u16 {
    if current >= MAX_GENERATION { 1 } else { current + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_cancel_releases_slot() {
        let mut sched = MicrotaskScheduler::new();
        let handle = sched.start(0, 0, 0).unwrap();
        assert_eq!(sched.occupied_count(), 1);
        sched.cancel(handle).unwrap();
        assert_eq!(sched.occupied_count(), 0);
        assert!(sched.cancel(handle).is_err());
    }

    #[test]
    fn handle_zero_and_negative_are_rejected() {
        let mut sched = MicrotaskScheduler::new();
        assert!(sched.cancel(0).is_err());
        assert!(sched.cancel(-1).is_err());
    }

    #[test]
    fn table_full_after_max_tasks() {
        let mut sched = MicrotaskScheduler::new();
        for _ in 0..MAX_TASKS {
            sched.start(0, 0, 0).unwrap();
        }
        assert!(sched.start(0, 0, 0).is_err());
    }

    #[test]
    fn generation_wraps_to_one_not_zero() {
        let mut sched = MicrotaskScheduler::new();
        for _ in 0..(MAX_GENERATION as u32) {
            let h = sched.start(0, 0, 0).unwrap();
            sched.cancel(h).unwrap();
        }
        let h = sched.start(0, 0, 0).unwrap();
        let (_, generation) = decode_handle(h).unwrap();
        assert_eq!(generation, 1);
    }

    // Scenario S4 — periodic microtask, Done on first step (SPEC_FULL.md §8).
    #[test]
    fn done_releases_slot_and_next_due_is_sentinel() {
        let mut sched = MicrotaskScheduler::new();
        sched.start(0, 0, 100).unwrap();
        sched.run_due(0, 16, |_handle, _now| Ok(0i64 << 32));
        assert_eq!(sched.occupied_count(), 0);
        assert_eq!(sched.next_due_ms(), NO_DUE_MS);
    }

    // Scenario S5 — periodic with long stall, catch-up skip (SPEC_FULL.md §8).
    #[test]
    fn periodic_yield_skips_missed_boundaries() {
        let mut sched = MicrotaskScheduler::new();
        sched.start(0, 0, 100).unwrap();
        sched.run_due(0, 16, |_handle, _now| Ok(1i64 << 32)); // Yield
        // Loop does not re-enter until now=530; nothing due yet since next_due=100.
        assert!(!sched.find_due(530).is_some() || sched.next_due_ms() <= 530);
        // Directly exercise the boundary helper as the loop would on re-entry.
        let next = next_periodic_boundary(100, 100, 530);
        assert_eq!(next, 600);
    }

    #[test]
    fn run_due_never_exceeds_max_steps() {
        let mut sched = MicrotaskScheduler::new();
        for _ in 0..8 {
            sched.start(0, 0, 10).unwrap();
        }
        let mut invocations = 0;
        sched.run_due(1000, 3, |_h, _now| {
            invocations += 1;
            Ok(1i64 << 32) // Yield, stays occupied and due again immediately after one-shot offset
        });
        assert_eq!(invocations, 3);
    }

    #[test]
    fn invalid_action_kind_releases_slot() {
        let mut sched = MicrotaskScheduler::new();
        sched.start(0, 0, 0).unwrap();
        sched.run_due(0, 16, |_h, _now| Ok(99i64 << 32));
        assert_eq!(sched.occupied_count(), 0);
    }

    #[test]
    fn failed_guest_call_does_not_release_slot() {
        let mut sched = MicrotaskScheduler::new();
        sched.start(0, 0, 0).unwrap();
        sched.run_due(0, 16, |_h, _now| Err(()));
        assert_eq!(sched.occupied_count(), 1);
    }
}
