//! Gesture Engine — multi-candidate polyline matcher.
//!
//! Tracks every registered gesture definition against a single active touch
//! sequence, eliminating candidates as they fail an approach or segment
//! constraint, and selects a winner on lift-off by priority then distance
//! then handle.

use crate::ports::TouchEvent;
use crate::error::{GestureError, Result};

const CONSECUTIVE_FAIL_THRESHOLD: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    fn sub(self, other: Point) -> Point {
        Point { x: self.x - other.x, y: self.y - other.y }
    }
    fn add(self, other: Point) -> Point {
        Point { x: self.x + other.x, y: self.y + other.y }
    }
}

fn squared_dist(a: Point, b: Point) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

/// Squared distance from `p` to the segment `(a, b)`.
fn point_to_segment_squared(p: Point, a: Point, b: Point) -> f32 {
    let ab = b.sub(a);
    let len2 = ab.x * ab.x + ab.y * ab.y;
    if len2 <= f32::EPSILON {
        return squared_dist(p, a);
    }
    let ap = p.sub(a);
    let t = ((ap.x * ab.x + ap.y * ab.y) / len2).clamp(0.0, 1.0);
    let closest = Point { x: a.x + ab.x * t, y: a.y + ab.y * t };
    squared_dist(p, closest)
}

/// A registered gesture definition.
#[derive(Debug, Clone)]
pub struct GestureDef {
    pub handle: u32,
    pub id: heapless::String<48>,
    pub points: Vec<Point>,
    pub tolerance_px: f32,
    pub fixed: bool,
    pub system: bool,
    pub priority: i32,
    pub max_duration_ms: u32,
    pub segment_constraint_enabled: bool,
}

impl GestureDef {
    fn tolerance_sq(&self) -> f32 {
        self.tolerance_px * self.tolerance_px
    }

    /// Resolve waypoint `index` to an absolute display position, given the
    /// anchor (touch-down position) for relative gestures.
    fn abs_point(&self, index: usize, anchor: Point) -> Point {
        if self.fixed {
            self.points[index]
        } else {
            anchor.add(self.points[index])
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackState {
    active: bool,
    anchor: Point,
    start_time_ms: u32,
    target_index: usize,
    last_dist_to_target: f32,
    approach_armed: bool,
    consecutive_fail_approach: u8,
    consecutive_fail_segment: u8,
    down_pos: Point,
    last_pos: Point,
}

impl TrackState {
    fn reset(now_ms: u32, down_pos: Point) -> Self {
        Self {
            active: true,
            anchor: down_pos,
            start_time_ms: now_ms,
            target_index: 0,
            last_dist_to_target: 0.0,
            approach_armed: false,
            consecutive_fail_approach: 0,
            consecutive_fail_segment: 0,
            down_pos,
            last_pos: down_pos,
        }
    }

    fn inactive() -> Self {
        Self {
            active: false,
            anchor: Point { x: 0.0, y: 0.0 },
            start_time_ms: 0,
            target_index: 0,
            last_dist_to_target: 0.0,
            approach_armed: false,
            consecutive_fail_approach: 0,
            consecutive_fail_segment: 0,
            down_pos: Point { x: 0.0, y: 0.0 },
            last_pos: Point { x: 0.0, y: 0.0 },
        }
    }
}

struct Candidate {
    def: GestureDef,
    track: TrackState,
}

/// Tracks registered gestures against a single active touch sequence.
pub struct GestureEngine {
    candidates: Vec<Candidate>,
    next_handle: u32,
    touch_active: bool,
    active_pointer_id: Option<u32>,
}

impl GestureEngine {
    pub fn new() -> Self {
        Self {
            candidates: Vec::new(),
            next_handle: 1,
            touch_active: false,
            active_pointer_id: None,
        }
    }

    /// Register a custom (or system) polyline gesture. Returns the assigned
    /// handle, which is never reused.
    pub fn register_polyline(
        &mut self,
        id: &str,
        points: Vec<Point>,
        tolerance_px: f32,
        fixed: bool,
        system: bool,
        priority: i32,
        max_duration_ms: u32,
        segment_constraint_enabled: bool,
    ) -> Result<u32> {
        if id.is_empty() || id.len() > 47 {
            return Err(GestureError::InvalidDefinition.into());
        }
        if points.len() < 2 || tolerance_px <= 0.0 {
            return Err(GestureError::InvalidDefinition.into());
        }
        let mut id_buf = heapless::String::new();
        id_buf.push_str(id).map_err(|_| GestureError::InvalidDefinition)?;

        let handle = self.next_handle;
        self.next_handle += 1;

        let def = GestureDef {
            handle,
            id: id_buf,
            points,
            tolerance_px,
            fixed,
            system,
            priority,
            max_duration_ms,
            segment_constraint_enabled,
        };
        log::info!("gesture registered: handle={handle} id={id} system={system}");
        self.candidates.push(Candidate { def, track: TrackState::inactive() });
        Ok(handle)
    }

    /// Remove a registered gesture. Refused for system gestures.
    pub fn remove(&mut self, handle: u32) -> Result<()> {
        let idx = self
            .candidates
            .iter()
            .position(|c| c.def.handle == handle)
            .ok_or(GestureError::UnknownHandle)?;
        if self.candidates[idx].def.system {
            return Err(GestureError::SystemGestureProtected.into());
        }
        self.candidates.remove(idx);
        log::info!("gesture removed: handle={handle}");
        Ok(())
    }

    /// Remove every non-system gesture; system gestures keep their handles.
    pub fn clear_custom(&mut self) {
        self.candidates.retain(|c| c.def.system);
        self.reset_tracking();
        log::info!("custom gestures cleared");
    }

    /// Remove every gesture, system or custom.
    pub fn clear_all(&mut self) {
        self.candidates.clear();
        self.reset_tracking();
        log::info!("all gestures cleared");
    }

    /// Reset per-touch tracking state without touching registrations.
    /// Called unconditionally on Up, Cancel, and pointer-id mismatch.
    pub fn reset_tracking(&mut self) {
        self.touch_active = false;
        self.active_pointer_id = None;
        for c in &mut self.candidates {
            c.track.active = false;
        }
    }

    /// Feed one touch transition into the engine. Returns the winning
    /// custom-polyline handle on Up (0/None if no candidate matched).
    pub fn process_touch_event(&mut self, event: TouchEvent, now_ms: u32) -> Option<u32> {
        match event {
            TouchEvent::Down { pointer_id, x, y } => {
                self.touch_active = true;
                self.active_pointer_id = Some(pointer_id);
                self.on_down(Point { x, y }, now_ms);
                None
            }
            TouchEvent::Move { pointer_id, x, y } => {
                if self.active_pointer_id != Some(pointer_id) {
                    self.reset_tracking();
                    return None;
                }
                self.on_move(Point { x, y }, now_ms);
                None
            }
            TouchEvent::Up { pointer_id, x, y } => {
                let winner = if self.active_pointer_id == Some(pointer_id) {
                    self.on_up(Point { x, y }, now_ms)
                } else {
                    None
                };
                self.reset_tracking();
                winner
            }
            TouchEvent::Cancel { pointer_id } => {
                if self.active_pointer_id == Some(pointer_id) || self.active_pointer_id.is_none() {
                    self.reset_tracking();
                }
                None
            }
        }
    }

    fn on_down(&mut self, down_pos: Point, now_ms: u32) {
        for c in &mut self.candidates {
            let mut track = TrackState::reset(now_ms, down_pos);
            let dist0 = squared_dist(down_pos, c.def.abs_point(0, down_pos));
            let tol2 = c.def.tolerance_sq();

            if c.def.fixed && dist0 > tol2 {
                track.active = false;
                c.track = track;
                continue;
            }

            if dist0 <= tol2 && c.def.points.len() > 1 {
                track.target_index = 1;
                track.last_dist_to_target = squared_dist(down_pos, c.def.abs_point(1, down_pos));
            } else {
                track.target_index = 0;
                track.last_dist_to_target = dist0;
            }
            c.track = track;
        }
    }

    fn on_move(&mut self, pos: Point, now_ms: u32) {
        let slack_px = |tol: f32| if tol >= 12.0 { tol * 0.15 } else { 2.0 };

        for c in &mut self.candidates {
            if !c.track.active {
                continue;
            }
            if c.def.max_duration_ms > 0
                && now_ms.wrapping_sub(c.track.start_time_ms) > c.def.max_duration_ms
            {
                c.track.active = false;
                continue;
            }

            let tol2 = c.def.tolerance_sq();
            let anchor = c.track.anchor;
            let last_index = c.def.points.len() - 1;

            while c.track.target_index < last_index
                && squared_dist(pos, c.def.abs_point(c.track.target_index, anchor)) <= tol2
            {
                c.track.target_index += 1;
                c.track.approach_armed = false;
                c.track.last_dist_to_target =
                    squared_dist(pos, c.def.abs_point(c.track.target_index, anchor));
            }

            let target_pos = c.def.abs_point(c.track.target_index, anchor);
            let dist_to_target = squared_dist(pos, target_pos);
            let slack = slack_px(c.def.tolerance_px);
            let slack2 = slack * slack;

            if !c.track.approach_armed {
                if c.track.last_dist_to_target - dist_to_target >= slack2 {
                    c.track.approach_armed = true;
                }
            } else if dist_to_target - c.track.last_dist_to_target > slack2 {
                c.track.consecutive_fail_approach += 1;
            } else {
                c.track.consecutive_fail_approach = 0;
            }
            c.track.last_dist_to_target = dist_to_target;

            if c.def.segment_constraint_enabled {
                let prev = if c.track.target_index == 0 {
                    c.track.down_pos
                } else {
                    c.def.abs_point(c.track.target_index - 1, anchor)
                };
                let seg_dist2 = point_to_segment_squared(pos, prev, target_pos);
                if seg_dist2 > tol2 {
                    c.track.consecutive_fail_segment += 1;
                } else {
                    c.track.consecutive_fail_segment = 0;
                }
            }

            if c.track.consecutive_fail_approach >= CONSECUTIVE_FAIL_THRESHOLD
                || c.track.consecutive_fail_segment >= CONSECUTIVE_FAIL_THRESHOLD
            {
                c.track.active = false;
            }
            c.track.last_pos = pos;
        }
    }

    fn on_up(&mut self, up_pos: Point, now_ms: u32) -> Option<u32> {
        // Run the final leg through the same advance/constraint pass as a
        // Move, so the Up position is validated against approach/segment
        // tolerance exactly like every waypoint before it.
        self.on_move(up_pos, now_ms);

        let mut best: Option<(i32, f32, u32)> = None;
        for c in &self.candidates {
            if !c.track.active {
                continue;
            }
            if c.def.max_duration_ms > 0
                && now_ms.wrapping_sub(c.track.start_time_ms) > c.def.max_duration_ms
            {
                continue;
            }
            let last_index = c.def.points.len() - 1;
            if c.track.target_index != last_index {
                continue;
            }
            let tol2 = c.def.tolerance_sq();
            let last_pos = c.def.abs_point(last_index, c.track.anchor);
            let dist2 = squared_dist(up_pos, last_pos);
            if dist2 > tol2 {
                continue;
            }
            let key = (-c.def.priority, dist2, c.def.handle);
            match &best {
                None => best = Some(key),
                Some(cur) => {
                    if key < *cur {
                        best = Some(key);
                    }
                }
            }
        }
        best.map(|(_, _, handle)| {
            log::info!("gesture winner: handle={handle}");
            handle
        })
    }

    #[cfg(test)]
    fn is_registered(&self, handle: u32) -> bool {
        self.candidates.iter().any(|c| c.def.handle == handle)
    }
}

impl Default for GestureEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_sleep_gesture(engine: &mut GestureEngine) -> u32 {
        engine
            .register_polyline(
                "SLP",
                vec![
                    Point { x: 280.0, y: 860.0 },
                    Point { x: 280.0, y: 500.0 },
                    Point { x: 280.0, y: 860.0 },
                ],
                100.0,
                true,
                true,
                10,
                1500,
                true,
            )
            .unwrap()
    }

    #[test]
    fn register_rejects_single_point() {
        let mut engine = GestureEngine::new();
        let result = engine.register_polyline("X", vec![Point { x: 0.0, y: 0.0 }], 10.0, true, false, 0, 0, false);
        assert!(result.is_err());
    }

    #[test]
    fn remove_system_gesture_is_refused() {
        let mut engine = GestureEngine::new();
        let handle = register_sleep_gesture(&mut engine);
        assert!(engine.remove(handle).is_err());
        assert!(engine.is_registered(handle));
    }

    #[test]
    fn clear_custom_preserves_system_gestures() {
        let mut engine = GestureEngine::new();
        let sys = register_sleep_gesture(&mut engine);
        let custom = engine
            .register_polyline("C", vec![Point { x: 0.0, y: 0.0 }, Point { x: 10.0, y: 10.0 }], 5.0, false, false, 0, 0, false)
            .unwrap();
        engine.clear_custom();
        assert!(engine.is_registered(sys));
        assert!(!engine.is_registered(custom));
    }

    // Scenario S3 — system sleep gesture preemption (SPEC_FULL.md §8).
    #[test]
    fn sleep_polyline_matches_on_traversal_within_tolerance_and_duration() {
        let mut engine = GestureEngine::new();
        let handle = register_sleep_gesture(&mut engine);

        assert_eq!(
            engine.process_touch_event(TouchEvent::Down { pointer_id: 1, x: 280.0, y: 860.0 }, 0),
            None
        );
        assert_eq!(
            engine.process_touch_event(TouchEvent::Move { pointer_id: 1, x: 280.0, y: 680.0 }, 400),
            None
        );
        assert_eq!(
            engine.process_touch_event(TouchEvent::Move { pointer_id: 1, x: 280.0, y: 500.0 }, 800),
            None
        );
        assert_eq!(
            engine.process_touch_event(TouchEvent::Move { pointer_id: 1, x: 280.0, y: 680.0 }, 1000),
            None
        );
        let winner = engine.process_touch_event(TouchEvent::Up { pointer_id: 1, x: 280.0, y: 860.0 }, 1200);
        assert_eq!(winner, Some(handle));
    }

    #[test]
    fn lift_off_after_max_duration_is_rejected_even_at_last_waypoint() {
        let mut engine = GestureEngine::new();
        register_sleep_gesture(&mut engine);
        engine.process_touch_event(TouchEvent::Down { pointer_id: 1, x: 280.0, y: 860.0 }, 0);
        engine.process_touch_event(TouchEvent::Move { pointer_id: 1, x: 280.0, y: 680.0 }, 400);
        engine.process_touch_event(TouchEvent::Move { pointer_id: 1, x: 280.0, y: 500.0 }, 800);
        engine.process_touch_event(TouchEvent::Move { pointer_id: 1, x: 280.0, y: 680.0 }, 1000);
        // Reaches the last waypoint well within tolerance, but lifts off
        // after the 1500ms window — must not win despite landing on target.
        let winner = engine.process_touch_event(TouchEvent::Up { pointer_id: 1, x: 280.0, y: 860.0 }, 1600);
        assert_eq!(winner, None);
    }

    #[test]
    fn max_duration_exceeded_deactivates_candidate() {
        let mut engine = GestureEngine::new();
        let _handle = register_sleep_gesture(&mut engine);
        engine.process_touch_event(TouchEvent::Down { pointer_id: 1, x: 280.0, y: 860.0 }, 0);
        engine.process_touch_event(TouchEvent::Move { pointer_id: 1, x: 280.0, y: 500.0 }, 2000);
        let winner = engine.process_touch_event(TouchEvent::Up { pointer_id: 1, x: 280.0, y: 860.0 }, 2100);
        assert_eq!(winner, None);
    }

    #[test]
    fn pointer_mismatch_resets_tracking() {
        let mut engine = GestureEngine::new();
        register_sleep_gesture(&mut engine);
        engine.process_touch_event(TouchEvent::Down { pointer_id: 1, x: 280.0, y: 860.0 }, 0);
        engine.process_touch_event(TouchEvent::Move { pointer_id: 2, x: 0.0, y: 0.0 }, 10);
        assert!(engine.active_pointer_id.is_none());
    }
}
