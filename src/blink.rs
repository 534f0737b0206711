//! Half-blink click detection.
//!
//! Closure per eye is `1 - recent_height / open_baseline`; the two eyes are
//! combined with `max`. A closure held inside the half band for the click
//! window fires exactly one click per episode. A full closure cancels it.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::BlinkConfig;
use crate::types::{ClickEvent, Point2};

/// Time-bounded window of `(timestamp_ms, eyelid_height)` samples.
#[derive(Debug, Clone)]
pub struct EyelidClosureHistory {
    window_ms: u64,
    samples: VecDeque<(u64, f32)>,
}

impl EyelidClosureHistory {
    pub fn new(window_ms: u64) -> Self {
        Self { window_ms, samples: VecDeque::new() }
    }

    pub fn push(&mut self, now_ms: u64, height: f32) {
        if height.is_finite() {
            self.samples.push_back((now_ms, height));
        }
        self.prune(now_ms);
    }

    pub fn prune(&mut self, now_ms: u64) {
        while let Some(&(t, _)) = self.samples.front() {
            if now_ms.saturating_sub(t) > self.window_ms {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Mean height, 0 when empty.
    pub fn mean(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|&(_, h)| h).sum::<f32>() / self.samples.len() as f32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[derive(Debug, Clone)]
struct EyeTrack {
    recent: EyelidClosureHistory,
    open: EyelidClosureHistory,
    baseline: f32,
}

impl EyeTrack {
    fn new(window_ms: u64) -> Self {
        Self {
            recent: EyelidClosureHistory::new(window_ms),
            open: EyelidClosureHistory::new(window_ms),
            baseline: 0.0,
        }
    }

    fn closure(&self) -> f32 {
        if self.baseline <= 0.0 || self.recent.is_empty() {
            return 0.0;
        }
        1.0 - self.recent.mean() / self.baseline
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlinkState {
    Open,
    HalfClosed { since_ms: u64, triggered: bool },
    FullyClosed,
}

pub struct BlinkClickStateMachine {
    config: BlinkConfig,
    state: BlinkState,
    left: EyeTrack,
    right: EyeTrack,
    last_baseline_refresh: Option<u64>,
    closure: f32,
    last_click: Option<ClickEvent>,
}

impl BlinkClickStateMachine {
    pub fn new(config: BlinkConfig) -> Self {
        let window = config.history_window_ms;
        Self {
            config,
            state: BlinkState::Open,
            left: EyeTrack::new(window),
            right: EyeTrack::new(window),
            last_baseline_refresh: None,
            closure: 0.0,
            last_click: None,
        }
    }

    /// Feed one frame of eyelid heights. Returns a click at most once per
    /// half-closure episode, stamped with `pointer`.
    pub fn observe(
        &mut self,
        left_height: f32,
        right_height: f32,
        now_ms: u64,
        pointer: Point2,
    ) -> Option<ClickEvent> {
        let was_open = self.state == BlinkState::Open;

        for (track, h) in [(&mut self.left, left_height), (&mut self.right, right_height)] {
            track.recent.push(now_ms, h);
            if was_open {
                track.open.push(now_ms, h);
            } else {
                track.open.prune(now_ms);
            }
        }

        let due = self
            .last_baseline_refresh
            .map_or(true, |t| now_ms.saturating_sub(t) >= self.config.baseline_refresh_ms);
        if due {
            self.refresh_baselines();
            self.last_baseline_refresh = Some(now_ms);
        }

        let closure = self.left.closure().max(self.right.closure());
        self.update_closure(closure, now_ms, pointer)
    }

    fn refresh_baselines(&mut self) {
        let floor = self.config.baseline_floor;
        for track in [&mut self.left, &mut self.right] {
            let candidate = track.open.mean();
            if candidate > floor {
                track.baseline = candidate;
            }
        }
    }

    /// Drive the state machine with an already-combined closure fraction.
    pub fn update_closure(&mut self, closure: f32, now_ms: u64, pointer: Point2) -> Option<ClickEvent> {
        let closure = if closure.is_finite() { closure.clamp(0.0, 1.0) } else { 0.0 };
        self.closure = closure;

        if closure >= self.config.full_threshold {
            if matches!(self.state, BlinkState::HalfClosed { .. }) {
                debug!(closure, "full blink, click cancelled");
            }
            self.state = BlinkState::FullyClosed;
            return None;
        }

        if closure < self.config.half_threshold {
            self.state = BlinkState::Open;
            return None;
        }

        let (since_ms, triggered) = match self.state {
            BlinkState::HalfClosed { since_ms, triggered } => (since_ms, triggered),
            _ => (now_ms, false),
        };

        let elapsed = now_ms.saturating_sub(since_ms);
        let in_window = (self.config.click_min_ms..=self.config.click_max_ms).contains(&elapsed);

        if in_window && !triggered {
            self.state = BlinkState::HalfClosed { since_ms, triggered: true };
            let click = ClickEvent { x: pointer.x, y: pointer.y, timestamp_ms: now_ms };
            self.last_click = Some(click);
            debug!(x = pointer.x, y = pointer.y, elapsed, "half-blink click");
            return Some(click);
        }

        self.state = BlinkState::HalfClosed { since_ms, triggered };
        None
    }

    pub fn closure(&self) -> f32 {
        self.closure
    }

    pub fn state(&self) -> BlinkState {
        self.state
    }

    pub fn baselines(&self) -> (f32, f32) {
        (self.left.baseline, self.right.baseline)
    }

    /// Position of the last click while its acknowledgement marker is live.
    pub fn marker(&self, now_ms: u64) -> Option<Point2> {
        self.last_click
            .filter(|c| now_ms.saturating_sub(c.timestamp_ms) <= self.config.marker_duration_ms)
            .map(|c| Point2::new(c.x, c.y))
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> BlinkClickStateMachine {
        BlinkClickStateMachine::new(BlinkConfig::default())
    }

    #[test]
    fn no_history_means_open() {
        let m = machine();
        assert_eq!(m.closure(), 0.0);
        assert_eq!(m.state(), BlinkState::Open);
    }

    #[test]
    fn zero_baseline_never_clicks() {
        let mut m = machine();
        for t in (0..3000).step_by(30) {
            assert!(m.observe(0.0, 0.0, t, Point2::ORIGIN).is_none());
        }
        assert_eq!(m.closure(), 0.0);
    }

    #[test]
    fn click_fires_inside_window() {
        let mut m = machine();
        let p = Point2::new(10.0, 20.0);
        let mut clicks = Vec::new();
        for t in (0..=1000).step_by(50) {
            clicks.extend(m.update_closure(0.7, t, p));
        }
        assert_eq!(clicks.len(), 1);
        assert_eq!(clicks[0].timestamp_ms, 150);
        assert_eq!((clicks[0].x, clicks[0].y), (10.0, 20.0));
        assert_eq!(m.marker(1000), Some(p));
        assert_eq!(m.marker(1700), None);
    }

    #[test]
    fn held_too_long_before_sampling_never_clicks() {
        let mut m = machine();
        m.update_closure(0.7, 0, Point2::ORIGIN);
        assert!(m.update_closure(0.7, 900, Point2::ORIGIN).is_none());
    }

    #[test]
    fn full_closure_cancels_timer() {
        let mut m = machine();
        assert!(m.update_closure(0.7, 0, Point2::ORIGIN).is_none());
        assert!(m.update_closure(0.9, 100, Point2::ORIGIN).is_none());
        assert_eq!(m.state(), BlinkState::FullyClosed);
        assert!(m.update_closure(0.1, 200, Point2::ORIGIN).is_none());
        assert_eq!(m.state(), BlinkState::Open);
    }

    #[test]
    fn sustained_partial_closure_from_heights() {
        let mut m = machine();
        let mut clicks = 0;
        for t in (0..4000u64).step_by(20) {
            let h = if t < 2000 { 10.0 } else { 3.0 };
            if m.observe(h, h, t, Point2::new(1.0, 1.0)).is_some() {
                clicks += 1;
            }
        }
        assert_eq!(clicks, 1);
        let (l, r) = m.baselines();
        assert!(l > 9.5 && r > 9.5, "baseline polluted: {l} {r}");
    }

    #[test]
    fn history_prunes_by_age() {
        let mut h = EyelidClosureHistory::new(1000);
        h.push(0, 4.0);
        h.push(500, 8.0);
        assert!((h.mean() - 6.0).abs() < 1e-6);
        h.push(1600, 2.0);
        assert_eq!(h.len(), 1);
        assert!((h.mean() - 2.0).abs() < 1e-6);
    }
}
