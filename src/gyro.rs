//! Gyroscope drift handoff between the sensor callback and the render path.
//!
//! The sensor side writes, the render side reads once per frame. Only scalars
//! cross the boundary, so plain atomics are enough; a reader may see a value
//! one sample stale.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

const SAMPLE_GAIN: f32 = 0.1;
const DEFAULT_DECAY: f32 = 0.5;
const VELOCITY_LIMIT: f32 = 3.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GyroSnapshot {
    pub velocity_x: f32,
    pub velocity_y: f32,
}

#[derive(Debug)]
struct Inner {
    velocity_x: AtomicU32,
    velocity_y: AtomicU32,
    last_timestamp_ms: AtomicU64,
    gain: f32,
    decay: f32,
}

/// Cloneable handle; clones share the same state.
#[derive(Debug, Clone)]
pub struct GyroHandoff {
    inner: Arc<Inner>,
}

impl Default for GyroHandoff {
    fn default() -> Self {
        Self::new(SAMPLE_GAIN, DEFAULT_DECAY)
    }
}

impl GyroHandoff {
    pub fn new(gain: f32, decay: f32) -> Self {
        Self {
            inner: Arc::new(Inner {
                velocity_x: AtomicU32::new(0f32.to_bits()),
                velocity_y: AtomicU32::new(0f32.to_bits()),
                last_timestamp_ms: AtomicU64::new(0),
                gain,
                decay: decay.clamp(0.0, 0.99),
            }),
        }
    }

    /// Feed one angular-velocity sample (rad/s around device X and Y).
    /// The first sample only arms the clock.
    pub fn record_sample(&self, gyro_x: f32, gyro_y: f32, timestamp_ms: u64) {
        let inner = &self.inner;
        let last = inner.last_timestamp_ms.swap(timestamp_ms, Ordering::AcqRel);
        if last == 0 || timestamp_ms <= last {
            return;
        }
        if !gyro_x.is_finite() || !gyro_y.is_finite() {
            return;
        }
        let dt = (timestamp_ms - last) as f32 / 1000.0;

        let prev = self.snapshot();
        let vx = (prev.velocity_x * inner.decay + gyro_y * inner.gain * dt)
            .clamp(-VELOCITY_LIMIT, VELOCITY_LIMIT);
        let vy = (prev.velocity_y * inner.decay - gyro_x * inner.gain * dt)
            .clamp(-VELOCITY_LIMIT, VELOCITY_LIMIT);

        inner.velocity_x.store(vx.to_bits(), Ordering::Release);
        inner.velocity_y.store(vy.to_bits(), Ordering::Release);
    }

    pub fn snapshot(&self) -> GyroSnapshot {
        GyroSnapshot {
            velocity_x: f32::from_bits(self.inner.velocity_x.load(Ordering::Acquire)),
            velocity_y: f32::from_bits(self.inner.velocity_y.load(Ordering::Acquire)),
        }
    }

    pub fn reset(&self) {
        self.inner.velocity_x.store(0f32.to_bits(), Ordering::Release);
        self.inner.velocity_y.store(0f32.to_bits(), Ordering::Release);
        self.inner.last_timestamp_ms.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_sample_only_arms_clock() {
        let g = GyroHandoff::default();
        g.record_sample(5.0, 5.0, 1000);
        assert_eq!(g.snapshot(), GyroSnapshot::default());
    }

    #[test]
    fn integrates_and_clamps() {
        let g = GyroHandoff::new(0.1, 0.0);
        g.record_sample(0.0, 0.0, 1000);
        g.record_sample(-2.0, 1.0, 1100);
        let s = g.snapshot();
        assert!((s.velocity_x - 0.01).abs() < 1e-6);
        assert!((s.velocity_y - 0.02).abs() < 1e-6);

        g.record_sample(0.0, 1.0e6, 2100);
        assert_eq!(g.snapshot().velocity_x, 3.0);
    }

    #[test]
    fn decays_toward_zero_without_motion() {
        let g = GyroHandoff::new(0.1, 0.5);
        g.record_sample(0.0, 0.0, 10);
        g.record_sample(0.0, 10.0, 1010);
        let first = g.snapshot().velocity_x;
        for t in 1..10u64 {
            g.record_sample(0.0, 0.0, 1010 + t * 16);
        }
        assert!(g.snapshot().velocity_x.abs() < first.abs() * 0.01);
    }

    #[test]
    fn handoff_across_threads() {
        let g = GyroHandoff::new(0.1, 0.0);
        let writer = g.clone();
        thread::spawn(move || {
            writer.record_sample(0.0, 0.0, 1);
            writer.record_sample(0.0, 10.0, 1001);
        })
        .join()
        .unwrap();
        assert!((g.snapshot().velocity_x - 1.0).abs() < 1e-6);
        g.reset();
        assert_eq!(g.snapshot(), GyroSnapshot::default());
    }
}
