use crate::types::{Point2, Viewport};

/// Last rendered pointer location. `None` until the first processed frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointerState {
    pub last_position: Option<Point2>,
}

// =========================================================================
// Motion filter (exponential moving average + viewport clamp)
// =========================================================================
pub struct MotionFilter {
    state: PointerState,
}

impl Default for MotionFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionFilter {
    pub fn new() -> Self {
        Self { state: PointerState::default() }
    }

    /// `pos += (target - pos) * damping`, then clamp into the viewport.
    /// The first frame snaps straight to the target. A non-finite target
    /// axis keeps the previous value so NaN never reaches the pointer.
    pub fn apply(&mut self, target: Point2, damping: f32, viewport: Viewport) -> Point2 {
        let d = if damping.is_finite() { damping.clamp(0.0, 1.0) } else { 1.0 };

        let next = match self.state.last_position {
            None => target,
            Some(prev) => Point2::new(
                step(prev.x, target.x, d),
                step(prev.y, target.y, d),
            ),
        };

        let next = match self.state.last_position {
            Some(prev) => Point2::new(
                if next.x.is_nan() { prev.x } else { next.x },
                if next.y.is_nan() { prev.y } else { next.y },
            ),
            None => next,
        };

        let clamped = viewport.clamp(next);
        self.state.last_position = Some(clamped);
        clamped
    }

    pub fn last_position(&self) -> Option<Point2> {
        self.state.last_position
    }

    pub fn state(&self) -> PointerState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = PointerState::default();
    }
}

fn step(prev: f32, target: f32, d: f32) -> f32 {
    if target.is_infinite() {
        // Any positive damping toward infinity lands on the bound after clamping
        return target;
    }
    prev + (target - prev) * d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_snaps() {
        let mut f = MotionFilter::new();
        let vp = Viewport::new(1000.0, 1000.0);
        assert_eq!(f.apply(Point2::new(300.0, 700.0), 0.1, vp), Point2::new(300.0, 700.0));
    }

    #[test]
    fn converges_geometrically() {
        let mut f = MotionFilter::new();
        let vp = Viewport::new(1000.0, 1000.0);
        f.apply(Point2::ORIGIN, 0.4, vp);
        let t = Point2::new(500.0, 500.0);
        let mut p = Point2::ORIGIN;
        for _ in 0..10 {
            p = f.apply(t, 0.4, vp);
        }
        let expected = 500.0 * (1.0 - 0.6f32.powi(10));
        assert!((p.x - expected).abs() < 1e-2);
        assert!((t.x - p.x).abs() / t.x < 0.01);
    }

    #[test]
    fn infinite_and_nan_targets_stay_bounded() {
        let mut f = MotionFilter::new();
        let vp = Viewport::new(200.0, 100.0);
        f.apply(Point2::new(50.0, 50.0), 0.5, vp);

        let p = f.apply(Point2::new(f32::INFINITY, f32::NEG_INFINITY), 0.5, vp);
        assert_eq!(p, Point2::new(200.0, 0.0));

        let q = f.apply(Point2::new(f32::NAN, 40.0), 0.5, vp);
        assert_eq!(q.x, 200.0);
        assert!((q.y - 20.0).abs() < 1e-4);
    }

    #[test]
    fn reset_forgets_position() {
        let mut f = MotionFilter::new();
        f.apply(Point2::new(1.0, 1.0), 0.5, Viewport::default());
        f.reset();
        assert!(f.last_position().is_none());
    }
}
