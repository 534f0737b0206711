use serde::{Deserialize, Serialize};

/// A single 2D point in pixel space
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub const ORIGIN: Point2 = Point2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn midpoint(&self, other: &Point2) -> Point2 {
        Point2::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// One detection result: ordered landmarks in the pixel space of a
/// `width` x `height` bitmap, captured at `timestamp_ms`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LandmarkFrame {
    pub timestamp_ms: u64,
    pub width: u32,
    pub height: u32,
    pub points: Vec<Point2>,
}

impl LandmarkFrame {
    pub fn new(timestamp_ms: u64, width: u32, height: u32, points: Vec<Point2>) -> Self {
        Self { timestamp_ms, width, height, points }
    }

    pub fn get(&self, index: usize) -> Option<Point2> {
        self.points.get(index).copied()
    }

    /// Points for `indices`, silently skipping any index this frame does not have.
    pub fn subset(&self, indices: &[usize]) -> Vec<Point2> {
        indices.iter().filter_map(|&i| self.get(i)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Screen surface the pointer lives on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> Point2 {
        Point2::new(self.width / 2.0, self.height / 2.0)
    }

    /// Clamp into [0, width] x [0, height].
    pub fn clamp(&self, p: Point2) -> Point2 {
        Point2::new(clamp_axis(p.x, self.width), clamp_axis(p.y, self.height))
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self { width: 1080.0, height: 2340.0 }
    }
}

fn clamp_axis(v: f32, max: f32) -> f32 {
    let max = if max.is_finite() { max.max(0.0) } else { 0.0 };
    if v.is_nan() {
        return max / 2.0;
    }
    v.clamp(0.0, max)
}

/// Circular fit of one eye socket.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EyeSphere {
    pub center_x: f32,
    pub center_y: f32,
    /// Mean distance of contour points from the centroid. Zero means "no data".
    pub radius: f32,
    pub scaled_radius: f32,
    pub z_scale: f32,
}

impl EyeSphere {
    pub const EMPTY: EyeSphere = EyeSphere {
        center_x: 0.0,
        center_y: 0.0,
        radius: 0.0,
        scaled_radius: 0.0,
        z_scale: 1.0,
    };

    pub fn center(&self) -> Point2 {
        Point2::new(self.center_x, self.center_y)
    }

    pub fn is_usable(&self) -> bool {
        self.radius > 0.0 && self.radius.is_finite() && self.center().is_finite()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeadDirection {
    pub normalized_x: f32,
    pub normalized_y: f32,
    pub magnitude: f32,
}

impl HeadDirection {
    /// Direction scaled back up by its magnitude.
    pub fn vector(&self) -> Point2 {
        Point2::new(self.normalized_x * self.magnitude, self.normalized_y * self.magnitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeLine {
    pub start: Point2,
    pub end: Point2,
}

/// Everything geometry extraction derives from one frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaceFeatures {
    pub left_sphere: EyeSphere,
    pub right_sphere: EyeSphere,
    pub left_pupil: Option<Point2>,
    pub right_pupil: Option<Point2>,
    pub head_origin: Point2,
    pub head_direction: HeadDirection,
    pub left_eye_height: f32,
    pub right_eye_height: f32,
}

impl FaceFeatures {
    pub fn average_eye_center(&self) -> Point2 {
        self.left_sphere.center().midpoint(&self.right_sphere.center())
    }

    pub fn average_sphere_size(&self) -> f32 {
        (self.left_sphere.radius + self.right_sphere.radius) / 2.0
    }

    pub fn has_gaze_geometry(&self) -> bool {
        self.left_sphere.is_usable() && self.right_sphere.is_usable()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClickEvent {
    pub x: f32,
    pub y: f32,
    pub timestamp_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_handles_infinities_and_nan() {
        let vp = Viewport::new(100.0, 50.0);
        assert_eq!(vp.clamp(Point2::new(f32::INFINITY, f32::NEG_INFINITY)), Point2::new(100.0, 0.0));
        let p = vp.clamp(Point2::new(f32::NAN, -3.0));
        assert!(p.x >= 0.0 && p.x <= 100.0);
        assert_eq!(p.y, 0.0);
    }

    #[test]
    fn subset_skips_missing_indices() {
        let frame = LandmarkFrame::new(0, 10, 10, vec![Point2::new(1.0, 1.0); 3]);
        assert_eq!(frame.subset(&[0, 2, 5, 900]).len(), 2);
    }
}
