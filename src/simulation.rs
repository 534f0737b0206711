use std::f32::consts::TAU;

use crate::detector::{CameraFrame, LandmarkDetector};
use crate::error::DetectorError;
use crate::landmarks;
use crate::types::{LandmarkFrame, Point2};

/// Parametric face that renders into the 478-point landmark topology.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticFace {
    pub left_eye: Point2,
    pub right_eye: Point2,
    pub eye_radius: f32,
    /// Pupil displacement from each eye center.
    pub pupil_offset: Point2,
    pub eyelid_height: f32,
    pub head_center: Point2,
    pub head_radius: f32,
    /// Vertical distance from the contour centroid to the nose bridge.
    pub target_drop: f32,
    /// Extra nose-bridge displacement, i.e. head turn/tilt.
    pub head_offset: Point2,
}

impl SyntheticFace {
    pub fn centered(width: f32, height: f32) -> Self {
        let cx = width / 2.0;
        let cy = height / 2.0;
        Self {
            left_eye: Point2::new(cx - 40.0, cy),
            right_eye: Point2::new(cx + 40.0, cy),
            eye_radius: 20.0,
            pupil_offset: Point2::ORIGIN,
            eyelid_height: 12.0,
            head_center: Point2::new(cx, cy - 60.0),
            head_radius: 120.0,
            target_drop: 70.0,
            head_offset: Point2::ORIGIN,
        }
    }

    pub fn render(&self, timestamp_ms: u64, width: u32, height: u32) -> LandmarkFrame {
        let mut points = vec![self.head_center; landmarks::MIN_LANDMARKS];

        let mut place = |indices: &[usize], center: Point2, rx: f32, ry: f32| {
            let n = indices.len() as f32;
            for (i, &idx) in indices.iter().enumerate() {
                let a = i as f32 / n * TAU;
                points[idx] = Point2::new(center.x + rx * a.cos(), center.y + ry * a.sin());
            }
        };

        place(&landmarks::SPHERE_LEFT_EYE, self.left_eye, self.eye_radius, self.eye_radius);
        place(&landmarks::SPHERE_RIGHT_EYE, self.right_eye, self.eye_radius, self.eye_radius);
        let half_lid = self.eyelid_height / 2.0;
        place(&landmarks::LEFT_EYELID, self.left_eye, self.eye_radius, half_lid);
        place(&landmarks::RIGHT_EYELID, self.right_eye, self.eye_radius, half_lid);
        place(&landmarks::HEAD_CONTOUR, self.head_center, self.head_radius, self.head_radius);

        points[landmarks::LEFT_PUPIL] = Point2::new(
            self.left_eye.x + self.pupil_offset.x,
            self.left_eye.y + self.pupil_offset.y,
        );
        points[landmarks::RIGHT_PUPIL] = Point2::new(
            self.right_eye.x + self.pupil_offset.x,
            self.right_eye.y + self.pupil_offset.y,
        );
        points[landmarks::HEAD_DIRECTION_TARGET] = Point2::new(
            self.head_center.x + self.head_offset.x,
            self.head_center.y + self.target_drop + self.head_offset.y,
        );

        LandmarkFrame::new(timestamp_ms, width, height, points)
    }
}

// =========================================================================
// Simulated detector: gaze circles the screen, with a periodic half-blink
// =========================================================================
pub struct SimulatedDetector {
    frame_count: u32,
    blink_period: u32,
    blink_frames: u32,
}

impl SimulatedDetector {
    pub fn new() -> Self {
        Self { frame_count: 0, blink_period: 90, blink_frames: 12 }
    }

    pub fn with_blinks(mut self, period: u32, frames: u32) -> Self {
        self.blink_period = period.max(1);
        self.blink_frames = frames;
        self
    }
}

impl Default for SimulatedDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl LandmarkDetector for SimulatedDetector {
    fn name(&self) -> String {
        "Simulated face (circular gaze)".to_string()
    }

    fn detect(&mut self, frame: &CameraFrame) -> Result<Option<LandmarkFrame>, DetectorError> {
        self.frame_count += 1;

        let t = self.frame_count as f32 * 0.05;
        let mut face = SyntheticFace::centered(frame.width as f32, frame.height as f32);
        face.pupil_offset = Point2::new(t.cos() * 6.0, t.sin() * 4.0);
        face.head_offset = Point2::new((t * 0.3).sin() * 15.0, 0.0);

        let phase = self.frame_count % self.blink_period;
        if phase >= self.blink_period.saturating_sub(self.blink_frames) {
            face.eyelid_height *= 0.3;
        }

        Ok(Some(face.render(frame.timestamp_ms, frame.width, frame.height)))
    }
}
