use crate::calibration::{CalibrationCoefficients, SampleFeatures};
use crate::config::PointerTuning;
use crate::gyro::GyroSnapshot;
use crate::types::{FaceFeatures, GazeLine, Point2, Viewport};

// =========================================================================
// Gaze line
// =========================================================================

/// Extrapolate the pupil away from the sphere center by `gaze_extension`.
/// With curvature enabled the Y component bends down in proportion to the
/// line length.
pub fn gaze_line(center: Point2, pupil: Point2, tuning: &PointerTuning) -> GazeLine {
    let dx = pupil.x - center.x;
    let dy = pupil.y - center.y;

    let curvature = if tuning.curvature_enabled {
        (dx * dx + dy * dy).sqrt() * tuning.curvature_downward * tuning.curvature_strength
    } else {
        0.0
    };

    GazeLine {
        start: center,
        end: Point2::new(
            pupil.x + dx * tuning.gaze_extension,
            pupil.y + (dy + curvature) * tuning.gaze_extension,
        ),
    }
}

// =========================================================================
// Scalar shaping functions
// =========================================================================

/// Viewing-distance proxy in [1, 3]; larger sphere means closer face.
pub fn distance_range(sphere_size: f32, min_size: f32, max_size: f32) -> f32 {
    let span = max_size - min_size;
    if !span.is_finite() || span <= f32::EPSILON || !sphere_size.is_finite() {
        return 1.0;
    }
    let normalized = ((sphere_size - min_size) / span).clamp(0.0, 1.0);
    1.0 + normalized * 2.0
}

/// Eye Y mapped to [0, 1] across the `eye_min_y_ratio..eye_max_y_ratio`
/// band of the viewport height (5%..95% until calibration narrows it).
pub fn normalized_eye_position(eye_y: f32, viewport_height: f32, tuning: &PointerTuning) -> f32 {
    let min_y = viewport_height * tuning.eye_min_y_ratio;
    let range = viewport_height * (tuning.eye_max_y_ratio - tuning.eye_min_y_ratio);
    if !(range > 0.0) || !eye_y.is_finite() {
        return 0.5;
    }
    ((eye_y - min_y) / range).clamp(0.0, 1.0)
}

/// Signed vertical push in [-3, 3]; zero when the eyes sit mid-band.
pub fn y_position_influence(eye_y: f32, viewport_height: f32, tuning: &PointerTuning) -> f32 {
    let y = (normalized_eye_position(eye_y, viewport_height, tuning) - 0.5) * 6.0;
    (y * (2.0 + y.abs() * 0.3)).clamp(-3.0, 3.0)
}

fn movement_factor(velocity: f32, tuning: &PointerTuning) -> f32 {
    let [slow, normal, deliberate] = tuning.velocity_thresholds;
    let [drift, steady, fast, rapid] = tuning.velocity_factors;
    if velocity < slow {
        drift
    } else if velocity < normal {
        steady
    } else if velocity < deliberate {
        fast
    } else {
        rapid
    }
}

/// Sensitivity scalar from gaze speed, vertical eye position and distance.
/// Always in [0.05, 5].
pub fn adaptive_sensitivity(
    gaze_velocity: f32,
    eye_y: f32,
    viewport_height: f32,
    sphere_size: f32,
    tuning: &PointerTuning,
) -> f32 {
    let movement = movement_factor(gaze_velocity, tuning);

    let n = normalized_eye_position(eye_y, viewport_height, tuning);
    let position = if n < 0.3 { 1.5 } else { 0.8 + n * 0.4 };

    let range = distance_range(sphere_size, tuning.min_sphere_size, tuning.max_sphere_size);
    let distance = 1.0 + (2.0 - range) * 0.2;

    let s = tuning.base_adaptive_sensitivity * movement * position * distance;
    if s.is_finite() {
        s.clamp(0.05, 5.0)
    } else {
        1.0
    }
}

// =========================================================================
// Composer
// =========================================================================

/// Everything one composition step derived, kept for rendering and for
/// snapshotting calibration samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub target: Point2,
    pub head_center: Point2,
    pub gaze_lines: Vec<GazeLine>,
    pub gaze_tip: Point2,
    pub gaze_direction: Point2,
    pub gaze_velocity: f32,
    pub eye_y_velocity: f32,
    pub adaptive_sensitivity: f32,
    pub distance_range: f32,
    pub y_influence: f32,
    pub average_eye: Point2,
    pub average_sphere_size: f32,
}

impl Composition {
    pub fn sample_features(&self) -> SampleFeatures {
        SampleFeatures {
            average_eye_x: self.average_eye.x,
            average_eye_y: self.average_eye.y,
            average_sphere_size: self.average_sphere_size,
            gaze_velocity: self.gaze_velocity,
            y_position_influence: self.y_influence,
            distance_range: self.distance_range,
            adaptive_sensitivity: self.adaptive_sensitivity,
        }
    }
}

/// Cross-frame state of the gaze path: previous gaze tip and eye height.
#[derive(Debug, Default)]
pub struct GazeComposer {
    last_gaze_tip: Option<Point2>,
    last_eye_y: Option<f32>,
    last_adaptive: f32,
}

impl GazeComposer {
    pub fn new() -> Self {
        Self { last_gaze_tip: None, last_eye_y: None, last_adaptive: 1.0 }
    }

    pub fn adaptive_sensitivity(&self) -> f32 {
        self.last_adaptive
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Compose one unclamped target. Returns `None` when either sphere is
    /// degenerate or no pupil is visible; velocity state is left untouched
    /// in that case.
    pub fn compose(
        &mut self,
        features: &FaceFeatures,
        viewport: Viewport,
        gyro: GyroSnapshot,
        coefficients: &CalibrationCoefficients,
        tuning: &PointerTuning,
    ) -> Option<Composition> {
        if !features.has_gaze_geometry() {
            return None;
        }

        let left_center = features.left_sphere.center();
        let right_center = features.right_sphere.center();

        let gaze_lines: Vec<GazeLine> = [
            features.left_pupil.map(|p| gaze_line(left_center, p, tuning)),
            features.right_pupil.map(|p| gaze_line(right_center, p, tuning)),
        ]
        .into_iter()
        .flatten()
        .filter(|l| l.end.is_finite())
        .collect();

        if gaze_lines.is_empty() {
            return None;
        }

        // 1. Gaze direction, measured from the centers of the eyes that drew a line
        let n = gaze_lines.len() as f32;
        let gaze_tip = Point2::new(
            gaze_lines.iter().map(|l| l.end.x).sum::<f32>() / n,
            gaze_lines.iter().map(|l| l.end.y).sum::<f32>() / n,
        );
        let gaze_origin = Point2::new(
            gaze_lines.iter().map(|l| l.start.x).sum::<f32>() / n,
            gaze_lines.iter().map(|l| l.start.y).sum::<f32>() / n,
        );
        let gaze_direction = Point2::new(gaze_tip.x - gaze_origin.x, gaze_tip.y - gaze_origin.y);
        let average_eye = features.average_eye_center();

        // 2. Adaptive sensitivity
        let gaze_velocity = self
            .last_gaze_tip
            .map(|last| last.distance(&gaze_tip))
            .unwrap_or(0.0);
        let eye_y_velocity = self.last_eye_y.map(|y| average_eye.y - y).unwrap_or(0.0);
        self.last_gaze_tip = Some(gaze_tip);
        self.last_eye_y = Some(average_eye.y);

        let sphere_size = features.average_sphere_size();
        let range = distance_range(sphere_size, tuning.min_sphere_size, tuning.max_sphere_size);
        let adaptive =
            adaptive_sensitivity(gaze_velocity, average_eye.y, viewport.height, sphere_size, tuning);
        self.last_adaptive = adaptive;

        // 3. Head-influenced center (Y inverted)
        let head = features.head_direction.vector();
        let center = viewport.center();
        let head_center = Point2::new(
            center.x + tuning.static_offset_x + head.x * tuning.head_sensitivity,
            center.y + tuning.static_offset_y - head.y * tuning.head_tilt_y_sensitivity,
        );

        // 4. Gaze offset
        let distance_multiplier = 1.0 + range * 0.1 * tuning.distance_scaling;
        let gaze_offset = Point2::new(
            gaze_direction.x * tuning.gaze_sensitivity_x * adaptive * distance_multiplier,
            gaze_direction.y * tuning.gaze_sensitivity_y * adaptive * distance_multiplier,
        );

        // 5. Y bias
        let y_influence = y_position_influence(average_eye.y, viewport.height, tuning);
        let y_offset = y_influence * tuning.y_bias_magnitude;

        // 6. Gyro stabilization
        let gyro_x = -gyro.velocity_x * tuning.gyro_sensitivity;
        let gyro_y = -gyro.velocity_y * tuning.gyro_sensitivity;

        // 7. Target
        let mut target = Point2::new(
            head_center.x + gaze_offset.x + gyro_x,
            head_center.y + gaze_offset.y + gyro_y + y_offset,
        );

        // 8. Multiplicative correction only
        if coefficients.is_calibrated {
            target.x *= coefficients.x_error_correction;
            target.y *= coefficients.y_error_correction;
        }

        Some(Composition {
            target,
            head_center,
            gaze_lines,
            gaze_tip,
            gaze_direction,
            gaze_velocity,
            eye_y_velocity,
            adaptive_sensitivity: adaptive,
            distance_range: range,
            y_influence,
            average_eye,
            average_sphere_size: sphere_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EyeSphere, HeadDirection};

    fn sphere(x: f32, y: f32, r: f32) -> EyeSphere {
        EyeSphere { center_x: x, center_y: y, radius: r, scaled_radius: r * 2.0, z_scale: 1.0 }
    }

    fn centered_features(vp: Viewport) -> FaceFeatures {
        let y = vp.height / 2.0;
        FaceFeatures {
            left_sphere: sphere(-40.0, y, 20.0),
            right_sphere: sphere(40.0, y, 20.0),
            left_pupil: Some(Point2::new(-40.0, y)),
            right_pupil: Some(Point2::new(40.0, y)),
            ..FaceFeatures::default()
        }
    }

    #[test]
    fn gaze_line_extends_past_pupil() {
        let t = PointerTuning { curvature_enabled: false, ..PointerTuning::default() };
        let l = gaze_line(Point2::new(0.0, 0.0), Point2::new(3.0, 4.0), &t);
        assert_eq!(l.start, Point2::ORIGIN);
        assert!((l.end.x - 9.0).abs() < 1e-5);
        assert!((l.end.y - 12.0).abs() < 1e-5);
    }

    #[test]
    fn curvature_bends_downward() {
        let t = PointerTuning::default();
        let l = gaze_line(Point2::new(0.0, 0.0), Point2::new(3.0, 4.0), &t);
        // len 5 * 0.3 * 0.5 = 0.75 added to dy before extension
        assert!((l.end.y - (4.0 + 4.75 * 2.0)).abs() < 1e-4);
    }

    #[test]
    fn distance_range_bounds() {
        assert_eq!(distance_range(0.0, 15.0, 45.0), 1.0);
        assert_eq!(distance_range(100.0, 15.0, 45.0), 3.0);
        assert!((distance_range(30.0, 15.0, 45.0) - 2.0).abs() < 1e-6);
        assert_eq!(distance_range(30.0, 20.0, 20.0), 1.0);
    }

    #[test]
    fn y_influence_neutral_at_middle() {
        let t = PointerTuning::default();
        assert!(y_position_influence(500.0, 1000.0, &t).abs() < 1e-5);
        assert_eq!(y_position_influence(0.0, 1000.0, &t), -3.0);
        assert_eq!(y_position_influence(1000.0, 1000.0, &t), 3.0);
    }

    #[test]
    fn calibrated_eye_band_moves_the_neutral_point() {
        let narrowed = PointerTuning { eye_min_y_ratio: 0.4, eye_max_y_ratio: 0.9, ..PointerTuning::default() };
        // 500 of 1000 sits at 0.2 of the 400..900 band
        assert!((normalized_eye_position(500.0, 1000.0, &narrowed) - 0.2).abs() < 1e-5);
        assert!(y_position_influence(500.0, 1000.0, &narrowed) < 0.0);
        assert!(y_position_influence(650.0, 1000.0, &narrowed).abs() < 1e-5);

        let collapsed = PointerTuning { eye_min_y_ratio: 0.5, eye_max_y_ratio: 0.5, ..PointerTuning::default() };
        assert_eq!(normalized_eye_position(900.0, 1000.0, &collapsed), 0.5);
    }

    #[test]
    fn refit_eye_range_shifts_target() {
        let vp = Viewport::new(1000.0, 2000.0);
        let f = centered_features(vp);
        let coeffs = CalibrationCoefficients {
            is_calibrated: true,
            eye_y_min: 800.0,
            eye_y_max: 1400.0,
            ..CalibrationCoefficients::default()
        };
        let before = PointerTuning::default();
        let after = coeffs.apply_ranges(&before, vp);
        assert!((after.eye_min_y_ratio - 0.4).abs() < 1e-6);
        assert!((after.eye_max_y_ratio - 0.7).abs() < 1e-6);

        let a = GazeComposer::new().compose(&f, vp, GyroSnapshot::default(), &coeffs, &before).unwrap();
        let b = GazeComposer::new().compose(&f, vp, GyroSnapshot::default(), &coeffs, &after).unwrap();
        assert!(a.y_influence.abs() < 1e-5);
        // eyes at a third of the observed band: influence -2.3
        assert!((b.y_influence + 2.3).abs() < 1e-3);
        assert!(b.target.y < a.target.y - 200.0);
    }

    #[test]
    fn distance_scaling_widens_gaze_offset() {
        let vp = Viewport::new(1000.0, 2000.0);
        let mut f = centered_features(vp);
        f.left_pupil = Some(Point2::new(-35.0, 1000.0));
        f.right_pupil = Some(Point2::new(45.0, 1000.0));
        let coeffs = CalibrationCoefficients::default();
        let base = PointerTuning { curvature_enabled: false, ..PointerTuning::default() };
        let scaled = PointerTuning { distance_scaling: 3.0, ..base.clone() };

        let a = GazeComposer::new().compose(&f, vp, GyroSnapshot::default(), &coeffs, &base).unwrap();
        let b = GazeComposer::new().compose(&f, vp, GyroSnapshot::default(), &coeffs, &scaled).unwrap();
        let r = distance_range(20.0, base.min_sphere_size, base.max_sphere_size);
        let offset_a = a.target.x - a.head_center.x;
        let offset_b = b.target.x - b.head_center.x;
        assert!(offset_a > 0.0);
        assert!((offset_b / offset_a - (1.0 + r * 0.3) / (1.0 + r * 0.1)).abs() < 1e-4);
    }

    #[test]
    fn single_visible_pupil_measures_from_its_own_eye() {
        let vp = Viewport::new(1000.0, 2000.0);
        let mut f = centered_features(vp);
        f.right_pupil = None;
        let mut c = GazeComposer::new();
        let out = c
            .compose(&f, vp, GyroSnapshot::default(), &CalibrationCoefficients::default(), &PointerTuning::default())
            .unwrap();
        assert_eq!(out.gaze_lines.len(), 1);
        assert!(out.gaze_direction.x.abs() < 1e-4, "{:?}", out.gaze_direction);
        assert!((out.target.x - 500.0).abs() < 1e-3);
    }

    #[test]
    fn adaptive_sensitivity_stays_in_band() {
        let t = PointerTuning::default();
        for v in [0.0, 5.0, 10.0, 1e6] {
            for y in [0.0, 500.0, 1000.0] {
                let s = adaptive_sensitivity(v, y, 1000.0, 30.0, &t);
                assert!((0.05..=5.0).contains(&s));
            }
        }
        // upper screen, rapid, far away: 0.8 * 1.5 * 1.5 * 1.2
        let s = adaptive_sensitivity(100.0, 0.0, 1000.0, 0.0, &t);
        assert!((s - 2.16).abs() < 1e-4);
    }

    #[test]
    fn degenerate_sphere_yields_nothing() {
        let vp = Viewport::new(1000.0, 2000.0);
        let mut f = centered_features(vp);
        f.left_sphere = EyeSphere::EMPTY;
        let mut c = GazeComposer::new();
        let out = c.compose(&f, vp, GyroSnapshot::default(), &CalibrationCoefficients::default(), &PointerTuning::default());
        assert!(out.is_none());
    }

    #[test]
    fn missing_pupils_yield_nothing() {
        let vp = Viewport::new(1000.0, 2000.0);
        let mut f = centered_features(vp);
        f.left_pupil = None;
        f.right_pupil = None;
        let mut c = GazeComposer::new();
        assert!(c
            .compose(&f, vp, GyroSnapshot::default(), &CalibrationCoefficients::default(), &PointerTuning::default())
            .is_none());
    }

    #[test]
    fn centered_gaze_targets_head_center() {
        let vp = Viewport::new(1000.0, 2000.0);
        let f = centered_features(vp);
        let mut c = GazeComposer::new();
        let out = c
            .compose(&f, vp, GyroSnapshot::default(), &CalibrationCoefficients::default(), &PointerTuning::default())
            .unwrap();
        assert!((out.target.x - 500.0).abs() < 1e-3);
        assert!((out.target.y - 1000.0).abs() < 1e-3);
        assert_eq!(out.gaze_direction, Point2::ORIGIN);
    }

    #[test]
    fn head_and_gyro_shift_target() {
        let vp = Viewport::new(1000.0, 2000.0);
        let mut f = centered_features(vp);
        f.head_direction = HeadDirection { normalized_x: 1.0, normalized_y: 0.0, magnitude: 100.0 };
        let t = PointerTuning::default();
        let gyro = GyroSnapshot { velocity_x: 0.1, velocity_y: 0.0 };
        let mut c = GazeComposer::new();
        let out = c.compose(&f, vp, gyro, &CalibrationCoefficients::default(), &t).unwrap();
        // 500 + 100 * 0.6 - 0.1 * 200
        assert!((out.target.x - 540.0).abs() < 1e-3);
    }

    #[test]
    fn calibration_scales_target() {
        let vp = Viewport::new(1000.0, 2000.0);
        let f = centered_features(vp);
        let coeffs = CalibrationCoefficients {
            is_calibrated: true,
            x_error_correction: 1.2,
            y_error_correction: 0.5,
            ..CalibrationCoefficients::default()
        };
        let mut c = GazeComposer::new();
        let out = c
            .compose(&f, vp, GyroSnapshot::default(), &coeffs, &PointerTuning::default())
            .unwrap();
        assert!((out.target.x - 600.0).abs() < 1e-3);
        assert!((out.target.y - 500.0).abs() < 1e-3);
    }

    #[test]
    fn velocity_tracks_gaze_tip() {
        let vp = Viewport::new(1000.0, 2000.0);
        let mut f = centered_features(vp);
        let t = PointerTuning { curvature_enabled: false, ..PointerTuning::default() };
        let coeffs = CalibrationCoefficients::default();
        let mut c = GazeComposer::new();

        let first = c.compose(&f, vp, GyroSnapshot::default(), &coeffs, &t).unwrap();
        assert_eq!(first.gaze_velocity, 0.0);

        // shift both pupils 1px right: tip moves 3px
        f.left_pupil = Some(Point2::new(-39.0, 1000.0));
        f.right_pupil = Some(Point2::new(41.0, 1000.0));
        let second = c.compose(&f, vp, GyroSnapshot::default(), &coeffs, &t).unwrap();
        assert!((second.gaze_velocity - 3.0).abs() < 1e-4);
        assert!(second.target.x > first.target.x);
    }
}
