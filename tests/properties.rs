use proptest::prelude::*;

use pupil_pointer::calibration::{CalibrationEngine, SampleFeatures};
use pupil_pointer::config::CalibrationSettings;
use pupil_pointer::motion::MotionFilter;
use pupil_pointer::types::{Point2, Viewport};

fn any_coordinate() -> impl Strategy<Value = f32> {
    prop_oneof![
        -1.0e9f32..1.0e9f32,
        Just(f32::INFINITY),
        Just(f32::NEG_INFINITY),
        Just(f32::NAN),
    ]
}

proptest! {
    #[test]
    fn pointer_always_inside_viewport(
        w in 1.0f32..5000.0,
        h in 1.0f32..5000.0,
        damping in 0.01f32..1.0,
        targets in prop::collection::vec((any_coordinate(), any_coordinate()), 1..40),
    ) {
        let vp = Viewport::new(w, h);
        let mut filter = MotionFilter::new();
        for (x, y) in targets {
            let p = filter.apply(Point2::new(x, y), damping, vp);
            prop_assert!(p.x >= 0.0 && p.x <= w, "x {} outside [0, {}]", p.x, w);
            prop_assert!(p.y >= 0.0 && p.y <= h, "y {} outside [0, {}]", p.y, h);
            // Clamping a clamped position changes nothing
            prop_assert_eq!(vp.clamp(p), p);
        }
    }

    #[test]
    fn correction_factors_stay_in_band(
        taps in prop::collection::vec((-1.0e7f32..1.0e7, -1.0e7f32..1.0e7), 20..80),
        cursor in (0.0f32..1080.0, 0.0f32..2340.0),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let settings = CalibrationSettings { data_dir: dir.path().to_path_buf(), ..CalibrationSettings::default() };
        let (lo, hi) = (settings.correction_min, settings.correction_max);
        let mut engine = CalibrationEngine::new(settings);
        engine.start();

        let vp = Viewport::new(1080.0, 2340.0);
        for (i, (x, y)) in taps.into_iter().enumerate() {
            engine.record_sample(
                Point2::new(x, y),
                Some(Point2::new(cursor.0, cursor.1)),
                SampleFeatures::default(),
                vp,
                i as u64,
            );
            let c = engine.coefficients();
            prop_assert!(c.x_error_correction >= lo && c.x_error_correction <= hi);
            prop_assert!(c.y_error_correction >= lo && c.y_error_correction <= hi);
        }
        prop_assert!(engine.coefficients().is_calibrated);
    }
}
