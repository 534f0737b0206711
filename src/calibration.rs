use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{CalibrationSettings, PointerTuning};
use crate::error::PersistError;
use crate::types::{Point2, Viewport};

pub const CALIBRATION_FILE: &str = "calibration_data.json";
const SCHEMA_VERSION: u32 = 1;

/// Eye-geometry and behaviour snapshot taken at tap time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleFeatures {
    pub average_eye_x: f32,
    pub average_eye_y: f32,
    pub average_sphere_size: f32,
    pub gaze_velocity: f32,
    pub y_position_influence: f32,
    pub distance_range: f32,
    pub adaptive_sensitivity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub tap: Point2,
    pub cursor: Point2,
    pub features: SampleFeatures,
    pub error_x: f32,
    pub error_y: f32,
    pub error_magnitude: f32,
    pub timestamp_ms: u64,
}

impl CalibrationSample {
    pub fn new(tap: Point2, cursor: Point2, features: SampleFeatures, timestamp_ms: u64) -> Self {
        let error_x = tap.x - cursor.x;
        let error_y = tap.y - cursor.y;
        Self {
            tap,
            cursor,
            features,
            error_x,
            error_y,
            error_magnitude: (error_x * error_x + error_y * error_y).sqrt(),
            timestamp_ms,
        }
    }
}

/// Fitted correction state. Offsets are recorded for diagnostics only;
/// the composer applies the multiplicative factors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationCoefficients {
    pub version: u32,
    pub is_calibrated: bool,
    pub x_error_correction: f32,
    pub y_error_correction: f32,
    pub x_offset_correction: f32,
    pub y_offset_correction: f32,
    pub eye_y_min: f32,
    pub eye_y_max: f32,
    pub sphere_size_min: f32,
    pub sphere_size_max: f32,
    pub avg_y_position_influence: f32,
    pub avg_distance_range: f32,
    pub avg_adaptive_sensitivity: f32,
    pub sample_count: usize,
    pub mean_error_magnitude: f32,
}

impl Default for CalibrationCoefficients {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            is_calibrated: false,
            x_error_correction: 1.0,
            y_error_correction: 1.0,
            x_offset_correction: 0.0,
            y_offset_correction: 0.0,
            eye_y_min: 0.0,
            eye_y_max: 0.0,
            sphere_size_min: 0.0,
            sphere_size_max: 0.0,
            avg_y_position_influence: 0.0,
            avg_distance_range: 0.0,
            avg_adaptive_sensitivity: 0.0,
            sample_count: 0,
            mean_error_magnitude: 0.0,
        }
    }
}

impl CalibrationCoefficients {
    /// Feed observed operating ranges back into `tuning`. Uncalibrated
    /// coefficients leave it unchanged.
    pub fn apply_ranges(&self, tuning: &PointerTuning, viewport: Viewport) -> PointerTuning {
        let mut t = tuning.clone();
        if !self.is_calibrated {
            return t;
        }
        if self.sphere_size_max > self.sphere_size_min && self.sphere_size_min > 0.0 {
            t.min_sphere_size = self.sphere_size_min;
            t.max_sphere_size = self.sphere_size_max;
        }
        if viewport.height > 0.0 && self.eye_y_max > self.eye_y_min {
            let lo = (self.eye_y_min / viewport.height).clamp(0.1, 0.8);
            let hi = (self.eye_y_max / viewport.height).clamp(0.2, 0.95);
            if hi > lo {
                t.eye_min_y_ratio = lo;
                t.eye_max_y_ratio = hi;
            }
        }
        t.sanitized()
    }
}

fn mean(values: impl Iterator<Item = f32>) -> f32 {
    let (sum, n) = values.fold((0.0f32, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f32
    }
}

/// Result of one accepted tap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordOutcome {
    pub sample: CalibrationSample,
    pub refitted: bool,
}

pub struct CalibrationEngine {
    settings: CalibrationSettings,
    active: bool,
    click_count: usize,
    samples: Vec<CalibrationSample>,
    coefficients: CalibrationCoefficients,
}

impl CalibrationEngine {
    pub fn new(settings: CalibrationSettings) -> Self {
        Self {
            settings,
            active: false,
            click_count: 0,
            samples: Vec::new(),
            coefficients: CalibrationCoefficients::default(),
        }
    }

    pub fn file_path(&self) -> PathBuf {
        self.settings.data_dir.join(CALIBRATION_FILE)
    }

    pub fn settings(&self) -> &CalibrationSettings {
        &self.settings
    }

    /// Begin a session: clear the sample set and continue from the last
    /// persisted fit.
    pub fn start(&mut self) {
        self.active = true;
        self.samples.clear();
        self.click_count = 0;
        self.restore();
        info!(path = %self.file_path().display(), "calibration started");
    }

    pub fn stop(&mut self) {
        self.active = false;
        self.persist();
        info!(clicks = self.click_count, "calibration stopped");
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Record one tap. Ignored (not an error) while inactive. `cursor` falls
    /// back to the viewport center before the first pointer update.
    pub fn record_sample(
        &mut self,
        tap: Point2,
        cursor: Option<Point2>,
        features: SampleFeatures,
        viewport: Viewport,
        timestamp_ms: u64,
    ) -> Option<RecordOutcome> {
        if !self.active || !tap.is_finite() {
            return None;
        }

        let cursor = cursor.unwrap_or_else(|| viewport.center());
        let sample = CalibrationSample::new(tap, cursor, features, timestamp_ms);

        self.samples.push(sample);
        if self.samples.len() > self.settings.max_samples {
            let excess = self.samples.len() - self.settings.max_samples;
            self.samples.drain(..excess);
        }
        self.click_count += 1;

        debug!(
            error_x = sample.error_x,
            error_y = sample.error_y,
            clicks = self.click_count,
            "calibration tap"
        );

        let interval = self.settings.refit_interval.max(1);
        let refitted = self.click_count % interval == 0;
        if refitted {
            self.refit(viewport);
        }

        Some(RecordOutcome { sample, refitted })
    }

    /// Proportional corrective fit over the retained samples.
    pub fn refit(&mut self, viewport: Viewport) {
        if self.samples.is_empty() {
            return;
        }
        let s = &self.settings;
        let c = &mut self.coefficients;

        let mean_x = mean(self.samples.iter().map(|p| p.error_x));
        let mean_y = mean(self.samples.iter().map(|p| p.error_y));
        c.mean_error_magnitude = mean(self.samples.iter().map(|p| p.error_magnitude));
        c.avg_y_position_influence = mean(self.samples.iter().map(|p| p.features.y_position_influence));
        c.avg_distance_range = mean(self.samples.iter().map(|p| p.features.distance_range));
        c.avg_adaptive_sensitivity = mean(self.samples.iter().map(|p| p.features.adaptive_sensitivity));

        let factor = |err: f32, dim: f32| -> f32 {
            if err == 0.0 || dim <= 0.0 {
                return 1.0;
            }
            let f = 1.0 + (err / dim) * s.correction_damping;
            if f.is_finite() {
                f.clamp(s.correction_min, s.correction_max)
            } else {
                1.0
            }
        };
        c.x_error_correction = factor(mean_x, viewport.width);
        c.y_error_correction = factor(mean_y, viewport.height);
        c.x_offset_correction = mean_x * s.offset_gain;
        c.y_offset_correction = mean_y * s.offset_gain;

        let eye_ys = self.samples.iter().map(|p| p.features.average_eye_y);
        c.eye_y_min = eye_ys.clone().fold(f32::INFINITY, f32::min);
        c.eye_y_max = eye_ys.fold(f32::NEG_INFINITY, f32::max);
        let sizes = self.samples.iter().map(|p| p.features.average_sphere_size);
        c.sphere_size_min = sizes.clone().fold(f32::INFINITY, f32::min);
        c.sphere_size_max = sizes.fold(f32::NEG_INFINITY, f32::max);

        c.is_calibrated = true;
        c.sample_count = self.click_count;

        info!(
            x = c.x_error_correction,
            y = c.y_error_correction,
            mean_error = c.mean_error_magnitude,
            samples = self.samples.len(),
            "calibration refit"
        );
    }

    /// Shift the recorded offsets by an auto-tune step. No-op before the
    /// first fit.
    pub fn adjust_offsets(&mut self, dx: f32, dy: f32) {
        if !self.coefficients.is_calibrated || !dx.is_finite() || !dy.is_finite() {
            return;
        }
        self.coefficients.x_offset_correction += dx;
        self.coefficients.y_offset_correction += dy;
    }

    fn write_coefficients(&self) -> Result<(), PersistError> {
        let dir = &self.settings.data_dir;
        fs::create_dir_all(dir).map_err(|e| PersistError::io(dir, e))?;
        let path = self.file_path();
        let json = serde_json::to_string_pretty(&self.coefficients)?;
        fs::write(&path, json).map_err(|e| PersistError::io(&path, e))?;
        Ok(())
    }

    fn read_coefficients(path: &Path) -> Result<CalibrationCoefficients, PersistError> {
        let content = fs::read_to_string(path).map_err(|e| PersistError::io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the coefficients. Failures are logged and swallowed.
    pub fn persist(&self) -> bool {
        match self.write_coefficients() {
            Ok(()) => {
                debug!(path = %self.file_path().display(), "calibration persisted");
                true
            }
            Err(e) => {
                warn!(error = %e, "calibration persist failed");
                false
            }
        }
    }

    /// Load persisted coefficients, falling back to defaults on any failure.
    pub fn restore(&mut self) -> bool {
        let path = self.file_path();
        match Self::read_coefficients(&path) {
            Ok(c) => {
                self.coefficients = sanitize(c, &self.settings);
                info!(path = %path.display(), calibrated = self.coefficients.is_calibrated, "calibration restored");
                true
            }
            Err(e) => {
                debug!(error = %e, "no usable calibration, using defaults");
                self.coefficients = CalibrationCoefficients::default();
                false
            }
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.click_count = 0;
        self.coefficients = CalibrationCoefficients::default();
        self.active = false;

        let path = self.file_path();
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                debug!(error = %e, "could not delete calibration file");
            }
        }
        info!("calibration reset");
    }

    pub fn status(&self) -> String {
        if self.active {
            format!("Calibrating... {} clicks", self.click_count)
        } else if self.coefficients.is_calibrated {
            format!("Calibrated ({} clicks)", self.coefficients.sample_count)
        } else {
            "Not calibrated".to_string()
        }
    }

    pub fn coefficients(&self) -> &CalibrationCoefficients {
        &self.coefficients
    }

    pub fn samples(&self) -> &[CalibrationSample] {
        &self.samples
    }

    pub fn click_count(&self) -> usize {
        self.click_count
    }
}

// Hand-edited or older files may carry factors outside the band
fn sanitize(mut c: CalibrationCoefficients, s: &CalibrationSettings) -> CalibrationCoefficients {
    let band = |v: f32| if v.is_finite() { v.clamp(s.correction_min, s.correction_max) } else { 1.0 };
    c.x_error_correction = band(c.x_error_correction);
    c.y_error_correction = band(c.y_error_correction);
    c
}
