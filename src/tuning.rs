//! Error-pattern driven parameter tuning and the versioned formula history.
//!
//! This is an auxiliary heuristic on top of the proportional calibration
//! fit; the control loop works without it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::calibration::{CalibrationCoefficients, CalibrationSample};
use crate::config::{CalibrationSettings, PointerTuning};
use crate::error::PersistError;

pub const FORMULA_HISTORY_FILE: &str = "formula_history.json";
const ANALYSIS_WINDOW: usize = 100;
const EXPORT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub avg_error_x: f32,
    pub avg_error_y: f32,
    pub avg_error_magnitude: f32,
    /// sphere size vs error magnitude
    pub distance_correlation: f32,
    /// eye Y vs error Y
    pub y_position_correlation: f32,
    /// eye X vs error X
    pub x_position_correlation: f32,
    /// Percent drop in mean error from first to second half.
    pub error_reduction: f32,
}

/// Pearson correlation; 0 for fewer than two pairs or zero variance.
pub fn correlation(data: &[(f32, f32)]) -> f32 {
    if data.len() < 2 {
        return 0.0;
    }
    let n = data.len() as f64;
    let (mut sx, mut sy, mut sxy, mut sx2, mut sy2) = (0.0f64, 0.0, 0.0, 0.0, 0.0);
    for &(x, y) in data {
        let (x, y) = (x as f64, y as f64);
        sx += x;
        sy += y;
        sxy += x * y;
        sx2 += x * x;
        sy2 += y * y;
    }
    let numerator = n * sxy - sx * sy;
    let denominator = ((n * sx2 - sx * sx) * (n * sy2 - sy * sy)).sqrt();
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    ((numerator / denominator) as f32).clamp(-1.0, 1.0)
}

pub fn error_reduction(samples: &[CalibrationSample]) -> f32 {
    if samples.len() < 20 {
        return 0.0;
    }
    let (first, second) = samples.split_at(samples.len() / 2);
    let avg = |s: &[CalibrationSample]| {
        s.iter().map(|p| p.error_magnitude as f64).sum::<f64>() / s.len() as f64
    };
    let a = avg(first);
    if a <= 0.0 {
        return 0.0;
    }
    ((a - avg(second)) / a * 100.0) as f32
}

pub fn analyze_error_patterns(samples: &[CalibrationSample]) -> ErrorAnalysis {
    if samples.is_empty() {
        return ErrorAnalysis::default();
    }
    let n = samples.len() as f32;
    let pairs = |f: fn(&CalibrationSample) -> (f32, f32)| samples.iter().map(f).collect::<Vec<_>>();

    ErrorAnalysis {
        avg_error_x: samples.iter().map(|p| p.error_x).sum::<f32>() / n,
        avg_error_y: samples.iter().map(|p| p.error_y).sum::<f32>() / n,
        avg_error_magnitude: samples.iter().map(|p| p.error_magnitude).sum::<f32>() / n,
        distance_correlation: correlation(&pairs(|p| (p.features.average_sphere_size, p.error_magnitude))),
        y_position_correlation: correlation(&pairs(|p| (p.features.average_eye_y, p.error_y))),
        x_position_correlation: correlation(&pairs(|p| (p.features.average_eye_x, p.error_x))),
        error_reduction: error_reduction(samples),
    }
}

/// Enough samples, and enough of them badly off, to justify a retune.
pub fn should_tune(samples: &[CalibrationSample], settings: &CalibrationSettings) -> bool {
    if samples.len() < settings.min_tuning_points {
        return false;
    }
    let high = samples
        .iter()
        .filter(|p| p.error_magnitude > settings.error_threshold)
        .count();
    high >= settings.high_error_trigger
}

/// The last `ANALYSIS_WINDOW` samples.
pub fn analysis_window(samples: &[CalibrationSample]) -> &[CalibrationSample] {
    &samples[samples.len().saturating_sub(ANALYSIS_WINDOW)..]
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TuningAdjustments {
    pub x_sensitivity_multiplier: f32,
    pub y_sensitivity_multiplier: f32,
    pub distance_scaling_multiplier: f32,
    pub x_offset_adjustment: f32,
    pub y_offset_adjustment: f32,
    pub damping_adjustment: f32,
    pub exponential_scaling: bool,
    pub logarithmic_scaling: bool,
    pub power_scaling: bool,
    pub quadratic_offset: bool,
}

impl Default for TuningAdjustments {
    fn default() -> Self {
        Self {
            x_sensitivity_multiplier: 1.0,
            y_sensitivity_multiplier: 1.0,
            distance_scaling_multiplier: 1.0,
            x_offset_adjustment: 0.0,
            y_offset_adjustment: 0.0,
            damping_adjustment: 0.0,
            exponential_scaling: false,
            logarithmic_scaling: false,
            power_scaling: false,
            quadratic_offset: false,
        }
    }
}

fn multiplier_band(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.3, 3.0)
    } else {
        1.0
    }
}

pub fn derive_adjustments(a: &ErrorAnalysis) -> TuningAdjustments {
    let x = if a.x_position_correlation > 0.3 {
        let base = 1.0 + (a.avg_error_x / 1000.0) * 0.1;
        if a.x_position_correlation > 0.7 {
            base * 1.2f32.powf(a.x_position_correlation)
        } else {
            base
        }
    } else {
        1.0
    };

    let y = if a.y_position_correlation > 0.3 {
        let base = 1.0 + (a.avg_error_y / 1000.0) * 0.1;
        if a.y_position_correlation > 0.5 {
            base * (1.0 + (a.y_position_correlation + 1.0).ln())
        } else {
            base
        }
    } else {
        1.0
    };

    let distance = if a.distance_correlation > 0.3 {
        (1.0 + a.distance_correlation * 0.2).powf(1.0 + a.distance_correlation * 0.5)
    } else {
        1.0
    };

    let damping = match a.avg_error_magnitude {
        m if m > 800.0 => 0.15,
        m if m > 500.0 => 0.10,
        m if m > 200.0 => 0.05,
        _ => 0.0,
    };

    TuningAdjustments {
        x_sensitivity_multiplier: multiplier_band(x),
        y_sensitivity_multiplier: multiplier_band(y),
        distance_scaling_multiplier: multiplier_band(distance),
        x_offset_adjustment: -a.avg_error_x * (0.3 + a.x_position_correlation * 0.2),
        y_offset_adjustment: -a.avg_error_y * (0.3 + a.y_position_correlation * 0.2),
        damping_adjustment: damping,
        exponential_scaling: a.x_position_correlation > 0.7,
        logarithmic_scaling: a.y_position_correlation > 0.5,
        power_scaling: a.distance_correlation > 0.6,
        quadratic_offset: a.avg_error_magnitude > 400.0,
    }
}

/// New tuning with the multipliers applied. Damping stays in [0.1, 0.9].
pub fn apply_adjustments(tuning: &PointerTuning, adj: &TuningAdjustments) -> PointerTuning {
    let mut t = tuning.clone();
    t.gaze_sensitivity_x *= adj.x_sensitivity_multiplier;
    t.gaze_sensitivity_y *= adj.y_sensitivity_multiplier;
    t.distance_scaling *= adj.distance_scaling_multiplier;
    t.damping_factor = (t.damping_factor + adj.damping_adjustment).clamp(0.1, 0.9);
    t.sanitized()
}

// =========================================================================
// Formula history
// =========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaSnapshot {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub base_parameters: BTreeMap<String, f32>,
    #[serde(default)]
    pub error_corrections: BTreeMap<String, f32>,
    #[serde(default)]
    pub calibration_stats: BTreeMap<String, f32>,
    #[serde(default)]
    pub tuning_adjustments: BTreeMap<String, f32>,
    #[serde(default)]
    pub performance: BTreeMap<String, f32>,
}

fn map<const N: usize>(entries: [(&str, f32); N]) -> BTreeMap<String, f32> {
    entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

impl FormulaSnapshot {
    /// Capture the parameter set in force right after a tuning step.
    /// `version` is assigned by [`FormulaHistory::push`].
    pub fn capture(
        tuning: &PointerTuning,
        coefficients: &CalibrationCoefficients,
        adjustments: &TuningAdjustments,
        analysis: &ErrorAnalysis,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            version: 0,
            timestamp,
            base_parameters: map([
                ("gaze_sensitivity_x", tuning.gaze_sensitivity_x),
                ("gaze_sensitivity_y", tuning.gaze_sensitivity_y),
                ("head_sensitivity", tuning.head_sensitivity),
                ("head_tilt_y_sensitivity", tuning.head_tilt_y_sensitivity),
                ("gyro_sensitivity", tuning.gyro_sensitivity),
                ("damping_factor", tuning.damping_factor),
                ("distance_scaling", tuning.distance_scaling),
            ]),
            error_corrections: map([
                ("x_error_correction", coefficients.x_error_correction),
                ("y_error_correction", coefficients.y_error_correction),
                ("x_offset_correction", coefficients.x_offset_correction),
                ("y_offset_correction", coefficients.y_offset_correction),
            ]),
            calibration_stats: map([
                ("click_count", coefficients.sample_count as f32),
                ("avg_error_magnitude", coefficients.mean_error_magnitude),
                ("avg_y_position_influence", coefficients.avg_y_position_influence),
                ("avg_distance_range", coefficients.avg_distance_range),
            ]),
            tuning_adjustments: map([
                ("x_sensitivity_multiplier", adjustments.x_sensitivity_multiplier),
                ("y_sensitivity_multiplier", adjustments.y_sensitivity_multiplier),
                ("distance_scaling_multiplier", adjustments.distance_scaling_multiplier),
                ("x_offset_adjustment", adjustments.x_offset_adjustment),
                ("y_offset_adjustment", adjustments.y_offset_adjustment),
                ("damping_adjustment", adjustments.damping_adjustment),
            ]),
            performance: map([
                ("error_reduction", analysis.error_reduction),
                ("distance_correlation", analysis.distance_correlation),
                ("y_position_correlation", analysis.y_position_correlation),
                ("x_position_correlation", analysis.x_position_correlation),
            ]),
        }
    }
}

/// Bounded, append-only list of snapshots; oldest evicted past `capacity`.
#[derive(Debug, Clone)]
pub struct FormulaHistory {
    capacity: usize,
    current_version: u32,
    snapshots: VecDeque<FormulaSnapshot>,
}

impl FormulaHistory {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), current_version: 0, snapshots: VecDeque::new() }
    }

    /// Append `snapshot` under the next version number and return that number.
    pub fn push(&mut self, mut snapshot: FormulaSnapshot) -> u32 {
        self.current_version += 1;
        snapshot.version = self.current_version;
        self.snapshots.push_back(snapshot);
        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
        self.current_version
    }

    pub fn latest(&self) -> Option<&FormulaSnapshot> {
        self.snapshots.back()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &FormulaSnapshot> {
        self.snapshots.iter()
    }

    fn read(path: &Path) -> Result<Vec<FormulaSnapshot>, PersistError> {
        let content = fs::read_to_string(path).map_err(|e| PersistError::io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Best-effort load; an unreadable file yields an empty history.
    pub fn load(path: &Path, capacity: usize) -> Self {
        let mut history = Self::new(capacity);
        match Self::read(path) {
            Ok(list) => {
                history.current_version = list.iter().map(|s| s.version).max().unwrap_or(0);
                let skip = list.len().saturating_sub(history.capacity);
                history.snapshots = list.into_iter().skip(skip).collect();
                debug!(path = %path.display(), entries = history.len(), "formula history loaded");
            }
            Err(e) => debug!(error = %e, "formula history unavailable"),
        }
        history
    }

    fn write(&self, path: &Path) -> Result<(), PersistError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| PersistError::io(dir, e))?;
        }
        let list: Vec<&FormulaSnapshot> = self.snapshots.iter().collect();
        fs::write(path, serde_json::to_string_pretty(&list)?).map_err(|e| PersistError::io(path, e))
    }

    pub fn save(&self, path: &Path) -> bool {
        match self.write(path) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to save formula history");
                false
            }
        }
    }

    /// Field-tagged export of the current formula plus its history.
    pub fn export_json(&self) -> Result<String, PersistError> {
        let doc = serde_json::json!({
            "format_version": EXPORT_FORMAT_VERSION,
            "current_version": self.current_version,
            "exported_at": Utc::now(),
            "latest": self.latest(),
            "history": self.snapshots,
        });
        Ok(serde_json::to_string_pretty(&doc)?)
    }
}

/// One auto-tune step over `samples`. Returns the retuned parameters and
/// the adjustments behind them, or `None` when the trigger is not met.
pub fn tune(
    samples: &[CalibrationSample],
    settings: &CalibrationSettings,
    tuning: &PointerTuning,
) -> Option<(PointerTuning, TuningAdjustments, ErrorAnalysis)> {
    if !should_tune(samples, settings) {
        return None;
    }
    let window = analysis_window(samples);
    if window.len() < settings.min_tuning_points {
        return None;
    }
    let analysis = analyze_error_patterns(window);
    let adjustments = derive_adjustments(&analysis);
    let retuned = apply_adjustments(tuning, &adjustments);
    info!(
        mean_error = analysis.avg_error_magnitude,
        x_mult = adjustments.x_sensitivity_multiplier,
        y_mult = adjustments.y_sensitivity_multiplier,
        damping = retuned.damping_factor,
        "auto-tune applied"
    );
    Some((retuned, adjustments, analysis))
}
