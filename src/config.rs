use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::logging::LogConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tuning: PointerTuning,
    pub blink: BlinkConfig,
    pub calibration: CalibrationSettings,
    pub worker: WorkerConfig,
    pub logging: LogConfig,
}

/// Positional correction applied to an eye's socket points before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeOffset {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for EyeOffset {
    fn default() -> Self {
        Self { x: 0.0, y: -17.0, z: 0.0 }
    }
}

impl EyeOffset {
    pub const ZERO: EyeOffset = EyeOffset { x: 0.0, y: 0.0, z: 0.0 };
}

/// Every tunable the composer reads. Immutable per frame: the controller
/// swaps in a new copy when calibration or tuning changes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointerTuning {
    pub gaze_sensitivity_x: f32,
    pub gaze_sensitivity_y: f32,
    pub head_sensitivity: f32,
    pub head_tilt_y_sensitivity: f32,
    pub gyro_sensitivity: f32,
    pub damping_factor: f32,
    pub distance_scaling: f32,

    pub gaze_extension: f32,
    pub curvature_enabled: bool,
    pub curvature_downward: f32,
    pub curvature_strength: f32,

    pub left_eye_offset: EyeOffset,
    pub right_eye_offset: EyeOffset,
    pub sphere_center_y_bias: f32,
    pub face_weight_y_offset: f32,

    pub y_bias_magnitude: f32,
    pub static_offset_x: f32,
    pub static_offset_y: f32,
    /// Extra horizontal scale when projecting detector pixels onto the viewport.
    pub horizontal_stretch: f32,

    pub base_adaptive_sensitivity: f32,
    /// Gaze tip speed (px/frame) boundaries between drift, normal, deliberate, rapid.
    pub velocity_thresholds: [f32; 3],
    pub velocity_factors: [f32; 4],

    pub min_sphere_size: f32,
    pub max_sphere_size: f32,
    pub eye_min_y_ratio: f32,
    pub eye_max_y_ratio: f32,
}

impl Default for PointerTuning {
    fn default() -> Self {
        Self {
            gaze_sensitivity_x: 2.5,
            gaze_sensitivity_y: 8.0,
            head_sensitivity: 0.6,
            head_tilt_y_sensitivity: 2.5,
            gyro_sensitivity: 200.0,
            damping_factor: 0.7,
            distance_scaling: 1.0,
            gaze_extension: 2.0,
            curvature_enabled: true,
            curvature_downward: 0.3,
            curvature_strength: 0.5,
            left_eye_offset: EyeOffset::default(),
            right_eye_offset: EyeOffset::default(),
            sphere_center_y_bias: 6.0,
            face_weight_y_offset: 70.0,
            y_bias_magnitude: 120.0,
            static_offset_x: 0.0,
            static_offset_y: 0.0,
            horizontal_stretch: 1.0,
            base_adaptive_sensitivity: 0.8,
            velocity_thresholds: [2.0, 8.0, 15.0],
            velocity_factors: [0.5, 0.8, 1.2, 1.5],
            min_sphere_size: 15.0,
            max_sphere_size: 45.0,
            eye_min_y_ratio: 0.05,
            eye_max_y_ratio: 0.95,
        }
    }
}

fn band(v: f32, lo: f32, hi: f32, fallback: f32) -> f32 {
    if v.is_finite() {
        v.clamp(lo, hi)
    } else {
        fallback
    }
}

impl PointerTuning {
    /// Copy with every multiplicative field forced into its safe band.
    /// Derived values pass through here so repeated adaptive adjustment
    /// cannot diverge.
    pub fn sanitized(&self) -> Self {
        let d = Self::default();
        let mut t = self.clone();
        t.gaze_sensitivity_x = band(t.gaze_sensitivity_x, 0.01, 100.0, d.gaze_sensitivity_x);
        t.gaze_sensitivity_y = band(t.gaze_sensitivity_y, 0.01, 100.0, d.gaze_sensitivity_y);
        t.head_sensitivity = band(t.head_sensitivity, 0.0, 20.0, d.head_sensitivity);
        t.head_tilt_y_sensitivity = band(t.head_tilt_y_sensitivity, 0.0, 20.0, d.head_tilt_y_sensitivity);
        t.gyro_sensitivity = band(t.gyro_sensitivity, 0.0, 1000.0, d.gyro_sensitivity);
        t.damping_factor = band(t.damping_factor, 0.01, 0.99, d.damping_factor);
        t.distance_scaling = band(t.distance_scaling, 0.1, 10.0, d.distance_scaling);
        t.gaze_extension = band(t.gaze_extension, 0.0, 10.0, d.gaze_extension);
        t.curvature_downward = band(t.curvature_downward, 0.0, 2.0, d.curvature_downward);
        t.curvature_strength = band(t.curvature_strength, 0.0, 2.0, d.curvature_strength);
        t.y_bias_magnitude = band(t.y_bias_magnitude, 0.0, 1000.0, d.y_bias_magnitude);
        t.horizontal_stretch = band(t.horizontal_stretch, 0.1, 4.0, d.horizontal_stretch);
        t.base_adaptive_sensitivity = band(t.base_adaptive_sensitivity, 0.05, 5.0, d.base_adaptive_sensitivity);
        for f in t.velocity_factors.iter_mut() {
            *f = band(*f, 0.05, 5.0, 1.0);
        }
        t.min_sphere_size = band(t.min_sphere_size, 0.0, 1000.0, d.min_sphere_size);
        t.max_sphere_size = band(t.max_sphere_size, t.min_sphere_size, 2000.0, d.max_sphere_size.max(t.min_sphere_size));
        t.eye_min_y_ratio = band(t.eye_min_y_ratio, 0.0, 0.8, d.eye_min_y_ratio);
        t.eye_max_y_ratio = band(t.eye_max_y_ratio, 0.2, 1.0, d.eye_max_y_ratio);
        if t.eye_max_y_ratio <= t.eye_min_y_ratio {
            t.eye_min_y_ratio = d.eye_min_y_ratio;
            t.eye_max_y_ratio = d.eye_max_y_ratio;
        }
        t
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    pub half_threshold: f32,
    pub full_threshold: f32,
    pub click_min_ms: u64,
    pub click_max_ms: u64,
    pub history_window_ms: u64,
    pub baseline_refresh_ms: u64,
    /// Baselines below this height (px) are rejected as "already closing".
    pub baseline_floor: f32,
    pub marker_duration_ms: u64,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            half_threshold: 0.60,
            full_threshold: 0.85,
            click_min_ms: 150,
            click_max_ms: 800,
            history_window_ms: 1000,
            baseline_refresh_ms: 1000,
            baseline_floor: 5.0,
            marker_duration_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    pub data_dir: PathBuf,
    pub refit_interval: usize,
    pub max_samples: usize,
    pub correction_damping: f32,
    pub correction_min: f32,
    pub correction_max: f32,
    pub offset_gain: f32,
    pub auto_tune: bool,
    pub error_threshold: f32,
    pub min_tuning_points: usize,
    pub high_error_trigger: usize,
    pub history_capacity: usize,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("calibration_data"),
            refit_interval: 20,
            max_samples: 1000,
            correction_damping: 0.5,
            correction_min: 0.5,
            correction_max: 1.5,
            offset_gain: 0.3,
            auto_tune: false,
            error_threshold: 20.0,
            min_tuning_points: 10,
            high_error_trigger: 5,
            history_capacity: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub min_frame_width: u32,
    pub min_frame_height: u32,
    pub adaptive_skip: bool,
    pub low_fps: u32,
    pub mid_fps: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            min_frame_width: 64,
            min_frame_height: 64,
            adaptive_skip: true,
            low_fps: 20,
            mid_fps: 30,
        }
    }
}

impl AppConfig {
    pub const PATH: &'static str = "config.json";

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            // Missing fields fall back to Default through #[serde(default)]
            match serde_json::from_str::<AppConfig>(&content) {
                Ok(c) => {
                    info!(path = %path.display(), "loaded configuration");
                    c
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "config parse failed, using defaults");
                    Self::default()
                }
            }
        } else {
            info!(path = %path.display(), "configuration not found, creating defaults");
            Self::default()
        };

        // Write back so new fields show up in the file
        config.save(path)?;

        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}
