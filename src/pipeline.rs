//! Render-path controller: landmarks in, pointer and click callbacks out.
//!
//! Everything here runs on one thread. The only cross-thread input is the
//! gyro handoff, which is read once per frame.

use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info, trace};

use crate::blink::{BlinkClickStateMachine, BlinkState};
use crate::calibration::{CalibrationCoefficients, CalibrationEngine, RecordOutcome};
use crate::config::{AppConfig, PointerTuning};
use crate::detector::DetectionResult;
use crate::gaze::{Composition, GazeComposer};
use crate::geometry;
use crate::gyro::GyroHandoff;
use crate::motion::MotionFilter;
use crate::tuning::{self, FormulaHistory, FormulaSnapshot, FORMULA_HISTORY_FILE};
use crate::types::{ClickEvent, LandmarkFrame, Point2, Viewport};

/// Receiver of the controller's output.
pub trait PointerListener {
    fn on_pointer_updated(&mut self, x: f32, y: f32);

    fn on_click(&mut self, x: f32, y: f32, timestamp_ms: u64);

    fn on_empty(&mut self) {}

    fn on_error(&mut self, message: &str, code: Option<i32>) {
        let _ = (message, code);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    Updated { pointer: Point2, click: Option<ClickEvent> },
    /// No usable eye geometry; the pointer stays where it was.
    NoGaze { pointer: Option<Point2> },
    /// Older than the last rendered frame; discarded.
    Stale,
}

pub struct PointerController<L: PointerListener> {
    listener: L,
    viewport: Viewport,
    base_tuning: PointerTuning,
    tuning: PointerTuning,
    composer: GazeComposer,
    motion: MotionFilter,
    blink: BlinkClickStateMachine,
    calibration: CalibrationEngine,
    gyro: GyroHandoff,
    history: FormulaHistory,
    last_rendered_ms: Option<u64>,
    last_composition: Option<Composition>,
}

impl<L: PointerListener> PointerController<L> {
    /// Build a controller and pick up any persisted calibration and
    /// formula history from the configured data directory.
    pub fn new(config: &AppConfig, viewport: Viewport, listener: L) -> Self {
        let base_tuning = config.tuning.sanitized();
        let mut calibration = CalibrationEngine::new(config.calibration.clone());
        calibration.restore();

        let history_path = config.calibration.data_dir.join(FORMULA_HISTORY_FILE);
        let history = FormulaHistory::load(&history_path, config.calibration.history_capacity);

        let tuning = calibration.coefficients().apply_ranges(&base_tuning, viewport);
        info!(
            width = viewport.width,
            height = viewport.height,
            status = %calibration.status(),
            formula_version = history.current_version(),
            "pointer controller ready"
        );

        Self {
            listener,
            viewport,
            base_tuning,
            tuning,
            composer: GazeComposer::new(),
            motion: MotionFilter::new(),
            blink: BlinkClickStateMachine::new(config.blink.clone()),
            calibration,
            gyro: GyroHandoff::default(),
            history,
            last_rendered_ms: None,
            last_composition: None,
        }
    }

    /// Route one worker result to the frame path or the listener.
    pub fn handle_result(&mut self, result: DetectionResult) -> Option<FrameOutcome> {
        match result {
            DetectionResult::Landmarks { frame, inference_ms } => {
                trace!(ts = frame.timestamp_ms, inference_ms, "landmarks");
                Some(self.process_frame(&frame))
            }
            DetectionResult::Empty { timestamp_ms } => {
                trace!(ts = timestamp_ms, "no face");
                self.last_composition = None;
                self.listener.on_empty();
                None
            }
            DetectionResult::Error { timestamp_ms, error } => {
                debug!(ts = timestamp_ms, %error, "detection error");
                self.listener.on_error(&error.to_string(), error.code());
                None
            }
        }
    }

    pub fn process_frame(&mut self, frame: &LandmarkFrame) -> FrameOutcome {
        if let Some(last) = self.last_rendered_ms {
            if frame.timestamp_ms < last {
                trace!(ts = frame.timestamp_ms, last, "stale frame dropped");
                return FrameOutcome::Stale;
            }
        }

        let projected = geometry::project_to_viewport(frame, self.viewport, self.tuning.horizontal_stretch);
        let features = geometry::extract(&projected, &self.tuning);

        let composition = self.composer.compose(
            &features,
            self.viewport,
            self.gyro.snapshot(),
            self.calibration.coefficients(),
            &self.tuning,
        );
        let Some(composition) = composition else {
            self.last_composition = None;
            return FrameOutcome::NoGaze { pointer: self.motion.last_position() };
        };

        let pointer = self.motion.apply(composition.target, self.tuning.damping_factor, self.viewport);
        self.last_rendered_ms = Some(frame.timestamp_ms);
        self.listener.on_pointer_updated(pointer.x, pointer.y);

        let click = self.blink.observe(
            features.left_eye_height,
            features.right_eye_height,
            frame.timestamp_ms,
            pointer,
        );
        if let Some(c) = click {
            self.listener.on_click(c.x, c.y, c.timestamp_ms);
        }

        self.last_composition = Some(composition);
        FrameOutcome::Updated { pointer, click }
    }

    // =========================================================================
    // Calibration surface
    // =========================================================================

    pub fn start_calibration(&mut self) {
        self.calibration.start();
        self.tuning = self.calibration.coefficients().apply_ranges(&self.tuning, self.viewport);
    }

    pub fn stop_calibration(&mut self) {
        self.calibration.stop();
    }

    /// Forget the fit and return to the configured tuning.
    pub fn reset_calibration(&mut self) {
        self.calibration.reset();
        self.tuning = self.base_tuning.clone();
    }

    /// Record a calibration tap against the current pointer. Needs an
    /// active session and a face in the most recent result.
    pub fn record_tap(&mut self, x: f32, y: f32, timestamp_ms: u64) -> Option<RecordOutcome> {
        let features = self.last_composition.as_ref()?.sample_features();
        let outcome = self.calibration.record_sample(
            Point2::new(x, y),
            self.motion.last_position(),
            features,
            self.viewport,
            timestamp_ms,
        )?;

        if outcome.refitted {
            self.tuning = self.calibration.coefficients().apply_ranges(&self.tuning, self.viewport);
        }
        if self.calibration.settings().auto_tune {
            self.auto_tune();
        }
        Some(outcome)
    }

    fn auto_tune(&mut self) {
        let Some((retuned, adjustments, analysis)) =
            tuning::tune(self.calibration.samples(), self.calibration.settings(), &self.tuning)
        else {
            return;
        };

        self.tuning = retuned;
        self.calibration
            .adjust_offsets(adjustments.x_offset_adjustment, adjustments.y_offset_adjustment);

        let snapshot = FormulaSnapshot::capture(
            &self.tuning,
            self.calibration.coefficients(),
            &adjustments,
            &analysis,
            Utc::now(),
        );
        let version = self.history.push(snapshot);
        self.history.save(&self.history_path());
        info!(version, "formula snapshot recorded");
    }

    fn history_path(&self) -> PathBuf {
        self.calibration.settings().data_dir.join(FORMULA_HISTORY_FILE)
    }

    pub fn calibration_status(&self) -> String {
        self.calibration.status()
    }

    pub fn is_calibration_active(&self) -> bool {
        self.calibration.is_active()
    }

    pub fn coefficients(&self) -> &CalibrationCoefficients {
        self.calibration.coefficients()
    }

    pub fn history(&self) -> &FormulaHistory {
        &self.history
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Handle for the sensor thread.
    pub fn gyro(&self) -> GyroHandoff {
        self.gyro.clone()
    }

    pub fn tuning(&self) -> &PointerTuning {
        &self.tuning
    }

    pub fn pointer(&self) -> Option<Point2> {
        self.motion.last_position()
    }

    pub fn last_composition(&self) -> Option<&Composition> {
        self.last_composition.as_ref()
    }

    pub fn blink_state(&self) -> BlinkState {
        self.blink.state()
    }

    /// Click acknowledgement marker, while still visible.
    pub fn marker(&self, now_ms: u64) -> Option<Point2> {
        self.blink.marker(now_ms)
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }
}
