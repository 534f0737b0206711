//! Landmark detection seam and the background worker that feeds it.
//!
//! Frames go into a single-entry slot: a newer frame replaces any frame the
//! detection thread has not picked up yet. The detection thread runs one
//! inference at a time and hands results to a relay thread, which keeps the
//! counters and forwards results to the consumer.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::config::WorkerConfig;
use crate::error::DetectorError;
use crate::types::LandmarkFrame;

/// Anything that turns a camera frame into face landmarks.
pub trait LandmarkDetector: Send {
    fn name(&self) -> String;

    /// `Ok(None)` means no face in the frame.
    fn detect(&mut self, frame: &CameraFrame) -> Result<Option<LandmarkFrame>, DetectorError>;
}

/// A borrowed camera frame. The producer's release hook runs exactly once,
/// when the frame is dropped, whatever path dropped it.
pub struct CameraFrame {
    pub timestamp_ms: u64,
    pub width: u32,
    pub height: u32,
    pixels: Option<Vec<u8>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl CameraFrame {
    pub fn new(timestamp_ms: u64, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self { timestamp_ms, width, height, pixels: Some(pixels), release: None }
    }

    /// A frame whose pixel buffer could not be decoded.
    pub fn undecodable(timestamp_ms: u64, width: u32, height: u32) -> Self {
        Self { timestamp_ms, width, height, pixels: None, release: None }
    }

    pub fn on_release(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    pub fn pixels(&self) -> Option<&[u8]> {
        self.pixels.as_deref()
    }
}

impl Drop for CameraFrame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for CameraFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraFrame")
            .field("timestamp_ms", &self.timestamp_ms)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("decodable", &self.pixels.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum DetectionResult {
    Landmarks { frame: LandmarkFrame, inference_ms: f32 },
    Empty { timestamp_ms: u64 },
    Error { timestamp_ms: u64, error: DetectorError },
}

impl DetectionResult {
    pub fn timestamp_ms(&self) -> u64 {
        match self {
            Self::Landmarks { frame, .. } => frame.timestamp_ms,
            Self::Empty { timestamp_ms } | Self::Error { timestamp_ms, .. } => *timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Dropped by the adaptive frame skip.
    Skipped,
    /// Queued, replacing an older frame that was never processed.
    Replaced,
    Disconnected,
}

// =========================================================================
// Adaptive frame skip
// =========================================================================

/// Counts incoming frames, measures throughput once per second and decides
/// how many frames to drop between processed ones.
#[derive(Debug, Clone)]
pub struct FrameSkipper {
    enabled: bool,
    low_fps: u32,
    mid_fps: u32,
    window_start_ms: Option<u64>,
    frames_in_window: u32,
    fps: u32,
    skip: u32,
    counter: u64,
}

impl FrameSkipper {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            enabled: config.adaptive_skip,
            low_fps: config.low_fps,
            mid_fps: config.mid_fps,
            window_start_ms: None,
            frames_in_window: 0,
            fps: 0,
            skip: 0,
            counter: 0,
        }
    }

    pub fn tick(&mut self, now_ms: u64) {
        self.counter += 1;
        self.frames_in_window += 1;

        match self.window_start_ms {
            None => self.window_start_ms = Some(now_ms),
            Some(start) if now_ms.saturating_sub(start) >= 1000 => {
                self.fps = self.frames_in_window;
                self.frames_in_window = 0;
                self.window_start_ms = Some(now_ms);
                self.skip = if self.fps < self.low_fps {
                    0
                } else if self.fps < self.mid_fps {
                    1
                } else {
                    2
                };
                trace!(fps = self.fps, skip = self.skip, "frame rate window");
            }
            Some(_) => {}
        }
    }

    /// Whether the frame counted by the last `tick` should be processed.
    pub fn should_process(&self) -> bool {
        if !self.enabled || self.skip == 0 {
            return true;
        }
        self.counter.saturating_sub(1) % (self.skip as u64 + 1) == 0
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn skip(&self) -> u32 {
        if self.enabled { self.skip } else { 0 }
    }
}

// =========================================================================
// Metrics
// =========================================================================

#[derive(Debug, Default)]
struct WorkerMetrics {
    submitted: AtomicU64,
    skipped: AtomicU64,
    replaced: AtomicU64,
    processed: AtomicU64,
    empty: AtomicU64,
    errors: AtomicU64,
    last_inference_us: AtomicU64,
    fps: AtomicU32,
    skip: AtomicU32,
}

impl WorkerMetrics {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_inference_ms: self.last_inference_us.load(Ordering::Relaxed) as f32 / 1000.0,
            fps: self.fps.load(Ordering::Relaxed),
            skip: self.skip.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerStats {
    pub submitted: u64,
    pub skipped: u64,
    pub replaced: u64,
    pub processed: u64,
    pub empty: u64,
    pub errors: u64,
    pub last_inference_ms: f32,
    pub fps: u32,
    pub skip: u32,
}

// =========================================================================
// Latest-frame slot
// =========================================================================

#[derive(Default)]
struct SlotState {
    pending: Option<CameraFrame>,
    closed: bool,
}

#[derive(Default)]
struct FrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl FrameSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `frame`, handing back the one it displaced. `Err` returns the
    /// frame when the slot is closed.
    fn put(&self, frame: CameraFrame) -> Result<Option<CameraFrame>, CameraFrame> {
        let mut state = self.lock();
        if state.closed {
            return Err(frame);
        }
        let older = state.pending.replace(frame);
        drop(state);
        self.ready.notify_one();
        Ok(older)
    }

    /// Block until a frame is available. `None` once closed; pending frames
    /// left behind at close are released.
    fn take(&self) -> Option<CameraFrame> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(frame) = state.pending.take() {
                return Some(frame);
            }
            state = self.ready.wait(state).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn close(&self) -> Option<CameraFrame> {
        let mut state = self.lock();
        state.closed = true;
        let leftover = state.pending.take();
        drop(state);
        self.ready.notify_all();
        leftover
    }
}

// =========================================================================
// Worker
// =========================================================================

pub struct DetectionWorker {
    slot: Arc<FrameSlot>,
    results: Receiver<DetectionResult>,
    metrics: Arc<WorkerMetrics>,
    skipper: FrameSkipper,
    detect_handle: Option<JoinHandle<()>>,
    relay_handle: Option<JoinHandle<()>>,
}

impl DetectionWorker {
    pub fn spawn<D>(mut detector: D, config: WorkerConfig) -> Self
    where
        D: LandmarkDetector + 'static,
    {
        let slot = Arc::new(FrameSlot::default());
        let metrics = Arc::new(WorkerMetrics::default());
        let (tx_raw, rx_raw) = mpsc::channel::<(DetectionResult, Duration)>();
        let (tx_result, rx_result) = mpsc::channel::<DetectionResult>();

        info!(detector = %detector.name(), "detection worker started");

        let detect_slot = Arc::clone(&slot);
        let detect_config = config.clone();
        let detect_handle = thread::spawn(move || {
            while let Some(frame) = detect_slot.take() {
                let started = Instant::now();
                let result = handle_frame(&mut detector, frame, &detect_config);
                if tx_raw.send((result, started.elapsed())).is_err() {
                    break;
                }
            }
            debug!("detection thread exiting");
        });

        let relay_metrics = Arc::clone(&metrics);
        let relay_handle = thread::spawn(move || {
            relay_results(rx_raw, tx_result, &relay_metrics);
            debug!("result thread exiting");
        });

        Self {
            slot,
            results: rx_result,
            metrics,
            skipper: FrameSkipper::new(&config),
            detect_handle: Some(detect_handle),
            relay_handle: Some(relay_handle),
        }
    }

    /// Hand a frame to the worker. Never blocks on inference.
    pub fn submit(&mut self, frame: CameraFrame) -> SubmitOutcome {
        self.skipper.tick(frame.timestamp_ms);
        self.metrics.fps.store(self.skipper.fps(), Ordering::Relaxed);
        self.metrics.skip.store(self.skipper.skip(), Ordering::Relaxed);

        if !self.skipper.should_process() {
            self.metrics.skipped.fetch_add(1, Ordering::Relaxed);
            trace!(ts = frame.timestamp_ms, "frame skipped");
            return SubmitOutcome::Skipped;
        }

        match self.slot.put(frame) {
            Ok(None) => {
                self.metrics.submitted.fetch_add(1, Ordering::Relaxed);
                SubmitOutcome::Queued
            }
            Ok(Some(older)) => {
                self.metrics.submitted.fetch_add(1, Ordering::Relaxed);
                self.metrics.replaced.fetch_add(1, Ordering::Relaxed);
                trace!(ts = older.timestamp_ms, "unprocessed frame replaced");
                SubmitOutcome::Replaced
            }
            Err(_frame) => SubmitOutcome::Disconnected,
        }
    }

    /// Drain everything delivered so far and keep only the newest result.
    pub fn try_recv_latest(&self) -> Option<DetectionResult> {
        let mut latest = None;
        while let Ok(result) = self.results.try_recv() {
            latest = Some(result);
        }
        latest
    }

    /// Next result in delivery order, waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<DetectionResult, DetectorError> {
        match self.results.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => Err(DetectorError::Inference {
                message: format!("no result within {} ms", timeout.as_millis()),
                code: None,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(DetectorError::Disconnected),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.metrics.snapshot()
    }

    /// Stop both threads and wait for them. Results already delivered stay
    /// readable until the worker is dropped.
    pub fn shutdown(mut self) -> WorkerStats {
        self.stop();
        self.metrics.snapshot()
    }

    fn stop(&mut self) {
        if let Some(leftover) = self.slot.close() {
            trace!(ts = leftover.timestamp_ms, "pending frame released at shutdown");
        }
        for handle in [self.detect_handle.take(), self.relay_handle.take()].into_iter().flatten() {
            if handle.join().is_err() {
                warn!("detection worker thread panicked");
            }
        }
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Validate and run one frame. Consumes the frame so its release hook runs
/// before the result leaves this function.
fn handle_frame<D: LandmarkDetector + ?Sized>(
    detector: &mut D,
    frame: CameraFrame,
    config: &WorkerConfig,
) -> DetectionResult {
    let timestamp_ms = frame.timestamp_ms;

    if frame.pixels().is_none() {
        return DetectionResult::Error { timestamp_ms, error: DetectorError::Undecodable };
    }
    if frame.width < config.min_frame_width || frame.height < config.min_frame_height {
        return DetectionResult::Error {
            timestamp_ms,
            error: DetectorError::TooSmall { width: frame.width, height: frame.height },
        };
    }

    match detector.detect(&frame) {
        Ok(Some(landmarks)) => DetectionResult::Landmarks { frame: landmarks, inference_ms: 0.0 },
        Ok(None) => DetectionResult::Empty { timestamp_ms },
        Err(error) => DetectionResult::Error { timestamp_ms, error },
    }
}

fn relay_results(
    rx: Receiver<(DetectionResult, Duration)>,
    tx: Sender<DetectionResult>,
    metrics: &WorkerMetrics,
) {
    for (mut result, elapsed) in rx {
        metrics.processed.fetch_add(1, Ordering::Relaxed);
        metrics
            .last_inference_us
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);

        match &mut result {
            DetectionResult::Landmarks { inference_ms, .. } => {
                *inference_ms = elapsed.as_secs_f32() * 1000.0;
            }
            DetectionResult::Empty { .. } => {
                metrics.empty.fetch_add(1, Ordering::Relaxed);
            }
            DetectionResult::Error { error, .. } => {
                metrics.errors.fetch_add(1, Ordering::Relaxed);
                debug!(%error, "detection failed");
            }
        }

        // Consumer may have stopped listening; keep draining so the
        // detection thread never blocks on us.
        let _ = tx.send(result);
    }
}
