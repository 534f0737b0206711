use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use pupil_pointer::config::WorkerConfig;
use pupil_pointer::detector::{CameraFrame, DetectionResult, DetectionWorker, LandmarkDetector, SubmitOutcome};
use pupil_pointer::error::DetectorError;
use pupil_pointer::simulation::SimulatedDetector;
use pupil_pointer::types::{LandmarkFrame, Point2};

const WAIT: Duration = Duration::from_secs(5);

/// Blocks in `detect` until the test opens the gate once per frame.
struct Gated {
    started: Sender<u64>,
    gate: Receiver<()>,
}

impl LandmarkDetector for Gated {
    fn name(&self) -> String {
        "gated".into()
    }

    fn detect(&mut self, frame: &CameraFrame) -> Result<Option<LandmarkFrame>, DetectorError> {
        let _ = self.started.send(frame.timestamp_ms);
        if self.gate.recv().is_err() {
            return Err(DetectorError::Disconnected);
        }
        Ok(Some(LandmarkFrame::new(frame.timestamp_ms, frame.width, frame.height, vec![Point2::ORIGIN])))
    }
}

fn no_skip() -> WorkerConfig {
    WorkerConfig { adaptive_skip: false, ..WorkerConfig::default() }
}

fn tracked(ts: u64, width: u32, height: u32, released: &Arc<AtomicUsize>) -> CameraFrame {
    let counter = Arc::clone(released);
    CameraFrame::new(ts, width, height, vec![0; 8]).on_release(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn busy_detector_only_sees_the_newest_frame() {
    let (started_tx, started_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel();
    let released = Arc::new(AtomicUsize::new(0));
    let mut worker = DetectionWorker::spawn(Gated { started: started_tx, gate: gate_rx }, no_skip());

    assert_eq!(worker.submit(tracked(1, 640, 480, &released)), SubmitOutcome::Queued);
    assert_eq!(started_rx.recv_timeout(WAIT).unwrap(), 1);

    // Detector is busy with frame 1; these pile up in the single slot
    assert_eq!(worker.submit(tracked(2, 640, 480, &released)), SubmitOutcome::Queued);
    assert_eq!(worker.submit(tracked(3, 640, 480, &released)), SubmitOutcome::Replaced);
    assert_eq!(worker.submit(tracked(4, 640, 480, &released)), SubmitOutcome::Replaced);
    assert_eq!(released.load(Ordering::SeqCst), 2);

    gate_tx.send(()).unwrap();
    assert_eq!(worker.recv_timeout(WAIT).unwrap().timestamp_ms(), 1);
    assert_eq!(started_rx.recv_timeout(WAIT).unwrap(), 4);
    gate_tx.send(()).unwrap();
    assert_eq!(worker.recv_timeout(WAIT).unwrap().timestamp_ms(), 4);

    drop(gate_tx);
    let stats = worker.shutdown();
    assert_eq!(stats.replaced, 2);
    assert_eq!(stats.processed, 2);
    assert_eq!(released.load(Ordering::SeqCst), 4);
}

#[test]
fn rejected_frames_are_released_and_reported() {
    let released = Arc::new(AtomicUsize::new(0));
    let mut worker = DetectionWorker::spawn(SimulatedDetector::new(), no_skip());

    let counter = Arc::clone(&released);
    let broken = CameraFrame::undecodable(1, 640, 480).on_release(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    worker.submit(broken);
    let first = worker.recv_timeout(WAIT).unwrap();
    assert!(matches!(first, DetectionResult::Error { error: DetectorError::Undecodable, .. }));

    worker.submit(tracked(2, 32, 32, &released));
    let second = worker.recv_timeout(WAIT).unwrap();
    assert!(matches!(second, DetectionResult::Error { error: DetectorError::TooSmall { .. }, .. }));

    worker.submit(tracked(3, 640, 480, &released));
    match worker.recv_timeout(WAIT).unwrap() {
        DetectionResult::Landmarks { frame, inference_ms } => {
            assert_eq!(frame.timestamp_ms, 3);
            assert!(frame.points.len() >= 478);
            assert!(inference_ms >= 0.0);
        }
        other => panic!("unexpected {other:?}"),
    }

    let stats = worker.shutdown();
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.processed, 3);
    assert_eq!(released.load(Ordering::SeqCst), 3);
}

#[test]
fn pending_frame_is_released_at_shutdown() {
    let (started_tx, started_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let released = Arc::new(AtomicUsize::new(0));
    let mut worker = DetectionWorker::spawn(Gated { started: started_tx, gate: gate_rx }, no_skip());

    worker.submit(tracked(1, 640, 480, &released));
    started_rx.recv_timeout(WAIT).unwrap();
    worker.submit(tracked(2, 640, 480, &released));

    drop(gate_tx);
    worker.shutdown();
    assert_eq!(released.load(Ordering::SeqCst), 2);
}

#[test]
fn latest_result_wins_when_draining() {
    let mut worker = DetectionWorker::spawn(SimulatedDetector::new(), no_skip());
    for ts in [10, 20, 30] {
        worker.submit(CameraFrame::new(ts, 640, 480, vec![0; 8]));
        // Wait for each so none is replaced
        while worker.stats().processed < ts / 10 {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
    std::thread::sleep(Duration::from_millis(20));
    let latest = worker.try_recv_latest().unwrap();
    assert_eq!(latest.timestamp_ms(), 30);
    assert!(worker.try_recv_latest().is_none());
}
