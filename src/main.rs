use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing::info;

use pupil_pointer::args::Args;
use pupil_pointer::config::AppConfig;
use pupil_pointer::detector::{CameraFrame, DetectionWorker, SubmitOutcome};
use pupil_pointer::logging::init_tracing;
use pupil_pointer::pipeline::{FrameOutcome, PointerController, PointerListener};
use pupil_pointer::recording::{read_frames, read_taps, TapRecord};
use pupil_pointer::simulation::SimulatedDetector;

const SIM_WIDTH: u32 = 640;
const SIM_HEIGHT: u32 = 480;
const SIM_FRAME_MS: u64 = 33;

/// Prints events to the terminal; pointer lines are thinned out.
#[derive(Default)]
struct ConsoleListener {
    updates: u64,
    clicks: u64,
    empty: u64,
    errors: u64,
}

impl PointerListener for ConsoleListener {
    fn on_pointer_updated(&mut self, x: f32, y: f32) {
        self.updates += 1;
        if self.updates % 30 == 1 {
            println!("{} ({x:7.1}, {y:7.1})", "pointer".cyan());
        }
    }

    fn on_click(&mut self, x: f32, y: f32, timestamp_ms: u64) {
        self.clicks += 1;
        println!("{} ({x:7.1}, {y:7.1}) at {timestamp_ms} ms", "CLICK".green().bold());
    }

    fn on_empty(&mut self) {
        self.empty += 1;
    }

    fn on_error(&mut self, message: &str, code: Option<i32>) {
        self.errors += 1;
        match code {
            Some(c) => println!("{} {message} (code {c})", "error".red()),
            None => println!("{} {message}", "error".red()),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 0. Load config
    let config = AppConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    init_tracing(&config.logging);

    let taps = match &args.taps {
        Some(path) => read_taps(path)?,
        None => Vec::new(),
    };

    // 1. Controller
    let mut controller = PointerController::new(&config, args.viewport, ConsoleListener::default());
    if args.reset {
        controller.reset_calibration();
    }
    if args.calibrate {
        controller.start_calibration();
        println!("{}", controller.calibration_status().yellow());
    }

    // 2. Drive it
    if let Some(path) = &args.replay {
        let frames = read_frames(path).with_context(|| format!("reading replay {}", path.display()))?;
        info!(frames = frames.len(), "replaying recording");
        replay(&mut controller, &frames, &taps);
    } else {
        simulate(&mut controller, &config, args.simulate.unwrap_or(300), &taps);
    }

    if controller.is_calibration_active() {
        controller.stop_calibration();
    }

    // 3. Summary
    let listener = controller.listener();
    println!("{}", "-".repeat(60));
    println!(
        "updates {}  clicks {}  no-face {}  errors {}",
        listener.updates, listener.clicks, listener.empty, listener.errors
    );
    if let Some(p) = controller.pointer() {
        println!("final pointer ({:.1}, {:.1})", p.x, p.y);
    }
    println!("{}", controller.calibration_status().yellow());
    let c = controller.coefficients();
    if c.is_calibrated {
        println!(
            "correction x {:.3} y {:.3}  mean error {:.1}px",
            c.x_error_correction, c.y_error_correction, c.mean_error_magnitude
        );
    }
    Ok(())
}

/// Feed taps whose timestamp has been reached.
fn inject_taps<L: PointerListener>(
    controller: &mut PointerController<L>,
    taps: &mut std::iter::Peekable<std::slice::Iter<'_, TapRecord>>,
    now_ms: u64,
) {
    while let Some(tap) = taps.next_if(|t| t.timestamp_ms <= now_ms) {
        if let Some(out) = controller.record_tap(tap.x, tap.y, tap.timestamp_ms) {
            let line = format!(
                "tap ({:.0}, {:.0}) error {:.1}px{}",
                tap.x,
                tap.y,
                out.sample.error_magnitude,
                if out.refitted { " [refit]" } else { "" }
            );
            println!("{}", line.magenta());
        }
    }
}

fn replay<L: PointerListener>(
    controller: &mut PointerController<L>,
    frames: &[pupil_pointer::types::LandmarkFrame],
    taps: &[TapRecord],
) {
    let mut taps = taps.iter().peekable();
    let mut stale = 0;
    for frame in frames {
        if controller.process_frame(frame) == FrameOutcome::Stale {
            stale += 1;
        }
        inject_taps(controller, &mut taps, frame.timestamp_ms);
    }
    if stale > 0 {
        println!("{} {stale} stale frames discarded", "note".yellow());
    }
}

fn simulate<L: PointerListener>(
    controller: &mut PointerController<L>,
    config: &AppConfig,
    frames: u32,
    taps: &[TapRecord],
) {
    let mut worker = DetectionWorker::spawn(SimulatedDetector::new(), config.worker.clone());
    let released = Arc::new(AtomicUsize::new(0));

    // Sensor thread: slight hand tremor
    let gyro = controller.gyro();
    let running = Arc::new(AtomicBool::new(true));
    let sensor_running = Arc::clone(&running);
    let sensor = thread::spawn(move || {
        let mut ts = 1u64;
        while sensor_running.load(Ordering::Relaxed) {
            let wobble = ((ts as f32) * 0.01).sin() * 0.05;
            gyro.record_sample(wobble, -wobble, ts);
            ts += 10;
            thread::sleep(Duration::from_millis(10));
        }
    });

    let mut taps = taps.iter().peekable();
    let mut replaced = 0;
    for i in 0..frames as u64 {
        let ts = i * SIM_FRAME_MS;
        let counter = Arc::clone(&released);
        let frame = CameraFrame::new(ts, SIM_WIDTH, SIM_HEIGHT, vec![0; 16]).on_release(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        if worker.submit(frame) == SubmitOutcome::Replaced {
            replaced += 1;
        }

        thread::sleep(Duration::from_millis(SIM_FRAME_MS / 3));
        if let Some(result) = worker.try_recv_latest() {
            controller.handle_result(result);
        }
        inject_taps(controller, &mut taps, ts);
    }

    if let Ok(result) = worker.recv_timeout(Duration::from_millis(200)) {
        controller.handle_result(result);
    }

    running.store(false, Ordering::Relaxed);
    let _ = sensor.join();

    let stats = worker.shutdown();
    println!(
        "worker: submitted {} skipped {} replaced {} processed {} ({} released), last inference {:.2} ms, {} fps, skip {}",
        stats.submitted,
        stats.skipped,
        replaced,
        stats.processed,
        released.load(Ordering::Relaxed),
        stats.last_inference_ms,
        stats.fps,
        stats.skip
    );
}
