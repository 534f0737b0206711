use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use pupil_pointer::calibration::CalibrationEngine;
use pupil_pointer::config::CalibrationSettings;
use pupil_pointer::tuning::{FormulaHistory, FORMULA_HISTORY_FILE};

/// Report on a calibration data directory.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding calibration_data.json and formula_history.json
    #[arg(default_value = "calibration_data")]
    data_dir: PathBuf,

    /// Print the formula history as JSON instead of a table
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = CalibrationSettings { data_dir: cli.data_dir.clone(), ..CalibrationSettings::default() };

    let history = FormulaHistory::load(&cli.data_dir.join(FORMULA_HISTORY_FILE), settings.history_capacity);
    if cli.json {
        println!("{}", history.export_json()?);
        return Ok(());
    }

    let mut engine = CalibrationEngine::new(settings);
    if !engine.restore() {
        println!("{} no calibration in {}", "note".yellow(), cli.data_dir.display());
    }
    let c = engine.coefficients();

    println!("Calibration: {}", engine.status());
    println!("{}", "-".repeat(60));
    println!("{:<24} | {:>10} | {:>10}", "", "X", "Y");
    println!("{:<24} | {:>10.4} | {:>10.4}", "error correction", c.x_error_correction, c.y_error_correction);
    println!("{:<24} | {:>10.2} | {:>10.2}", "offset (recorded)", c.x_offset_correction, c.y_offset_correction);
    println!("{:<24} | {:>10.1} | {:>10.1}", "eye Y range", c.eye_y_min, c.eye_y_max);
    println!("{:<24} | {:>10.1} | {:>10.1}", "sphere size range", c.sphere_size_min, c.sphere_size_max);
    println!("mean error {:.1}px over {} samples", c.mean_error_magnitude, c.sample_count);

    println!();
    println!("Formula history: {} snapshots (version {})", history.len(), history.current_version());
    for s in history.snapshots() {
        let get = |m: &std::collections::BTreeMap<String, f32>, k: &str| m.get(k).copied().unwrap_or(f32::NAN);
        println!(
            "v{:<4} {}  sens {:.2}/{:.2}  damping {:.2}  reduction {:+.1}%",
            s.version,
            s.timestamp.format("%Y-%m-%d %H:%M:%S"),
            get(&s.base_parameters, "gaze_sensitivity_x"),
            get(&s.base_parameters, "gaze_sensitivity_y"),
            get(&s.base_parameters, "damping_factor"),
            get(&s.performance, "error_reduction"),
        );
    }
    Ok(())
}
