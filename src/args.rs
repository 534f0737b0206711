use std::path::PathBuf;

use clap::Parser;

use crate::types::Viewport;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Config file (created with defaults if missing)
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Replay recorded landmark frames (JSON lines)
    #[arg(long, conflicts_with = "simulate")]
    pub replay: Option<PathBuf>,

    /// Calibration taps to inject during replay (JSON lines)
    #[arg(long)]
    pub taps: Option<PathBuf>,

    /// Run N frames of synthetic face motion through the detection worker
    #[arg(long, value_name = "FRAMES")]
    pub simulate: Option<u32>,

    /// Screen size the pointer moves on
    #[arg(long, value_parser = parse_viewport, default_value = "1080x2340")]
    pub viewport: Viewport,

    /// Start a calibration session before processing
    #[arg(long, default_value_t = false)]
    pub calibrate: bool,

    /// Delete persisted calibration before starting
    #[arg(long, default_value_t = false)]
    pub reset: bool,
}

pub fn parse_viewport(s: &str) -> Result<Viewport, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let width: f32 = w.trim().parse().map_err(|_| format!("bad width '{w}'"))?;
    let height: f32 = h.trim().parse().map_err(|_| format!("bad height '{h}'"))?;
    if !(width > 0.0 && height > 0.0 && width.is_finite() && height.is_finite()) {
        return Err(format!("viewport must be positive, got '{s}'"));
    }
    Ok(Viewport::new(width, height))
}
