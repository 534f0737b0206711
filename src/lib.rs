//! Gaze and head tracking pointer with half-blink clicks and
//! self-calibration, driven by 478-point face landmarks.

pub mod args;
pub mod blink;
pub mod calibration;
pub mod config;
pub mod detector;
pub mod error;
pub mod gaze;
pub mod geometry;
pub mod gyro;
pub mod landmarks;
pub mod logging;
pub mod motion;
pub mod pipeline;
pub mod recording;
pub mod simulation;
pub mod tuning;
pub mod types;
