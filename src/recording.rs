//! JSON-lines capture files: one landmark frame or one tap per line.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::types::LandmarkFrame;

/// A calibration tap captured alongside a frame recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TapRecord {
    pub x: f32,
    pub y: f32,
    pub timestamp_ms: u64,
}

/// Read every non-blank line of `path` as one `T`.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: malformed record", path.display(), i + 1))?;
        records.push(record);
    }
    Ok(records)
}

pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Frames in arrival order, which may run backwards in time; the
/// controller discards the stale ones during replay.
pub fn read_frames(path: &Path) -> Result<Vec<LandmarkFrame>> {
    read_jsonl(path)
}

pub fn read_taps(path: &Path) -> Result<Vec<TapRecord>> {
    let mut taps: Vec<TapRecord> = read_jsonl(path)?;
    taps.sort_by_key(|t| t.timestamp_ms);
    Ok(taps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point2;

    #[test]
    fn frames_keep_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.jsonl");
        let frames = vec![
            LandmarkFrame::new(20, 4, 4, vec![Point2::new(1.0, 2.0)]),
            LandmarkFrame::new(10, 4, 4, vec![Point2::new(3.0, 4.0)]),
        ];
        write_jsonl(&path, &frames).unwrap();

        let back = read_frames(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].timestamp_ms, 20);
        assert_eq!(back[1].timestamp_ms, 10);
        assert_eq!(back[1].points[0], Point2::new(3.0, 4.0));
    }

    #[test]
    fn malformed_line_names_its_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taps.jsonl");
        std::fs::write(&path, "{\"x\":1,\"y\":2,\"timestamp_ms\":3}\n\nnot json\n").unwrap();
        let err = read_taps(&path).unwrap_err();
        assert!(format!("{err:#}").contains(":3:"), "{err:#}");
    }
}
