use thiserror::Error;

/// Failures of the durable calibration / formula history stores.
/// Never escapes the calibration engine; callers log and fall back to defaults.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PersistError {
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io { path: path.display().to_string(), source }
    }
}

/// Transient detection failures, reported through `on_error` and never fatal.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectorError {
    #[error("inference failed: {message}")]
    Inference { message: String, code: Option<i32> },
    #[error("frame could not be decoded")]
    Undecodable,
    #[error("frame {width}x{height} is below the minimum size")]
    TooSmall { width: u32, height: u32 },
    #[error("detector worker has shut down")]
    Disconnected,
}

impl DetectorError {
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Inference { code, .. } => *code,
            _ => None,
        }
    }
}
