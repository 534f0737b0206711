use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub log_level: String,
    pub enable_file_logs: bool,
    pub log_dir: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            enable_file_logs: false,
            log_dir: "./logs".to_string(),
        }
    }
}

/// Install the global subscriber. RUST_LOG overrides `log_level`.
/// A second call (tests, embedding hosts) is a no-op.
pub fn init_tracing(config: &LogConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let stdout_layer = fmt::layer().with_target(true).with_thread_ids(false);
    let registry = Registry::default().with(env_filter).with(stdout_layer);

    let file_appender = if config.enable_file_logs {
        match RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("pupil-pointer")
            .filename_suffix("log")
            .max_log_files(14)
            .build(&config.log_dir)
        {
            Ok(appender) => Some(appender),
            Err(e) => {
                eprintln!("file logging disabled: {e}");
                None
            }
        }
    } else {
        None
    };

    let result = match file_appender {
        Some(appender) => {
            let file_layer = fmt::layer().with_writer(appender).with_ansi(false).json();
            registry.with(file_layer).try_init()
        }
        None => registry.try_init(),
    };

    if let Err(e) = result {
        let msg = e.to_string();
        if !msg.contains("already been set") {
            eprintln!("failed to initialize tracing: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_init_is_tolerated() {
        let cfg = LogConfig::default();
        init_tracing(&cfg);
        init_tracing(&cfg);
    }
}
