use std::path::Path;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Where log output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Compact human output on stderr (interactive CLI use).
    Interactive,
    /// Append to the background log file (detached phase-2 tasks).
    Background,
}

/// Initialize the global tracing subscriber.
///
/// Call once at program startup. Respects `RUST_LOG`; default filter is
/// `scs=info,warn`. In background mode every line carries pid, user, and
/// host so interleaved tasks stay attributable.
pub fn init(mode: LogMode, background_log: &Path) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scs=info,warn"));

    match mode {
        LogMode::Interactive => {
            let layer = fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact();
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .init();
        }
        LogMode::Background => {
            if let Some(parent) = background_log.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(background_log)
                .expect("cannot open background log");
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::sync::Arc::new(file));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .init();

            tracing::info!(
                pid = std::process::id(),
                user = %std::env::var("USER").unwrap_or_default(),
                host = %hostname(),
                "background task started"
            );
        }
    }
}

fn hostname() -> String {
    std::process::Command::new("hostname")
        .output()
        .ok()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_mode_equality() {
        assert_eq!(LogMode::Interactive, LogMode::Interactive);
        assert_ne!(LogMode::Interactive, LogMode::Background);
    }

    #[test]
    fn test_hostname_does_not_panic() {
        let _ = hostname();
    }
}
