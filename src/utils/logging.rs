use chrono::Local;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set. Each `-v` raises the level.
pub fn filter_directive(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    // HTTP internals stay quiet unless asked for through RUST_LOG
    format!("{},hyper=warn,reqwest=warn", level)
}

/// Open a timestamped log file in `log_dir` and point `latest.log` at it.
pub fn open_log_file(log_dir: &Path) -> std::io::Result<(File, PathBuf)> {
    std::fs::create_dir_all(log_dir)?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let log_path = log_dir.join(format!("dtools-export_{}.log", timestamp));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    point_latest(log_dir, &log_path);
    Ok((file, log_path))
}

fn point_latest(log_dir: &Path, log_path: &Path) {
    let latest_path = log_dir.join("latest.log");

    #[cfg(unix)]
    {
        let _ = std::fs::remove_file(&latest_path);
        let _ = std::os::unix::fs::symlink(log_path, &latest_path);
    }

    #[cfg(not(unix))]
    {
        let pointer_content = format!("Current log file: {}\n", log_path.display());
        let _ = std::fs::write(&latest_path, pointer_content);
    }
}

/// Install the global subscriber: compact output on stderr plus, when a log
/// directory is given, a plain-text copy in a timestamped file.
///
/// Returns the log file path if one was opened.
pub fn init_tracing(verbosity: u8, log_dir: Option<&Path>) -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(verbosity)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let (file_layer, log_path) = match log_dir.map(open_log_file) {
        Some(Ok((file, path))) => {
            let layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_target(true)
                .with_ansi(false);
            (Some(layer), Some(path))
        }
        Some(Err(e)) => {
            eprintln!("Could not open log file: {}", e);
            (None, None)
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    if installed.is_ok() {
        tracing::debug!(target: "dtools_export", "Logging initialized");
    }
    log_path
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_filter_directive_levels() {
        assert!(filter_directive(0).starts_with("info,"));
        assert!(filter_directive(1).starts_with("debug,"));
        assert!(filter_directive(5).starts_with("trace,"));
        assert!(EnvFilter::try_new(filter_directive(0)).is_ok());
    }

    #[test]
    fn test_open_log_file_points_latest() {
        let dir = TempDir::new().unwrap();
        let (_file, path) = open_log_file(dir.path()).unwrap();
        assert!(path.exists());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("dtools-export_"));
        assert!(dir.path().join("latest.log").exists());
    }
}
