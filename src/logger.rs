use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "SSHMATE_LOG";

/// `<config>/sshmate/logs/sshmate.log`, or a relative `logs/` directory when
/// the platform has no config directory.
pub fn default_log_path() -> PathBuf {
    crate::config::app_dir()
        .unwrap_or_default()
        .join("logs")
        .join("sshmate.log")
}

/// Installs a file-backed tracing subscriber. Stdout and stderr carry remote
/// I/O, so nothing is ever logged there. Failure to open the log file just
/// leaves logging disabled.
pub fn init<P: AsRef<Path>>(path: P) {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let Ok(file) = OpenOptions::new().create(true).append(true).open(path) else {
        return;
    };

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .try_init();
}
