//! Session logger: routes `tracing` events to a single file in the OS data directory.
//!
//! The file is **truncated at each launch**, so it only ever holds output from
//! the most recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\Enhance\enhance.log`
//!   Linux:    `~/.local/share/Enhance/enhance.log`  (XDG_DATA_HOME respected)
//!   macOS:    `~/Library/Application Support/Enhance/enhance.log`
//!
//! `RUST_LOG` overrides the default `info` filter. With `verbose` set, events
//! are mirrored to stderr as well.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Initialise logging. Call once, before any engine work.
///
/// * Creates (or truncates) the log file and writes a session header.
/// * Installs the global subscriber (file sink, optional stderr sink).
/// * Installs a panic hook that records the panic before the default handler runs.
///
/// A log file that cannot be opened is not fatal; only the stderr sink (if
/// requested) is installed.
pub fn init(verbose: bool) {
    let path = log_file_path();
    let file = open_session_file(&path);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = file.map(|f| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(f))
    });
    let stderr_layer = verbose.then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
    {
        eprintln!("[logger] subscriber already installed: {}", e);
        return;
    }

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC: {}", info);
        prev(info);
    }));
}

fn open_session_file(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path);

    match file {
        Ok(mut f) => {
            let _ = writeln!(f, "=== Enhance session {} started (unix {}) ===", session_tag(), unix_secs());
            let _ = writeln!(f, "Log file: {}", path.display());
            let _ = writeln!(f);
            let _ = LOG_PATH.set(path.to_path_buf());
            Some(f)
        }
        Err(e) => {
            // Can't open log file; not fatal
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            None
        }
    }
}

fn log_file_path() -> PathBuf {
    data_dir().join("Enhance").join("enhance.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    // Last resort: current working directory
    PathBuf::from(".")
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Short random tag so interleaved logs from separate runs can be told apart.
fn session_tag() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
