//! Operational logging
//!
//! Console progress stays on stdout via `println!`. Everything that should
//! leave a trace (commands executed, warnings, state changes) goes through
//! `tracing`: stderr at a verbosity-dependent level, plus an append-only
//! log file when it can be opened.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

fn console_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Install the global subscriber. Safe to call once per process.
pub fn init(verbose: u8, log_file: &Path) {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level(verbose)));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let file_level = if verbose >= 2 { "debug" } else { "info" };
    let file_layer = open_log_file(log_file).map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(false)
            .with_filter(EnvFilter::new(file_level))
    });
    let file_missing = file_layer.is_none();

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init();

    if file_missing {
        tracing::debug!(path = %log_file.display(), "log file not writable, file logging disabled");
    }
}

fn open_log_file(path: &Path) -> Option<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok()?;
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}
