//! Path resolution for terminal data files.
//!
//! Resolved once at startup from: `--data-dir` / `KIOSK_DATA_DIR` > `~/.kiosk-terminal`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

const DEFAULT_DIR_NAME: &str = ".kiosk-terminal";

/// Initialize the global data directory. Returns the resolved path.
pub fn init_data_dir(explicit: Option<&Path>) -> PathBuf {
    let dir = match explicit {
        Some(p) => p.to_path_buf(),
        None => dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(DEFAULT_DIR_NAME),
    };

    let mut guard = DATA_DIR.write().unwrap_or_else(|e| e.into_inner());
    *guard = Some(dir.clone());
    dir
}

/// Current data directory; the default location if `init_data_dir` was never called.
pub fn data_dir() -> PathBuf {
    let current = DATA_DIR
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    current.unwrap_or_else(|| init_data_dir(None))
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs() -> io::Result<()> {
    std::fs::create_dir_all(data_dir())?;
    std::fs::create_dir_all(log_dir())?;
    Ok(())
}
