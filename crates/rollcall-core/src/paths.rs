//! Default on-disk locations shared by the engine and the CLI.

use std::path::PathBuf;

/// `$XDG_DATA_HOME/rollcall`, falling back to `~/.local/share/rollcall`.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

pub fn default_db_path() -> PathBuf {
    data_dir().join("attendance_system.db")
}

pub fn default_gallery_root() -> PathBuf {
    data_dir().join("galleries")
}
