use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "conductor.sock";

pub fn conductor_root(home: &Path) -> PathBuf {
    home.join(".conductor")
}

pub fn socket_path(home: &Path) -> PathBuf {
    conductor_root(home).join(DAEMON_SOCKET)
}

/// Default target configuration, `~/.conductor/targets.yaml`.
pub fn config_path(home: &Path) -> PathBuf {
    conductor_core::config::config_path_at(home)
}
