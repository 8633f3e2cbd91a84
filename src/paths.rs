//! Presents functions related to locating charm and autofs paths

use std::env;
use std::path::PathBuf;

/// Get a dir from an env var, falling back to the given default
fn dir_from_env(env_var: &str, default: PathBuf) -> PathBuf {
    env::var(env_var).map(PathBuf::from).unwrap_or(default)
}

pub fn charm_dir() -> PathBuf {
    dir_from_env(
        "JUJU_CHARM_DIR",
        env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    )
}

/// Where events deferred by a previous dispatch are kept
pub fn deferred_events_file() -> PathBuf {
    charm_dir().join(".deferred.yaml")
}

pub fn autofs_master_file(app: &str) -> PathBuf {
    PathBuf::from(format!("/etc/auto.master.d/{}.autofs", app))
}

pub fn autofs_map_file(app: &str) -> PathBuf {
    PathBuf::from(format!("/etc/auto.{}", app))
}
