use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const DEFAULT_STATE_DIR: &str = ".local/state/agentchat";
const PROBE_FILE: &str = ".write-probe";

/// Return the agentchat state directory path.
///
/// Priority: `$AGENTCHAT_STATE_DIR` env var, then `~/.local/state/agentchat`.
pub fn default_state_dir() -> io::Result<PathBuf> {
    if let Ok(dir) = std::env::var("AGENTCHAT_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME env var not set"))?;
    Ok(PathBuf::from(home).join(DEFAULT_STATE_DIR))
}

/// Ensure the state directory exists with `0700` permissions.
pub fn ensure_state_dir(path: &Path) -> io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    #[cfg(unix)]
    {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Check that the directory can hold persistent state by creating and
/// removing a small probe file.
pub fn probe_writable(path: &Path) -> bool {
    if ensure_state_dir(path).is_err() {
        return false;
    }
    let probe = path.join(PROBE_FILE);
    let written = std::fs::write(&probe, b"ok").is_ok();
    std::fs::remove_file(&probe).ok();
    written
}
