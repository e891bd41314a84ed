//! Named pipe between the feeder and main processes.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use tracing::debug;

use crate::StreamerError;

/// Remove whatever sits at `path` (file or pipe) and create a fresh FIFO.
pub fn recreate_fifo(path: &Path) -> Result<(), StreamerError> {
    remove_fifo(path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| StreamerError::Config(format!("FIFO path contains NUL: {}", path.display())))?;

    // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o666) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    debug!(path = %path.display(), "FIFO created");
    Ok(())
}

/// Remove the entry at `path`, ignoring a missing one.
pub fn remove_fifo(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "FIFO removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "failed to remove FIFO"),
    }
}

pub fn is_fifo(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false)
}
