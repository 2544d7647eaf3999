use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

/// Exclusive advisory lock on `board/.lock`.
///
/// Every writer of items.json holds one for the whole read-modify-write, so
/// two `bsync` processes never interleave commits. Released on drop.
#[derive(Debug)]
pub struct BoardLock {
    _file: File,
    path: PathBuf,
}

/// Error type for lock operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("could not open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("timed out after {waited_ms}ms waiting for {path}: another bsync process is writing")]
    Timeout { path: PathBuf, waited_ms: u64 },
}

impl BoardLock {
    /// Wait up to `timeout` for the lock on `board_dir`.
    pub fn acquire(board_dir: &Path, timeout: Duration) -> Result<Self, LockError> {
        let path = board_dir.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| LockError::Open {
                path: path.clone(),
                source,
            })?;

        let start = Instant::now();
        let mut contended = false;
        while let Err(e) = try_flock(&file) {
            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path,
                    waited_ms: whole_millis(timeout),
                });
            }
            if !contended {
                debug!(path = %path.display(), error = %e, "board lock busy, waiting");
                contended = true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(BoardLock { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Milliseconds in `d`, saturating at `u64::MAX`.
fn whole_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(unix)]
fn try_flock(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the fd is owned by `file`, which outlives the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn try_flock(_file: &File) -> std::io::Result<()> {
    Ok(())
}
