//! Single-instance guard for the daemon: an exclusive `flock` on
//! `<home>/server.lock`, held for the life of the process.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{IndexError, Result};

pub struct ServerLock {
    file: File,
    path: PathBuf,
}

impl ServerLock {
    /// Take the lock, or fail with `AlreadyRunning` if another process
    /// holds it. The holder's pid is written into the file.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{flock, LOCK_EX, LOCK_NB};

            let fd = file.as_raw_fd();
            // SAFETY: fd belongs to `file`, which outlives the call.
            if unsafe { flock(fd, LOCK_EX | LOCK_NB) } != 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return Err(IndexError::AlreadyRunning);
                }
                return Err(err.into());
            }
        }

        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;
        debug!(path = %path.display(), "Server lock acquired");
        Ok(ServerLock {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ServerLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{flock, LOCK_UN};

            let fd = self.file.as_raw_fd();
            // SAFETY: see `acquire`.
            unsafe {
                flock(fd, LOCK_UN);
            }
        }
        debug!(path = %self.path.display(), "Server lock released");
    }
}
