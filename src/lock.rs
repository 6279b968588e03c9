//! Process-level guards: a single running agent per device and no lingering root privileges

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::Error;

/// Exclusive advisory lock on a file, held until dropped
///
/// The file is left in place afterwards; the lock itself goes away with the descriptor.
#[derive(Debug)]
pub struct InstanceLock {
    _file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Lock `path`, creating it if needed, and write the current pid into it
    ///
    /// Fails without blocking if another process holds the lock.
    pub fn acquire(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        // SAFETY: the descriptor belongs to `file`, which outlives the call
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            return Err(match err.kind() {
                io::ErrorKind::WouldBlock => Error::AlreadyRunning {
                    path: path.to_path_buf(),
                },
                _ => err.into(),
            });
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        debug!("Locked {}", path.display());

        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Give up elevated privileges by resetting the effective user to the real user
///
/// Hardware setup that needs root must happen before this is called.
pub fn drop_privileges() -> crate::Result<()> {
    // SAFETY: plain libc calls without pointers
    let rc = unsafe { libc::setuid(libc::getuid()) };
    if rc < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}
