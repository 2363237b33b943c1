use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use crate::error::{Error, Result};

/// Name of the lock file created inside a data directory.
pub const LOCK_FILE: &str = "store.lock";

/// Advisory exclusive lock on a data directory.
///
/// A second opener of the same directory observes lock contention and fails
/// with [`Error::DirectoryLocked`]. On clean release the lock is dropped and
/// the lock file is deleted; if the process dies the OS releases the lock
/// and a stale file is simply re-locked by the next opener.
#[derive(Debug)]
pub struct FileLock {
    file: Option<File>,
    path: PathBuf,
}

impl FileLock {
    /// Creates the lock file and acquires a non-blocking exclusive lock on
    /// it. The file contains the process ID for debugging purposes.
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Self::try_lock(&file).map_err(|_| Error::DirectoryLocked(path.display().to_string()))?;

        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self {
            file: Some(file),
            path,
        })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        // No advisory locking on this platform; single-writer enforcement
        // falls back to the lock file's presence alone.
        Ok(())
    }

    /// Releases the lock and deletes the lock file.
    pub fn release(mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            #[cfg(unix)]
            unsafe {
                libc::flock(file.as_raw_fd(), libc::LOCK_UN);
            }
            drop(file);
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            drop(file);
            let _ = fs::remove_file(&self.path);
        }
    }
}
