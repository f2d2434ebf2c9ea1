//! Whole-file exclusive advisory locking.
//!
//! The lock is cooperative: it is honoured by every process that opens the
//! same path through this type (or any other `flock` user), which is what
//! makes the per-key read-decide-write sequence atomic across processes.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Seek;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// A file handle holding an exclusive advisory lock for its whole lifetime.
///
/// `open` blocks until the lock is granted; dropping the handle releases it
/// on every exit path, including failure after partial I/O.
#[derive(Debug)]
pub struct LockedFile {
    file: File,
}

impl LockedFile {
    /// Opens `path` with the given options and takes `flock(LOCK_EX)`,
    /// blocking until the lock is exclusive.
    pub fn open(
        path: &Path,
        options: &OpenOptions,
    ) -> io::Result<Self> {
        let file = options.open(path)?;
        let fd = file.as_raw_fd();
        loop {
            let rc = unsafe { libc::flock(fd, libc::LOCK_EX) };
            if rc == 0 {
                break;
            }
            let error = io::Error::last_os_error();
            if error.kind() != ErrorKind::Interrupted {
                return Err(error);
            }
        }
        Ok(Self { file })
    }

    /// Reads the rest of the file from the current position.
    pub fn read_to_string(&mut self) -> io::Result<String> {
        let mut content = String::new();
        self.file.read_to_string(&mut content)?;
        Ok(content)
    }

    /// Seeks back to the start so the next write overwrites in place.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.file.rewind()
    }

    pub fn write_all(
        &mut self,
        buf: &[u8],
    ) -> io::Result<()> {
        self.file.write_all(buf)
    }

    /// Truncates (or extends) the file without moving the cursor.
    pub fn set_len(
        &mut self,
        len: u64,
    ) -> io::Result<()> {
        self.file.set_len(len)
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }
}
