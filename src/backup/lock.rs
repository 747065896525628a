use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::fs::{File, TryLockError};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Exclusive advisory lock held for the duration of a run.
///
/// Two runs against the same state never overlap: the second one fails with
/// [`Error::Locked`] instead of waiting.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        match file.try_lock() {
            Ok(()) => {
                debug!("Acquired run lock {:?}", path);
                Ok(Self { file, path })
            }
            Err(TryLockError::WouldBlock) => Err(Error::Locked { path }),
            Err(TryLockError::Error(e)) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!("Releasing run lock {:?} failed: {}", self.path, e);
        }
    }
}
