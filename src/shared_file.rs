use crate::ScanError;
use fs2::FileExt;
use rand::Rng;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const CREATE_ATTEMPTS: usize = 20;
const FASTEST_RETRY_MS: u64 = 2;
const SLOWEST_RETRY_MS: u64 = 250;

/// Cooperative exclusive access to one file shared by many processes.
///
/// The lock is an advisory `flock` held through an open handle, so it is
/// released when the handle is dropped, including when the owning process dies.
/// Every participant must only touch the file while holding the lock.
pub struct SharedLockFile {
    path: PathBuf,
    handle: Mutex<Option<File>>,
    disposed: AtomicBool,
}

impl SharedLockFile {
    /// Open (creating if needed) the shared file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let path = path.as_ref().to_path_buf();
        create_if_missing(&path)?;
        Ok(Self {
            path,
            handle: Mutex::new(None),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn has_lock(&self) -> Result<bool, ScanError> {
        Ok(self.handle()?.is_some())
    }

    /// Block until this object holds the exclusive lock.
    ///
    /// Returns `Ok(false)` if the object was disposed before the lock could be taken.
    /// There is no timeout: a holder that never releases stalls every other participant.
    pub fn obtain_lock(&self) -> Result<bool, ScanError> {
        let mut sleep_ms = FASTEST_RETRY_MS;
        loop {
            {
                let mut guard = self.handle()?;
                if guard.is_some() {
                    return Ok(true);
                }
                if self.is_disposed() {
                    info!("[shared_file] {} is disposed, not obtaining lock", self.path.display());
                    return Ok(false);
                }

                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&self.path)?;
                match file.try_lock_exclusive() {
                    Ok(()) => {
                        debug!("[shared_file] Obtained lock on {}", self.path.display());
                        *guard = Some(file);
                        return Ok(true);
                    }
                    Err(e) if is_contended(&e) => {}
                    Err(e) => {
                        return Err(ScanError::Lock(format!(
                            "failed to lock {}: {}",
                            self.path.display(),
                            e
                        )));
                    }
                }
            }

            let pause = rand::rng().random_range(0..=sleep_ms);
            thread::sleep(Duration::from_millis(pause));
            sleep_ms = (sleep_ms * 2).min(SLOWEST_RETRY_MS);
        }
    }

    /// Like [`obtain_lock`](Self::obtain_lock) but hands back a guard that releases on drop
    pub fn acquire(&self) -> Result<Option<SharedLockGuard<'_>>, ScanError> {
        if self.obtain_lock()? {
            Ok(Some(SharedLockGuard { file: self }))
        } else {
            Ok(None)
        }
    }

    /// Safe to call whether or not the lock is held
    pub fn release_lock(&self) {
        let mut guard = match self.handle.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(file) = guard.take() {
            if let Err(e) = file.sync_all() {
                warn!("[shared_file] sync of {} failed on release: {}", self.path.display(), e);
            }
            if let Err(e) = FileExt::unlock(&file) {
                warn!("[shared_file] unlock of {} failed: {}", self.path.display(), e);
            }
            debug!("[shared_file] Released lock on {}", self.path.display());
        }
    }

    pub fn read_all(&self) -> Result<String, ScanError> {
        let mut guard = self.handle()?;
        let file = held(&mut guard, "reading", &self.path)?;
        file.seek(SeekFrom::Start(0))?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        Ok(content)
    }

    pub fn clear(&self) -> Result<(), ScanError> {
        let mut guard = self.handle()?;
        let file = held(&mut guard, "clearing", &self.path)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Appends `content` at the end of the file and syncs it
    pub fn write(&self, content: &str) -> Result<(), ScanError> {
        let mut guard = self.handle()?;
        let file = held(&mut guard, "writing", &self.path)?;
        file.seek(SeekFrom::End(0))?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    /// Release the lock and refuse any further acquisition. Blocked `obtain_lock`
    /// calls on this object return `Ok(false)` at their next retry.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.release_lock();
        }
    }

    fn handle(&self) -> Result<MutexGuard<'_, Option<File>>, ScanError> {
        self.handle
            .lock()
            .map_err(|_| ScanError::Lock(format!("handle mutex for {} poisoned", self.path.display())))
    }
}

impl Drop for SharedLockFile {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Holds the shared lock until dropped
pub struct SharedLockGuard<'a> {
    file: &'a SharedLockFile,
}

impl SharedLockGuard<'_> {
    pub fn read_all(&self) -> Result<String, ScanError> {
        self.file.read_all()
    }

    pub fn clear(&self) -> Result<(), ScanError> {
        self.file.clear()
    }

    pub fn write(&self, content: &str) -> Result<(), ScanError> {
        self.file.write(content)
    }

    /// Replace the whole content
    pub fn replace(&self, content: &str) -> Result<(), ScanError> {
        self.file.clear()?;
        self.file.write(content)
    }
}

impl Drop for SharedLockGuard<'_> {
    fn drop(&mut self) {
        self.file.release_lock();
    }
}

fn held<'a>(guard: &'a mut Option<File>, action: &str, path: &Path) -> Result<&'a mut File, ScanError> {
    guard.as_mut().ok_or_else(|| {
        ScanError::Lock(format!(
            "you must obtain the lock on {} before {} it",
            path.display(),
            action
        ))
    })
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn create_if_missing(path: &Path) -> Result<(), ScanError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut attempt = 0;
    while !path.exists() {
        match OpenOptions::new().write(true).create(true).truncate(false).open(path) {
            Ok(_) => return Ok(()),
            Err(e) if attempt >= CREATE_ATTEMPTS => {
                return Err(ScanError::Lock(format!(
                    "could not create shared file {} after {} attempts: {}",
                    path.display(),
                    CREATE_ATTEMPTS,
                    e
                )));
            }
            Err(e) => {
                warn!("[shared_file] creating {} failed ({}), retrying", path.display(), e);
                attempt += 1;
                thread::sleep(Duration::from_millis(rand::rng().random_range(100..500)));
            }
        }
    }
    Ok(())
}
