use crate::config::TrackerConfig;
use crate::range_collection::RangeCollection;
use crate::shared_file::SharedLockFile;
use crate::ScanError;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

const REQUEST_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    /// Completions are waiting in the pending buffer
    Buffering,
    /// The worker is merging the pending buffer into the checkpoint
    Flushing,
    Disposed,
}

enum FlushRequest {
    /// Flush if there is anything pending; nobody waits for the result
    Nudge,
    /// Flush and reply whether this process completed the batch
    Blocking(Sender<Result<bool, String>>),
    Shutdown,
}

/// State shared between the tracker handle and its worker thread
struct TrackerShared {
    pending: Mutex<RangeCollection>,
    state: Mutex<TrackerState>,
    completed_by_this_process: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl TrackerShared {
    fn pending(&self) -> Result<MutexGuard<'_, RangeCollection>, ScanError> {
        self.pending
            .lock()
            .map_err(|_| ScanError::Tracker("pending buffer mutex poisoned".into()))
    }

    fn set_state(&self, state: TrackerState) {
        let mut guard = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard != TrackerState::Disposed {
            *guard = state;
        }
    }

    fn state(&self) -> TrackerState {
        match self.state.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn record_failure(&self, message: String) {
        let mut guard = match self.failure.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get_or_insert(message);
    }

    fn failure(&self) -> Option<String> {
        match self.failure.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Records which work items of a batch this process has finished and merges them
/// into a checkpoint file shared by every cooperating process.
///
/// Completions are buffered locally and flushed by one background worker per
/// tracker, either when the buffer reaches the flush threshold or on an explicit
/// blocking flush. Exactly one tracker across all processes observes the flush
/// that makes the checkpoint equal to `0..item_count`.
pub struct CompletionTracker {
    shared: Arc<TrackerShared>,
    shared_file: Arc<SharedLockFile>,
    requests: Sender<FlushRequest>,
    worker: Option<JoinHandle<Result<(), ScanError>>>,
    item_count: u64,
    flush_threshold: u64,
    disposed: bool,
}

impl CompletionTracker {
    pub fn open(checkpoint_path: impl Into<PathBuf>, item_count: u64) -> Result<Self, ScanError> {
        Self::with_config(TrackerConfig::new(checkpoint_path, item_count))
    }

    pub fn with_config(config: TrackerConfig) -> Result<Self, ScanError> {
        info!("[tracker] Completed rows file: {}", config.checkpoint_path.display());

        let shared_file = Arc::new(SharedLockFile::open(&config.checkpoint_path)?);
        let shared = Arc::new(TrackerShared {
            pending: Mutex::new(RangeCollection::new()),
            state: Mutex::new(TrackerState::Idle),
            completed_by_this_process: AtomicBool::new(false),
            failure: Mutex::new(None),
        });
        let (requests, receiver) = crossbeam_channel::bounded(REQUEST_CAPACITY);

        let worker = {
            let shared = Arc::clone(&shared);
            let shared_file = Arc::clone(&shared_file);
            let item_count = config.item_count;
            thread::Builder::new()
                .name("completion-tracker".to_string())
                .spawn(move || run_worker(shared, shared_file, receiver, item_count))?
        };

        Ok(Self {
            shared,
            shared_file,
            requests,
            worker: Some(worker),
            item_count: config.item_count,
            flush_threshold: config.flush_threshold.max(1),
            disposed: false,
        })
    }

    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    pub fn checkpoint_path(&self) -> &Path {
        self.shared_file.path()
    }

    pub fn state(&self) -> TrackerState {
        self.shared.state()
    }

    /// Completions recorded locally but not yet merged into the checkpoint
    pub fn pending_count(&self) -> Result<u64, ScanError> {
        Ok(self.shared.pending()?.count())
    }

    pub fn add(&self, index: u64) -> Result<(), ScanError> {
        let count = {
            let mut pending = self.shared.pending()?;
            pending.add(index);
            pending.count()
        };
        self.after_add(count);
        Ok(())
    }

    pub fn add_range_collection(&self, items: &RangeCollection) -> Result<(), ScanError> {
        let count = {
            let mut pending = self.shared.pending()?;
            pending.add_range_collection(items);
            pending.count()
        };
        self.after_add(count);
        Ok(())
    }

    fn after_add(&self, pending_count: u64) {
        if pending_count == 0 {
            return;
        }
        if self.shared.state() == TrackerState::Idle {
            self.shared.set_state(TrackerState::Buffering);
        }
        if pending_count >= self.flush_threshold {
            match self.requests.try_send(FlushRequest::Nudge) {
                Ok(()) => {}
                // A flush is already queued and will pick these items up
                Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => {
                    warn!("[tracker] Worker is gone; {} completions stay pending", pending_count);
                }
            }
        }
    }

    /// Block until everything added so far is merged into the checkpoint
    pub fn flush(&self) -> Result<(), ScanError> {
        self.blocking_flush().map(|_| ())
    }

    /// Flush, then report whether a flush made by this tracker was the one that
    /// completed the batch.
    pub fn range_completed_by_this_process(&self) -> Result<bool, ScanError> {
        debug!("[tracker] Checking if this process completed {}", self.checkpoint_path().display());
        let completed = self.blocking_flush()?;
        info!(
            "[tracker] This process {} the last one",
            if completed { "is" } else { "is not" }
        );
        Ok(completed)
    }

    fn blocking_flush(&self) -> Result<bool, ScanError> {
        if self.shared.failure().is_some() {
            return Err(self.worker_failure());
        }
        let (reply, acknowledged) = crossbeam_channel::bounded(1);
        if self.requests.send(FlushRequest::Blocking(reply)).is_err() {
            return Err(self.worker_failure());
        }
        match acknowledged.recv() {
            Ok(Ok(completed)) => Ok(completed),
            Ok(Err(message)) => Err(ScanError::Tracker(message)),
            Err(_) => Err(self.worker_failure()),
        }
    }

    fn worker_failure(&self) -> ScanError {
        match self.shared.failure() {
            Some(message) => ScanError::Tracker(format!("completion worker failed earlier: {}", message)),
            None => ScanError::Tracker("completion worker is not running".to_string()),
        }
    }

    /// Flush everything, stop the worker and release the shared file
    pub fn close(mut self) -> Result<(), ScanError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), ScanError> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        debug!("[tracker] Disposing");

        let flushed = self.flush();

        let _ = self.requests.send(FlushRequest::Shutdown);
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(Ok(())) => {}
                // Already logged and recorded by the worker
                Ok(Err(_)) => {}
                Err(_) => error!("[tracker] Worker thread panicked"),
            }
        }

        self.shared_file.dispose();
        self.shared.set_state(TrackerState::Disposed);
        debug!("[tracker] Disposed");
        flushed
    }
}

impl Drop for CompletionTracker {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("[tracker] Flush during teardown failed: {}", e);
        }
    }
}

fn run_worker(
    shared: Arc<TrackerShared>,
    shared_file: Arc<SharedLockFile>,
    requests: Receiver<FlushRequest>,
    item_count: u64,
) -> Result<(), ScanError> {
    for request in requests.iter() {
        let outcome = flush_pending(&shared, &shared_file, item_count);
        match (request, outcome) {
            (FlushRequest::Blocking(reply), Ok(())) => {
                let _ = reply.send(Ok(shared.completed_by_this_process.load(Ordering::Acquire)));
            }
            (FlushRequest::Nudge, Ok(())) => {}
            (FlushRequest::Shutdown, Ok(())) => return Ok(()),
            (request, Err(e)) => {
                error!("[tracker] Failure in completion worker: {}", e);
                shared.record_failure(e.to_string());
                if let FlushRequest::Blocking(reply) = request {
                    let _ = reply.send(Err(e.to_string()));
                }
                return Err(e);
            }
        }
    }
    Ok(())
}

/// One read-merge-write cycle against the checkpoint.
///
/// The completion flag is only ever set here, while both the shared lock and
/// the pending-buffer lock are held and right after the merged range was written.
fn flush_pending(shared: &TrackerShared, shared_file: &SharedLockFile, item_count: u64) -> Result<(), ScanError> {
    if shared.pending()?.is_empty() {
        return Ok(());
    }
    shared.set_state(TrackerState::Flushing);

    // Never wait on the shared lock while holding the local one
    let Some(lock) = shared_file.acquire()? else {
        warn!("[tracker] Checkpoint file disposed before pending completions could be written");
        return Ok(());
    };
    let mut pending = shared.pending()?;
    debug!("[tracker] Checking in {} items covering {}", pending.count(), *pending);

    let existing = lock.read_all()?;
    let mut checkpoint: RangeCollection = existing.trim().parse().map_err(|e| {
        error!("[tracker] Trouble reading checkpoint; read \"{}\", new range {}", existing.trim(), *pending);
        e
    })?;
    let was_complete = checkpoint.is_complete(item_count);
    checkpoint.add_range_collection(&pending);
    lock.replace(&checkpoint.to_string())?;

    let now_complete = checkpoint.is_complete(item_count);
    debug!("[tracker] Range {} complete to {} items? {}", checkpoint, item_count, now_complete);
    if now_complete && !was_complete {
        info!("[tracker] This flush completed all {} items", item_count);
        shared.completed_by_this_process.store(true, Ordering::Release);
    }

    pending.clear();
    shared.set_state(TrackerState::Idle);
    Ok(())
}

/// Read the checkpoint at `path` under the shared lock
pub fn read_checkpoint(path: impl AsRef<Path>) -> Result<RangeCollection, ScanError> {
    let shared_file = SharedLockFile::open(path)?;
    let lock = shared_file
        .acquire()?
        .ok_or_else(|| ScanError::Lock("checkpoint file disposed while reading".into()))?;
    let content = lock.read_all()?;
    content.trim().parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, Instant};

    #[test]
    fn test_blocking_flush_writes_checkpoint() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("batch.completed");
        let tracker = CompletionTracker::open(&path, 10).unwrap();

        tracker.add(0).unwrap();
        tracker.add(1).unwrap();
        tracker.add(5).unwrap();
        assert_eq!(tracker.state(), TrackerState::Buffering);
        tracker.flush().unwrap();

        assert_eq!(tracker.pending_count().unwrap(), 0);
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert_eq!(read_checkpoint(&path).unwrap().to_string(), "0-1,5");
    }

    #[test]
    fn test_threshold_triggers_background_flush() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("batch.completed");
        let config = TrackerConfig::new(&path, 1000).with_flush_threshold(10);
        let tracker = CompletionTracker::with_config(config).unwrap();

        for i in 0..10 {
            tracker.add(i).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if read_checkpoint(&path).unwrap().count() == 10 {
                break;
            }
            assert!(Instant::now() < deadline, "background flush never happened");
            thread::sleep(Duration::from_millis(10));
        }
        tracker.close().unwrap();
    }

    #[test]
    fn test_single_process_completes_batch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("batch.completed");
        let tracker = CompletionTracker::open(&path, 3).unwrap();

        tracker.add(0).unwrap();
        assert!(!tracker.range_completed_by_this_process().unwrap());
        tracker.add_range_collection(&"1-2".parse().unwrap()).unwrap();
        assert!(tracker.range_completed_by_this_process().unwrap());
        // Re-adding finished work does not make a second winner, but the answer is sticky
        tracker.add(1).unwrap();
        assert!(tracker.range_completed_by_this_process().unwrap());
    }

    #[test]
    fn test_already_complete_checkpoint_has_no_new_winner() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("batch.completed");
        fs::write(&path, "0-4").unwrap();

        let tracker = CompletionTracker::open(&path, 5).unwrap();
        tracker.add(3).unwrap();
        assert!(!tracker.range_completed_by_this_process().unwrap());
        assert_eq!(read_checkpoint(&path).unwrap().to_string(), "0-4");
    }

    #[test]
    fn test_drop_flushes_pending_items() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("batch.completed");
        {
            let tracker = CompletionTracker::open(&path, 100).unwrap();
            tracker.add(7).unwrap();
            tracker.add(8).unwrap();
        }
        assert_eq!(read_checkpoint(&path).unwrap().to_string(), "7-8");
    }

    #[test]
    fn test_corrupt_checkpoint_is_fatal_to_tracker() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("batch.completed");
        fs::write(&path, "not a range").unwrap();

        let tracker = CompletionTracker::open(&path, 5).unwrap();
        tracker.add(1).unwrap();
        assert!(matches!(tracker.flush(), Err(ScanError::Tracker(_))));

        // Every later flush reports the failure instead of silently succeeding
        tracker.add(2).unwrap();
        match tracker.range_completed_by_this_process() {
            Err(ScanError::Tracker(message)) => assert!(message.contains("failed earlier")),
            other => panic!("expected tracker failure, got {:?}", other),
        }

        // The shared lock was released despite the failure
        fs::write(&path, "").unwrap();
        assert!(read_checkpoint(&path).unwrap().is_empty());
        assert!(tracker.close().is_err());
    }
}
