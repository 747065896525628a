//! Write progress counters and the liveness heartbeat.
//!
//! The writer bumps [`WriteProgress`] as it goes. [`Heartbeat::run`] executes
//! the write on a scoped worker thread and, while waiting for it, hands a
//! [`ProgressSnapshot`] to the configured [`ProgressObserver`] every
//! `interval`. The heartbeat observes only; it never changes the outcome.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

pub static DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct WriteProgress {
    total_files: u64,
    total_bytes: u64,
    files_written: AtomicU64,
    bytes_written: AtomicU64,
    started: Instant,
}

impl WriteProgress {
    pub fn new(total_files: u64, total_bytes: u64) -> Self {
        Self {
            total_files,
            total_bytes,
            files_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_file(&self, bytes: u64) {
        self.files_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn files_written(&self) -> u64 {
        self.files_written.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            files_written: self.files_written(),
            bytes_written: self.bytes_written(),
            total_files: self.total_files,
            total_bytes: self.total_bytes,
            elapsed: self.started.elapsed(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub files_written: u64,
    pub bytes_written: u64,
    pub total_files: u64,
    pub total_bytes: u64,
    pub elapsed: Duration,
}

pub trait ProgressObserver: Send + Sync {
    fn on_heartbeat(&self, snapshot: &ProgressSnapshot);
}

impl<F: Fn(&ProgressSnapshot) + Send + Sync> ProgressObserver for F {
    fn on_heartbeat(&self, snapshot: &ProgressSnapshot) {
        self(snapshot)
    }
}

/// Logs each heartbeat at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogProgressObserver;

impl ProgressObserver for LogProgressObserver {
    fn on_heartbeat(&self, snapshot: &ProgressSnapshot) {
        info!(
            "Backup still running after {:?}: {}/{} files, {}/{} bytes",
            snapshot.elapsed,
            snapshot.files_written,
            snapshot.total_files,
            snapshot.bytes_written,
            snapshot.total_bytes
        );
    }
}

#[derive(Clone)]
pub struct Heartbeat {
    interval: Duration,
    observer: Arc<dyn ProgressObserver>,
}

impl Debug for Heartbeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heartbeat")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL, Arc::new(LogProgressObserver))
    }
}

impl Heartbeat {
    pub fn new(interval: Duration, observer: Arc<dyn ProgressObserver>) -> Self {
        Self { interval, observer }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs `work` on a worker thread and waits for it, emitting a heartbeat
    /// every interval until it returns.
    pub fn run<T, F>(&self, progress: &WriteProgress, work: F) -> Result<T>
    where
        T: Send,
        F: FnOnce() -> Result<T> + Send,
    {
        std::thread::scope(|scope| {
            let (done_tx, done_rx) = sync_channel::<()>(1);
            let worker = scope.spawn(move || {
                let res = work();
                // The receiver lives until the worker is joined.
                let _ = done_tx.send(());
                res
            });

            loop {
                match done_rx.recv_timeout(self.interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        self.observer.on_heartbeat(&progress.snapshot())
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            worker
                .join()
                .map_err(|_| Error::from(std::io::Error::other("writer thread panicked")))?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_counters() {
        let progress = WriteProgress::new(3, 30);
        progress.record_file(10);
        progress.record_file(5);

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.files_written, 2);
        assert_eq!(snapshot.bytes_written, 15);
        assert_eq!(snapshot.total_files, 3);
        assert_eq!(snapshot.total_bytes, 30);
    }

    #[test]
    fn test_heartbeat_fires_while_work_runs() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let heartbeat = Heartbeat::new(
            Duration::from_millis(10),
            Arc::new(move |s: &ProgressSnapshot| seen_clone.lock().unwrap().push(s.clone())),
        );
        let progress = WriteProgress::new(1, 4);

        let value = heartbeat
            .run(&progress, || {
                std::thread::sleep(Duration::from_millis(100));
                progress.record_file(4);
                Ok(7)
            })
            .unwrap();

        assert_eq!(value, 7);
        assert!(!seen.lock().unwrap().is_empty());
        assert_eq!(progress.files_written(), 1);
    }

    #[test]
    fn test_heartbeat_silent_for_fast_work() {
        let count = Arc::new(AtomicU64::new(0));
        let count_clone = count.clone();
        let heartbeat = Heartbeat::new(
            Duration::from_secs(60),
            Arc::new(move |_: &ProgressSnapshot| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            }),
        );
        let progress = WriteProgress::new(0, 0);

        heartbeat.run(&progress, || Ok(())).unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_heartbeat_propagates_work_error() {
        let heartbeat = Heartbeat::default();
        let progress = WriteProgress::new(0, 0);
        let res: Result<()> = heartbeat.run(&progress, || {
            Err(std::io::Error::other("disk gone").into())
        });
        assert!(res.unwrap_err().to_string().contains("disk gone"));
    }
}
