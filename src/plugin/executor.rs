//! Fixed worker pool for plugin notifications.
//!
//! Jobs go through a bounded crossbeam queue. When the queue is full the job
//! is dropped with a warning; the submitting I/O thread never waits. A
//! panicking job is contained and logged.
//!
//! Shutdown waits at most [`SHUTDOWN_GRACE`] for the workers. Workers still
//! busy after that are detached and every job still queued is discarded.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::error::Result;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Longest time shutdown waits for running jobs
pub(crate) const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

const JOIN_POLL: Duration = Duration::from_millis(5);

/// Worker pool running fire-and-forget jobs
#[derive(Debug)]
pub(crate) struct Executor {
    tx: Mutex<Option<Sender<Job>>>,
    discard: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    grace: Duration,
}

impl Executor {
    /// Spawn `pool_size` workers sharing a queue of `capacity` jobs
    pub(crate) fn new(pool_size: usize, capacity: usize) -> Result<Self> {
        let (tx, rx) = bounded::<Job>(capacity);
        let discard = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(pool_size);
        for index in 0..pool_size {
            let rx = rx.clone();
            let discard = Arc::clone(&discard);
            let handle = thread::Builder::new()
                .name(format!("knx-plugin-{index}"))
                .spawn(move || work(&rx, &discard))?;
            workers.push(handle);
        }

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            discard,
            workers: Mutex::new(workers),
            grace: SHUTDOWN_GRACE,
        })
    }

    /// Queue `job`; returns `false` if it was dropped
    pub(crate) fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            log::debug!("executor stopped, dropping plugin notification");
            return false;
        };
        match tx.try_send(Box::new(job)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("plugin queue full, dropping notification");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Stop accepting jobs and wait up to the grace period for the workers
    ///
    /// Queued jobs keep running during the grace period. Whatever is still
    /// queued afterwards is dropped and busy workers are left to finish on
    /// their own.
    pub(crate) fn shutdown(&self) {
        // Dropping the sender ends each worker once the queue is empty
        drop(self.tx.lock().take());

        let current = thread::current().id();
        let mut workers = std::mem::take(&mut *self.workers.lock());
        // a plugin closing the client runs on one of the workers
        workers.retain(|handle| handle.thread().id() != current);

        let deadline = Instant::now() + self.grace;
        while !workers.is_empty() {
            let (finished, running): (Vec<_>, Vec<_>) =
                workers.into_iter().partition(JoinHandle::is_finished);
            for handle in finished {
                let _ = handle.join();
            }
            workers = running;
            if workers.is_empty() || Instant::now() >= deadline {
                break;
            }
            thread::sleep(JOIN_POLL);
        }

        if !workers.is_empty() {
            self.discard.store(true, Ordering::Release);
            log::warn!(
                "{} plugin worker(s) still busy after {:?}, detaching and dropping queued notifications",
                workers.len(),
                self.grace
            );
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn work(rx: &Receiver<Job>, discard: &AtomicBool) {
    for job in rx {
        if discard.load(Ordering::Acquire) {
            break;
        }
        if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
            let message = panic
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("non-string panic payload");
            log::error!("plugin panicked: {message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_and_panics_are_contained() {
        let executor = Executor::new(2, 16).unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        assert!(executor.submit(|| panic!("plugin bug")));
        for _ in 0..5 {
            let count = Arc::clone(&count);
            assert!(executor.submit(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }

        executor.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert!(!executor.submit(|| {}));
    }

    #[test]
    fn test_full_queue_drops_jobs() {
        let executor = Executor::new(1, 1).unwrap();
        let (release_tx, release_rx) = bounded::<()>(0);
        let (started_tx, started_rx) = bounded::<()>(0);

        // occupy the only worker
        assert!(executor.submit(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        }));
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        assert!(executor.submit(|| {}));
        assert!(!executor.submit(|| {}));

        release_tx.send(()).unwrap();
        executor.shutdown();
    }

    #[test]
    fn test_shutdown_does_not_wait_for_stuck_jobs() {
        let executor = Executor::new(1, 8).unwrap();
        let (release_tx, release_rx) = bounded::<()>(0);
        let (started_tx, started_rx) = bounded::<()>(0);
        let ran = Arc::new(AtomicUsize::new(0));

        assert!(executor.submit(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        }));
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            assert!(executor.submit(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let started = Instant::now();
        executor.shutdown();
        let elapsed = started.elapsed();
        assert!(elapsed >= SHUTDOWN_GRACE);
        assert!(elapsed < SHUTDOWN_GRACE + Duration::from_secs(1), "took {elapsed:?}");

        // the stuck job finishes later; the queue behind it is dropped
        release_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(!executor.submit(|| {}));
    }
}
