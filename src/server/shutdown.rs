//! Shutdown flag and managed worker set
//!
//! Every blocking wait in the reflector is a bounded-timeout poll that also
//! observes this flag; cancellation is cooperative, never a forced abort.
//! The one exception is a worker that misses the join deadline: it is
//! aborted and logged rather than allowed to block shutdown indefinitely.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Process-wide shutdown flag
///
/// Cheap to clone; `trigger` is idempotent and wakes every `wait`.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create an untriggered flag
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Flip the flag; safe to call more than once
    pub fn trigger(&self) {
        if !*self.tx.borrow() {
            let _ = self.tx.send(true);
            tracing::info!("Shutdown triggered");
        }
    }

    /// Non-blocking check
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve when the flag flips (immediately if it already has)
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        // Sender gone counts as shutdown
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Named, tracked execution units
///
/// Every spawned loop registers here so teardown can join each one with a
/// bounded wait.
#[derive(Debug, Default)]
pub struct WorkerSet {
    workers: Vec<(String, JoinHandle<()>)>,
}

impl WorkerSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn and track a worker
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        tracing::debug!(worker = %name, "Worker started");
        self.workers.push((name, tokio::spawn(future)));
    }

    /// Number of tracked workers
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// True when no worker is tracked
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Join every worker within `deadline` total
    ///
    /// A worker that fails to exit inside the remaining budget is aborted
    /// and logged; the count of such stragglers is returned. This method
    /// never waits longer than `deadline` overall.
    pub async fn join_all(&mut self, deadline: Duration) -> usize {
        let start = Instant::now();
        let mut stragglers = 0;

        for (name, handle) in self.workers.drain(..) {
            let remaining = deadline.saturating_sub(start.elapsed());
            let abort = handle.abort_handle();
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => {
                    tracing::debug!(worker = %name, "Worker joined");
                }
                Ok(Err(join_err)) => {
                    tracing::error!(worker = %name, error = %join_err, "Worker terminated abnormally");
                }
                Err(_) => {
                    stragglers += 1;
                    tracing::warn!(worker = %name, "Worker missed join deadline, aborting");
                    abort.abort();
                }
            }
        }
        stragglers
    }
}
