//! Expiry-scan background worker.
//!
//! Owns the scan schedule: one scan on spawn, then one per interval, with a
//! graceful shutdown channel. The scan callback itself (the stock service)
//! is single-flight, so a slow scan and the next tick cannot overlap.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct ExpiryScanWorkerConfig {
    /// Time between scans.
    pub interval: Duration,
    /// Name for logging and the thread.
    pub name: String,
}

impl Default for ExpiryScanWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            name: "expiry-scan".to_string(),
        }
    }
}

impl ExpiryScanWorkerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct ExpiryScanWorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl ExpiryScanWorkerHandle {
    /// Request graceful shutdown and wait for the thread to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Background worker driving the expiry scan.
pub struct ExpiryScanWorker {
    scan: Box<dyn Fn(NaiveDate) -> bool + Send>,
}

impl ExpiryScanWorker {
    /// The callback receives today's date and reports whether it actually
    /// scanned (false when it lost the single-flight race).
    pub fn new(scan: impl Fn(NaiveDate) -> bool + Send + 'static) -> Self {
        Self {
            scan: Box::new(scan),
        }
    }

    /// Spawn the worker thread: scan once immediately, then per interval.
    pub fn spawn(self, config: ExpiryScanWorkerConfig) -> ExpiryScanWorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || {
                info!(name = %config.name, interval_secs = config.interval.as_secs(), "expiry scan worker started");

                // Startup scan: a crash between a commit and its evaluation
                // only delays alerts until here.
                (self.scan)(Utc::now().date_naive());

                loop {
                    match shutdown_rx.recv_timeout(config.interval) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                            debug!(name = %config.name, "expiry scan worker stopping");
                            break;
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            (self.scan)(Utc::now().date_naive());
                        }
                    }
                }
            })
            .expect("failed to spawn expiry scan worker thread");

        ExpiryScanWorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn scans_once_at_startup() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        let worker = ExpiryScanWorker::new(move |_today| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            true
        });
        let handle = worker.spawn(
            ExpiryScanWorkerConfig::default().with_interval(Duration::from_secs(3600)),
        );

        // The startup scan runs before the first interval wait.
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while count.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);

        handle.shutdown();
    }

    #[test]
    fn ticks_on_the_interval_until_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        let worker = ExpiryScanWorker::new(move |_today| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            true
        });
        let handle = worker.spawn(
            ExpiryScanWorkerConfig::default()
                .with_interval(Duration::from_millis(20))
                .with_name("expiry-scan-test"),
        );

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while count.load(Ordering::SeqCst) < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        handle.shutdown();

        // Startup scan + at least two ticks.
        assert!(count.load(Ordering::SeqCst) >= 3);
    }
}
