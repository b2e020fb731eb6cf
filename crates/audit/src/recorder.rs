//! Asynchronous audit recorder.
//!
//! Mutating operations hand their entry to `AuditRecorder::record` and move
//! on; a background thread drains the queue into the sink. The only failure
//! the recorder reacts to is `UnknownUser` (the acting user was removed
//! between the operation and the write), which is retried exactly once with
//! a null user reference. Everything else is logged and swallowed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock, mpsc};
use std::thread;

use thiserror::Error;
use tracing::{debug, warn};

use apotheca_core::UserId;

use crate::entry::AuditEntry;

/// Audit write failure, as reported by the sink.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditSinkError {
    /// The entry references a user that no longer exists.
    #[error("unknown user")]
    UnknownUser,

    /// Any other write failure (storage, transport).
    #[error("audit write failed: {0}")]
    WriteFailed(String),
}

/// External collaborator that persists audit entries.
pub trait AuditSink: Send + Sync + 'static {
    fn log(&self, entry: &AuditEntry) -> Result<(), AuditSinkError>;
}

impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn log(&self, entry: &AuditEntry) -> Result<(), AuditSinkError> {
        (**self).log(entry)
    }
}

/// Fire-and-forget audit queue.
#[derive(Debug, Clone)]
pub struct AuditRecorder {
    tx: mpsc::Sender<AuditEntry>,
}

/// Handle to the recorder's worker thread.
///
/// Dropping the last `AuditRecorder` clone closes the channel; `shutdown`
/// waits for the queue to drain first.
#[derive(Debug)]
pub struct AuditRecorderHandle {
    join: Option<thread::JoinHandle<()>>,
}

impl AuditRecorderHandle {
    /// Wait for the worker to finish draining.
    ///
    /// All `AuditRecorder` clones must be dropped first, otherwise the worker
    /// keeps waiting for more entries.
    pub fn shutdown(mut self) {
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl AuditRecorder {
    /// Spawn the recorder with its worker thread.
    pub fn spawn<S: AuditSink>(sink: S) -> (Self, AuditRecorderHandle) {
        let (tx, rx) = mpsc::channel::<AuditEntry>();

        let join = thread::Builder::new()
            .name("audit-recorder".to_string())
            .spawn(move || {
                // Drains until every sender is dropped.
                for entry in rx {
                    deliver(&sink, entry);
                }
                debug!("audit recorder drained and stopped");
            })
            .expect("failed to spawn audit-recorder thread");

        (Self { tx }, AuditRecorderHandle { join: Some(join) })
    }

    /// Enqueue an entry without waiting for the write.
    ///
    /// Never fails the caller: if the worker is gone the entry is dropped
    /// with a warning.
    pub fn record(&self, entry: AuditEntry) {
        if self.tx.send(entry).is_err() {
            warn!("audit recorder is stopped; dropping audit entry");
        }
    }
}

fn deliver<S: AuditSink>(sink: &S, entry: AuditEntry) {
    match sink.log(&entry) {
        Ok(()) => {}
        Err(AuditSinkError::UnknownUser) => {
            // The acting user disappeared; keep the record, drop the actor.
            let mut anonymous = entry;
            anonymous.user_id = None;
            if let Err(e) = sink.log(&anonymous) {
                warn!(error = %e, "audit retry with null user failed; dropping entry");
            }
        }
        Err(e) => {
            warn!(error = %e, "audit write failed; dropping entry");
        }
    }
}

/// In-memory sink for tests/dev.
///
/// Can be scripted to reject specific user ids with `UnknownUser` so the
/// retry path is testable.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    entries: RwLock<Vec<AuditEntry>>,
    unknown_users: Mutex<HashSet<UserId>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `user_id` as removed: writes attributed to it fail with
    /// `UnknownUser`.
    pub fn forget_user(&self, user_id: UserId) {
        if let Ok(mut set) = self.unknown_users.lock() {
            set.insert(user_id);
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.read() {
            Ok(all) => all.clone(),
            Err(_) => vec![],
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn log(&self, entry: &AuditEntry) -> Result<(), AuditSinkError> {
        if let Some(user_id) = entry.user_id {
            let unknown = self
                .unknown_users
                .lock()
                .map(|set| set.contains(&user_id))
                .unwrap_or(false);
            if unknown {
                return Err(AuditSinkError::UnknownUser);
            }
        }

        self.entries
            .write()
            .map_err(|_| AuditSinkError::WriteFailed("lock poisoned".to_string()))?
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuditAction;
    use chrono::Utc;
    use uuid::Uuid;

    fn entry(user_id: Option<UserId>) -> AuditEntry {
        AuditEntry::new(
            "batch",
            Uuid::now_v7(),
            AuditAction::Update,
            user_id,
            "inbound of 5 units recorded",
            Utc::now(),
        )
    }

    #[test]
    fn entries_are_delivered_to_the_sink() {
        let sink = Arc::new(InMemoryAuditSink::new());
        let (recorder, handle) = AuditRecorder::spawn(sink.clone());

        recorder.record(entry(Some(UserId::new())));
        recorder.record(entry(None));

        drop(recorder);
        handle.shutdown();

        assert_eq!(sink.entries().len(), 2);
    }

    #[test]
    fn unknown_user_is_retried_once_with_null_user() {
        let sink = Arc::new(InMemoryAuditSink::new());
        let removed = UserId::new();
        sink.forget_user(removed);

        let (recorder, handle) = AuditRecorder::spawn(sink.clone());
        recorder.record(entry(Some(removed)));

        drop(recorder);
        handle.shutdown();

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user_id, None);
        assert_eq!(entries[0].summary, "inbound of 5 units recorded");
    }

    #[test]
    fn record_returns_before_the_write_is_confirmed() {
        // A sink that blocks until we let it through.
        struct GatedSink {
            gate: Arc<(Mutex<bool>, std::sync::Condvar)>,
            inner: Arc<InMemoryAuditSink>,
        }
        impl AuditSink for GatedSink {
            fn log(&self, entry: &AuditEntry) -> Result<(), AuditSinkError> {
                let (lock, cvar) = &*self.gate;
                let mut open = lock.lock().unwrap();
                while !*open {
                    open = cvar.wait(open).unwrap();
                }
                self.inner.log(entry)
            }
        }

        let gate = Arc::new((Mutex::new(false), std::sync::Condvar::new()));
        let inner = Arc::new(InMemoryAuditSink::new());
        let (recorder, handle) = AuditRecorder::spawn(GatedSink {
            gate: gate.clone(),
            inner: inner.clone(),
        });

        // Returns immediately even though the sink is blocked.
        recorder.record(entry(None));
        assert!(inner.entries().is_empty());

        // Open the gate and drain.
        {
            let (lock, cvar) = &*gate;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }
        drop(recorder);
        handle.shutdown();
        assert_eq!(inner.entries().len(), 1);
    }
}
