//! Background writer for modified sessions.
//!
//! Saving a session on the request path would slow every call down, and a
//! session modified in a burst of asynchronous calls only needs its final
//! state on disk. Request handlers therefore hand a copy of the session to
//! the dirty queue, and a single background task writes the queued snapshots
//! about once a second. A forced kill can lose at most one cycle of updates;
//! a graceful shutdown drains the queue.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use monitor_gui_core::{SessionId, SessionState, SessionStorage};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Time between persistence cycles.
pub const PERSIST_INTERVAL: Duration = Duration::from_secs(1);

/// Sessions waiting to be written, keyed by id.
///
/// A newer snapshot for the same id replaces an older pending one.
#[derive(Debug, Default)]
pub struct DirtyQueue {
    pending: Mutex<HashMap<SessionId, SessionState>>,
}

impl DirtyQueue {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, SessionState>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, snapshot: SessionState) {
        self.lock().insert(snapshot.id().clone(), snapshot);
    }

    /// Put back a snapshot whose write failed, unless a newer one arrived.
    pub fn requeue(&self, snapshot: SessionState) {
        if let Entry::Vacant(slot) = self.lock().entry(snapshot.id().clone()) {
            slot.insert(snapshot);
        }
    }

    /// Swap the queue for an empty one.
    pub fn take(&self) -> HashMap<SessionId, SessionState> {
        mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PersisterState {
    Running,
    Stopping,
}

struct Shared {
    storage: Arc<dyn SessionStorage>,
    queue: DirtyQueue,
    /// Serializes write cycles so one id is never written by two cycles at once.
    cycle: AsyncMutex<()>,
}

impl Shared {
    /// Write every queued snapshot once. Returns the number requeued.
    async fn write_cycle(&self) -> usize {
        let _cycle = self.cycle.lock().await;
        let batch = self.queue.take();
        if batch.is_empty() {
            return 0;
        }

        let total = batch.len();
        let mut failed = 0;
        for (id, snapshot) in batch {
            if let Err(e) = self.storage.save(&snapshot).await {
                warn!("Failed to persist session {}, will retry: {}", id, e);
                self.queue.requeue(snapshot);
                failed += 1;
            }
        }
        debug!("Persisted {} of {} sessions", total - failed, total);
        failed
    }
}

/// Owner of the background persistence task.
pub struct Persister {
    shared: Arc<Shared>,
    state: watch::Sender<PersisterState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Persister {
    /// Start the persistence task. Must be called within a tokio runtime.
    pub fn spawn(storage: Arc<dyn SessionStorage>, interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            storage,
            queue: DirtyQueue::default(),
            cycle: AsyncMutex::new(()),
        });
        let (state, state_rx) = watch::channel(PersisterState::Running);
        let task = tokio::spawn(run(shared.clone(), interval, state_rx));
        info!("Session persister started (interval {:?})", interval);

        Self {
            shared,
            state,
            task: Mutex::new(Some(task)),
        }
    }

    /// Queue a copy of a session for writing. The persister owns the copy.
    pub fn enqueue(&self, snapshot: SessionState) {
        self.shared.queue.push(snapshot);
    }

    /// Number of snapshots waiting to be written.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Run one write cycle now. Returns the number of snapshots requeued.
    pub async fn flush(&self) -> usize {
        self.shared.write_cycle().await
    }

    /// Stop the task after a final drain of the queue.
    pub async fn shutdown(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else {
            return;
        };

        self.state.send_replace(PersisterState::Stopping);
        if let Err(e) = task.await {
            error!("Session persister task failed: {}", e);
        }
    }
}

async fn run(shared: Arc<Shared>, interval: Duration, mut state: watch::Receiver<PersisterState>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = state.changed() => {}
        }

        // Read the flag before draining: a stop requested during this cycle
        // gets one more full cycle for writes queued meanwhile.
        let stopping =
            *state.borrow_and_update() == PersisterState::Stopping || state.has_changed().is_err();

        shared.write_cycle().await;

        if stopping {
            let unflushed = shared.queue.len();
            if unflushed > 0 {
                error!("Session persister stopping with {} unwritten sessions", unflushed);
            }
            info!("Session persister stopped");
            break;
        }
    }
}
