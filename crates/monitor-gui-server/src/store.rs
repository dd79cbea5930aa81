//! In-memory session store.
//!
//! The store maps session ids to slots. A slot owns the session payload
//! behind its own async mutex, so the per-session lock lives exactly as long
//! as the slot and can't be lost in serialization. The structural lock
//! around the map is a plain mutex held only while the map is touched,
//! never across an await or a handler call.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use monitor_gui_core::{ClientIdentity, SessionId, SessionState, SessionStorage};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, instrument};

use crate::lifecycle;
use crate::persister::Persister;

/// Sessions untouched for this long are dropped from memory.
pub const IDLE_EVICTION: Duration = Duration::from_secs(900);

/// Stable home of one in-memory session.
pub struct SessionSlot {
    id: SessionId,
    client_identity: ClientIdentity,
    /// Mirror of `last_access_time` readable without the session lock.
    last_access_ms: AtomicI64,
    state: Arc<AsyncMutex<SessionState>>,
}

impl SessionSlot {
    fn new(state: SessionState) -> Arc<Self> {
        Arc::new(Self {
            id: state.id().clone(),
            client_identity: state.client_identity().clone(),
            last_access_ms: AtomicI64::new(state.last_access_time.timestamp_millis()),
            state: Arc::new(AsyncMutex::new(state)),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn client_identity(&self) -> &ClientIdentity {
        &self.client_identity
    }

    pub fn last_access_ms(&self) -> i64 {
        self.last_access_ms.load(Ordering::Acquire)
    }

    fn is_locked(&self) -> bool {
        self.state.try_lock().is_err()
    }
}

/// Exclusive access to a session. Dropping the guard releases the lock.
pub struct SessionGuard {
    slot: Arc<SessionSlot>,
    state: OwnedMutexGuard<SessionState>,
}

impl SessionGuard {
    pub fn slot(&self) -> &Arc<SessionSlot> {
        &self.slot
    }

    /// Put the slot's id and identity back if a handler swapped the state
    /// for one bound elsewhere. Returns false if the binding had changed.
    pub fn restore_binding(&mut self) -> bool {
        if self.state.is_bound_to(&self.slot.id, &self.slot.client_identity) {
            return true;
        }
        let state = std::mem::replace(&mut *self.state, placeholder(&self.slot));
        *self.state = rebound(state, &self.slot.id, &self.slot.client_identity);
        false
    }
}

fn placeholder(slot: &SessionSlot) -> SessionState {
    SessionState::new(
        slot.id.clone(),
        slot.client_identity.clone(),
        String::new(),
        String::new(),
    )
}

/// Re-stamp `state` with `id` and `client_identity`, keeping every other
/// field. A state already bound to them is returned as is.
pub(crate) fn rebound(
    state: SessionState,
    id: &SessionId,
    client_identity: &ClientIdentity,
) -> SessionState {
    if state.is_bound_to(id, client_identity) {
        return state;
    }
    error!(
        "Session {} was rebound to {} by {}; restoring",
        id,
        state.id(),
        state.client_identity()
    );
    let mut restored = SessionState::new(
        id.clone(),
        client_identity.clone(),
        state.user_label,
        state.workspace_name,
    );
    restored.is_public = state.is_public;
    restored.last_access_time = state.last_access_time;
    restored.extension_fields = state.extension_fields;
    restored
}

impl Deref for SessionGuard {
    type Target = SessionState;

    fn deref(&self) -> &SessionState {
        &self.state
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }
}

pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, Arc<SessionSlot>>>,
    storage: Arc<dyn SessionStorage>,
    persister: Arc<Persister>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SessionStorage>, persister: Arc<Persister>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            storage,
            persister,
        }
    }

    /// Every critical section leaves the map consistent, so a poisoned lock
    /// is still usable.
    fn map(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<SessionSlot>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find the session `raw_id` for `requester`, reloading it from durable
    /// storage on a memory miss.
    ///
    /// Returns `None` for a malformed id, an unknown or unreadable session,
    /// or a session bound to a different client identity.
    #[instrument(skip(self, requester), level = "debug")]
    pub async fn get(&self, raw_id: &str, requester: &ClientIdentity) -> Option<Arc<SessionSlot>> {
        let id = match SessionId::parse(raw_id) {
            Ok(id) => id,
            Err(e) => {
                debug!("Rejected session lookup: {}", e);
                return None;
            }
        };

        let cached = self.map().get(&id).cloned();
        let slot = match cached {
            Some(slot) => slot,
            None => {
                let state = lifecycle::reload(self.storage.as_ref(), &id).await?;
                self.insert_reloaded(state)
            }
        };

        if slot.client_identity != *requester {
            debug!("Session {} does not belong to {}", id, requester);
            return None;
        }
        Some(slot)
    }

    /// Another request may have reloaded the same session meanwhile; the
    /// first slot in the map wins.
    fn insert_reloaded(&self, state: SessionState) -> Arc<SessionSlot> {
        self.map()
            .entry(state.id().clone())
            .or_insert_with(|| SessionSlot::new(state))
            .clone()
    }

    /// Acquire the session lock, waiting for the current holder if any.
    ///
    /// If the slot was evicted and replaced while waiting, the lock is taken
    /// on the replacement so two requests never hold different slots of one
    /// session.
    pub async fn lock(&self, slot: Arc<SessionSlot>) -> SessionGuard {
        let mut slot = slot;
        loop {
            let mut state = slot.state.clone().lock_owned().await;
            let current = self
                .map()
                .entry(slot.id.clone())
                .or_insert_with(|| slot.clone())
                .clone();
            if Arc::ptr_eq(&current, &slot) {
                let now = Utc::now();
                state.touch(now);
                slot.last_access_ms.store(now.timestamp_millis(), Ordering::Release);
                return SessionGuard { slot, state };
            }
            drop(state);
            slot = current;
        }
    }

    /// Insert a session and queue its write.
    ///
    /// A session already in memory is overwritten in place under its own
    /// lock, waiting for any handler still holding it. The existing slot
    /// keeps its id and client identity.
    pub async fn put(&self, state: SessionState) -> Arc<SessionSlot> {
        let candidate = SessionSlot::new(state.clone());
        let current = self
            .map()
            .entry(state.id().clone())
            .or_insert_with(|| candidate.clone())
            .clone();
        if Arc::ptr_eq(&current, &candidate) {
            self.persister.enqueue(state);
            return current;
        }

        let mut guard = self.lock(current).await;
        *guard = state;
        let accessed = guard.last_access_time.timestamp_millis();
        guard.slot.last_access_ms.store(accessed, Ordering::Release);
        self.save(&mut guard);
        guard.slot.clone()
    }

    /// Mark a locked session dirty: queue a copy of it for writing.
    ///
    /// The copy always carries the slot's id and client identity.
    pub fn save(&self, guard: &mut SessionGuard) {
        guard.restore_binding();
        self.map()
            .entry(guard.slot.id.clone())
            .or_insert_with(|| guard.slot.clone());
        self.persister.enqueue(SessionState::clone(guard));
    }

    /// Drop sessions idle for longer than `threshold` from memory.
    pub fn evict_idle(&self, threshold: Duration) -> usize {
        self.evict_idle_at(Utc::now(), threshold)
    }

    /// Drop sessions whose last access is older than `now - threshold`.
    ///
    /// Sessions currently locked by a handler are kept. Durable copies are
    /// not touched.
    pub fn evict_idle_at(&self, now: DateTime<Utc>, threshold: Duration) -> usize {
        let threshold_ms = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.timestamp_millis().saturating_sub(threshold_ms);

        let mut map = self.map();
        let before = map.len();
        map.retain(|_, slot| slot.last_access_ms() >= cutoff || slot.is_locked());
        let evicted = before - map.len();
        if evicted > 0 {
            info!("Evicted {} idle sessions ({} remain)", evicted, map.len());
        }
        evicted
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.map().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}
