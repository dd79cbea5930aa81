use async_trait::async_trait;

use crate::error::StorageError;
use crate::session::{SessionId, SessionState};

/// Durable storage for session snapshots.
///
/// A snapshot visible through `load` is always a complete, previously
/// committed write; implementations must never expose a partial write.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Allocate a new session id that no other server sharing this storage
    /// can allocate.
    async fn allocate_id(&self) -> Result<SessionId, StorageError>;

    /// Load the committed snapshot for `id`.
    ///
    /// # Returns
    /// `Ok(None)` if no snapshot exists.
    async fn load(&self, id: &SessionId) -> Result<Option<SessionState>, StorageError>;

    /// Durably replace the snapshot for `snapshot.id`.
    async fn save(&self, snapshot: &SessionState) -> Result<(), StorageError>;
}
