use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use monitor_gui_core::{SessionId, SessionState, SessionStorage, StorageError};
use tokio::fs;
use tracing::{debug, instrument};

/// Random characters in an allocated session id.
const ID_LENGTH: usize = 12;

/// Local filesystem session storage.
///
/// Layout:
/// ```text
/// {session_dir}/
///   {session_id}        # committed JSON snapshot
///   {session_id}.tmp    # staging file, only present during a write
/// ```
/// Session ids never contain `.`, so staging files can't collide with ids.
#[derive(Debug, Clone)]
pub struct LocalSessionStorage {
    dir: PathBuf,
}

impl LocalSessionStorage {
    /// Create a storage rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            StorageError::Io(format!(
                "Failed to create session directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the committed snapshot for `id`.
    pub fn session_path(&self, id: &SessionId) -> PathBuf {
        self.dir.join(id.as_str())
    }

    /// Path of the staging file for `id`.
    pub fn staging_path(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.tmp", id))
    }

    /// Serialize `snapshot` into its staging file.
    #[instrument(skip(self, snapshot), level = "debug", fields(session = %snapshot.id()))]
    pub async fn stage(&self, snapshot: &SessionState) -> Result<PathBuf, StorageError> {
        let data = serde_json::to_vec(snapshot)?;
        let staging = self.staging_path(snapshot.id());
        fs::write(&staging, &data).await.map_err(|e| {
            StorageError::Io(format!(
                "Failed to write staging file {}: {}",
                staging.display(),
                e
            ))
        })?;
        Ok(staging)
    }

    /// Move the staged snapshot for `id` over the committed one.
    #[instrument(skip(self), level = "debug")]
    pub async fn commit(&self, id: &SessionId) -> Result<(), StorageError> {
        let staging = self.staging_path(id);
        let path = self.session_path(id);
        replace_file(&staging, &path).await.map_err(|e| {
            StorageError::Rename(format!(
                "Failed to rename {} to {}: {}",
                staging.display(),
                path.display(),
                e
            ))
        })
    }
}

/// Rename `from` over `to`.
///
/// Unix rename replaces the target atomically, so the previous snapshot stays
/// readable until the new one is in place.
#[cfg(unix)]
async fn replace_file(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::rename(from, to).await
}

/// Rename `from` over `to`, removing an existing target first.
#[cfg(not(unix))]
async fn replace_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::remove_file(to).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => debug!("Could not remove {} before rename: {}", to.display(), e),
    }
    fs::rename(from, to).await
}

#[async_trait]
impl SessionStorage for LocalSessionStorage {
    #[instrument(skip(self), level = "debug")]
    async fn allocate_id(&self) -> Result<SessionId, StorageError> {
        let dir = self.dir.clone();
        // Create-exclusive placeholder file: the name is unique even across
        // processes sharing the directory.
        let path = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix("")
                .rand_bytes(ID_LENGTH)
                .tempfile_in(&dir)
                .and_then(|file| file.keep().map_err(|e| e.error))
                .map(|(_, path)| path)
        })
        .await
        .map_err(|e| StorageError::Io(format!("Id allocation task failed: {}", e)))??;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::Io(format!("Unusable session path {}", path.display())))?;
        let id = SessionId::parse(name).map_err(|e| StorageError::Io(e.to_string()))?;

        debug!("Allocated session id {}", id);
        Ok(id)
    }

    #[instrument(skip(self), level = "debug")]
    async fn load(&self, id: &SessionId) -> Result<Option<SessionState>, StorageError> {
        let path = self.session_path(id);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::Io(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let state: SessionState = serde_json::from_slice(&data)?;
        if state.id() != id {
            return Err(StorageError::InvalidSnapshot(format!(
                "{} holds session {}",
                path.display(),
                state.id()
            )));
        }
        Ok(Some(state))
    }

    #[instrument(skip(self, snapshot), level = "debug", fields(session = %snapshot.id()))]
    async fn save(&self, snapshot: &SessionState) -> Result<(), StorageError> {
        self.stage(snapshot).await?;
        self.commit(snapshot.id()).await?;
        debug!("Saved session {}", snapshot.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_gui_core::ClientIdentity;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn setup() -> (LocalSessionStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalSessionStorage::open(temp_dir.path().join("sessions")).unwrap();
        (storage, temp_dir)
    }

    fn snapshot(id: &SessionId, workspace: &str) -> SessionState {
        SessionState::new(
            id.clone(),
            ClientIdentity::new("10.0.0.1"),
            "Host 10.0.0.1".to_string(),
            workspace.to_string(),
        )
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (storage, _temp_dir) = setup();
        let id = storage.allocate_id().await.unwrap();

        let mut state = snapshot(&id, "Summary");
        state.set_extension("dqm.counter", 3);
        storage.save(&state).await.unwrap();

        let loaded = storage.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(!storage.staging_path(&id).exists());
    }

    #[tokio::test]
    async fn test_load_missing() {
        let (storage, _temp_dir) = setup();
        let id = SessionId::parse("nosuchsession").unwrap();
        assert!(storage.load(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_placeholder_is_error() {
        let (storage, _temp_dir) = setup();
        let id = storage.allocate_id().await.unwrap();

        // Allocation leaves an empty placeholder until the first write.
        let result = storage.load(&id).await;
        assert!(matches!(result, Err(StorageError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_load_rejects_foreign_snapshot() {
        let (storage, _temp_dir) = setup();
        let a = SessionId::parse("aaaa").unwrap();
        let b = SessionId::parse("bbbb").unwrap();
        storage.save(&snapshot(&a, "Summary")).await.unwrap();
        std::fs::copy(storage.session_path(&a), storage.session_path(&b)).unwrap();

        let result = storage.load(&b).await;
        assert!(matches!(result, Err(StorageError::InvalidSnapshot(_))));
    }

    #[tokio::test]
    async fn test_staging_leaves_committed_snapshot_intact() {
        let (storage, _temp_dir) = setup();
        let id = SessionId::parse("stable").unwrap();
        storage.save(&snapshot(&id, "Summary")).await.unwrap();

        storage.stage(&snapshot(&id, "Reports")).await.unwrap();
        let loaded = storage.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.workspace_name, "Summary");

        storage.commit(&id).await.unwrap();
        let loaded = storage.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.workspace_name, "Reports");
    }

    #[tokio::test]
    async fn test_commit_without_staging_fails() {
        let (storage, _temp_dir) = setup();
        let id = SessionId::parse("unstaged").unwrap();
        let result = storage.commit(&id).await;
        assert!(matches!(result, Err(StorageError::Rename(_))));
    }

    #[tokio::test]
    async fn test_allocated_ids_are_distinct_and_valid() {
        let (storage, _temp_dir) = setup();
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let id = storage.allocate_id().await.unwrap();
            assert_eq!(id.as_str().len(), ID_LENGTH);
            assert!(storage.session_path(&id).exists());
            assert!(seen.insert(id));
        }
    }
}
