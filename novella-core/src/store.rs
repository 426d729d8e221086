//! Keyed storage of per-session game state.
//!
//! The turn coordinator depends only on the three-operation contract here
//! (`get` / `set` / `reset`) plus `lock`, which hands out the per-key
//! guard that serializes one read-modify-write turn against concurrent
//! turns for the same session. Turns for different keys never contend.

use crate::story::{SessionKey, UserState};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Errors from session store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store backend unavailable: {0}")]
    Unavailable(String),
}

/// Pluggable keyed storage for [`UserState`].
///
/// `get` creates an empty state for unknown keys; `set` replaces the
/// whole state; `reset` replaces it with an empty one. Implementations
/// must make same-key `lock` calls mutually exclusive while leaving
/// different keys independent.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the state for `key`, creating an empty one if absent.
    async fn get(&self, key: &SessionKey) -> Result<UserState, StoreError>;

    /// Replace the state for `key` wholesale.
    async fn set(&self, key: &SessionKey, state: UserState) -> Result<(), StoreError>;

    /// Replace the state for `key` with an empty one. Idempotent.
    async fn reset(&self, key: &SessionKey) -> Result<(), StoreError>;

    /// Acquire the guard serializing read-modify-write cycles for `key`.
    async fn lock(&self, key: &SessionKey) -> OwnedMutexGuard<()>;
}

/// Per-key async lock registry shared by the store implementations.
#[derive(Default)]
struct LockRegistry {
    locks: StdMutex<HashMap<SessionKey, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    async fn acquire(&self, key: &SessionKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("lock registry poisoned");
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the key's lock entry if no guard or waiter still holds it.
    /// Keeps the registry from growing with every session key ever seen.
    fn evict(&self, key: &SessionKey) {
        let mut locks = self.locks.lock().expect("lock registry poisoned");
        if let Some(lock) = locks.get(key) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().expect("lock registry poisoned").len()
    }
}

/// In-process session store backed by a concurrent map.
#[derive(Default)]
pub struct MemoryStore {
    states: RwLock<HashMap<SessionKey, UserState>>,
    registry: LockRegistry,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, key: &SessionKey) -> Result<UserState, StoreError> {
        Ok(self
            .states
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn set(&self, key: &SessionKey, state: UserState) -> Result<(), StoreError> {
        self.states.write().await.insert(key.clone(), state);
        Ok(())
    }

    async fn reset(&self, key: &SessionKey) -> Result<(), StoreError> {
        self.states.write().await.remove(key);
        self.registry.evict(key);
        Ok(())
    }

    async fn lock(&self, key: &SessionKey) -> OwnedMutexGuard<()> {
        self.registry.acquire(key).await
    }
}

/// File-backed session store, one JSON document per key.
///
/// Suitable for a single process that wants sessions to survive restarts.
/// Backend trouble (unreadable directory, malformed file) surfaces as a
/// [`StoreError`] rather than silently losing state.
pub struct JsonStore {
    dir: PathBuf,
    registry: LockRegistry,
}

impl JsonStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            registry: LockRegistry::default(),
        })
    }

    /// Filename for a key. ASCII alphanumerics and `-` pass through;
    /// every other byte is escaped as `_XX` hex, so distinct keys never
    /// collide onto the same file.
    fn path_for(&self, key: &SessionKey) -> PathBuf {
        let mut name = String::with_capacity(key.as_str().len());
        for byte in key.as_str().bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                name.push(byte as char);
            } else {
                name.push_str(&format!("_{byte:02x}"));
            }
        }
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl SessionStore for JsonStore {
    async fn get(&self, key: &SessionKey) -> Result<UserState, StoreError> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UserState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &SessionKey, state: UserState) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(&state)?;
        fs::write(self.path_for(key), content).await?;
        Ok(())
    }

    async fn reset(&self, key: &SessionKey) -> Result<(), StoreError> {
        let result = match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        };
        self.registry.evict(key);
        result
    }

    async fn lock(&self, key: &SessionKey) -> OwnedMutexGuard<()> {
        self.registry.acquire(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::{Scene, SceneChoice, SceneId, UserChoice};
    use std::sync::Arc;

    fn sample_scene() -> Scene {
        Scene::new(
            "A crossroads at dusk.",
            vec![
                SceneChoice {
                    text: "Take the high road".to_string(),
                    next_scene_hint: "the cliffs".to_string(),
                },
                SceneChoice {
                    text: "Take the low road".to_string(),
                    next_scene_hint: "the marsh".to_string(),
                },
            ],
        )
    }

    #[tokio::test]
    async fn test_memory_get_creates_empty() {
        let store = MemoryStore::new();
        let key = SessionKey::from("alice");
        let state = store.get(&key).await.unwrap();
        assert_eq!(state, UserState::default());
    }

    #[tokio::test]
    async fn test_memory_set_get_reset() {
        let store = MemoryStore::new();
        let key = SessionKey::from("bob");

        let mut state = UserState::default();
        state.push_scene(sample_scene());
        store.set(&key, state.clone()).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), state);

        store.reset(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), UserState::default());

        // reset of an absent key is fine
        store.reset(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_same_key_read_modify_write_serializes() {
        let store = Arc::new(MemoryStore::new());
        let key = SessionKey::from("carol");

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = store.lock(&key).await;
                let mut state = store.get(&key).await.unwrap();
                // Force an await point inside the critical section.
                tokio::task::yield_now().await;
                state
                    .user_choices
                    .push(UserChoice::now(SceneId::new(), format!("choice {i}")));
                store.set(&key, state).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // With per-key serialization no increment is lost.
        assert_eq!(store.get(&key).await.unwrap().user_choices.len(), 16);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let store = Arc::new(MemoryStore::new());
        let a = SessionKey::from("a");
        let b = SessionKey::from("b");

        // Hold a's lock while taking b's; if keys contended this would hang.
        let _guard_a = store.lock(&a).await;
        let _guard_b = store.lock(&b).await;
    }

    #[tokio::test]
    async fn test_reset_evicts_idle_lock_entry() {
        let store = MemoryStore::new();
        let key = SessionKey::from("dave");

        drop(store.lock(&key).await);
        assert_eq!(store.registry.len(), 1);

        store.reset(&key).await.unwrap();
        assert_eq!(store.registry.len(), 0);

        // A held guard keeps the entry alive so exclusion still works.
        let guard = store.lock(&key).await;
        store.reset(&key).await.unwrap();
        assert_eq!(store.registry.len(), 1);
        drop(guard);
    }

    #[tokio::test]
    async fn test_distinct_keys_map_to_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).await.unwrap();
        let slash = SessionKey::from("a/b");
        let colon = SessionKey::from("a:b");

        assert_ne!(store.path_for(&slash), store.path_for(&colon));

        let mut state = UserState::default();
        state.push_scene(sample_scene());
        store.set(&slash, state.clone()).await.unwrap();

        // The sibling key still reads as empty.
        assert_eq!(store.get(&colon).await.unwrap(), UserState::default());
        assert_eq!(store.get(&slash).await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).await.unwrap();
        let key = SessionKey::from("user-1/with:odd chars");

        assert_eq!(store.get(&key).await.unwrap(), UserState::default());

        let mut state = UserState::default();
        state.push_scene(sample_scene());
        store.set(&key, state.clone()).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), state);

        store.reset(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), UserState::default());
    }
}
