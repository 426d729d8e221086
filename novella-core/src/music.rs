//! Background music streams, keyed by session id.
//!
//! A music stream outlives the turn that started it and is tracked
//! separately from `UserState`. The registry knows which sessions have a
//! live stream so `change_tone` only goes to active ones, and so reset
//! or an ending can tear the stream down instead of leaking it.

use crate::assets::AssetError;
use crate::narrator::GenerationError;
use crate::story::SessionKey;
use async_trait::async_trait;
use gemini::{Gemini, Request};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Turns a scene description into a tone prompt for the music model.
#[async_trait]
pub trait MusicDirector: Send + Sync {
    async fn tone(&self, scene_description: &str) -> Result<String, GenerationError>;
}

/// Opaque music generation backend: start/retune/stop a per-session
/// stream. Implementations own the actual audio plumbing.
#[async_trait]
pub trait MusicBackend: Send + Sync {
    async fn start(&self, key: &SessionKey, tone: &str) -> Result<(), AssetError>;
    async fn change_tone(&self, key: &SessionKey, tone: &str) -> Result<(), AssetError>;
    async fn stop(&self, key: &SessionKey) -> Result<(), AssetError>;
}

/// Backend that plays nothing and merely logs. Used when no audio
/// backend is wired up, and in tests.
#[derive(Debug, Default)]
pub struct SilentMusic;

#[async_trait]
impl MusicBackend for SilentMusic {
    async fn start(&self, key: &SessionKey, tone: &str) -> Result<(), AssetError> {
        debug!(%key, tone, "silent backend: start");
        Ok(())
    }

    async fn change_tone(&self, key: &SessionKey, tone: &str) -> Result<(), AssetError> {
        debug!(%key, tone, "silent backend: change tone");
        Ok(())
    }

    async fn stop(&self, key: &SessionKey) -> Result<(), AssetError> {
        debug!(%key, "silent backend: stop");
        Ok(())
    }
}

/// Tracks which sessions currently have a live stream.
pub struct MusicSessions {
    backend: Arc<dyn MusicBackend>,
    active: Mutex<HashSet<SessionKey>>,
}

impl MusicSessions {
    pub fn new(backend: Arc<dyn MusicBackend>) -> Self {
        Self {
            backend,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Point the session's stream at a new tone, starting the stream if
    /// the session does not have one yet.
    ///
    /// Membership is resolved under the registry lock, but the backend
    /// call itself happens after the lock is released so a slow backend
    /// for one session cannot stall turns for other sessions.
    pub async fn retarget(&self, key: &SessionKey, tone: &str) -> Result<(), AssetError> {
        let fresh = self.active.lock().await.insert(key.clone());
        if fresh {
            match self.backend.start(key, tone).await {
                Ok(()) => {
                    info!(%key, "music stream started");
                    Ok(())
                }
                Err(e) => {
                    self.active.lock().await.remove(key);
                    Err(e)
                }
            }
        } else {
            self.backend.change_tone(key, tone).await
        }
    }

    /// Stop and forget the session's stream. Idempotent; a failing stop
    /// still drops the registration so nothing leaks.
    pub async fn shutdown(&self, key: &SessionKey) {
        let was_active = self.active.lock().await.remove(key);
        if was_active {
            if let Err(e) = self.backend.stop(key).await {
                warn!(%key, error = %e, "music stream stop failed");
            } else {
                info!(%key, "music stream stopped");
            }
        }
    }

    /// Whether the session currently has a live stream.
    pub async fn is_active(&self, key: &SessionKey) -> bool {
        self.active.lock().await.contains(key)
    }
}

/// Gemini-backed music director.
pub struct GeminiMusicDirector {
    client: Gemini,
}

impl GeminiMusicDirector {
    pub fn new(client: Gemini) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct MusicPrompt {
    prompt: String,
}

#[async_trait]
impl MusicDirector for GeminiMusicDirector {
    async fn tone(&self, scene_description: &str) -> Result<String, GenerationError> {
        let request = Request::new(scene_description)
            .with_system(include_str!("narrator/prompts/music_director.txt"))
            .with_temperature(0.1);
        let response: MusicPrompt = self.client.complete_json(request).await?;
        Ok(response.prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingBackend {
        starts: AtomicUsize,
        changes: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl MusicBackend for CountingBackend {
        async fn start(&self, _key: &SessionKey, _tone: &str) -> Result<(), AssetError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn change_tone(&self, _key: &SessionKey, _tone: &str) -> Result<(), AssetError> {
            self.changes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self, _key: &SessionKey) -> Result<(), AssetError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retarget_starts_then_changes() {
        let backend = Arc::new(CountingBackend::default());
        let sessions = MusicSessions::new(backend.clone());
        let key = SessionKey::from("s1");

        sessions.retarget(&key, "calm harp").await.unwrap();
        sessions.retarget(&key, "ominous drone").await.unwrap();

        assert_eq!(backend.starts.load(Ordering::SeqCst), 1);
        assert_eq!(backend.changes.load(Ordering::SeqCst), 1);
        assert!(sessions.is_active(&key).await);
    }

    struct SlowBackend {
        delay: std::time::Duration,
    }

    #[async_trait]
    impl MusicBackend for SlowBackend {
        async fn start(&self, _key: &SessionKey, _tone: &str) -> Result<(), AssetError> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }

        async fn change_tone(&self, _key: &SessionKey, _tone: &str) -> Result<(), AssetError> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }

        async fn stop(&self, _key: &SessionKey) -> Result<(), AssetError> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_sessions_retarget_concurrently() {
        let sessions = MusicSessions::new(Arc::new(SlowBackend {
            delay: std::time::Duration::from_millis(100),
        }));
        let a = SessionKey::from("a");
        let b = SessionKey::from("b");

        let started = tokio::time::Instant::now();
        let (ra, rb) = tokio::join!(
            sessions.retarget(&a, "calm harp"),
            sessions.retarget(&b, "war drums"),
        );
        ra.unwrap();
        rb.unwrap();
        let elapsed = started.elapsed();

        assert!(sessions.is_active(&a).await);
        assert!(sessions.is_active(&b).await);
        // Serialized sessions would need 200ms of virtual time.
        assert!(
            elapsed < std::time::Duration::from_millis(150),
            "elapsed {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_failed_start_leaves_session_inactive() {
        struct FailingStart;

        #[async_trait]
        impl MusicBackend for FailingStart {
            async fn start(&self, _key: &SessionKey, _tone: &str) -> Result<(), AssetError> {
                Err(AssetError::Io(std::io::Error::other("no audio device")))
            }

            async fn change_tone(&self, _key: &SessionKey, _tone: &str) -> Result<(), AssetError> {
                Ok(())
            }

            async fn stop(&self, _key: &SessionKey) -> Result<(), AssetError> {
                Ok(())
            }
        }

        let sessions = MusicSessions::new(Arc::new(FailingStart));
        let key = SessionKey::from("s1");

        assert!(sessions.retarget(&key, "calm harp").await.is_err());
        // The failed start is not left registered as a live stream.
        assert!(!sessions.is_active(&key).await);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let backend = Arc::new(CountingBackend::default());
        let sessions = MusicSessions::new(backend.clone());
        let key = SessionKey::from("s1");

        sessions.retarget(&key, "calm harp").await.unwrap();
        sessions.shutdown(&key).await;
        sessions.shutdown(&key).await;

        assert_eq!(backend.stops.load(Ordering::SeqCst), 1);
        assert!(!sessions.is_active(&key).await);
    }
}
