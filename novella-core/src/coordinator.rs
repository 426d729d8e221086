//! The turn coordinator: the two-phase `start` / `choose` protocol.
//!
//! Each turn is exactly one read-modify-write cycle against the session
//! store, performed under the store's per-key lock. Nothing is committed
//! when a fatal error happens mid-turn, so a failed turn can be retried
//! by the caller as-is.

use crate::assets::AssetCoordinator;
use crate::narrator::{
    EndingEvaluator, GenerationError, SceneDraft, SceneGenerator, StoryFrameGenerator,
};
use crate::store::{SessionStore, StoreError};
use crate::story::{
    Ending, Phase, Scene, SessionKey, StoryFrame, UserChoice, UserState,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

/// Fatal turn failures, surfaced to the caller as typed errors.
///
/// Asset trouble never appears here; failed asset branches degrade to
/// absent references instead.
#[derive(Debug, Error)]
pub enum TurnError {
    /// Invalid state transition or missing required field. The session
    /// itself is untouched.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// The model failed to produce a usable structured result after the
    /// allowed retry. The session state is unmodified.
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// The session store backend is unavailable. No mutation is assumed
    /// to have occurred.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// One turn request: either the opening move or a choice.
///
/// Modeled as a tagged union so a request can never carry both start
/// parameters and a choice.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum TurnRequest {
    Start {
        setting: String,
        character: BTreeMap<String, String>,
        genre: String,
    },
    Choose {
        choice_text: String,
    },
}

/// A scene response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ScenePayload {
    pub scene: Scene,
    pub game_over: bool,
}

/// A terminal response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct EndingPayload {
    pub ending: Ending,
    pub image: Option<String>,
    pub game_over: bool,
}

/// What a successful turn hands back to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TurnOutcome {
    Scene(ScenePayload),
    Ended(EndingPayload),
}

impl TurnOutcome {
    fn scene(scene: Scene) -> Self {
        Self::Scene(ScenePayload {
            scene,
            game_over: false,
        })
    }

    fn ended(ending: Ending, image: Option<String>) -> Self {
        Self::Ended(EndingPayload {
            ending,
            image,
            game_over: true,
        })
    }

    /// The scene, when the game continues.
    pub fn as_scene(&self) -> Option<&Scene> {
        match self {
            Self::Scene(payload) => Some(&payload.scene),
            Self::Ended(_) => None,
        }
    }

    /// The ending, when the game is over.
    pub fn as_ending(&self) -> Option<&EndingPayload> {
        match self {
            Self::Scene(_) => None,
            Self::Ended(payload) => Some(payload),
        }
    }

    pub fn game_over(&self) -> bool {
        matches!(self, Self::Ended(_))
    }
}

/// Tunables for the coordinator.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Upper bound on each individual generation call. A timeout maps to
    /// a generation failure, never to a different state transition.
    pub generation_timeout: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(120),
        }
    }
}

/// Orchestrates story generation, per-session persistence, ending
/// detection, and asset fan-out for the turn protocol.
pub struct TurnCoordinator {
    store: Arc<dyn SessionStore>,
    frames: Arc<dyn StoryFrameGenerator>,
    scenes: Arc<dyn SceneGenerator>,
    endings: Arc<dyn EndingEvaluator>,
    assets: AssetCoordinator,
    config: TurnConfig,
}

impl TurnCoordinator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        frames: Arc<dyn StoryFrameGenerator>,
        scenes: Arc<dyn SceneGenerator>,
        endings: Arc<dyn EndingEvaluator>,
        assets: AssetCoordinator,
    ) -> Self {
        Self {
            store,
            frames,
            scenes,
            endings,
            assets,
            config: TurnConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TurnConfig) -> Self {
        self.config = config;
        self
    }

    /// Route a [`TurnRequest`] to the matching transition.
    pub async fn dispatch(
        &self,
        key: &SessionKey,
        request: TurnRequest,
    ) -> Result<TurnOutcome, TurnError> {
        match request {
            TurnRequest::Start {
                setting,
                character,
                genre,
            } => self.start(key, &setting, &character, &genre).await,
            TurnRequest::Choose { choice_text } => self.choose(key, &choice_text).await,
        }
    }

    /// Opening transition: create the story frame and the first scene.
    ///
    /// Valid only for an empty session; a session that already has a
    /// story frame must be reset first.
    pub async fn start(
        &self,
        key: &SessionKey,
        setting: &str,
        character: &BTreeMap<String, String>,
        genre: &str,
    ) -> Result<TurnOutcome, TurnError> {
        validate_start(setting, character, genre)?;

        let _guard = self.store.lock(key).await;
        let mut state = self.store.get(key).await?;
        if state.phase() != Phase::AwaitingStart {
            return Err(TurnError::Precondition(
                "session already started; reset it before starting again".to_string(),
            ));
        }

        info!(%key, genre, "starting session");
        let frame = self
            .bounded(self.frames.create(setting, character, genre))
            .await?;
        if frame.endings.is_empty() {
            // No ending would ever be reachable; refuse to commit the frame.
            return Err(GenerationError::NoEndings.into());
        }
        if !has_both_ending_kinds(&frame) {
            warn!(%key, "story frame is missing a good or bad ending");
        }

        let scene = self.generate_scene(&frame, &[], None).await?;
        let assets = self.assets.attach(key, &scene.description, None).await;

        let mut scene = scene;
        scene.image = assets.image;
        scene.music = assets.music;

        state.story_frame = Some(frame);
        state.push_scene(scene.clone());
        self.store.set(key, state).await?;

        Ok(TurnOutcome::scene(scene))
    }

    /// Advancing transition: record the choice, re-check endings, and
    /// either finish the story or render the next scene.
    pub async fn choose(
        &self,
        key: &SessionKey,
        choice_text: &str,
    ) -> Result<TurnOutcome, TurnError> {
        if choice_text.trim().is_empty() {
            return Err(TurnError::Precondition(
                "choice_text must not be empty".to_string(),
            ));
        }

        let _guard = self.store.lock(key).await;
        let mut state = self.store.get(key).await?;
        match state.phase() {
            Phase::AwaitingStart => {
                return Err(TurnError::Precondition(
                    "session has no story yet; call start first".to_string(),
                ))
            }
            Phase::Ended => {
                return Err(TurnError::Precondition(
                    "session has ended; reset it to play again".to_string(),
                ))
            }
            Phase::InProgress => {}
        }

        let frame = state
            .story_frame
            .clone()
            .ok_or_else(|| TurnError::Precondition("session has no story frame".to_string()))?;
        let current_scene_id = state.current_scene_id.ok_or_else(|| {
            TurnError::Precondition("session has no active scene".to_string())
        })?;

        // Candidate history including this turn's choice. Committed only
        // after the whole turn has succeeded.
        let mut history = state.user_choices.clone();
        history.push(UserChoice::now(current_scene_id, choice_text));

        let check = self.bounded(self.endings.check(&frame, &history)).await?;
        if check.reached {
            let ending = resolve_ending(check.ending, &frame)?;
            info!(%key, ending = %ending.id, "ending reached");

            let image = self.assets.attach_ending(&ending).await;
            self.assets.music().shutdown(key).await;

            state.user_choices = history;
            state.ending = Some(ending.clone());
            self.store.set(key, state).await?;

            return Ok(TurnOutcome::ended(ending, image));
        }

        let scene = self
            .generate_scene(&frame, &history, Some(choice_text))
            .await?;
        let previous_image = state.assets.get(&current_scene_id).cloned();
        let assets = self
            .assets
            .attach(key, &scene.description, previous_image.as_deref())
            .await;

        let mut scene = scene;
        scene.image = assets.image;
        scene.music = assets.music;

        state.user_choices = history;
        state.push_scene(scene.clone());
        self.store.set(key, state).await?;

        Ok(TurnOutcome::scene(scene))
    }

    /// Wipe the session and tear down its music stream. Idempotent.
    pub async fn reset(&self, key: &SessionKey) -> Result<(), TurnError> {
        let _guard = self.store.lock(key).await;
        self.store.reset(key).await?;
        self.assets.music().shutdown(key).await;
        info!(%key, "session reset");
        Ok(())
    }

    /// Read the current session state (for UIs and tests).
    pub async fn state(&self, key: &SessionKey) -> Result<UserState, TurnError> {
        Ok(self.store.get(key).await?)
    }

    /// Generate the next scene, enforcing the exactly-two-choices rule:
    /// one retry with a strengthened instruction, then fail the turn.
    /// This is deliberately distinct from the asset fan-out's no-retry
    /// policy.
    async fn generate_scene(
        &self,
        frame: &StoryFrame,
        history: &[UserChoice],
        last_choice: Option<&str>,
    ) -> Result<Scene, TurnError> {
        let mut draft = self
            .bounded(self.scenes.next(frame, history, last_choice, false))
            .await?;

        if draft.choices.len() < 2 {
            warn!(
                got = draft.choices.len(),
                "scene draft came back short; retrying once"
            );
            draft = self
                .bounded(self.scenes.next(frame, history, last_choice, true))
                .await?;
        }

        if draft.choices.len() < 2 {
            return Err(GenerationError::TooFewChoices {
                got: draft.choices.len(),
            }
            .into());
        }

        let SceneDraft {
            description,
            mut choices,
        } = draft;
        choices.truncate(2);
        Ok(Scene::new(description, choices))
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, GenerationError>>,
    ) -> Result<T, TurnError> {
        match timeout(self.config.generation_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(GenerationError::Timeout.into()),
        }
    }
}

fn validate_start(
    setting: &str,
    character: &BTreeMap<String, String>,
    genre: &str,
) -> Result<(), TurnError> {
    if setting.trim().is_empty() {
        return Err(TurnError::Precondition(
            "setting must not be empty".to_string(),
        ));
    }
    if genre.trim().is_empty() {
        return Err(TurnError::Precondition(
            "genre must not be empty".to_string(),
        ));
    }
    if character.is_empty() {
        return Err(TurnError::Precondition(
            "character must have at least one attribute".to_string(),
        ));
    }
    if character.iter().any(|(k, v)| k.trim().is_empty() || v.trim().is_empty()) {
        return Err(TurnError::Precondition(
            "character attributes must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn has_both_ending_kinds(frame: &StoryFrame) -> bool {
    use crate::story::EndingKind;
    frame.endings.iter().any(|e| e.kind == EndingKind::Good)
        && frame.endings.iter().any(|e| e.kind == EndingKind::Bad)
}

/// Validate the evaluator's verdict against the frame and backfill a
/// missing description from the frame's matching ending.
fn resolve_ending(ending: Option<Ending>, frame: &StoryFrame) -> Result<Ending, TurnError> {
    let mut ending = ending.ok_or(GenerationError::MissingEnding)?;
    let defined = frame
        .ending_by_id(&ending.id)
        .ok_or_else(|| GenerationError::UnknownEnding(ending.id.clone()))?;
    if ending.description.is_none() {
        ending.description = defined.description.clone();
    }
    Ok(ending)
}
