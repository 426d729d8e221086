//! Testing utilities for the engine.
//!
//! This module provides scripted generators for deterministic tests
//! without API calls, plus a `TestHarness` wiring them into a real
//! `TurnCoordinator` over an in-memory store.

use crate::assets::{
    AssetCoordinator, AssetError, ImageDirector, ImageGenerator, ShotChange, ShotPlan,
};
use crate::coordinator::{TurnCoordinator, TurnError, TurnOutcome};
use crate::music::{MusicBackend, MusicDirector, MusicSessions, SilentMusic};
use crate::narrator::{
    EndingCheck, EndingEvaluator, GenerationError, SceneDraft, SceneGenerator,
    StoryFrameGenerator,
};
use crate::store::MemoryStore;
use crate::story::{
    Ending, EndingKind, Milestone, Phase, SceneChoice, SessionKey, StoryFrame, UserChoice,
    UserState,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A small but complete story frame for tests.
pub fn sample_frame() -> StoryFrame {
    let mut character = BTreeMap::new();
    character.insert("name".to_string(), "Al".to_string());

    StoryFrame {
        lore: "A forest where the dusk never lifts.".to_string(),
        goal: "Find the road out before the light dies.".to_string(),
        milestones: vec![
            Milestone {
                id: "m1".to_string(),
                description: "Find the ranger's cabin".to_string(),
            },
            Milestone {
                id: "m2".to_string(),
                description: "Cross the black river".to_string(),
            },
        ],
        endings: vec![
            Ending {
                id: "escape".to_string(),
                kind: EndingKind::Good,
                condition: "Reach the forest's edge".to_string(),
                description: Some("You step out into open country.".to_string()),
            },
            Ending {
                id: "lost".to_string(),
                kind: EndingKind::Bad,
                condition: "Wander until the light dies".to_string(),
                description: None,
            },
        ],
        setting: "dark forest".to_string(),
        character,
        genre: "horror".to_string(),
    }
}

/// A well-formed two-choice scene draft.
pub fn two_choice_draft(description: impl Into<String>) -> SceneDraft {
    SceneDraft {
        description: description.into(),
        choices: vec![
            SceneChoice {
                text: "Press on".to_string(),
                next_scene_hint: "deeper into the trees".to_string(),
            },
            SceneChoice {
                text: "Turn back".to_string(),
                next_scene_hint: "the way you came".to_string(),
            },
        ],
    }
}

/// A malformed draft with a single choice, for retry-policy tests.
pub fn one_choice_draft(description: impl Into<String>) -> SceneDraft {
    SceneDraft {
        description: description.into(),
        choices: vec![SceneChoice {
            text: "Press on".to_string(),
            next_scene_hint: "deeper into the trees".to_string(),
        }],
    }
}

/// Story frame generator returning a fixed frame.
pub struct StubFrames {
    frame: StoryFrame,
}

impl StubFrames {
    pub fn new(frame: StoryFrame) -> Self {
        Self { frame }
    }
}

#[async_trait]
impl StoryFrameGenerator for StubFrames {
    async fn create(
        &self,
        _setting: &str,
        _character: &BTreeMap<String, String>,
        _genre: &str,
    ) -> Result<StoryFrame, GenerationError> {
        Ok(self.frame.clone())
    }
}

/// Scene generator that replays queued drafts in order.
///
/// When the queue runs dry it returns a default two-choice draft, so
/// long scripted playthroughs do not need to queue every scene. Call
/// counts include retries.
pub struct ScriptedScenes {
    drafts: Mutex<VecDeque<SceneDraft>>,
    calls: AtomicUsize,
}

impl ScriptedScenes {
    pub fn new() -> Self {
        Self {
            drafts: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn queue(&self, draft: SceneDraft) {
        self.drafts
            .lock()
            .expect("scripted scenes poisoned")
            .push_back(draft);
    }

    /// Number of generation calls made so far, retries included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedScenes {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SceneGenerator for ScriptedScenes {
    async fn next(
        &self,
        _frame: &StoryFrame,
        history: &[UserChoice],
        _last_choice: Option<&str>,
        _escalate: bool,
    ) -> Result<SceneDraft, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let draft = self
            .drafts
            .lock()
            .expect("scripted scenes poisoned")
            .pop_front();
        Ok(draft.unwrap_or_else(|| two_choice_draft(format!("Scene after turn {}.", history.len()))))
    }
}

/// Ending evaluator that replays queued checks; reports "not reached"
/// once the queue is empty.
pub struct ScriptedEndings {
    results: Mutex<VecDeque<EndingCheck>>,
}

impl ScriptedEndings {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
        }
    }

    pub fn queue(&self, check: EndingCheck) {
        self.results
            .lock()
            .expect("scripted endings poisoned")
            .push_back(check);
    }
}

impl Default for ScriptedEndings {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EndingEvaluator for ScriptedEndings {
    async fn check(
        &self,
        _frame: &StoryFrame,
        _history: &[UserChoice],
    ) -> Result<EndingCheck, GenerationError> {
        let check = self
            .results
            .lock()
            .expect("scripted endings poisoned")
            .pop_front();
        Ok(check.unwrap_or_default())
    }
}

/// Image director that always asks for a full new shot.
pub struct StubDirector;

#[async_trait]
impl ImageDirector for StubDirector {
    async fn plan(&self, scene_description: &str) -> Result<ShotPlan, GenerationError> {
        Ok(ShotPlan {
            change: ShotChange::Full,
            prompt: Some(scene_description.to_string()),
        })
    }
}

/// Image generator that hands out numbered fake paths.
pub struct StubImages {
    generated: AtomicUsize,
}

impl StubImages {
    pub fn new() -> Self {
        Self {
            generated: AtomicUsize::new(0),
        }
    }
}

impl Default for StubImages {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageGenerator for StubImages {
    async fn generate(&self, _prompt: &str) -> Result<String, AssetError> {
        let n = self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(format!("stub/images/{n}.png"))
    }

    async fn modify(&self, _base: &str, _prompt: &str) -> Result<String, AssetError> {
        let n = self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(format!("stub/images/{n}-mod.png"))
    }
}

/// Music director returning a fixed tone.
pub struct StubMusicDirector;

#[async_trait]
impl MusicDirector for StubMusicDirector {
    async fn tone(&self, _scene_description: &str) -> Result<String, GenerationError> {
        Ok("quiet strings".to_string())
    }
}

/// Test harness wiring scripted generators into a real coordinator.
pub struct TestHarness {
    /// The coordinator under test.
    pub coordinator: TurnCoordinator,
    /// The backing store, for direct state inspection.
    pub store: Arc<MemoryStore>,
    /// The session key used by the convenience methods.
    pub key: SessionKey,
    /// Scene script.
    pub scenes: Arc<ScriptedScenes>,
    /// Ending script.
    pub endings: Arc<ScriptedEndings>,
    /// Music registry, for asserting stream lifecycle.
    pub music: Arc<MusicSessions>,
}

impl TestHarness {
    /// Harness with the sample frame.
    pub fn new() -> Self {
        Self::with_frame(sample_frame())
    }

    /// Harness with a custom story frame.
    pub fn with_frame(frame: StoryFrame) -> Self {
        let store = Arc::new(MemoryStore::new());
        let scenes = Arc::new(ScriptedScenes::new());
        let endings = Arc::new(ScriptedEndings::new());
        let backend: Arc<dyn MusicBackend> = Arc::new(SilentMusic);
        let music = Arc::new(MusicSessions::new(backend));

        let assets = AssetCoordinator::new(
            Arc::new(StubDirector),
            Arc::new(StubImages::new()),
            Arc::new(StubMusicDirector),
            Arc::clone(&music),
        );

        let store_dyn: Arc<dyn crate::store::SessionStore> = store.clone();
        let scenes_dyn: Arc<dyn SceneGenerator> = scenes.clone();
        let endings_dyn: Arc<dyn EndingEvaluator> = endings.clone();
        let coordinator = TurnCoordinator::new(
            store_dyn,
            Arc::new(StubFrames::new(frame)),
            scenes_dyn,
            endings_dyn,
            assets,
        );

        Self {
            coordinator,
            store,
            key: SessionKey::from("test-session"),
            scenes,
            endings,
            music,
        }
    }

    /// Start the session with the canonical inputs.
    pub async fn start(&self) -> Result<TurnOutcome, TurnError> {
        let mut character = BTreeMap::new();
        character.insert("name".to_string(), "Al".to_string());
        self.coordinator
            .start(&self.key, "dark forest", &character, "horror")
            .await
    }

    /// Make a choice on the harness session.
    pub async fn choose(&self, choice_text: &str) -> Result<TurnOutcome, TurnError> {
        self.coordinator.choose(&self.key, choice_text).await
    }

    /// Reset the harness session.
    pub async fn reset(&self) -> Result<(), TurnError> {
        self.coordinator.reset(&self.key).await
    }

    /// Snapshot of the stored state.
    pub async fn state(&self) -> UserState {
        self.coordinator
            .state(&self.key)
            .await
            .expect("memory store never fails")
    }

    /// Current phase of the stored state.
    pub async fn phase(&self) -> Phase {
        self.state().await.phase()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A reached-ending check for the sample frame's bad ending.
pub fn lost_ending_check() -> EndingCheck {
    EndingCheck::reached(Ending {
        id: "lost".to_string(),
        kind: EndingKind::Bad,
        condition: "Wander until the light dies".to_string(),
        description: None,
    })
}
