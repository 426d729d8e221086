//! Core data model for a playthrough.
//!
//! A session's narrative bible (`StoryFrame`) is generated once at start
//! and never mutated. Everything else hangs off `UserState`, the aggregate
//! the session store persists between turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// Identifies one player session across turns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Mint a random session key.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// Unique identifier of a generated scene. Never reused within a session,
/// even across turns; a reset clears scenes along with everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneId(Uuid);

impl SceneId {
    /// Allocate a fresh scene id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SceneId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A key event the story is expected to pass through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub description: String,
}

/// Whether an ending resolves the story in the player's favor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndingKind {
    Good,
    Bad,
}

/// A terminal narrative outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ending {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EndingKind,
    /// The condition that triggers this ending, in prose.
    pub condition: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// The static per-session narrative bible.
///
/// Created exactly once per session at `start`; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryFrame {
    pub lore: String,
    pub goal: String,
    /// 2-4 key events, in story order.
    pub milestones: Vec<Milestone>,
    pub endings: Vec<Ending>,
    /// Player-supplied world setting, carried verbatim.
    pub setting: String,
    /// Flat attribute map describing the protagonist (name, age, ...).
    pub character: BTreeMap<String, String>,
    pub genre: String,
}

impl StoryFrame {
    /// Look up an ending definition by id.
    pub fn ending_by_id(&self, id: &str) -> Option<&Ending> {
        self.endings.iter().find(|e| e.id == id)
    }
}

/// One of the two options offered to the player in a scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneChoice {
    pub text: String,
    /// Short teaser of where this choice leads.
    #[serde(default)]
    pub next_scene_hint: String,
}

/// One rendered narrative beat with exactly two player choices.
///
/// `image` and `music` are filled in after the scene is created (deferred
/// completion): a scene may be handed to the caller before either is
/// populated, but once set they are never cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    pub scene_id: SceneId,
    pub description: String,
    pub choices: Vec<SceneChoice>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub music: Option<String>,
}

impl Scene {
    pub fn new(description: impl Into<String>, choices: Vec<SceneChoice>) -> Self {
        Self {
            scene_id: SceneId::new(),
            description: description.into(),
            choices,
            image: None,
            music: None,
        }
    }
}

/// An entry in the append-only choice log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserChoice {
    /// The scene the choice was made from.
    pub scene_id: SceneId,
    pub choice_text: String,
    pub timestamp: DateTime<Utc>,
}

impl UserChoice {
    pub fn now(scene_id: SceneId, choice_text: impl Into<String>) -> Self {
        Self {
            scene_id,
            choice_text: choice_text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Where a session stands in the turn protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Empty session; only `start` is valid.
    AwaitingStart,
    /// Story frame present, no ending; only `choose` is valid.
    InProgress,
    /// Terminal. No further transitions.
    Ended,
}

/// Aggregate root for everything persisted per session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    #[serde(default)]
    pub story_frame: Option<StoryFrame>,
    #[serde(default)]
    pub current_scene_id: Option<SceneId>,
    #[serde(default)]
    pub scenes: HashMap<SceneId, Scene>,
    #[serde(default)]
    pub milestones_achieved: BTreeSet<String>,
    #[serde(default)]
    pub user_choices: Vec<UserChoice>,
    #[serde(default)]
    pub ending: Option<Ending>,
    /// Denormalized cache of `Scene.image`, keyed by scene id.
    #[serde(default)]
    pub assets: HashMap<SceneId, String>,
}

impl UserState {
    /// Derive the turn-protocol phase from the stored fields.
    pub fn phase(&self) -> Phase {
        if self.ending.is_some() {
            Phase::Ended
        } else if self.story_frame.is_some() {
            Phase::InProgress
        } else {
            Phase::AwaitingStart
        }
    }

    /// The scene the player is currently looking at, if any.
    pub fn current_scene(&self) -> Option<&Scene> {
        self.current_scene_id.and_then(|id| self.scenes.get(&id))
    }

    /// Install a freshly generated scene as the current one.
    pub fn push_scene(&mut self, scene: Scene) {
        self.current_scene_id = Some(scene.scene_id);
        if let Some(image) = &scene.image {
            self.assets.insert(scene.scene_id, image.clone());
        }
        self.scenes.insert(scene.scene_id, scene);
    }
}
