//! Narrative generation seams.
//!
//! The turn coordinator talks to three generator traits — story frame,
//! scene, ending check — so tests can script them and the Gemini-backed
//! implementation stays swappable. The retry policy for short scenes
//! lives in the coordinator; the `escalate` flag tells a generator to
//! strengthen its instruction on the single allowed retry.

mod gemini;

pub use self::gemini::{GeminiNarrator, NarratorConfig};

use crate::story::{Ending, SceneChoice, StoryFrame, UserChoice};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from the generative backends.
///
/// All of these are fatal to the current turn; none of them mutate the
/// stored session state.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Gemini API error: {0}")]
    Api(#[from] ::gemini::Error),

    #[error("Scene generation produced {got} choices after retry, need exactly 2")]
    TooFewChoices { got: usize },

    #[error("Story frame defines no endings; no ending would ever be reachable")]
    NoEndings,

    #[error("Ending check reported an ending without providing one")]
    MissingEnding,

    #[error("Ending check reported unknown ending id '{0}'")]
    UnknownEnding(String),

    #[error("Generation call timed out")]
    Timeout,
}

/// A scene as produced by the model, before an id or assets are attached.
#[derive(Debug, Clone, Deserialize)]
pub struct SceneDraft {
    pub description: String,
    #[serde(default)]
    pub choices: Vec<SceneChoice>,
}

/// Result of re-evaluating the ending conditions for a session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndingCheck {
    #[serde(default)]
    pub reached: bool,
    #[serde(default)]
    pub ending: Option<Ending>,
}

impl EndingCheck {
    /// A check that found no ending.
    pub fn not_reached() -> Self {
        Self::default()
    }

    /// A check that found the given ending.
    pub fn reached(ending: Ending) -> Self {
        Self {
            reached: true,
            ending: Some(ending),
        }
    }
}

/// One-shot creation of the per-session story frame.
#[async_trait]
pub trait StoryFrameGenerator: Send + Sync {
    async fn create(
        &self,
        setting: &str,
        character: &BTreeMap<String, String>,
        genre: &str,
    ) -> Result<StoryFrame, GenerationError>;
}

/// Produces the next scene from the frame and the full choice history.
///
/// `last_choice` is `None` only for the very first scene of a session.
/// `escalate` is set on the coordinator's single retry after a draft
/// with fewer than two choices.
#[async_trait]
pub trait SceneGenerator: Send + Sync {
    async fn next(
        &self,
        frame: &StoryFrame,
        history: &[UserChoice],
        last_choice: Option<&str>,
        escalate: bool,
    ) -> Result<SceneDraft, GenerationError>;
}

/// Decides whether an ending condition has been met.
///
/// Must be a pure function of the frame and the full history; it is
/// re-run from scratch every turn since the model's judgment is not
/// guaranteed to be monotonic.
#[async_trait]
pub trait EndingEvaluator: Send + Sync {
    async fn check(
        &self,
        frame: &StoryFrame,
        history: &[UserChoice],
    ) -> Result<EndingCheck, GenerationError>;
}

/// Render the choice history the way the prompts expect it.
pub(crate) fn format_history(history: &[UserChoice]) -> String {
    history
        .iter()
        .map(|c| format!("{}:{}", c.scene_id, c.choice_text))
        .collect::<Vec<_>>()
        .join("; ")
}
