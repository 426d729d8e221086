//! Gemini-backed narrative generation.

use super::{format_history, EndingCheck, GenerationError, SceneDraft};
use super::{EndingEvaluator, SceneGenerator, StoryFrameGenerator};
use crate::story::{Ending, Milestone, StoryFrame, UserChoice};
use async_trait::async_trait;
use gemini::{Gemini, Request};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Sampling configuration for the narrative models.
#[derive(Debug, Clone)]
pub struct NarratorConfig {
    /// Temperature for story and scene generation.
    pub temperature: f32,

    /// Nucleus sampling parameter.
    pub top_p: f32,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            top_p: 0.95,
        }
    }
}

/// Implements all three narrative seams on top of one Gemini client.
pub struct GeminiNarrator {
    client: Gemini,
    config: NarratorConfig,
}

impl GeminiNarrator {
    pub fn new(client: Gemini) -> Self {
        Self {
            client,
            config: NarratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: NarratorConfig) -> Self {
        self.config = config;
        self
    }

    fn request(&self, prompt: String) -> Request {
        Request::new(prompt)
            .with_temperature(self.config.temperature)
            .with_top_p(self.config.top_p)
    }
}

/// Story frame fields as returned by the model; the player inputs are
/// re-attached by the caller.
#[derive(Debug, Deserialize)]
struct StoryFrameDraft {
    lore: String,
    goal: String,
    #[serde(default)]
    milestones: Vec<Milestone>,
    #[serde(default)]
    endings: Vec<Ending>,
}

#[async_trait]
impl StoryFrameGenerator for GeminiNarrator {
    async fn create(
        &self,
        setting: &str,
        character: &BTreeMap<String, String>,
        genre: &str,
    ) -> Result<StoryFrame, GenerationError> {
        let mut prompt = String::new();
        prompt.push_str(include_str!("prompts/story_frame.txt"));
        prompt.push_str("\nSetting: ");
        prompt.push_str(setting);
        prompt.push_str("\nCharacter: ");
        prompt.push_str(&format_character(character));
        prompt.push_str("\nGenre: ");
        prompt.push_str(genre);
        prompt.push('\n');

        debug!(genre, "generating story frame");
        let draft: StoryFrameDraft = self.client.complete_json(self.request(prompt)).await?;

        Ok(StoryFrame {
            lore: draft.lore,
            goal: draft.goal,
            milestones: draft.milestones,
            endings: draft.endings,
            setting: setting.to_string(),
            character: character.clone(),
            genre: genre.to_string(),
        })
    }
}

#[async_trait]
impl SceneGenerator for GeminiNarrator {
    async fn next(
        &self,
        frame: &StoryFrame,
        history: &[UserChoice],
        last_choice: Option<&str>,
        escalate: bool,
    ) -> Result<SceneDraft, GenerationError> {
        let mut prompt = String::new();
        prompt.push_str(include_str!("prompts/scene.txt"));
        prompt.push_str("\nLore: ");
        prompt.push_str(&frame.lore);
        prompt.push_str("\nGoal: ");
        prompt.push_str(&frame.goal);
        prompt.push_str("\nMilestones: ");
        prompt.push_str(&join_ids(frame.milestones.iter().map(|m| m.id.as_str())));
        prompt.push_str("\nEndings: ");
        prompt.push_str(&join_ids(frame.endings.iter().map(|e| e.id.as_str())));
        prompt.push_str("\nHistory: ");
        prompt.push_str(&format_history(history));
        prompt.push_str("\nLast choice: ");
        prompt.push_str(last_choice.unwrap_or("start"));
        prompt.push('\n');

        if escalate {
            prompt.push('\n');
            prompt.push_str(include_str!("prompts/scene_retry.txt"));
        }

        debug!(turn = history.len(), escalate, "generating scene");
        Ok(self.client.complete_json(self.request(prompt)).await?)
    }
}

#[async_trait]
impl EndingEvaluator for GeminiNarrator {
    async fn check(
        &self,
        frame: &StoryFrame,
        history: &[UserChoice],
    ) -> Result<EndingCheck, GenerationError> {
        let endings = frame
            .endings
            .iter()
            .map(|e| format!("{}:{}", e.id, e.condition))
            .collect::<Vec<_>>()
            .join(", ");

        let mut prompt = String::new();
        prompt.push_str(include_str!("prompts/ending_check.txt"));
        prompt.push_str("\nHistory: ");
        prompt.push_str(&format_history(history));
        prompt.push_str("\nEndings: ");
        prompt.push_str(&endings);
        prompt.push('\n');

        debug!(turn = history.len(), "checking ending conditions");
        // Deterministic: ending detection should not be creative.
        let request = Request::new(prompt).with_temperature(0.0).with_top_p(1.0);
        Ok(self.client.complete_json(request).await?)
    }
}

fn format_character(character: &BTreeMap<String, String>) -> String {
    character
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_ids<'a>(ids: impl Iterator<Item = &'a str>) -> String {
    ids.collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_character() {
        let mut character = BTreeMap::new();
        character.insert("name".to_string(), "Al".to_string());
        character.insert("age".to_string(), "25".to_string());
        assert_eq!(format_character(&character), "age: 25; name: Al");
    }

    #[test]
    fn test_story_frame_draft_parses_model_output() {
        let raw = r#"{
            "lore": "An old forest.",
            "goal": "Escape before dawn.",
            "milestones": [{"id": "m1", "description": "Find the path"}],
            "endings": [
                {"id": "escape", "type": "good", "condition": "Reach the edge"},
                {"id": "lost", "type": "bad", "condition": "Wander until dawn"}
            ]
        }"#;
        let draft: StoryFrameDraft = serde_json::from_str(raw).unwrap();
        assert_eq!(draft.milestones.len(), 1);
        assert_eq!(draft.endings.len(), 2);
    }
}
