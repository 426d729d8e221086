//! Scene asset generation: image planning, image generation, and the
//! concurrent image/music fan-out.
//!
//! Asset failures are never fatal to a turn. Each branch degrades to an
//! absent reference independently; the turn completes either way.

use crate::music::{MusicDirector, MusicSessions};
use crate::narrator::GenerationError;
use crate::story::{Ending, SessionKey};
use async_trait::async_trait;
use chrono::Utc;
use gemini::{Gemini, Request};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors from image or music generation.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Gemini API error: {0}")]
    Api(#[from] gemini::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The visual director's verdict on whether the picture should change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShotChange {
    /// Replace the picture entirely.
    Full,
    /// Adjust the current picture.
    Modify,
    /// Leave the current picture in place.
    Keep,
}

/// A director decision plus the image prompt to act on it.
#[derive(Debug, Clone, Deserialize)]
pub struct ShotPlan {
    pub change: ShotChange,
    #[serde(default)]
    pub prompt: Option<String>,
}

/// LLM stage deciding how the visual scene should change.
#[async_trait]
pub trait ImageDirector: Send + Sync {
    async fn plan(&self, scene_description: &str) -> Result<ShotPlan, GenerationError>;
}

/// Opaque image backend: prompt in, asset reference out.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate a fresh image from a prompt.
    async fn generate(&self, prompt: &str) -> Result<String, AssetError>;

    /// Produce a variation of an existing image guided by a prompt.
    async fn modify(&self, base: &str, prompt: &str) -> Result<String, AssetError>;
}

/// Asset references attached to one scene.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneAssets {
    pub image: Option<String>,
    pub music: Option<String>,
}

/// Requests the image and music for a scene concurrently.
pub struct AssetCoordinator {
    director: Arc<dyn ImageDirector>,
    images: Arc<dyn ImageGenerator>,
    music_director: Arc<dyn MusicDirector>,
    music: Arc<MusicSessions>,
}

impl AssetCoordinator {
    pub fn new(
        director: Arc<dyn ImageDirector>,
        images: Arc<dyn ImageGenerator>,
        music_director: Arc<dyn MusicDirector>,
        music: Arc<MusicSessions>,
    ) -> Self {
        Self {
            director,
            images,
            music_director,
            music,
        }
    }

    /// The session-keyed music stream registry, for teardown on reset
    /// and on endings.
    pub fn music(&self) -> &Arc<MusicSessions> {
        &self.music
    }

    /// Attach assets to a regular scene.
    ///
    /// The image and music branches are issued together and joined;
    /// neither waits on the other and a failed branch only blanks its
    /// own field.
    pub async fn attach(
        &self,
        key: &SessionKey,
        description: &str,
        previous_image: Option<&str>,
    ) -> SceneAssets {
        let image_branch = self.scene_image(description, previous_image, None);
        let music_branch = self.scene_music(key, description);
        let (image, music) = tokio::join!(image_branch, music_branch);
        SceneAssets { image, music }
    }

    /// Attach an image to an ending. Endings always get an image
    /// requested (see [`ending_image_override`]); failure still degrades
    /// to `None` rather than blocking the ending response.
    pub async fn attach_ending(&self, ending: &Ending) -> Option<String> {
        let text = ending.description.as_deref().unwrap_or(&ending.condition);
        self.scene_image(text, None, Some(ending)).await
    }

    async fn scene_image(
        &self,
        description: &str,
        previous_image: Option<&str>,
        ending: Option<&Ending>,
    ) -> Option<String> {
        let plan = match self.director.plan(description).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "image director failed");
                // An ending must still get an image attempt.
                ShotPlan {
                    change: ShotChange::Keep,
                    prompt: None,
                }
            }
        };

        let plan = match ending {
            Some(ending) => ending_image_override(plan, ending),
            None => plan,
        };

        let result = match plan.change {
            ShotChange::Keep => {
                debug!("director kept the current picture");
                return previous_image.map(str::to_string);
            }
            ShotChange::Modify => {
                let prompt = plan.prompt.as_deref().unwrap_or(description);
                match previous_image {
                    Some(base) => self.images.modify(base, prompt).await,
                    None => self.images.generate(prompt).await,
                }
            }
            ShotChange::Full => {
                let prompt = plan.prompt.as_deref().unwrap_or(description);
                self.images.generate(prompt).await
            }
        };

        match result {
            Ok(path) => {
                info!(path, "image attached");
                Some(path)
            }
            Err(e) => {
                warn!(error = %e, "image generation failed");
                None
            }
        }
    }

    async fn scene_music(&self, key: &SessionKey, description: &str) -> Option<String> {
        let tone = match self.music_director.tone(description).await {
            Ok(tone) => tone,
            Err(e) => {
                warn!(error = %e, "music director failed");
                return None;
            }
        };

        if let Err(e) = self.music.retarget(key, &tone).await {
            warn!(error = %e, "music stream retarget failed");
        }
        Some(tone)
    }
}

/// Named policy: an ending always receives an image.
///
/// If the director decided no visual change is needed, the decision is
/// overridden to a full regeneration, synthesizing the prompt from the
/// ending's description or condition when the director supplied none.
pub fn ending_image_override(mut plan: ShotPlan, ending: &Ending) -> ShotPlan {
    if plan.change == ShotChange::Keep {
        plan.change = ShotChange::Full;
    }
    if plan.prompt.is_none() {
        plan.prompt = Some(
            ending
                .description
                .clone()
                .unwrap_or_else(|| ending.condition.clone()),
        );
    }
    plan
}

/// Gemini-backed visual director.
pub struct GeminiImageDirector {
    client: Gemini,
}

impl GeminiImageDirector {
    pub fn new(client: Gemini) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageDirector for GeminiImageDirector {
    async fn plan(&self, scene_description: &str) -> Result<ShotPlan, GenerationError> {
        let request = Request::new(scene_description)
            .with_system(include_str!("narrator/prompts/image_director.txt"))
            .with_temperature(0.1);
        Ok(self.client.complete_json(request).await?)
    }
}

/// Gemini-backed image generator writing PNGs under an output directory.
pub struct GeminiImageGenerator {
    client: Gemini,
    out_dir: PathBuf,
}

impl GeminiImageGenerator {
    pub fn new(client: Gemini, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            out_dir: out_dir.into(),
        }
    }

    async fn save(&self, png: &[u8]) -> Result<String, AssetError> {
        fs::create_dir_all(&self.out_dir).await?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix = Uuid::new_v4().simple();
        let path = self.out_dir.join(format!("novella_{stamp}_{suffix}.png"));
        fs::write(&path, png).await?;
        Ok(path.to_string_lossy().into_owned())
    }
}

#[async_trait]
impl ImageGenerator for GeminiImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, AssetError> {
        debug!("generating image");
        let image = self.client.generate_image(prompt, None).await?;
        self.save(&image.png).await
    }

    async fn modify(&self, base: &str, prompt: &str) -> Result<String, AssetError> {
        debug!(base, "modifying image");
        let bytes = fs::read(base).await?;
        let image = self.client.generate_image(prompt, Some(&bytes)).await?;
        self.save(&image.png).await
    }
}
