//! Interactive-fiction game engine with an AI narrator.
//!
//! This crate provides:
//! - Per-session story state with keyed persistence
//! - AI-generated story frames, scenes, and ending detection via Gemini
//! - A two-phase turn protocol (`start`, then repeated `choose`)
//! - Concurrent scene asset generation (images and music tones)
//!
//! # Quick Start
//!
//! ```ignore
//! use novella_core::{
//!     AssetCoordinator, Gemini, GeminiImageDirector, GeminiImageGenerator,
//!     GeminiMusicDirector, GeminiNarrator, MemoryStore, MusicSessions,
//!     SessionKey, SilentMusic, TurnCoordinator,
//! };
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Gemini::from_env()?;
//!     let narrator = Arc::new(GeminiNarrator::new(client.clone()));
//!
//!     let music = Arc::new(MusicSessions::new(Arc::new(SilentMusic)));
//!     let assets = AssetCoordinator::new(
//!         Arc::new(GeminiImageDirector::new(client.clone())),
//!         Arc::new(GeminiImageGenerator::new(client.clone(), "generated/images")),
//!         Arc::new(GeminiMusicDirector::new(client)),
//!         music,
//!     );
//!
//!     let coordinator = TurnCoordinator::new(
//!         Arc::new(MemoryStore::new()),
//!         narrator.clone(),
//!         narrator.clone(),
//!         narrator,
//!         assets,
//!     );
//!
//!     let key = SessionKey::random();
//!     let mut character = BTreeMap::new();
//!     character.insert("name".to_string(), "Al".to_string());
//!
//!     let outcome = coordinator
//!         .start(&key, "a fog-bound harbor town", &character, "mystery")
//!         .await?;
//!     println!("{}", outcome.as_scene().unwrap().description);
//!     Ok(())
//! }
//! ```

pub mod assets;
pub mod coordinator;
pub mod music;
pub mod narrator;
pub mod store;
pub mod story;
pub mod testing;

// Re-export for convenience
pub use gemini::Gemini;

// Primary public API
pub use assets::{
    AssetCoordinator, GeminiImageDirector, GeminiImageGenerator, ImageDirector, ImageGenerator,
    SceneAssets, ShotChange, ShotPlan,
};
pub use coordinator::{
    EndingPayload, ScenePayload, TurnConfig, TurnCoordinator, TurnError, TurnOutcome, TurnRequest,
};
pub use music::{GeminiMusicDirector, MusicBackend, MusicDirector, MusicSessions, SilentMusic};
pub use narrator::{
    EndingCheck, EndingEvaluator, GeminiNarrator, GenerationError, NarratorConfig, SceneDraft,
    SceneGenerator, StoryFrameGenerator,
};
pub use store::{JsonStore, MemoryStore, SessionStore, StoreError};
pub use story::{
    Ending, EndingKind, Milestone, Phase, Scene, SceneChoice, SceneId, SessionKey, StoryFrame,
    UserChoice, UserState,
};
