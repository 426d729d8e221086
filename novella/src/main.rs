//! Interactive fiction CLI with an AI narrator.
//!
//! Walks the player through game setup, then plays the story scene by
//! scene: pick one of the two offered choices, type a custom action, or
//! `restart` / `quit`.
//!
//! ```bash
//! GEMINI_API_KEY=... cargo run -p novella
//! ```

mod constructor;

use gemini::Gemini;
use novella_core::{
    AssetCoordinator, GeminiImageDirector, GeminiImageGenerator, GeminiMusicDirector,
    GeminiNarrator, JsonStore, MusicSessions, Scene, SessionKey, SilentMusic, TurnCoordinator,
    TurnError, TurnOutcome,
};
use std::sync::Arc;

const SESSION_DIR: &str = "generated/sessions";
const IMAGE_DIR: &str = "generated/images";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    if std::env::var("GEMINI_API_KEY").is_err() {
        eprintln!("Error: GEMINI_API_KEY environment variable not set.");
        eprintln!("Please set it in .env file or with: export GEMINI_API_KEY=your_key_here");
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "novella=info,novella_core=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let coordinator = build_coordinator().await?;
    let key = SessionKey::random();

    loop {
        let setup = constructor::run()?;
        println!("\nWriting your story...\n");

        let outcome = coordinator
            .start(&key, &setup.setting, &setup.character, &setup.genre)
            .await;

        match outcome {
            Ok(outcome) => {
                if !play(&coordinator, &key, outcome).await? {
                    break;
                }
            }
            Err(e) => {
                eprintln!("Could not start the story: {e}");
                coordinator.reset(&key).await?;
                if !ask_again("Try again? [y/N] ")? {
                    break;
                }
                continue;
            }
        }

        coordinator.reset(&key).await?;
        if !ask_again("\nPlay another story? [y/N] ")? {
            break;
        }
    }

    Ok(())
}

async fn build_coordinator() -> Result<TurnCoordinator, Box<dyn std::error::Error>> {
    let client = Gemini::from_env()?;
    let narrator = Arc::new(GeminiNarrator::new(client.clone()));

    let music = Arc::new(MusicSessions::new(Arc::new(SilentMusic)));
    let assets = AssetCoordinator::new(
        Arc::new(GeminiImageDirector::new(client.clone())),
        Arc::new(GeminiImageGenerator::new(client.clone(), IMAGE_DIR)),
        Arc::new(GeminiMusicDirector::new(client)),
        music,
    );

    let store = Arc::new(JsonStore::open(SESSION_DIR).await?);

    Ok(TurnCoordinator::new(
        store,
        narrator.clone(),
        narrator.clone(),
        narrator,
        assets,
    ))
}

/// Scene/choice loop. Returns false when the player quits outright.
async fn play(
    coordinator: &TurnCoordinator,
    key: &SessionKey,
    mut outcome: TurnOutcome,
) -> Result<bool, Box<dyn std::error::Error>> {
    loop {
        let scene = match &outcome {
            TurnOutcome::Scene(payload) => &payload.scene,
            TurnOutcome::Ended(payload) => {
                println!("\n=== THE END ===\n");
                if let Some(description) = &payload.ending.description {
                    println!("{description}\n");
                }
                println!("Ending: {} ({:?})", payload.ending.id, payload.ending.kind);
                if let Some(image) = &payload.image {
                    println!("Final image: {image}");
                }
                return Ok(true);
            }
        };

        render_scene(scene);

        let choice = loop {
            let input = constructor::prompt("\n> ")?;
            match input.as_str() {
                "quit" | "q" => return Ok(false),
                "restart" => {
                    coordinator.reset(key).await?;
                    return Ok(true);
                }
                "1" => break scene.choices[0].text.clone(),
                "2" if scene.choices.len() > 1 => break scene.choices[1].text.clone(),
                "" => {
                    println!("Pick 1 or 2, type your own action, or 'restart' / 'quit'.");
                }
                custom => break custom.to_string(),
            }
        };

        outcome = match coordinator.choose(key, &choice).await {
            Ok(next) => next,
            Err(e @ TurnError::Generation(_)) => {
                // The turn committed nothing; the same scene is still live.
                eprintln!("The narrator stumbled ({e}). Try again.");
                outcome
            }
            Err(e) => return Err(e.into()),
        };
    }
}

fn render_scene(scene: &Scene) {
    println!("\n{}", scene.description);
    if let Some(image) = &scene.image {
        println!("\n[image: {image}]");
    }
    if let Some(music) = &scene.music {
        println!("[music: {music}]");
    }
    println!();
    for (i, choice) in scene.choices.iter().enumerate() {
        println!("  {}. {}", i + 1, choice.text);
    }
}

fn ask_again(label: &str) -> std::io::Result<bool> {
    let answer = constructor::prompt(label)?;
    Ok(matches!(answer.as_str(), "y" | "Y" | "yes"))
}
