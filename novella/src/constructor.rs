//! Interactive game setup: setting, protagonist, and genre.
//!
//! Each prompt offers predefined suggestions the player can pick by
//! number, or free text.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

pub const SETTING_SUGGESTIONS: &[&str] = &[
    "A mystical forest shrouded in eternal twilight, where ancient trees whisper secrets and magical creatures roam freely",
    "A sprawling cyberpunk metropolis in 2099, where neon lights illuminate towering skyscrapers and technology controls every aspect of life",
    "A Victorian-era mansion on a remote cliff, filled with hidden passages, antique furniture, and an atmosphere of dark mysteries",
    "A post-apocalyptic wasteland where survivors struggle to rebuild civilization among the ruins of the old world",
    "A magical academy floating in the clouds, where young wizards learn to master their powers and uncover ancient spells",
];

/// Predefined protagonist: (name, age, background, personality).
pub const CHARACTER_TEMPLATES: &[(&str, &str, &str, &str)] = &[
    (
        "Elena Nightwhisper",
        "25",
        "A skilled detective with supernatural intuition, haunted by visions of crimes before they happen",
        "Determined, intuitive, struggles with self-doubt but fiercely protective of the innocent",
    ),
    (
        "Marcus Steelborn",
        "32",
        "A former soldier turned cybernetic engineer in a dystopian future, seeking to expose corporate corruption",
        "Brave, tech-savvy, has trust issues but deeply loyal to those who earn his respect",
    ),
    (
        "Aria Moonstone",
        "19",
        "A young witch discovering her powers while attending a prestigious magical academy",
        "Curious, ambitious, sometimes reckless but has a good heart and strong sense of justice",
    ),
    (
        "Dr. Victoria Blackthorne",
        "45",
        "A renowned archaeologist who specializes in occult artifacts and ancient mysteries",
        "Intelligent, sophisticated, perfectionist with a hidden romantic side",
    ),
];

pub const GENRE_OPTIONS: &[&str] = &[
    "Horror - Supernatural terror and psychological thrills",
    "Detective/Mystery - Crime solving and investigation",
    "Romance - Love stories and relationship drama",
    "Fantasy - Magic and mythical creatures",
    "Sci-Fi - Futuristic technology and space exploration",
    "Adventure - Action-packed journeys and quests",
    "Psychological Thriller - Mind games and suspense",
    "Historical Fiction - Stories set in past eras",
];

/// Everything `start` needs.
pub struct GameSetup {
    pub setting: String,
    pub character: BTreeMap<String, String>,
    pub genre: String,
}

/// Walk the player through the three setup prompts.
pub fn run() -> io::Result<GameSetup> {
    println!("=== New Story ===\n");

    let setting = pick_setting()?;
    let character = pick_character()?;
    let genre = pick_genre()?;

    Ok(GameSetup {
        setting,
        character,
        genre,
    })
}

fn pick_setting() -> io::Result<String> {
    println!("Choose a setting, or describe your own:");
    for (i, suggestion) in SETTING_SUGGESTIONS.iter().enumerate() {
        println!("  {}. {}", i + 1, truncate(suggestion, 72));
    }

    loop {
        let input = prompt("setting> ")?;
        if let Ok(n) = input.parse::<usize>() {
            if (1..=SETTING_SUGGESTIONS.len()).contains(&n) {
                return Ok(SETTING_SUGGESTIONS[n - 1].to_string());
            }
        }
        if !input.is_empty() {
            return Ok(input);
        }
        println!("Pick a number or type a setting.");
    }
}

fn pick_character() -> io::Result<BTreeMap<String, String>> {
    println!("\nChoose a protagonist, or press enter to create your own:");
    for (i, (name, age, background, _)) in CHARACTER_TEMPLATES.iter().enumerate() {
        println!("  {}. {} ({}) - {}", i + 1, name, age, truncate(background, 56));
    }

    let input = prompt("character> ")?;
    if let Ok(n) = input.parse::<usize>() {
        if (1..=CHARACTER_TEMPLATES.len()).contains(&n) {
            let (name, age, background, personality) = CHARACTER_TEMPLATES[n - 1];
            return Ok(character_map(name, age, background, personality));
        }
    }

    println!("\nDescribe your protagonist.");
    let name = prompt_nonempty("  name> ")?;
    let age = prompt_nonempty("  age> ")?;
    let background = prompt_nonempty("  background> ")?;
    let personality = prompt_nonempty("  personality> ")?;
    Ok(character_map(&name, &age, &background, &personality))
}

fn pick_genre() -> io::Result<String> {
    println!("\nChoose a genre:");
    for (i, genre) in GENRE_OPTIONS.iter().enumerate() {
        println!("  {}. {}", i + 1, genre);
    }

    loop {
        let input = prompt("genre> ")?;
        if let Ok(n) = input.parse::<usize>() {
            if (1..=GENRE_OPTIONS.len()).contains(&n) {
                return Ok(GENRE_OPTIONS[n - 1].to_string());
            }
        }
        if !input.is_empty() {
            return Ok(input);
        }
        println!("Pick a number or type a genre.");
    }
}

fn character_map(
    name: &str,
    age: &str,
    background: &str,
    personality: &str,
) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert("name".to_string(), name.to_string());
    map.insert("age".to_string(), age.to_string());
    map.insert("background".to_string(), background.to_string());
    map.insert("personality".to_string(), personality.to_string());
    map
}

/// Print a prompt and read one trimmed line from stdin.
pub fn prompt(label: &str) -> io::Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn prompt_nonempty(label: &str) -> io::Result<String> {
    loop {
        let input = prompt(label)?;
        if !input.is_empty() {
            return Ok(input);
        }
        println!("This field is required.");
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max - 3).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_map_has_all_fields() {
        let (name, age, background, personality) = CHARACTER_TEMPLATES[0];
        let map = character_map(name, age, background, personality);
        assert_eq!(map.get("name").map(String::as_str), Some("Elena Nightwhisper"));
        assert_eq!(map.len(), 4);
        assert!(map.values().all(|v| !v.trim().is_empty()));
    }

    #[test]
    fn test_truncate_keeps_short_text() {
        assert_eq!(truncate("short", 10), "short");
        assert!(truncate(SETTING_SUGGESTIONS[0], 20).ends_with("..."));
    }
}
