//! Speaker resolution.
//!
//! Works out which roster characters speak in a text, in the order they
//! first appear. Accepts both script text (`Name: line`) and SSML produced
//! by [`crate::markup`].

use std::sync::LazyLock;

use regex::Regex;

use crate::character::{self, Character};
use crate::script;

static VOICE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<voice\s+name="([^"]+)">"#).expect("voice tag pattern is valid")
});

/// Whether the text looks like an SSML document rather than a script.
pub fn is_markup(text: &str) -> bool {
    text.trim().starts_with("<speak>") && text.contains("<voice")
}

/// Return the roster characters that speak in `text`, in first-appearance
/// order, each at most once.
pub fn get_ordered_characters(text: &str, roster: &[Character]) -> Vec<Character> {
    let mut ordered: Vec<Character> = Vec::new();

    let mut record = |character: &Character| {
        if !ordered.iter().any(|c| c.name == character.name) {
            ordered.push(character.clone());
        }
    };

    if is_markup(text) {
        for caps in VOICE_TAG.captures_iter(text) {
            let voice_id = caps[1].trim();
            match roster.iter().find(|c| c.voice.id == voice_id) {
                Some(character) => record(character),
                None => {
                    tracing::warn!(voice = voice_id, "No character is assigned this voice, skipping");
                }
            }
        }
    } else {
        for line in text.lines() {
            let Some(parsed) = script::parse_line(line) else {
                continue;
            };
            if let Some(character) = character::find_by_name(roster, parsed.speaker) {
                record(character);
            }
        }
    }

    tracing::debug!(
        speakers = ?ordered.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        "Speakers found in order"
    );
    ordered
}
