//! Script to SSML conversion.

use std::collections::HashMap;

use crate::character::Character;
use crate::script;

/// Escape the characters SSML treats as markup.
pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Convert `Name: line` dialogue into an SSML document with one voice-tagged
/// paragraph per turn.
///
/// Only characters in `ordered_characters` get a voice; turns by anyone
/// else, and lines that are not turns at all, are dropped with a warning.
pub fn convert_dialog_to_ssml(text: &str, ordered_characters: &[Character]) -> String {
    let by_name: HashMap<&str, &Character> = ordered_characters
        .iter()
        .map(|c| (c.name.as_str(), c))
        .collect();

    let mut paragraphs = String::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(turn) = script::parse_line(line) else {
            tracing::warn!(line, "Skipping line that is not a `Name: text` turn");
            continue;
        };

        match by_name.get(turn.speaker) {
            Some(character) => {
                paragraphs.push_str(&format!(
                    "\t<p><voice name=\"{}\">{}</voice><break time=\"0.1s\"/></p>\n\n",
                    character.voice.id,
                    escape_text(turn.utterance)
                ));
            }
            None => {
                tracing::warn!(speaker = turn.speaker, "No character found for speaker, skipping line");
            }
        }
    }

    format!("<speak>\n{}</speak>", paragraphs)
}

/// Number of voice paragraphs in a document produced by
/// [`convert_dialog_to_ssml`].
pub fn paragraph_count(ssml: &str) -> usize {
    ssml.matches("<p><voice ").count()
}
