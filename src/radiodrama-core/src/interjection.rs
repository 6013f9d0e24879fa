//! Backchannel insertion.
//!
//! When the same character speaks twice in a row, a short reaction from
//! another character is generated and slipped in between the two turns so
//! the listener hears a conversation rather than a monologue.

use crate::character::Character;
use crate::generation::TextGenerator;
use crate::script;

/// Hard upper bound on an accepted interjection, in characters.
pub const MAX_INTERJECTION_CHARS: usize = 40;

/// Length the model is asked to stay under.
pub const TARGET_INTERJECTION_CHARS: usize = 20;

const QUOTE_CHARS: [char; 5] = ['"', '\u{201c}', '\u{201d}', '\u{300c}', '\u{300d}'];

/// Build the role-play prompt asking `listener` to react to `previous`.
pub fn interjection_prompt(listener: &Character, previous: &str) -> String {
    format!(
        r#"You are a listener in a radio drama conversation. Stay in character:

{profile}Reply to the line below with exactly one short, natural backchannel:
agreement, surprise, admiration or a brief question.
Keep it under {target} characters and never longer than {max}.
Use the same language as the line.
Output only the words themselves, with no speaker name and no quotation marks.

Line: "{previous}"
Backchannel:"#,
        profile = listener.profile_prompt(),
        target = TARGET_INTERJECTION_CHARS,
        max = MAX_INTERJECTION_CHARS,
        previous = previous,
    )
}

/// Clean a generated interjection and check it fits.
///
/// Quote characters are removed and whitespace trimmed. Returns `None` when
/// the result is empty or longer than [`MAX_INTERJECTION_CHARS`].
pub fn accept_interjection(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| !QUOTE_CHARS.contains(c)).collect();
    let cleaned = cleaned.trim();
    let len = cleaned.chars().count();

    if len == 0 || len > MAX_INTERJECTION_CHARS {
        return None;
    }
    Some(cleaned.to_string())
}

/// First roster character other than `speaker`.
fn pick_listener<'a>(roster: &'a [Character], speaker: &str) -> Option<&'a Character> {
    roster.iter().find(|c| c.name != speaker)
}

/// Insert generated backchannel lines before every turn whose speaker is the
/// same as the previous turn's.
///
/// Existing lines are never changed or reordered. Generation failures and
/// unusable responses are logged and skipped.
pub async fn add_ai_interjections(
    dialog: &str,
    roster: &[Character],
    generator: &dyn TextGenerator,
) -> String {
    let mut output: Vec<String> = Vec::new();
    let mut previous: Option<(String, String)> = None;

    for line in dialog.split('\n') {
        let Some(turn) = script::parse_line(line) else {
            output.push(line.to_string());
            // A non-blank line that is not a turn breaks the run of speakers.
            if !line.trim().is_empty() {
                previous = None;
            }
            continue;
        };

        if let Some((previous_speaker, previous_text)) = &previous {
            if previous_speaker == turn.speaker {
                if let Some(listener) = pick_listener(roster, turn.speaker) {
                    tracing::debug!(
                        speaker = turn.speaker,
                        listener = %listener.name,
                        "Same speaker twice in a row, requesting interjection"
                    );
                    let prompt = interjection_prompt(listener, previous_text);
                    match generator.generate_text(&prompt).await {
                        Ok(response) => match accept_interjection(&response) {
                            Some(text) => {
                                output.push(script::format_line(&listener.name, &text));
                            }
                            None => {
                                tracing::warn!(
                                    response = %response,
                                    "Interjection was empty or too long, skipping"
                                );
                            }
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, "Interjection generation failed, skipping");
                        }
                    }
                }
            }
        }

        previous = Some((turn.speaker.to_string(), turn.utterance.to_string()));
        output.push(line.to_string());
    }

    output.join("\n")
}
