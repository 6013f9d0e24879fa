//! Line-oriented dialogue scripts (`Name: utterance`).

use std::sync::LazyLock;

use regex::Regex;

static SPEAKER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([^:]+):\s*(.*)$").expect("speaker line pattern is valid")
});

/// One spoken turn parsed from a script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueLine<'a> {
    pub speaker: &'a str,
    pub utterance: &'a str,
}

/// Parse `Name: utterance` from a single physical line.
///
/// Both the name and the utterance are trimmed. Returns `None` for lines
/// without a colon (stage directions, blank lines).
pub fn parse_line(line: &str) -> Option<DialogueLine<'_>> {
    let caps = SPEAKER_LINE.captures(line)?;
    let speaker = caps.get(1)?.as_str().trim();
    if speaker.is_empty() {
        return None;
    }
    let utterance = caps.get(2).map_or("", |m| m.as_str()).trim();
    Some(DialogueLine { speaker, utterance })
}

/// Format a turn back into script form.
pub fn format_line(speaker: &str, utterance: &str) -> String {
    format!("{}: {}", speaker, utterance)
}
