//! Character definitions.
//!
//! A character is a registered speaker in a project roster: a unique name,
//! the voice that reads their lines, and the persona used when a model has
//! to write lines for them.

use crate::voice::Voice;

/// A registered speaker in the drama.
#[derive(Debug, Clone, PartialEq)]
pub struct Character {
    /// Unique name, as it appears before the colon in a script line.
    pub name: String,
    /// Voice that reads this character's lines.
    pub voice: &'static Voice,
    pub personality: String,
    pub traits: Vec<String>,
    pub speech_style: String,
    pub verbal_tics: Vec<String>,
    pub background: Option<String>,
    pub role: Option<String>,
}

impl Character {
    /// Create a character with an empty persona.
    pub fn new(name: impl Into<String>, voice: &'static Voice) -> Self {
        Self {
            name: name.into(),
            voice,
            personality: String::new(),
            traits: Vec::new(),
            speech_style: String::new(),
            verbal_tics: Vec::new(),
            background: None,
            role: None,
        }
    }

    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = personality.into();
        self
    }

    pub fn with_traits<I, S>(mut self, traits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.traits = traits.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_speech_style(mut self, style: impl Into<String>) -> Self {
        self.speech_style = style.into();
        self
    }

    pub fn with_verbal_tics<I, S>(mut self, tics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.verbal_tics = tics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = Some(background.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Build the persona block handed to a text model.
    ///
    /// Empty fields are left out. The block ends with a blank line so that
    /// several profiles can be concatenated.
    pub fn profile_prompt(&self) -> String {
        let mut parts = vec![format!("### {}", self.name)];

        if !self.personality.is_empty() {
            parts.push(format!("- Personality: {}", self.personality));
        }
        if !self.speech_style.is_empty() {
            parts.push(format!("- Speech style: {}", self.speech_style));
        }
        if !self.traits.is_empty() {
            parts.push(format!("- Traits: {}", self.traits.join(", ")));
        }
        if !self.verbal_tics.is_empty() {
            parts.push(format!("- Verbal tics: {}", self.verbal_tics.join(", ")));
        }
        if let Some(background) = self.background.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("- Background: {}", background));
        }
        if let Some(role) = self.role.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("- Role: {}", role));
        }

        parts.join("\n") + "\n\n"
    }
}

/// Find a roster member by exact name.
pub fn find_by_name<'a>(roster: &'a [Character], name: &str) -> Option<&'a Character> {
    roster.iter().find(|c| c.name == name)
}
