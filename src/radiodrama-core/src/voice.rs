//! Prebuilt voice catalog.
//!
//! The speech service ships a fixed set of named voices. They are kept here
//! as a static table and looked up by identifier or by display name.

/// Gender tag attached to a catalog voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Female,
    Male,
}

impl Gender {
    pub fn tag(&self) -> &'static str {
        match self {
            Gender::Female => "F",
            Gender::Male => "M",
        }
    }
}

/// A prebuilt voice offered by the speech service.
#[derive(Debug, PartialEq, Eq)]
pub struct Voice {
    /// Identifier sent to the speech service (e.g. "Kore").
    pub id: &'static str,
    /// One-word description of the voice.
    pub descriptor: &'static str,
    pub gender: Gender,
}

impl Voice {
    const fn new(id: &'static str, descriptor: &'static str, gender: Gender) -> Self {
        Self {
            id,
            descriptor,
            gender,
        }
    }

    /// Human-readable label, e.g. `"Kore -- Firm (F)"`.
    pub fn display_name(&self) -> String {
        format!("{} -- {} ({})", self.id, self.descriptor, self.gender.tag())
    }
}

use Gender::{Female as F, Male as M};

/// Every voice the speech service offers, in catalog order.
pub static VOICES: [Voice; 30] = [
    Voice::new("Achernar", "Soft", F),
    Voice::new("Achird", "Friendly", M),
    Voice::new("Algenib", "Gravelly", M),
    Voice::new("Algieba", "Smooth", M),
    Voice::new("Alnilam", "Firm", M),
    Voice::new("Aoede", "Breezy", F),
    Voice::new("Autonoe", "Bright", F),
    Voice::new("Callirrhoe", "Easy-going", F),
    Voice::new("Charon", "Informative", M),
    Voice::new("Despina", "Smooth", F),
    Voice::new("Enceladus", "Breathy", M),
    Voice::new("Erinome", "Clear", F),
    Voice::new("Fenrir", "Excitable", M),
    Voice::new("Gacrux", "Mature", F),
    Voice::new("Iapetus", "Clear", M),
    Voice::new("Kore", "Firm", F),
    Voice::new("Laomedeia", "Upbeat", F),
    Voice::new("Leda", "Youthful", F),
    Voice::new("Orus", "Firm", M),
    Voice::new("Puck", "Upbeat", M),
    Voice::new("Pulcherrima", "Forward", M),
    Voice::new("Rasalgethi", "Informative", M),
    Voice::new("Sadachbia", "Lively", M),
    Voice::new("Sadaltager", "Knowledgeable", M),
    Voice::new("Schedar", "Even", M),
    Voice::new("Sulafat", "Warm", F),
    Voice::new("Umbriel", "Easy-going", M),
    Voice::new("Vindemiatrix", "Gentle", F),
    Voice::new("Zephyr", "Bright", F),
    Voice::new("Zubenelgenubi", "Casual", M),
];

/// Voice used when a configured name cannot be resolved.
pub fn default_voice() -> &'static Voice {
    &VOICES[0]
}

/// Find a voice by its service identifier. Case-insensitive.
pub fn find_by_id(id: &str) -> Option<&'static Voice> {
    let id = id.trim();
    VOICES.iter().find(|v| v.id.eq_ignore_ascii_case(id))
}

/// Find a voice by its display name (`"Kore -- Firm (F)"`).
pub fn find_by_display_name(name: &str) -> Option<&'static Voice> {
    let name = name.trim();
    VOICES.iter().find(|v| v.display_name() == name)
}

/// Find a voice by identifier first, then by display name.
pub fn lookup(name: &str) -> Option<&'static Voice> {
    find_by_id(name).or_else(|| find_by_display_name(name))
}

pub fn female_voices() -> impl Iterator<Item = &'static Voice> {
    VOICES.iter().filter(|v| v.gender == Gender::Female)
}

pub fn male_voices() -> impl Iterator<Item = &'static Voice> {
    VOICES.iter().filter(|v| v.gender == Gender::Male)
}
