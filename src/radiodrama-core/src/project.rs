//! Project files.
//!
//! A project is a JSON document naming the working directory, the API keys,
//! the models and the roster. Rosters come in two shapes: the legacy
//! `{"Name": "VoiceId"}` object and a list of full character records. Both
//! are normalized into `Vec<Character>` once, at load time.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::character::Character;
use crate::error::DramaError;
use crate::voice::{self, Voice};

/// A loaded, normalized project.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub description: String,
    pub author: String,
    pub version: String,
    pub root_path: PathBuf,
    pub api_keys: Vec<String>,
    pub default_api_key_index: usize,
    pub speech_model: Option<String>,
    pub text_model: Option<String>,
    pub roster: Vec<Character>,
    pub wait_seconds: Option<u64>,
}

impl Project {
    /// Read a project file. A relative `root_path` is resolved against the
    /// directory that holds the file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DramaError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| DramaError::Input {
            path: path.to_path_buf(),
            source,
        })?;

        let mut project = Self::from_str(&content)?;
        if project.root_path.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            project.root_path = base.join(&project.root_path);
        }
        Ok(project)
    }

    /// Parse project JSON. A leading byte order mark is ignored.
    pub fn from_str(content: &str) -> Result<Self, DramaError> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let file: ProjectFile = serde_json::from_str(content)
            .map_err(|e| DramaError::ProjectError(format!("Failed to parse project: {}", e)))?;

        let root_path = file
            .file_paths
            .root_path
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                DramaError::ProjectError("file_paths.root_path is not set".to_string())
            })?;

        if !file.api_settings.api_keys.iter().any(|k| !k.trim().is_empty()) {
            tracing::warn!("Project has no usable API keys");
        }

        let roster = normalize_roster(&file.speaker_settings.speakers);

        Ok(Self {
            name: file.project_settings.project_name,
            description: file.project_settings.project_description,
            author: file.project_settings.author,
            version: file.project_settings.version,
            root_path: PathBuf::from(root_path),
            api_keys: file.api_settings.api_keys,
            default_api_key_index: file.api_settings.default_api_key_index,
            speech_model: file.api_settings.speech_model.filter(|m| !m.is_empty()),
            text_model: file.api_settings.text_model.filter(|m| !m.is_empty()),
            roster,
            wait_seconds: file.processing_settings.wait_seconds,
        })
    }

    pub fn layout(&self) -> ProjectLayout {
        ProjectLayout::new(&self.root_path)
    }
}

/// Working directories under a project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    pub root: PathBuf,
    pub persona: PathBuf,
    pub script: PathBuf,
    pub dialog: PathBuf,
    pub ssml: PathBuf,
    pub audio: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            persona: root.join("persona"),
            script: root.join("script"),
            dialog: root.join("dialog"),
            ssml: root.join("ssml"),
            audio: root.join("audio"),
            root,
        }
    }

    /// Create the root and every stage directory.
    pub fn ensure(&self) -> Result<(), DramaError> {
        for dir in [
            &self.root,
            &self.persona,
            &self.script,
            &self.dialog,
            &self.ssml,
            &self.audio,
        ] {
            fs::create_dir_all(dir).map_err(|source| DramaError::Output {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Roster as stored in a project file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RosterSource {
    /// Full character records.
    Characters(Vec<CharacterRecord>),
    /// Legacy `{"Name": "VoiceId"}` mapping. Key order is kept.
    Legacy(serde_json::Map<String, serde_json::Value>),
}

impl Default for RosterSource {
    fn default() -> Self {
        RosterSource::Characters(Vec::new())
    }
}

/// One character as written in a project file.
#[derive(Debug, Clone, Deserialize)]
pub struct CharacterRecord {
    pub name: String,
    pub voice: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub speech_style: String,
    #[serde(default)]
    pub verbal_tics: Vec<String>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Convert either roster shape into characters.
///
/// Voices are matched by identifier, case-insensitively, or by display name.
/// Unknown voices fall back to the first catalog voice with a warning.
pub fn normalize_roster(source: &RosterSource) -> Vec<Character> {
    match source {
        RosterSource::Characters(records) => records
            .iter()
            .map(|r| {
                let mut character = Character::new(&r.name, resolve_voice(&r.voice))
                    .with_personality(&r.personality)
                    .with_traits(r.traits.iter().cloned())
                    .with_speech_style(&r.speech_style)
                    .with_verbal_tics(r.verbal_tics.iter().cloned());
                character.background = r.background.clone();
                character.role = r.role.clone();
                character
            })
            .collect(),
        RosterSource::Legacy(map) => map
            .iter()
            .map(|(name, value)| {
                let voice = match value.as_str() {
                    Some(id) => resolve_voice(id),
                    None => {
                        tracing::warn!(name = %name, "Voice is not a string, using default voice");
                        voice::default_voice()
                    }
                };
                Character::new(name, voice)
            })
            .collect(),
    }
}

fn resolve_voice(name: &str) -> &'static Voice {
    voice::lookup(name).unwrap_or_else(|| {
        let fallback = voice::default_voice();
        tracing::warn!(voice = name, fallback = fallback.id, "Unknown voice, using default");
        fallback
    })
}

/// Round-robin cursor over the usable API keys.
#[derive(Debug, Clone)]
pub struct ApiKeyRing {
    keys: Vec<String>,
    current: usize,
}

impl ApiKeyRing {
    /// Blank keys are dropped. An out-of-range `default_index` starts the
    /// ring at the first key.
    pub fn new<I, S>(keys: I, default_index: usize) -> Result<Self, DramaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys
            .into_iter()
            .map(Into::into)
            .filter(|k| !k.trim().is_empty())
            .collect();

        if keys.is_empty() {
            return Err(DramaError::ProjectError(
                "No usable API key was provided".to_string(),
            ));
        }

        let current = if default_index < keys.len() {
            default_index
        } else {
            tracing::warn!(
                index = default_index,
                count = keys.len(),
                "Default API key index is out of range, starting from the first key"
            );
            0
        };

        Ok(Self { keys, current })
    }

    /// Return the key to use now and advance the cursor.
    pub fn next_key(&mut self) -> &str {
        let index = self.current;
        self.current = (self.current + 1) % self.keys.len();
        tracing::debug!(key = index + 1, of = self.keys.len(), "Using API key");
        &self.keys[index]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// File layout.

#[derive(Debug, Default, Deserialize)]
struct ProjectFile {
    #[serde(default)]
    project_settings: ProjectSettings,
    #[serde(default)]
    file_paths: FilePaths,
    #[serde(default)]
    api_settings: ApiSettings,
    #[serde(default)]
    speaker_settings: SpeakerSettings,
    #[serde(default)]
    processing_settings: ProcessingSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProjectSettings {
    project_name: String,
    project_description: String,
    author: String,
    version: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FilePaths {
    root_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiSettings {
    api_keys: Vec<String>,
    default_api_key_index: usize,
    speech_model: Option<String>,
    text_model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SpeakerSettings {
    speakers: RosterSource,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProcessingSettings {
    wait_seconds: Option<u64>,
}
