//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::character::Character;
use crate::error::DramaError;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

/// Endpoints and models for the generation services.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// OpenAI-compatible base URL used for text generation.
    pub text_base_url: String,
    pub text_model: String,
    pub text_max_tokens: u32,
    /// Base URL of the Gemini REST API used for speech generation.
    pub speech_base_url: String,
    pub speech_model: String,
    pub speech_temperature: f32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Attempts per text generation call.
    pub max_retries: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            text_base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            text_max_tokens: 8192,
            speech_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            speech_model: "gemini-2.5-flash-preview-tts".to_string(),
            speech_temperature: 1.0,
            timeout_secs: 300,
            max_retries: 3,
        }
    }
}

/// Batch processing behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pause between files, in seconds.
    pub wait_seconds: u64,
    /// Insert backchannel lines between consecutive turns by one speaker.
    pub interjections: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            wait_seconds: 30,
            interjections: true,
        }
    }
}

/// Transcoding settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Path or name of the ffmpeg binary.
    pub ffmpeg: String,
    /// Target bitrate passed to the encoder, e.g. "128k".
    pub bitrate: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            bitrate: "128k".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Prompt templates.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Turns a scenario into `Name: line` dialogue. Placeholders:
    /// `{characters}`, `{names}`, `{scenario}`.
    pub dialog: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            dialog: DEFAULT_DIALOG_PROMPT.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DramaError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DramaError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, DramaError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| DramaError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), DramaError> {
        if self.api.text_base_url.is_empty() || self.api.speech_base_url.is_empty() {
            return Err(DramaError::ConfigError(
                "API base URLs cannot be empty".to_string(),
            ));
        }
        if self.api.text_model.is_empty() || self.api.speech_model.is_empty() {
            return Err(DramaError::ConfigError(
                "Model names cannot be empty".to_string(),
            ));
        }
        if !self.prompts.dialog.contains("{scenario}") {
            return Err(DramaError::ConfigError(
                "Dialog prompt must contain {scenario}".to_string(),
            ));
        }
        if self.audio.ffmpeg.is_empty() {
            return Err(DramaError::ConfigError(
                "ffmpeg path cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the dialog-drafting prompt for a scenario and its cast.
    pub fn get_dialog_prompt(&self, scenario: &str, roster: &[Character]) -> String {
        let characters: String = roster.iter().map(Character::profile_prompt).collect();
        let names = roster
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        self.prompts
            .dialog
            .replace("{characters}", characters.trim_end())
            .replace("{names}", &names)
            .replace("{scenario}", scenario.trim())
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config::default()
}

const DEFAULT_DIALOG_PROMPT: &str = r#"You are writing the script of a radio drama.

CHARACTERS:
{characters}

Rewrite the scenario below as a spoken conversation between {names}.
Write one line per turn in the form `Name: words spoken`, using only the
character names listed above. Keep each character's personality, speech style
and verbal tics. Do not add narration, stage directions, headings or
quotation marks. Write in the same language as the scenario.

SCENARIO:
{scenario}"#;
