//! Generation collaborators.
//!
//! The pipeline talks to two generative services: one that writes text and
//! one that reads markup aloud. Both sit behind traits so the pipeline can
//! be driven by fakes in tests.

use std::pin::Pin;
use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use futures_util::Stream;

use crate::character::Character;
use crate::config::ApiConfig;
use crate::error::DramaError;
use crate::gemini::GeminiSpeechClient;
use crate::voice::Voice;

/// Writes text for a prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Return the complete response for `prompt`.
    async fn generate_text(&self, prompt: &str) -> Result<String, DramaError>;
}

/// One item of a streamed speech response.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechChunk {
    /// Raw audio bytes and the mime type the service attached to them.
    Audio {
        data: Vec<u8>,
        mime_type: Option<String>,
    },
    /// Incidental text the service sent alongside the audio.
    Text(String),
}

/// A finite, non-restartable stream of speech chunks.
pub type SpeechStream = Pin<Box<dyn Stream<Item = Result<SpeechChunk, DramaError>> + Send>>;

/// Reads a prompt aloud.
#[async_trait]
pub trait SpeechGenerator: Send + Sync {
    async fn generate_speech(&self, request: &SpeechRequest) -> Result<SpeechStream, DramaError>;
}

/// A speaker name paired with the voice that reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerVoice {
    pub speaker: String,
    pub voice: &'static Voice,
}

/// How voices are assigned for one speech request.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceSelection<'a> {
    /// No speakers known; the service picks.
    ServiceDefault,
    /// Everything is read by one voice.
    Single(&'a SpeakerVoice),
    /// Named speakers mapped to voices.
    Multi(&'a [SpeakerVoice]),
}

/// Input to a speech generation call.
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    /// Prompt or SSML document to read.
    pub prompt: String,
    /// Speakers in first-appearance order.
    pub speakers: Vec<SpeakerVoice>,
}

impl SpeechRequest {
    /// Build a request voicing `characters` in the given order.
    pub fn for_characters(prompt: impl Into<String>, characters: &[Character]) -> Self {
        Self {
            prompt: prompt.into(),
            speakers: characters
                .iter()
                .map(|c| SpeakerVoice {
                    speaker: c.name.clone(),
                    voice: c.voice,
                })
                .collect(),
        }
    }

    pub fn voice_selection(&self) -> VoiceSelection<'_> {
        match self.speakers.as_slice() {
            [] => VoiceSelection::ServiceDefault,
            [one] => VoiceSelection::Single(one),
            many => VoiceSelection::Multi(many),
        }
    }
}

/// Builds generators bound to one API key.
///
/// The orchestrator asks for fresh generators each time it rotates keys.
pub trait GeneratorFactory: Send + Sync {
    fn text_generator(&self, api_key: &str) -> Result<Box<dyn TextGenerator>, DramaError>;
    fn speech_generator(&self, api_key: &str) -> Result<Box<dyn SpeechGenerator>, DramaError>;
}

/// Factory for the real network clients.
#[derive(Debug, Clone)]
pub struct ApiGeneratorFactory {
    config: ApiConfig,
}

impl ApiGeneratorFactory {
    pub fn new(config: ApiConfig) -> Self {
        Self { config }
    }
}

impl GeneratorFactory for ApiGeneratorFactory {
    fn text_generator(&self, api_key: &str) -> Result<Box<dyn TextGenerator>, DramaError> {
        Ok(Box::new(OpenAiTextGenerator::new(&self.config, api_key)?))
    }

    fn speech_generator(&self, api_key: &str) -> Result<Box<dyn SpeechGenerator>, DramaError> {
        Ok(Box::new(GeminiSpeechClient::new(&self.config, api_key)?))
    }
}

/// Text generation over an OpenAI-compatible chat completions endpoint.
pub struct OpenAiTextGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    max_retries: u32,
}

impl OpenAiTextGenerator {
    pub fn new(config: &ApiConfig, api_key: &str) -> Result<Self, DramaError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DramaError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&config.text_base_url);

        Ok(Self {
            client: Client::with_config(openai_config).with_http_client(http_client),
            model: config.text_model.clone(),
            max_tokens: config.text_max_tokens,
            max_retries: config.max_retries.max(1),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiTextGenerator {
    async fn generate_text(&self, prompt: &str) -> Result<String, DramaError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_completion_tokens(self.max_tokens)
            .messages(vec![ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage {
                    content: prompt.to_string().into(),
                    name: None,
                },
            )])
            .build()?;

        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // 2s, 4s, 8s...
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }

            match self.client.chat().create(request.clone()).await {
                Ok(response) => {
                    let content = response
                        .choices
                        .first()
                        .and_then(|c| c.message.content.clone())
                        .unwrap_or_default();
                    return Ok(strip_reasoning(&content));
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max = self.max_retries,
                        error = %e,
                        "Text generation request failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.map(DramaError::from).unwrap_or_else(|| {
            DramaError::Generation("Unknown API error after retries".to_string())
        }))
    }
}

/// Strip reasoning blocks such as `<thinking>...</thinking>` that some
/// models prepend to their answer, then trim.
pub fn strip_reasoning(response: &str) -> String {
    const TAGS: [&str; 6] = ["thinking", "think", "reflection", "reasoning", "thought", "scratchpad"];

    let mut result = response.to_string();

    for tag in TAGS {
        let pattern = format!(r"(?is)<{tag}[^>]*>.*?</{tag}>", tag = tag);
        if let Ok(re) = regex::Regex::new(&pattern) {
            result = re.replace_all(&result, "").to_string();
        }
    }

    result.trim().to_string()
}
