//! Streaming speech client for the Gemini REST API.
//!
//! Requests go to `models/{model}:streamGenerateContent?alt=sse`; the body
//! comes back as server-sent events, each carrying a JSON
//! `GenerateContentResponse` whose parts hold base64 audio or text.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::error::DramaError;
use crate::generation::{
    SpeakerVoice, SpeechChunk, SpeechGenerator, SpeechRequest, SpeechStream, VoiceSelection,
};

pub struct GeminiSpeechClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl GeminiSpeechClient {
    pub fn new(config: &ApiConfig, api_key: &str) -> Result<Self, DramaError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DramaError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.speech_base_url.trim_end_matches('/').to_string(),
            model: config.speech_model.clone(),
            api_key: api_key.to_string(),
            temperature: config.speech_temperature,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl SpeechGenerator for GeminiSpeechClient {
    async fn generate_speech(&self, request: &SpeechRequest) -> Result<SpeechStream, DramaError> {
        let body = GenerateContentRequest::from_request(request, self.temperature);

        tracing::debug!(
            model = %self.model,
            speakers = request.speakers.len(),
            "Starting speech stream"
        );

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DramaError::Generation(format!("Speech request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DramaError::Generation(format!(
                "Speech API returned {}: {}",
                status, text
            )));
        }

        Ok(Box::pin(sse_chunks(response.bytes_stream())))
    }
}

/// Turn a raw byte stream of server-sent events into speech chunks.
fn sse_chunks<S, B, E>(bytes: S) -> impl Stream<Item = Result<SpeechChunk, DramaError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    struct State<S> {
        bytes: std::pin::Pin<Box<S>>,
        decoder: SseDecoder,
        pending: VecDeque<Result<SpeechChunk, DramaError>>,
        finished: bool,
    }

    let initial = State {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(initial, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                // Nothing follows an error.
                if item.is_err() {
                    state.pending.clear();
                    state.finished = true;
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    for payload in state.decoder.push(bytes.as_ref()) {
                        state.pending.extend(decode_event(&payload));
                    }
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(DramaError::Generation(format!(
                        "Speech stream interrupted: {}",
                        e
                    ))));
                }
                None => {
                    state.finished = true;
                    if let Some(payload) = state.decoder.finish() {
                        state.pending.extend(decode_event(&payload));
                    }
                }
            }
        }
    })
}

/// Incremental server-sent events parser.
///
/// Bytes may arrive split anywhere, including inside a line. Only the
/// `data:` field is used; the data lines of one event are joined with `\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed bytes and return the payloads of every event they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.take_event() {
                    events.push(event);
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
        }
        events
    }

    /// Flush an event left open at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r');
            if let Some(value) = line.strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
        }
        self.take_event()
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.data).join("\n"))
    }
}

/// Decode one event payload into chunks, one per part.
pub fn decode_event(payload: &str) -> Vec<Result<SpeechChunk, DramaError>> {
    let response: GenerateContentResponse = match serde_json::from_str(payload) {
        Ok(r) => r,
        Err(e) => {
            return vec![Err(DramaError::Generation(format!(
                "Malformed speech response: {}",
                e
            )))];
        }
    };

    if let Some(error) = response.error {
        return vec![Err(DramaError::Generation(error.message))];
    }

    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();

    parts
        .into_iter()
        .filter_map(|part| {
            if let Some(inline) = part.inline_data {
                Some(
                    BASE64
                        .decode(inline.data.as_bytes())
                        .map(|data| SpeechChunk::Audio {
                            data,
                            mime_type: inline.mime_type,
                        })
                        .map_err(|e| {
                            DramaError::Generation(format!("Invalid audio payload: {}", e))
                        }),
                )
            } else {
                part.text.map(|text| Ok(SpeechChunk::Text(text)))
            }
        })
        .collect()
}

// Wire types.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

impl GenerateContentRequest {
    fn from_request(request: &SpeechRequest, temperature: f32) -> Self {
        let speech_config = match request.voice_selection() {
            VoiceSelection::ServiceDefault => None,
            VoiceSelection::Single(sv) => Some(SpeechConfig {
                voice_config: Some(VoiceConfig::for_voice(sv)),
                multi_speaker_voice_config: None,
            }),
            VoiceSelection::Multi(list) => Some(SpeechConfig {
                voice_config: None,
                multi_speaker_voice_config: Some(MultiSpeakerVoiceConfig {
                    speaker_voice_configs: list
                        .iter()
                        .map(|sv| SpeakerVoiceConfig {
                            speaker: sv.speaker.clone(),
                            voice_config: VoiceConfig::for_voice(sv),
                        })
                        .collect(),
                }),
            }),
        };

        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(request.prompt.clone()),
                    inline_data: None,
                }],
            }],
            generation_config: GenerationConfig {
                temperature,
                response_modalities: vec!["AUDIO".to_string()],
                speech_config,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_config: Option<VoiceConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    multi_speaker_voice_config: Option<MultiSpeakerVoiceConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

impl VoiceConfig {
    fn for_voice(sv: &SpeakerVoice) -> Self {
        Self {
            prebuilt_voice_config: PrebuiltVoiceConfig {
                voice_name: sv.voice.id.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MultiSpeakerVoiceConfig {
    speaker_voice_configs: Vec<SpeakerVoiceConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeakerVoiceConfig {
    speaker: String,
    voice_config: VoiceConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::Character;
    use crate::voice;

    fn audio_event(bytes: &[u8], mime: &str) -> String {
        format!(
            r#"{{"candidates":[{{"content":{{"role":"model","parts":[{{"inlineData":{{"mimeType":"{}","data":"{}"}}}}]}}}}]}}"#,
            mime,
            BASE64.encode(bytes)
        )
    }

    #[test]
    fn test_sse_decoder_handles_split_input() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert!(decoder.push(b":1}\r\n").is_empty());
        let events = decoder.push(b"\r\ndata: two\n\n: comment\n\n");
        assert_eq!(events, vec!["{\"a\":1}".to_string(), "two".to_string()]);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_sse_decoder_flushes_unterminated_event() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: last").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("last"));
    }

    #[test]
    fn test_decode_event_audio_and_text() {
        let chunks = decode_event(&audio_event(&[1, 2, 3], "audio/L16;rate=24000"));
        assert_eq!(
            chunks.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
            vec![SpeechChunk::Audio {
                data: vec![1, 2, 3],
                mime_type: Some("audio/L16;rate=24000".to_string()),
            }]
        );

        let chunks = decode_event(r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap(), &SpeechChunk::Text("hi".to_string()));
    }

    #[test]
    fn test_decode_event_without_content_is_empty() {
        assert!(decode_event(r#"{"candidates":[{"finishReason":"STOP"}]}"#).is_empty());
        assert!(decode_event("{}").is_empty());
    }

    #[test]
    fn test_decode_event_errors() {
        assert!(decode_event("not json")[0].is_err());
        assert!(decode_event(r#"{"error":{"code":429,"message":"quota"}}"#)[0].is_err());
        let bad = r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"audio/L16","data":"%%%"}}]}}]}"#;
        assert!(decode_event(bad)[0].is_err());
    }

    #[tokio::test]
    async fn test_sse_chunks_across_byte_boundaries() {
        let body = format!(
            "data: {}\r\n\r\ndata: {}\r\n\r\n",
            audio_event(&[1, 2], "audio/L16;rate=24000"),
            audio_event(&[3, 4], "audio/L16;rate=24000")
        );
        let bytes = body.into_bytes();
        let pieces: Vec<Result<Vec<u8>, String>> =
            bytes.chunks(7).map(|c| Ok(c.to_vec())).collect();

        let chunks: Vec<_> = sse_chunks(stream::iter(pieces)).collect().await;
        let data: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| match c.unwrap() {
                SpeechChunk::Audio { data, .. } => data,
                SpeechChunk::Text(_) => Vec::new(),
            })
            .collect();
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_sse_chunks_stop_after_transport_error() {
        let pieces: Vec<Result<Vec<u8>, String>> = vec![
            Ok(format!("data: {}\n\n", audio_event(&[9], "audio/L16")).into_bytes()),
            Err("reset".to_string()),
            Ok(format!("data: {}\n\n", audio_event(&[8], "audio/L16")).into_bytes()),
        ];
        let chunks: Vec<_> = sse_chunks(stream::iter(pieces)).collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert!(chunks[1].is_err());
    }

    #[test]
    fn test_request_body_voice_configs() {
        let ken = Character::new("Ken", voice::find_by_id("Puck").unwrap());
        let mio = Character::new("Mio", voice::find_by_id("Kore").unwrap());

        let single = SpeechRequest::for_characters("<speak/>", std::slice::from_ref(&ken));
        let json = serde_json::to_value(GenerateContentRequest::from_request(&single, 1.0)).unwrap();
        assert_eq!(
            json["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
        assert_eq!(json["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "<speak/>");

        let multi = SpeechRequest::for_characters("x", &[ken, mio]);
        let json = serde_json::to_value(GenerateContentRequest::from_request(&multi, 0.5)).unwrap();
        let configs = &json["generationConfig"]["speechConfig"]["multiSpeakerVoiceConfig"]["speakerVoiceConfigs"];
        assert_eq!(configs[0]["speaker"], "Ken");
        assert_eq!(configs[1]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"], "Kore");
        assert_eq!(json["generationConfig"]["temperature"], 0.5);

        let none = SpeechRequest::for_characters("x", &[]);
        let json = serde_json::to_value(GenerateContentRequest::from_request(&none, 0.25)).unwrap();
        assert!(json["generationConfig"].get("speechConfig").is_none());
        assert_eq!(json["generationConfig"]["temperature"], 0.25);
    }
}
