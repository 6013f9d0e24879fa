//! Radiodrama Core Library
//!
//! Turns `Name: line` dialogue scripts into multi-voice audio: speaker
//! resolution, backchannel insertion, SSML synthesis and assembly of the
//! streamed speech response into WAV/MP3 files.

pub mod audio;
pub mod character;
pub mod config;
pub mod error;
pub mod gemini;
pub mod generation;
pub mod interjection;
pub mod markup;
pub mod orchestrator;
pub mod project;
pub mod script;
pub mod speakers;
pub mod transcode;
pub mod voice;

pub use audio::{AssemblyOutcome, AudioAssembler, AudioBuffer, PcmFormat, SavedAudio};
pub use character::Character;
pub use config::{Config, default_config};
pub use error::DramaError;
pub use gemini::GeminiSpeechClient;
pub use generation::{
    ApiGeneratorFactory, GeneratorFactory, OpenAiTextGenerator, SpeechChunk, SpeechGenerator,
    SpeechRequest, SpeechStream, TextGenerator,
};
pub use interjection::add_ai_interjections;
pub use markup::convert_dialog_to_ssml;
pub use orchestrator::{
    BatchReport, CancelFlag, FileReport, FileStatus, PipelineCallback, PipelineEvent,
    PipelineOrchestrator, Stage,
};
pub use project::{ApiKeyRing, Project, ProjectLayout, RosterSource, normalize_roster};
pub use speakers::get_ordered_characters;
pub use transcode::{FfmpegTranscoder, Transcoder};
pub use voice::{VOICES, Voice};
