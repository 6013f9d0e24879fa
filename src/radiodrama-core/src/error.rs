//! Error types for the drama pipeline.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DramaError {
    #[error("Failed to read {}: {source}", path.display())]
    Input {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No registered character speaks in {0}")]
    Resolution(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error(
        "'{tool}' was not found. Install it and make sure it is on your PATH \
         (see https://ffmpeg.org/download.html)"
    )]
    ToolMissing { tool: String },

    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Project error: {0}")]
    ProjectError(String),
}

impl DramaError {
    /// Whether the failure is the transcoder binary itself being absent.
    pub fn is_tool_missing(&self) -> bool {
        matches!(self, DramaError::ToolMissing { .. })
    }
}
