//! WAV to MP3 conversion through an external encoder.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::AudioConfig;
use crate::error::DramaError;

/// Produces a compressed copy of a WAV file next to it.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Encode `wav_path` and return the path of the new file.
    async fn transcode(&self, wav_path: &Path) -> Result<PathBuf, DramaError>;
}

/// Transcoder that shells out to `ffmpeg` with the LAME encoder.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: String,
    bitrate: String,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<String>, bitrate: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            bitrate: bitrate.into(),
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(&config.ffmpeg, &config.bitrate)
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::from_config(&AudioConfig::default())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, wav_path: &Path) -> Result<PathBuf, DramaError> {
        if !wav_path.is_file() {
            return Err(DramaError::Encoding(format!(
                "Input file does not exist: {}",
                wav_path.display()
            )));
        }

        let mp3_path = wav_path.with_extension("mp3");

        let output = Command::new(&self.program)
            .arg("-y")
            .args(["-loglevel", "error"])
            .arg("-i")
            .arg(wav_path)
            .args(["-codec:a", "libmp3lame", "-b:a", &self.bitrate])
            .arg(&mp3_path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => DramaError::ToolMissing {
                    tool: self.program.clone(),
                },
                _ => DramaError::Encoding(format!("Failed to run {}: {}", self.program, e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DramaError::Encoding(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        tracing::debug!(input = %wav_path.display(), output = %mp3_path.display(), "Transcoded");
        Ok(mp3_path)
    }
}
