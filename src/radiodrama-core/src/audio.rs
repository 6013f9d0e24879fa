//! Audio assembly.
//!
//! The speech service streams raw PCM in many small chunks. They are
//! collected into one buffer, given a canonical 44-byte RIFF/WAVE header
//! and written to disk, then handed to a transcoder for a compressed copy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;

use crate::error::DramaError;
use crate::generation::{SpeechChunk, SpeechStream};
use crate::transcode::Transcoder;

pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;
pub const DEFAULT_BITS_PER_SAMPLE: u16 = 16;
pub const WAV_HEADER_LEN: usize = 44;

/// Layout of raw PCM data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            bits_per_sample: DEFAULT_BITS_PER_SAMPLE,
            channels: 1,
        }
    }
}

impl PcmFormat {
    /// Read sample rate and bit depth from a mime type such as
    /// `audio/L16;codec=pcm;rate=24000`.
    ///
    /// Missing or non-numeric values fall back to 24000 Hz and 16 bits.
    /// Output is always mono.
    pub fn from_mime(mime_type: &str) -> Self {
        let mut format = Self::default();

        for param in mime_type.split(';').map(str::trim) {
            let lower = param.to_ascii_lowercase();
            if let Some(rate) = lower.strip_prefix("rate=") {
                if let Ok(rate) = rate.trim().parse::<u32>() {
                    format.sample_rate = rate;
                }
            } else if let Some(bits) = param.strip_prefix("audio/L") {
                if let Ok(bits) = bits.parse::<u16>() {
                    format.bits_per_sample = bits;
                }
            }
        }

        format
    }

    /// Bytes per sample frame. `None` if the header field would overflow.
    pub fn block_align(&self) -> Option<u16> {
        self.channels.checked_mul(self.bits_per_sample / 8)
    }

    /// Bytes per second. `None` if the header field would overflow.
    pub fn byte_rate(&self) -> Option<u32> {
        self.sample_rate.checked_mul(u32::from(self.block_align()?))
    }
}

/// Build the canonical PCM WAV header for `data_len` bytes of audio.
///
/// Fails with `Encoding` when a size or rate field does not fit in the
/// header's 32-bit slots.
pub fn wav_header(format: &PcmFormat, data_len: u32) -> Result<[u8; WAV_HEADER_LEN], DramaError> {
    let (Some(block_align), Some(byte_rate)) = (format.block_align(), format.byte_rate()) else {
        return Err(DramaError::Encoding(format!(
            "unsupported PCM layout: {} Hz, {} bits, {} channel(s)",
            format.sample_rate, format.bits_per_sample, format.channels
        )));
    };
    let riff_len = data_len.checked_add(36).ok_or_else(|| {
        DramaError::Encoding(format!("{} bytes of audio do not fit in a WAV file", data_len))
    })?;

    let mut header = [0u8; WAV_HEADER_LEN];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&riff_len.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    // fmt chunk
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());

    // data chunk
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len.to_le_bytes());

    Ok(header)
}

/// Prepend a WAV header to raw PCM bytes.
pub fn to_wav(pcm: &[u8], format: &PcmFormat) -> Result<Vec<u8>, DramaError> {
    let data_len = u32::try_from(pcm.len()).map_err(|_| {
        DramaError::Encoding(format!("{} bytes of audio do not fit in a WAV file", pcm.len()))
    })?;
    let header = wav_header(format, data_len)?;

    let mut wav = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());
    wav.extend_from_slice(&header);
    wav.extend_from_slice(pcm);
    Ok(wav)
}

/// Raw audio collected from a speech stream.
#[derive(Debug, Default)]
pub struct AudioBuffer {
    data: Vec<u8>,
    mime_type: Option<String>,
}

impl AudioBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one payload. The latest mime type seen describes the whole
    /// buffer; a payload without one keeps the earlier value.
    pub fn push(&mut self, data: &[u8], mime_type: Option<String>) {
        self.data.extend_from_slice(data);
        if mime_type.is_some() {
            self.mime_type = mime_type;
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Turn the buffer into WAV bytes. Returns `Ok(None)` when nothing
    /// usable was collected.
    pub fn finalize(self) -> Result<Option<(Vec<u8>, PcmFormat)>, DramaError> {
        let Some(mime_type) = self.mime_type.filter(|_| !self.data.is_empty()) else {
            return Ok(None);
        };
        let format = PcmFormat::from_mime(&mime_type);
        Ok(Some((to_wav(&self.data, &format)?, format)))
    }
}

/// Drain a speech stream into a buffer.
///
/// Chunks without audio are logged and ignored. An error anywhere in the
/// stream aborts collection.
pub async fn collect_stream(mut stream: SpeechStream) -> Result<AudioBuffer, DramaError> {
    let mut buffer = AudioBuffer::new();

    while let Some(chunk) = stream.next().await {
        match chunk? {
            SpeechChunk::Audio { data, mime_type } if !data.is_empty() => {
                buffer.push(&data, mime_type);
            }
            SpeechChunk::Audio { .. } => {}
            SpeechChunk::Text(text) => {
                tracing::info!(text = %text, "Text chunk in speech response");
            }
        }
    }

    tracing::debug!(bytes = buffer.len(), mime = ?buffer.mime_type(), "Speech stream drained");
    Ok(buffer)
}

/// Files written for one assembled response.
#[derive(Debug)]
pub struct SavedAudio {
    pub wav_path: PathBuf,
    pub format: PcmFormat,
    pub pcm_bytes: usize,
    /// Result of the transcoding handoff. A failure here leaves the WAV in
    /// place.
    pub compressed: Result<PathBuf, DramaError>,
}

/// Result of assembling one speech response.
#[derive(Debug)]
pub enum AssemblyOutcome {
    /// The stream carried no audio; nothing was written.
    NoAudio,
    Saved(SavedAudio),
}

/// Writes `<dir>/<basename>.wav` from a speech stream and asks a transcoder
/// for a compressed sibling.
pub struct AudioAssembler<'a> {
    output_dir: PathBuf,
    basename: String,
    transcoder: &'a dyn Transcoder,
}

impl<'a> AudioAssembler<'a> {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        basename: impl Into<String>,
        transcoder: &'a dyn Transcoder,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            basename: basename.into(),
            transcoder,
        }
    }

    pub fn wav_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.wav", self.basename))
    }

    pub async fn assemble(&self, stream: SpeechStream) -> Result<AssemblyOutcome, DramaError> {
        let buffer = collect_stream(stream).await?;
        let pcm_bytes = buffer.len();

        let Some((wav, format)) = buffer.finalize()? else {
            tracing::warn!("No audio data was generated");
            return Ok(AssemblyOutcome::NoAudio);
        };

        let wav_path = self.wav_path();
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| DramaError::Output {
                path: self.output_dir.clone(),
                source,
            })?;
        tokio::fs::write(&wav_path, &wav)
            .await
            .map_err(|source| DramaError::Output {
                path: wav_path.clone(),
                source,
            })?;

        match wav_duration(&wav_path) {
            Ok(duration) => tracing::info!(
                path = %wav_path.display(),
                seconds = duration.as_secs_f32(),
                sample_rate = format.sample_rate,
                bits = format.bits_per_sample,
                "WAV file saved"
            ),
            Err(e) => tracing::warn!(path = %wav_path.display(), error = %e, "WAV saved but could not be re-read"),
        }

        let compressed = self.transcoder.transcode(&wav_path).await;
        match &compressed {
            Ok(path) => tracing::info!(path = %path.display(), "Compressed audio saved"),
            Err(e) if e.is_tool_missing() => tracing::error!("{}", e),
            Err(e) => tracing::warn!(error = %e, "Transcoding failed, keeping WAV"),
        }

        Ok(AssemblyOutcome::Saved(SavedAudio {
            wav_path,
            format,
            pcm_bytes,
            compressed,
        }))
    }
}

/// Playing time of a WAV file, read back through `hound`.
pub fn wav_duration(path: &Path) -> Result<Duration, DramaError> {
    let reader = hound::WavReader::open(path).map_err(|e| {
        DramaError::Encoding(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Ok(Duration::ZERO);
    }
    Ok(Duration::from_secs_f64(
        f64::from(reader.duration()) / f64::from(spec.sample_rate),
    ))
}
