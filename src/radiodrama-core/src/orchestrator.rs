//! Batch orchestration.
//!
//! Runs one stage over every input file of a project, strictly in order:
//! scenario to dialogue, dialogue to markup, markup to audio. A failing file
//! is reported and the batch moves on.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::audio::{AssemblyOutcome, AudioAssembler};
use crate::character::Character;
use crate::config::Config;
use crate::error::DramaError;
use crate::generation::{GeneratorFactory, SpeechGenerator, SpeechRequest, TextGenerator};
use crate::interjection::add_ai_interjections;
use crate::markup::{convert_dialog_to_ssml, paragraph_count};
use crate::project::{ApiKeyRing, ProjectLayout};
use crate::speakers::get_ordered_characters;
use crate::transcode::Transcoder;

/// Attempts at drafting a dialogue before the file is given up.
const MAX_EMPTY_RETRIES: u32 = 3;

/// One step of the production pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// `script/*.txt` to `dialog/*.txt`.
    Dialog,
    /// `dialog/*.txt` to `ssml/*.ssml`.
    Markup,
    /// `ssml/*.ssml` to `audio/*.wav` and `audio/*.mp3`.
    Audio,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Dialog, Stage::Markup, Stage::Audio];

    pub fn input_dir<'a>(&self, layout: &'a ProjectLayout) -> &'a Path {
        match self {
            Stage::Dialog => &layout.script,
            Stage::Markup => &layout.dialog,
            Stage::Audio => &layout.ssml,
        }
    }

    pub fn output_dir<'a>(&self, layout: &'a ProjectLayout) -> &'a Path {
        match self {
            Stage::Dialog => &layout.dialog,
            Stage::Markup => &layout.ssml,
            Stage::Audio => &layout.audio,
        }
    }

    pub fn input_extension(&self) -> &'static str {
        match self {
            Stage::Dialog | Stage::Markup => "txt",
            Stage::Audio => "ssml",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Stage::Dialog => "Dialog",
            Stage::Markup => "Markup",
            Stage::Audio => "Audio",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Terminal state of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Success,
    Error,
    Interrupted,
}

/// What happened to one input file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub input: PathBuf,
    pub status: FileStatus,
    /// Files written for this input.
    pub outputs: Vec<PathBuf>,
    /// Error text, or a warning attached to a success.
    pub message: Option<String>,
}

impl FileReport {
    fn success(input: &Path, outputs: Vec<PathBuf>, message: Option<String>) -> Self {
        Self {
            input: input.to_path_buf(),
            status: FileStatus::Success,
            outputs,
            message,
        }
    }

    fn error(input: &Path, error: &DramaError) -> Self {
        Self {
            input: input.to_path_buf(),
            status: FileStatus::Error,
            outputs: Vec::new(),
            message: Some(error.to_string()),
        }
    }

    fn interrupted(input: &Path) -> Self {
        Self {
            input: input.to_path_buf(),
            status: FileStatus::Interrupted,
            outputs: Vec::new(),
            message: None,
        }
    }
}

/// Result of one stage over a batch of files.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub stage: Stage,
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn count(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }

    pub fn was_interrupted(&self) -> bool {
        self.count(FileStatus::Interrupted) > 0
    }
}

/// Shared cancellation request. Checked between files and during pauses.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Callback for pipeline events.
pub type PipelineCallback = Box<dyn Fn(PipelineEvent) + Send + Sync>;

/// Events emitted while a stage runs.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A stage is starting over `files` inputs.
    StageStart { stage: Stage, files: usize },
    /// Work on one file is starting.
    FileStart {
        stage: Stage,
        index: usize,
        total: usize,
        input: PathBuf,
    },
    /// One file reached a terminal state.
    FileFinished(FileReport),
    /// Pausing before the next file.
    Waiting { seconds: u64 },
    /// Cancellation was observed; `remaining` files were not started.
    Cancelled { remaining: usize },
    /// The stage is over.
    StageEnd {
        stage: Stage,
        succeeded: usize,
        failed: usize,
        interrupted: usize,
    },
}

/// Runs pipeline stages over a project directory.
pub struct PipelineOrchestrator<F: GeneratorFactory> {
    config: Config,
    layout: ProjectLayout,
    roster: Vec<Character>,
    keys: ApiKeyRing,
    factory: F,
    transcoder: Arc<dyn Transcoder>,
    cancel: CancelFlag,
    /// Event callback.
    callback: Option<PipelineCallback>,
}

impl<F: GeneratorFactory> PipelineOrchestrator<F> {
    pub fn new(
        config: Config,
        layout: ProjectLayout,
        roster: Vec<Character>,
        keys: ApiKeyRing,
        factory: F,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            config,
            layout,
            roster,
            keys,
            factory,
            transcoder,
            cancel: CancelFlag::new(),
            callback: None,
        }
    }

    /// Set a callback for pipeline events.
    pub fn with_callback(mut self, callback: PipelineCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Share an existing cancellation flag, e.g. one wired to Ctrl-C.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn roster(&self) -> &[Character] {
        &self.roster
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Run every stage in order, stopping early once cancelled.
    pub async fn run_all(&mut self) -> Result<Vec<BatchReport>, DramaError> {
        let mut reports = Vec::new();
        for stage in Stage::ALL {
            let report = self.run_stage(stage).await?;
            let interrupted = report.was_interrupted() || self.cancel.is_cancelled();
            reports.push(report);
            if interrupted {
                break;
            }
        }
        Ok(reports)
    }

    /// Run one stage over its whole input directory.
    ///
    /// Only failure to list the inputs is returned as an error; per-file
    /// failures end up in the report.
    pub async fn run_stage(&mut self, stage: Stage) -> Result<BatchReport, DramaError> {
        let inputs =
            collect_inputs(stage.input_dir(&self.layout), stage.input_extension()).await?;
        let total = inputs.len();

        tracing::info!(stage = %stage, files = total, "Stage starting");
        self.emit_event(PipelineEvent::StageStart { stage, files: total });

        let mut files = Vec::with_capacity(total);

        for (index, input) in inputs.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!(stage = %stage, remaining = total - index, "Cancelled");
                self.emit_event(PipelineEvent::Cancelled {
                    remaining: total - index,
                });
                for skipped in &inputs[index..] {
                    let report = FileReport::interrupted(skipped);
                    self.emit_event(PipelineEvent::FileFinished(report.clone()));
                    files.push(report);
                }
                break;
            }

            self.emit_event(PipelineEvent::FileStart {
                stage,
                index,
                total,
                input: input.clone(),
            });

            let report = self.run_file(stage, input).await;
            match report.status {
                FileStatus::Success => {
                    tracing::info!(input = %input.display(), "File done")
                }
                _ => tracing::error!(
                    input = %input.display(),
                    error = report.message.as_deref().unwrap_or(""),
                    "File failed"
                ),
            }
            self.emit_event(PipelineEvent::FileFinished(report.clone()));
            files.push(report);

            if index + 1 < total {
                self.pause().await;
            }
        }

        let report = BatchReport { stage, files };
        self.emit_event(PipelineEvent::StageEnd {
            stage,
            succeeded: report.count(FileStatus::Success),
            failed: report.count(FileStatus::Error),
            interrupted: report.count(FileStatus::Interrupted),
        });
        Ok(report)
    }

    async fn run_file(&mut self, stage: Stage, input: &Path) -> FileReport {
        let output_dir = stage.output_dir(&self.layout).to_path_buf();
        let api_key = self.keys.next_key().to_string();

        match stage {
            Stage::Dialog => {
                let generator = match self.factory.text_generator(&api_key) {
                    Ok(g) => g,
                    Err(e) => return FileReport::error(input, &e),
                };
                match draft_dialog(input, &output_dir, &self.roster, &self.config, generator.as_ref())
                    .await
                {
                    Ok(path) => FileReport::success(input, vec![path], None),
                    Err(e) => FileReport::error(input, &e),
                }
            }
            Stage::Markup => {
                let generator = if self.config.pipeline.interjections {
                    match self.factory.text_generator(&api_key) {
                        Ok(g) => Some(g),
                        Err(e) => return FileReport::error(input, &e),
                    }
                } else {
                    None
                };
                match generate_markup(input, &output_dir, &self.roster, generator.as_deref()).await {
                    Ok(path) => FileReport::success(input, vec![path], None),
                    Err(e) => FileReport::error(input, &e),
                }
            }
            Stage::Audio => {
                let generator = match self.factory.speech_generator(&api_key) {
                    Ok(g) => g,
                    Err(e) => return FileReport::error(input, &e),
                };
                let result = generate_audio(
                    input,
                    &output_dir,
                    &self.roster,
                    generator.as_ref(),
                    self.transcoder.as_ref(),
                )
                .await;
                match result {
                    Ok(AssemblyOutcome::Saved(saved)) => {
                        let mut outputs = vec![saved.wav_path];
                        let message = match saved.compressed {
                            Ok(path) => {
                                outputs.push(path);
                                None
                            }
                            Err(e) => Some(e.to_string()),
                        };
                        FileReport::success(input, outputs, message)
                    }
                    Ok(AssemblyOutcome::NoAudio) => FileReport::error(
                        input,
                        &DramaError::Generation("No audio data was generated".to_string()),
                    ),
                    Err(e) => FileReport::error(input, &e),
                }
            }
        }
    }

    /// Sleep between files, waking every second to look for cancellation.
    async fn pause(&self) {
        let seconds = self.config.pipeline.wait_seconds;
        if seconds == 0 {
            return;
        }
        self.emit_event(PipelineEvent::Waiting { seconds });
        for _ in 0..seconds {
            if self.cancel.is_cancelled() {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Emit an event if a callback is registered.
    fn emit_event(&self, event: PipelineEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }
}

/// Draft `Name: line` dialogue for one scenario file and save it under
/// `output_dir` with the same file name.
pub async fn draft_dialog(
    input: &Path,
    output_dir: &Path,
    roster: &[Character],
    config: &Config,
    generator: &dyn TextGenerator,
) -> Result<PathBuf, DramaError> {
    let scenario = read_text(input).await?;
    let prompt = config.get_dialog_prompt(&scenario, roster);

    let mut dialog = String::new();
    for attempt in 0..MAX_EMPTY_RETRIES {
        dialog = generator.generate_text(&prompt).await?;
        if !dialog.trim().is_empty() {
            break;
        }
        tracing::warn!(
            attempt = attempt + 1,
            max = MAX_EMPTY_RETRIES,
            input = %input.display(),
            "Empty dialog draft"
        );
    }

    if dialog.trim().is_empty() {
        return Err(DramaError::Generation(format!(
            "Empty dialog for {} after {} attempts",
            input.display(),
            MAX_EMPTY_RETRIES
        )));
    }

    let output = output_dir.join(file_name(input)?);
    write_text(&output, dialog.trim()).await?;
    Ok(output)
}

/// Turn one dialogue file into `<stem>.ssml` under `output_dir`.
///
/// With a generator, backchannel lines are inserted first; speakers are
/// resolved again afterwards so inserted listeners get a voice.
pub async fn generate_markup(
    input: &Path,
    output_dir: &Path,
    roster: &[Character],
    generator: Option<&dyn TextGenerator>,
) -> Result<PathBuf, DramaError> {
    let dialog = read_text(input).await?;

    let ordered = get_ordered_characters(&dialog, roster);
    if ordered.is_empty() {
        return Err(DramaError::Resolution(input.display().to_string()));
    }

    let (dialog, ordered) = match generator {
        Some(generator) => {
            let injected = add_ai_interjections(&dialog, roster, generator).await;
            let ordered = get_ordered_characters(&injected, roster);
            (injected, ordered)
        }
        None => (dialog, ordered),
    };

    let ssml = convert_dialog_to_ssml(&dialog, &ordered);
    let paragraphs = paragraph_count(&ssml);
    if paragraphs == 0 {
        return Err(DramaError::Resolution(input.display().to_string()));
    }

    let output = output_dir.join(format!("{}.ssml", file_stem(input)?));
    write_text(&output, &ssml).await?;
    tracing::info!(output = %output.display(), paragraphs, speakers = ordered.len(), "Markup saved");
    Ok(output)
}

/// Voice one markup file into `<stem>.wav` (and a compressed copy) under
/// `output_dir`.
pub async fn generate_audio(
    input: &Path,
    output_dir: &Path,
    roster: &[Character],
    generator: &dyn SpeechGenerator,
    transcoder: &dyn Transcoder,
) -> Result<AssemblyOutcome, DramaError> {
    let markup = read_text(input).await?;

    let ordered = get_ordered_characters(&markup, roster);
    if ordered.is_empty() {
        return Err(DramaError::Resolution(input.display().to_string()));
    }

    let request = SpeechRequest::for_characters(markup, &ordered);
    let stream = generator.generate_speech(&request).await?;

    AudioAssembler::new(output_dir, file_stem(input)?, transcoder)
        .assemble(stream)
        .await
}

/// List files in `dir` with extension `ext`, sorted by name.
pub async fn collect_inputs(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, DramaError> {
    let input_error = |source: std::io::Error| DramaError::Input {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(input_error)?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(input_error)? {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ext));
        if !matches {
            continue;
        }
        // Follows symlinks, unlike `DirEntry::file_type`.
        if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn read_text(path: &Path) -> Result<String, DramaError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DramaError::Input {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(match content.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => content,
    })
}

async fn write_text(path: &Path, content: &str) -> Result<(), DramaError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| DramaError::Output {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|source| DramaError::Output {
            path: path.to_path_buf(),
            source,
        })
}

fn file_stem(path: &Path) -> Result<&str, DramaError> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| DramaError::ProjectError(format!("Bad file name: {}", path.display())))
}

fn file_name(path: &Path) -> Result<&str, DramaError> {
    path.file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| DramaError::ProjectError(format!("Bad file name: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{SpeechChunk, SpeechStream};
    use crate::voice;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        prompts: Mutex<Vec<String>>,
        speakers: Mutex<Vec<Vec<String>>>,
        keys: Mutex<Vec<String>>,
    }

    struct FakeText {
        reply: String,
        recorder: Arc<Recorder>,
    }

    #[async_trait]
    impl TextGenerator for FakeText {
        async fn generate_text(&self, prompt: &str) -> Result<String, DramaError> {
            self.recorder.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    struct FakeSpeech {
        recorder: Arc<Recorder>,
    }

    #[async_trait]
    impl SpeechGenerator for FakeSpeech {
        async fn generate_speech(&self, request: &SpeechRequest) -> Result<SpeechStream, DramaError> {
            self.recorder
                .speakers
                .lock()
                .unwrap()
                .push(request.speakers.iter().map(|s| s.speaker.clone()).collect());
            let chunks = vec![
                Ok(SpeechChunk::Audio {
                    data: vec![0; 480],
                    mime_type: Some("audio/L16;codec=pcm;rate=24000".to_string()),
                }),
                Ok(SpeechChunk::Audio {
                    data: vec![0; 480],
                    mime_type: Some("audio/L16;codec=pcm;rate=24000".to_string()),
                }),
            ];
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    struct FakeFactory {
        reply: String,
        recorder: Arc<Recorder>,
    }

    impl GeneratorFactory for FakeFactory {
        fn text_generator(&self, api_key: &str) -> Result<Box<dyn TextGenerator>, DramaError> {
            self.recorder.keys.lock().unwrap().push(api_key.to_string());
            Ok(Box::new(FakeText {
                reply: self.reply.clone(),
                recorder: self.recorder.clone(),
            }))
        }

        fn speech_generator(&self, api_key: &str) -> Result<Box<dyn SpeechGenerator>, DramaError> {
            self.recorder.keys.lock().unwrap().push(api_key.to_string());
            Ok(Box::new(FakeSpeech {
                recorder: self.recorder.clone(),
            }))
        }
    }

    struct CopyTranscoder;

    #[async_trait]
    impl Transcoder for CopyTranscoder {
        async fn transcode(&self, wav_path: &Path) -> Result<PathBuf, DramaError> {
            let out = wav_path.with_extension("mp3");
            std::fs::copy(wav_path, &out).unwrap();
            Ok(out)
        }
    }

    struct MissingTranscoder;

    #[async_trait]
    impl Transcoder for MissingTranscoder {
        async fn transcode(&self, _wav_path: &Path) -> Result<PathBuf, DramaError> {
            Err(DramaError::ToolMissing {
                tool: "ffmpeg".to_string(),
            })
        }
    }

    fn roster() -> Vec<Character> {
        vec![
            Character::new("A", voice::find_by_id("Puck").unwrap()),
            Character::new("B", voice::find_by_id("Kore").unwrap()),
        ]
    }

    fn quiet_config() -> Config {
        let mut config = Config::default();
        config.pipeline.wait_seconds = 0;
        config
    }

    fn setup(
        reply: &str,
        transcoder: Arc<dyn Transcoder>,
    ) -> (tempfile::TempDir, Arc<Recorder>, PipelineOrchestrator<FakeFactory>) {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        layout.ensure().unwrap();
        let recorder = Arc::new(Recorder::default());
        let factory = FakeFactory {
            reply: reply.to_string(),
            recorder: recorder.clone(),
        };
        let keys = ApiKeyRing::new(["k1", "k2"], 0).unwrap();
        let orchestrator =
            PipelineOrchestrator::new(quiet_config(), layout, roster(), keys, factory, transcoder);
        (dir, recorder, orchestrator)
    }

    #[tokio::test]
    async fn test_markup_then_audio_end_to_end() {
        let (dir, recorder, mut orchestrator) = setup("Really?", Arc::new(CopyTranscoder));
        std::fs::write(
            dir.path().join("dialog/scene.txt"),
            "A: hi\nA: how are you\nB: fine",
        )
        .unwrap();

        let report = orchestrator.run_stage(Stage::Markup).await.unwrap();
        assert_eq!(report.count(FileStatus::Success), 1);

        let ssml = std::fs::read_to_string(dir.path().join("ssml/scene.ssml")).unwrap();
        assert_eq!(
            ssml,
            "<speak>\n\
             \t<p><voice name=\"Puck\">hi</voice><break time=\"0.1s\"/></p>\n\n\
             \t<p><voice name=\"Kore\">Really?</voice><break time=\"0.1s\"/></p>\n\n\
             \t<p><voice name=\"Puck\">how are you</voice><break time=\"0.1s\"/></p>\n\n\
             \t<p><voice name=\"Kore\">fine</voice><break time=\"0.1s\"/></p>\n\n\
             </speak>"
        );

        let report = orchestrator.run_stage(Stage::Audio).await.unwrap();
        assert_eq!(report.count(FileStatus::Success), 1);
        assert_eq!(
            report.files[0].outputs,
            vec![
                dir.path().join("audio/scene.wav"),
                dir.path().join("audio/scene.mp3")
            ]
        );

        let wav = std::fs::read(dir.path().join("audio/scene.wav")).unwrap();
        assert_eq!(wav.len(), 44 + 960);
        assert_eq!(&wav[0..4], b"RIFF");

        let speakers = recorder.speakers.lock().unwrap().clone();
        assert_eq!(speakers, vec![vec!["A".to_string(), "B".to_string()]]);
        assert_eq!(*recorder.keys.lock().unwrap(), ["k1", "k2"]);
    }

    #[tokio::test]
    async fn test_unresolvable_file_fails_and_batch_continues() {
        let (dir, _recorder, mut orchestrator) = setup("Really?", Arc::new(CopyTranscoder));
        std::fs::write(dir.path().join("dialog/a.txt"), "Stranger: who?").unwrap();
        std::fs::write(dir.path().join("dialog/b.txt"), "A: hi\nB: hello").unwrap();
        std::fs::write(dir.path().join("dialog/notes.md"), "A: ignored").unwrap();

        let report = orchestrator.run_stage(Stage::Markup).await.unwrap();
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.files[0].status, FileStatus::Error);
        assert!(report.files[0].message.as_deref().unwrap().contains("a.txt"));
        assert_eq!(report.files[1].status, FileStatus::Success);
        assert!(!dir.path().join("ssml/a.ssml").exists());
        assert!(dir.path().join("ssml/b.ssml").exists());
    }

    #[tokio::test]
    async fn test_interjections_can_be_disabled() {
        let (dir, recorder, mut orchestrator) = setup("Really?", Arc::new(CopyTranscoder));
        orchestrator.config.pipeline.interjections = false;
        std::fs::write(dir.path().join("dialog/s.txt"), "A: one\nA: two").unwrap();

        orchestrator.run_stage(Stage::Markup).await.unwrap();
        let ssml = std::fs::read_to_string(dir.path().join("ssml/s.ssml")).unwrap();
        assert_eq!(paragraph_count(&ssml), 2);
        assert!(recorder.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dialog_stage_writes_draft() {
        let (dir, recorder, mut orchestrator) = setup("A: hello\nB: hi\n", Arc::new(CopyTranscoder));
        std::fs::write(dir.path().join("script/ep1.txt"), "\u{feff}Two friends meet.").unwrap();

        let report = orchestrator.run_stage(Stage::Dialog).await.unwrap();
        assert_eq!(report.count(FileStatus::Success), 1);

        let dialog = std::fs::read_to_string(dir.path().join("dialog/ep1.txt")).unwrap();
        assert_eq!(dialog, "A: hello\nB: hi");
        let prompts = recorder.prompts.lock().unwrap();
        assert!(prompts[0].ends_with("Two friends meet."));
        assert!(prompts[0].contains("### A"));
    }

    #[tokio::test]
    async fn test_empty_draft_is_an_error() {
        let (dir, recorder, mut orchestrator) = setup("   ", Arc::new(CopyTranscoder));
        std::fs::write(dir.path().join("script/ep1.txt"), "Nothing happens.").unwrap();

        let report = orchestrator.run_stage(Stage::Dialog).await.unwrap();
        assert_eq!(report.files[0].status, FileStatus::Error);
        assert_eq!(recorder.prompts.lock().unwrap().len(), MAX_EMPTY_RETRIES as usize);
        assert!(!dir.path().join("dialog/ep1.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_transcoder_is_success_with_note() {
        let (dir, _recorder, mut orchestrator) = setup("", Arc::new(MissingTranscoder));
        std::fs::write(
            dir.path().join("ssml/s.ssml"),
            "<speak>\n\t<p><voice name=\"Kore\">hi</voice></p>\n</speak>",
        )
        .unwrap();

        let report = orchestrator.run_stage(Stage::Audio).await.unwrap();
        let file = &report.files[0];
        assert_eq!(file.status, FileStatus::Success);
        assert_eq!(file.outputs, vec![dir.path().join("audio/s.wav")]);
        assert!(file.message.as_deref().unwrap().contains("ffmpeg"));
        assert!(dir.path().join("audio/s.wav").exists());
    }

    #[tokio::test]
    async fn test_cancel_before_start_interrupts_everything() {
        let (dir, recorder, mut orchestrator) = setup("", Arc::new(CopyTranscoder));
        for name in ["1.txt", "2.txt"] {
            std::fs::write(dir.path().join("dialog").join(name), "A: hi").unwrap();
        }
        orchestrator.cancel_flag().cancel();

        let report = orchestrator.run_stage(Stage::Markup).await.unwrap();
        assert_eq!(report.count(FileStatus::Interrupted), 2);
        assert!(recorder.keys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_keeps_finished_results() {
        let (dir, _recorder, orchestrator) = setup("", Arc::new(CopyTranscoder));
        for name in ["1.txt", "2.txt", "3.txt"] {
            std::fs::write(dir.path().join("dialog").join(name), "A: hi\nB: yo").unwrap();
        }

        let flag = orchestrator.cancel_flag();
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        let mut orchestrator = orchestrator.with_callback(Box::new(move |event| {
            if let PipelineEvent::FileFinished(ref report) = event {
                if report.status == FileStatus::Success {
                    flag.cancel();
                }
            }
            seen.lock().unwrap().push(event);
        }));

        let report = orchestrator.run_stage(Stage::Markup).await.unwrap();
        let statuses: Vec<FileStatus> = report.files.iter().map(|f| f.status).collect();
        assert_eq!(
            statuses,
            [
                FileStatus::Success,
                FileStatus::Interrupted,
                FileStatus::Interrupted
            ]
        );
        assert!(
            events
                .lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, PipelineEvent::Cancelled { remaining: 2 }))
        );
    }

    #[tokio::test]
    async fn test_run_all_chains_stages() {
        let (dir, _recorder, mut orchestrator) = setup("A: hello\nB: hi", Arc::new(CopyTranscoder));
        std::fs::write(dir.path().join("script/ep.txt"), "A greeting.").unwrap();

        let reports = orchestrator.run_all().await.unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.count(FileStatus::Success) == 1));
        assert!(dir.path().join("audio/ep.wav").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_pause_ends_it_early() {
        let (dir, _recorder, orchestrator) = setup("", Arc::new(CopyTranscoder));
        for name in ["1.txt", "2.txt", "3.txt"] {
            std::fs::write(dir.path().join("dialog").join(name), "A: hi\nB: yo").unwrap();
        }

        let flag = orchestrator.cancel_flag();
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        let mut orchestrator = orchestrator.with_callback(Box::new(move |event| {
            if let PipelineEvent::Waiting { .. } = event {
                let flag = flag.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(1500)).await;
                    flag.cancel();
                });
            }
            seen.lock().unwrap().push(event);
        }));
        orchestrator.config.pipeline.wait_seconds = 30;

        let started = tokio::time::Instant::now();
        let report = orchestrator.run_stage(Stage::Markup).await.unwrap();
        let elapsed = started.elapsed();

        let statuses: Vec<FileStatus> = report.files.iter().map(|f| f.status).collect();
        assert_eq!(
            statuses,
            [
                FileStatus::Success,
                FileStatus::Interrupted,
                FileStatus::Interrupted
            ]
        );
        assert!(elapsed >= Duration::from_secs(1), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(30), "{:?}", elapsed);

        let events = events.lock().unwrap();
        let waits = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::Waiting { seconds: 30 }))
            .count();
        assert_eq!(waits, 1);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, PipelineEvent::Cancelled { remaining: 2 }))
        );
        assert!(!dir.path().join("ssml/2.ssml").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_runs_between_files_only() {
        let (dir, _recorder, orchestrator) = setup("", Arc::new(CopyTranscoder));
        for name in ["1.txt", "2.txt"] {
            std::fs::write(dir.path().join("dialog").join(name), "A: hi").unwrap();
        }

        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        let mut orchestrator = orchestrator.with_callback(Box::new(move |event| {
            seen.lock().unwrap().push(event);
        }));
        orchestrator.config.pipeline.wait_seconds = 3;

        let started = tokio::time::Instant::now();
        let report = orchestrator.run_stage(Stage::Markup).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(report.count(FileStatus::Success), 2);
        assert!(elapsed >= Duration::from_secs(3), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(6), "{:?}", elapsed);

        let events = events.lock().unwrap();
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                PipelineEvent::StageStart { .. } => "start",
                PipelineEvent::FileStart { .. } => "file",
                PipelineEvent::FileFinished(_) => "finished",
                PipelineEvent::Waiting { .. } => "wait",
                PipelineEvent::Cancelled { .. } => "cancelled",
                PipelineEvent::StageEnd { .. } => "end",
            })
            .collect();
        assert_eq!(
            kinds,
            ["start", "file", "finished", "wait", "file", "finished", "end"]
        );
    }

    #[tokio::test]
    async fn test_markup_without_voiced_lines_is_a_resolution_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("scene.txt");
        // Resolves through the voice tags but has no `Name: line` turns.
        std::fs::write(
            &input,
            "<speak>\n\t<p><voice name=\"Puck\">hi</voice></p>\n</speak>",
        )
        .unwrap();
        let out = dir.path().join("ssml");

        let err = generate_markup(&input, &out, &roster(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DramaError::Resolution(ref path) if path.contains("scene.txt")));
        assert!(!out.join("scene.ssml").exists());
    }

    #[tokio::test]
    async fn test_collect_inputs_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.ssml", "a.SSML", "c.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::create_dir(dir.path().join("d.ssml")).unwrap();

        let files = collect_inputs(dir.path(), "ssml").await.unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("a.SSML"), dir.path().join("b.ssml")]
        );
        assert!(matches!(
            collect_inputs(&dir.path().join("missing"), "txt").await,
            Err(DramaError::Input { .. })
        ));
    }
}
