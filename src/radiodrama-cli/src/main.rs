//! Radiodrama CLI - multi-voice audio drama production
//!
//! Runs the dialog, markup and audio stages over a project directory.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use radiodrama_core::{
    ApiGeneratorFactory, ApiKeyRing, BatchReport, CancelFlag, Config, FfmpegTranscoder,
    FileStatus, PipelineCallback, PipelineEvent, PipelineOrchestrator, Project, Stage, VOICES,
    Voice, default_config, voice,
};

#[derive(Parser)]
#[command(
    name = "radiodrama",
    version,
    about = "Radio drama production - turn dialogue scripts into multi-voice audio",
    long_about = "Drafts dialogue from scenarios, converts it to SSML with per-character voices \
                  and renders it to WAV/MP3 through a streaming speech API."
)]
struct Cli {
    /// Project file (JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    project: Option<PathBuf>,

    /// Configuration file (TOML); built-in defaults are used when omitted
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Seconds to pause between files (overrides project and config)
    #[arg(long, global = true, value_name = "SECONDS")]
    wait: Option<u64>,

    /// Do not insert backchannel lines between same-speaker turns
    #[arg(long, global = true)]
    no_interjections: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Draft dialogue from scenarios (script/*.txt -> dialog/*.txt)
    Dialog,
    /// Convert dialogue to SSML (dialog/*.txt -> ssml/*.ssml)
    Markup,
    /// Render SSML to audio (ssml/*.ssml -> audio/*.wav, *.mp3)
    Audio,
    /// Run dialog, markup and audio in order
    All,
    /// Create the project directory layout
    Init,
    /// List the available voices
    Voices {
        /// Only list voices of this gender
        #[arg(long, value_enum)]
        gender: Option<GenderFilter>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum GenderFilter {
    #[value(name = "f", alias = "female")]
    Female,
    #[value(name = "m", alias = "male")]
    Male,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };

    let log_filter = format!("{},radiodrama_core={}", config.log.level, config.log.level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Command::Voices { gender } = cli.command {
        print_voices(gender);
        return Ok(());
    }

    let project_path = cli
        .project
        .clone()
        .ok_or("A project file is required: pass --project <FILE>")?;
    let project = Project::load(&project_path)?;
    let layout = project.layout();
    tracing::debug!(
        project = %project_path.display(),
        root = %layout.root.display(),
        speakers = project.roster.len(),
        "Project loaded"
    );

    if let Command::Init = cli.command {
        layout.ensure()?;
        println!(
            "{} {}",
            "Created project layout under".green(),
            layout.root.display()
        );
        return Ok(());
    }

    // Project settings override the config file; flags override both.
    if let Some(model) = &project.speech_model {
        config.api.speech_model = model.clone();
    }
    if let Some(model) = &project.text_model {
        config.api.text_model = model.clone();
    }
    if let Some(wait) = cli.wait.or(project.wait_seconds) {
        config.pipeline.wait_seconds = wait;
    }
    if cli.no_interjections {
        config.pipeline.interjections = false;
    }

    let keys = build_key_ring(&project)?;

    if project.roster.is_empty() {
        eprintln!(
            "{}",
            "Warning: the project has no speakers; every file will fail to resolve.".yellow()
        );
    }

    print_header(&project, &config, keys.len());

    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{}",
                "Interrupt received, stopping after the current file...".yellow()
            );
            flag.cancel();
        }
    });

    let factory = ApiGeneratorFactory::new(config.api.clone());
    let transcoder = Arc::new(FfmpegTranscoder::from_config(&config.audio));

    let mut orchestrator = PipelineOrchestrator::new(
        config,
        layout,
        project.roster.clone(),
        keys,
        factory,
        transcoder,
    )
    .with_cancel_flag(cancel)
    .with_callback(create_console_callback());

    let reports = match cli.command {
        Command::Dialog => vec![orchestrator.run_stage(Stage::Dialog).await?],
        Command::Markup => vec![orchestrator.run_stage(Stage::Markup).await?],
        Command::Audio => vec![orchestrator.run_stage(Stage::Audio).await?],
        Command::All => orchestrator.run_all().await?,
        Command::Init | Command::Voices { .. } => Vec::new(),
    };

    let failed = print_summary(&reports);
    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

/// Keys from the project, or `GEMINI_API_KEY` / `GOOGLE_API_KEY` when the
/// project has none.
fn build_key_ring(project: &Project) -> Result<ApiKeyRing, Box<dyn std::error::Error>> {
    if project.api_keys.iter().any(|k| !k.trim().is_empty()) {
        return Ok(ApiKeyRing::new(
            project.api_keys.iter().cloned(),
            project.default_api_key_index,
        )?);
    }

    let key = env::var("GEMINI_API_KEY")
        .or_else(|_| env::var("GOOGLE_API_KEY"))
        .map_err(|_| {
            "No API key: add api_settings.api_keys to the project or set GEMINI_API_KEY"
        })?;
    Ok(ApiKeyRing::new([key], 0)?)
}

fn print_header(project: &Project, config: &Config, key_count: usize) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!("  {} - {}", "Radiodrama".bold(), project.name)
            .bright_blue()
            .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Root:".bold(), project.root_path.display());
    println!(
        "{} {} / {}",
        "Models:".bold(),
        config.api.text_model.dimmed(),
        config.api.speech_model.dimmed()
    );
    println!("{} {}", "API keys:".bold(), key_count);
    println!();
    println!("{}", "Cast:".bold());
    for (i, c) in project.roster.iter().enumerate() {
        println!(
            "  {}. {} - {}",
            i + 1,
            c.name.bright_cyan(),
            c.voice.display_name().yellow()
        );
    }
    println!();
    println!("{}", "─".repeat(70).dimmed());
}

fn print_voices(gender: Option<GenderFilter>) {
    let voices: Box<dyn Iterator<Item = &'static Voice>> = match gender {
        Some(GenderFilter::Female) => Box::new(voice::female_voices()),
        Some(GenderFilter::Male) => Box::new(voice::male_voices()),
        None => Box::new(VOICES.iter()),
    };
    for voice in voices {
        println!("  {}", voice.display_name());
    }
}

/// Print per-stage totals and return the number of failed files.
fn print_summary(reports: &[BatchReport]) -> usize {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    let mut failed = 0;
    for report in reports {
        let errors = report.count(FileStatus::Error);
        failed += errors;
        println!(
            "  {:<8} {} succeeded, {} failed, {} interrupted",
            report.stage.to_string().bold(),
            report.count(FileStatus::Success).to_string().green(),
            errors.to_string().red(),
            report.count(FileStatus::Interrupted).to_string().yellow()
        );
    }
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    failed
}

/// Create a callback that prints pipeline events to the console.
fn create_console_callback() -> PipelineCallback {
    Box::new(move |event| match event {
        PipelineEvent::StageStart { stage, files } => {
            println!();
            println!(
                "{}",
                format!("  {} stage: {} file(s)", stage, files)
                    .bright_magenta()
                    .bold()
            );
            println!();
        }
        PipelineEvent::FileStart {
            index,
            total,
            input,
            ..
        } => {
            let name = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            println!(
                "{} {} {}",
                "▶".bright_cyan(),
                format!("[{}/{}]", index + 1, total).dimmed(),
                name.bright_cyan().bold()
            );
        }
        PipelineEvent::FileFinished(report) => match report.status {
            FileStatus::Success => {
                for output in &report.outputs {
                    println!("    {} {}", "saved".green(), output.display());
                }
                if let Some(note) = report.message {
                    println!("    {} {}", "warning:".yellow(), note);
                }
            }
            FileStatus::Error => {
                println!(
                    "    {} {}",
                    "error:".red().bold(),
                    report.message.unwrap_or_default()
                );
            }
            FileStatus::Interrupted => {
                println!(
                    "    {} {}",
                    "interrupted:".yellow(),
                    report.input.display()
                );
            }
        },
        PipelineEvent::Waiting { seconds } => {
            println!("    {}", format!("waiting {}s...", seconds).dimmed());
        }
        PipelineEvent::Cancelled { remaining } => {
            println!(
                "{}",
                format!("  Cancelled, {} file(s) not started.", remaining).yellow()
            );
        }
        PipelineEvent::StageEnd { .. } => {
            // Totals are printed once all stages are done
        }
    })
}
