use crate::engine::{GeminiClient, GenerationEngine};
use crate::input::InputFile;
use crate::model::{EngineConfig, GenerationMode, SessionEvent};
use crate::session::{GenerateRequest, Session, SessionError};
use crate::settings::{default_settings_path, Settings};
use crate::storage::{default_data_dir, FileStorage};
use crate::store::{CreationStore, HistorySource, RemoteExamples, DEFAULT_EXAMPLE_URLS};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEFAULT_APP_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_VIDEO_MODEL: &str = "veo-3.1-fast-generate-preview";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "genstudio",
    version,
    about = "Turn sketches, PDFs and prompts into Gemini mini-apps or Veo videos, with a TUI by default"
)]
pub struct Cli {
    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Base URL for the Gemini API
    #[arg(
        long,
        env = "GENSTUDIO_BASE_URL",
        default_value = "https://generativelanguage.googleapis.com",
        global = true
    )]
    pub base_url: String,

    /// Model used for HTML apps [default: gemini-2.5-pro]
    #[arg(long, global = true)]
    pub app_model: Option<String>,

    /// Model used for videos [default: veo-3.1-fast-generate-preview]
    #[arg(long, global = true)]
    pub video_model: Option<String>,

    /// Delay between video job status checks [default: 10s]
    #[arg(long, global = true)]
    pub poll_interval: Option<humantime::Duration>,

    /// Per-request HTTP timeout
    #[arg(long, default_value = "120s", global = true)]
    pub request_timeout: humantime::Duration,

    /// Directory holding the creation history
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Settings file (API key chosen in the TUI, model overrides)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Refuse history writes larger than this many bytes
    #[arg(long, global = true)]
    pub storage_quota: Option<usize>,

    /// Example creations fetched when the history is empty (repeatable)
    #[arg(long = "example-url", global = true)]
    pub example_urls: Vec<String>,

    /// Do not fetch example creations when the history is empty
    #[arg(long, global = true)]
    pub no_examples: bool,

    /// Print JSON instead of text (no TUI)
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Generate a new app or video
    Generate {
        /// What to produce
        #[arg(long, value_enum, default_value_t = GenerationMode::App)]
        mode: GenerationMode,
        /// Instructions for the model
        #[arg(short, long, default_value = "")]
        prompt: String,
        /// Image or PDF to build from
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Directory the HTML/MP4 is written to
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Generate again from a past creation's source image
    Regenerate {
        /// Creation id (or unique prefix)
        id: String,
        #[arg(short, long, default_value = "")]
        prompt: String,
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// List past creations, most recent first
    History,
    /// Show one creation
    Show {
        id: String,
        /// Print the HTML document of an app creation
        #[arg(long)]
        html: bool,
    },
    /// Replace the history order with the given ids
    Reorder {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Move the creation at one position to another
    Move { from: usize, to: usize },
    /// Import a creation exported as JSON
    Import { path: PathBuf },
    /// Export a creation as JSON
    Export {
        id: String,
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
}

pub async fn run(args: Cli) -> Result<()> {
    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let settings = Settings::load(&settings_path);
    let cfg = build_config(&args, &settings);

    match args.command.clone() {
        Some(command) => run_command(&args, cfg, command).await,
        None if args.json => run_command(&args, cfg, Command::History).await,
        #[cfg(feature = "tui")]
        None => crate::tui::run(args, cfg, settings_path).await,
        // Fallback when built without TUI support.
        #[cfg(not(feature = "tui"))]
        None => run_command(&args, cfg, Command::History).await,
    }
}

/// Build an `EngineConfig`: flags and env first, then the settings file, then defaults.
pub fn build_config(args: &Cli, settings: &Settings) -> EngineConfig {
    EngineConfig {
        base_url: args.base_url.clone(),
        api_key: args
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| settings.api_key.clone())
            .unwrap_or_default(),
        app_model: args
            .app_model
            .clone()
            .or_else(|| settings.app_model.clone())
            .unwrap_or_else(|| DEFAULT_APP_MODEL.into()),
        video_model: args
            .video_model
            .clone()
            .or_else(|| settings.video_model.clone())
            .unwrap_or_else(|| DEFAULT_VIDEO_MODEL.into()),
        temperature: 0.5,
        poll_interval: args
            .poll_interval
            .map(Duration::from)
            .or(settings.poll_interval)
            .unwrap_or(DEFAULT_POLL_INTERVAL),
        request_timeout: Duration::from(args.request_timeout),
        user_agent: format!("genstudio/{}", env!("CARGO_PKG_VERSION")),
    }
}

pub fn data_dir(args: &Cli) -> PathBuf {
    args.data_dir.clone().unwrap_or_else(default_data_dir)
}

/// Build a session over the on-disk history.
pub fn build_session(args: &Cli, cfg: EngineConfig) -> Result<Session> {
    let client = GeminiClient::new(&cfg)?;
    let engine = GenerationEngine::new(Arc::new(client), cfg);
    let storage = FileStorage::new(data_dir(args), args.storage_quota);
    Ok(Session::new(engine, CreationStore::new(Box::new(storage))))
}

/// Fallback history sources tried after local storage.
pub fn history_sources(args: &Cli, cfg: &EngineConfig) -> Result<Vec<Box<dyn HistorySource>>> {
    if args.no_examples {
        return Ok(Vec::new());
    }
    let urls = if args.example_urls.is_empty() {
        DEFAULT_EXAMPLE_URLS.iter().map(|u| u.to_string()).collect()
    } else {
        args.example_urls.clone()
    };
    let http = reqwest::Client::builder()
        .user_agent(cfg.user_agent.clone())
        .timeout(cfg.request_timeout)
        .build()
        .context("build http client")?;
    Ok(vec![Box::new(RemoteExamples::new(http, urls))])
}

fn require_api_key(cfg: &EngineConfig) -> Result<()> {
    if cfg.api_key.trim().is_empty() {
        anyhow::bail!(
            "Gemini API key is required (set GEMINI_API_KEY, pass --api-key, or choose one in the TUI)"
        );
    }
    Ok(())
}

/// Turn a session error into a CLI error, adding a hint for missing credentials.
fn cli_error(e: SessionError) -> anyhow::Error {
    if e.is_credential_missing() {
        anyhow::Error::new(e).context(
            "the API key was rejected; pass a different --api-key or update GEMINI_API_KEY",
        )
    } else {
        anyhow::Error::new(e)
    }
}

async fn run_command(args: &Cli, cfg: EngineConfig, command: Command) -> Result<()> {
    let sources = history_sources(args, &cfg)?;
    let (out_tx, out_handle) = spawn_output_writer();

    let res = match command {
        Command::Generate {
            mode,
            prompt,
            file,
            out,
        } => {
            require_api_key(&cfg)?;
            let file = file
                .as_deref()
                .map(InputFile::from_path)
                .transpose()?;
            let mut session = build_session(args, cfg)?;
            session.load_history(&sources).await;
            run_generation(args, session, &out_tx, &out, |s| {
                Box::pin(s.generate(GenerateRequest::new(mode, prompt, file)))
            })
            .await
        }
        Command::Regenerate { id, prompt, out } => {
            require_api_key(&cfg)?;
            let mut session = build_session(args, cfg)?;
            session.load_history(&sources).await;
            let cancel = tokio_util::sync::CancellationToken::new();
            run_generation(args, session, &out_tx, &out, |s| {
                Box::pin(async move { s.regenerate(&prompt, &id, cancel).await })
            })
            .await
        }
        other => {
            let mut session = build_session(args, cfg)?;
            if let Some(source) = session.load_history(&sources).await {
                tracing::debug!(%source, "history loaded");
            }
            run_offline(args, &mut session, &out_tx, other)
        }
    };

    drop(out_tx);
    let _ = out_handle.await;
    res
}

type GenerationFuture<'a> = std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<crate::model::Creation, SessionError>> + Send + 'a>,
>;

/// Run one generation with progress on stderr; Ctrl-C abandons it.
async fn run_generation<F>(
    args: &Cli,
    session: Session,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
    out_dir: &Path,
    start: F,
) -> Result<()>
where
    F: for<'a> FnOnce(&'a mut Session) -> GenerationFuture<'a>,
{
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let mut session = session.with_events(evt_tx);

    let progress_tx = out_tx.clone();
    let progress = tokio::spawn(async move {
        while let Some(ev) = evt_rx.recv().await {
            if let Some(line) = progress_line(&ev) {
                let _ = progress_tx.send(OutputLine::Stderr(line));
            }
        }
    });

    let res = tokio::select! {
        res = start(&mut session) => res.map_err(cli_error),
        _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("generation cancelled")),
    };
    let outcome = res.and_then(|creation| {
        let path = crate::orchestrator::save_artifact(&session, &creation.id, out_dir)?;
        if args.json {
            let json = crate::store::CreationStore::export(&creation)?;
            let _ = out_tx.send(OutputLine::Stdout(json));
        } else {
            let summary = crate::text_summary::build_creation_summary(&creation, Some(&path));
            for line in summary.lines {
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
        }
        Ok(())
    });

    drop(session);
    let _ = progress.await;
    outcome
}

fn progress_line(ev: &SessionEvent) -> Option<String> {
    match ev {
        SessionEvent::GenerationStarted { mode } => Some(format!("== generating {} ==", mode.label())),
        SessionEvent::PollTick { attempt, elapsed } => Some(format!(
            "Waiting for video… check {} ({}s)",
            attempt,
            elapsed.as_secs()
        )),
        SessionEvent::Info(info) => Some(info.to_message()),
        // The returned error carries the failure.
        SessionEvent::GenerationFailed { .. }
        | SessionEvent::CreationReady { .. }
        | SessionEvent::HistoryChanged { .. } => None,
    }
}

/// Commands that only touch local history.
fn run_offline(
    args: &Cli,
    session: &mut Session,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
    command: Command,
) -> Result<()> {
    let stdout = |line: String| {
        let _ = out_tx.send(OutputLine::Stdout(line));
    };
    match command {
        Command::History => {
            if args.json {
                stdout(serde_json::to_string_pretty(session.history())?);
            } else {
                let summary = crate::text_summary::build_history_summary(session.history(), None);
                summary.lines.into_iter().for_each(stdout);
            }
        }
        Command::Show { id, html } => {
            let creation = session
                .find(&id)
                .with_context(|| format!("no creation with id {id}"))?;
            if html {
                stdout(
                    creation
                        .html()
                        .context("only app creations have an HTML document")?
                        .to_string(),
                );
            } else if args.json {
                stdout(crate::store::CreationStore::export(creation)?);
            } else {
                let summary = crate::text_summary::build_creation_summary(creation, None);
                summary.lines.into_iter().for_each(stdout);
            }
        }
        Command::Reorder { ids } => {
            let full: Vec<String> = ids
                .iter()
                .map(|id| {
                    session
                        .find(id)
                        .map(|c| c.id.clone())
                        .with_context(|| format!("no creation with id {id}"))
                })
                .collect::<Result<_>>()?;
            session.reorder(&full)?;
            let summary = crate::text_summary::build_history_summary(session.history(), None);
            summary.lines.into_iter().for_each(stdout);
        }
        Command::Move { from, to } => {
            session.move_item(from, to)?;
            let summary = crate::text_summary::build_history_summary(session.history(), None);
            summary.lines.into_iter().for_each(stdout);
        }
        Command::Import { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))?;
            let imported = session.import(&raw)?;
            let msg = if imported.added {
                format!("Imported \"{}\" ({})", imported.creation.name, imported.creation.id)
            } else {
                format!("\"{}\" is already in history", imported.creation.name)
            };
            let _ = out_tx.send(OutputLine::Stderr(msg));
        }
        Command::Export { id, out } => {
            if args.json {
                let (_, json) = session.export(&id)?;
                stdout(json);
            } else {
                let path = crate::orchestrator::export_creation(session, &id, &out)?;
                let _ = out_tx.send(OutputLine::Stderr(format!("Exported JSON: {}", path.display())));
            }
        }
        Command::Generate { .. } | Command::Regenerate { .. } => {
            anyhow::bail!("generation commands need the network")
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings_which_override_defaults() {
        let settings = Settings {
            api_key: Some("from-settings".into()),
            video_model: Some("veo-custom".into()),
            poll_interval: Some(Duration::from_secs(3)),
            ..Default::default()
        };

        let args = Cli::parse_from(["genstudio", "--api-key", "from-flag", "history"]);
        let cfg = build_config(&args, &settings);
        assert_eq!(cfg.api_key, "from-flag");
        assert_eq!(cfg.app_model, DEFAULT_APP_MODEL);
        assert_eq!(cfg.video_model, "veo-custom");
        assert_eq!(cfg.poll_interval, Duration::from_secs(3));

        let args = Cli::parse_from(["genstudio", "--poll-interval", "1s", "history"]);
        let cfg = build_config(&args, &settings);
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.temperature, 0.5);
    }

    #[test]
    fn generate_subcommand_parses_mode_and_inputs() {
        let args = Cli::parse_from([
            "genstudio", "generate", "--mode", "video", "-p", "ocean", "-f", "s.png",
        ]);
        match args.command {
            Some(Command::Generate {
                mode, prompt, file, ..
            }) => {
                assert_eq!(mode, GenerationMode::Video);
                assert_eq!(prompt, "ocean");
                assert_eq!(file, Some(PathBuf::from("s.png")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn no_subcommand_means_interactive() {
        let args = Cli::parse_from(["genstudio", "--no-examples"]);
        assert!(args.command.is_none());
        assert!(args.no_examples);
    }

    #[test]
    fn credential_errors_carry_a_hint() {
        let e = cli_error(SessionError::Generation(
            crate::engine::GenerationError::CredentialNotFound,
        ));
        assert!(format!("{e:#}").contains("--api-key"));
        let e = cli_error(SessionError::FileRequired);
        assert!(!format!("{e:#}").contains("--api-key"));
    }

    #[test]
    fn progress_lines_skip_history_noise() {
        assert!(progress_line(&SessionEvent::HistoryChanged {
            history: vec![],
            active: None
        })
        .is_none());
        assert_eq!(
            progress_line(&SessionEvent::Info(crate::model::InfoEvent::JobSubmitted {
                operation: "ops/1".into()
            }))
            .as_deref(),
            Some("Video job submitted: ops/1")
        );
    }
}
