//! Session lifecycle controller.
//!
//! Owns the session on the runtime, serializes generations and emits events for
//! presentation layers.

use super::post_process;
use crate::engine::{GeminiClient, GenerationEngine};
use crate::input::InputFile;
use crate::model::{GenerationMode, InfoEvent, SessionEvent};
use crate::session::{GenerateRequest, Session, SessionError};
use crate::settings::Settings;
use crate::store::HistorySource;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// How long a cancelled generation may keep running before it is dropped.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Generate {
        mode: GenerationMode,
        prompt: String,
        file: Option<PathBuf>,
    },
    Regenerate {
        id: String,
        prompt: String,
    },
    Select(String),
    Move {
        from: usize,
        to: usize,
    },
    Import(PathBuf),
    Export(String),
    SaveArtifact(String),
    Reset,
    SetApiKey(String),
    Cancel,
    Quit,
}

/// Where the controller reads from and writes to.
pub(crate) struct ControllerOptions {
    pub out_dir: PathBuf,
    pub settings_path: PathBuf,
    pub sources: Vec<Box<dyn HistorySource>>,
}

enum Job {
    Generate(GenerateRequest),
    Regenerate { id: String, prompt: String },
}

enum Flow {
    Continue,
    Quit,
}

fn info(event_tx: &UnboundedSender<SessionEvent>, msg: impl Into<String>) {
    let _ = event_tx.send(SessionEvent::Info(InfoEvent::Message(msg.into())));
}

/// Drive the session from UI commands until `Quit` or the command channel closes.
pub(crate) async fn run_controller(
    mut session: Session,
    opts: ControllerOptions,
    event_tx: UnboundedSender<SessionEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    if session.load_history(&opts.sources).await.is_none() {
        info(&event_tx, "No saved creations yet");
    }

    while let Some(cmd) = cmd_rx.recv().await {
        let job = match cmd {
            UiCommand::Generate { mode, prompt, file } => {
                match file.as_deref().map(InputFile::from_path).transpose() {
                    Ok(file) => Job::Generate(GenerateRequest::new(mode, prompt, file)),
                    Err(e) => {
                        info(&event_tx, format!("Cannot use file: {e:#}"));
                        continue;
                    }
                }
            }
            UiCommand::Regenerate { id, prompt } => Job::Regenerate { id, prompt },
            UiCommand::Cancel => {
                info(&event_tx, "Nothing to cancel");
                continue;
            }
            UiCommand::Quit => break,
            other => {
                handle_idle_command(&mut session, &opts, &event_tx, other);
                continue;
            }
        };
        if let Flow::Quit = drive(&mut session, job, &event_tx, &mut cmd_rx).await {
            break;
        }
    }
    Ok(())
}

/// Run one generation while still listening for `Cancel`/`Quit`.
async fn drive(
    session: &mut Session,
    job: Job,
    event_tx: &UnboundedSender<SessionEvent>,
    cmd_rx: &mut UnboundedReceiver<UiCommand>,
) -> Flow {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let fut = async move {
        match job {
            Job::Generate(mut req) => {
                req.cancel = token;
                session.generate(req).await
            }
            Job::Regenerate { id, prompt } => session.regenerate(&prompt, &id, token).await,
        }
    };
    tokio::pin!(fut);

    let mut quit_pending = false;
    let mut cancel_deadline: Option<Instant> = None;
    loop {
        tokio::select! {
            res = &mut fut => {
                // Other failures were already reported through the session's events.
                if let Err(SessionError::AlreadyGenerating) = res {
                    info(event_tx, "A generation is already running");
                }
                return if quit_pending { Flow::Quit } else { Flow::Continue };
            }
            cmd = cmd_rx.recv(), if !quit_pending => {
                match cmd {
                    Some(UiCommand::Cancel) => {
                        cancel.cancel();
                        info(event_tx, "Cancelling…");
                        cancel_deadline.get_or_insert_with(|| Instant::now() + CANCEL_GRACE);
                    }
                    Some(UiCommand::Quit) | None => {
                        quit_pending = true;
                        cancel.cancel();
                        cancel_deadline.get_or_insert_with(|| Instant::now() + CANCEL_GRACE);
                    }
                    Some(_) => info(event_tx, "Generation in progress; only cancel or quit are accepted"),
                }
            }
            // App requests do not observe the token, so a stalled cancel drops the request.
            _ = async {
                match cancel_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => futures::future::pending().await,
                }
            } => {
                let _ = event_tx.send(SessionEvent::GenerationFailed {
                    message: "generation cancelled".into(),
                    credential_missing: false,
                });
                return if quit_pending { Flow::Quit } else { Flow::Continue };
            }
        }
    }
}

fn handle_idle_command(
    session: &mut Session,
    opts: &ControllerOptions,
    event_tx: &UnboundedSender<SessionEvent>,
    cmd: UiCommand,
) {
    match cmd {
        UiCommand::Select(id) => {
            if let Err(e) = session.select(&id) {
                info(event_tx, e.to_string());
            }
        }
        UiCommand::Move { from, to } => {
            if let Err(e) = session.move_item(from, to) {
                info(event_tx, format!("Move failed: {e}"));
            }
        }
        UiCommand::Import(path) => {
            let res = std::fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))
                .and_then(|raw| session.import(&raw).map_err(anyhow::Error::from));
            match res {
                Ok(imported) if imported.added => {
                    info(event_tx, format!("Imported \"{}\"", imported.creation.name))
                }
                Ok(imported) => info(
                    event_tx,
                    format!("\"{}\" is already in history", imported.creation.name),
                ),
                Err(e) => info(event_tx, format!("Import failed: {e:#}")),
            }
        }
        UiCommand::Export(id) => match post_process::export_creation(session, &id, &opts.out_dir) {
            Ok(p) => info(event_tx, format!("Exported JSON: {}", p.display())),
            Err(e) => info(event_tx, format!("Export failed: {e:#}")),
        },
        UiCommand::SaveArtifact(id) => {
            match post_process::save_artifact(session, &id, &opts.out_dir) {
                Ok(p) => info(event_tx, format!("Saved: {}", p.display())),
                Err(e) => info(event_tx, format!("Save failed: {e:#}")),
            }
        }
        UiCommand::Reset => session.reset(),
        UiCommand::SetApiKey(key) => match apply_api_key(session, &key, &opts.settings_path) {
            Ok(()) => info(event_tx, "API key saved"),
            Err(e) => info(event_tx, format!("API key not applied: {e:#}")),
        },
        UiCommand::Generate { .. }
        | UiCommand::Regenerate { .. }
        | UiCommand::Cancel
        | UiCommand::Quit => {}
    }
}

/// Rebuild the engine around a new API key and remember it in the settings file.
pub(crate) fn apply_api_key(session: &mut Session, key: &str, settings_path: &Path) -> Result<()> {
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("API key is empty");
    }
    let mut cfg = session.engine_config().clone();
    cfg.api_key = key.to_string();
    let client = GeminiClient::new(&cfg)?;
    session.replace_engine(GenerationEngine::new(Arc::new(client), cfg));

    let mut settings = Settings::load(settings_path);
    settings.api_key = Some(key.to_string());
    settings
        .save(settings_path)
        .with_context(|| format!("save {}", settings_path.display()))?;
    tracing::info!("API key updated");
    Ok(())
}
