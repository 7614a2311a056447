//! Session controller: the single owner of history, the active creation and
//! the generating flag.

use crate::blobs::BlobRegistry;
use crate::engine::{GenerationEngine, GenerationError};
use crate::input::InputFile;
use crate::model::{Creation, CreationBody, GenerationMode, SessionEvent};
use crate::store::{CreationStore, HistorySource, ImportError, Imported, StoreError};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

const NAME_FROM_PROMPT_CHARS: usize = 40;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a generation is already in progress")]
    AlreadyGenerating,
    #[error("app mode needs an image or PDF to work from")]
    FileRequired,
    #[error("enter a prompt or choose an image")]
    EmptyInput,
    #[error("no creation with id {0}")]
    UnknownCreation(String),
    #[error("stored source image is unreadable: {0}")]
    SeedImage(String),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    pub fn is_credential_missing(&self) -> bool {
        matches!(self, SessionError::Generation(e) if e.is_credential_missing())
    }
}

/// Input for one generation.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub file: Option<InputFile>,
    pub mode: GenerationMode,
    pub cancel: CancellationToken,
}

impl GenerateRequest {
    pub fn new(mode: GenerationMode, prompt: impl Into<String>, file: Option<InputFile>) -> Self {
        Self {
            prompt: prompt.into(),
            file,
            mode,
            cancel: CancellationToken::new(),
        }
    }
}

/// Clears the generating flag when dropped, including when the future is cancelled.
struct GeneratingGuard(Arc<AtomicBool>);

impl Drop for GeneratingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Session {
    engine: GenerationEngine,
    store: CreationStore,
    blobs: BlobRegistry,
    active: Option<String>,
    generating: Arc<AtomicBool>,
    event_tx: Option<UnboundedSender<SessionEvent>>,
}

impl Session {
    pub fn new(engine: GenerationEngine, store: CreationStore) -> Self {
        Self {
            engine,
            store,
            blobs: BlobRegistry::default(),
            active: None,
            generating: Arc::new(AtomicBool::new(false)),
            event_tx: None,
        }
    }

    pub fn with_events(mut self, event_tx: UnboundedSender<SessionEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Swap the engine, e.g. after the user selects a different API key.
    pub fn replace_engine(&mut self, engine: GenerationEngine) {
        self.engine = engine;
    }

    pub fn engine_config(&self) -> &crate::model::EngineConfig {
        self.engine.config()
    }

    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::Acquire)
    }

    pub fn history(&self) -> &[Creation] {
        self.store.history()
    }

    pub fn blobs(&self) -> &BlobRegistry {
        &self.blobs
    }

    pub fn active(&self) -> Option<&Creation> {
        self.active.as_deref().and_then(|id| self.store.get(id))
    }

    pub fn find(&self, id_or_prefix: &str) -> Option<&Creation> {
        if id_or_prefix.trim().is_empty() {
            return None;
        }
        self.store.get(id_or_prefix).or_else(|| {
            let mut matches = self
                .store
                .history()
                .iter()
                .filter(|c| c.id.starts_with(id_or_prefix));
            match (matches.next(), matches.next()) {
                (Some(c), None) => Some(c),
                _ => None,
            }
        })
    }

    pub fn select(&mut self, id: &str) -> Result<&Creation, SessionError> {
        let id = self
            .find(id)
            .map(|c| c.id.clone())
            .ok_or_else(|| SessionError::UnknownCreation(id.to_string()))?;
        self.active = Some(id.clone());
        self.emit_history();
        self.store.get(&id).ok_or(SessionError::UnknownCreation(id))
    }

    pub async fn load_history(&mut self, fallbacks: &[Box<dyn HistorySource>]) -> Option<String> {
        let source = self.store.load(fallbacks).await;
        if let Some(src) = source.as_ref() {
            self.emit(SessionEvent::Info(crate::model::InfoEvent::HistoryLoaded {
                source: src.clone(),
                count: self.store.history().len(),
            }));
        }
        self.emit_history();
        source
    }

    /// Generate a new creation from a prompt and/or file. Clears the active creation first.
    pub async fn generate(&mut self, req: GenerateRequest) -> Result<Creation, SessionError> {
        let res = self.start_generate(req).await;
        self.report(res)
    }

    async fn start_generate(&mut self, req: GenerateRequest) -> Result<Creation, SessionError> {
        validate_input(req.mode, &req.prompt, req.file.as_ref())?;
        let _guard = self.begin()?;
        self.active = None;
        self.emit_history();

        let name = creation_name(&req.prompt, req.file.as_ref());
        let original_image = req.file.as_ref().map(InputFile::to_data_uri);
        self.produce(
            req.mode,
            &req.prompt,
            req.file.as_ref(),
            name,
            original_image,
            &req.cancel,
        )
        .await
    }

    /// Produce a new creation from `base`'s source image and a new prompt.
    ///
    /// Unlike [`Session::generate`] the active creation stays in place until the
    /// new one is ready.
    pub async fn regenerate(
        &mut self,
        prompt: &str,
        base_id: &str,
        cancel: CancellationToken,
    ) -> Result<Creation, SessionError> {
        let res = self.start_regenerate(prompt, base_id, &cancel).await;
        self.report(res)
    }

    async fn start_regenerate(
        &mut self,
        prompt: &str,
        base_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Creation, SessionError> {
        let base = self
            .find(base_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownCreation(base_id.to_string()))?;
        let seed = match base.original_image.as_deref() {
            Some(uri) => Some(
                InputFile::from_data_uri(&base.name, uri)
                    .map_err(|e| SessionError::SeedImage(format!("{e:#}")))?,
            ),
            None => None,
        };
        let mode = base.mode();
        validate_input(mode, prompt, seed.as_ref())?;
        let _guard = self.begin()?;

        self.produce(
            mode,
            prompt,
            seed.as_ref(),
            base.name.clone(),
            base.original_image.clone(),
            cancel,
        )
        .await
    }

    /// Clear the active creation and the generating flag unconditionally.
    pub fn reset(&mut self) {
        self.active = None;
        self.generating.store(false, Ordering::Release);
        self.blobs.release_unreferenced(self.store.history());
        self.emit_history();
    }

    /// Import a creation file and make it active (the existing record if the id is known).
    pub fn import(&mut self, raw: &str) -> Result<Imported, SessionError> {
        let imported = self.store.import(raw)?;
        self.active = Some(imported.creation.id.clone());
        self.emit_history();
        Ok(imported)
    }

    pub fn export(&self, id: &str) -> Result<(Creation, String), SessionError> {
        let creation = self
            .find(id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownCreation(id.to_string()))?;
        let json = CreationStore::export(&creation).map_err(ImportError::from)?;
        Ok((creation, json))
    }

    pub fn reorder(&mut self, ids: &[String]) -> Result<(), SessionError> {
        self.store.reorder_ids(ids)?;
        self.emit_history();
        Ok(())
    }

    pub fn move_item(&mut self, from: usize, to: usize) -> Result<(), SessionError> {
        self.store.move_item(from, to)?;
        self.emit_history();
        Ok(())
    }

    fn begin(&self) -> Result<GeneratingGuard, SessionError> {
        if self.generating.swap(true, Ordering::AcqRel) {
            return Err(SessionError::AlreadyGenerating);
        }
        Ok(GeneratingGuard(self.generating.clone()))
    }

    async fn produce(
        &mut self,
        mode: GenerationMode,
        prompt: &str,
        file: Option<&InputFile>,
        name: String,
        original_image: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Creation, SessionError> {
        self.emit(SessionEvent::GenerationStarted { mode });
        tracing::info!(mode = mode.label(), has_file = file.is_some(), "generation started");
        let body = match mode {
            GenerationMode::App => CreationBody::App {
                html: self.engine.generate_app(prompt, file).await?,
            },
            GenerationMode::Video => {
                let data = self
                    .engine
                    .generate_video(prompt, file, self.event_tx.as_ref(), cancel)
                    .await?;
                CreationBody::Video {
                    video_url: Some(self.blobs.register(data)),
                }
            }
        };
        let creation = Creation::new(name, body, original_image);
        self.store.append(creation.clone());
        self.active = Some(creation.id.clone());
        tracing::info!(id = %creation.id, name = %creation.name, "creation ready");
        Ok(creation)
    }

    fn report(&self, res: Result<Creation, SessionError>) -> Result<Creation, SessionError> {
        match &res {
            Ok(c) => {
                self.emit(SessionEvent::CreationReady {
                    creation: Box::new(c.clone()),
                });
                self.emit_history();
            }
            // The running generation reports for itself.
            Err(SessionError::AlreadyGenerating) => {}
            Err(e) => {
                tracing::warn!("generation failed: {e}");
                self.emit(SessionEvent::GenerationFailed {
                    message: e.to_string(),
                    credential_missing: e.is_credential_missing(),
                });
            }
        }
        res
    }

    fn emit(&self, ev: SessionEvent) {
        if let Some(tx) = self.event_tx.as_ref() {
            let _ = tx.send(ev);
        }
    }

    fn emit_history(&self) {
        if self.event_tx.is_some() {
            self.emit(SessionEvent::HistoryChanged {
                history: self.store.history().to_vec(),
                active: self.active.clone(),
            });
        }
    }
}

/// Reject input a mode cannot use, before anything reaches the network.
pub fn validate_input(
    mode: GenerationMode,
    prompt: &str,
    file: Option<&InputFile>,
) -> Result<(), SessionError> {
    match mode {
        GenerationMode::App if file.is_none() => Err(SessionError::FileRequired),
        GenerationMode::Video if file.is_none() && prompt.trim().is_empty() => {
            Err(SessionError::EmptyInput)
        }
        _ => Ok(()),
    }
}

fn creation_name(prompt: &str, file: Option<&InputFile>) -> String {
    if let Some(f) = file {
        let stem = f.name.rsplit_once('.').map(|(s, _)| s).unwrap_or(&f.name);
        if !stem.trim().is_empty() {
            return stem.trim().to_string();
        }
    }
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return "Untitled creation".to_string();
    }
    let mut name: String = prompt.chars().take(NAME_FROM_PROMPT_CHARS).collect();
    if prompt.chars().count() > NAME_FROM_PROMPT_CHARS {
        name.push('…');
    }
    name
}
