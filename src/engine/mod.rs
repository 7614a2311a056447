mod gemini;
mod poller;
pub(crate) mod prompts;

pub use gemini::GeminiClient;
pub use poller::{poll_until_done, PollParams};

use crate::input::InputFile;
use crate::model::{EngineConfig, InfoEvent, SessionEvent};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Message the Gemini API returns when the API key does not resolve to a project.
pub(crate) const ENTITY_NOT_FOUND: &str = "Requested entity was not found";

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Gemini API error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Api { status: Option<u16>, message: String },
    #[error("API key not found, please select an API key and try again")]
    CredentialNotFound,
    #[error("video generation failed: {0}")]
    JobFailed(String),
    #[error("video generation finished without a download link")]
    MissingVideoUri,
    #[error("invalid response from Gemini: {0}")]
    InvalidResponse(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("generation cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Map an API error body to an error kind, singling out the missing-credential case.
    pub fn from_api(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains(ENTITY_NOT_FOUND) {
            GenerationError::CredentialNotFound
        } else {
            GenerationError::Api { status, message }
        }
    }

    /// Map a failed long-running job to an error kind.
    pub fn from_job(message: Option<String>) -> Self {
        match message {
            Some(m) if m.contains(ENTITY_NOT_FOUND) => GenerationError::CredentialNotFound,
            Some(m) if !m.trim().is_empty() => GenerationError::JobFailed(m),
            _ => GenerationError::JobFailed("unknown error".into()),
        }
    }

    pub fn is_credential_missing(&self) -> bool {
        matches!(self, GenerationError::CredentialNotFound)
    }
}

/// Request for a single HTML document.
#[derive(Debug, Clone)]
pub struct AppRequest {
    pub model: String,
    pub prompt: String,
    pub file: Option<InputFile>,
    pub system_instruction: String,
    pub temperature: f32,
}

/// Request for a long-running video job.
#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub model: String,
    pub prompt: String,
    pub image: Option<InputFile>,
    pub sample_count: u32,
    pub resolution: &'static str,
    pub aspect_ratio: &'static str,
}

/// Snapshot of a long-running video job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoOperation {
    pub name: String,
    pub done: bool,
    pub error: Option<String>,
    pub video_uri: Option<String>,
}

/// Transport seam between the engine and the generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate_content(&self, req: &AppRequest) -> Result<String, GenerationError>;

    async fn submit_video(&self, req: &VideoRequest) -> Result<VideoOperation, GenerationError>;

    async fn get_operation(&self, name: &str) -> Result<VideoOperation, GenerationError>;

    /// Fetch a generated asset. Implementations attach the access credential.
    async fn download(&self, uri: &str) -> Result<Bytes, GenerationError>;
}

/// Strip a Markdown code fence wrapped around a model reply, if present.
pub fn strip_code_fence(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // The opening fence may carry a language tag ("```html").
        text = match rest.find('\n') {
            Some(i) => &rest[i + 1..],
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
        };
        // Anything after the closing fence is commentary, not markup.
        if let Some(end) = text.rfind("```") {
            text = &text[..end];
        }
    } else if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim().to_string()
}

#[derive(Clone)]
pub struct GenerationEngine {
    backend: Arc<dyn GenerationBackend>,
    cfg: EngineConfig,
}

impl GenerationEngine {
    pub fn new(backend: Arc<dyn GenerationBackend>, cfg: EngineConfig) -> Self {
        Self { backend, cfg }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub async fn generate_app(
        &self,
        prompt: &str,
        file: Option<&InputFile>,
    ) -> Result<String, GenerationError> {
        let prompt = if prompt.trim().is_empty() {
            prompts::DEFAULT_APP_PROMPT.to_string()
        } else {
            prompt.trim().to_string()
        };
        let req = AppRequest {
            model: self.cfg.app_model.clone(),
            prompt,
            file: file.cloned(),
            system_instruction: prompts::APP_SYSTEM_INSTRUCTION.to_string(),
            temperature: self.cfg.temperature,
        };
        tracing::debug!(model = %req.model, has_file = req.file.is_some(), "generating app");
        let raw = self.backend.generate_content(&req).await?;
        let html = strip_code_fence(&raw);
        if html.is_empty() {
            return Err(GenerationError::InvalidResponse(
                "model returned an empty document".into(),
            ));
        }
        Ok(html)
    }

    /// Submit a video job, poll it to completion and download the result.
    pub async fn generate_video(
        &self,
        prompt: &str,
        file: Option<&InputFile>,
        event_tx: Option<&UnboundedSender<SessionEvent>>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, GenerationError> {
        if let Some(f) = file {
            if !f.is_image() {
                return Err(GenerationError::InvalidInput(format!(
                    "video mode needs an image, got {}",
                    f.mime_type
                )));
            }
        }
        let prompt = if prompt.trim().is_empty() {
            prompts::DEFAULT_VIDEO_PROMPT.to_string()
        } else {
            prompt.trim().to_string()
        };
        let req = VideoRequest {
            model: self.cfg.video_model.clone(),
            prompt,
            image: file.cloned(),
            sample_count: 1,
            resolution: "720p",
            aspect_ratio: "16:9",
        };

        let op = self.backend.submit_video(&req).await?;
        tracing::info!(operation = %op.name, model = %req.model, "video job submitted");
        if let Some(tx) = event_tx {
            let _ = tx.send(SessionEvent::Info(InfoEvent::JobSubmitted {
                operation: op.name.clone(),
            }));
        }

        let uri = poll_until_done(
            op,
            PollParams {
                backend: self.backend.as_ref(),
                interval: self.cfg.poll_interval,
                event_tx,
                cancel,
            },
        )
        .await?;

        let data = self.backend.download(&uri).await?;
        tracing::info!(bytes = data.len(), "video downloaded");
        if let Some(tx) = event_tx {
            let _ = tx.send(SessionEvent::Info(InfoEvent::Downloaded {
                bytes: data.len() as u64,
            }));
        }
        Ok(data)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn strips_html_fence() {
        let raw = "```html\n<!DOCTYPE html>\n<html></html>\n```";
        assert_eq!(strip_code_fence(raw), "<!DOCTYPE html>\n<html></html>");
    }

    #[test]
    fn drops_commentary_after_the_closing_fence() {
        let raw = "```html\n<!DOCTYPE html><p>x</p>\n```\nThis app lets you play.";
        let out = strip_code_fence(raw);
        assert_eq!(out, "<!DOCTYPE html><p>x</p>");
        assert!(!out.contains("```"));
    }

    #[test]
    fn strips_bare_fence_and_tolerates_absence() {
        assert_eq!(strip_code_fence("```\n<p>x</p>\n```\n"), "<p>x</p>");
        assert_eq!(strip_code_fence("<!DOCTYPE html><p>x</p>"), "<!DOCTYPE html><p>x</p>");
        assert_eq!(strip_code_fence("```html<p>x</p>```"), "<p>x</p>");
    }

    #[test]
    fn entity_not_found_maps_to_credential_error() {
        let e = GenerationError::from_api(Some(404), "Requested entity was not found.");
        assert!(e.is_credential_missing());
        let e = GenerationError::from_api(Some(429), "Resource exhausted");
        assert!(!e.is_credential_missing());
        assert!(e.to_string().contains("429"));
    }

    #[tokio::test]
    async fn app_generation_strips_fence_and_sends_fixed_settings() {
        let backend = Arc::new(ScriptedBackend::with_app_reply(
            "```html\n<!DOCTYPE html><body>ok</body>\n```",
        ));
        let engine = GenerationEngine::new(backend.clone(), test_config());
        let file = InputFile::new("a.png", "image/png", vec![1, 2, 3]);

        let html = engine.generate_app("", Some(&file)).await.unwrap();
        assert_eq!(html, "<!DOCTYPE html><body>ok</body>");
        assert!(!html.contains("```"));

        let reqs = backend.app_requests.lock().unwrap();
        assert_eq!(reqs[0].temperature, 0.5);
        assert_eq!(reqs[0].prompt, prompts::DEFAULT_APP_PROMPT);
        assert_eq!(reqs[0].system_instruction, prompts::APP_SYSTEM_INSTRUCTION);
        assert_eq!(reqs[0].file.as_ref().unwrap().mime_type, "image/png");
    }

    #[tokio::test(start_paused = true)]
    async fn video_generation_downloads_the_finished_asset() {
        let backend = Arc::new(ScriptedBackend::with_video(
            pending("operations/1"),
            vec![Ok(finished("operations/1", Some("https://files/v.mp4?alt=media")))],
            b"mp4",
        ));
        let engine = GenerationEngine::new(backend.clone(), test_config());
        let image = InputFile::new("cat.png", "image/png", vec![9]);

        let data = engine
            .generate_video("", Some(&image), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(&data[..], b"mp4");

        let reqs = backend.video_requests.lock().unwrap();
        assert_eq!(reqs[0].prompt, prompts::DEFAULT_VIDEO_PROMPT);
        assert_eq!(reqs[0].sample_count, 1);
        assert_eq!(reqs[0].resolution, "720p");
        assert_eq!(reqs[0].aspect_ratio, "16:9");
        assert_eq!(
            backend.downloaded.lock().unwrap().as_slice(),
            ["https://files/v.mp4?alt=media"]
        );
    }

    #[tokio::test]
    async fn video_generation_rejects_pdf_seed() {
        let backend = Arc::new(ScriptedBackend::default());
        let engine = GenerationEngine::new(backend.clone(), test_config());
        let pdf = InputFile::new("doc.pdf", "application/pdf", vec![1]);
        let err = engine
            .generate_video("animate", Some(&pdf), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidInput(_)));
        assert_eq!(backend.call_count(), 0);
    }
}
