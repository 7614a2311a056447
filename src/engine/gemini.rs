use super::{AppRequest, GenerationBackend, GenerationError, VideoOperation, VideoRequest};
use crate::model::EngineConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// HTTP client for the Gemini API (`generateContent` and Veo long-running jobs).
#[derive(Clone)]
pub struct GeminiClient {
    pub http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl GeminiClient {
    /// An empty key is accepted here; every request then fails with
    /// [`GenerationError::CredentialNotFound`] so callers can prompt for one.
    pub fn new(cfg: &EngineConfig) -> Result<Self> {
        let base_url = Url::parse(cfg.base_url.trim_end_matches('/'))
            .with_context(|| format!("invalid base URL: {}", cfg.base_url))?;
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base_url,
            api_key: cfg.api_key.trim().to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/v1beta/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Append the API key to an asset link as the `key` query parameter.
    fn authorized_download_url(&self, uri: &str) -> Result<Url, GenerationError> {
        let mut url = Url::parse(uri)
            .map_err(|e| GenerationError::InvalidResponse(format!("bad video link {uri}: {e}")))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    fn require_key(&self) -> Result<(), GenerationError> {
        if self.api_key.is_empty() {
            return Err(GenerationError::CredentialNotFound);
        }
        Ok(())
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, GenerationError> {
        self.require_key()?;
        let resp = req
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| GenerationError::InvalidResponse(format!("{e}; body: {}", truncate(&body))))
    }
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    async fn generate_content(&self, req: &AppRequest) -> Result<String, GenerationError> {
        let mut parts = vec![Part::Text {
            text: req.prompt.clone(),
        }];
        if let Some(file) = req.file.as_ref() {
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: file.mime_type.clone(),
                    data: file.base64(),
                },
            });
        }
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".into()),
                parts,
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text {
                    text: req.system_instruction.clone(),
                }],
            },
            generation_config: GenerationConfig {
                temperature: req.temperature,
            },
        };
        let url = self.endpoint(&format!("models/{}:generateContent", req.model));
        let resp: GenerateContentResponse = self.send_json(self.http.post(url).json(&body)).await?;
        resp.into_text()
    }

    async fn submit_video(&self, req: &VideoRequest) -> Result<VideoOperation, GenerationError> {
        let body = PredictLongRunningRequest {
            instances: vec![VideoInstance {
                prompt: req.prompt.clone(),
                image: req.image.as_ref().map(|f| VideoImage {
                    bytes_base64_encoded: f.base64(),
                    mime_type: f.mime_type.clone(),
                }),
            }],
            parameters: VideoParameters {
                sample_count: req.sample_count,
                resolution: req.resolution,
                aspect_ratio: req.aspect_ratio,
            },
        };
        let url = self.endpoint(&format!("models/{}:predictLongRunning", req.model));
        let op: OperationResponse = self.send_json(self.http.post(url).json(&body)).await?;
        Ok(op.into())
    }

    async fn get_operation(&self, name: &str) -> Result<VideoOperation, GenerationError> {
        let op: OperationResponse = self.send_json(self.http.get(self.endpoint(name))).await?;
        Ok(op.into())
    }

    async fn download(&self, uri: &str) -> Result<Bytes, GenerationError> {
        self.require_key()?;
        let url = self.authorized_download_url(uri)?;
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }
        let mut buf = BytesMut::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

fn api_error(status: u16, body: &str) -> GenerationError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or_else(|| truncate(body).to_string());
    GenerationError::from_api(Some(status), message)
}

fn truncate(s: &str) -> &str {
    const MAX: usize = 500;
    match s.char_indices().nth(MAX) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: Content,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    InlineData {
        inline_data: InlineData,
    },
    Other(serde_json::Value),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> Result<String, GenerationError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(GenerationError::Api {
                status: None,
                message: format!("prompt blocked: {reason}"),
            });
        }
        let candidate = self.candidates.into_iter().next().ok_or_else(|| {
            GenerationError::InvalidResponse("response had no candidates".into())
        })?;
        let text: String = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text),
                _ => None,
            })
            .collect();
        if text.trim().is_empty() {
            return Err(GenerationError::InvalidResponse(format!(
                "candidate had no text (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct PredictLongRunningRequest {
    instances: Vec<VideoInstance>,
    parameters: VideoParameters,
}

#[derive(Debug, Serialize)]
struct VideoInstance {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<VideoImage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoImage {
    bytes_base64_encoded: String,
    mime_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoParameters {
    sample_count: u32,
    resolution: &'static str,
    aspect_ratio: &'static str,
}

#[derive(Debug, Deserialize)]
struct OperationResponse {
    name: String,
    #[serde(default)]
    done: bool,
    error: Option<ApiErrorBody>,
    response: Option<OperationResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResult {
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Debug, Deserialize)]
struct GeneratedSample {
    video: Option<VideoFile>,
}

#[derive(Debug, Deserialize)]
struct VideoFile {
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

impl From<OperationResponse> for VideoOperation {
    fn from(op: OperationResponse) -> Self {
        let video_uri = op
            .response
            .and_then(|r| r.generate_video_response)
            .and_then(|r| r.generated_samples.into_iter().next())
            .and_then(|s| s.video)
            .and_then(|v| v.uri);
        VideoOperation {
            name: op.name,
            done: op.done,
            error: op
                .error
                .map(|e| e.message.unwrap_or_else(|| "unknown error".into())),
            video_uri,
        }
    }
}
