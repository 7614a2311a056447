use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

/// Connection and model settings for one generation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub base_url: String,
    pub api_key: String,
    pub app_model: String,
    pub video_model: String,
    pub temperature: f32,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    App,
    Video,
}

impl GenerationMode {
    pub fn label(self) -> &'static str {
        match self {
            GenerationMode::App => "app",
            GenerationMode::Video => "video",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            GenerationMode::App => GenerationMode::Video,
            GenerationMode::Video => GenerationMode::App,
        }
    }
}

/// Session-scoped reference to video bytes held in the blob registry.
///
/// The handle is a `blob:` URL that only resolves inside the process that
/// minted it, so it is never written to durable storage or exports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoHandle(String);

impl VideoHandle {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Artifact carried by a creation. The `type` tag selects which payload exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CreationBody {
    App {
        html: String,
    },
    Video {
        #[serde(rename = "videoUrl", default, skip_serializing)]
        video_url: Option<VideoHandle>,
    },
}

impl CreationBody {
    pub fn mode(&self) -> GenerationMode {
        match self {
            CreationBody::App { .. } => GenerationMode::App,
            CreationBody::Video { .. } => GenerationMode::Video,
        }
    }
}

/// One generated (or imported) artifact in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creation {
    pub id: String,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(flatten)]
    pub body: CreationBody,
    #[serde(
        rename = "originalImage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub original_image: Option<String>,
}

impl Creation {
    pub fn new(name: impl Into<String>, body: CreationBody, original_image: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            timestamp: OffsetDateTime::now_utc(),
            body,
            original_image,
        }
    }

    pub fn mode(&self) -> GenerationMode {
        self.body.mode()
    }

    pub fn html(&self) -> Option<&str> {
        match &self.body {
            CreationBody::App { html } => Some(html),
            CreationBody::Video { .. } => None,
        }
    }

    pub fn video_url(&self) -> Option<&VideoHandle> {
        match &self.body {
            CreationBody::Video { video_url } => video_url.as_ref(),
            CreationBody::App { .. } => None,
        }
    }

    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(8) {
            Some((end, _)) => &self.id[..end],
            None => &self.id,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    GenerationStarted {
        mode: GenerationMode,
    },
    PollTick {
        attempt: u32,
        elapsed: Duration,
    },
    Info(InfoEvent),
    CreationReady {
        // Boxed: html payloads make this variant much larger than the rest.
        creation: Box<Creation>,
    },
    GenerationFailed {
        message: String,
        credential_missing: bool,
    },
    HistoryChanged {
        history: Vec<Creation>,
        active: Option<String>,
    },
}

/// Structured info events emitted by the session and consumed by UI/CLI layers.
#[derive(Debug, Clone)]
pub enum InfoEvent {
    Message(String),
    JobSubmitted { operation: String },
    Downloaded { bytes: u64 },
    HistoryLoaded { source: String, count: usize },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::JobSubmitted { operation } => {
                format!("Video job submitted: {}", operation)
            }
            InfoEvent::Downloaded { bytes } => {
                format!("Downloaded video ({:.1} MB)", *bytes as f64 / 1_000_000.0)
            }
            InfoEvent::HistoryLoaded { source, count } => {
                format!("Loaded {} creation(s) from {}", count, source)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_creation_serializes_type_tag_and_html() {
        let c = Creation::new(
            "sketch",
            CreationBody::App {
                html: "<!DOCTYPE html><p>hi</p>".into(),
            },
            Some("data:image/png;base64,AAAA".into()),
        );
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["type"], "app");
        assert_eq!(v["html"], "<!DOCTYPE html><p>hi</p>");
        assert_eq!(v["originalImage"], "data:image/png;base64,AAAA");
        assert!(v.get("videoUrl").is_none());
    }

    #[test]
    fn video_url_is_never_serialized() {
        let c = Creation::new(
            "clip",
            CreationBody::Video {
                video_url: Some(VideoHandle::new("blob:genstudio/123")),
            },
            None,
        );
        let json = serde_json::to_string(&c).unwrap();
        assert!(!json.contains("videoUrl"));
        assert!(!json.contains("blob:"));
        assert!(!json.contains("originalImage"));

        let back: Creation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mode(), GenerationMode::Video);
        assert!(back.video_url().is_none());
        assert_eq!(back.timestamp, c.timestamp);
    }

    #[test]
    fn deserializes_browser_style_timestamps() {
        let raw = r#"{"id":"a","name":"n","timestamp":"2025-03-01T10:20:30.123Z","type":"app","html":"<p/>"}"#;
        let c: Creation = serde_json::from_str(raw).unwrap();
        assert_eq!(c.timestamp.year(), 2025);
        assert_eq!(c.html(), Some("<p/>"));
    }
}
