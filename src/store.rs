//! Ordered creation history backed by durable storage.
//!
//! The in-memory list is authoritative for the session: persistence is best
//! effort and a failed write (quota, I/O, serialization) is logged and
//! otherwise ignored.

use crate::model::{Creation, CreationBody, VideoHandle};
use crate::storage::{DurableStorage, HISTORY_KEY};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StoreError {
    #[error("new order is not a permutation of the current history")]
    NotAPermutation,
    #[error("position {index} is out of range (history has {len} entries)")]
    OutOfRange { index: usize, len: usize },
    #[error("no creation with id {0}")]
    UnknownId(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid creation file: missing \"{0}\"")]
    MissingField(&'static str),
    #[error("invalid creation file: needs \"html\" or \"videoUrl\"")]
    MissingContent,
    #[error("invalid creation file: unknown type \"{0}\"")]
    UnknownType(String),
    #[error("invalid creation file: type \"{kind}\" has no \"{field}\"")]
    TypeMismatch { kind: String, field: &'static str },
    #[error("invalid creation file: bad timestamp: {0}")]
    Timestamp(String),
}

/// Result of importing one record.
#[derive(Debug, Clone)]
pub struct Imported {
    pub creation: Creation,
    /// False when a record with the same id was already in the history.
    pub added: bool,
}

const LOCAL_SOURCE: &str = "local storage";

pub struct CreationStore {
    history: Vec<Creation>,
    storage: Box<dyn DurableStorage>,
}

impl CreationStore {
    pub fn new(storage: Box<dyn DurableStorage>) -> Self {
        Self {
            history: Vec::new(),
            storage,
        }
    }

    pub fn history(&self) -> &[Creation] {
        &self.history
    }

    pub fn get(&self, id: &str) -> Option<&Creation> {
        self.history.iter().find(|c| c.id == id)
    }

    /// Prepend a creation (most recent first) and persist.
    pub fn append(&mut self, creation: Creation) {
        self.history.insert(0, creation);
        self.persist();
    }

    /// Replace the order with `new_order`, which must hold exactly the current records.
    pub fn reorder(&mut self, new_order: Vec<Creation>) -> Result<(), StoreError> {
        if !same_ids(&self.history, &new_order) {
            return Err(StoreError::NotAPermutation);
        }
        self.history = new_order;
        self.persist();
        Ok(())
    }

    /// Reorder by ids. Convenience over [`CreationStore::reorder`] for the CLI.
    pub fn reorder_ids(&mut self, ids: &[String]) -> Result<(), StoreError> {
        let mut by_id: HashMap<&str, &Creation> =
            self.history.iter().map(|c| (c.id.as_str(), c)).collect();
        let mut new_order = Vec::with_capacity(ids.len());
        for id in ids {
            let c = by_id
                .remove(id.as_str())
                .ok_or_else(|| StoreError::UnknownId(id.clone()))?;
            new_order.push(c.clone());
        }
        self.reorder(new_order)
    }

    /// Move the record at `from` so that it ends up at `to` (drag-and-drop semantics).
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<(), StoreError> {
        let len = self.history.len();
        for index in [from, to] {
            if index >= len {
                return Err(StoreError::OutOfRange { index, len });
            }
        }
        if from == to {
            return Ok(());
        }
        let item = self.history.remove(from);
        self.history.insert(to, item);
        self.persist();
        Ok(())
    }

    /// Write the whole history to durable storage. Never fails the caller.
    pub fn persist(&mut self) -> bool {
        let json = match serde_json::to_string(&self.history) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!("failed to serialize history: {e}");
                return false;
            }
        };
        match self.storage.write(HISTORY_KEY, &json) {
            Ok(()) => {
                tracing::debug!(entries = self.history.len(), bytes = json.len(), "history saved");
                true
            }
            Err(e) => {
                tracing::warn!("failed to save history: {e}");
                false
            }
        }
    }

    /// Install the first non-empty history from: persisted storage, then each fallback.
    ///
    /// Errors are logged and skipped; they never abort the chain. Returns the
    /// name of the source that won, if any.
    pub async fn load(&mut self, fallbacks: &[Box<dyn HistorySource>]) -> Option<String> {
        match self.read_persisted() {
            Ok(list) if !list.is_empty() => {
                tracing::info!(count = list.len(), "history loaded from local storage");
                self.history = list;
                return Some(LOCAL_SOURCE.to_string());
            }
            Ok(_) => tracing::debug!("no persisted history"),
            Err(e) => tracing::warn!("persisted history unreadable: {e:#}"),
        }
        for source in fallbacks {
            match source.load().await {
                Ok(list) if !list.is_empty() => {
                    tracing::info!(source = source.name(), count = list.len(), "history loaded");
                    self.history = list;
                    self.persist();
                    return Some(source.name().to_string());
                }
                Ok(_) => tracing::debug!(source = source.name(), "history source empty"),
                Err(e) => tracing::warn!(source = source.name(), "history source failed: {e:#}"),
            }
        }
        None
    }

    /// Read the persisted history without touching the in-memory list.
    pub fn read_persisted(&self) -> anyhow::Result<Vec<Creation>> {
        match self.storage.read(HISTORY_KEY)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// Validate and add an imported record, de-duplicating by id.
    pub fn import(&mut self, raw: &str) -> Result<Imported, ImportError> {
        let creation = parse_import(raw)?;
        if let Some(existing) = self.get(&creation.id) {
            tracing::info!(id = %creation.id, "import skipped, id already in history");
            return Ok(Imported {
                creation: existing.clone(),
                added: false,
            });
        }
        self.append(creation.clone());
        Ok(Imported {
            creation,
            added: true,
        })
    }

    /// Serialize one record for export. The video handle is never included.
    pub fn export(creation: &Creation) -> serde_json::Result<String> {
        serde_json::to_string_pretty(creation)
    }
}

fn same_ids(a: &[Creation], b: &[Creation]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut counts: HashMap<&str, isize> = HashMap::new();
    for c in a {
        *counts.entry(c.id.as_str()).or_default() += 1;
    }
    for c in b {
        *counts.entry(c.id.as_str()).or_default() -= 1;
    }
    counts.values().all(|n| *n == 0)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportPayload {
    id: Option<String>,
    name: Option<String>,
    timestamp: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    html: Option<String>,
    video_url: Option<String>,
    original_image: Option<String>,
}

/// Validate an import payload and build a creation from it.
pub fn parse_import(raw: &str) -> Result<Creation, ImportError> {
    let p: ImportPayload = serde_json::from_str(raw)?;
    let name = p
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or(ImportError::MissingField("name"))?;
    let kind = p.kind.ok_or(ImportError::MissingField("type"))?;
    let html = p.html.filter(|h| !h.is_empty());
    let video_url = p.video_url.filter(|v| !v.is_empty());
    if html.is_none() && video_url.is_none() {
        return Err(ImportError::MissingContent);
    }
    let body = match kind.as_str() {
        "app" => CreationBody::App {
            html: html.ok_or(ImportError::TypeMismatch {
                kind: kind.clone(),
                field: "html",
            })?,
        },
        "video" => CreationBody::Video {
            video_url: Some(VideoHandle::new(video_url.ok_or(
                ImportError::TypeMismatch {
                    kind: kind.clone(),
                    field: "videoUrl",
                },
            )?)),
        },
        other => return Err(ImportError::UnknownType(other.to_string())),
    };
    let timestamp = match p.timestamp {
        Some(ts) => OffsetDateTime::parse(&ts, &time::format_description::well_known::Rfc3339)
            .map_err(|e| ImportError::Timestamp(e.to_string()))?,
        None => OffsetDateTime::now_utc(),
    };
    Ok(Creation {
        id: p
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name,
        timestamp,
        body,
        original_image: p.original_image,
    })
}

/// One link in the history loading chain.
#[async_trait]
pub trait HistorySource: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self) -> anyhow::Result<Vec<Creation>>;
}

/// Fixed example creations fetched once when nothing is stored locally.
pub const DEFAULT_EXAMPLE_URLS: [&str; 3] = [
    "https://storage.googleapis.com/genstudio-examples/creations/sketch-to-app.json",
    "https://storage.googleapis.com/genstudio-examples/creations/whiteboard-game.json",
    "https://storage.googleapis.com/genstudio-examples/creations/notes-to-quiz.json",
];

/// Fetches example creations; individual failures are skipped.
pub struct RemoteExamples {
    http: reqwest::Client,
    urls: Vec<String>,
}

impl RemoteExamples {
    pub fn new(http: reqwest::Client, urls: Vec<String>) -> Self {
        Self { http, urls }
    }

    async fn fetch_one(&self, url: &str) -> anyhow::Result<Creation> {
        let body = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(parse_import(&body)?)
    }
}

#[async_trait]
impl HistorySource for RemoteExamples {
    fn name(&self) -> &str {
        "remote examples"
    }

    async fn load(&self) -> anyhow::Result<Vec<Creation>> {
        let fetches = self.urls.iter().map(|u| self.fetch_one(u));
        let results = futures::future::join_all(fetches).await;
        Ok(results
            .into_iter()
            .zip(&self.urls)
            .filter_map(|(r, url)| match r {
                Ok(c) => Some(c),
                Err(e) => {
                    tracing::warn!(%url, "skipping example: {e:#}");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn app(name: &str) -> Creation {
        Creation::new(
            name,
            CreationBody::App {
                html: format!("<!DOCTYPE html><h1>{name}</h1>"),
            },
            Some("data:image/png;base64,AAAA".into()),
        )
    }

    fn video(name: &str) -> Creation {
        Creation::new(
            name,
            CreationBody::Video {
                video_url: Some(VideoHandle::new("blob:genstudio/1")),
            },
            None,
        )
    }

    fn store() -> CreationStore {
        CreationStore::new(Box::new(MemoryStorage::default()))
    }

    struct Fixed(&'static str, anyhow::Result<Vec<Creation>>);

    #[async_trait]
    impl HistorySource for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        async fn load(&self) -> anyhow::Result<Vec<Creation>> {
            match &self.1 {
                Ok(v) => Ok(v.clone()),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }
    }

    #[test]
    fn append_prepends_most_recent_first() {
        let mut s = store();
        s.append(app("one"));
        s.append(app("two"));
        let names: Vec<_> = s.history().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["two", "one"]);
    }

    #[test]
    fn persist_round_trip_drops_only_the_video_handle() {
        let mut s = store();
        let a = app("app");
        let v = video("clip");
        s.append(a.clone());
        s.append(v.clone());

        let loaded = s.read_persisted().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1], a);
        assert_eq!(loaded[0].id, v.id);
        assert_eq!(loaded[0].name, v.name);
        assert_eq!(loaded[0].timestamp, v.timestamp);
        assert_eq!(loaded[0].original_image, v.original_image);
        assert!(loaded[0].video_url().is_none());
    }

    #[test]
    fn reorder_accepts_any_permutation_verbatim() {
        let mut s = store();
        for n in ["a", "b", "c", "d"] {
            s.append(app(n));
        }
        let current = s.history().to_vec();
        let mut perms = Vec::new();
        for a in 0..4 {
            for b in (0..4).filter(|&b| b != a) {
                for c in (0..4).filter(|&c| c != a && c != b) {
                    perms.push([a, b, c, 6 - a - b - c]);
                }
            }
        }
        assert_eq!(perms.len(), 24);
        for perm in perms {
            let order: Vec<Creation> = perm.iter().map(|&i| current[i].clone()).collect();
            s.reorder(order.clone()).unwrap();
            assert_eq!(s.history(), order.as_slice());
            assert_eq!(s.read_persisted().unwrap(), order);
        }
    }

    #[test]
    fn reorder_rejects_lost_or_duplicated_entries() {
        let mut s = store();
        s.append(app("a"));
        s.append(app("b"));
        let before = s.history().to_vec();

        let dup = vec![before[0].clone(), before[0].clone()];
        assert_eq!(s.reorder(dup), Err(StoreError::NotAPermutation));
        let short = vec![before[1].clone()];
        assert_eq!(s.reorder(short), Err(StoreError::NotAPermutation));
        assert_eq!(s.history(), before.as_slice());
    }

    #[test]
    fn reorder_by_ids() {
        let mut s = store();
        s.append(app("a"));
        s.append(app("b"));
        let ids: Vec<String> = s.history().iter().rev().map(|c| c.id.clone()).collect();
        s.reorder_ids(&ids).unwrap();
        assert_eq!(s.history()[0].name, "a");
        assert!(matches!(
            s.reorder_ids(&["nope".to_string(), ids[0].clone()]),
            Err(StoreError::UnknownId(_))
        ));
    }

    #[test]
    fn move_item_splices() {
        let mut s = store();
        for n in ["d", "c", "b", "a"] {
            s.append(app(n));
        }
        s.move_item(0, 2).unwrap();
        let names: Vec<_> = s.history().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["b", "c", "a", "d"]);
        assert_eq!(
            s.move_item(1, 9),
            Err(StoreError::OutOfRange { index: 9, len: 4 })
        );
    }

    #[test]
    fn persistence_failure_keeps_memory_authoritative() {
        let mut s = CreationStore::new(Box::new(MemoryStorage::with_quota(16)));
        s.append(app("big"));
        assert_eq!(s.history().len(), 1);
        assert!(!s.persist());
        assert!(s.read_persisted().unwrap().is_empty());
    }

    #[test]
    fn import_requires_name_type_and_content() {
        assert!(matches!(
            parse_import(r#"{"type":"app","html":"<p/>"}"#),
            Err(ImportError::MissingField("name"))
        ));
        assert!(matches!(
            parse_import(r#"{"name":"x","html":"<p/>"}"#),
            Err(ImportError::MissingField("type"))
        ));
        assert!(matches!(
            parse_import(r#"{"name":"x","type":"app"}"#),
            Err(ImportError::MissingContent)
        ));
        assert!(matches!(
            parse_import(r#"{"name":"x","type":"video","html":"<p/>"}"#),
            Err(ImportError::TypeMismatch { .. })
        ));
        assert!(matches!(
            parse_import(r#"{"name":"x","type":"gif","html":"<p/>"}"#),
            Err(ImportError::UnknownType(_))
        ));
        assert!(matches!(parse_import("not json"), Err(ImportError::Json(_))));
    }

    #[test]
    fn import_assigns_id_and_deduplicates() {
        let mut s = store();
        let first = s
            .import(r#"{"name":"x","type":"app","html":"<p/>"}"#)
            .unwrap();
        assert!(first.added);
        assert!(!first.creation.id.is_empty());

        let raw = r#"{"id":"fixed","name":"y","type":"app","html":"<p/>","timestamp":"2025-01-02T03:04:05Z"}"#;
        assert!(s.import(raw).unwrap().added);
        let again = s.import(raw).unwrap();
        assert!(!again.added);
        assert_eq!(again.creation.id, "fixed");
        assert_eq!(s.history().len(), 2);
    }

    #[test]
    fn export_omits_video_handle() {
        let json = CreationStore::export(&video("clip")).unwrap();
        assert!(!json.contains("videoUrl"));
        assert!(json.contains("\"type\": \"video\""));
    }

    #[tokio::test]
    async fn loader_chain_falls_through_to_first_non_empty_success() {
        let mut s = store();
        let sources: Vec<Box<dyn HistorySource>> = vec![
            Box::new(Fixed("broken", Err(anyhow::anyhow!("parse error")))),
            Box::new(Fixed("empty", Ok(vec![]))),
            Box::new(Fixed("examples", Ok(vec![app("demo")]))),
            Box::new(Fixed("never", Ok(vec![app("unused")]))),
        ];
        let winner = s.load(&sources).await;
        assert_eq!(winner.as_deref(), Some("examples"));
        assert_eq!(s.history()[0].name, "demo");
        assert_eq!(s.read_persisted().unwrap().len(), 1);
    }

    fn local_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    /// Serve `body` as a JSON response to a single HTTP request.
    async fn serve_once(body: String) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut req = Vec::new();
            let mut buf = [0u8; 1024];
            while !req.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                req.extend_from_slice(&buf[..n]);
            }
            let resp = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
            sock.shutdown().await.unwrap();
        });
        format!("http://{addr}/example.json")
    }

    #[tokio::test]
    async fn unreachable_examples_are_skipped_and_the_chain_moves_on() {
        let remote = RemoteExamples::new(
            local_client(),
            vec![
                "http://127.0.0.1:1/a.json".into(),
                "http://127.0.0.1:1/b.json".into(),
            ],
        );
        assert!(remote.load().await.unwrap().is_empty());

        let mut s = store();
        let sources: Vec<Box<dyn HistorySource>> =
            vec![Box::new(remote), Box::new(Fixed("bundled", Ok(vec![app("demo")])))];
        assert_eq!(s.load(&sources).await.as_deref(), Some("bundled"));
        assert_eq!(s.history()[0].name, "demo");
    }

    #[tokio::test]
    async fn one_failing_example_does_not_drop_the_others() {
        let served = CreationStore::export(&app("served")).unwrap();
        let good = serve_once(served).await;
        let remote = RemoteExamples::new(
            local_client(),
            vec!["http://127.0.0.1:1/down.json".into(), good],
        );

        let mut s = store();
        let sources: Vec<Box<dyn HistorySource>> = vec![Box::new(remote)];
        assert_eq!(s.load(&sources).await.as_deref(), Some("remote examples"));
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.history()[0].name, "served");
        assert_eq!(s.read_persisted().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn persisted_history_wins_over_fallbacks() {
        let mut backing = MemoryStorage::default();
        let saved = vec![app("saved")];
        backing
            .write(HISTORY_KEY, &serde_json::to_string(&saved).unwrap())
            .unwrap();
        let mut s = CreationStore::new(Box::new(backing));
        let sources: Vec<Box<dyn HistorySource>> =
            vec![Box::new(Fixed("examples", Ok(vec![app("demo")])))];

        assert_eq!(s.load(&sources).await.as_deref(), Some("local storage"));
        assert_eq!(s.history(), saved.as_slice());
    }

    #[tokio::test]
    async fn unreadable_persisted_history_falls_back() {
        let mut backing = MemoryStorage::default();
        backing.write(HISTORY_KEY, "{not json").unwrap();
        let mut s = CreationStore::new(Box::new(backing));
        let sources: Vec<Box<dyn HistorySource>> =
            vec![Box::new(Fixed("examples", Ok(vec![app("demo")])))];

        assert_eq!(s.load(&sources).await.as_deref(), Some("examples"));
        assert_eq!(s.history()[0].name, "demo");
    }

    #[tokio::test]
    async fn nothing_anywhere_leaves_history_empty() {
        let mut s = store();
        let sources: Vec<Box<dyn HistorySource>> = vec![
            Box::new(Fixed("down", Err(anyhow::anyhow!("offline")))),
        ];
        assert!(s.load(&sources).await.is_none());
        assert!(s.history().is_empty());
    }
}
