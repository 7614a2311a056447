//! Post-generation processing utilities.
//!
//! Writes finished creations to disk: the artifact itself (HTML or MP4) and the
//! JSON export format.

use crate::model::{Creation, CreationBody};
use crate::session::Session;
use crate::storage::{file_stem_for, write_file};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// File name for a creation's artifact: `<name>-<short id>.html|mp4`.
fn artifact_path(dir: &Path, creation: &Creation) -> PathBuf {
    let ext = match creation.body {
        CreationBody::App { .. } => "html",
        CreationBody::Video { .. } => "mp4",
    };
    dir.join(format!(
        "{}-{}.{ext}",
        file_stem_for(&creation.name),
        creation.short_id()
    ))
}

/// Write the artifact behind `id` into `dir`.
///
/// Video bytes only exist for creations made in this session.
pub(crate) fn save_artifact(session: &Session, id: &str, dir: &Path) -> Result<PathBuf> {
    let creation = session
        .find(id)
        .with_context(|| format!("no creation with id {id}"))?;
    let path = artifact_path(dir, creation);
    match &creation.body {
        CreationBody::App { html } => write_file(&path, html.as_bytes())?,
        CreationBody::Video { video_url } => {
            let data = video_url
                .as_ref()
                .and_then(|h| session.blobs().get(h))
                .context("video data is only available in the session that generated it")?;
            write_file(&path, data)?;
        }
    }
    tracing::info!(path = %path.display(), "artifact written");
    Ok(path)
}

/// Export one creation as `<sanitized name>.json` in `dir`.
pub(crate) fn export_creation(session: &Session, id: &str, dir: &Path) -> Result<PathBuf> {
    let (creation, json) = session.export(id)?;
    let path = dir.join(format!("{}.json", file_stem_for(&creation.name)));
    write_file(&path, json.as_bytes())?;
    tracing::info!(path = %path.display(), "creation exported");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{test_config, ScriptedBackend};
    use crate::engine::GenerationEngine;
    use crate::storage::MemoryStorage;
    use crate::store::CreationStore;
    use std::sync::Arc;

    fn session() -> Session {
        Session::new(
            GenerationEngine::new(Arc::new(ScriptedBackend::default()), test_config()),
            CreationStore::new(Box::new(MemoryStorage::default())),
        )
    }

    #[test]
    fn app_artifacts_are_written_as_html() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session();
        s.import(r#"{"id":"0123456789","name":"Tiny synth","type":"app","html":"<!DOCTYPE html>"}"#)
            .unwrap();

        let p = save_artifact(&s, "0123456789", dir.path()).unwrap();
        assert_eq!(p.file_name().unwrap(), "Tiny_synth-01234567.html");
        assert_eq!(std::fs::read_to_string(p).unwrap(), "<!DOCTYPE html>");
    }

    #[test]
    fn imported_videos_have_no_bytes_to_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session();
        s.import(r#"{"id":"v1","name":"Clip","type":"video","videoUrl":"blob:elsewhere/1"}"#)
            .unwrap();
        let err = save_artifact(&s, "v1", dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("only available"));
    }

    #[test]
    fn exports_omit_the_video_handle() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session();
        s.import(r#"{"id":"v1","name":"Clip","type":"video","videoUrl":"blob:elsewhere/1"}"#)
            .unwrap();
        let p = export_creation(&s, "v1", dir.path()).unwrap();
        let raw = std::fs::read_to_string(p).unwrap();
        assert!(raw.contains("\"type\": \"video\""));
        assert!(!raw.contains("videoUrl"));
        assert!(export_creation(&s, "missing", dir.path()).is_err());
    }
}
