//! Session-scoped registry of binary video data.
//!
//! Mirrors object URLs in a browser: bytes are registered under a `blob:`
//! handle that resolves only while this process holds them.

use crate::model::{Creation, VideoHandle};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};

const BLOB_SCHEME: &str = "blob:genstudio/";

#[derive(Default)]
pub struct BlobRegistry {
    blobs: HashMap<VideoHandle, Bytes>,
}

impl BlobRegistry {
    pub fn register(&mut self, data: Bytes) -> VideoHandle {
        let handle = VideoHandle::new(format!("{BLOB_SCHEME}{}", uuid::Uuid::new_v4()));
        self.blobs.insert(handle.clone(), data);
        handle
    }

    /// Bytes behind a handle, if it was minted by this registry and is still held.
    pub fn get(&self, handle: &VideoHandle) -> Option<&Bytes> {
        self.blobs.get(handle)
    }

    /// Drop every blob no creation in `live` refers to. Returns how many were released.
    pub fn release_unreferenced(&mut self, live: &[Creation]) -> usize {
        let referenced: HashSet<&VideoHandle> =
            live.iter().filter_map(|c| c.video_url()).collect();
        let before = self.blobs.len();
        self.blobs.retain(|h, _| referenced.contains(h));
        let released = before - self.blobs.len();
        if released > 0 {
            tracing::debug!(released, "released unreferenced video blobs");
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CreationBody;

    #[test]
    fn handles_resolve_until_released() {
        let mut reg = BlobRegistry::default();
        let kept = reg.register(Bytes::from_static(b"a"));
        let dropped = reg.register(Bytes::from_static(b"b"));
        assert!(kept.as_str().starts_with("blob:"));
        assert_ne!(kept, dropped);

        let live = vec![Creation::new(
            "clip",
            CreationBody::Video {
                video_url: Some(kept.clone()),
            },
            None,
        )];
        assert_eq!(reg.release_unreferenced(&live), 1);
        assert_eq!(reg.get(&kept).map(|b| &b[..]), Some(&b"a"[..]));
        assert!(reg.get(&dropped).is_none());
        assert_eq!(reg.blobs.len(), 1);
    }

    #[test]
    fn foreign_handles_do_not_resolve() {
        let reg = BlobRegistry::default();
        assert!(reg.get(&VideoHandle::new("blob:https://aistudio/abc")).is_none());
    }
}
