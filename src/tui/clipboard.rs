//! Clipboard access for the TUI.
//!
//! On Linux the clipboard owner must stay alive until a clipboard manager has read
//! the contents, so copies are handed to one long-lived worker thread.

use anyhow::Result;
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

const HOLD_FOR: Duration = Duration::from_secs(2);

static CLIPBOARD_TX: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

fn worker() -> &'static std_mpsc::Sender<String> {
    CLIPBOARD_TX.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();
        std::thread::spawn(move || {
            for text in rx {
                match arboard::Clipboard::new() {
                    Ok(mut clipboard) => match clipboard.set_text(text) {
                        Ok(()) => std::thread::sleep(HOLD_FOR),
                        Err(e) => tracing::warn!("clipboard write failed: {e}"),
                    },
                    Err(e) => tracing::warn!("clipboard unavailable: {e}"),
                }
            }
        });
        tx
    })
}

/// Queue `text` for the clipboard; returns without waiting for the copy.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    worker()
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("clipboard worker stopped"))
}

/// Shorten long strings for the status line.
pub fn ellipsize(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}
