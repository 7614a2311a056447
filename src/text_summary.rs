//! Text summary builder for CLI output.
//!
//! Formats human-readable lines for creations and the history list.

use crate::model::{Creation, CreationBody};
use std::path::Path;
use time::macros::format_description;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

fn when(c: &Creation) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]");
    let ts = time::UtcOffset::current_local_offset()
        .map(|off| c.timestamp.to_offset(off))
        .unwrap_or(c.timestamp);
    ts.format(fmt).unwrap_or_else(|_| "-".into())
}

fn content(c: &Creation) -> String {
    match &c.body {
        CreationBody::App { html } => format!("{} bytes of HTML", html.len()),
        CreationBody::Video { video_url: Some(_) } => "video".into(),
        CreationBody::Video { video_url: None } => "video (not in this session)".into(),
    }
}

/// Describe a single creation, optionally with the file its artifact was written to.
pub(crate) fn build_creation_summary(c: &Creation, artifact: Option<&Path>) -> TextSummary {
    let mut lines = vec![
        format!("Name: {}", c.name),
        format!("Id: {}", c.id),
        format!("Type: {}", c.mode().label()),
        format!("Created: {}", when(c)),
        format!("Content: {}", content(c)),
    ];
    if c.original_image.is_some() {
        lines.push("Source image: stored".into());
    }
    if let Some(p) = artifact {
        lines.push(format!("Saved: {}", p.display()));
    }
    TextSummary { lines }
}

/// One line per creation, most recent first, marking the active one.
pub(crate) fn build_history_summary(history: &[Creation], active: Option<&str>) -> TextSummary {
    if history.is_empty() {
        return TextSummary {
            lines: vec!["No creations yet.".into()],
        };
    }
    let lines = history
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let marker = if Some(c.id.as_str()) == active { "*" } else { " " };
            format!(
                "{marker}{:>3}  {}  {:<5}  {}  {}",
                i,
                c.short_id(),
                c.mode().label(),
                when(c),
                c.name
            )
        })
        .collect();
    TextSummary { lines }
}
