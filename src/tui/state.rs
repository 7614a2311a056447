use crate::model::{Creation, GenerationMode, SessionEvent};
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};
use std::time::Instant;

pub const TAB_CREATE: usize = 0;
pub const TAB_HISTORY: usize = 1;
pub const TAB_HELP: usize = 2;

/// Which Create-tab input receives typed characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Prompt,
    File,
}

/// A one-line text dialog drawn over the current tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialog {
    ApiKey(String),
    Regenerate { id: String, prompt: String },
    Import(String),
}

impl Dialog {
    pub fn buffer_mut(&mut self) -> &mut String {
        match self {
            Dialog::ApiKey(s) | Dialog::Import(s) => s,
            Dialog::Regenerate { prompt, .. } => prompt,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Dialog::ApiKey(_) => "API key not found: paste a Gemini API key",
            Dialog::Regenerate { .. } => "Regenerate with a new prompt",
            Dialog::Import(_) => "Import creation JSON (path)",
        }
    }
}

pub struct UiState {
    pub tab: usize,
    pub info: String,

    // Create tab inputs
    pub mode: GenerationMode,
    pub prompt: String,
    pub file_path: String,
    pub focus: Focus,
    pub preview_scroll: u16,

    // In-flight generation
    pub generating: bool,
    pub generation_started: Option<Instant>,
    pub poll_attempt: u32,

    pub history: Vec<Creation>,
    pub active: Option<String>,
    pub history_selected: usize, // Index of selected history item (0 = most recent)
    pub last_exported_path: Option<String>,

    pub dialog: Option<Dialog>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: TAB_CREATE,
            info: String::new(),
            mode: GenerationMode::App,
            prompt: String::new(),
            file_path: String::new(),
            focus: Focus::Prompt,
            preview_scroll: 0,
            generating: false,
            generation_started: None,
            poll_attempt: 0,
            history: Vec::new(),
            active: None,
            history_selected: 0,
            last_exported_path: None,
            dialog: None,
        }
    }
}

impl UiState {
    pub fn active_creation(&self) -> Option<&Creation> {
        let id = self.active.as_deref()?;
        self.history.iter().find(|c| c.id == id)
    }

    pub fn selected_creation(&self) -> Option<&Creation> {
        self.history.get(self.history_selected)
    }

    pub fn focused_input_mut(&mut self) -> &mut String {
        match self.focus {
            Focus::Prompt => &mut self.prompt,
            Focus::File => &mut self.file_path,
        }
    }

    fn clamp_selection(&mut self) {
        if self.history.is_empty() {
            self.history_selected = 0;
        } else if self.history_selected >= self.history.len() {
            self.history_selected = self.history.len() - 1;
        }
    }
}

/// Fold a session event into the UI state.
pub fn apply_event(state: &mut UiState, ev: SessionEvent) {
    match ev {
        SessionEvent::GenerationStarted { mode } => {
            state.generating = true;
            state.generation_started = Some(Instant::now());
            state.poll_attempt = 0;
            state.preview_scroll = 0;
            state.info = format!("Generating {}…", mode.label());
        }
        SessionEvent::PollTick { attempt, .. } => {
            state.poll_attempt = attempt;
        }
        SessionEvent::Info(info) => {
            let msg = info.to_message();
            if let Some(path) = msg.strip_prefix("Exported JSON: ") {
                state.last_exported_path = Some(path.to_string());
            }
            state.info = msg;
        }
        SessionEvent::CreationReady { creation } => {
            state.generating = false;
            state.generation_started = None;
            state.info = format!("Ready: {}", creation.name);
        }
        SessionEvent::GenerationFailed {
            message,
            credential_missing,
        } => {
            state.generating = false;
            state.generation_started = None;
            state.info = format!("Failed: {message}");
            if credential_missing {
                state.dialog = Some(Dialog::ApiKey(String::new()));
            }
        }
        SessionEvent::HistoryChanged { history, active } => {
            let selected_id = state.selected_creation().map(|c| c.id.clone());
            state.history = history;
            state.active = active;
            // Keep the cursor on the same creation across reorders.
            if let Some(pos) = selected_id.and_then(|id| state.history.iter().position(|c| c.id == id)) {
                state.history_selected = pos;
            }
            state.clamp_selection();
        }
    }
}

pub fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    status_area_width: u16,
) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    // Account for borders (2 chars on each side)
    let usable_width = status_area_width.saturating_sub(4).max(1);
    let label_text = format!("{label}:");
    let label_width = label_text.chars().count() as u16;

    let chars: Vec<char> = value.chars().collect();
    let first_width = usable_width.saturating_sub(label_width + 1).max(1) as usize;
    let rest_width = usable_width.saturating_sub(2).max(1) as usize;

    let (head, mut tail) = chars.split_at(first_width.min(chars.len()));
    out.push(Line::from(vec![
        Span::styled(label_text, Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::raw(head.iter().collect::<String>()),
    ]));
    while !tail.is_empty() {
        let (line, rest) = tail.split_at(rest_width.min(tail.len()));
        out.push(Line::from(vec![
            Span::raw("  "),
            Span::raw(line.iter().collect::<String>()),
        ]));
        tail = rest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CreationBody, InfoEvent};

    fn app(name: &str) -> Creation {
        Creation::new(name, CreationBody::App { html: "<p/>".into() }, None)
    }

    #[test]
    fn credential_failure_opens_key_dialog() {
        let mut state = UiState::default();
        apply_event(&mut state, SessionEvent::GenerationStarted { mode: GenerationMode::Video });
        assert!(state.generating);

        apply_event(
            &mut state,
            SessionEvent::GenerationFailed {
                message: "API key not found".into(),
                credential_missing: true,
            },
        );
        assert!(!state.generating);
        assert_eq!(state.dialog, Some(Dialog::ApiKey(String::new())));
    }

    #[test]
    fn history_updates_keep_cursor_on_the_same_creation() {
        let (a, b, c) = (app("a"), app("b"), app("c"));
        let mut state = UiState::default();
        apply_event(
            &mut state,
            SessionEvent::HistoryChanged {
                history: vec![a.clone(), b.clone(), c.clone()],
                active: None,
            },
        );
        state.history_selected = 1;

        apply_event(
            &mut state,
            SessionEvent::HistoryChanged {
                history: vec![b.clone(), a.clone(), c.clone()],
                active: Some(c.id.clone()),
            },
        );
        assert_eq!(state.history_selected, 0);
        assert_eq!(state.active_creation().map(|x| x.name.as_str()), Some("c"));

        apply_event(
            &mut state,
            SessionEvent::HistoryChanged {
                history: vec![],
                active: None,
            },
        );
        assert_eq!(state.history_selected, 0);
        assert!(state.selected_creation().is_none());
    }

    #[test]
    fn export_messages_remember_the_path() {
        let mut state = UiState::default();
        apply_event(
            &mut state,
            SessionEvent::Info(InfoEvent::Message("Exported JSON: /tmp/x.json".into())),
        );
        assert_eq!(state.last_exported_path.as_deref(), Some("/tmp/x.json"));
    }

    #[test]
    fn long_values_wrap_under_their_label() {
        let mut out = Vec::new();
        push_wrapped_status_kv(&mut out, "File", &"x".repeat(30), 20);
        // 16 usable columns: 10 after "File: ", then 14 per continuation line.
        assert_eq!(out.len(), 3);
        push_wrapped_status_kv(&mut out, "Empty", "   ", 20);
        assert_eq!(out.len(), 3);
    }
}
