mod clipboard;
mod help;
mod state;

use crate::cli::Cli;
use crate::model::{CreationBody, EngineConfig, SessionEvent};
use crate::orchestrator::{self, ControllerOptions, UiCommand};
use anyhow::{Context, Result};
use clipboard::{copy_to_clipboard, ellipsize};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::{apply_event, push_wrapped_status_kv, Dialog, Focus, UiState};
use state::{TAB_CREATE, TAB_HELP, TAB_HISTORY};
use std::path::PathBuf;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(args: Cli, cfg: EngineConfig, settings_path: PathBuf) -> Result<()> {
    // Unbounded channels avoid backpressure between the session and the UI thread.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let needs_key = cfg.api_key.trim().is_empty();
    let sources = crate::cli::history_sources(&args, &cfg)?;
    let session = crate::cli::build_session(&args, cfg)?.with_events(event_tx.clone());
    let opts = ControllerOptions {
        out_dir: std::env::current_dir().context("get current directory")?,
        settings_path,
        sources,
    };

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_handle = std::thread::spawn(move || run_threaded(needs_key, event_rx, cmd_tx));

    let res = orchestrator::run_controller(session, opts, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
pub fn run_threaded(
    needs_key: bool,
    mut event_rx: UnboundedReceiver<SessionEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState::default();
    if needs_key {
        state.dialog = Some(Dialog::ApiKey(String::new()));
        state.info = "No API key configured".into();
    }

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            apply_event(&mut state, ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if let Some(cmd) = handle_key(&mut state, k) {
                    let quit = matches!(cmd, UiCommand::Quit);
                    let _ = cmd_tx.send(cmd);
                    if quit {
                        break Ok(());
                    }
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

/// Apply a key press to the UI state and return the command it triggers, if any.
fn handle_key(state: &mut UiState, k: KeyEvent) -> Option<UiCommand> {
    let ctrl = k.modifiers.contains(KeyModifiers::CONTROL);
    if ctrl && k.code == KeyCode::Char('c') {
        return Some(UiCommand::Quit);
    }

    if state.dialog.is_some() {
        return handle_dialog_key(state, k);
    }

    match (ctrl, k.code) {
        (_, KeyCode::Tab) => {
            state.tab = (state.tab + 1) % 3;
            return None;
        }
        (_, KeyCode::BackTab) => {
            state.tab = (state.tab + 2) % 3;
            return None;
        }
        (_, KeyCode::Esc) => {
            return state.generating.then_some(UiCommand::Cancel);
        }
        (true, KeyCode::Char('k')) => {
            state.dialog = Some(Dialog::ApiKey(String::new()));
            return None;
        }
        _ => {}
    }

    match state.tab {
        TAB_CREATE => handle_create_key(state, ctrl, k.code),
        TAB_HISTORY => handle_history_key(state, k.code),
        _ => match k.code {
            KeyCode::Char('q') => Some(UiCommand::Quit),
            _ => None,
        },
    }
}

fn handle_dialog_key(state: &mut UiState, k: KeyEvent) -> Option<UiCommand> {
    let dialog = state.dialog.as_mut()?;
    match k.code {
        KeyCode::Esc => {
            state.dialog = None;
            None
        }
        KeyCode::Backspace => {
            dialog.buffer_mut().pop();
            None
        }
        KeyCode::Char(c) if !k.modifiers.contains(KeyModifiers::CONTROL) => {
            dialog.buffer_mut().push(c);
            None
        }
        KeyCode::Enter => {
            if dialog.buffer_mut().trim().is_empty() && !matches!(dialog, Dialog::Regenerate { .. })
            {
                state.info = "Nothing entered".into();
                return None;
            }
            match state.dialog.take()? {
                Dialog::ApiKey(key) => Some(UiCommand::SetApiKey(key)),
                Dialog::Regenerate { id, prompt } => {
                    state.tab = TAB_CREATE;
                    Some(UiCommand::Regenerate { id, prompt })
                }
                Dialog::Import(path) => Some(UiCommand::Import(PathBuf::from(path.trim()))),
            }
        }
        _ => None,
    }
}

fn handle_create_key(state: &mut UiState, ctrl: bool, code: KeyCode) -> Option<UiCommand> {
    match (ctrl, code) {
        (_, KeyCode::Enter) => {
            if state.generating {
                state.info = "A generation is already running (Esc to cancel)".into();
                return None;
            }
            let file = Some(state.file_path.trim())
                .filter(|p| !p.is_empty())
                .map(PathBuf::from);
            Some(UiCommand::Generate {
                mode: state.mode,
                prompt: state.prompt.trim().to_string(),
                file,
            })
        }
        (_, KeyCode::Up) | (_, KeyCode::Down) => {
            state.focus = match state.focus {
                Focus::Prompt => Focus::File,
                Focus::File => Focus::Prompt,
            };
            None
        }
        (true, KeyCode::Char('t')) => {
            state.mode = state.mode.toggled();
            state.info = format!("Mode: {}", state.mode.label());
            None
        }
        (true, KeyCode::Char('r')) => {
            state.preview_scroll = 0;
            Some(UiCommand::Reset)
        }
        (_, KeyCode::PageUp) => {
            state.preview_scroll = state.preview_scroll.saturating_sub(10);
            None
        }
        (_, KeyCode::PageDown) => {
            state.preview_scroll = state.preview_scroll.saturating_add(10);
            None
        }
        (_, KeyCode::Backspace) => {
            state.focused_input_mut().pop();
            None
        }
        (false, KeyCode::Char(c)) => {
            state.focused_input_mut().push(c);
            None
        }
        _ => None,
    }
}

fn handle_history_key(state: &mut UiState, code: KeyCode) -> Option<UiCommand> {
    let len = state.history.len();
    let sel = state.history_selected;
    let selected_id = state.selected_creation().map(|c| c.id.clone());
    match code {
        KeyCode::Char('q') => Some(UiCommand::Quit),
        KeyCode::Char('?') => {
            state.tab = TAB_HELP;
            None
        }
        KeyCode::Up | KeyCode::Char('k') => {
            state.history_selected = sel.saturating_sub(1);
            None
        }
        KeyCode::Down | KeyCode::Char('j') => {
            if sel + 1 < len {
                state.history_selected = sel + 1;
            }
            None
        }
        KeyCode::Char('K') if sel > 0 && sel < len => Some(UiCommand::Move {
            from: sel,
            to: sel - 1,
        }),
        KeyCode::Char('J') if sel + 1 < len => Some(UiCommand::Move {
            from: sel,
            to: sel + 1,
        }),
        KeyCode::Char('i') => {
            state.dialog = Some(Dialog::Import(String::new()));
            None
        }
        KeyCode::Char('y') => {
            match state.last_exported_path.clone() {
                Some(path) => match copy_to_clipboard(&path) {
                    Ok(()) => state.info = format!("✓ Copied to clipboard: {}", ellipsize(&path, 60)),
                    Err(e) => state.info = format!("Clipboard copy failed: {e:#}"),
                },
                None => state.info = "No exported file path to copy. Export a file first (e)".into(),
            }
            None
        }
        _ => {
            let id = selected_id?;
            handle_selected_key(state, id, code)
        }
    }
}

/// Keys that act on the selected creation.
fn handle_selected_key(state: &mut UiState, id: String, code: KeyCode) -> Option<UiCommand> {
    match code {
        KeyCode::Enter => {
            state.tab = TAB_CREATE;
            state.preview_scroll = 0;
            Some(UiCommand::Select(id))
        }
        KeyCode::Char('s') => Some(UiCommand::SaveArtifact(id)),
        KeyCode::Char('e') => Some(UiCommand::Export(id)),
        KeyCode::Char('r') => {
            let c = state.selected_creation()?;
            if c.original_image.is_none() && matches!(c.body, CreationBody::App { .. }) {
                state.info = "This creation has no source image to regenerate from".into();
                return None;
            }
            state.dialog = Some(Dialog::Regenerate {
                id,
                prompt: String::new(),
            });
            None
        }
        KeyCode::Char('c') => {
            let html = state.selected_creation().and_then(|c| c.html()).map(str::to_string);
            state.info = match html {
                Some(html) => match copy_to_clipboard(&html) {
                    Ok(()) => format!("✓ Copied {} bytes of HTML", html.len()),
                    Err(e) => format!("Clipboard copy failed: {e:#}"),
                },
                None => "Only app creations have HTML to copy".into(),
            };
            None
        }
        _ => None,
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![
        Line::from("Create"),
        Line::from(format!("History ({})", state.history.len())),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(Block::default().borders(Borders::ALL).title("genstudio"))
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        TAB_CREATE => draw_create(chunks[1], f, state),
        TAB_HISTORY => draw_history(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }

    if let Some(dialog) = state.dialog.as_ref() {
        draw_dialog(area, f, dialog);
    }
}

fn input_line<'a>(label: &'a str, value: &'a str, focused: bool) -> Line<'a> {
    let label_style = if focused {
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    };
    let mut spans = vec![Span::styled(label, label_style), Span::raw(value)];
    if focused {
        spans.push(Span::styled("▏", Style::default().fg(Color::Yellow)));
    }
    Line::from(spans)
}

fn draw_create(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(5), // mode + inputs
                Constraint::Min(0),    // preview
                Constraint::Length(4), // status
            ]
            .as_ref(),
        )
        .split(area);

    let mode_spans = [crate::model::GenerationMode::App, crate::model::GenerationMode::Video]
        .into_iter()
        .flat_map(|m| {
            let style = if m == state.mode {
                Style::default().fg(Color::Black).bg(Color::Cyan)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            [Span::styled(format!(" {} ", m.label()), style), Span::raw(" ")]
        });
    let mut mode_line = vec![Span::styled("Mode:   ", Style::default().fg(Color::Gray))];
    mode_line.extend(mode_spans);
    mode_line.push(Span::styled("(Ctrl-T)", Style::default().fg(Color::DarkGray)));

    let inputs = Paragraph::new(vec![
        Line::from(mode_line),
        input_line("Prompt: ", &state.prompt, state.focus == Focus::Prompt),
        input_line("File:   ", &state.file_path, state.focus == Focus::File),
    ])
    .block(Block::default().borders(Borders::ALL).title("New creation (Enter to generate)"));
    f.render_widget(inputs, rows[0]);

    draw_preview(rows[1], f, state);

    let mut status = Vec::new();
    push_wrapped_status_kv(&mut status, "Info", &state.info, rows[2].width);
    f.render_widget(
        Paragraph::new(status).block(Block::default().borders(Borders::ALL).title("Status")),
        rows[2],
    );
}

fn draw_preview(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let block = Block::default().borders(Borders::ALL);

    if state.generating {
        let elapsed = state
            .generation_started
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);
        let mut lines = vec![
            Line::from(Span::styled(
                format!("Generating… {elapsed}s"),
                Style::default().fg(Color::Yellow),
            )),
            Line::from(""),
        ];
        if state.poll_attempt > 0 {
            lines.push(Line::from(format!(
                "Video job still rendering (status check {})",
                state.poll_attempt
            )));
        }
        lines.push(Line::from(Span::styled(
            "Esc to cancel",
            Style::default().fg(Color::DarkGray),
        )));
        f.render_widget(Paragraph::new(lines).block(block.title("Preview")), area);
        return;
    }

    let Some(c) = state.active_creation() else {
        let hint = Paragraph::new(vec![
            Line::from("Type a prompt, optionally the path of an image or PDF, and press Enter."),
            Line::from(""),
            Line::from("App mode builds a single-file HTML app from a sketch, photo or PDF."),
            Line::from("Video mode animates an image (or just a prompt) with Veo."),
        ])
        .style(Style::default().fg(Color::DarkGray))
        .wrap(Wrap { trim: false });
        f.render_widget(hint.block(block.title("Preview")), area);
        return;
    };

    let title = format!("Preview: {} ({})", c.name, c.mode().label());
    match &c.body {
        CreationBody::App { html } => {
            let p = Paragraph::new(html.as_str())
                .wrap(Wrap { trim: false })
                .scroll((state.preview_scroll, 0));
            f.render_widget(p.block(block.title(title)), area);
        }
        CreationBody::Video { video_url } => {
            let lines = match video_url {
                Some(handle) => vec![
                    Line::from(format!("Video ready: {handle}")),
                    Line::from(""),
                    Line::from("Save it as MP4 from the History tab (s)."),
                ],
                None => vec![Line::from(
                    "The video for this creation belonged to an earlier session.",
                )],
            };
            f.render_widget(Paragraph::new(lines).block(block.title(title)), area);
        }
    }
}

fn draw_history(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)].as_ref())
        .split(area);

    let mut lines: Vec<Line> = Vec::new();
    // Subtract borders and the header line.
    let max_items = (cols[0].height as usize).saturating_sub(3).max(1);
    let total = state.history.len();
    let offset = state.history_selected.saturating_sub(max_items - 1);

    lines.push(Line::from(vec![
        Span::raw(format!(
            "({}/{}) ",
            if total > 0 { state.history_selected + 1 } else { 0 },
            total
        )),
        Span::styled("j/k", Style::default().fg(Color::Magenta)),
        Span::raw(" navigate  "),
        Span::styled("J/K", Style::default().fg(Color::Magenta)),
        Span::raw(" move  "),
        Span::styled("?", Style::default().fg(Color::Magenta)),
        Span::raw(" more keys"),
    ]));

    if total == 0 {
        lines.push(Line::from(Span::styled(
            "No creations yet. Generate one, or import a JSON file (i).",
            Style::default().fg(Color::DarkGray),
        )));
    }

    for (i, c) in state.history.iter().enumerate().skip(offset).take(max_items) {
        let is_active = state.active.as_deref() == Some(c.id.as_str());
        let style = if i == state.history_selected {
            Style::default().bg(Color::DarkGray).fg(Color::White)
        } else {
            Style::default()
        };
        let kind_color = match c.body {
            CreationBody::App { .. } => Color::Cyan,
            CreationBody::Video { .. } => Color::Green,
        };
        lines.push(Line::from(vec![
            Span::styled(if is_active { "● " } else { "  " }, Style::default().fg(Color::Yellow)),
            Span::styled(format!("{:<6}", c.mode().label()), style.fg(kind_color)),
            Span::styled(c.name.clone(), style),
        ]));
    }

    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("History")),
        cols[0],
    );

    let mut details: Vec<Line> = Vec::new();
    if let Some(c) = state.selected_creation() {
        for line in crate::text_summary::build_creation_summary(c, None).lines {
            details.push(Line::from(line));
        }
    }
    details.push(Line::from(""));
    push_wrapped_status_kv(&mut details, "Info", &state.info, cols[1].width);
    f.render_widget(
        Paragraph::new(details)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Details")),
        cols[1],
    );
}

fn centered(area: Rect, width_pct: u16, height: u16) -> Rect {
    let width = u16::try_from(u32::from(area.width) * u32::from(width_pct) / 100)
        .unwrap_or(area.width)
        .min(area.width);
    Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height: height.min(area.height),
    }
}

fn draw_dialog(area: Rect, f: &mut ratatui::Frame, dialog: &Dialog) {
    let rect = centered(area, 70, 4);
    let value = match dialog {
        // Never echo the key itself.
        Dialog::ApiKey(key) => "•".repeat(key.chars().count()),
        Dialog::Regenerate { prompt, .. } => prompt.clone(),
        Dialog::Import(path) => path.clone(),
    };
    let p = Paragraph::new(vec![
        Line::from(vec![
            Span::raw(value),
            Span::styled("▏", Style::default().fg(Color::Yellow)),
        ]),
        Line::from(Span::styled(
            "Enter to confirm, Esc to close",
            Style::default().fg(Color::DarkGray),
        )),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow))
            .title(dialog.title()),
    );
    f.render_widget(Clear, rect);
    f.render_widget(p, rect);
}
