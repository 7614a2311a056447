use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

fn key_line(key: &'static str, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(format!("{key:<12}"), Style::default().fg(Color::Magenta)),
        Span::raw(what),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Everywhere:"),
        key_line("Ctrl-C", "Quit"),
        key_line("Tab", "Switch tabs"),
        key_line("Esc", "Cancel the running generation / close dialog"),
        key_line("Ctrl-K", "Enter a different API key"),
        Line::from(""),
        Line::from("Create tab:"),
        key_line("Enter", "Generate from the prompt and file"),
        key_line("↑/↓", "Switch between prompt and file inputs"),
        key_line("Ctrl-T", "Toggle app / video mode"),
        key_line("Ctrl-R", "Start over (clears the preview)"),
        key_line("PgUp/PgDn", "Scroll the preview"),
        Line::from(""),
        Line::from("History tab:"),
        key_line("↑/↓ or j/k", "Navigate"),
        key_line("K/J", "Move selected up/down"),
        key_line("Enter", "Open selected in the Create tab"),
        key_line("r", "Regenerate from the selected source image"),
        key_line("s", "Save selected as HTML/MP4"),
        key_line("e", "Export selected as JSON"),
        key_line("i", "Import a creation JSON file"),
        key_line("c", "Copy selected HTML to clipboard"),
        key_line("y", "Copy last exported path to clipboard"),
        key_line("q", "Quit"),
        Line::from(""),
        Line::from(vec![
            Span::styled("Note: ", Style::default().fg(Color::Gray)),
            Span::raw(
                "video bytes live only in this session; save them with 's' before quitting.",
            ),
        ]),
    ])
    .wrap(Wrap { trim: false })
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
