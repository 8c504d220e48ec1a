use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

const KEYBINDS: &[(&str, &str)] = &[
    ("s", "Start/stop detection"),
    ("+ / -", "Brightness of current emotion ±10"),
    ("] / [", "Transition of current emotion ±0.1s"),
    ("w", "Write mappings to disk"),
    ("?", "Toggle this help"),
    ("q / Ctrl-C", "Quit"),
];

fn keybind(key: &'static str, action: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(format!("{key:<12}"), Style::default().fg(Color::Magenta)),
        Span::raw(action),
    ])
}

/// Centered overlay listing the keybinds.
pub fn draw_help(area: Rect, f: &mut Frame) {
    let width = area.width.min(56);
    let height = area.height.min(KEYBINDS.len() as u16 + 6);
    let popup = Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    };

    let mut lines = vec![Line::from("Keybinds:")];
    lines.extend(KEYBINDS.iter().map(|(k, a)| keybind(k, a)));
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Edits target the emotion on screen.",
        Style::default().fg(Color::Gray),
    )));

    let p = Paragraph::new(lines)
        .style(Style::default().bg(Color::Black).fg(Color::White))
        .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(Clear, popup);
    f.render_widget(p, popup);
}
