mod help;
mod surface;

use crate::cli::{self, Cli};
use crate::effect::Fill;
use crate::model::{ChannelState, EmotionLabel, Origin, RejectReason, Rgb, SyncEvent, RESET_EFFECT};
use crate::orchestrator::{self, SyncHandle, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
    Terminal,
};
use std::{io, time::Duration, time::Instant};
use surface::{contrast, Backdrop, BLACK};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

fn rgb(c: Rgb) -> Color {
    Color::Rgb(c.r, c.g, c.b)
}

struct UiState {
    handle: SyncHandle,
    push_rx: watch::Receiver<ChannelState>,
    backdrop: Backdrop,
    last_fill: Option<Fill>,
    last_origin: Option<Origin>,
    info: String,
    show_help: bool,
    base_url: String,
}

impl UiState {
    fn new(handle: SyncHandle, base_url: String) -> Self {
        let now = Instant::now();
        Self {
            push_rx: handle.connection_status(),
            handle,
            backdrop: Backdrop::new(Fill::from_params(&RESET_EFFECT).over(BLACK), now),
            last_fill: None,
            last_origin: None,
            info: "Press s to start detection, ? for help".into(),
            show_help: false,
            base_url,
        }
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = cli::build_config(&args);
    let mappings_path = args.mappings_path();
    let table = crate::storage::load_table_or_default(mappings_path.as_deref())?;

    // Unbounded channels keep the UI thread from ever blocking on the runtime.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<SyncEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let (handle, supervisor) = cli::start_session(&cfg, table, event_tx.clone())?;
    if args.start {
        let _ = cmd_tx.send(UiCommand::ToggleDetection);
    }

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_session = handle.clone();
    let base_url = cfg.base_url.clone();
    let ui_handle =
        std::thread::spawn(move || run_threaded(ui_session, base_url, event_rx, cmd_tx));

    let res = orchestrator::run_controller(handle, mappings_path, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    let _ = supervisor.await;
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
fn run_threaded(
    handle: SyncHandle,
    base_url: String,
    mut event_rx: UnboundedReceiver<SyncEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let mut state = UiState::new(handle, base_url);
    // Transitions need a faster frame rate than a static screen.
    let idle_rate = Duration::from_millis(100);
    let transition_rate = Duration::from_millis(33);
    let mut last_tick = Instant::now();

    let res = loop {
        while let Ok(ev) = event_rx.try_recv() {
            apply_event(&mut state, ev, Instant::now());
        }

        let now = Instant::now();
        let tick_rate = if state.backdrop.is_settled(now) {
            idle_rate
        } else {
            transition_rate
        };
        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state, now)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                let cmd = match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    (_, KeyCode::Char('?')) => {
                        state.show_help = !state.show_help;
                        None
                    }
                    (_, KeyCode::Esc) => {
                        state.show_help = false;
                        None
                    }
                    (_, KeyCode::Char('s')) => Some(UiCommand::ToggleDetection),
                    (_, KeyCode::Char('+')) | (_, KeyCode::Char('=')) => {
                        Some(UiCommand::AdjustBrightness(10))
                    }
                    (_, KeyCode::Char('-')) => Some(UiCommand::AdjustBrightness(-10)),
                    (_, KeyCode::Char(']')) => Some(UiCommand::AdjustTransition(0.1)),
                    (_, KeyCode::Char('[')) => Some(UiCommand::AdjustTransition(-0.1)),
                    (_, KeyCode::Char('w')) => Some(UiCommand::SaveMappings),
                    _ => None,
                };
                if let Some(cmd) = cmd {
                    let _ = cmd_tx.send(cmd);
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn apply_event(state: &mut UiState, ev: SyncEvent, now: Instant) {
    match ev {
        SyncEvent::Applied { fill } => {
            state.backdrop.paint(&fill, now);
            state.last_fill = Some(fill);
        }
        SyncEvent::Accepted { origin, .. } => {
            state.last_origin = Some(origin);
        }
        SyncEvent::Reset => {
            state.last_origin = None;
        }
        SyncEvent::MappingMissing { label } => {
            state.info = format!("No mapping for {label}; surface unchanged");
        }
        SyncEvent::Rejected {
            reason: RejectReason::Malformed,
            origin,
        } => {
            state.info = format!("Ignored malformed update ({origin:?})");
        }
        SyncEvent::ChannelState {
            state: ChannelState::Errored,
        } => {
            state.info = "Push channel failed; polling continues".into();
        }
        SyncEvent::Info { message } => state.info = message,
        SyncEvent::Rejected { .. }
        | SyncEvent::ChannelState { .. }
        | SyncEvent::MappingUpdated { .. } => {}
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState, now: Instant) {
    let bg = state.backdrop.color_at(now);
    let fg = contrast(bg);
    let surface_style = Style::default().bg(rgb(bg)).fg(rgb(fg));

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)].as_ref())
        .split(area);

    draw_surface(cols[0], f, state, surface_style);
    draw_mappings(cols[1], f, state);

    if state.show_help {
        help::draw_help(area, f);
    }
}

fn draw_surface(area: Rect, f: &mut ratatui::Frame, state: &UiState, style: Style) {
    let session = state.handle.current_state();
    let push = *state.push_rx.borrow();

    let block = Block::default()
        .borders(Borders::ALL)
        .title("moodlight")
        .title_alignment(Alignment::Left)
        .style(style);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(1), // session + push badge
                Constraint::Min(0),    // open surface
                Constraint::Length(1), // emotion label
                Constraint::Length(1), // confidence gauge
                Constraint::Min(0),
                Constraint::Length(1), // fill
                Constraint::Length(1), // info
            ]
            .as_ref(),
        )
        .split(inner);

    let (run_text, run_color) = if session.enabled {
        ("● Detecting", Color::Green)
    } else {
        ("○ Stopped", Color::DarkGray)
    };
    let push_color = match push {
        ChannelState::Open => Color::Green,
        ChannelState::Connecting => Color::Yellow,
        ChannelState::Errored | ChannelState::Closed => Color::Red,
        ChannelState::Idle => Color::DarkGray,
    };
    let via = match state.last_origin {
        Some(Origin::Push) => "  via push",
        Some(Origin::Pull) => "  via polling",
        None => "",
    };
    let status = Line::from(vec![
        Span::styled(run_text, Style::default().fg(run_color).bg(Color::Black)),
        Span::raw("  "),
        Span::styled(
            format!(" {} ", push.badge()),
            Style::default().fg(Color::Black).bg(push_color),
        ),
        Span::raw(via),
    ]);
    f.render_widget(Paragraph::new(status), rows[0]);

    let label = Paragraph::new(Line::from(Span::styled(
        session.label.as_str().to_uppercase(),
        Style::default().add_modifier(Modifier::BOLD),
    )))
    .alignment(Alignment::Center);
    f.render_widget(label, rows[2]);

    let conf = session.confidence.value();
    let gauge_area = centered_width(rows[3], 40);
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(Color::White).bg(Color::Black))
        .ratio((conf / 100.0).clamp(0.0, 1.0))
        .label(format!("{conf:.1}%"));
    f.render_widget(gauge, gauge_area);

    if let Some(fill) = state.last_fill {
        let line = Paragraph::new(format!(
            "{}  over {:.1}s",
            fill.css(),
            fill.transition.as_secs_f64()
        ))
        .alignment(Alignment::Center);
        f.render_widget(line, rows[5]);
    }

    f.render_widget(
        Paragraph::new(Line::from(Span::styled(
            state.info.clone(),
            Style::default().add_modifier(Modifier::ITALIC),
        ))),
        rows[6],
    );
}

fn draw_mappings(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let current = state.handle.current_state().label;
    let table = state.handle.mappings();

    let mut lines: Vec<Line> = EmotionLabel::DETECTABLE
        .into_iter()
        .map(|label| {
            let marker = if label == current { "▶ " } else { "  " };
            let name_style = if label == current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray)
            };
            let mut spans = vec![
                Span::styled(marker, name_style),
                Span::styled(format!("{:<9}", label.as_str()), name_style),
            ];
            match table.get(label) {
                Some(params) => {
                    spans.push(Span::styled("██ ", Style::default().fg(rgb(params.color))));
                    spans.push(Span::raw(format!(
                        "{} {:>3}% {:>4.1}s",
                        params.color, params.brightness, params.transition_seconds
                    )));
                }
                None => spans.push(Span::styled("unmapped", Style::default().fg(Color::Red))),
            }
            Line::from(spans)
        })
        .collect();
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::styled("Backend: ", Style::default().fg(Color::Gray)),
        Span::raw(state.base_url.clone()),
    ]));
    lines.push(Line::from(vec![
        Span::styled("Keys: ", Style::default().fg(Color::Gray)),
        Span::raw("s start/stop  +/- brightness  [/] transition  w save  ? help  q quit"),
    ]));

    let p = Paragraph::new(lines)
        .wrap(ratatui::widgets::Wrap { trim: true })
        .style(Style::default().bg(Color::Black).fg(Color::White))
        .block(Block::default().borders(Borders::ALL).title("Mappings"));
    f.render_widget(p, area);
}

fn centered_width(area: Rect, width: u16) -> Rect {
    let width = area.width.min(width);
    Rect {
        x: area.x + (area.width - width) / 2,
        width,
        ..area
    }
}
