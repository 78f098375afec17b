use std::error::Error;
use std::io::stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use crossbeam_channel::unbounded;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEvent};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, Wrap};

use crate::control::api::{self, LevelControls, LevelStatus};
use crate::dataflow::DataflowControl;
use crate::{ConsumerStatus, SessionStatus, StreamSession};

const TICK_RATE: Duration = Duration::from_millis(100);
const FADE_SECONDS: f32 = 2.0;
const EVENT_LINES: usize = 4;

struct Snapshot {
    session: SessionStatus,
    levels: LevelStatus,
    events: Vec<String>,
}

#[derive(Default)]
struct AppState {
    snapshot: Option<Snapshot>,
    selected: usize,
    message: Option<String>,
    last_update: Option<Instant>,
}

/// Run the console until `q` is pressed.
pub fn run(session: Arc<StreamSession>, levels: LevelControls) -> Result<(), Box<dyn Error>> {
    setup_terminal()?;

    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let (status_tx, status_rx) = unbounded();
    {
        let session = session.clone();
        let levels = levels.clone();
        std::thread::spawn(move || {
            while session.is_running() {
                let snapshot = Snapshot {
                    session: api::get_status(&session),
                    levels: levels.status(),
                    events: session.recent_events(EVENT_LINES),
                };
                if status_tx.send(snapshot).is_err() {
                    break;
                }
                std::thread::sleep(TICK_RATE);
            }
        });
    }

    let mut app = AppState::default();

    loop {
        terminal.draw(|frame| draw(frame, &app))?;

        if let Some(snapshot) = try_recv_latest(&status_rx) {
            let consumers = snapshot.session.consumers.len();
            app.snapshot = Some(snapshot);
            app.last_update = Some(Instant::now());
            app.selected = app.selected.min(consumers.saturating_sub(1));
        }

        if event::poll(Duration::from_millis(10))? {
            if let CEvent::Key(key) = event::read()? {
                if handle_key(&mut app, &session, &levels, key) {
                    break;
                }
            }
        }
    }

    restore_terminal()?;
    Ok(())
}

fn setup_terminal() -> Result<(), Box<dyn Error>> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    Ok(())
}

fn restore_terminal() -> Result<(), Box<dyn Error>> {
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    Ok(())
}

fn try_recv_latest<T>(rx: &Receiver<T>) -> Option<T> {
    let mut last = None;
    while let Ok(value) = rx.try_recv() {
        last = Some(value);
    }
    last
}

fn handle_key(
    app: &mut AppState,
    session: &StreamSession,
    levels: &LevelControls,
    key: KeyEvent,
) -> bool {
    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Up => app.selected = app.selected.saturating_sub(1),
        KeyCode::Down => {
            let len = app
                .snapshot
                .as_ref()
                .map(|s| s.session.consumers.len())
                .unwrap_or(0);
            if app.selected + 1 < len {
                app.selected += 1;
            }
        }
        KeyCode::Enter | KeyCode::Char(' ') => {
            if let Some(consumer) = current_consumer(app) {
                if let Some(state) = api::toggle_dataflow(session, consumer.id) {
                    app.message = Some(format!("{} {}", consumer.name, state));
                }
            }
        }
        KeyCode::Char('f') => {
            if let Some(consumer) = current_consumer(app) {
                if api::flush(session, consumer.id) {
                    app.message = Some(format!("{} flushed", consumer.name));
                }
            }
        }
        KeyCode::Char('i') => {
            levels.fade_in(FADE_SECONDS);
            app.message = Some(format!("Fading in over {FADE_SECONDS:.1}s"));
        }
        KeyCode::Char('o') => {
            levels.fade_out(FADE_SECONDS);
            app.message = Some(format!("Fading out over {FADE_SECONDS:.1}s"));
        }
        KeyCode::Char('m') => {
            let audible = levels.toggle_audible();
            app.message = Some(if audible { "Unmuted" } else { "Muted" }.to_string());
        }
        KeyCode::Char('+') | KeyCode::Right => {
            let volume = levels.nudge_volume(4);
            app.message = Some(format!("Volume {volume}"));
        }
        KeyCode::Char('-') | KeyCode::Left => {
            let volume = levels.nudge_volume(-4);
            app.message = Some(format!("Volume {volume}"));
        }
        _ => {}
    }
    false
}

fn current_consumer(app: &AppState) -> Option<ConsumerStatus> {
    app.snapshot
        .as_ref()?
        .session
        .consumers
        .get(app.selected)
        .cloned()
}

fn draw(frame: &mut ratatui::Frame<'_>, app: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4 + EVENT_LINES as u16),
        ])
        .split(frame.size());

    draw_header(frame, chunks[0], app);
    draw_consumers(frame, chunks[1], app);
    draw_footer(frame, chunks[2], app);
}

fn draw_header(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let block = Block::default()
        .title("Stream Pipeline Console")
        .borders(Borders::ALL);

    let content = if let Some(snapshot) = &app.snapshot {
        let status = &snapshot.session;
        let levels = &snapshot.levels;
        let stats = format!(
            "Sample Rate: {} Hz    Block: {} frames ({:.2} ms)    Blocks: {}    Fade: {:.3}    {}    Volume: {}",
            status.sample_rate,
            status.block_frames,
            status.latency_ms,
            status.blocks_processed,
            levels.fade,
            if levels.audible { "Live" } else { "Muted" },
            levels.volume,
        );
        Paragraph::new(stats)
    } else {
        Paragraph::new(Line::from(vec![Span::styled(
            "No session status yet",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )]))
    };

    frame.render_widget(content.block(block), area);
}

fn state_style(state: Option<DataflowControl>) -> Style {
    match state {
        Some(DataflowControl::On) => Style::default().fg(Color::Green),
        Some(DataflowControl::Flush) => Style::default().fg(Color::Magenta),
        Some(DataflowControl::Off) => Style::default().fg(Color::DarkGray),
        None => Style::default().fg(Color::Red),
    }
}

fn draw_consumers(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let block = Block::default().title("Consumers").borders(Borders::ALL);

    let Some(snapshot) = &app.snapshot else {
        frame.render_widget(Paragraph::new("").block(block), area);
        return;
    };

    let header = Row::new(vec![
        Cell::from(""),
        Cell::from("Name"),
        Cell::from("Kind"),
        Cell::from("State"),
        Cell::from("Fill L %"),
        Cell::from("Fill R %"),
        Cell::from("Written"),
        Cell::from("Flushed"),
        Cell::from("Waits"),
    ])
    .style(
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    );

    let rows = snapshot
        .session
        .consumers
        .iter()
        .enumerate()
        .map(|(idx, consumer)| {
            let indicator = if idx == app.selected { ">" } else { "" };
            let state = consumer
                .state
                .map(|s| s.to_string())
                .unwrap_or_else(|| "invalid".to_string());
            let mut row = Row::new(vec![
                Cell::from(indicator.to_string()),
                Cell::from(consumer.name.clone()),
                Cell::from(consumer.kind.to_string()),
                Cell::from(state).style(state_style(consumer.state)),
                Cell::from(format!("{:.1}", consumer.fill_left * 100.0)),
                Cell::from(format!("{:.1}", consumer.fill_right * 100.0)),
                Cell::from(consumer.frames_written.to_string()),
                Cell::from(consumer.frames_flushed.to_string()),
                Cell::from(consumer.backpressure_waits.to_string()),
            ]);
            if idx == app.selected {
                row = row.style(Style::default().fg(Color::Yellow));
            }
            row
        });

    let table = Table::new(
        rows,
        [
            Constraint::Length(2),
            Constraint::Length(20),
            Constraint::Length(10),
            Constraint::Length(8),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Length(8),
        ],
    )
    .header(header)
    .block(block)
    .column_spacing(2);

    frame.render_widget(table, area);
}

fn draw_footer(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let info = "Up/Down: Select  •  Enter: On/Off  •  f: Flush  •  i/o: Fade in/out  •  m: Mute  •  +/-: Volume  •  q: Quit";
    let mut lines = vec![Line::from(info)];
    if let Some(message) = &app.message {
        lines.push(Line::from(Span::styled(
            message.clone(),
            Style::default().fg(Color::Green),
        )));
    }
    if let Some(snapshot) = &app.snapshot {
        for event in &snapshot.events {
            lines.push(Line::from(Span::styled(
                event.clone(),
                Style::default().fg(Color::DarkGray),
            )));
        }
    }
    if let Some(updated) = app.last_update {
        let ago = updated.elapsed().as_secs_f32();
        lines.push(Line::from(Span::styled(
            format!("Last update {:.1}s ago", ago),
            Style::default().fg(Color::DarkGray),
        )));
    }

    let paragraph = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, area);
}
