use std::time::Duration;

use anyhow::Result;
use ratatui::crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::layout::{Constraint, Flex, Layout, Rect};
use ratatui::style::{Color, Style, Stylize};
use ratatui::text::Line;
use ratatui::widgets::{Block, Clear, Gauge, List, ListItem, Paragraph, Wrap};
use ratatui::{DefaultTerminal, Frame};
use tracing::{debug, info};

use crate::app::{Command, Snapshot};
use crate::detector::DetectorState;
use crate::settings::DEFAULT_BRIGHTNESS;

const POLL: Duration = Duration::from_millis(50);

const HELP: &str = "space start/stop  p photo  ←/→ ±1  -/+ ±5  r reset  q quit";

pub fn key_command(code: KeyCode) -> Option<Command> {
    match code {
        KeyCode::Char(' ') | KeyCode::Char('s') => Some(Command::ToggleDetection),
        KeyCode::Char('p') => Some(Command::TakePhoto),
        KeyCode::Left => Some(Command::AdjustBrightness(-1)),
        KeyCode::Right => Some(Command::AdjustBrightness(1)),
        KeyCode::Char('-') => Some(Command::AdjustBrightness(-5)),
        KeyCode::Char('+') | KeyCode::Char('=') => Some(Command::AdjustBrightness(5)),
        KeyCode::Char('r') => Some(Command::SetBrightness(DEFAULT_BRIGHTNESS)),
        KeyCode::Char('q') | KeyCode::Esc => Some(Command::Quit),
        _ => None,
    }
}

/// Takes over the terminal until the user quits or the app hangs up.
pub fn run_ui(commands: flume::Sender<Command>, snapshots: flume::Receiver<Snapshot>) -> Result<()> {
    let mut terminal = ratatui::try_init()?;
    let res = ui_loop(&mut terminal, &commands, &snapshots);
    ratatui::try_restore()?;
    res
}

fn ui_loop(
    terminal: &mut DefaultTerminal,
    commands: &flume::Sender<Command>,
    snapshots: &flume::Receiver<Snapshot>,
) -> Result<()> {
    let mut latest = Snapshot::default();
    let mut dismissed: Option<String> = None;

    loop {
        latest = snapshots.drain().last().unwrap_or(latest);
        let show_alert = latest.alert.is_some() && latest.alert != dismissed;

        terminal.draw(|f| draw(f, &latest, show_alert))?;

        if snapshots.is_disconnected() && snapshots.is_empty() {
            info!("App closed, leaving control panel");
            return Ok(());
        }

        if !event::poll(POLL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        // the alert swallows the key that dismisses it
        if show_alert {
            dismissed = latest.alert.clone();
            continue;
        }

        let Some(command) = key_command(key.code) else {
            continue;
        };
        debug!("Key {:?} -> {command:?}", key.code);
        if commands.send(command).is_err() || command == Command::Quit {
            return Ok(());
        }
    }
}

fn state_label(state: DetectorState) -> Line<'static> {
    match state {
        DetectorState::Idle => Line::from("Idle").gray(),
        DetectorState::Ready => Line::from("Ready").yellow(),
        DetectorState::Detecting => Line::from("Detecting").green().bold(),
        DetectorState::Stopped => Line::from("Stopped").red(),
    }
}

pub(crate) fn draw(frame: &mut Frame, snapshot: &Snapshot, show_alert: bool) {
    let [header, score, history, footer] = Layout::vertical([
        Constraint::Length(3),
        Constraint::Length(3),
        Constraint::Min(3),
        Constraint::Length(4),
    ])
    .areas(frame.area());

    let [state, brightness] =
        Layout::horizontal([Constraint::Percentage(50), Constraint::Percentage(50)]).areas(header);
    frame.render_widget(
        Paragraph::new(state_label(snapshot.state)).block(Block::bordered().title("State")),
        state,
    );
    frame.render_widget(
        Paragraph::new(format!("{}%", snapshot.brightness))
            .block(Block::bordered().title("Brightness")),
        brightness,
    );

    frame.render_widget(
        Gauge::default()
            .block(Block::bordered().title("Smile Score"))
            .gauge_style(Style::default().fg(Color::Green))
            .percent(u16::from(snapshot.score.min(100)))
            .label(format!("{}", snapshot.score)),
        score,
    );

    let items: Vec<ListItem> = snapshot
        .history
        .iter()
        .enumerate()
        .map(|(i, s)| ListItem::new(format!("Attempt {}: {s}", i + 1)))
        .collect();
    frame.render_widget(
        List::new(items).block(Block::bordered().title("History")),
        history,
    );

    let mut lines = vec![Line::from(HELP)];
    if let Some(status) = &snapshot.status {
        lines.push(Line::from(status.as_str()).italic());
    }
    frame.render_widget(Paragraph::new(lines).block(Block::bordered()), footer);

    if let (true, Some(alert)) = (show_alert, &snapshot.alert) {
        let area = popup_area(frame.area(), 60, 6);
        frame.render_widget(Clear, area);
        frame.render_widget(
            Paragraph::new(vec![
                Line::from(alert.as_str()),
                Line::from(""),
                Line::from("Press any key").italic(),
            ])
            .wrap(Wrap { trim: true })
            .block(Block::bordered().title("Alert").red()),
            area,
        );
    }
}

fn popup_area(area: Rect, percent_x: u16, height: u16) -> Rect {
    let [area] = Layout::vertical([Constraint::Length(height)])
        .flex(Flex::Center)
        .areas(area);
    let [area] = Layout::horizontal([Constraint::Percentage(percent_x)])
        .flex(Flex::Center)
        .areas(area);
    area
}
