//! Terminal User Interface (TUI) rendering and management.
//!
//! This module handles initializing the terminal in raw mode, restoring it on
//! exit, and drawing the application state using `ratatui`.

use std::io::{self, Stdout};

use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen, SetTitle,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Borders, List, ListItem, ListState, Paragraph};
use ratatui::Terminal;

use crate::app::App;
use crate::output::sanitize_text;
use crate::process::{Process, Status};

/// The concrete terminal type the drivers render through.
pub type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

const HELP_LINE: &str =
    "↑/↓ select | Tab cycle | PgUp/PgDn scroll | Home/End jump | f follow | r restart | k kill | q quit";

/// Initializes the terminal for TUI mode.
pub fn init_terminal() -> io::Result<TuiTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

/// Restores the terminal to its original state.
pub fn restore_terminal(mut terminal: TuiTerminal) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Draws the current application state to the terminal.
pub fn draw(app: &mut App, terminal: &mut TuiTerminal) -> io::Result<()> {
    execute!(terminal.backend_mut(), SetTitle(window_title(app)))?;
    terminal.draw(|frame| {
        let area = frame.area();
        let vertical = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(4)])
            .split(area);
        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(28), Constraint::Percentage(72)])
            .split(vertical[0]);

        let border_style = Style::default().fg(Color::DarkGray);

        let items: Vec<ListItem> = app
            .supervisor
            .processes()
            .iter()
            .enumerate()
            .map(|(idx, process)| {
                let selected = idx == app.selected;
                let indent = if selected { "▶ " } else { "  " };
                let name_style = if selected {
                    Style::default().add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::Gray)
                };
                ListItem::new(Line::from(vec![
                    Span::styled(indent, Style::default().fg(Color::Cyan)),
                    Span::styled(
                        format!("[{}] ", status_char(process.status)),
                        status_style(process.status),
                    ),
                    Span::styled(process.name.clone(), name_style),
                ]))
            })
            .collect();
        let list = List::new(items).block(
            Block::default()
                .title("Processes")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(border_style),
        );
        let mut list_state = ListState::default().with_selected(Some(app.selected));
        frame.render_stateful_widget(list, main[0], &mut list_state);

        let log_block = Block::default()
            .title(log_title(app.supervisor.get(app.selected)))
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(border_style);
        let log_area = log_block.inner(main[1]);
        app.set_log_view_height(log_area.height as usize);

        let log_lines = visible_log_lines(app, log_area.width as usize);
        let empty = log_lines.lines.is_empty();
        frame.render_widget(Paragraph::new(log_lines).block(log_block), main[1]);
        if empty {
            let placeholder = Paragraph::new("No output yet")
                .style(Style::default().fg(Color::DarkGray));
            frame.render_widget(placeholder, log_area);
        }

        let help = app.status_message().unwrap_or(HELP_LINE).to_string();
        let status = Paragraph::new(Text::from(vec![
            Line::from(Span::raw(app.status_line())),
            Line::from(Span::styled(help, Style::default().fg(Color::DarkGray))),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(border_style),
        );
        frame.render_widget(status, vertical[1]);
    })?;
    Ok(())
}

fn window_title(app: &App) -> String {
    match app.supervisor.get(app.selected) {
        Some(process) => format!("deck · {}", process.name),
        None => "deck".to_string(),
    }
}

fn log_title(process: Option<&Process>) -> String {
    match process {
        Some(p) => match (p.status, p.exit_code) {
            (Status::Exited, Some(code)) | (Status::Crashed, Some(code)) => {
                format!("Logs - {} ({} {})", p.name, p.status.label(), code)
            }
            _ => format!("Logs - {} ({})", p.name, p.status.label()),
        },
        None => "Logs".to_string(),
    }
}

fn visible_log_lines(app: &App, width: usize) -> Text<'static> {
    let Some(process) = app.supervisor.get(app.selected) else {
        return Text::default();
    };
    let height = app.log_view_height.max(1);
    let lines = process
        .log
        .iter_from(app.scroll_offset)
        .take(height)
        .map(|line| {
            let plain = sanitize_text(&line.bytes);
            Line::from(Span::raw(truncate(&plain, width.saturating_sub(1))))
        })
        .collect::<Vec<_>>();
    Text::from(lines)
}

fn status_char(status: Status) -> char {
    match status {
        Status::Pending => '·',
        Status::Running => '●',
        Status::Exited => '✓',
        Status::Crashed => '✗',
    }
}

fn status_style(status: Status) -> Style {
    match status {
        Status::Pending => Style::default().fg(Color::DarkGray),
        Status::Running => Style::default().fg(Color::Green),
        Status::Exited => Style::default().fg(Color::Blue),
        Status::Crashed => Style::default().fg(Color::Red),
    }
}

fn truncate(text: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    text.chars().take(width).collect()
}
