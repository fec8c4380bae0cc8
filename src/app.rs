//! Foreground driver state and key handling.
//!
//! `App` owns the supervisor plus the view state the TUI reads: which
//! process is foregrounded, the log scroll position, and whether the view
//! follows new output. Key events are translated into `AppAction`s that the
//! driver loop applies to the supervisor.

use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::process::Status;
use crate::supervisor::Supervisor;

const STATUS_MESSAGE_TTL: Duration = Duration::from_secs(3);

/// Actions resulting from user interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    /// No action required.
    None,
    /// Exit the application.
    Quit,
    /// Kill the process at the given index.
    Kill(usize),
    /// Restart the process at the given index.
    Restart(usize),
}

#[derive(Debug, Clone)]
struct StatusMessage {
    text: String,
    at: Instant,
}

/// The main application state container for foreground mode.
#[derive(Debug)]
pub struct App {
    /// The supervised process set.
    pub supervisor: Supervisor,
    /// Index of the currently foregrounded process.
    pub selected: usize,
    /// Logical index of the first visible log line.
    pub scroll_offset: usize,
    /// Whether the log view tracks the newest line.
    pub auto_scroll: bool,
    /// Flag indicating the driver loop should exit.
    pub should_quit: bool,
    /// Height of the log view area, set by the renderer each frame.
    pub log_view_height: usize,
    status_message: Option<StatusMessage>,
}

impl App {
    pub fn new(supervisor: Supervisor) -> Self {
        Self {
            supervisor,
            selected: 0,
            scroll_offset: 0,
            auto_scroll: true,
            should_quit: false,
            log_view_height: 0,
            status_message: None,
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> AppAction {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                AppAction::Quit
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
                AppAction::Quit
            }
            KeyCode::Up => {
                if self.selected > 0 {
                    self.select(self.selected - 1);
                }
                AppAction::None
            }
            KeyCode::Down => {
                if self.selected + 1 < self.supervisor.len() {
                    self.select(self.selected + 1);
                }
                AppAction::None
            }
            KeyCode::Tab => {
                if !self.supervisor.is_empty() {
                    self.select((self.selected + 1) % self.supervisor.len());
                }
                AppAction::None
            }
            KeyCode::PageUp => {
                self.scroll_up(self.log_view_height.max(1));
                AppAction::None
            }
            KeyCode::PageDown => {
                self.scroll_down(self.log_view_height.max(1));
                AppAction::None
            }
            KeyCode::Home => {
                self.scroll_offset = 0;
                self.auto_scroll = false;
                AppAction::None
            }
            KeyCode::End => {
                self.auto_scroll = true;
                self.ensure_follow();
                AppAction::None
            }
            KeyCode::Char('f') => {
                self.auto_scroll = !self.auto_scroll;
                if self.auto_scroll {
                    self.ensure_follow();
                }
                AppAction::None
            }
            KeyCode::Char('r') => AppAction::Restart(self.selected),
            KeyCode::Char('k') => AppAction::Kill(self.selected),
            _ => AppAction::None,
        }
    }

    fn select(&mut self, index: usize) {
        self.selected = index;
        // Switching panes snaps the view back to the newest output.
        self.auto_scroll = true;
        self.ensure_follow();
    }

    pub fn scroll_up(&mut self, amount: usize) {
        let max_scroll = self.max_scroll();
        let current = if self.auto_scroll { max_scroll } else { self.scroll_offset };
        self.scroll_offset = current.saturating_sub(amount).min(max_scroll);
        self.auto_scroll = false;
    }

    pub fn scroll_down(&mut self, amount: usize) {
        let max_scroll = self.max_scroll();
        let current = if self.auto_scroll { max_scroll } else { self.scroll_offset };
        let next = (current + amount).min(max_scroll);
        self.scroll_offset = next;
        self.auto_scroll = next == max_scroll;
    }

    /// Pins the view so the newest line is visible.
    pub fn ensure_follow(&mut self) {
        self.scroll_offset = self.max_scroll();
    }

    /// Called by the renderer once the log area is laid out.
    pub fn set_log_view_height(&mut self, height: usize) {
        self.log_view_height = height;
        if self.auto_scroll {
            self.ensure_follow();
        } else {
            self.scroll_offset = self.scroll_offset.min(self.max_scroll());
        }
    }

    fn max_scroll(&self) -> usize {
        let len = self
            .supervisor
            .get(self.selected)
            .map(|p| p.log.len())
            .unwrap_or(0);
        len.saturating_sub(self.log_view_height.max(1))
    }

    pub fn set_status_message(&mut self, text: impl Into<String>) {
        self.status_message = Some(StatusMessage {
            text: text.into(),
            at: Instant::now(),
        });
    }

    /// The transient status message, if it has not expired.
    pub fn status_message(&self) -> Option<&str> {
        self.status_message
            .as_ref()
            .filter(|m| m.at.elapsed() < STATUS_MESSAGE_TTL)
            .map(|m| m.text.as_str())
    }

    /// One-line summary for the status bar.
    pub fn status_line(&self) -> String {
        let running = self
            .supervisor
            .processes()
            .iter()
            .filter(|p| p.is_alive())
            .count();
        let selected = match self.supervisor.get(self.selected) {
            Some(p) => match (p.status, p.exit_code) {
                (Status::Exited, Some(code)) | (Status::Crashed, Some(code)) => {
                    format!("{} · {} (code {})", p.name, p.status.label(), code)
                }
                _ => format!("{} · {}", p.name, p.status.label()),
            },
            None => String::from("no processes"),
        };
        format!(
            "{}/{} running · {}",
            running,
            self.supervisor.len(),
            selected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Process;

    fn app_with(names: &[&str]) -> App {
        let processes = names
            .iter()
            .map(|name| Process::new(*name, "sleep 10"))
            .collect();
        App::new(Supervisor::new(processes))
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn quit_sets_the_flag() {
        let mut app = app_with(&["a"]);
        assert_eq!(app.handle_key(key(KeyCode::Char('q'))), AppAction::Quit);
        assert!(app.should_quit);
    }

    #[test]
    fn selection_wraps_with_tab() {
        let mut app = app_with(&["a", "b", "c"]);
        app.handle_key(key(KeyCode::Tab));
        assert_eq!(app.selected, 1);
        app.handle_key(key(KeyCode::Tab));
        app.handle_key(key(KeyCode::Tab));
        assert_eq!(app.selected, 0);
    }

    #[test]
    fn selection_is_clamped_at_the_edges() {
        let mut app = app_with(&["a", "b"]);
        app.handle_key(key(KeyCode::Up));
        assert_eq!(app.selected, 0);
        app.handle_key(key(KeyCode::Down));
        app.handle_key(key(KeyCode::Down));
        assert_eq!(app.selected, 1);
    }

    #[test]
    fn restart_and_kill_target_the_selection() {
        let mut app = app_with(&["a", "b"]);
        app.handle_key(key(KeyCode::Down));
        assert_eq!(app.handle_key(key(KeyCode::Char('r'))), AppAction::Restart(1));
        assert_eq!(app.handle_key(key(KeyCode::Char('k'))), AppAction::Kill(1));
    }

    #[test]
    fn scrolling_up_disengages_follow() {
        let mut app = app_with(&["a"]);
        app.supervisor.get_mut(0).unwrap().log.append(b"1\n2\n3\n4\n5\n");
        app.set_log_view_height(2);
        assert_eq!(app.scroll_offset, 3);
        app.handle_key(key(KeyCode::PageUp));
        assert!(!app.auto_scroll);
        assert_eq!(app.scroll_offset, 1);
        app.handle_key(key(KeyCode::End));
        assert!(app.auto_scroll);
        assert_eq!(app.scroll_offset, 3);
    }

    #[test]
    fn scrolling_to_bottom_reengages_follow() {
        let mut app = app_with(&["a"]);
        app.supervisor.get_mut(0).unwrap().log.append(b"1\n2\n3\n4\n5\n");
        app.set_log_view_height(2);
        app.scroll_up(2);
        assert!(!app.auto_scroll);
        app.scroll_down(5);
        assert!(app.auto_scroll);
    }
}
