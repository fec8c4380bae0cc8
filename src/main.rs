//! deck: a terminal process multiplexer.
//!
//! Runs a fixed set of long-lived commands side by side, captures their
//! output into bounded scrollback buffers, and shows them in a switchable
//! TUI. With `deck start` the same set is supervised from a detached daemon
//! whose logs can be tailed with `deck logs` and ended with `deck stop`.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyEventKind};

use deck::app::{App, AppAction};
use deck::config;
use deck::daemon::{self, LogRange};
use deck::process::Process;
use deck::supervisor::Supervisor;
use deck::tui;

/// Poll cadence of the foreground driver loop (~60 Hz).
const TICK: Duration = Duration::from_millis(16);

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "deck",
    version,
    about = "Terminal process multiplexer",
    styles = help_styles(),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Comma-separated process names aligned with the command list.
    #[arg(short = 'n', long)]
    names: Option<String>,
    /// Session id (defaults to one derived from the working directory).
    #[arg(short = 's', long)]
    session: Option<String>,
    /// Shell command lines to run, one process each.
    #[arg(trailing_var_arg = true)]
    commands: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the commands under a detached background daemon.
    Start {
        /// Comma-separated process names aligned with the command list.
        #[arg(short = 'n', long)]
        names: Option<String>,
        /// Session id (defaults to one derived from the working directory).
        #[arg(short = 's', long)]
        session: Option<String>,
        /// Shell command lines to run, one process each.
        #[arg(trailing_var_arg = true)]
        commands: Vec<String>,
    },
    /// Stop the session's daemon.
    Stop {
        /// Session id (defaults to one derived from the working directory).
        #[arg(short = 's', long)]
        session: Option<String>,
    },
    /// Stream one process's captured log to stdout.
    Logs {
        /// Process name as shown by the daemon.
        name: String,
        /// Print the first N lines.
        #[arg(long, conflicts_with = "tail")]
        head: Option<usize>,
        /// Print the last N lines (default 100).
        #[arg(long)]
        tail: Option<usize>,
        /// Session id (defaults to one derived from the working directory).
        #[arg(short = 's', long)]
        session: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Start {
            names,
            session,
            commands,
        }) => {
            let invocation = resolve_invocation(names.as_deref(), &commands, session)?;
            daemon::start(invocation.processes, invocation.session.as_deref())
        }
        Some(Commands::Stop { session }) => daemon::stop(session.as_deref()),
        Some(Commands::Logs {
            name,
            head,
            tail,
            session,
        }) => {
            let range = match (head, tail) {
                (Some(n), _) => LogRange::Head(n),
                (None, Some(n)) => LogRange::Tail(n),
                (None, None) => LogRange::Tail(100),
            };
            daemon::logs(&name, range, session.as_deref())
        }
        None => {
            let invocation = resolve_invocation(cli.names.as_deref(), &cli.commands, cli.session)?;
            run_foreground(Supervisor::new(invocation.processes))
        }
    }
}

/// The process set plus the effective session for one invocation.
struct Invocation {
    processes: Vec<Process>,
    session: Option<String>,
}

/// Builds the process list from CLI commands, falling back to `deck.toml`
/// when none were given. All argument validation happens here, before any
/// side effect.
fn resolve_invocation(
    names: Option<&str>,
    commands: &[String],
    session: Option<String>,
) -> Result<Invocation> {
    if !commands.is_empty() {
        let names = parse_names(names, commands)?;
        let processes: Vec<Process> = names
            .into_iter()
            .zip(commands)
            .map(|(name, command)| Process::new(name, command.clone()))
            .collect();
        ensure_unique_names(&processes)?;
        return Ok(Invocation { processes, session });
    }

    let Some(path) = config::default_config_path() else {
        bail!("no commands given (pass CMD arguments or create deck.toml)");
    };
    let parsed = config::load_config(&path)?;
    if parsed.processes.is_empty() {
        bail!("no processes defined in {}", path.display());
    }
    let processes: Vec<Process> = parsed
        .processes
        .iter()
        .map(|p| {
            let name = p.name.clone().unwrap_or_else(|| derive_name(&p.cmd));
            Process::new(name, p.cmd.clone())
        })
        .collect();
    ensure_unique_names(&processes)?;
    Ok(Invocation {
        processes,
        session: session.or(parsed.session),
    })
}

fn parse_names(raw: Option<&str>, commands: &[String]) -> Result<Vec<String>> {
    let Some(raw) = raw else {
        return Ok(commands.iter().map(|c| derive_name(c)).collect());
    };
    let names: Vec<String> = raw
        .split(',')
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    if names.len() != commands.len() {
        bail!(
            "expected {} names for --names, got {}",
            commands.len(),
            names.len()
        );
    }
    Ok(names)
}

/// First whitespace-separated token of the command, directory prefix removed.
fn derive_name(command: &str) -> String {
    let token = command.split_whitespace().next().unwrap_or("process");
    token.rsplit('/').next().unwrap_or(token).to_string()
}

fn ensure_unique_names(processes: &[Process]) -> Result<()> {
    let mut seen = HashSet::new();
    for process in processes {
        if !seen.insert(process.name.as_str()) {
            bail!("duplicate process name: {}", process.name);
        }
    }
    Ok(())
}

/// The foreground driver: one cooperative loop that drains the supervisor,
/// services UI events, renders, and idles at ~60 Hz.
fn run_foreground(mut supervisor: Supervisor) -> Result<()> {
    supervisor.spawn_all()?;
    let mut terminal = tui::init_terminal()?;
    let mut app = App::new(supervisor);

    let result = loop {
        let flowed = app.supervisor.read_all();
        if flowed && app.auto_scroll {
            app.ensure_follow();
        }
        if let Err(err) = pump_events(&mut app, &mut terminal) {
            break Err(err);
        }
        if let Err(err) = tui::draw(&mut app, &mut terminal) {
            break Err(err.into());
        }
        if app.should_quit {
            break Ok(());
        }
        thread::sleep(TICK);
    };

    app.supervisor.kill_all();
    tui::restore_terminal(terminal)?;
    result
}

fn pump_events(app: &mut App, terminal: &mut tui::TuiTerminal) -> Result<()> {
    while event::poll(Duration::ZERO)? {
        match event::read()? {
            Event::Key(key) if key.kind != KeyEventKind::Release => {
                match app.handle_key(key) {
                    AppAction::Restart(id) => {
                        if let Some(process) = app.supervisor.get_mut(id) {
                            let message = match process.restart() {
                                Ok(()) => format!("restarted {}", process.name),
                                Err(err) => format!("restart failed: {}", err),
                            };
                            app.set_status_message(message);
                        }
                    }
                    AppAction::Kill(id) => {
                        if let Some(process) = app.supervisor.get_mut(id) {
                            process.kill();
                            let message = format!("killed {}", process.name);
                            app.set_status_message(message);
                        }
                    }
                    AppAction::Quit | AppAction::None => {}
                }
            }
            Event::Resize(_, _) => {
                let _ = terminal.autoresize();
            }
            _ => {}
        }
    }
    Ok(())
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Cyan.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_names_from_the_first_token() {
        assert_eq!(derive_name("npm run dev"), "npm");
        assert_eq!(derive_name("/usr/local/bin/node server.js"), "node");
        assert_eq!(derive_name("cargo watch -x check"), "cargo");
        assert_eq!(derive_name("   "), "process");
    }

    #[test]
    fn explicit_names_must_match_command_count() {
        let commands = vec!["echo a".to_string(), "echo b".to_string()];
        let names = parse_names(Some("one,two"), &commands).unwrap();
        assert_eq!(names, vec!["one", "two"]);
        assert!(parse_names(Some("only"), &commands).is_err());
        assert!(parse_names(Some("a,b,c"), &commands).is_err());
    }

    #[test]
    fn names_are_trimmed_and_empties_dropped() {
        let commands = vec!["echo a".to_string(), "echo b".to_string()];
        let names = parse_names(Some(" api , web "), &commands).unwrap();
        assert_eq!(names, vec!["api", "web"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let processes = vec![Process::new("npm", "npm run a"), Process::new("npm", "npm run b")];
        assert!(ensure_unique_names(&processes).is_err());
    }

    #[test]
    fn mismatched_names_spawn_nothing() {
        let commands = vec!["echo a".to_string()];
        let result = resolve_invocation(Some("a,b"), &commands, None);
        assert!(result.is_err());
    }
}
