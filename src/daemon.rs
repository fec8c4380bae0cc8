//! Daemon mode: detach, supervise in the background, serve `stop`/`logs`.
//!
//! `start` forks a child that creates a new session, writes `daemon.pid`,
//! mirrors every drained chunk into per-process log files, and cleans up when
//! signalled or when every child has exited. Other invocations coordinate
//! with it only through the session directory.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{fork, setsid, ForkResult, Pid};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::DeckError;
use crate::process::Process;
use crate::session;
use crate::supervisor::Supervisor;

/// Sleep between poll cycles when no process produced bytes.
const IDLE_SLEEP: Duration = Duration::from_millis(50);

/// Set from the signal handlers, polled by the drain loop. The handlers do
/// nothing else; no async-signal-unsafe work happens in signal context.
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_stop(_signal: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

/// Which part of a capture file `logs` should stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRange {
    /// First `n` newline-delimited lines.
    Head(usize),
    /// Last `n` lines.
    Tail(usize),
    /// The whole file.
    All,
}

/// Starts the daemon. The parent prints the child PID and returns; the child
/// never returns from this call.
pub fn start(processes: Vec<Process>, session: Option<&str>) -> Result<()> {
    let dir = session::session_dir(session);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create session directory {}", dir.display()))?;
    if let Some(pid) = running_daemon_pid(&dir)? {
        bail!(DeckError::AlreadyRunning(pid));
    }

    match unsafe { fork() }.context("failed to fork daemon")? {
        ForkResult::Parent { child } => {
            println!("deck daemon started (pid {})", child);
            Ok(())
        }
        ForkResult::Child => {
            let code = match run_daemon(&dir, processes) {
                Ok(()) => 0,
                Err(err) => {
                    tracing::error!(error = %err, "daemon failed");
                    let _ = fs::remove_file(session::pid_path(&dir));
                    1
                }
            };
            std::process::exit(code);
        }
    }
}

fn run_daemon(dir: &Path, mut processes: Vec<Process>) -> Result<()> {
    setsid().context("failed to detach into a new session")?;
    redirect_stdio_to_devnull();
    init_logging(dir);
    session::write_pid(dir, std::process::id())?;
    install_stop_handlers()?;

    fs::create_dir_all(dir.join("logs"))?;
    let mut capture_files = Vec::with_capacity(processes.len());
    for process in &mut processes {
        let path = session::log_path(dir, &process.name);
        let file = File::create(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        // A process that cannot spawn is skipped; the survivors still run.
        match process.spawn() {
            Ok(()) => info!(name = %process.name, command = %process.command, "spawned"),
            Err(err) => warn!(name = %process.name, error = %err, "spawn failed, continuing"),
        }
        capture_files.push((file, path));
    }

    let mut supervisor = Supervisor::new(processes);
    info!(pid = std::process::id(), "daemon running");

    while !STOP_REQUESTED.load(Ordering::SeqCst) && supervisor.any_alive() {
        let mut flowed = false;
        for (i, process) in supervisor.processes_mut().iter_mut().enumerate() {
            let file = &mut capture_files[i].0;
            // Write failures are swallowed: losing log bytes beats taking the
            // supervisor down.
            if process.drain_into(&mut |chunk| {
                let _ = file.write_all(chunk);
            }) {
                flowed = true;
            }
        }
        if !flowed {
            thread::sleep(IDLE_SLEEP);
        }
    }

    info!(
        stop_requested = STOP_REQUESTED.load(Ordering::SeqCst),
        "daemon shutting down"
    );
    supervisor.kill_all();
    for (_, path) in &capture_files {
        let _ = fs::remove_file(path);
    }
    let _ = fs::remove_file(session::pid_path(dir));
    Ok(())
}

/// Sends SIGTERM to the session's daemon; the daemon cleans up after itself.
pub fn stop(session: Option<&str>) -> Result<()> {
    let dir = session::session_dir(session);
    let Some(pid) = session::read_pid(&dir)? else {
        bail!(DeckError::NotRunning);
    };
    match signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => {
            println!("sent SIGTERM to deck daemon (pid {})", pid);
            Ok(())
        }
        Err(Errno::ESRCH) => {
            // The daemon died without cleaning up; drop its stale PID file.
            let _ = fs::remove_file(session::pid_path(&dir));
            bail!(DeckError::NotRunning);
        }
        Err(err) => Err(err).context("failed to signal daemon"),
    }
}

/// Streams one process's capture file to stdout.
pub fn logs(name: &str, range: LogRange, session: Option<&str>) -> Result<()> {
    let path = session::log_path(&session::session_dir(session), name);
    let file = File::open(&path).map_err(|_| DeckError::LogNotFound(name.to_string()))?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    stream_log(file, range, &mut out)
}

/// PID of the session's live daemon, unlinking a stale PID file on the way.
pub fn running_daemon_pid(dir: &Path) -> Result<Option<i32>> {
    let Some(pid) = session::read_pid(dir)? else {
        return Ok(None);
    };
    match signal::kill(Pid::from_raw(pid), None) {
        Ok(()) => Ok(Some(pid)),
        Err(Errno::ESRCH) => {
            let _ = fs::remove_file(session::pid_path(dir));
            Ok(None)
        }
        // EPERM and friends: something with that PID exists.
        Err(_) => Ok(Some(pid)),
    }
}

fn stream_log(file: File, range: LogRange, out: &mut impl Write) -> Result<()> {
    let mut reader = BufReader::new(file);
    match range {
        LogRange::All => {
            io::copy(&mut reader, out)?;
        }
        LogRange::Head(n) => {
            let mut line = Vec::new();
            let mut count = 0;
            while count < n {
                line.clear();
                if reader.read_until(b'\n', &mut line)? == 0 {
                    break;
                }
                out.write_all(&line)?;
                count += 1;
            }
        }
        LogRange::Tail(n) => {
            let mut window: VecDeque<Vec<u8>> = VecDeque::new();
            loop {
                let mut line = Vec::new();
                if reader.read_until(b'\n', &mut line)? == 0 {
                    break;
                }
                if window.len() == n {
                    window.pop_front();
                }
                if n > 0 {
                    window.push_back(line);
                }
            }
            for line in window {
                out.write_all(&line)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn install_stop_handlers() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(request_stop),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        signal::sigaction(Signal::SIGTERM, &action).context("failed to install SIGTERM handler")?;
        signal::sigaction(Signal::SIGINT, &action).context("failed to install SIGINT handler")?;
    }
    Ok(())
}

// The detached child keeps no claim on the launching terminal.
fn redirect_stdio_to_devnull() {
    let Ok(devnull) = fs::OpenOptions::new().read(true).write(true).open("/dev/null") else {
        return;
    };
    use std::os::unix::io::AsRawFd;
    let fd = devnull.as_raw_fd();
    unsafe {
        libc::dup2(fd, libc::STDIN_FILENO);
        libc::dup2(fd, libc::STDOUT_FILENO);
        libc::dup2(fd, libc::STDERR_FILENO);
    }
}

/// Tracing goes to `daemon.log` in the session directory; the launching
/// terminal is long gone by the time anything interesting happens.
fn init_logging(dir: &Path) {
    let Ok(file) = File::create(dir.join("daemon.log")) else {
        return;
    };
    let filter = EnvFilter::try_from_env("DECK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .try_init();
}
