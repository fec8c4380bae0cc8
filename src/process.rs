//! A single supervised child process.
//!
//! This module owns the process lifecycle: spawning through a POSIX shell,
//! draining stdout/stderr through non-blocking pipes into the process's
//! `LogBuffer`, reaping the exit status exactly once, and kill/restart.

use std::io::{self, Read};
use std::os::fd::RawFd;
use std::os::unix::io::AsRawFd;
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};

use anyhow::{Context, Result};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::output::{LogBuffer, DEFAULT_CAPACITY};

/// One non-blocking read per stream per drain call.
const READ_CHUNK: usize = 8192;

/// Lifecycle status of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Created or restarted, not yet spawned.
    Pending,
    /// Child is running.
    Running,
    /// Child exited cleanly or was killed by us.
    Exited,
    /// Child exited non-zero, died to a signal, or its pipes failed.
    Crashed,
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Exited => "exited",
            Status::Crashed => "crashed",
        }
    }
}

/// Outcome of one non-blocking read on one pipe.
enum ReadOutcome {
    Drained,
    Idle,
    Eof,
    Failed,
}

/// A supervised command: the child handle, its pipes, and its captured log.
#[derive(Debug)]
pub struct Process {
    /// Display name, unique within a supervisor.
    pub name: String,
    /// Shell command line, run via `/bin/sh -c`.
    pub command: String,
    pub status: Status,
    /// Exit code once the child has been reaped; absent for signal deaths.
    pub exit_code: Option<i32>,
    /// Captured output, stdout and stderr interleaved in arrival order.
    pub log: LogBuffer,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl Process {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            status: Status::Pending,
            exit_code: None,
            log: LogBuffer::new(DEFAULT_CAPACITY),
            child: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Launches the command in its own process group with piped, non-blocking
    /// stdout and stderr.
    pub fn spawn(&mut self) -> Result<()> {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.name))?;

        self.stdout = child.stdout.take();
        self.stderr = child.stderr.take();
        self.child = Some(child);
        if let Err(err) = self.set_pipes_nonblocking() {
            self.terminate_child();
            return Err(err);
        }
        self.status = Status::Running;
        Ok(())
    }

    fn set_pipes_nonblocking(&self) -> Result<()> {
        if let Some(out) = &self.stdout {
            set_nonblocking(out.as_raw_fd())?;
        }
        if let Some(err) = &self.stderr {
            set_nonblocking(err.as_raw_fd())?;
        }
        Ok(())
    }

    /// Best-effort non-blocking drain of both pipes into the log.
    ///
    /// Returns `true` iff some bytes were drained by this call; the drivers
    /// use that to decide whether to idle-sleep.
    pub fn read_output(&mut self) -> bool {
        self.drain_into(&mut |_| {})
    }

    /// Like [`read_output`](Self::read_output), but also hands every drained
    /// chunk to `sink` (the daemon mirrors chunks to its log files).
    pub fn drain_into<F: FnMut(&[u8])>(&mut self, sink: &mut F) -> bool {
        let mut buf = [0u8; READ_CHUNK];
        let out = read_stream(&mut self.stdout, &mut self.log, sink, &mut buf);
        let err = read_stream(&mut self.stderr, &mut self.log, sink, &mut buf);

        if matches!(out, ReadOutcome::Failed) || matches!(err, ReadOutcome::Failed) {
            self.terminate_child();
            self.status = Status::Crashed;
            return false;
        }

        // Reap once both pipes have closed.
        if self.stdout.is_none() && self.stderr.is_none() && self.child.is_some() {
            self.reap();
        }

        matches!(out, ReadOutcome::Drained) || matches!(err, ReadOutcome::Drained)
    }

    /// Collects the child's exit status and clears the handle. Both pipes
    /// have reported EOF by the time this runs, so the wait returns promptly.
    pub fn reap(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.stdout = None;
        self.stderr = None;
        match child.wait() {
            Ok(exit) => match exit.code() {
                Some(code) => {
                    self.exit_code = Some(code);
                    self.status = if code == 0 { Status::Exited } else { Status::Crashed };
                }
                None => self.status = Status::Crashed,
            },
            Err(_) => self.status = Status::Crashed,
        }
    }

    /// Kills the child's process group and reaps it. Idempotent: with no
    /// child handle present this is a no-op.
    pub fn kill(&mut self) {
        if self.child.is_none() {
            return;
        }
        self.terminate_child();
        self.status = Status::Exited;
    }

    /// Kills and re-spawns, with a fresh log and no exit code.
    pub fn restart(&mut self) -> Result<()> {
        self.kill();
        self.log.clear();
        self.exit_code = None;
        self.status = Status::Pending;
        self.spawn()
    }

    pub fn is_alive(&self) -> bool {
        self.status == Status::Running
    }

    // Group SIGKILL plus an inline wait, so the child is never left as a
    // zombie. Errors are swallowed: the handle must be released regardless.
    fn terminate_child(&mut self) {
        self.stdout = None;
        self.stderr = None;
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id() as i32;
        let _ = kill(Pid::from_raw(-pid), Signal::SIGKILL);
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.terminate_child();
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

fn read_stream<R: Read, F: FnMut(&[u8])>(
    stream: &mut Option<R>,
    log: &mut LogBuffer,
    sink: &mut F,
    buf: &mut [u8],
) -> ReadOutcome {
    let Some(reader) = stream.as_mut() else {
        return ReadOutcome::Idle;
    };
    match reader.read(buf) {
        Ok(0) => {
            *stream = None;
            ReadOutcome::Eof
        }
        Ok(n) => {
            log.append(&buf[..n]);
            sink(&buf[..n]);
            ReadOutcome::Drained
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadOutcome::Idle,
        Err(_) => {
            *stream = None;
            ReadOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    fn drain_until_settled(process: &mut Process) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            process.read_output();
            if !process.is_alive() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("process {} did not settle within 2s", process.name);
    }

    fn line_text(process: &Process, i: usize) -> String {
        process.log.line(i).unwrap().text().into_owned()
    }

    #[test]
    fn captures_a_single_line() {
        let mut process = Process::new("echo", "echo 'hello world'");
        process.spawn().unwrap();
        drain_until_settled(&mut process);
        assert_eq!(process.status, Status::Exited);
        assert_eq!(process.exit_code, Some(0));
        assert_eq!(process.log.len(), 1);
        assert_eq!(line_text(&process, 0), "hello world");
    }

    #[test]
    fn captures_lines_in_emission_order() {
        let mut process = Process::new("multi", "echo 'line1'; echo 'line2'; echo 'line3'");
        process.spawn().unwrap();
        drain_until_settled(&mut process);
        assert_eq!(process.log.len(), 3);
        assert_eq!(line_text(&process, 0), "line1");
        assert_eq!(line_text(&process, 1), "line2");
        assert_eq!(line_text(&process, 2), "line3");
    }

    #[test]
    fn reassembles_partial_writes() {
        let mut process = Process::new("printf", "printf 'hel'; printf 'lo\\n'");
        process.spawn().unwrap();
        drain_until_settled(&mut process);
        assert_eq!(process.log.len(), 1);
        assert_eq!(line_text(&process, 0), "hello");
    }

    #[test]
    fn captures_stderr_too() {
        let mut process = Process::new("stderr", "echo oops >&2");
        process.spawn().unwrap();
        drain_until_settled(&mut process);
        assert_eq!(process.log.len(), 1);
        assert_eq!(line_text(&process, 0), "oops");
    }

    #[test]
    fn ring_keeps_only_the_newest_lines() {
        let mut process = Process::new("seq", "seq 1 1050");
        process.spawn().unwrap();
        drain_until_settled(&mut process);
        assert_eq!(process.log.len(), 1000);
        assert_eq!(line_text(&process, 0), "51");
        assert_eq!(line_text(&process, 999), "1050");
    }

    #[test]
    fn nonzero_exit_is_a_crash() {
        let mut process = Process::new("fail", "exit 1");
        process.spawn().unwrap();
        drain_until_settled(&mut process);
        assert_eq!(process.status, Status::Crashed);
        assert_eq!(process.exit_code, Some(1));
    }

    #[test]
    fn kill_is_prompt_and_idempotent() {
        let mut process = Process::new("sleeper", "sleep 10");
        process.spawn().unwrap();
        assert!(process.is_alive());
        process.kill();
        assert!(!process.is_alive());
        assert_eq!(process.status, Status::Exited);
        process.kill();
        assert_eq!(process.status, Status::Exited);
    }

    #[test]
    fn alive_tracks_running_status() {
        let mut process = Process::new("sleeper", "sleep 10");
        assert!(!process.is_alive());
        process.spawn().unwrap();
        assert!(process.is_alive());
        process.kill();
        assert!(!process.is_alive());
    }

    #[test]
    fn restart_clears_the_log() {
        let mut process = Process::new("echo", "echo once");
        process.spawn().unwrap();
        drain_until_settled(&mut process);
        assert_eq!(process.log.len(), 1);
        process.restart().unwrap();
        assert_eq!(process.log.len(), 0);
        assert_eq!(process.exit_code, None);
        drain_until_settled(&mut process);
        assert_eq!(line_text(&process, 0), "once");
    }

    #[test]
    fn missing_command_crashes_with_shell_exit_code() {
        let mut process = Process::new("missing", "definitely-not-a-real-binary-xyz");
        process.spawn().unwrap();
        drain_until_settled(&mut process);
        assert_eq!(process.status, Status::Crashed);
        // POSIX shells report "command not found" as 127.
        assert_eq!(process.exit_code, Some(127));
    }
}
