//! Daemon-coordination error taxonomy.

use thiserror::Error;

/// Failures coordinating with a background deck daemon. Argument and spawn
/// errors are reported through `anyhow`/clap; these are the cases a user can
/// hit when two invocations share a session directory.
#[derive(Debug, Error)]
pub enum DeckError {
    #[error("a deck daemon is already running for this session (pid {0})")]
    AlreadyRunning(i32),

    #[error("no deck daemon is running for this session")]
    NotRunning,

    #[error("no captured log for process '{0}'")]
    LogNotFound(String),

    #[error("daemon.pid does not contain a valid pid: '{0}'")]
    InvalidPid(String),
}
