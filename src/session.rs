//! Session identity and on-disk layout.
//!
//! Every deck invocation belongs to a session: either a user-named one or
//! one derived from the current working directory, so that invocations from
//! the same project directory find each other's daemon and logs.

use std::env;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::error::DeckError;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Root of all deck session state: `$XDG_DATA_HOME/deck`, falling back to
/// `~/.local/share/deck`, falling back to `/tmp/deck`.
pub fn data_root() -> PathBuf {
    if let Ok(dir) = env::var("XDG_DATA_HOME") {
        if !dir.is_empty() {
            return PathBuf::from(dir).join("deck");
        }
    }
    match dirs::home_dir() {
        Some(home) => home.join(".local").join("share").join("deck"),
        None => PathBuf::from("/tmp").join("deck"),
    }
}

/// Resolves the session id: an explicit `-s` value verbatim, or the FNV-1a
/// hash of the canonical working directory rendered as lowercase hex.
pub fn session_id(explicit: Option<&str>) -> String {
    if let Some(name) = explicit {
        return name.to_string();
    }
    let cwd = env::current_dir()
        .and_then(fs::canonicalize)
        .unwrap_or_else(|_| PathBuf::from("/tmp"));
    format!("{:016x}", fnv1a(cwd.as_os_str().as_bytes()))
}

/// The directory holding one session's PID file and logs.
pub fn session_dir(explicit: Option<&str>) -> PathBuf {
    data_root().join(session_id(explicit))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Makes a process name safe for use as a log file name.
pub fn sanitise_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | ' ' | '\\' => '_',
            other => other,
        })
        .collect()
}

/// Path of one process's capture file inside a session directory.
pub fn log_path(session_dir: &Path, name: &str) -> PathBuf {
    session_dir.join("logs").join(format!("{}.log", sanitise_name(name)))
}

pub fn pid_path(session_dir: &Path) -> PathBuf {
    session_dir.join("daemon.pid")
}

/// Reads the daemon PID file. A missing file is `None`; unparseable content
/// is an [`DeckError::InvalidPid`].
pub fn read_pid(session_dir: &Path) -> Result<Option<i32>> {
    let raw = match fs::read_to_string(pid_path(session_dir)) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let trimmed = raw.trim();
    let pid = trimmed
        .parse::<i32>()
        .map_err(|_| DeckError::InvalidPid(trimmed.to_string()))?;
    Ok(Some(pid))
}

pub fn write_pid(session_dir: &Path, pid: u32) -> Result<()> {
    fs::write(pid_path(session_dir), format!("{}\n", pid))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_reference_vectors() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a(b"foobar"), 0x85dd_5e03_03af_6f83);
    }

    #[test]
    fn sibling_directories_hash_apart() {
        assert_ne!(fnv1a(b"/home/dev/app-a"), fnv1a(b"/home/dev/app-b"));
    }

    #[test]
    fn derived_session_id_is_stable_and_hex() {
        let a = session_id(None);
        let b = session_id(None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn explicit_session_id_is_used_verbatim() {
        assert_eq!(session_id(Some("myproj")), "myproj");
    }

    #[test]
    fn sanitise_replaces_separators() {
        assert_eq!(sanitise_name("my/process name"), "my_process_name");
        assert_eq!(sanitise_name(r"back\slash"), "back_slash");
        assert_eq!(sanitise_name("plain"), "plain");
    }

    #[test]
    fn log_path_uses_sanitised_name() {
        let dir = PathBuf::from("/data/deck/abc");
        assert_eq!(
            log_path(&dir, "npm run dev"),
            PathBuf::from("/data/deck/abc/logs/npm_run_dev.log")
        );
    }

    #[test]
    fn pid_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_pid(dir.path()).unwrap().is_none());
        write_pid(dir.path(), 4242).unwrap();
        assert_eq!(read_pid(dir.path()).unwrap(), Some(4242));
    }

    #[test]
    fn garbage_pid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(pid_path(dir.path()), "not-a-pid\n").unwrap();
        assert!(read_pid(dir.path()).is_err());
    }
}
