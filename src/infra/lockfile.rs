//! Process lock
//!
//! One batch at a time: a lock file in the state directory records the
//! holder's pid. A second invocation fails fast. A lock left behind by a
//! dead process is reclaimed.

use std::io::Write;
use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::config::defaults::LOCK_FILE;
use crate::error::SetupError;

/// Held for the lifetime of a batch; released on drop
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    /// Acquire the lock in `statedir`, reclaiming stale locks
    pub fn acquire(statedir: &Path) -> Result<Self, SetupError> {
        let path = statedir.join(LOCK_FILE);

        for _ in 0..2 {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let holder = read_holder(&path);
                    if let Some(pid) = holder {
                        if process_alive(pid) {
                            return Err(SetupError::LockHeld { pid });
                        }
                        tracing::warn!("Reclaiming stale lock from dead pid {pid}");
                    }
                    let _ = std::fs::remove_file(&path);
                }
                Err(e) => {
                    return Err(SetupError::StateDir {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Err(SetupError::StateDir {
            path,
            error: "could not acquire lock".to_string(),
        })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_holder(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}
