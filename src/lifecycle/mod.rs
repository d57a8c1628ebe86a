//! Single-instance enforcement and unclean-exit accounting.
//!
//! The running process owns a lock file containing `<pid>|<timestamp>`. A
//! lock left behind by a dead process means the previous run never reached
//! its graceful shutdown path; that is counted as one death in the state
//! document before the stale lock is superseded.

mod probe;

pub use probe::{LivenessProbe, SystemProbe};

use crate::error::LockError;
use crate::state::{EventKind, StateStore};
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub pid: u32,
    pub acquired_at: String,
}

impl LockRecord {
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn render(&self) -> String {
        format!("{}|{}\n", self.pid, self.acquired_at)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let line = raw.lines().next()?.trim();
        let (pid, acquired_at) = line.split_once('|').unwrap_or((line, ""));
        Some(Self {
            pid: pid.trim().parse().ok()?,
            acquired_at: acquired_at.trim().to_string(),
        })
    }
}

/// What `acquire` found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// No lock existed.
    Fresh,
    /// A lock was left by a process that is gone (or could not be
    /// identified). The death counter now reads `revision_count`.
    Recovered {
        stale_pid: Option<u32>,
        revision_count: u64,
    },
    /// The lock already named this process, as happens after a re-exec.
    Reclaimed,
}

pub struct LifecycleGuard {
    path: PathBuf,
    pid: u32,
    probe: Arc<dyn LivenessProbe>,
    held: AtomicBool,
}

impl LifecycleGuard {
    pub fn new(path: impl Into<PathBuf>, probe: Arc<dyn LivenessProbe>) -> Self {
        Self {
            path: path.into(),
            pid: std::process::id(),
            probe,
            held: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Takes the lock, resolving any stale record first.
    ///
    /// Fails with [`LockError::Conflict`] when a live process holds it.
    pub fn acquire(&self, store: &StateStore) -> Result<Acquisition, LockError> {
        let existing = match fs::read_to_string(&self.path) {
            Ok(raw) => Some(LockRecord::parse(&raw)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => None,
            Err(source) => return Err(self.io_error("read", source)),
        };

        let acquisition = match existing {
            None => Acquisition::Fresh,
            Some(Some(record)) if record.pid == self.pid => Acquisition::Reclaimed,
            Some(Some(record)) if self.probe.is_alive(record.pid) => {
                return Err(LockError::Conflict {
                    pid: record.pid,
                    since: record.acquired_at,
                });
            }
            Some(stale) => {
                let stale_pid = stale.map(|r| r.pid);
                let revision_count = record_death(store, stale_pid);
                match fs::remove_file(&self.path) {
                    Ok(()) => {}
                    Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                    Err(source) => return Err(self.io_error("remove stale", source)),
                }
                tracing::info!(?stale_pid, revision_count, "removed stale lock");
                Acquisition::Recovered {
                    stale_pid,
                    revision_count,
                }
            }
        };

        match acquisition {
            Acquisition::Reclaimed => self.overwrite_record()?,
            Acquisition::Fresh | Acquisition::Recovered { .. } => self.create_record()?,
        }
        self.held.store(true, Ordering::SeqCst);
        Ok(acquisition)
    }

    /// Removes the lock if this process owns it. Safe to call repeatedly.
    pub fn release(&self) -> Result<(), LockError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                if let Some(record) = LockRecord::parse(&raw)
                    && record.pid != self.pid
                {
                    tracing::warn!(holder = record.pid, "lock owned by another process; left in place");
                    self.held.store(false, Ordering::SeqCst);
                    return Ok(());
                }
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                self.held.store(false, Ordering::SeqCst);
                return Ok(());
            }
            Err(source) => return Err(self.io_error("read", source)),
        }

        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(self.io_error("remove", source)),
        }
        self.held.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn record(&self) -> LockRecord {
        LockRecord {
            pid: self.pid,
            ..LockRecord::current()
        }
    }

    fn create_record(&self) -> Result<(), LockError> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                // Lost a race with another starting process.
                let holder = fs::read_to_string(&self.path)
                    .ok()
                    .and_then(|raw| LockRecord::parse(&raw));
                return Err(LockError::Conflict {
                    pid: holder.as_ref().map_or(0, |r| r.pid),
                    since: holder.map(|r| r.acquired_at).unwrap_or_default(),
                });
            }
            Err(source) => return Err(self.io_error("create", source)),
        };
        file.write_all(self.record().render().as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|source| self.io_error("write", source))
    }

    fn overwrite_record(&self) -> Result<(), LockError> {
        crate::state::write_atomic(&self.path, self.record().render().as_bytes())
            .map_err(|source| self.io_error("write", source))
    }

    fn io_error(&self, op: &'static str, source: io::Error) -> LockError {
        LockError::Io {
            op,
            path: self.path.clone(),
            source,
        }
    }
}

fn record_death(store: &StateStore, stale_pid: Option<u32>) -> u64 {
    let revision_count = store.mutate(crate::state::StateDocument::record_death);
    let payload = match stale_pid {
        Some(pid) => format!("1 pid={pid}"),
        None => "1 pid=unknown".to_string(),
    };
    store.append_journal(EventKind::Death, payload);
    if let Err(error) = store.save() {
        tracing::warn!(%error, "death counter recorded in memory only; autosave will retry");
    }
    revision_count
}
