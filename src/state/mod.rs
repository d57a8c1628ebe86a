//! Crash-safe persistence for the agent's state document.
//!
//! The store owns one [`StateDocument`] behind a single mutex. All readers
//! and writers go through [`StateStore::read`] / [`StateStore::mutate`];
//! persistence goes through [`StateStore::save`], which writes a temporary
//! sibling file, syncs it, and renames it over the primary path. A reader of
//! the primary path therefore sees either the previous document or the new
//! one in full.
//!
//! Loading never fails: an unparseable file is repaired by prefix
//! truncation when possible, and otherwise moved into `quarantine/` before
//! a fresh default document is handed out.

mod document;
mod journal;
mod repair;

pub use document::{
    DEFAULT_AUTO_UPDATE_MINUTES, DEFAULT_IDENTITY, FLAG_AUTO_UPDATE, FLAG_PHASE_PERSISTENCE,
    StateDocument,
};
pub use journal::{EventKind, Journal, JournalEntry};

use crate::error::StorageError;
use chrono::Utc;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

const PRIMARY_FILE: &str = "memory.json";
const JOURNAL_FILE: &str = "memory.journal";
const LOCK_FILE: &str = "revenant.lock";
const RECOVERY_DIR: &str = "recovery";
const QUARANTINE_DIR: &str = "quarantine";

/// Well-known file locations under one state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    dir: PathBuf,
}

impl StateLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn primary(&self) -> PathBuf {
        self.dir.join(PRIMARY_FILE)
    }

    pub fn journal(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    pub fn lock(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    pub fn recovery_dir(&self) -> PathBuf {
        self.dir.join(RECOVERY_DIR)
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.dir.join(QUARANTINE_DIR)
    }

    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        for dir in [self.dir.clone(), self.recovery_dir(), self.quarantine_dir()] {
            fs::create_dir_all(&dir).map_err(|e| StorageError::io("create dir", &dir, e))?;
        }
        Ok(())
    }
}

/// How the document handed out by [`load`] came to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// No state file existed.
    Fresh,
    /// Parsed as-is.
    Clean,
    /// Parsed, then missing fields were back-filled.
    Migrated,
    /// Parse failed; a truncated prefix parsed. The corrupt original was
    /// copied to `quarantined` when that succeeded.
    Repaired { quarantined: Option<PathBuf> },
    /// Nothing was recoverable; the original was moved to `quarantined`
    /// (`None` when even that failed) and defaults were returned.
    Quarantined {
        quarantined: Option<PathBuf>,
        reason: String,
    },
}

impl Recovery {
    fn needs_persist(&self) -> bool {
        !matches!(self, Self::Clean)
    }

    /// False when the corrupt original still sits at the primary path with
    /// no quarantined copy anywhere.
    fn original_preserved(&self) -> bool {
        !matches!(
            self,
            Self::Repaired { quarantined: None }
                | Self::Quarantined {
                    quarantined: None,
                    ..
                }
        )
    }
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub document: StateDocument,
    pub recovery: Recovery,
}

/// Reads the primary state file. Never fails past this boundary: every
/// corruption path ends in a usable document.
pub fn load(layout: &StateLayout) -> LoadOutcome {
    let path = layout.primary();
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            return LoadOutcome {
                document: StateDocument::default(),
                recovery: Recovery::Fresh,
            };
        }
        Err(error) => {
            tracing::error!(%error, path = %path.display(), "state file unreadable");
            return quarantine_and_reset(layout, format!("unreadable: {error}"));
        }
    };

    match serde_json::from_slice::<StateDocument>(&bytes) {
        Ok(mut document) => {
            let backfilled = document.migrate() | has_missing_fields(&bytes, &document);
            LoadOutcome {
                document,
                recovery: if backfilled {
                    Recovery::Migrated
                } else {
                    Recovery::Clean
                },
            }
        }
        Err(parse_error) => {
            let text = String::from_utf8_lossy(&bytes);
            match repair::repair_truncated(&text) {
                Some(mut document) => {
                    document.migrate();
                    document.last_repair_at = Some(Utc::now());
                    let quarantined = match copy_to_quarantine(layout, &path) {
                        Ok(dst) => Some(dst),
                        Err(error) => {
                            tracing::error!(%error, "failed to preserve corrupt state before repair");
                            None
                        }
                    };
                    tracing::warn!(%parse_error, "state file repaired by truncation");
                    LoadOutcome {
                        document,
                        recovery: Recovery::Repaired { quarantined },
                    }
                }
                None => quarantine_and_reset(layout, parse_error.to_string()),
            }
        }
    }
}

/// Whether a prefix of `raw` would parse. Read-only counterpart to the
/// repair step of [`load`].
pub fn looks_repairable(raw: &[u8]) -> bool {
    repair::repair_truncated(&String::from_utf8_lossy(raw)).is_some()
}

fn has_missing_fields(raw: &[u8], document: &StateDocument) -> bool {
    let Ok(serde_json::Value::Object(on_disk)) = serde_json::from_slice(raw) else {
        return false;
    };
    let Ok(serde_json::Value::Object(expected)) = serde_json::to_value(document) else {
        return false;
    };
    expected.keys().any(|key| !on_disk.contains_key(key))
}

fn quarantine_and_reset(layout: &StateLayout, reason: String) -> LoadOutcome {
    let path = layout.primary();
    let quarantined = match move_to_quarantine(layout, &path) {
        Ok(dst) => {
            tracing::warn!(dst = %dst.display(), %reason, "corrupt state quarantined; starting from defaults");
            Some(dst)
        }
        Err(error) => {
            tracing::error!(%error, %reason, "corrupt state could not be quarantined");
            None
        }
    };
    let mut document = StateDocument::default();
    document.last_repair_at = Some(Utc::now());
    LoadOutcome {
        document,
        recovery: Recovery::Quarantined {
            quarantined,
            reason,
        },
    }
}

fn quarantine_target(layout: &StateLayout) -> io::Result<PathBuf> {
    let dir = layout.quarantine_dir();
    fs::create_dir_all(&dir)?;
    let stamp = Utc::now().format("%Y%m%d-%H%M%S%.3f");
    Ok(dir.join(format!("{PRIMARY_FILE}.corrupt.{stamp}")))
}

fn move_to_quarantine(layout: &StateLayout, path: &Path) -> io::Result<PathBuf> {
    let dst = quarantine_target(layout)?;
    if fs::rename(path, &dst).is_err() {
        fs::copy(path, &dst)?;
    }
    Ok(dst)
}

fn copy_to_quarantine(layout: &StateLayout, path: &Path) -> io::Result<PathBuf> {
    let dst = quarantine_target(layout)?;
    fs::copy(path, &dst)?;
    Ok(dst)
}

/// Writes `bytes` to a temporary sibling of `path`, syncs it, then renames it
/// into place. On any error `path` is left untouched.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp_")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    sync_dir(dir);
    Ok(())
}

fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Err(error) = fs::File::open(dir).and_then(|d| d.sync_all()) {
            tracing::debug!(%error, dir = %dir.display(), "directory fsync failed");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}

struct Inner {
    document: StateDocument,
    dirty: bool,
}

/// Exclusivity-guarded owner of the live state document.
pub struct StateStore {
    layout: StateLayout,
    journal: Journal,
    recovery: Recovery,
    inner: Mutex<Inner>,
}

impl StateStore {
    /// Creates the state directories (best effort) and loads the document.
    pub fn open(layout: StateLayout) -> Self {
        if let Err(error) = layout.ensure_dirs() {
            tracing::warn!(%error, "failed to prepare state directories");
        }
        let outcome = load(&layout);
        let journal = Journal::new(layout.journal());

        match &outcome.recovery {
            Recovery::Repaired { quarantined } => {
                let payload = quarantined
                    .as_ref()
                    .map_or_else(|| "unpreserved".to_string(), |p| p.display().to_string());
                journal.append(&JournalEntry::new(EventKind::Repair, payload));
            }
            Recovery::Quarantined {
                quarantined,
                reason,
            } => {
                let payload = quarantined.as_ref().map_or_else(
                    || format!("unpreserved ({reason})"),
                    |p| format!("{} ({reason})", p.display()),
                );
                journal.append(&JournalEntry::new(EventKind::Quarantine, payload));
            }
            Recovery::Fresh | Recovery::Clean | Recovery::Migrated => {}
        }

        let dirty = outcome.recovery.needs_persist();
        Self {
            layout,
            journal,
            recovery: outcome.recovery,
            inner: Mutex::new(Inner {
                document: outcome.document,
                dirty,
            }),
        }
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn recovery(&self) -> &Recovery {
        &self.recovery
    }

    fn guard(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read<R>(&self, f: impl FnOnce(&StateDocument) -> R) -> R {
        f(&self.guard().document)
    }

    /// Applies `f` and marks the document dirty for the next autosave.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut StateDocument) -> R) -> R {
        let mut inner = self.guard();
        let out = f(&mut inner.document);
        inner.dirty = true;
        out
    }

    /// Applies `f`, journals `entry`, and persists immediately.
    pub fn commit<R>(
        &self,
        entry: JournalEntry,
        f: impl FnOnce(&mut StateDocument) -> R,
    ) -> Result<R, StorageError> {
        let out = self.mutate(f);
        self.journal.append(&entry);
        self.save()?;
        Ok(out)
    }

    pub fn is_dirty(&self) -> bool {
        self.guard().dirty
    }

    /// Persists the document atomically. The dirty flag is cleared only when
    /// the rename succeeded.
    pub fn save(&self) -> Result<(), StorageError> {
        let mut inner = self.guard();
        self.save_locked(&mut inner)
    }

    /// Persists only when something changed since the last successful save.
    pub fn save_if_dirty(&self) -> Result<bool, StorageError> {
        let mut inner = self.guard();
        if !inner.dirty {
            return Ok(false);
        }
        self.save_locked(&mut inner)?;
        Ok(true)
    }

    fn save_locked(&self, inner: &mut Inner) -> Result<(), StorageError> {
        let path = self.layout.primary();
        if !self.recovery.original_preserved() && path.exists() {
            return Err(StorageError::Corruption {
                path,
                reason: "corrupt original could not be quarantined; refusing to overwrite".into(),
            });
        }
        inner.document.updated_at = Utc::now();
        let bytes = serde_json::to_vec_pretty(&inner.document)?;
        write_atomic(&path, &bytes).map_err(|e| StorageError::io("save", &path, e))?;
        inner.dirty = false;
        Ok(())
    }

    /// Best-effort journal append; see [`Journal::append`].
    pub fn append_journal(&self, kind: EventKind, payload: impl Into<String>) -> bool {
        self.journal.append(&JournalEntry::new(kind, payload))
    }

    /// Copies the primary file verbatim to `recovery/<label>-<timestamp>.json`.
    pub fn snapshot(&self, label: &str) -> Result<PathBuf, StorageError> {
        let src = self.layout.primary();
        if !src.exists() {
            return Err(StorageError::Missing(src));
        }
        let dir = self.layout.recovery_dir();
        fs::create_dir_all(&dir).map_err(|e| StorageError::io("create dir", &dir, e))?;
        let stamp = Utc::now().format("%Y%m%d-%H%M%S%.3f");
        let dst = dir.join(format!("{label}-{stamp}.json"));
        // Hold the guard so a concurrent save cannot swap the file mid-copy.
        let _inner = self.guard();
        fs::copy(&src, &dst).map_err(|e| StorageError::io("snapshot", &dst, e))?;
        Ok(dst)
    }
}
