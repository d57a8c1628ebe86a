use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Kind tag written in front of every journal payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Boot,
    Death,
    Heartbeat,
    Repair,
    Quarantine,
    Name,
    AutoUpdate,
    AutoInterval,
    SetKey,
    UpdateCheck,
    Update,
    Rollback,
    Restart,
    Module,
    Snapshot,
    Shutdown,
}

/// One mutation event, rendered as `<timestamp> <kind>:<payload>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub kind: EventKind,
    pub payload: String,
}

impl JournalEntry {
    pub fn new(kind: EventKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn render(&self, timestamp: &str) -> String {
        // One entry per line: embedded line breaks would forge extra entries.
        let payload: String = self
            .payload
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        let kind: &'static str = self.kind.into();
        format!("{timestamp} {kind}:{payload}\n")
    }
}

/// Append-only forensic log. Never read back to rebuild state.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort append. Failures are logged and swallowed so a full disk
    /// or a read-only journal never blocks the caller.
    pub fn append(&self, entry: &JournalEntry) -> bool {
        let line = entry.render(&Utc::now().to_rfc3339());
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        match result {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, path = %self.path.display(), kind = %entry.kind, "journal append failed");
                false
            }
        }
    }
}
