use std::path::PathBuf;
use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `revenant`.
///
/// Each subsystem defines its own error enum. Callers match on these to pick
/// a recovery strategy; the binary edge continues to use `anyhow::Result`
/// for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum RevenantError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── State store ─────────────────────────────────────────────────────
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    // ── Lifecycle lock ──────────────────────────────────────────────────
    #[error("lock: {0}")]
    Lock(#[from] LockError),

    // ── Self-update ─────────────────────────────────────────────────────
    #[error("update: {0}")]
    Update(#[from] UpdateError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("validation failed: {0}")]
    Validation(String),
}

// ─── State store errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("state file {} is corrupt: {reason}", path.display())]
    Corruption { path: PathBuf, reason: String },

    #[error("no state file at {}", .0.display())]
    Missing(PathBuf),
}

impl StorageError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

// ─── Lifecycle lock errors ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another instance (pid {pid}) holds the lock since {since}")]
    Conflict { pid: u32, since: String },

    #[error("{op} lock {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ─── Update errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchFailure),

    #[error("{0}")]
    Validation(#[from] ValidationFailure),

    #[error("write/swap error: {0}")]
    Swap(#[from] SwapFailure),

    #[error("no backup artifact at {}", .0.display())]
    RollbackUnavailable(PathBuf),

    #[error("restart failed: {0}")]
    Restart(std::io::Error),
}

#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("request timed out")]
    Timeout,

    #[error("remote answered HTTP {0}")]
    Status(u16),

    #[error("{0}")]
    Transport(String),

    #[error("no update source configured")]
    NoSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("reject: not a valid artifact")]
    NotAnArtifact,

    #[error("reject: missing version")]
    MissingVersion,

    #[error("reject: unparseable version {0:?}")]
    InvalidVersion(String),

    #[error("up-to-date (remote {remote} <= local {local})")]
    NotNewer { remote: String, local: String },

    #[error("reject: missing signature line")]
    MissingSignature,

    #[error("reject: update key not set (use 'setkey <secret>')")]
    KeyNotConfigured,

    #[error("reject: signature is not hex")]
    MalformedSignature,

    #[error("reject: signature mismatch")]
    SignatureMismatch,
}

#[derive(Debug, Error)]
pub enum SwapFailure {
    #[error("staging candidate: {0}")]
    Stage(std::io::Error),

    #[error("backing up installed artifact: {0}")]
    Backup(std::io::Error),

    #[error("replacing installed artifact: {0}")]
    Replace(std::io::Error),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, RevenantError>;
