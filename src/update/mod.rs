//! Self-update: fetch a candidate artifact, validate it, swap it in.
//!
//! One attempt walks `check → fetch → format → version → signature → swap`
//! and stops at the first failing step. Nothing is installed unless every
//! gate passed, and the installed artifact is replaced only by
//! [`swap::install`], which keeps exactly one backup generation.
//!
//! The pipeline never restarts the process itself. A successful install or
//! rollback is reported to the caller, which owns the restart sequence.

pub mod artifact;
pub mod restart;
pub mod signature;
pub mod source;
pub mod swap;
pub mod version;

pub use artifact::{ArtifactMarkers, UpdateArtifact};
pub use restart::{ExecRestarter, Restarter};
pub use source::{ArtifactSource, HttpSource};
pub use swap::ArtifactPaths;
pub use version::{Version, version_greater_than};

use crate::error::{FetchFailure, UpdateError, ValidationFailure};
use crate::state::{EventKind, JournalEntry, StateStore};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use strum::Display;

const DIGEST_PREFIX_LEN: usize = 12;

/// Steps of one update attempt, used as a log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Check,
    Fetch,
    ValidateFormat,
    ValidateVersion,
    ValidateSignature,
    Swap,
}

impl Stage {
    fn of(failure: &ValidationFailure) -> Self {
        match failure {
            ValidationFailure::NotAnArtifact
            | ValidationFailure::MissingVersion
            | ValidationFailure::InvalidVersion(_) => Self::ValidateFormat,
            ValidationFailure::NotNewer { .. } => Self::ValidateVersion,
            ValidationFailure::MissingSignature
            | ValidationFailure::KeyNotConfigured
            | ValidationFailure::MalformedSignature
            | ValidationFailure::SignatureMismatch => Self::ValidateSignature,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdateSettings {
    pub markers: ArtifactMarkers,
    pub paths: ArtifactPaths,
    pub require_signature: bool,
}

/// A completed swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
    pub from: Version,
    pub to: Version,
    pub digest: String,
}

impl fmt::Display for Installed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.digest.get(..DIGEST_PREFIX_LEN).unwrap_or(&self.digest);
        write!(f, "updated to {} (sha256 {short})", self.to)
    }
}

/// Result of one scheduled probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Auto-update disabled, or not yet due.
    Skipped,
    CheckFailed,
    NoUpdate { remote: Version },
    Installed(Installed),
    Rejected(String),
}

/// Version declared by the artifact at `path`, if it is readable and
/// carries one.
pub fn installed_version(path: &Path, markers: &ArtifactMarkers) -> Option<Version> {
    let raw = std::fs::read(path).ok()?;
    let text = String::from_utf8_lossy(&raw);
    artifact::declared_version(&text, &markers.version)?
        .parse()
        .ok()
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub struct UpdatePipeline {
    settings: UpdateSettings,
    current: RwLock<Version>,
    source: Option<Arc<dyn ArtifactSource>>,
    store: Arc<StateStore>,
    // Held for a whole attempt so two installs cannot share one backup slot.
    attempt_gate: tokio::sync::Mutex<()>,
}

impl UpdatePipeline {
    pub fn new(
        settings: UpdateSettings,
        current: Version,
        source: Option<Arc<dyn ArtifactSource>>,
        store: Arc<StateStore>,
    ) -> Self {
        Self {
            settings,
            current: RwLock::new(current),
            source,
            store,
            attempt_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &UpdateSettings {
        &self.settings
    }

    pub fn current_version(&self) -> Version {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn source_description(&self) -> Option<String> {
        self.source.as_ref().map(|s| s.describe())
    }

    fn source(&self) -> Result<&Arc<dyn ArtifactSource>, FetchFailure> {
        self.source.as_ref().ok_or(FetchFailure::NoSource)
    }

    /// Reads only the head of the remote candidate and returns its declared
    /// version. Any failure yields `None`.
    pub async fn check_remote_version(&self) -> Option<Version> {
        let source = self.source().ok()?;
        let head = match source.fetch_head(artifact::VERSION_SCAN_LINES).await {
            Ok(head) => head,
            Err(error) => {
                tracing::warn!(stage = %Stage::Check, %error, "remote version check failed");
                return None;
            }
        };
        let text = String::from_utf8_lossy(&head);
        artifact::declared_version(&text, &self.settings.markers.version)?
            .parse()
            .ok()
    }

    /// Manual check: records the time and what the remote declared, without
    /// installing anything.
    pub async fn check(&self) -> Option<Version> {
        let remote = self.check_remote_version().await;
        let summary = match &remote {
            Some(version) => format!("remote {version}"),
            None => "check failed".to_string(),
        };
        self.record(EventKind::UpdateCheck, &summary, Some(Utc::now()));
        remote
    }

    /// Format, version, and (when enforced) signature gates.
    pub fn validate(&self, raw: Vec<u8>) -> Result<UpdateArtifact, ValidationFailure> {
        let markers = &self.settings.markers;
        let candidate = UpdateArtifact::parse(raw, markers)?;

        let local = self.current_version();
        if candidate.declared_version <= local {
            return Err(ValidationFailure::NotNewer {
                remote: candidate.declared_version.to_string(),
                local: local.to_string(),
            });
        }

        if self.settings.require_signature {
            let declared = candidate
                .signature_line
                .as_deref()
                .ok_or(ValidationFailure::MissingSignature)?;
            // Clone the key out so the store lock is not held while hashing.
            let key = self
                .store
                .read(|doc| doc.update_key.clone())
                .ok_or(ValidationFailure::KeyNotConfigured)?;
            signature::verify(&candidate.raw_bytes, &markers.signature_header, &key, declared)?;
        }
        Ok(candidate)
    }

    /// One full update attempt. The outcome is recorded in the state
    /// document either way.
    pub async fn attempt(&self) -> Result<Installed, UpdateError> {
        let _gate = self.attempt_gate.lock().await;
        let outcome = self.run_attempt().await;
        let summary = match &outcome {
            Ok(installed) => installed.to_string(),
            Err(error) => error.to_string(),
        };
        self.record(EventKind::Update, &summary, None);
        outcome
    }

    async fn run_attempt(&self) -> Result<Installed, UpdateError> {
        let source = self.source()?;
        let raw = source.fetch().await.inspect_err(|error| {
            tracing::warn!(stage = %Stage::Fetch, %error, source = %source.describe(), "fetch failed");
        })?;

        let candidate = self.validate(raw).inspect_err(|failure| {
            tracing::info!(stage = %Stage::of(failure), %failure, "candidate rejected");
        })?;

        swap::install(&self.settings.paths, &candidate.raw_bytes).inspect_err(|error| {
            tracing::error!(stage = %Stage::Swap, %error, "swap failed; installed artifact unchanged");
        })?;

        let from = self.current_version();
        let to = candidate.declared_version;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = to.clone();
        let installed = Installed {
            from,
            to,
            digest: sha256_hex(&candidate.raw_bytes),
        };
        tracing::info!(from = %installed.from, to = %installed.to, "artifact installed");
        Ok(installed)
    }

    /// Restores the backup artifact over the installed one.
    pub fn rollback(&self) -> Result<(), UpdateError> {
        let outcome = swap::restore_backup(&self.settings.paths);
        let summary = match &outcome {
            Ok(()) => "rolled back".to_string(),
            Err(error) => error.to_string(),
        };
        self.record(EventKind::Rollback, &summary, None);
        if outcome.is_ok()
            && let Some(version) =
                installed_version(&self.settings.paths.installed, &self.settings.markers)
        {
            *self.current.write().unwrap_or_else(PoisonError::into_inner) = version;
        }
        outcome
    }

    /// Whether a scheduled probe should run at `now`. The spacing is the
    /// configured interval, never less than `min_spacing`.
    pub fn probe_due(&self, now: DateTime<Utc>, min_spacing: ChronoDuration) -> bool {
        self.store.read(|doc| {
            if !doc.auto_update_enabled() {
                return false;
            }
            let interval = ChronoDuration::minutes(i64::from(doc.auto_update_interval_minutes));
            let spacing = interval.max(min_spacing);
            doc.last_update_check
                .is_none_or(|last| now.signed_duration_since(last) >= spacing)
        })
    }

    /// Scheduled probe: check the remote version, and attempt an install
    /// only when it is newer than what runs now.
    pub async fn auto_probe(&self, now: DateTime<Utc>, min_spacing: ChronoDuration) -> ProbeOutcome {
        if !self.probe_due(now, min_spacing) {
            return ProbeOutcome::Skipped;
        }
        // Stamp before the network call so a slow remote is not re-probed.
        self.store.mutate(|doc| doc.last_update_check = Some(now));

        let Some(remote) = self.check_remote_version().await else {
            self.record(EventKind::AutoUpdate, "check failed", None);
            return ProbeOutcome::CheckFailed;
        };
        if remote <= self.current_version() {
            self.record(EventKind::AutoUpdate, &format!("no update (remote {remote})"), None);
            return ProbeOutcome::NoUpdate { remote };
        }
        match self.attempt().await {
            Ok(installed) => ProbeOutcome::Installed(installed),
            Err(error) => ProbeOutcome::Rejected(error.to_string()),
        }
    }

    fn record(&self, kind: EventKind, summary: &str, checked_at: Option<DateTime<Utc>>) {
        let entry = JournalEntry::new(kind, summary);
        let result = self.store.commit(entry, |doc| {
            doc.last_update_result = Some(summary.to_string());
            if let Some(at) = checked_at {
                doc.last_update_check = Some(at);
            }
        });
        if let Err(error) = result {
            tracing::warn!(%error, "failed to persist update result");
        }
    }
}
