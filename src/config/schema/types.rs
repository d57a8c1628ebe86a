use crate::error::ConfigError;
use crate::update::{ArtifactMarkers, ArtifactPaths, Version};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub(super) const HOME_ENV: &str = "REVENANT_HOME";
pub(super) const HOME_DIR_NAME: &str = ".revenant";
pub(super) const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding config.toml - resolved at load, not serialized
    #[serde(skip)]
    pub home_dir: PathBuf,
    /// Path to config.toml - resolved at load, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub update: UpdateConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub reliability: ReliabilityConfig,
}

// ── Update ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Where candidate artifacts are fetched from. Unset disables updates.
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default = "default_true")]
    pub require_signature: bool,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_version_marker")]
    pub version_marker: String,
    #[serde(default = "default_entry_marker")]
    pub entry_marker: String,
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    /// Installed artifact. Relative paths resolve against the home dir.
    #[serde(default)]
    pub artifact_path: Option<String>,
    #[serde(default)]
    pub backup_path: Option<String>,
    /// Version assumed when the installed artifact declares none.
    #[serde(default = "default_fallback_version")]
    pub fallback_version: String,
}

fn default_true() -> bool {
    true
}

fn default_fetch_timeout_secs() -> u64 {
    12
}

fn default_version_marker() -> String {
    "revenant-version:".into()
}

fn default_entry_marker() -> String {
    "revenant-entry".into()
}

fn default_signature_header() -> String {
    "Revenant-Signature".into()
}

fn default_fallback_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            source_url: None,
            require_signature: true,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            version_marker: default_version_marker(),
            entry_marker: default_entry_marker(),
            signature_header: default_signature_header(),
            artifact_path: None,
            backup_path: None,
            fallback_version: default_fallback_version(),
        }
    }
}

impl UpdateConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn markers(&self) -> ArtifactMarkers {
        ArtifactMarkers {
            version: self.version_marker.clone(),
            entry: self.entry_marker.clone(),
            signature_header: self.signature_header.clone(),
        }
    }
}

// ── Schedule ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_autosave_secs")]
    pub autosave_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_snapshot_secs")]
    pub snapshot_secs: u64,
    /// How often the update task wakes to see whether a probe is due.
    #[serde(default = "default_update_poll_secs")]
    pub update_poll_secs: u64,
    /// Floor on the spacing between two update probes.
    #[serde(default = "default_min_check_spacing_secs")]
    pub min_check_spacing_secs: u64,
}

fn default_autosave_secs() -> u64 {
    90
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_snapshot_secs() -> u64 {
    3600
}

fn default_update_poll_secs() -> u64 {
    5
}

fn default_min_check_spacing_secs() -> u64 {
    60
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            autosave_secs: default_autosave_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            snapshot_secs: default_snapshot_secs(),
            update_poll_secs: default_update_poll_secs(),
            min_check_spacing_secs: default_min_check_spacing_secs(),
        }
    }
}

impl ScheduleConfig {
    pub fn autosave(&self) -> Duration {
        Duration::from_secs(self.autosave_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn snapshot(&self) -> Duration {
        Duration::from_secs(self.snapshot_secs)
    }

    pub fn update_poll(&self) -> Duration {
        Duration::from_secs(self.update_poll_secs)
    }

    pub fn min_check_spacing(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.min_check_spacing_secs).unwrap_or(i64::MAX))
    }
}

// ── State ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// State directory. Defaults to `<home>/state`.
    #[serde(default)]
    pub dir: Option<String>,
}

// ── Reliability ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    #[serde(default = "default_component_backoff_secs")]
    pub component_initial_backoff_secs: u64,
    #[serde(default = "default_component_backoff_max_secs")]
    pub component_max_backoff_secs: u64,
    /// 0 disables the restart ceiling.
    #[serde(default = "default_component_max_restarts")]
    pub component_max_restarts: u32,
}

fn default_component_backoff_secs() -> u64 {
    2
}

fn default_component_backoff_max_secs() -> u64 {
    60
}

fn default_component_max_restarts() -> u32 {
    10
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            component_initial_backoff_secs: default_component_backoff_secs(),
            component_max_backoff_secs: default_component_backoff_max_secs(),
            component_max_restarts: default_component_max_restarts(),
        }
    }
}

// ── Config ───────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let home =
            UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
        Self::in_home(home.join(HOME_DIR_NAME))
    }
}

impl Config {
    /// Defaults rooted at `home_dir`.
    pub fn in_home(home_dir: impl Into<PathBuf>) -> Self {
        let home_dir = home_dir.into();
        Self {
            config_path: home_dir.join(CONFIG_FILE),
            home_dir,
            update: UpdateConfig::default(),
            schedule: ScheduleConfig::default(),
            state: StateConfig::default(),
            reliability: ReliabilityConfig::default(),
        }
    }

    fn resolve(&self, raw: Option<&str>, default: &str) -> PathBuf {
        let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
            return self.home_dir.join(default);
        };
        let expanded = PathBuf::from(shellexpand::tilde(raw.trim()).as_ref());
        if expanded.is_absolute() {
            expanded
        } else {
            self.home_dir.join(expanded)
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.resolve(self.state.dir.as_deref(), "state")
    }

    pub fn artifact_paths(&self) -> ArtifactPaths {
        let installed = self.resolve(self.update.artifact_path.as_deref(), "artifact/agent.rev");
        let backup = match self.update.backup_path.as_deref() {
            Some(raw) if !raw.trim().is_empty() => self.resolve(Some(raw), ""),
            _ => sibling_with_suffix(&installed, ".prev"),
        };
        ArtifactPaths { installed, backup }
    }

    pub fn fallback_version(&self) -> Result<Version, ConfigError> {
        self.update
            .fallback_version
            .parse()
            .map_err(|e| ConfigError::Validation(format!("update.fallback_version: {e}")))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let update = &self.update;
        for (field, value) in [
            ("update.version_marker", &update.version_marker),
            ("update.entry_marker", &update.entry_marker),
            ("update.signature_header", &update.signature_header),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{field} must not be empty")));
            }
        }
        self.fallback_version()?;

        let schedule = &self.schedule;
        for (field, secs) in [
            ("schedule.autosave_secs", schedule.autosave_secs),
            ("schedule.heartbeat_secs", schedule.heartbeat_secs),
            ("schedule.snapshot_secs", schedule.snapshot_secs),
            ("schedule.update_poll_secs", schedule.update_poll_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Validation(format!("{field} must be at least 1")));
            }
        }

        let paths = self.artifact_paths();
        if paths.installed == paths.backup {
            return Err(ConfigError::Validation(
                "update.backup_path must differ from update.artifact_path".into(),
            ));
        }
        Ok(())
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}
