use crate::security::UpdateKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const FLAG_PHASE_PERSISTENCE: &str = "phase_persistence";
pub const FLAG_AUTO_UPDATE: &str = "auto_update_enabled";

pub const DEFAULT_IDENTITY: &str = "ownself";
pub const DEFAULT_AUTO_UPDATE_MINUTES: u32 = 60;

const REQUIRED_FLAGS: [(&str, bool); 2] =
    [(FLAG_PHASE_PERSISTENCE, true), (FLAG_AUTO_UPDATE, false)];
const DEFAULT_WHITELIST: [&str; 3] = ["web_ui", "classroom", "voice"];

/// Durable record of agent identity and configuration.
///
/// Every field carries a serde default so that documents written by older
/// builds load with the missing fields back-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateDocument {
    pub identity: String,
    pub claimed_name: Option<String>,
    revision_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub flags: BTreeMap<String, bool>,
    pub auto_update_interval_minutes: u32,
    pub last_update_check: Option<DateTime<Utc>>,
    pub last_update_result: Option<String>,
    pub last_repair_at: Option<DateTime<Utc>>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "blank_key_as_none"
    )]
    pub update_key: Option<UpdateKey>,
    pub module_whitelist: BTreeSet<String>,
    pub module_active: BTreeMap<String, bool>,
}

impl Default for StateDocument {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            identity: DEFAULT_IDENTITY.into(),
            claimed_name: None,
            revision_count: 0,
            created_at: now,
            updated_at: now,
            flags: REQUIRED_FLAGS
                .iter()
                .map(|(name, value)| ((*name).to_string(), *value))
                .collect(),
            auto_update_interval_minutes: DEFAULT_AUTO_UPDATE_MINUTES,
            last_update_check: None,
            last_update_result: None,
            last_repair_at: None,
            update_key: None,
            module_whitelist: DEFAULT_WHITELIST.iter().map(|m| (*m).to_string()).collect(),
            module_active: BTreeMap::new(),
        }
    }
}

impl StateDocument {
    pub fn revision_count(&self) -> u64 {
        self.revision_count
    }

    /// Counts one unclean termination. The counter only moves forward.
    pub fn record_death(&mut self) -> u64 {
        self.revision_count = self.revision_count.saturating_add(1);
        self.revision_count
    }

    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    pub fn set_flag(&mut self, name: &str, value: bool) {
        self.flags.insert(name.to_string(), value);
    }

    pub fn auto_update_enabled(&self) -> bool {
        self.flag(FLAG_AUTO_UPDATE)
    }

    pub fn set_auto_update_interval(&mut self, minutes: u32) -> u32 {
        self.auto_update_interval_minutes = minutes.max(1);
        self.auto_update_interval_minutes
    }

    pub fn has_update_key(&self) -> bool {
        self.update_key.is_some()
    }

    /// Back-fills required flags and clamps out-of-range values.
    /// Returns `true` when anything changed.
    pub fn migrate(&mut self) -> bool {
        let mut changed = false;
        for (name, default) in REQUIRED_FLAGS {
            if !self.flags.contains_key(name) {
                self.flags.insert(name.to_string(), default);
                changed = true;
            }
        }
        if self.auto_update_interval_minutes == 0 {
            self.auto_update_interval_minutes = 1;
            changed = true;
        }
        if self.updated_at < self.created_at {
            self.updated_at = self.created_at;
            changed = true;
        }
        changed
    }
}

fn blank_key_as_none<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<UpdateKey>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(UpdateKey::new))
}
