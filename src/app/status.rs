use crate::config::Config;
use crate::lifecycle::LockRecord;
use crate::state::{self, FLAG_AUTO_UPDATE, Recovery, StateDocument, StateLayout};
use crate::update::installed_version;
use chrono::{DateTime, Utc};
use std::fs;

fn when(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "never".to_string(), |t| t.to_rfc3339())
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

/// Identity, counters, and update settings held in the document. The update
/// key is reported only as present or absent.
pub fn render_document(doc: &StateDocument) -> Vec<String> {
    vec![
        format!("identity        {}", doc.identity),
        format!(
            "name            {}",
            doc.claimed_name.as_deref().unwrap_or("(unclaimed)")
        ),
        format!("revision        {}", doc.revision_count()),
        format!("created         {}", doc.created_at.to_rfc3339()),
        format!("updated         {}", doc.updated_at.to_rfc3339()),
        format!("auto-update     {}", on_off(doc.flag(FLAG_AUTO_UPDATE))),
        format!("interval        {} min", doc.auto_update_interval_minutes),
        format!("last check      {}", when(doc.last_update_check)),
        format!(
            "last result     {}",
            doc.last_update_result.as_deref().unwrap_or("-")
        ),
        format!("last repair     {}", when(doc.last_repair_at)),
        format!(
            "update key      {}",
            if doc.has_update_key() { "set" } else { "not set" }
        ),
    ]
}

pub fn render_flags(doc: &StateDocument) -> String {
    doc.flags
        .iter()
        .map(|(name, value)| format!("{name} = {}", on_off(*value)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe_recovery(recovery: &Recovery) -> String {
    match recovery {
        Recovery::Fresh => "no state file yet".into(),
        Recovery::Clean => "clean".into(),
        Recovery::Migrated => "needs migration".into(),
        Recovery::Repaired { .. } => "corrupt (repairable)".into(),
        Recovery::Quarantined { reason, .. } => format!("corrupt ({reason})"),
    }
}

/// Read-only status from disk. Does not take the lock and never writes,
/// so a corrupt file is described rather than repaired.
pub fn render_status(config: &Config) -> String {
    let layout = StateLayout::new(config.state_dir());
    let mut lines = vec![
        format!("revenant {}", env!("CARGO_PKG_VERSION")),
        format!("config          {}", config.config_path.display()),
        format!("state dir       {}", layout.dir().display()),
    ];

    let paths = config.artifact_paths();
    let markers = config.update.markers();
    lines.push(format!("artifact        {}", paths.installed.display()));
    lines.push(format!(
        "artifact ver    {}",
        installed_version(&paths.installed, &markers)
            .map_or_else(|| format!("{} (fallback)", config.update.fallback_version), |v| v.to_string())
    ));
    lines.push(format!(
        "backup          {}",
        if paths.has_backup() { "present" } else { "none" }
    ));
    lines.push(format!(
        "source          {}",
        config.update.source_url.as_deref().unwrap_or("(none)")
    ));
    lines.push(format!(
        "signatures      {}",
        if config.update.require_signature { "required" } else { "optional" }
    ));

    let holder = fs::read_to_string(layout.lock())
        .ok()
        .map(|raw| LockRecord::parse(&raw));
    lines.push(match holder {
        None => "lock            free".to_string(),
        Some(Some(record)) => format!(
            "lock            pid {} since {}",
            record.pid, record.acquired_at
        ),
        Some(None) => "lock            unreadable".to_string(),
    });

    let outcome = inspect(&layout);
    lines.push(format!("state file      {}", describe_recovery(&outcome.1)));
    lines.push(String::new());
    lines.extend(render_document(&outcome.0));
    lines.join("\n")
}

fn inspect(layout: &StateLayout) -> (StateDocument, Recovery) {
    let path = layout.primary();
    let Ok(bytes) = fs::read(&path) else {
        return (StateDocument::default(), Recovery::Fresh);
    };
    match serde_json::from_slice::<StateDocument>(&bytes) {
        Ok(doc) => (doc, Recovery::Clean),
        Err(error) => (
            StateDocument::default(),
            if state::looks_repairable(&bytes) {
                Recovery::Repaired { quarantined: None }
            } else {
                Recovery::Quarantined {
                    quarantined: None,
                    reason: error.to_string(),
                }
            },
        ),
    }
}
