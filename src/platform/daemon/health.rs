use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub updated_at: String,
    pub last_ok: Option<String>,
    pub last_error: Option<String>,
    pub restart_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub pid: u32,
    pub uptime_seconds: u64,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Last known state of each periodic task, owned by the runtime and shared
/// with the tasks by handle.
pub struct TaskHealth {
    started_at: Instant,
    components: RwLock<BTreeMap<String, ComponentHealth>>,
}

impl Default for TaskHealth {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            components: RwLock::new(BTreeMap::new()),
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

impl TaskHealth {
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert<F>(&self, component: &str, update: F)
    where
        F: FnOnce(&mut ComponentHealth),
    {
        let mut map = self
            .components
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let now = now_rfc3339();
        let entry = map
            .entry(component.to_string())
            .or_insert_with(|| ComponentHealth {
                status: "starting".into(),
                updated_at: now.clone(),
                last_ok: None,
                last_error: None,
                restart_count: 0,
            });
        update(entry);
        entry.updated_at = now;
    }

    pub fn mark_starting(&self, component: &str) {
        self.upsert(component, |entry| entry.status = "starting".into());
    }

    pub fn mark_ok(&self, component: &str) {
        self.upsert(component, |entry| {
            entry.status = "ok".into();
            entry.last_ok = Some(now_rfc3339());
            entry.last_error = None;
        });
    }

    pub fn mark_error(&self, component: &str, error: &str) {
        self.upsert(component, |entry| {
            entry.status = "error".into();
            entry.last_error = Some(error.to_string());
        });
    }

    pub fn mark_stopped(&self, component: &str, reason: &str) {
        self.upsert(component, |entry| {
            entry.status = "stopped".into();
            entry.last_error = Some(reason.to_string());
        });
    }

    pub fn bump_restart(&self, component: &str) {
        self.upsert(component, |entry| {
            entry.restart_count = entry.restart_count.saturating_add(1);
        });
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let components = self
            .components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        HealthSnapshot {
            pid: std::process::id(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            components,
        }
    }

    /// One line per task, for the console.
    pub fn render(&self) -> String {
        let snap = self.snapshot();
        let mut lines = vec![format!("uptime          {}s", snap.uptime_seconds)];
        for (name, health) in &snap.components {
            let mut line = format!("task {name:<10} {}", health.status);
            if health.restart_count > 0 {
                line.push_str(&format!(" (restarts {})", health.restart_count));
            }
            if let Some(error) = &health.last_error {
                line.push_str(&format!(" - {error}"));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}
