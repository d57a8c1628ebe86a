//! Periodic work against the shared store. Each task is an endless
//! wait-then-act cycle; a task returns only when it wants the supervisor to
//! restart it.

use super::TaskHealth;
use crate::cli::commands::ControlAction;
use crate::state::{EventKind, StateStore};
use crate::update::{ProbeOutcome, UpdatePipeline};
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior};

/// Ticks every `period`, starting one period from now.
fn ticker(period: Duration) -> tokio::time::Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Persists the document whenever it is dirty. A failed save ends the run
/// so the supervisor backs off before trying again.
pub(super) async fn autosave(
    store: Arc<StateStore>,
    every: Duration,
    health: Arc<TaskHealth>,
) -> Result<()> {
    let mut interval = ticker(every);
    loop {
        interval.tick().await;
        let saved = store.save_if_dirty().context("autosave")?;
        if saved {
            tracing::debug!("autosave wrote state");
        }
        health.mark_ok("autosave");
    }
}

/// Journals liveness.
pub(super) async fn heartbeat(
    store: Arc<StateStore>,
    every: Duration,
    health: Arc<TaskHealth>,
) -> Result<()> {
    let mut interval = ticker(every);
    let mut beats: u64 = 0;
    loop {
        interval.tick().await;
        beats = beats.saturating_add(1);
        if store.append_journal(EventKind::Heartbeat, format!("alive beat={beats}")) {
            health.mark_ok("heartbeat");
        } else {
            health.mark_error("heartbeat", "journal append failed");
        }
    }
}

/// Copies the primary file into `recovery/`. Copy failures are logged and
/// retried at the next tick.
pub(super) async fn snapshot(
    store: Arc<StateStore>,
    every: Duration,
    health: Arc<TaskHealth>,
) -> Result<()> {
    let mut interval = ticker(every);
    loop {
        interval.tick().await;
        match store.snapshot("hourly") {
            Ok(path) => {
                store.append_journal(EventKind::Snapshot, path.display().to_string());
                health.mark_ok("snapshot");
            }
            Err(error) => {
                tracing::warn!(%error, "snapshot failed");
                health.mark_error("snapshot", &error.to_string());
            }
        }
    }
}

/// Wakes every `poll` and runs a probe when one is due. An install asks the
/// runtime to restart into the new artifact.
pub(super) async fn update_probe(
    pipeline: Arc<UpdatePipeline>,
    poll: Duration,
    min_spacing: chrono::Duration,
    control: mpsc::Sender<ControlAction>,
    health: Arc<TaskHealth>,
) -> Result<()> {
    let mut interval = ticker(poll);
    loop {
        interval.tick().await;
        match pipeline.auto_probe(Utc::now(), min_spacing).await {
            ProbeOutcome::Skipped => continue,
            ProbeOutcome::CheckFailed => {
                health.mark_error("update", "check failed");
            }
            ProbeOutcome::NoUpdate { remote } => {
                tracing::debug!(%remote, "no update");
                health.mark_ok("update");
            }
            ProbeOutcome::Rejected(reason) => {
                tracing::info!(%reason, "scheduled update rejected");
                health.mark_error("update", &reason);
            }
            ProbeOutcome::Installed(installed) => {
                tracing::info!(%installed, "scheduled update installed");
                health.mark_ok("update");
                control
                    .send(ControlAction::Restart)
                    .await
                    .context("runtime stopped listening for restart")?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateLayout;
    use std::fs;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> Arc<StateStore> {
        Arc::new(StateStore::open(StateLayout::new(tmp.path())))
    }

    #[tokio::test(start_paused = true)]
    async fn autosave_persists_dirty_state() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.mutate(|doc| doc.claimed_name = Some("Nova".into()));
        let health = Arc::new(TaskHealth::new());

        let task = tokio::spawn(autosave(
            Arc::clone(&store),
            Duration::from_secs(90),
            Arc::clone(&health),
        ));
        tokio::time::sleep(Duration::from_secs(91)).await;
        task.abort();

        assert!(!store.is_dirty());
        let raw = fs::read_to_string(store.layout().primary()).unwrap();
        assert!(raw.contains("Nova"));
        assert_eq!(health.snapshot().components["autosave"].status, "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_appends_journal_lines() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let health = Arc::new(TaskHealth::new());

        let task = tokio::spawn(heartbeat(
            Arc::clone(&store),
            Duration::from_secs(30),
            Arc::clone(&health),
        ));
        tokio::time::sleep(Duration::from_secs(95)).await;
        task.abort();

        let journal = fs::read_to_string(store.layout().journal()).unwrap();
        assert_eq!(journal.matches(" heartbeat:alive").count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_failure_is_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let health = Arc::new(TaskHealth::new());

        let task = tokio::spawn(snapshot(
            Arc::clone(&store),
            Duration::from_secs(10),
            Arc::clone(&health),
        ));
        // No primary file yet: the first snapshot fails, the task keeps going.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(health.snapshot().components["snapshot"].status, "error");

        store.save().unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!task.is_finished());
        task.abort();
        assert_eq!(health.snapshot().components["snapshot"].status, "ok");
    }
}
