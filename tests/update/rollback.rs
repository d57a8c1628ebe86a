use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use super::agent_harness;
use revenant::app::dispatch::offline_rollback;
use revenant::cli::commands::{Command, CommandContext, ControlAction, handle_command};
use revenant::platform::daemon::Runtime;

#[tokio::test]
async fn rollback_without_backup_is_reported_and_changes_nothing() {
    let tmp = TempDir::new().unwrap();
    let config = agent_harness::config_in(&tmp);
    let local = agent_harness::artifact("3.0");
    agent_harness::install_artifact(&config, &local);
    let runtime = Runtime::boot(Arc::clone(&config), agent_harness::offline_parts()).unwrap();

    let ctx = CommandContext {
        store: &runtime.store,
        pipeline: &runtime.pipeline,
        modules: &runtime.modules,
        health: &runtime.health,
    };
    let result = handle_command(Command::Rollback, &ctx).await;
    assert!(
        result.text.starts_with("rollback unavailable: no backup artifact at"),
        "got: {}",
        result.text
    );
    assert_eq!(result.action, None);
    assert_eq!(
        fs::read_to_string(config.artifact_paths().installed).unwrap(),
        local
    );
    assert_eq!(runtime.pipeline.current_version().to_string(), "3.0");
}

#[tokio::test]
async fn rollback_restores_previous_artifact_and_version() {
    let tmp = TempDir::new().unwrap();
    let config = agent_harness::config_in(&tmp);
    let paths = config.artifact_paths();
    agent_harness::install_artifact(&config, &agent_harness::artifact("3.1"));
    fs::write(&paths.backup, agent_harness::artifact("3.0")).unwrap();
    let runtime = Runtime::boot(Arc::clone(&config), agent_harness::offline_parts()).unwrap();

    let ctx = CommandContext {
        store: &runtime.store,
        pipeline: &runtime.pipeline,
        modules: &runtime.modules,
        health: &runtime.health,
    };
    let result = handle_command(Command::Rollback, &ctx).await;
    assert_eq!(result.text, "rolled back; restarting");
    assert_eq!(result.action, Some(ControlAction::Restart));
    assert_eq!(
        fs::read_to_string(&paths.installed).unwrap(),
        agent_harness::artifact("3.0")
    );
    assert!(!paths.has_backup());
    assert_eq!(runtime.pipeline.current_version().to_string(), "3.0");
    assert_eq!(
        runtime.store.read(|doc| doc.last_update_result.clone()),
        Some("rolled back".to_string())
    );
}

#[test]
fn offline_rollback_refuses_while_agent_runs() {
    let tmp = TempDir::new().unwrap();
    let config = agent_harness::config_in(&tmp);
    let paths = config.artifact_paths();
    agent_harness::install_artifact(&config, &agent_harness::artifact("3.1"));
    fs::write(&paths.backup, agent_harness::artifact("3.0")).unwrap();

    // Same pid as the running agent: treated as ours and reclaimed, so hold
    // the lock under a live foreign pid instead.
    let runtime = Runtime::boot(Arc::clone(&config), agent_harness::offline_parts()).unwrap();
    fs::write(
        runtime.store.layout().lock(),
        format!("{}|2026-01-01T00:00:00+00:00\n", parent_pid()),
    )
    .unwrap();

    let err = offline_rollback(&config).unwrap_err();
    assert!(format!("{err:#}").contains("Another instance is running"));
    assert!(paths.has_backup());
    assert_eq!(
        fs::read_to_string(&paths.installed).unwrap(),
        agent_harness::artifact("3.1")
    );
}

#[cfg(unix)]
fn parent_pid() -> u32 {
    std::os::unix::process::parent_id()
}

#[cfg(not(unix))]
fn parent_pid() -> u32 {
    4
}
