use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use super::agent_harness;
use revenant::app::status::render_status;
use revenant::platform::daemon::Runtime;
use revenant::state::{Recovery, StateDocument, StateLayout};

#[test]
fn unparseable_state_is_quarantined_and_boot_continues() {
    let tmp = TempDir::new().unwrap();
    let config = agent_harness::config_in(&tmp);
    let layout = StateLayout::new(config.state_dir());
    layout.ensure_dirs().unwrap();
    fs::write(layout.primary(), b"\x00\x01 definitely not state").unwrap();

    let status = render_status(&config);
    assert!(status.contains("state file      corrupt"), "got:\n{status}");
    // Status is read-only: the corrupt file is still where it was.
    assert!(layout.primary().is_file());
    assert_eq!(fs::read_dir(layout.quarantine_dir()).unwrap().count(), 0);

    let runtime = Runtime::boot(Arc::clone(&config), agent_harness::offline_parts()).unwrap();
    match runtime.store.recovery() {
        Recovery::Quarantined {
            quarantined: Some(path),
            ..
        } => {
            assert_eq!(
                fs::read(path).unwrap(),
                b"\x00\x01 definitely not state".to_vec()
            );
        }
        other => panic!("expected quarantine, got {other:?}"),
    }

    let rewritten = fs::read_to_string(layout.primary()).unwrap();
    let document: StateDocument = serde_json::from_str(&rewritten).unwrap();
    assert_eq!(document.revision_count(), 0);
    assert!(document.last_repair_at.is_some());
    runtime.shutdown().unwrap();

    assert!(render_status(&config).contains("state file      clean"));
}

#[test]
fn state_survives_restart_cycles() {
    let tmp = TempDir::new().unwrap();
    let config = agent_harness::config_in(&tmp);

    let runtime = Runtime::boot(Arc::clone(&config), agent_harness::offline_parts()).unwrap();
    runtime
        .store
        .mutate(|doc| doc.claimed_name = Some("Nova".into()));
    runtime.shutdown().unwrap();

    let runtime = Runtime::boot(Arc::clone(&config), agent_harness::offline_parts()).unwrap();
    assert_eq!(
        runtime.store.read(|doc| doc.claimed_name.clone()),
        Some("Nova".to_string())
    );
    assert_eq!(runtime.store.recovery(), &Recovery::Clean);
}
