use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use super::agent_harness::{self, LiveProbe};
use revenant::lifecycle::{Acquisition, LockRecord};
use revenant::platform::daemon::Runtime;

/// Leaves the lock behind under a pid that is not ours, the way a killed
/// process would.
fn crash(runtime: Runtime) {
    let record = LockRecord {
        pid: 4_000_000,
        acquired_at: "2026-01-01T00:00:00+00:00".into(),
    };
    fs::write(runtime.store.layout().lock(), record.render()).unwrap();
    drop(runtime);
}

#[test]
fn crash_then_reboot_counts_one_death() {
    let tmp = TempDir::new().unwrap();
    let config = agent_harness::config_in(&tmp);

    let first = Runtime::boot(Arc::clone(&config), agent_harness::offline_parts()).unwrap();
    assert_eq!(first.acquisition, Acquisition::Fresh);
    crash(first);

    let second = Runtime::boot(Arc::clone(&config), agent_harness::offline_parts()).unwrap();
    assert_eq!(
        second.acquisition,
        Acquisition::Recovered {
            stale_pid: Some(4_000_000),
            revision_count: 1,
        }
    );
    assert_eq!(second.store.read(|doc| doc.revision_count()), 1);

    let lock = fs::read_to_string(second.store.layout().lock()).unwrap();
    let record = LockRecord::parse(&lock).unwrap();
    assert_eq!(record.pid, std::process::id());

    let journal = agent_harness::journal_lines(&second.store.layout().journal());
    assert!(journal.iter().any(|line| line.ends_with(" death:1 pid=4000000")));
    assert!(journal.last().unwrap().contains(" boot:") && journal.last().unwrap().contains("start=recovered"));
}

#[test]
fn death_counter_survives_graceful_restarts() {
    let tmp = TempDir::new().unwrap();
    let config = agent_harness::config_in(&tmp);

    crash(Runtime::boot(Arc::clone(&config), agent_harness::offline_parts()).unwrap());
    crash(Runtime::boot(Arc::clone(&config), agent_harness::offline_parts()).unwrap());

    let third = Runtime::boot(Arc::clone(&config), agent_harness::offline_parts()).unwrap();
    assert_eq!(third.store.read(|doc| doc.revision_count()), 2);
    third.shutdown().unwrap();

    let fourth = Runtime::boot(Arc::clone(&config), agent_harness::offline_parts()).unwrap();
    assert_eq!(fourth.acquisition, Acquisition::Fresh);
    assert_eq!(fourth.store.read(|doc| doc.revision_count()), 2);
}

#[test]
fn live_holder_blocks_second_instance() {
    let tmp = TempDir::new().unwrap();
    let config = agent_harness::config_in(&tmp);
    let first = Runtime::boot(Arc::clone(&config), agent_harness::offline_parts()).unwrap();
    crash(first);
    let before = fs::read_to_string(config.state_dir().join("revenant.lock")).unwrap();

    let parts = agent_harness::parts_with(Arc::new(LiveProbe), None);
    let err = Runtime::boot(Arc::clone(&config), parts).err().unwrap();
    assert!(err.to_string().contains("pid 4000000"), "got: {err}");

    let after = fs::read_to_string(config.state_dir().join("revenant.lock")).unwrap();
    assert_eq!(before, after);
}
