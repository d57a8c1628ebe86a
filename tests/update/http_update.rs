use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::agent_harness::{self, DeadProbe};
use revenant::cli::commands::{Command, CommandContext, CommandResult, ControlAction, handle_command};
use revenant::platform::daemon::Runtime;
use revenant::security::UpdateKey;
use revenant::update::{ArtifactSource, HttpSource};

async fn serve(body: impl Into<Vec<u8>>, status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/agent.rev"))
        .respond_with(ResponseTemplate::new(status).set_body_bytes(body.into()))
        .mount(&server)
        .await;
    server
}

fn boot_against(server: &MockServer, tmp: &TempDir, installed: &str) -> Runtime {
    let config = agent_harness::config_in(tmp);
    agent_harness::install_artifact(&config, installed);
    let source = HttpSource::new(format!("{}/agent.rev", server.uri()), Duration::from_secs(5))
        .expect("http source");
    let parts = agent_harness::parts_with(
        Arc::new(DeadProbe),
        Some(Arc::new(source) as Arc<dyn ArtifactSource>),
    );
    Runtime::boot(config, parts).expect("boot")
}

async fn run(runtime: &Runtime, command: Command) -> CommandResult {
    let ctx = CommandContext {
        store: &runtime.store,
        pipeline: &runtime.pipeline,
        modules: &runtime.modules,
        health: &runtime.health,
    };
    handle_command(command, &ctx).await
}

#[tokio::test]
async fn same_version_remote_leaves_install_untouched() {
    let tmp = TempDir::new().unwrap();
    let local = agent_harness::artifact("1.4");
    let server = serve(agent_harness::artifact("1.4"), 200).await;
    let runtime = boot_against(&server, &tmp, &local);
    let paths = runtime.config.artifact_paths();

    let check = run(&runtime, Command::UpdateCheck).await;
    assert_eq!(check.text, "up-to-date (remote 1.4, local 1.4)");

    let result = run(&runtime, Command::Update).await;
    assert_eq!(result.text, "up-to-date (remote 1.4 <= local 1.4)");
    assert_eq!(result.action, None);
    assert_eq!(fs::read_to_string(&paths.installed).unwrap(), local);
    assert!(!paths.has_backup());
    assert_eq!(
        runtime.store.read(|doc| doc.last_update_result.clone()),
        Some("up-to-date (remote 1.4 <= local 1.4)".to_string())
    );
}

#[tokio::test]
async fn signed_newer_artifact_is_installed_and_requests_restart() {
    let tmp = TempDir::new().unwrap();
    let key = UpdateKey::new("shared-secret").unwrap();
    let local = agent_harness::artifact("1.4");
    let remote = agent_harness::signed_artifact("1.5", &key);
    let server = serve(remote.clone(), 200).await;
    let runtime = boot_against(&server, &tmp, &local);
    let paths = runtime.config.artifact_paths();

    assert_eq!(run(&runtime, Command::SetKey(key)).await.text, "update key set");
    let check = run(&runtime, Command::UpdateCheck).await;
    assert_eq!(check.text, "update available: 1.5 (local 1.4)");

    let result = run(&runtime, Command::Update).await;
    assert!(result.text.starts_with("updated to 1.5"), "got: {}", result.text);
    assert_eq!(result.action, Some(ControlAction::Restart));
    assert_eq!(fs::read_to_string(&paths.installed).unwrap(), remote);
    assert_eq!(fs::read_to_string(&paths.backup).unwrap(), local);
    assert_eq!(runtime.pipeline.current_version().to_string(), "1.5");

    // The counting restarter refuses; the agent keeps its lock.
    let err = runtime.restart().unwrap_err();
    assert!(err.to_string().contains("restart failed"));
    assert!(runtime.guard.is_held());
}

#[tokio::test]
async fn tampered_artifact_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let key = UpdateKey::new("shared-secret").unwrap();
    let local = agent_harness::artifact("1.4");
    let tampered = agent_harness::signed_artifact("1.5", &key).replace("body for", "evil for");
    let server = serve(tampered, 200).await;
    let runtime = boot_against(&server, &tmp, &local);
    let paths = runtime.config.artifact_paths();

    run(&runtime, Command::SetKey(key)).await;
    let result = run(&runtime, Command::Update).await;
    assert_eq!(result.text, "reject: signature mismatch");
    assert_eq!(result.action, None);
    assert_eq!(fs::read_to_string(&paths.installed).unwrap(), local);
    assert!(!paths.has_backup());

    let journal = agent_harness::journal_lines(&runtime.store.layout().journal());
    assert!(
        journal
            .iter()
            .any(|line| line.ends_with(" update:reject: signature mismatch"))
    );
}

#[tokio::test]
async fn unreachable_artifact_reports_fetch_error() {
    let tmp = TempDir::new().unwrap();
    let local = agent_harness::artifact("1.4");
    let server = serve(Vec::new(), 503).await;
    let runtime = boot_against(&server, &tmp, &local);

    assert_eq!(run(&runtime, Command::UpdateCheck).await.text, "check failed");
    let result = run(&runtime, Command::Update).await;
    assert_eq!(result.text, "fetch error: remote answered HTTP 503");
    assert_eq!(
        fs::read_to_string(runtime.config.artifact_paths().installed).unwrap(),
        local
    );
}
