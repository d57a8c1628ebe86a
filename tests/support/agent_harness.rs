#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use revenant::Config;
use revenant::lifecycle::LivenessProbe;
use revenant::platform::daemon::Collaborators;
use revenant::plugins::ModuleRegistry;
use revenant::security::UpdateKey;
use revenant::update::{ArtifactSource, Restarter, signature};

pub const HEADER: &str = "Revenant-Signature";

/// Reports every pid as gone, so any leftover lock counts as a crash.
pub struct DeadProbe;

impl LivenessProbe for DeadProbe {
    fn is_alive(&self, _pid: u32) -> bool {
        false
    }
}

/// Reports every pid as running.
pub struct LiveProbe;

impl LivenessProbe for LiveProbe {
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }
}

#[derive(Default)]
pub struct CountingRestarter(AtomicUsize);

impl CountingRestarter {
    pub fn calls(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl Restarter for CountingRestarter {
    fn restart(&self) -> io::Error {
        self.0.fetch_add(1, Ordering::SeqCst);
        io::Error::other("exec disabled in tests")
    }
}

pub fn config_in(tmp: &TempDir) -> Arc<Config> {
    Arc::new(Config::in_home(tmp.path()))
}

pub fn parts_with(
    probe: Arc<dyn LivenessProbe>,
    source: Option<Arc<dyn ArtifactSource>>,
) -> Collaborators {
    Collaborators {
        probe,
        source,
        restarter: Arc::new(CountingRestarter::default()),
        modules: ModuleRegistry::with_builtins(),
    }
}

pub fn offline_parts() -> Collaborators {
    parts_with(Arc::new(DeadProbe), None)
}

/// Unsigned artifact text declaring `version`.
pub fn artifact(version: &str) -> String {
    format!(
        "#!/usr/bin/env revenant\n# revenant-version: {version}\n# {HEADER}: -\nrevenant-entry\nbody for {version}\n"
    )
}

/// [`artifact`] carrying a valid signature under `key`.
pub fn signed_artifact(version: &str, key: &UpdateKey) -> String {
    let unsigned = artifact(version);
    let sig = signature::sign(unsigned.as_bytes(), HEADER, key).expect("sign artifact");
    unsigned.replace(&format!("{HEADER}: -"), &format!("{HEADER}: {sig}"))
}

pub fn install_artifact(config: &Config, body: &str) {
    let paths = config.artifact_paths();
    let parent = paths.installed.parent().expect("artifact dir");
    fs::create_dir_all(parent).expect("create artifact dir");
    fs::write(&paths.installed, body).expect("write installed artifact");
}

pub fn journal_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
