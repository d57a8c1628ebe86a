use super::TaskHealth;
use crate::config::Config;
use crate::lifecycle::{Acquisition, LifecycleGuard, LivenessProbe, SystemProbe};
use crate::plugins::ModuleRegistry;
use crate::state::{EventKind, StateLayout, StateStore};
use crate::update::{
    ArtifactSource, ExecRestarter, HttpSource, Restarter, UpdatePipeline, UpdateSettings,
    installed_version,
};
use anyhow::{Context, Result};
use std::sync::Arc;

/// Pluggable edges of the runtime. Production uses [`Collaborators::system`].
pub struct Collaborators {
    pub probe: Arc<dyn LivenessProbe>,
    pub source: Option<Arc<dyn ArtifactSource>>,
    pub restarter: Arc<dyn Restarter>,
    pub modules: ModuleRegistry,
}

impl Collaborators {
    pub fn system(config: &Config) -> Result<Self> {
        let source = match config.update.source_url.as_deref() {
            Some(url) => {
                let http = HttpSource::new(url, config.update.fetch_timeout())
                    .map_err(|e| anyhow::anyhow!("update source {url}: {e}"))?;
                Some(Arc::new(http) as Arc<dyn ArtifactSource>)
            }
            None => None,
        };
        let restarter = ExecRestarter::for_artifact(&config.artifact_paths().installed)
            .context("Failed to locate restart target")?;
        Ok(Self {
            probe: Arc::new(SystemProbe),
            source,
            restarter: Arc::new(restarter),
            modules: ModuleRegistry::with_builtins(),
        })
    }
}

/// The booted agent: lock held, state loaded, update pipeline ready.
pub struct Runtime {
    pub config: Arc<Config>,
    pub store: Arc<StateStore>,
    pub guard: LifecycleGuard,
    pub pipeline: Arc<UpdatePipeline>,
    pub modules: ModuleRegistry,
    pub health: Arc<TaskHealth>,
    pub acquisition: Acquisition,
    restarter: Arc<dyn Restarter>,
}

impl Runtime {
    /// Load state, take the lock (counting a death if the last run never
    /// shut down cleanly), persist, and re-activate modules.
    ///
    /// Fails only when another live process holds the lock or the lock file
    /// cannot be written.
    pub fn boot(config: Arc<Config>, parts: Collaborators) -> Result<Self> {
        let layout = StateLayout::new(config.state_dir());
        let store = Arc::new(StateStore::open(layout));
        let guard = LifecycleGuard::new(store.layout().lock(), parts.probe);
        let acquisition = guard.acquire(&store)?;

        let markers = config.update.markers();
        let paths = config.artifact_paths();
        let current = match installed_version(&paths.installed, &markers) {
            Some(version) => version,
            None => config.fallback_version()?,
        };

        let boot_note = format!(
            "pid={} version={current} revision={} start={}",
            std::process::id(),
            store.read(|doc| doc.revision_count()),
            match &acquisition {
                Acquisition::Fresh => "fresh",
                Acquisition::Recovered { .. } => "recovered",
                Acquisition::Reclaimed => "reexec",
            }
        );
        store.append_journal(EventKind::Boot, boot_note);
        if let Err(error) = store.save() {
            tracing::error!(%error, "initial save failed; continuing with in-memory state");
        }

        let pipeline = Arc::new(UpdatePipeline::new(
            UpdateSettings {
                markers,
                paths,
                require_signature: config.update.require_signature,
            },
            current,
            parts.source,
            Arc::clone(&store),
        ));

        for outcome in parts.modules.restore_active(&store) {
            tracing::info!(%outcome, "module restore");
        }

        tracing::info!(
            version = %pipeline.current_version(),
            state = %store.layout().dir().display(),
            ?acquisition,
            "booted"
        );

        Ok(Self {
            config,
            store,
            guard,
            pipeline,
            modules: parts.modules,
            health: Arc::new(TaskHealth::new()),
            acquisition,
            restarter: parts.restarter,
        })
    }

    fn wind_down(&self, kind: EventKind, note: &str) -> Result<()> {
        let saved = self.store.save();
        self.store.append_journal(kind, note);
        let released = self.guard.release();
        saved.context("final save")?;
        released.context("lock release")?;
        Ok(())
    }

    /// Final save, journal, lock release.
    pub fn shutdown(&self) -> Result<()> {
        tracing::info!("shutting down");
        self.wind_down(EventKind::Shutdown, "graceful")
    }

    /// Final save, journal, lock release, then re-exec. Returns only when
    /// the re-exec failed; the lock is re-taken in that case so the process
    /// can keep running on the old code.
    pub fn restart(&self) -> Result<()> {
        tracing::info!(version = %self.pipeline.current_version(), "restarting");
        self.wind_down(EventKind::Restart, &self.pipeline.current_version().to_string())?;
        let error = self.restarter.restart();
        tracing::error!(%error, "re-exec failed");
        self.guard
            .acquire(&self.store)
            .context("re-taking lock after failed re-exec")?;
        Err(crate::error::UpdateError::Restart(error).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Dead;

    impl LivenessProbe for Dead {
        fn is_alive(&self, _pid: u32) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct Refusing(AtomicUsize);

    impl Restarter for Refusing {
        fn restart(&self) -> io::Error {
            self.0.fetch_add(1, Ordering::SeqCst);
            io::Error::other("exec disabled in tests")
        }
    }

    fn parts(restarter: Arc<dyn Restarter>) -> Collaborators {
        Collaborators {
            probe: Arc::new(Dead),
            source: None,
            restarter,
            modules: ModuleRegistry::with_builtins(),
        }
    }

    fn config(tmp: &TempDir) -> Arc<Config> {
        Arc::new(Config::in_home(tmp.path()))
    }

    #[test]
    fn boot_takes_lock_and_writes_state() {
        let tmp = TempDir::new().unwrap();
        let rt = Runtime::boot(config(&tmp), parts(Arc::new(Refusing::default()))).unwrap();
        assert_eq!(rt.acquisition, Acquisition::Fresh);
        assert!(rt.guard.is_held());
        assert!(rt.store.layout().primary().is_file());
        let journal = fs::read_to_string(rt.store.layout().journal()).unwrap();
        assert!(journal.contains(" boot:pid="));
        assert_eq!(
            rt.pipeline.current_version().to_string(),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn shutdown_releases_lock_and_journals() {
        let tmp = TempDir::new().unwrap();
        let rt = Runtime::boot(config(&tmp), parts(Arc::new(Refusing::default()))).unwrap();
        rt.shutdown().unwrap();
        assert!(!rt.store.layout().lock().exists());
        let journal = fs::read_to_string(rt.store.layout().journal()).unwrap();
        assert!(journal.trim_end().ends_with("shutdown:graceful"));

        let again = Runtime::boot(config(&tmp), parts(Arc::new(Refusing::default()))).unwrap();
        assert_eq!(again.acquisition, Acquisition::Fresh);
        assert_eq!(again.store.read(|d| d.revision_count()), 0);
    }

    #[test]
    fn failed_reexec_keeps_running_with_lock() {
        let tmp = TempDir::new().unwrap();
        let restarter = Arc::new(Refusing::default());
        let rt = Runtime::boot(config(&tmp), parts(restarter.clone())).unwrap();

        let err = rt.restart().unwrap_err();
        assert!(err.to_string().contains("restart failed"));
        assert_eq!(restarter.0.load(Ordering::SeqCst), 1);
        assert!(rt.guard.is_held());
        let journal = fs::read_to_string(rt.store.layout().journal()).unwrap();
        assert!(journal.contains(" restart:"));
        // Re-taking our own released lock is not a death.
        assert_eq!(rt.store.read(|d| d.revision_count()), 0);
    }

    #[test]
    fn boot_restores_active_modules() {
        let tmp = TempDir::new().unwrap();
        {
            let rt = Runtime::boot(config(&tmp), parts(Arc::new(Refusing::default()))).unwrap();
            rt.modules.activate(&rt.store, "voice");
            rt.shutdown().unwrap();
        }
        let rt = Runtime::boot(config(&tmp), parts(Arc::new(Refusing::default()))).unwrap();
        assert_eq!(
            rt.store.read(|d| d.module_active.get("voice").copied()),
            Some(true)
        );
    }
}
