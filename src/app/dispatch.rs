use crate::cli::commands::{Cli, Commands};
use crate::config::Config;
use crate::lifecycle::{LifecycleGuard, SystemProbe};
use crate::platform::daemon::{self, Collaborators};
use crate::security::UpdateKey;
use crate::state::{EventKind, StateLayout, StateStore};
use crate::update::{UpdatePipeline, UpdateSettings, installed_version, signature};
use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;

use crate::app::status::render_status;

const UPDATE_KEY_ENV: &str = "REVENANT_UPDATE_KEY";

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let parts = Collaborators::system(&config)?;
            daemon::run(Arc::new(config), parts).await
        }
        Commands::Status => {
            println!("{}", render_status(&config));
            Ok(())
        }
        Commands::Sign { file } => {
            let key = std::env::var(UPDATE_KEY_ENV)
                .ok()
                .and_then(UpdateKey::new)
                .with_context(|| format!("{UPDATE_KEY_ENV} is not set"))?;
            println!("{}", sign_file(&file, &config.update.signature_header, &key)?);
            Ok(())
        }
        Commands::Rollback => {
            offline_rollback(&config)?;
            println!("rolled back; start the agent to run the restored artifact");
            Ok(())
        }
    }
}

/// Signature value for the artifact at `path`, to be placed after
/// `<header>:` in its signature line.
pub fn sign_file(path: &Path, header: &str, key: &UpdateKey) -> Result<String> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    signature::sign(&raw, header, key).context("Failed to sign artifact")
}

/// Restores the backup artifact while holding the lifecycle lock, so it
/// cannot race a running agent.
pub fn offline_rollback(config: &Config) -> Result<()> {
    let store = Arc::new(StateStore::open(StateLayout::new(config.state_dir())));
    let guard = LifecycleGuard::new(store.layout().lock(), Arc::new(SystemProbe));
    guard
        .acquire(&store)
        .context("Another instance is running; use its console 'rollback' instead")?;

    let markers = config.update.markers();
    let paths = config.artifact_paths();
    let current = match installed_version(&paths.installed, &markers) {
        Some(version) => version,
        None => config.fallback_version()?,
    };
    let pipeline = UpdatePipeline::new(
        UpdateSettings {
            markers,
            paths,
            require_signature: config.update.require_signature,
        },
        current,
        None,
        Arc::clone(&store),
    );

    let outcome = pipeline.rollback();
    store.append_journal(EventKind::Shutdown, "offline rollback");
    let released = guard.release();
    if let Err(error) = outcome {
        bail!("{error}");
    }
    released?;
    Ok(())
}
