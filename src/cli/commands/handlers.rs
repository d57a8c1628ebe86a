use super::types::{Command, CommandResult, ControlAction};
use crate::app::status::{render_document, render_flags};
use crate::platform::daemon::TaskHealth;
use crate::plugins::ModuleRegistry;
use crate::security::UpdateKey;
use crate::state::{EventKind, FLAG_AUTO_UPDATE, JournalEntry, StateStore};
use crate::update::UpdatePipeline;

/// Everything a console command may touch.
pub struct CommandContext<'a> {
    pub store: &'a StateStore,
    pub pipeline: &'a UpdatePipeline,
    pub modules: &'a ModuleRegistry,
    pub health: &'a TaskHealth,
}

pub async fn handle_command(command: Command, ctx: &CommandContext<'_>) -> CommandResult {
    match command {
        Command::Status => handle_status(ctx),
        Command::Help => handle_help(),
        Command::Flags => CommandResult::visible(ctx.store.read(render_flags)),
        Command::Name(name) => handle_name(ctx, name),
        Command::AutoUpdate(enabled) => handle_autoupdate(ctx, enabled),
        Command::AutoInterval(minutes) => handle_autointerval(ctx, minutes),
        Command::SetKey(key) => handle_setkey(ctx, key),
        Command::UpdateCheck => handle_updatecheck(ctx).await,
        Command::Update => handle_update(ctx).await,
        Command::Rollback => handle_rollback(ctx),
        Command::Save => handle_save(ctx),
        Command::PanicSave => handle_panic_save(ctx),
        Command::SelfCheck => handle_selfcheck(ctx),
        Command::Modules => CommandResult::visible(ctx.modules.describe(ctx.store)),
        Command::Activate(name) => {
            CommandResult::visible(ctx.modules.activate(ctx.store, &name).to_string())
        }
        Command::Deactivate(name) => {
            CommandResult::visible(ctx.modules.deactivate(ctx.store, &name).to_string())
        }
        Command::Quit => CommandResult::then("bye", ControlAction::Shutdown),
        Command::Usage(usage) => CommandResult::visible(format!("usage: {usage}")),
        Command::Unknown(verb) => {
            CommandResult::visible(format!("unknown command '{verb}' (try 'help')"))
        }
    }
}

/// Applies a mutation, journals it, and persists. A failed save is
/// reported; the change stays in memory for the next autosave.
fn commit(
    ctx: &CommandContext<'_>,
    kind: EventKind,
    payload: String,
    f: impl FnOnce(&mut crate::state::StateDocument),
    ok: String,
) -> CommandResult {
    match ctx.store.commit(JournalEntry::new(kind, payload), f) {
        Ok(()) => CommandResult::visible(ok),
        Err(error) => {
            tracing::warn!(%error, "command save failed");
            CommandResult::visible(format!("{ok} (not yet saved: {error})"))
        }
    }
}

fn handle_status(ctx: &CommandContext<'_>) -> CommandResult {
    let mut lines = ctx.store.read(render_document);
    lines.push(format!("version         {}", ctx.pipeline.current_version()));
    lines.push(format!(
        "source          {}",
        ctx.pipeline
            .source_description()
            .unwrap_or_else(|| "(none)".into())
    ));
    lines.push(format!(
        "unsaved         {}",
        if ctx.store.is_dirty() { "yes" } else { "no" }
    ));
    lines.push(ctx.health.render());
    CommandResult::visible(lines.join("\n"))
}

fn handle_help() -> CommandResult {
    CommandResult::visible(
        "status              -- Show identity, counters and task health\n\
         flags               -- List persisted flags\n\
         name <new name>     -- Claim a name\n\
         autoupdate on|off   -- Toggle scheduled update probes\n\
         autointerval <min>  -- Minutes between update probes\n\
         setkey <secret>     -- Set the update signature key\n\
         updatecheck         -- Ask the source for its version\n\
         update              -- Fetch, verify and install a newer artifact\n\
         rollback            -- Restore the previous artifact\n\
         save                -- Persist now\n\
         panic save          -- Persist and snapshot to recovery/\n\
         selfcheck           -- Check state files and directories\n\
         modules             -- List modules\n\
         activate <module>   -- Start a whitelisted module\n\
         deactivate <module> -- Stop a module\n\
         quit | exit         -- Save, release the lock and exit",
    )
}

fn handle_name(ctx: &CommandContext<'_>, name: String) -> CommandResult {
    let ok = format!("name claimed: {name}");
    commit(
        ctx,
        EventKind::Name,
        name.clone(),
        |doc| doc.claimed_name = Some(name),
        ok,
    )
}

fn handle_autoupdate(ctx: &CommandContext<'_>, enabled: bool) -> CommandResult {
    let state = if enabled { "on" } else { "off" };
    commit(
        ctx,
        EventKind::AutoUpdate,
        state.to_string(),
        |doc| doc.set_flag(FLAG_AUTO_UPDATE, enabled),
        format!("auto-update {state}"),
    )
}

fn handle_autointerval(ctx: &CommandContext<'_>, minutes: u32) -> CommandResult {
    commit(
        ctx,
        EventKind::AutoInterval,
        minutes.to_string(),
        |doc| {
            doc.set_auto_update_interval(minutes);
        },
        format!("auto-update interval {minutes} min"),
    )
}

fn handle_setkey(ctx: &CommandContext<'_>, key: UpdateKey) -> CommandResult {
    commit(
        ctx,
        EventKind::SetKey,
        "set".to_string(),
        |doc| doc.update_key = Some(key),
        "update key set".to_string(),
    )
}

async fn handle_updatecheck(ctx: &CommandContext<'_>) -> CommandResult {
    let local = ctx.pipeline.current_version();
    match ctx.pipeline.check().await {
        Some(remote) if remote > local => {
            CommandResult::visible(format!("update available: {remote} (local {local})"))
        }
        Some(remote) => CommandResult::visible(format!("up-to-date (remote {remote}, local {local})")),
        None => CommandResult::visible("check failed"),
    }
}

async fn handle_update(ctx: &CommandContext<'_>) -> CommandResult {
    match ctx.pipeline.attempt().await {
        Ok(installed) => CommandResult::then(
            format!("{installed}; restarting"),
            ControlAction::Restart,
        ),
        Err(error) => CommandResult::visible(error.to_string()),
    }
}

fn handle_rollback(ctx: &CommandContext<'_>) -> CommandResult {
    match ctx.pipeline.rollback() {
        Ok(()) => CommandResult::then("rolled back; restarting", ControlAction::Restart),
        Err(error) => CommandResult::visible(format!("rollback unavailable: {error}")),
    }
}

fn handle_save(ctx: &CommandContext<'_>) -> CommandResult {
    match ctx.store.save() {
        Ok(()) => CommandResult::visible("saved"),
        Err(error) => CommandResult::visible(format!("save failed: {error}")),
    }
}

fn handle_panic_save(ctx: &CommandContext<'_>) -> CommandResult {
    if let Err(error) = ctx.store.save() {
        return CommandResult::visible(format!("save failed: {error}"));
    }
    match ctx.store.snapshot("panic") {
        Ok(path) => {
            ctx.store
                .append_journal(EventKind::Snapshot, format!("panic {}", path.display()));
            CommandResult::visible(format!("saved; snapshot {}", path.display()))
        }
        Err(error) => CommandResult::visible(format!("saved; snapshot failed: {error}")),
    }
}

fn handle_selfcheck(ctx: &CommandContext<'_>) -> CommandResult {
    let layout = ctx.store.layout();
    let paths = &ctx.pipeline.settings().paths;
    let checks = [
        ("state dir", layout.dir().is_dir()),
        ("state file", layout.primary().is_file()),
        ("journal", layout.journal().is_file()),
        ("lock", layout.lock().is_file()),
        ("recovery dir", layout.recovery_dir().is_dir()),
        ("quarantine dir", layout.quarantine_dir().is_dir()),
        ("artifact", paths.installed.is_file()),
    ];
    let failed = checks.iter().filter(|(_, ok)| !ok).count();
    let mut lines: Vec<String> = checks
        .iter()
        .map(|(name, ok)| format!("{name:<15} {}", if *ok { "ok" } else { "MISSING" }))
        .collect();
    lines.push(format!(
        "backup          {}",
        if paths.has_backup() { "present" } else { "none" }
    ));
    lines.push(if failed == 0 {
        "selfcheck ok".to_string()
    } else {
        format!("selfcheck: {failed} problem(s)")
    });
    CommandResult::visible(lines.join("\n"))
}
