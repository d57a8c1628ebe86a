use crate::cli::commands::{CommandContext, ControlAction, handle_command, parse_command};
use crate::config::Config;
use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

mod health;
mod runtime;
mod supervisor;
mod tasks;

pub use health::{ComponentHealth, HealthSnapshot, TaskHealth};
pub use runtime::{Collaborators, Runtime};
pub use supervisor::Backoff;

use supervisor::spawn_component_supervisor;

const CONTROL_CHANNEL_CAPACITY: usize = 4;

/// Starts the four periodic tasks under restart supervision.
pub fn spawn_periodic_tasks(
    runtime: &Runtime,
    control: &mpsc::Sender<ControlAction>,
) -> Vec<JoinHandle<()>> {
    let schedule = runtime.config.schedule.clone();
    let policy = Backoff::from(&runtime.config.reliability);
    let health = &runtime.health;
    let mut handles = Vec::new();

    let store = Arc::clone(&runtime.store);
    let task_health = Arc::clone(health);
    let every = schedule.autosave();
    handles.push(spawn_component_supervisor(
        "autosave",
        policy,
        Arc::clone(health),
        move || tasks::autosave(Arc::clone(&store), every, Arc::clone(&task_health)),
    ));

    let store = Arc::clone(&runtime.store);
    let task_health = Arc::clone(health);
    let every = schedule.heartbeat();
    handles.push(spawn_component_supervisor(
        "heartbeat",
        policy,
        Arc::clone(health),
        move || tasks::heartbeat(Arc::clone(&store), every, Arc::clone(&task_health)),
    ));

    let store = Arc::clone(&runtime.store);
    let task_health = Arc::clone(health);
    let every = schedule.snapshot();
    handles.push(spawn_component_supervisor(
        "snapshot",
        policy,
        Arc::clone(health),
        move || tasks::snapshot(Arc::clone(&store), every, Arc::clone(&task_health)),
    ));

    let pipeline = Arc::clone(&runtime.pipeline);
    let task_health = Arc::clone(health);
    let control = control.clone();
    let poll = schedule.update_poll();
    let min_spacing = schedule.min_check_spacing();
    handles.push(spawn_component_supervisor(
        "update",
        policy,
        Arc::clone(health),
        move || {
            tasks::update_probe(
                Arc::clone(&pipeline),
                poll,
                min_spacing,
                control.clone(),
                Arc::clone(&task_health),
            )
        },
    ));

    handles
}

/// Waits for the next thing that ends the current run: a console command
/// with a control action, a request from a task, or an interrupt.
async fn next_action<R>(
    runtime: &Runtime,
    console: &mut Option<Lines<R>>,
    control_rx: &mut mpsc::Receiver<ControlAction>,
) -> ControlAction
where
    R: AsyncBufRead + Unpin,
{
    loop {
        tokio::select! {
            line = read_line(console) => match line {
                Ok(Some(line)) => {
                    let Some(command) = parse_command(&line) else {
                        continue;
                    };
                    let ctx = CommandContext {
                        store: &runtime.store,
                        pipeline: &runtime.pipeline,
                        modules: &runtime.modules,
                        health: &runtime.health,
                    };
                    let result = handle_command(command, &ctx).await;
                    println!("{}", result.text);
                    if let Some(action) = result.action {
                        return action;
                    }
                }
                Ok(None) => {
                    tracing::info!("console closed; running headless");
                    *console = None;
                }
                Err(error) => {
                    tracing::warn!(%error, "console read failed; running headless");
                    *console = None;
                }
            },
            Some(action) = control_rx.recv() => return action,
            signal = tokio::signal::ctrl_c() => {
                if let Err(error) = signal {
                    tracing::warn!(%error, "interrupt handler failed");
                }
                return ControlAction::Shutdown;
            }
        }
    }
}

async fn read_line<R>(console: &mut Option<Lines<R>>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match console {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

/// Runs the agent until `quit`, an interrupt, or a successful restart.
///
/// Closing stdin does not stop the agent; it keeps running its periodic
/// tasks until interrupted. A failed re-exec is reported and the agent
/// carries on with the code it is running.
pub async fn run(config: Arc<Config>, parts: Collaborators) -> Result<()> {
    let runtime = Runtime::boot(config, parts)?;
    let (control_tx, mut control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);

    println!("◆ revenant {} running", runtime.pipeline.current_version());
    println!("   state: {}", runtime.store.layout().dir().display());
    println!("   type 'help' for commands, 'quit' to stop");

    let mut console = Some(BufReader::new(tokio::io::stdin()).lines());
    loop {
        let handles = spawn_periodic_tasks(&runtime, &control_tx);
        let action = next_action(&runtime, &mut console, &mut control_rx).await;

        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }

        match action {
            ControlAction::Shutdown => return runtime.shutdown(),
            ControlAction::Restart => {
                if let Err(error) = runtime.restart() {
                    tracing::error!("restart did not happen: {error:#}");
                    println!("restart failed: {error:#}; still running");
                }
            }
        }
    }
}
