use super::TaskHealth;
use crate::config::ReliabilityConfig;
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

/// Restart policy for one supervised component.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial_secs: u64,
    pub max_secs: u64,
    /// Consecutive failures tolerated before the circuit opens; 0 is
    /// unlimited.
    pub max_restarts: u32,
}

impl From<&ReliabilityConfig> for Backoff {
    fn from(config: &ReliabilityConfig) -> Self {
        Self {
            initial_secs: config.component_initial_backoff_secs,
            max_secs: config.component_max_backoff_secs,
            max_restarts: config.component_max_restarts,
        }
    }
}

/// Runs `run_component` forever, restarting it with exponential backoff
/// when it fails or returns. A run that lasted longer than the backoff
/// ceiling counts as healthy and resets the failure streak.
pub(super) fn spawn_component_supervisor<F, Fut>(
    name: &'static str,
    policy: Backoff,
    health: Arc<TaskHealth>,
    mut run_component: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let initial = policy.initial_secs.max(1);
        let max_backoff = policy.max_secs.max(initial);
        let mut backoff = initial;
        let mut consecutive_failures: u32 = 0;

        loop {
            tracing::info!(component = name, "component starting");
            health.mark_starting(name);
            let started = Instant::now();
            match run_component().await {
                Ok(()) => {
                    tracing::warn!(component = name, "component exited unexpectedly");
                    health.mark_error(name, "exited");
                }
                Err(error) => {
                    tracing::error!(component = name, %error, "component failed");
                    health.mark_error(name, &error.to_string());
                }
            }

            if started.elapsed() >= Duration::from_secs(max_backoff) {
                backoff = initial;
                consecutive_failures = 0;
            }
            consecutive_failures = consecutive_failures.saturating_add(1);

            if policy.max_restarts > 0 && consecutive_failures > policy.max_restarts {
                tracing::error!(
                    component = name,
                    max_restarts = policy.max_restarts,
                    "component exceeded max restarts, circuit open"
                );
                health.mark_stopped(name, "circuit open");
                break;
            }
            health.bump_restart(name);
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff = backoff.saturating_mul(2).min(max_backoff);
        }
    })
}
