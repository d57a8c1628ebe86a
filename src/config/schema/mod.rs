mod env_overrides;
mod loader;
#[cfg(test)]
pub(crate) mod test_env;
mod types;

pub use loader::resolve_home;
pub use types::{Config, ReliabilityConfig, ScheduleConfig, StateConfig, UpdateConfig};
