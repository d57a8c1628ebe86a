pub mod schema;

pub use schema::{
    Config, ReliabilityConfig, ScheduleConfig, StateConfig, UpdateConfig, resolve_home,
};
