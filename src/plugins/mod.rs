pub mod modules;

pub use modules::{Capability, ModuleOutcome, ModuleRegistry};
