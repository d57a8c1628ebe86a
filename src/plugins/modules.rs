//! Named optional capabilities.
//!
//! The state document decides which names may run (`module_whitelist`) and
//! which were running last time (`module_active`). The registry maps a name
//! to the implementation compiled into this binary; nothing is loaded from
//! disk at runtime.

use crate::state::{EventKind, JournalEntry, StateStore};
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn activate(&self) -> Result<()>;

    fn deactivate(&self) -> Result<()> {
        Ok(())
    }
}

/// Result of an `activate`/`deactivate` request, rendered for the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOutcome {
    Activated(String),
    Deactivated(String),
    NotWhitelisted(String),
    NotFound(String),
    Failed { name: String, reason: String },
}

impl fmt::Display for ModuleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Activated(name) => write!(f, "activated {name}"),
            Self::Deactivated(name) => write!(f, "deactivated {name}"),
            Self::NotWhitelisted(name) => write!(f, "reject: {name} not whitelisted"),
            Self::NotFound(name) => write!(f, "{name}: not found"),
            Self::Failed { name, reason } => write!(f, "{name}: failed ({reason})"),
        }
    }
}

/// Built-in capability that only records its own transitions.
struct Builtin(&'static str);

impl Capability for Builtin {
    fn name(&self) -> &str {
        self.0
    }

    fn activate(&self) -> Result<()> {
        tracing::info!(module = self.0, "module active");
        Ok(())
    }

    fn deactivate(&self) -> Result<()> {
        tracing::info!(module = self.0, "module inactive");
        Ok(())
    }
}

const BUILTINS: [&str; 3] = ["web_ui", "classroom", "voice"];

#[derive(Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<dyn Capability>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for name in BUILTINS {
            registry.register(Arc::new(Builtin(name)));
        }
        registry
    }

    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        self.modules.insert(capability.name().to_string(), capability);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn activate(&self, store: &StateStore, name: &str) -> ModuleOutcome {
        let name = name.trim();
        if !store.read(|doc| doc.module_whitelist.contains(name)) {
            return ModuleOutcome::NotWhitelisted(name.to_string());
        }
        let Some(module) = self.modules.get(name) else {
            return ModuleOutcome::NotFound(name.to_string());
        };
        if let Err(error) = module.activate() {
            return ModuleOutcome::Failed {
                name: name.to_string(),
                reason: error.to_string(),
            };
        }
        self.persist(store, name, true);
        ModuleOutcome::Activated(name.to_string())
    }

    pub fn deactivate(&self, store: &StateStore, name: &str) -> ModuleOutcome {
        let name = name.trim();
        let Some(module) = self.modules.get(name) else {
            return ModuleOutcome::NotFound(name.to_string());
        };
        if let Err(error) = module.deactivate() {
            return ModuleOutcome::Failed {
                name: name.to_string(),
                reason: error.to_string(),
            };
        }
        self.persist(store, name, false);
        ModuleOutcome::Deactivated(name.to_string())
    }

    /// Re-runs `activate` for every module recorded active. A module that
    /// is no longer whitelisted or registered stays recorded but idle.
    pub fn restore_active(&self, store: &StateStore) -> Vec<ModuleOutcome> {
        let active: Vec<String> = store.read(|doc| {
            doc.module_active
                .iter()
                .filter(|(_, on)| **on)
                .map(|(name, _)| name.clone())
                .collect()
        });
        active
            .iter()
            .map(|name| {
                let outcome = self.activate(store, name);
                if !matches!(outcome, ModuleOutcome::Activated(_)) {
                    tracing::warn!(module = %name, %outcome, "module not restored");
                }
                outcome
            })
            .collect()
    }

    /// One line per whitelisted or registered module.
    pub fn describe(&self, store: &StateStore) -> String {
        store.read(|doc| {
            let mut names: Vec<&str> = doc.module_whitelist.iter().map(String::as_str).collect();
            for name in self.names() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            names.sort_unstable();
            names
                .iter()
                .map(|name| {
                    let state = if doc.module_active.get(*name).copied().unwrap_or(false) {
                        "active"
                    } else {
                        "inactive"
                    };
                    let allowed = if doc.module_whitelist.contains(*name) {
                        ""
                    } else {
                        " (not whitelisted)"
                    };
                    let present = if self.modules.contains_key(*name) {
                        ""
                    } else {
                        " (missing)"
                    };
                    format!("{name}: {state}{allowed}{present}")
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    fn persist(&self, store: &StateStore, name: &str, active: bool) {
        let payload = format!("{name}={}", if active { "on" } else { "off" });
        let result = store.commit(JournalEntry::new(EventKind::Module, payload), |doc| {
            doc.module_active.insert(name.to_string(), active);
        });
        if let Err(error) = result {
            tracing::warn!(%error, module = name, "failed to persist module state");
        }
    }
}
