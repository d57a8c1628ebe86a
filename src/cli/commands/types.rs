use crate::security::UpdateKey;

/// One line typed at the running agent's console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Help,
    Flags,
    Name(String),
    AutoUpdate(bool),
    AutoInterval(u32),
    SetKey(UpdateKey),
    UpdateCheck,
    Update,
    Rollback,
    Save,
    PanicSave,
    SelfCheck,
    Modules,
    Activate(String),
    Deactivate(String),
    Quit,
    /// Known verb with unusable arguments; carries the usage line.
    Usage(&'static str),
    Unknown(String),
}

/// What the runtime must do after a command's reply is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// Save, journal, release the lock, then re-exec.
    Restart,
    /// Save, journal, release the lock, then exit.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub text: String,
    pub action: Option<ControlAction>,
}

impl CommandResult {
    pub fn visible(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: None,
        }
    }

    pub fn then(text: impl Into<String>, action: ControlAction) -> Self {
        Self {
            text: text.into(),
            action: Some(action),
        }
    }
}
