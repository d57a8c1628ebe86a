use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroize;

const REDACTED: &str = "***";

/// Shared secret used to verify update signatures.
///
/// Persisted in the state document, but never rendered by `Debug`,
/// never logged, and never echoed back through a command result.
#[derive(Clone, PartialEq, Eq)]
pub struct UpdateKey(String);

impl UpdateKey {
    /// Returns `None` for blank input so an empty `setkey` cannot arm the gate.
    pub fn new(secret: impl Into<String>) -> Option<Self> {
        let mut secret = secret.into();
        let trimmed = secret.trim();
        if trimmed.is_empty() {
            secret.zeroize();
            return None;
        }
        if trimmed.len() != secret.len() {
            let owned = trimmed.to_string();
            secret.zeroize();
            secret = owned;
        }
        Some(Self(secret))
    }

    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for UpdateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UpdateKey({REDACTED})")
    }
}

impl Drop for UpdateKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl Serialize for UpdateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for UpdateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).ok_or_else(|| serde::de::Error::custom("update key must not be blank"))
    }
}
