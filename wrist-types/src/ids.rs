//! Correlation and entity identifiers.

use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::CodecError;

/// Correlation id stamped on an outbound request and echoed on its
/// result and events.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(u64);

impl CommandId {
    /// Create a CommandId from a raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandId({})", self.0)
    }
}

impl From<u64> for CommandId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A namespaced entity identifier: `<domain>.<object_id>`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Parse an entity id, rejecting anything that is not `domain.object_id`.
    pub fn parse(raw: &str) -> Result<Self, CodecError> {
        match raw.split_once('.') {
            Some((domain, object_id))
                if !domain.is_empty() && !object_id.is_empty() && !object_id.contains('.') =>
            {
                Ok(Self(raw.to_string()))
            }
            _ => Err(CodecError::InvalidEntityId(raw.to_string())),
        }
    }

    /// The domain part (`light` in `light.kitchen`).
    pub fn domain(&self) -> &str {
        self.0.split_once('.').map(|(d, _)| d).unwrap_or(&self.0)
    }

    /// The object part (`kitchen` in `light.kitchen`).
    pub fn object_id(&self) -> &str {
        self.0.split_once('.').map(|(_, o)| o).unwrap_or("")
    }

    /// Borrow the full id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        EntityId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl std::str::FromStr for EntityId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Hashes and compares like the inner string, so maps keyed by EntityId
// can be queried with a &str.
impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_id_serializes_as_bare_number() {
        let json = serde_json::to_string(&CommandId::new(42)).unwrap();
        assert_eq!(json, "42");
        let back: CommandId = serde_json::from_str("42").unwrap();
        assert_eq!(back.value(), 42);
    }

    #[test]
    fn command_id_ordering() {
        assert!(CommandId::new(1) < CommandId::new(2));
    }

    #[test]
    fn entity_id_splits_domain_and_object() {
        let id = EntityId::parse("light.kitchen").unwrap();
        assert_eq!(id.domain(), "light");
        assert_eq!(id.object_id(), "kitchen");
        assert_eq!(id.to_string(), "light.kitchen");
    }

    #[test]
    fn entity_id_rejects_malformed() {
        assert!(EntityId::parse("light").is_err());
        assert!(EntityId::parse(".kitchen").is_err());
        assert!(EntityId::parse("light.").is_err());
        assert!(EntityId::parse("a.b.c").is_err());
    }

    #[test]
    fn entity_id_deserialize_validates() {
        let ok: Result<EntityId, _> = serde_json::from_str("\"switch.fan\"");
        assert!(ok.is_ok());
        let bad: Result<EntityId, _> = serde_json::from_str("\"nodot\"");
        assert!(bad.is_err());
    }
}
