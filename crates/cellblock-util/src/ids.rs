//! Strongly-typed identifiers for cellblock

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier of a player (the jailed subject)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(Uuid);

impl SubjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Name of a jail.
///
/// Jail names are case-insensitive; the stored form is always lowercase so
/// that `Max` and `max` address the same jail.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct JailName(String);

impl JailName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for JailName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JailName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for JailName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<JailName> for String {
    fn from(name: JailName) -> Self {
        name.0
    }
}

/// Unique identifier for a connected IPC client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jail_name_is_case_insensitive() {
        assert_eq!(JailName::new("Max"), JailName::new("max"));
        assert_eq!(JailName::new("  SOLITARY "), JailName::new("solitary"));
        assert_ne!(JailName::new("max"), JailName::new("min"));
    }

    #[test]
    fn subject_id_uniqueness() {
        assert_ne!(SubjectId::new(), SubjectId::new());
    }

    #[test]
    fn subject_id_parses_hyphenated_uuid() {
        let id: SubjectId = "0f8fad5b-d9cb-469f-a165-70867728950e".parse().unwrap();
        assert_eq!(id.to_string(), "0f8fad5b-d9cb-469f-a165-70867728950e");
        assert!("not-a-uuid".parse::<SubjectId>().is_err());
    }

    #[test]
    fn ids_serialize_deserialize() {
        let id = SubjectId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let parsed: SubjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);

        let parsed: JailName = serde_json::from_str("\"Max\"").unwrap();
        assert_eq!(parsed.as_str(), "max");
    }
}
