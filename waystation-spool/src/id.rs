//! Identifier for a queue file.
//!
//! This is a globally unique identifier (ULID) that serves as both the
//! tracking id and, in a real deployment, the queue file's name. ULIDs are
//! lexicographically sortable by creation time and collision-resistant.

use std::fmt;

/// Identifier for one message's queue file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(ulid::Ulid);

impl QueueId {
    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for QueueId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for QueueId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = QueueId::generate();
        let b = QueueId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn display_and_parse_roundtrip() {
        let id = QueueId::generate();
        let rendered = id.to_string();
        let parsed = ulid::Ulid::from_string(&rendered).unwrap();
        assert_eq!(id.ulid(), parsed);
    }
}
