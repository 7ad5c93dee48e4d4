//! Destination newtype for type safety.
//!
//! Wraps a transport-specific nexthop string (e.g. a domain name, or a
//! `domain:port` relay override) to prevent it from being confused with an
//! envelope recipient address or a transport name.

use std::{
    fmt::{self, Display},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

/// A delivery destination key ("nexthop"), scoped to one transport.
///
/// Two entries addressed to the same `Destination` under the same transport
/// share one destination queue; the scheduler never compares destinations
/// across transports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Destination(Arc<str>);

impl Destination {
    #[must_use]
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Destination {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Destination {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for Destination {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_destinations_hash_equal() {
        let a = Destination::new("mail.example.com");
        let b = Destination::from("mail.example.com".to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn display_roundtrips_the_string() {
        let d = Destination::new("mx1.example.net");
        assert_eq!(d.to_string(), "mx1.example.net");
    }
}
