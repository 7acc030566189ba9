use std::fmt;

use serde::{Deserialize, Serialize};

/// Optimistic concurrency token.
///
/// Products carry one, bumped on every compare-and-swap update. Each saga's
/// step journal carries one too, equal to the number of records appended.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Nothing written yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// The version after the first write.
    pub fn first() -> Self {
        Self::initial().next()
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_advance_from_initial() {
        assert!(Version::initial() < Version::first());
        assert_eq!(Version::initial().next(), Version::first());
        assert_eq!(Version::new(41).next().as_i64(), 42);
        assert_eq!(Version::new(3).to_string(), "v3");
    }
}
