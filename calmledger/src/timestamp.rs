//! Unix timestamps for receipts.
//!
//! A receipt records when its payment was confirmed as seconds since the Unix
//! epoch. The value is stored as a stringified integer, the same way the
//! receipt's other numeric fields travel, so a JavaScript reader of the
//! stored record never loses precision.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::time::{Duration, SystemTime};

/// Seconds since 1970-01-01T00:00:00Z.
///
/// Serialized as a string:
///
/// ```json
/// "1760832000"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq)]
pub struct UnixTimestamp(u64);

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl UnixTimestamp {
    /// Creates a timestamp from raw seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Returns the current system time.
    ///
    /// A clock set before the epoch yields the epoch itself.
    #[must_use]
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        Self(secs)
    }

    /// Returns the raw seconds value.
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_string() {
        let ts = UnixTimestamp::from_secs(1_760_832_000);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "\"1760832000\"");
    }

    #[test]
    fn test_rejects_numbers_and_negatives() {
        assert!(serde_json::from_str::<UnixTimestamp>("1760832000").is_err());
        assert!(serde_json::from_str::<UnixTimestamp>("\"-1\"").is_err());
    }

    #[test]
    fn test_now_is_after_2024() {
        assert!(UnixTimestamp::now().as_secs() > 1_700_000_000);
    }
}
