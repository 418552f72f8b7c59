use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoordError, Result};

pub const DEFAULT_PREFIX: &str = "claude";

/// Identifier of one participating process:
/// `<prefix>-<YYYYMMDD>-<HHMMSS>-<8 lowercase hex>`.
///
/// The timestamp is UTC, so ids with the same prefix sort by start time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(String);

impl InstanceId {
    pub const SUFFIX_LEN: usize = 8;

    /// Generate a fresh id for `prefix` using OS-backed randomness.
    pub fn generate(prefix: &str) -> Result<Self> {
        Self::generate_with(prefix, Utc::now(), |bytes| {
            getrandom::fill(bytes).map_err(|e| CoordError::Randomness(e.to_string()))
        })
    }

    /// Test hook: inject the clock and the random source.
    pub fn generate_with<F>(prefix: &str, now: DateTime<Utc>, mut fill_random: F) -> Result<Self>
    where
        F: FnMut(&mut [u8]) -> Result<()>,
    {
        validate_prefix(prefix)?;
        let mut bytes = [0_u8; Self::SUFFIX_LEN / 2];
        fill_random(&mut bytes)?;
        let suffix: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Ok(Self(format!(
            "{prefix}-{}-{suffix}",
            now.format("%Y%m%d-%H%M%S")
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> &str {
        self.0.split('-').next().unwrap_or_default()
    }

    fn validate(value: &str) -> Result<()> {
        let invalid = || CoordError::InvalidInstanceId(value.to_string());
        let parts: Vec<&str> = value.split('-').collect();
        let [prefix, date, time, suffix] = parts.as_slice() else {
            return Err(invalid());
        };
        validate_prefix(prefix).map_err(|_| invalid())?;
        let digits = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_digit());
        if !digits(date, 8) || !digits(time, 6) {
            return Err(invalid());
        }
        if suffix.len() != Self::SUFFIX_LEN
            || !suffix
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(invalid());
        }
        Ok(())
    }
}

/// Prefixes are lowercase ASCII letters only, so ids stay filename-safe.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_lowercase()) {
        return Err(CoordError::InvalidIdPrefix(prefix.to_string()));
    }
    Ok(())
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstanceId {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        Self::validate(trimmed)?;
        Ok(Self(trimmed.to_string()))
    }
}

impl AsRef<str> for InstanceId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<InstanceId> for String {
    fn from(value: InstanceId) -> Self {
        value.0
    }
}

impl Serialize for InstanceId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for InstanceId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
