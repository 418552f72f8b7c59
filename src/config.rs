use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CoordError, Result};
use crate::instance_id::{self, DEFAULT_PREFIX};

pub const CONFIG_FILE: &str = "config.json";

pub const ENV_ID_PREFIX: &str = "AGENTCOORD_ID_PREFIX";
pub const ENV_STALE_SECS: &str = "AGENTCOORD_STALE_SECS";
pub const ENV_LOCK_MAX_AGE_SECS: &str = "AGENTCOORD_LOCK_MAX_AGE_SECS";

const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// Bounded exponential backoff for the document serialization lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// 8 attempts, 5ms doubling, capped at 100ms: roughly 0.35s worst case.
    fn default() -> Self {
        Self {
            attempts: 8,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Sleep before attempt `n` (0-based; attempt 0 never sleeps).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1_u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Runtime configuration for one coordination directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordConfig {
    pub root: PathBuf,
    pub id_prefix: String,
    /// Heartbeats older than this are stale.
    pub stale_after: Duration,
    pub lock_retry: RetryPolicy,
    /// Resource locks older than this may be taken over by another instance.
    pub lock_max_age: Option<Duration>,
}

/// On-disk `config.json`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    id_prefix: Option<String>,
    stale_after_secs: Option<u64>,
    lock_retry_attempts: Option<u32>,
    lock_retry_initial_ms: Option<u64>,
    lock_retry_max_ms: Option<u64>,
    lock_max_age_secs: Option<u64>,
}

impl CoordConfig {
    /// Built-in defaults for `root`; reads nothing from disk or env.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            id_prefix: DEFAULT_PREFIX.to_string(),
            stale_after: DEFAULT_STALE_AFTER,
            lock_retry: RetryPolicy::default(),
            lock_max_age: None,
        }
    }

    /// Defaults, then `<root>/config.json` if present, then environment.
    pub fn load(root: &Path) -> Result<Self> {
        let mut config = Self::new(root);
        config.apply_file(&root.join(CONFIG_FILE))?;
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_lock_retry(mut self, retry: RetryPolicy) -> Self {
        self.lock_retry = retry;
        self
    }

    pub fn with_lock_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.lock_max_age = max_age;
        self
    }

    pub fn validate(&self) -> Result<()> {
        instance_id::validate_prefix(&self.id_prefix)?;
        if self.stale_after.is_zero() {
            return Err(CoordError::InvalidConfig(
                "stale timeout must be greater than zero".into(),
            ));
        }
        if self.lock_retry.attempts == 0 {
            return Err(CoordError::InvalidConfig(
                "lock retry attempts must be at least 1".into(),
            ));
        }
        if self.lock_max_age.is_some_and(|age| age.is_zero()) {
            return Err(CoordError::InvalidConfig(
                "lock max age must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| CoordError::InvalidConfig(format!("{}: {e}", path.display())))?;

        if let Some(prefix) = file.id_prefix {
            self.id_prefix = prefix;
        }
        if let Some(secs) = file.stale_after_secs {
            self.stale_after = Duration::from_secs(secs);
        }
        if let Some(attempts) = file.lock_retry_attempts {
            self.lock_retry.attempts = attempts;
        }
        if let Some(ms) = file.lock_retry_initial_ms {
            self.lock_retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.lock_retry_max_ms {
            self.lock_retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = file.lock_max_age_secs {
            self.lock_max_age = Some(Duration::from_secs(secs));
        }
        Ok(())
    }

    fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let secs = |key: &str, raw: String| {
            raw.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| CoordError::InvalidConfig(format!("{key}: not a number: {raw}")))
        };

        if let Some(prefix) = lookup(ENV_ID_PREFIX) {
            self.id_prefix = prefix;
        }
        if let Some(raw) = lookup(ENV_STALE_SECS) {
            self.stale_after = secs(ENV_STALE_SECS, raw)?;
        }
        if let Some(raw) = lookup(ENV_LOCK_MAX_AGE_SECS) {
            self.lock_max_age = Some(secs(ENV_LOCK_MAX_AGE_SECS, raw)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let config = CoordConfig::new("/tmp/coord");
        assert_eq!(config.id_prefix, "claude");
        assert_eq!(config.stale_after, Duration::from_secs(300));
        assert!(config.lock_max_age.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn retry_delays_double_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(0), Duration::ZERO);
        assert_eq!(policy.delay_before(1), Duration::from_millis(5));
        assert_eq!(policy.delay_before(2), Duration::from_millis(10));
        assert_eq!(policy.delay_before(5), Duration::from_millis(80));
        assert_eq!(policy.delay_before(6), Duration::from_millis(100));
        assert_eq!(policy.delay_before(40), Duration::from_millis(100));
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"id_prefix": "agent", "stale_after_secs": 30, "lock_retry_attempts": 3, "lock_max_age_secs": 600}"#,
        )
        .unwrap();

        let mut config = CoordConfig::new(dir.path());
        config.apply_file(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.id_prefix, "agent");
        assert_eq!(config.stale_after, Duration::from_secs(30));
        assert_eq!(config.lock_retry.attempts, 3);
        assert_eq!(config.lock_max_age, Some(Duration::from_secs(600)));
    }

    #[test]
    fn unknown_file_fields_are_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{"stale_secs": 30}"#).unwrap();
        let err = CoordConfig::new(dir.path())
            .apply_file(&dir.path().join(CONFIG_FILE))
            .unwrap_err();
        assert!(matches!(err, CoordError::InvalidConfig(_)));
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_ID_PREFIX, "worker"),
            (ENV_STALE_SECS, " 45 "),
            (ENV_LOCK_MAX_AGE_SECS, ""),
        ]);
        let mut config = CoordConfig::new("/tmp/coord").with_id_prefix("agent");
        config
            .apply_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.id_prefix, "worker");
        assert_eq!(config.stale_after, Duration::from_secs(45));
        assert!(config.lock_max_age.is_none());
    }

    #[test]
    fn env_rejects_non_numeric_timeouts() {
        let mut config = CoordConfig::new("/tmp/coord");
        let err = config
            .apply_env_from(|key| (key == ENV_STALE_SECS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, CoordError::InvalidConfig(_)));
    }

    #[test]
    fn validate_catches_bad_values() {
        assert!(
            CoordConfig::new("/x")
                .with_id_prefix("Bad-Prefix")
                .validate()
                .is_err()
        );
        assert!(
            CoordConfig::new("/x")
                .with_stale_after(Duration::ZERO)
                .validate()
                .is_err()
        );
        let retry = RetryPolicy {
            attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(CoordConfig::new("/x").with_lock_retry(retry).validate().is_err());
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let mut config = CoordConfig::new(dir.path());
        config.apply_file(&dir.path().join(CONFIG_FILE)).unwrap();
        config.apply_env_from(|_| None).unwrap();
        assert_eq!(config, CoordConfig::new(dir.path()));
    }
}
