use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::RetryPolicy;
use crate::error::Result;
use crate::instance_id::InstanceId;
use crate::model::LockRecord;
use crate::store::document::{create_json_exclusive, read_json_opt, remove_if_exists};
use crate::store::lock;
use crate::store::paths::{lock_file_name, normalize_resource_path};

pub const LOCKS_DIR: &str = "locks";
const REMOVAL_LOCK: &str = ".removal.lock";

/// Result of a single, non-blocking acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// A new record was created for the caller.
    Acquired(LockRecord),
    /// The caller already held the lock; nothing changed.
    AlreadyHeld(LockRecord),
    /// Another instance holds it; the record is theirs.
    Conflict(LockRecord),
}

impl LockOutcome {
    /// Whether the caller holds the lock after the attempt.
    pub fn is_held(&self) -> bool {
        !matches!(self, Self::Conflict(_))
    }

    pub fn record(&self) -> &LockRecord {
        match self {
            Self::Acquired(r) | Self::AlreadyHeld(r) | Self::Conflict(r) => r,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released(LockRecord),
    NotLocked,
    HeldByOther(LockRecord),
}

impl ReleaseOutcome {
    /// Only releasing someone else's lock counts as failure.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::HeldByOther(_))
    }
}

/// Advisory per-file locks, one JSON record per resource under `locks/`.
///
/// Creation is exclusive (hard-link of a fully written temp file), so at most
/// one record per resource exists. Removals (release, force release, takeover
/// of abandoned locks) run under a small directory-wide lock so a release can
/// never delete a record that was replaced after it was read.
pub struct LockManager {
    dir: PathBuf,
    base_dir: PathBuf,
    retry: RetryPolicy,
    max_age: Option<Duration>,
}

impl LockManager {
    /// `base_dir` resolves relative resource paths, normally the cwd.
    pub fn open(root: &Path, base_dir: PathBuf, retry: RetryPolicy, max_age: Option<Duration>) -> Self {
        Self {
            dir: root.join(LOCKS_DIR),
            base_dir,
            retry,
            max_age,
        }
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn normalize(&self, resource_path: &str) -> Result<String> {
        normalize_resource_path(resource_path, &self.base_dir)
    }

    fn record_path(&self, normalized: &str) -> PathBuf {
        self.dir.join(lock_file_name(normalized))
    }

    /// Try once to take the lock on `resource_path` for `holder`.
    ///
    /// Re-acquiring a lock the caller already holds succeeds without
    /// rewriting it, so a process never deadlocks against its own claim.
    /// When a max age is configured, another holder's record older than it is
    /// treated as abandoned and taken over.
    pub fn acquire(
        &self,
        holder: &InstanceId,
        holder_pid: u32,
        resource_path: &str,
        reason: &str,
    ) -> Result<LockOutcome> {
        let normalized = self.normalize(resource_path)?;
        let path = self.record_path(&normalized);
        let record = LockRecord {
            resource_path: normalized.clone(),
            holder_instance_id: holder.clone(),
            holder_pid,
            reason: reason.to_string(),
            acquired_at: Utc::now(),
        };

        let mut took_over = false;
        // Bounded: a record vanishing between create and read, or one takeover.
        for _ in 0..3 {
            if create_json_exclusive(&path, &record)? {
                tracing::debug!(resource = %normalized, instance = %holder, "lock acquired");
                return Ok(LockOutcome::Acquired(record));
            }
            let Some(existing) = read_json_opt::<LockRecord>(&path)? else {
                continue;
            };
            if existing.resource_path != normalized {
                tracing::warn!(
                    resource = %normalized,
                    other = %existing.resource_path,
                    "lock file name collision; treating as conflict"
                );
                return Ok(LockOutcome::Conflict(existing));
            }
            if &existing.holder_instance_id == holder {
                return Ok(LockOutcome::AlreadyHeld(existing));
            }
            if !took_over && self.is_abandoned(&existing, Utc::now()) && self.take_over(&path, &existing)? {
                took_over = true;
                continue;
            }
            tracing::debug!(
                resource = %normalized,
                holder = %existing.holder_instance_id,
                "lock conflict"
            );
            return Ok(LockOutcome::Conflict(existing));
        }

        match read_json_opt::<LockRecord>(&path)? {
            Some(existing) if &existing.holder_instance_id == holder => {
                Ok(LockOutcome::AlreadyHeld(existing))
            }
            Some(existing) => Ok(LockOutcome::Conflict(existing)),
            None => Ok(LockOutcome::Conflict(record)),
        }
    }

    fn is_abandoned(&self, record: &LockRecord, now: DateTime<Utc>) -> bool {
        self.max_age.is_some_and(|max_age| {
            let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
            now.signed_duration_since(record.acquired_at) > max_age
        })
    }

    /// Remove `expected` if it is still the record on disk.
    fn take_over(&self, path: &Path, expected: &LockRecord) -> Result<bool> {
        let guard = lock::acquire_lock(&self.dir.join(REMOVAL_LOCK), &self.retry)?;
        let current = read_json_opt::<LockRecord>(path)?;
        let removed = if current.as_ref() == Some(expected) {
            remove_if_exists(path)?
        } else {
            false
        };
        lock::release_lock(guard)?;
        if removed {
            tracing::warn!(
                resource = %expected.resource_path,
                previous_holder = %expected.holder_instance_id,
                acquired_at = %expected.acquired_at,
                "taking over abandoned lock"
            );
        }
        Ok(removed)
    }

    /// Whether `holder` currently holds the lock on `resource_path`.
    pub fn check(&self, holder: &InstanceId, resource_path: &str) -> Result<bool> {
        Ok(self
            .holder(resource_path)?
            .is_some_and(|r| &r.holder_instance_id == holder))
    }

    /// The current lock record for `resource_path`, whoever holds it.
    pub fn holder(&self, resource_path: &str) -> Result<Option<LockRecord>> {
        let normalized = self.normalize(resource_path)?;
        Ok(read_json_opt::<LockRecord>(&self.record_path(&normalized))?
            .filter(|r| r.resource_path == normalized))
    }

    /// Release `resource_path` if `holder` owns it.
    pub fn release(&self, holder: &InstanceId, resource_path: &str) -> Result<ReleaseOutcome> {
        let normalized = self.normalize(resource_path)?;
        let path = self.record_path(&normalized);

        let guard = lock::acquire_lock(&self.dir.join(REMOVAL_LOCK), &self.retry)?;
        let outcome = match read_json_opt::<LockRecord>(&path)? {
            None => ReleaseOutcome::NotLocked,
            Some(existing) if &existing.holder_instance_id != holder => {
                ReleaseOutcome::HeldByOther(existing)
            }
            Some(existing) => {
                remove_if_exists(&path)?;
                ReleaseOutcome::Released(existing)
            }
        };
        lock::release_lock(guard)?;

        if let ReleaseOutcome::Released(ref r) = outcome {
            tracing::debug!(resource = %r.resource_path, instance = %holder, "lock released");
        }
        Ok(outcome)
    }

    /// Release every lock held by `holder`; returns the released paths.
    pub fn release_all(&self, holder: &InstanceId) -> Result<Vec<String>> {
        self.release_held_by(std::slice::from_ref(holder))
    }

    /// Release every lock held by any of `holders` (used when reaping).
    pub fn release_held_by(&self, holders: &[InstanceId]) -> Result<Vec<String>> {
        if holders.is_empty() || !self.dir.exists() {
            return Ok(vec![]);
        }
        let guard = lock::acquire_lock(&self.dir.join(REMOVAL_LOCK), &self.retry)?;
        let mut released = Vec::new();
        for (path, record) in self.scan()? {
            if holders.contains(&record.holder_instance_id) && remove_if_exists(&path)? {
                released.push(record.resource_path);
            }
        }
        lock::release_lock(guard)?;
        released.sort();
        Ok(released)
    }

    /// Remove the lock on `resource_path` regardless of holder (operator tool).
    pub fn force_release(&self, resource_path: &str) -> Result<Option<LockRecord>> {
        let normalized = self.normalize(resource_path)?;
        let path = self.record_path(&normalized);

        let guard = lock::acquire_lock(&self.dir.join(REMOVAL_LOCK), &self.retry)?;
        let existing = read_json_opt::<LockRecord>(&path)?;
        if existing.is_some() {
            remove_if_exists(&path)?;
        }
        lock::release_lock(guard)?;

        if let Some(ref r) = existing {
            tracing::warn!(
                resource = %r.resource_path,
                holder = %r.holder_instance_id,
                "lock force-released"
            );
        }
        Ok(existing)
    }

    /// All current lock records, sorted by resource path.
    pub fn list(&self) -> Result<Vec<LockRecord>> {
        let mut records: Vec<LockRecord> = self.scan()?.into_iter().map(|(_, r)| r).collect();
        records.sort_by(|a, b| a.resource_path.cmp(&b.resource_path));
        Ok(records)
    }

    fn scan(&self) -> Result<Vec<(PathBuf, LockRecord)>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            if let Some(record) = read_json_opt::<LockRecord>(&path)? {
                out.push((path, record));
            }
        }
        Ok(out)
    }
}
