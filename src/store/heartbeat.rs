use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::RetryPolicy;
use crate::error::{CoordError, Result};
use crate::instance_id::InstanceId;
use crate::model::{HeartbeatRecord, HeartbeatStatus};
use crate::store::document::{self, create_json_exclusive, read_json_opt, write_json_atomic};
use crate::store::lock;

pub const HEARTBEATS_DIR: &str = "heartbeats";
const WRITE_LOCK: &str = ".write.lock";

/// True when `record` has not been refreshed within `timeout` of `now`.
///
/// Only `last_seen` matters; a stored `active` status does not keep an old
/// record alive. A `last_seen` in the future (clock skew) is never stale.
pub fn is_stale(record: &HeartbeatRecord, timeout: Duration, now: DateTime<Utc>) -> bool {
    let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
    now.signed_duration_since(record.last_seen) > timeout
}

/// Status as seen by other instances, regardless of what is stored.
pub fn effective_status(
    record: &HeartbeatRecord,
    timeout: Duration,
    now: DateTime<Utc>,
) -> HeartbeatStatus {
    if is_stale(record, timeout, now) {
        HeartbeatStatus::Stale
    } else {
        record.status
    }
}

/// One liveness file per instance under `heartbeats/`.
///
/// Beats and removals both run under `heartbeats/.write.lock`, so a beat
/// that read the record before an unregister or reap deleted it cannot
/// rename it back into place afterwards.
pub struct HeartbeatStore {
    dir: PathBuf,
    retry: RetryPolicy,
}

impl HeartbeatStore {
    pub fn open(root: &Path, retry: RetryPolicy) -> Self {
        Self {
            dir: root.join(HEARTBEATS_DIR),
            retry,
        }
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn record_path(&self, id: &InstanceId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Write the initial record (`ping_count = 0`). Returns `false` if a
    /// record for `id` already exists.
    pub fn create(&self, id: &InstanceId, now: DateTime<Utc>) -> Result<bool> {
        create_json_exclusive(&self.record_path(id), &HeartbeatRecord::new(id.clone(), now))
    }

    /// Refresh liveness: `ping_count + 1`, `status = active`, `last_seen = now`.
    ///
    /// A missing record means the instance was unregistered or reaped; the
    /// caller should register again rather than resurrect the file.
    pub fn beat(&self, id: &InstanceId) -> Result<HeartbeatRecord> {
        self.beat_at(id, Utc::now())
    }

    pub fn beat_at(&self, id: &InstanceId, now: DateTime<Utc>) -> Result<HeartbeatRecord> {
        let path = self.record_path(id);
        let guard = lock::acquire_lock(&self.dir.join(WRITE_LOCK), &self.retry)?;
        let Some(mut record) = read_json_opt::<HeartbeatRecord>(&path)? else {
            lock::release_lock(guard)?;
            return Err(CoordError::InstanceNotFound(id.to_string()));
        };
        record.ping_count += 1;
        record.status = HeartbeatStatus::Active;
        record.last_seen = now;
        write_json_atomic(&path, &record)?;
        lock::release_lock(guard)?;
        tracing::trace!(instance = %id, ping_count = record.ping_count, "heartbeat");
        Ok(record)
    }

    pub fn get(&self, id: &InstanceId) -> Result<Option<HeartbeatRecord>> {
        read_json_opt(&self.record_path(id))
    }

    /// Every heartbeat record, sorted by instance id. Files that vanish while
    /// scanning are skipped; unparseable ones are errors.
    pub fn list(&self) -> Result<Vec<HeartbeatRecord>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !is_record_file(&path) {
                continue;
            }
            if let Some(record) = read_json_opt::<HeartbeatRecord>(&path)? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(records)
    }

    /// Records whose `last_seen` is older than `timeout`.
    pub fn stale(&self, timeout: Duration, now: DateTime<Utc>) -> Result<Vec<HeartbeatRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| is_stale(r, timeout, now))
            .collect())
    }

    /// Delete the record; absent is fine. Returns whether it existed.
    pub fn remove(&self, id: &InstanceId) -> Result<bool> {
        let path = self.record_path(id);
        if !self.dir.exists() {
            return Ok(false);
        }
        let guard = lock::acquire_lock(&self.dir.join(WRITE_LOCK), &self.retry)?;
        let removed = document::remove_if_exists(&path)?;
        lock::release_lock(guard)?;
        Ok(removed)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }
}

/// `<id>.json`, skipping in-flight temp files (dot-prefixed).
fn is_record_file(path: &Path) -> bool {
    let visible = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| !n.starts_with('.'));
    visible && path.extension().and_then(|e| e.to_str()) == Some("json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn id(suffix: &str) -> InstanceId {
        format!("claude-20250314-092653-{suffix}").parse().unwrap()
    }

    fn setup() -> (tempfile::TempDir, HeartbeatStore) {
        let dir = tempdir().unwrap();
        let store = HeartbeatStore::open(dir.path(), RetryPolicy::default());
        store.ensure_dir().unwrap();
        (dir, store)
    }

    #[test]
    fn create_starts_at_zero_and_is_exclusive() {
        let (_dir, store) = setup();
        let a = id("aaaaaaaa");
        assert!(store.create(&a, Utc::now()).unwrap());
        assert!(!store.create(&a, Utc::now()).unwrap());

        let record = store.get(&a).unwrap().unwrap();
        assert_eq!(record.ping_count, 0);
        assert_eq!(record.status, HeartbeatStatus::Active);
    }

    #[test]
    fn n_beats_add_exactly_n() {
        let (_dir, store) = setup();
        let a = id("aaaaaaaa");
        store.create(&a, Utc::now()).unwrap();
        for expected in 1..=5 {
            let record = store.beat(&a).unwrap();
            assert_eq!(record.ping_count, expected);
            assert_eq!(record.status, HeartbeatStatus::Active);
        }
        assert_eq!(store.get(&a).unwrap().unwrap().ping_count, 5);
    }

    #[test]
    fn beat_refreshes_stored_stale_status() {
        let (_dir, store) = setup();
        let a = id("aaaaaaaa");
        let old = Utc::now() - TimeDelta::hours(1);
        let mut record = HeartbeatRecord::new(a.clone(), old);
        record.status = HeartbeatStatus::Stale;
        write_json_atomic(&store.record_path(&a), &record).unwrap();

        let now = Utc::now();
        let refreshed = store.beat_at(&a, now).unwrap();
        assert_eq!(refreshed.status, HeartbeatStatus::Active);
        assert_eq!(refreshed.last_seen, now);
        assert_eq!(refreshed.ping_count, 1);
    }

    #[test]
    fn beat_without_record_is_instance_not_found() {
        let (_dir, store) = setup();
        let err = store.beat(&id("aaaaaaaa")).unwrap_err();
        assert!(matches!(err, CoordError::InstanceNotFound(_)));
        assert!(store.get(&id("aaaaaaaa")).unwrap().is_none());
    }

    #[test]
    fn staleness_depends_only_on_last_seen() {
        let now = Utc::now();
        let timeout = Duration::from_secs(60);
        let fresh = HeartbeatRecord::new(id("aaaaaaaa"), now - TimeDelta::seconds(59));
        let old = HeartbeatRecord::new(id("bbbbbbbb"), now - TimeDelta::seconds(61));
        let future = HeartbeatRecord::new(id("cccccccc"), now + TimeDelta::seconds(600));

        assert!(!is_stale(&fresh, timeout, now));
        assert!(is_stale(&old, timeout, now));
        assert!(!is_stale(&future, timeout, now));
        // stored status does not rescue an old record
        assert_eq!(old.status, HeartbeatStatus::Active);
        assert_eq!(effective_status(&old, timeout, now), HeartbeatStatus::Stale);
        assert_eq!(effective_status(&fresh, timeout, now), HeartbeatStatus::Active);
    }

    #[test]
    fn list_and_stale_scan() {
        let (_dir, store) = setup();
        let now = Utc::now();
        store.create(&id("aaaaaaaa"), now).unwrap();
        store
            .create(&id("bbbbbbbb"), now - TimeDelta::minutes(10))
            .unwrap();
        // leftover temp files are ignored
        fs::write(store.dir.join(".claude-x.json.1.0.tmp"), "partial").unwrap();

        assert_eq!(store.count().unwrap(), 2);
        let stale = store.stale(Duration::from_secs(60), now).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].instance_id, id("bbbbbbbb"));
    }

    #[test]
    fn corrupt_record_is_surfaced() {
        let (_dir, store) = setup();
        fs::write(store.dir.join("claude-20250314-092653-aaaaaaaa.json"), "nope").unwrap();
        assert!(matches!(
            store.list().unwrap_err(),
            CoordError::CorruptDocument(_, _)
        ));
    }

    #[test]
    fn beat_after_remove_is_not_found_and_leaves_no_file() {
        let (_dir, store) = setup();
        let a = id("aaaaaaaa");
        store.create(&a, Utc::now()).unwrap();
        store.beat(&a).unwrap();
        store.remove(&a).unwrap();

        assert!(matches!(
            store.beat(&a).unwrap_err(),
            CoordError::InstanceNotFound(_)
        ));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn beat_waits_for_a_removal_in_progress() {
        let (_dir, store) = setup();
        let a = id("aaaaaaaa");
        store.create(&a, Utc::now()).unwrap();

        // hold the write lock the way a concurrent remove would
        let held = lock::acquire_lock(&store.dir.join(WRITE_LOCK), &store.retry).unwrap();
        let impatient = RetryPolicy {
            attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let other = HeartbeatStore {
            dir: store.dir.clone(),
            retry: impatient,
        };
        assert!(matches!(
            other.beat(&a).unwrap_err(),
            CoordError::Contention { .. }
        ));
        lock::release_lock(held).unwrap();
        assert_eq!(other.beat(&a).unwrap().ping_count, 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let (_dir, store) = setup();
        let a = id("aaaaaaaa");
        store.create(&a, Utc::now()).unwrap();
        assert!(store.remove(&a).unwrap());
        assert!(!store.remove(&a).unwrap());
    }

    #[test]
    fn list_on_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let store = HeartbeatStore::open(&dir.path().join("nowhere"), RetryPolicy::default());
        assert!(store.list().unwrap().is_empty());
    }
}
