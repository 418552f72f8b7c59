//! Entry point tying the stores of one coordination directory together.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{TimeDelta, Utc};

use crate::config::CoordConfig;
use crate::error::{CoordError, Result};
use crate::instance_id::InstanceId;
use crate::model::{
    Decision, HeartbeatRecord, Instance, InstanceStatus, LockRecord, StatusReport, TaskInfo,
};
use crate::store::decisions::{DecisionFilter, DecisionStore, NewDecision};
use crate::store::heartbeat::{HeartbeatStore, effective_status, is_stale};
use crate::store::lock_manager::{LockManager, LockOutcome, ReleaseOutcome};
use crate::store::registry::RegistryStore;

const MAX_ID_ATTEMPTS: u32 = 5;

/// What `init` found or created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct InitReport {
    pub created_registry: bool,
    pub created_decision_log: bool,
}

/// What `unregister` cleaned up.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Departure {
    pub instance_id: InstanceId,
    pub was_registered: bool,
    pub heartbeat_removed: bool,
    pub released_locks: Vec<String>,
}

/// All coordination operations for one directory.
pub struct Coordinator {
    config: CoordConfig,
    pid: u32,
    registry: RegistryStore,
    heartbeats: HeartbeatStore,
    locks: LockManager,
    decisions: DecisionStore,
}

impl Coordinator {
    /// Open `config.root`; relative lock paths resolve against the cwd.
    pub fn open(config: CoordConfig) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Self::with_base_dir(config, cwd)
    }

    pub fn with_base_dir(config: CoordConfig, base_dir: PathBuf) -> Result<Self> {
        config.validate()?;
        let root = config.root.clone();
        Ok(Self {
            pid: std::process::id(),
            registry: RegistryStore::open(&root, config.lock_retry),
            heartbeats: HeartbeatStore::open(&root, config.lock_retry),
            locks: LockManager::open(&root, base_dir, config.lock_retry, config.lock_max_age),
            decisions: DecisionStore::open(&root, config.lock_retry),
            config,
        })
    }

    /// Record `pid` as the owning process instead of this process.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn config(&self) -> &CoordConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.root().join(crate::store::registry::REGISTRY_FILE).exists()
    }

    fn require_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CoordError::NotInitialized(self.root().display().to_string()))
        }
    }

    // -- lifecycle ----------------------------------------------------------

    /// Create the directory tree and empty documents. Never overwrites.
    pub fn init(&self) -> Result<InitReport> {
        fs::create_dir_all(self.root())?;
        self.locks.ensure_dir()?;
        self.heartbeats.ensure_dir()?;
        let report = InitReport {
            created_registry: self.registry.ensure()?,
            created_decision_log: self.decisions.ensure()?,
        };
        tracing::debug!(root = %self.root().display(), ?report, "coordination directory ready");
        Ok(report)
    }

    /// Replace a (possibly corrupt) registry with an empty one.
    pub fn reset_registry(&self) -> Result<()> {
        self.require_initialized()?;
        self.registry.reset()
    }

    /// Register a new instance and return its id.
    pub fn register(&self, task_description: &str, agent_type: Option<&str>) -> Result<InstanceId> {
        Ok(self.register_instance(task_description, agent_type)?.instance_id)
    }

    /// Register and return the full registry row.
    ///
    /// The heartbeat record is created first (exclusively), then the row is
    /// appended; an exact id collision on either step retries with a new id.
    pub fn register_instance(
        &self,
        task_description: &str,
        agent_type: Option<&str>,
    ) -> Result<Instance> {
        self.require_initialized()?;
        let task = TaskInfo {
            description: task_description.trim().to_string(),
            agent_type: agent_type
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        };

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = InstanceId::generate(&self.config.id_prefix)?;
            let now = Utc::now();
            if !self.heartbeats.create(&id, now)? {
                tracing::debug!(instance = %id, "instance id collision on heartbeat");
                continue;
            }
            let instance = Instance {
                instance_id: id.clone(),
                pid: self.pid,
                task: task.clone(),
                registered_at: now,
            };
            match self.registry.insert(instance.clone()) {
                Ok(true) => {
                    tracing::info!(instance = %id, pid = self.pid, "instance registered");
                    return Ok(instance);
                }
                Ok(false) => {
                    self.heartbeats.remove(&id)?;
                    tracing::debug!(instance = %id, "instance id collision in registry");
                }
                Err(err) => {
                    let _ = self.heartbeats.remove(&id);
                    return Err(err);
                }
            }
        }
        Err(CoordError::IdCollision(MAX_ID_ATTEMPTS))
    }

    /// Remove the row, heartbeat and locks of `id`. Absent ids are fine.
    pub fn unregister(&self, id: &InstanceId) -> Result<Departure> {
        self.require_initialized()?;
        let released_locks = self.locks.release_all(id)?;
        let was_registered = self.registry.remove(id)?.is_some();
        let heartbeat_removed = self.heartbeats.remove(id)?;
        if was_registered {
            tracing::info!(instance = %id, locks = released_locks.len(), "instance unregistered");
        }
        Ok(Departure {
            instance_id: id.clone(),
            was_registered,
            heartbeat_removed,
            released_locks,
        })
    }

    pub fn list_instances(&self) -> Result<Vec<Instance>> {
        self.registry.list()
    }

    // -- liveness -----------------------------------------------------------

    pub fn heartbeat(&self, id: &InstanceId) -> Result<HeartbeatRecord> {
        self.heartbeats.beat(id)
    }

    pub fn heartbeat_of(&self, id: &InstanceId) -> Result<Option<HeartbeatRecord>> {
        self.heartbeats.get(id)
    }

    /// `reap_stale` with the configured timeout.
    pub fn reap(&self) -> Result<Vec<InstanceId>> {
        self.reap_stale(self.config.stale_after)
    }

    /// Remove instances whose heartbeat is older than `timeout`.
    ///
    /// Also reaps rows that never got a heartbeat file and are older than
    /// `timeout`, and stale heartbeat files with no row. Reaped instances'
    /// locks are released. Safe to run from several processes at once.
    pub fn reap_stale(&self, timeout: Duration) -> Result<Vec<InstanceId>> {
        self.require_initialized()?;
        let now = Utc::now();

        let mut reaped = self.registry.update(|instances| {
            let mut reaped = Vec::new();
            let mut kept = Vec::with_capacity(instances.len());
            for instance in instances.drain(..) {
                // Re-read under the registry lock: the instance may have pinged.
                let stale = match self.heartbeats.get(&instance.instance_id)? {
                    Some(record) => is_stale(&record, timeout, now),
                    None => registered_longer_than(&instance, timeout, now),
                };
                if stale {
                    reaped.push(instance.instance_id);
                } else {
                    kept.push(instance);
                }
            }
            *instances = kept;

            for record in self.heartbeats.stale(timeout, now)? {
                let id = record.instance_id;
                if !reaped.contains(&id) && !instances.iter().any(|i| i.instance_id == id) {
                    reaped.push(id);
                }
            }
            // Files go while the registry lock is held, so each id is
            // reaped by exactly one caller.
            for id in &reaped {
                self.heartbeats.remove(id)?;
            }
            Ok(reaped)
        })?;
        reaped.sort();

        let released = self.locks.release_held_by(&reaped)?;
        if !reaped.is_empty() {
            tracing::info!(
                count = reaped.len(),
                locks_released = released.len(),
                "reaped stale instances"
            );
        }
        Ok(reaped)
    }

    // -- locks --------------------------------------------------------------

    pub fn acquire(&self, id: &InstanceId, resource_path: &str, reason: &str) -> Result<LockOutcome> {
        self.require_initialized()?;
        self.locks.acquire(id, self.pid, resource_path, reason)
    }

    pub fn check(&self, id: &InstanceId, resource_path: &str) -> Result<bool> {
        self.locks.check(id, resource_path)
    }

    pub fn lock_holder(&self, resource_path: &str) -> Result<Option<LockRecord>> {
        self.locks.holder(resource_path)
    }

    pub fn release(&self, id: &InstanceId, resource_path: &str) -> Result<ReleaseOutcome> {
        self.require_initialized()?;
        self.locks.release(id, resource_path)
    }

    pub fn release_all(&self, id: &InstanceId) -> Result<Vec<String>> {
        self.require_initialized()?;
        self.locks.release_all(id)
    }

    pub fn force_release(&self, resource_path: &str) -> Result<Option<LockRecord>> {
        self.require_initialized()?;
        self.locks.force_release(resource_path)
    }

    pub fn list_locks(&self) -> Result<Vec<LockRecord>> {
        self.locks.list()
    }

    // -- decisions ----------------------------------------------------------

    pub fn log_decision(&self, id: &InstanceId, decision: NewDecision) -> Result<Decision> {
        self.decisions.append(id, decision)
    }

    pub fn list_decisions(&self, filter: &DecisionFilter) -> Result<Vec<Decision>> {
        self.decisions.list(filter)
    }

    // -- status -------------------------------------------------------------

    /// Read-only snapshot of instances, liveness and locks.
    pub fn status(&self) -> Result<StatusReport> {
        let now = Utc::now();
        let timeout = self.config.stale_after;
        let instances = self.registry.list()?;
        let locks = self.locks.list()?;
        let mut heartbeats: BTreeMap<InstanceId, HeartbeatRecord> = self
            .heartbeats
            .list()?
            .into_iter()
            .map(|r| (r.instance_id.clone(), r))
            .collect();

        let instances: Vec<InstanceStatus> = instances
            .into_iter()
            .map(|instance| {
                let heartbeat = heartbeats.remove(&instance.instance_id).map(|mut record| {
                    record.status = effective_status(&record, timeout, now);
                    record
                });
                let stale = match &heartbeat {
                    Some(record) => is_stale(record, timeout, now),
                    None => registered_longer_than(&instance, timeout, now),
                };
                let locks_held = locks
                    .iter()
                    .filter(|l| l.holder_instance_id == instance.instance_id)
                    .count();
                InstanceStatus {
                    instance,
                    heartbeat,
                    stale,
                    locks_held,
                }
            })
            .collect();

        Ok(StatusReport {
            root: self.root().to_path_buf(),
            generated_at: now,
            stale_after_secs: timeout.as_secs(),
            instances,
            locks,
            orphan_heartbeats: heartbeats.into_keys().collect(),
            decision_count: self.decisions.count()?,
        })
    }

    /// Bind operations to the calling instance.
    pub fn participant(&self, id: InstanceId) -> Participant<'_> {
        Participant { coord: self, id }
    }
}

fn registered_longer_than(instance: &Instance, timeout: Duration, now: chrono::DateTime<Utc>) -> bool {
    let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
    now.signed_duration_since(instance.registered_at) > timeout
}

/// The coordinator as seen by one registered instance.
pub struct Participant<'a> {
    coord: &'a Coordinator,
    id: InstanceId,
}

impl Participant<'_> {
    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub fn heartbeat(&self) -> Result<HeartbeatRecord> {
        self.coord.heartbeat(&self.id)
    }

    pub fn acquire(&self, resource_path: &str, reason: &str) -> Result<LockOutcome> {
        self.coord.acquire(&self.id, resource_path, reason)
    }

    pub fn check(&self, resource_path: &str) -> Result<bool> {
        self.coord.check(&self.id, resource_path)
    }

    pub fn release(&self, resource_path: &str) -> Result<ReleaseOutcome> {
        self.coord.release(&self.id, resource_path)
    }

    pub fn release_all(&self) -> Result<Vec<String>> {
        self.coord.release_all(&self.id)
    }

    pub fn log_decision(&self, decision: NewDecision) -> Result<Decision> {
        self.coord.log_decision(&self.id, decision)
    }

    pub fn unregister(self) -> Result<Departure> {
        self.coord.unregister(&self.id)
    }
}
