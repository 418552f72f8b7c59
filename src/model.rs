use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::instance_id::InstanceId;

pub const DECISION_LOG_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// What an instance says it is working on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskInfo {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
}

/// A registered, running assistant process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    pub instance_id: InstanceId,
    pub pid: u32,
    pub task: TaskInfo,
    pub registered_at: DateTime<Utc>,
}

/// `work-registry.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryDocument {
    #[serde(default)]
    pub instances: Vec<Instance>,
}

impl RegistryDocument {
    pub fn contains(&self, id: &InstanceId) -> bool {
        self.instances.iter().any(|i| &i.instance_id == id)
    }
}

// ---------------------------------------------------------------------------
// Heartbeats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    Active,
    Stale,
}

impl fmt::Display for HeartbeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

/// `heartbeats/<instance_id>.json`, owned by a single instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatRecord {
    pub instance_id: InstanceId,
    pub status: HeartbeatStatus,
    pub ping_count: u64,
    pub last_seen: DateTime<Utc>,
}

impl HeartbeatRecord {
    pub fn new(instance_id: InstanceId, now: DateTime<Utc>) -> Self {
        Self {
            instance_id,
            status: HeartbeatStatus::Active,
            ping_count: 0,
            last_seen: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

/// `locks/<name>.json`: an advisory claim on one file path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockRecord {
    pub resource_path: String,
    pub holder_instance_id: InstanceId,
    pub holder_pid: u32,
    #[serde(default)]
    pub reason: String,
    pub acquired_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MadeBy {
    pub instance_id: InstanceId,
}

/// One immutable entry of the decision log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Decision {
    pub decision_id: String,
    pub category: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scope: String,
    pub made_by: MadeBy,
    pub timestamp: DateTime<Utc>,
}

/// `decision-log.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecisionLog {
    pub version: String,
    #[serde(default)]
    pub decisions: Vec<Decision>,
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self {
            version: DECISION_LOG_VERSION.to_string(),
            decisions: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InstanceStatus {
    pub instance: Instance,
    pub heartbeat: Option<HeartbeatRecord>,
    pub stale: bool,
    pub locks_held: usize,
}

/// Read-only snapshot of a coordination directory.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub root: PathBuf,
    pub generated_at: DateTime<Utc>,
    pub stale_after_secs: u64,
    pub instances: Vec<InstanceStatus>,
    pub locks: Vec<LockRecord>,
    /// Heartbeat files with no matching registry row.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orphan_heartbeats: Vec<InstanceId>,
    pub decision_count: usize,
}

impl StatusReport {
    pub fn active_count(&self) -> usize {
        self.instances.iter().filter(|i| !i.stale).count()
    }

    pub fn stale_count(&self) -> usize {
        self.instances.iter().filter(|i| i.stale).count()
    }
}
