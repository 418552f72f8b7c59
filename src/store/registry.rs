use std::path::Path;

use crate::config::RetryPolicy;
use crate::error::Result;
use crate::instance_id::InstanceId;
use crate::model::{Instance, RegistryDocument};
use crate::store::document::{DocumentStore, JsonFile};

pub const REGISTRY_FILE: &str = "work-registry.json";

/// Durable collection of live instances (`work-registry.json`).
///
/// All mutations go through [`DocumentStore::transact`], so concurrent
/// registrations from different processes serialize without lost updates.
pub struct RegistryStore<S = JsonFile<RegistryDocument>> {
    doc: S,
}

impl RegistryStore {
    pub fn open(root: &Path, retry: RetryPolicy) -> Self {
        Self {
            doc: JsonFile::new(root.join(REGISTRY_FILE), retry),
        }
    }

    /// Create an empty registry if absent. Returns whether one was created.
    pub fn ensure(&self) -> Result<bool> {
        self.doc.ensure()
    }

    /// Replace the registry with an empty document.
    ///
    /// Corrupt registries are never reset implicitly; this is the explicit
    /// caller-side recovery path.
    pub fn reset(&self) -> Result<()> {
        tracing::warn!(path = %self.doc.path().display(), "resetting instance registry");
        self.doc.reset()
    }
}

impl<S: DocumentStore<RegistryDocument>> RegistryStore<S> {
    pub fn with_store(doc: S) -> Self {
        Self { doc }
    }

    pub fn list(&self) -> Result<Vec<Instance>> {
        Ok(self.doc.snapshot()?.instances)
    }

    /// Append `instance`. Returns `false` (and changes nothing) if a row with
    /// the same id already exists.
    pub fn insert(&self, instance: Instance) -> Result<bool> {
        self.doc.transact(|doc| {
            if doc.contains(&instance.instance_id) {
                return Ok(false);
            }
            doc.instances.push(instance);
            Ok(true)
        })
    }

    /// Remove the row for `id`, if any.
    pub fn remove(&self, id: &InstanceId) -> Result<Option<Instance>> {
        self.doc.transact(|doc| {
            let pos = doc.instances.iter().position(|i| &i.instance_id == id);
            Ok(pos.map(|pos| doc.instances.remove(pos)))
        })
    }

    /// Run `f` over the rows inside one transaction, with the registry lock
    /// held. Changes are persisted only if `f` succeeds.
    pub fn update<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Vec<Instance>) -> Result<R>,
    {
        self.doc.transact(|doc| f(&mut doc.instances))
    }
}
