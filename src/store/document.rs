//! Locked read-modify-write of small JSON documents.
//!
//! Every mutation follows the same protocol: take the sidecar lock, read the
//! whole document, mutate it in memory, write a temp file in the same
//! directory, fsync, rename over the original, unlock. Readers never take the
//! lock; they see either the old or the new document.

use std::fs;
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::RetryPolicy;
use crate::error::{CoordError, Result};
use crate::store::lock;

/// Transaction boundary around one persisted aggregate.
///
/// The registry and the decision log only talk to their backing storage
/// through this trait, so a different backend can replace the JSON files.
pub trait DocumentStore<T> {
    /// Current contents without taking the serialization lock.
    fn snapshot(&self) -> Result<T>;

    /// Run `f` against the document under the serialization lock and persist
    /// the result if it changed. An error from `f` leaves the document as is.
    fn transact<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut T) -> Result<R>;
}

/// A JSON document guarded by a sibling `.<name>.lock` file.
pub struct JsonFile<T> {
    path: PathBuf,
    lock_path: PathBuf,
    retry: RetryPolicy,
    _doc: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + PartialEq,
{
    pub fn new(path: PathBuf, retry: RetryPolicy) -> Self {
        let file_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".into());
        let lock_path = path.with_file_name(format!(".{file_name}.lock"));
        Self {
            path,
            lock_path,
            retry,
            _doc: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write an empty document if none exists. Never overwrites.
    pub fn ensure(&self) -> Result<bool> {
        create_json_exclusive(&self.path, &T::default())
    }

    /// Replace the document with an empty one under the lock.
    pub fn reset(&self) -> Result<()> {
        let guard = lock::acquire_lock(&self.lock_path, &self.retry)?;
        write_json_atomic(&self.path, &T::default())?;
        lock::release_lock(guard)?;
        Ok(())
    }

    fn read(&self) -> Result<T> {
        if !self.path.exists() {
            let root = self
                .path
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            return Err(CoordError::NotInitialized(root));
        }
        read_json(&self.path)
    }
}

impl<T> DocumentStore<T> for JsonFile<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + PartialEq,
{
    fn snapshot(&self) -> Result<T> {
        self.read()
    }

    fn transact<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut T) -> Result<R>,
    {
        let guard = lock::acquire_lock(&self.lock_path, &self.retry)?;
        let before = self.read()?;
        let mut doc = before.clone();
        let out = f(&mut doc)?;
        if doc != before {
            write_json_atomic(&self.path, &doc)?;
            tracing::debug!(path = %self.path.display(), "document committed");
        }
        lock::release_lock(guard)?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// File primitives
// ---------------------------------------------------------------------------

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique sibling temp path, so rename and hard-link stay on one filesystem.
fn temp_path_for(path: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.{n}.tmp", std::process::id()))
}

fn write_temp<V: Serialize>(path: &Path, value: &V) -> Result<PathBuf> {
    let tmp = temp_path_for(path);
    let json = serde_json::to_string_pretty(value)?;
    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(tmp)
}

/// Read and parse a JSON file; parse failures are `CorruptDocument`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| CoordError::CorruptDocument(path.display().to_string(), e.to_string()))
}

/// Like [`read_json`] but a missing file is `None`.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| CoordError::CorruptDocument(path.display().to_string(), e.to_string())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Replace `path` atomically with `value` (temp file + rename).
pub fn write_json_atomic<V: Serialize>(path: &Path, value: &V) -> Result<()> {
    let tmp = write_temp(path, value)?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

/// Create `path` holding `value` only if it does not exist yet.
///
/// The record is fully written before it becomes visible: the temp file is
/// hard-linked into place, which fails atomically when the target exists.
/// Returns `false` if the file was already present.
pub fn create_json_exclusive<V: Serialize>(path: &Path, value: &V) -> Result<bool> {
    let tmp = write_temp(path, value)?;
    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);
    match linked {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Remove a file, treating "already gone" as success. Returns whether it existed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::Duration;
    use tempfile::tempdir;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        items: Vec<u32>,
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 50,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        }
    }

    fn leftover_temps(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[test]
    fn ensure_never_overwrites() {
        let dir = tempdir().unwrap();
        let file: JsonFile<Doc> = JsonFile::new(dir.path().join("doc.json"), retry());
        assert!(file.ensure().unwrap());
        file.transact(|d| {
            d.items.push(7);
            Ok(())
        })
        .unwrap();
        assert!(!file.ensure().unwrap());
        assert_eq!(file.snapshot().unwrap().items, vec![7]);
        assert_eq!(leftover_temps(dir.path()), 0);
    }

    #[test]
    fn snapshot_of_missing_document_is_not_initialized() {
        let dir = tempdir().unwrap();
        let file: JsonFile<Doc> = JsonFile::new(dir.path().join("doc.json"), retry());
        assert!(matches!(
            file.snapshot().unwrap_err(),
            CoordError::NotInitialized(_)
        ));
    }

    #[test]
    fn failed_transaction_leaves_document_untouched() {
        let dir = tempdir().unwrap();
        let file: JsonFile<Doc> = JsonFile::new(dir.path().join("doc.json"), retry());
        file.ensure().unwrap();
        let err = file
            .transact(|d| -> Result<()> {
                d.items.push(1);
                Err(CoordError::InvalidDecision("nope".into()))
            })
            .unwrap_err();
        assert!(matches!(err, CoordError::InvalidDecision(_)));
        assert!(file.snapshot().unwrap().items.is_empty());
    }

    #[test]
    fn corrupt_document_is_surfaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, "NOT JSON").unwrap();
        let file: JsonFile<Doc> = JsonFile::new(path, retry());
        assert!(matches!(
            file.snapshot().unwrap_err(),
            CoordError::CorruptDocument(_, _)
        ));
        assert!(matches!(
            file.transact(|_| Ok(())).unwrap_err(),
            CoordError::CorruptDocument(_, _)
        ));
    }

    #[test]
    fn concurrent_transactions_do_not_lose_updates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        JsonFile::<Doc>::new(path.clone(), retry()).ensure().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let file: JsonFile<Doc> = JsonFile::new(path, retry());
                    for i in 0..10 {
                        file.transact(|d| {
                            d.items.push(t * 100 + i);
                            Ok(())
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let doc = JsonFile::<Doc>::new(path, retry()).snapshot().unwrap();
        assert_eq!(doc.items.len(), 80);
    }

    #[test]
    fn exclusive_create_reports_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("claim.json");
        assert!(create_json_exclusive(&path, &Doc { items: vec![1] }).unwrap());
        assert!(!create_json_exclusive(&path, &Doc { items: vec![2] }).unwrap());
        let doc: Doc = read_json(&path).unwrap();
        assert_eq!(doc.items, vec![1]);
        assert_eq!(leftover_temps(dir.path()), 0);
    }

    #[test]
    fn remove_if_exists_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.json");
        fs::write(&path, "{}").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert!(!remove_if_exists(&path).unwrap());
        assert!(read_json_opt::<Doc>(&path).unwrap().is_none());
    }
}
