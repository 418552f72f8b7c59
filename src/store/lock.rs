use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::config::RetryPolicy;
use crate::error::{CoordError, Result};

/// Acquire an exclusive advisory lock on `path`, returning the locked handle.
///
/// Retries per `retry` and then fails with `Contention`; never blocks
/// indefinitely. The lock is released when the handle is dropped, and by the
/// OS if the holding process dies.
pub fn acquire_lock(path: &Path, retry: &RetryPolicy) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    for attempt in 0..retry.attempts {
        std::thread::sleep(retry.delay_before(attempt));
        if file.try_lock_exclusive().is_ok() {
            if attempt > 0 {
                tracing::debug!(path = %path.display(), attempt, "serialization lock acquired after retry");
            }
            return Ok(file);
        }
    }

    tracing::debug!(path = %path.display(), attempts = retry.attempts, "serialization lock contended");
    Err(CoordError::Contention {
        path: path.display().to_string(),
        attempts: retry.attempts,
    })
}

/// Release lock explicitly (normally handled by Drop).
pub fn release_lock(file: File) -> Result<()> {
    FileExt::unlock(&file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn quick() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn acquire_and_release_lock() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("test.lock");

        let file = acquire_lock(&lock_path, &quick()).unwrap();
        // Held; a second handle must not get it
        assert!(acquire_lock(&lock_path, &quick()).is_err());
        release_lock(file).unwrap();
        let _file = acquire_lock(&lock_path, &quick()).unwrap();
    }

    #[test]
    fn drop_releases_lock() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("drop.lock");
        {
            let _held = acquire_lock(&lock_path, &quick()).unwrap();
        }
        acquire_lock(&lock_path, &quick()).unwrap();
    }

    #[test]
    fn contention_after_retry_budget() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("busy.lock");
        let _held = acquire_lock(&lock_path, &quick()).unwrap();

        let policy = RetryPolicy {
            attempts: 4,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(40),
        };
        let start = Instant::now();
        let err = acquire_lock(&lock_path, &policy).unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, CoordError::Contention { attempts: 4, .. }));
        // 20 + 40 + 40 ms of backoff
        assert!(elapsed >= Duration::from_millis(100), "elapsed {elapsed:?}");
    }
}
