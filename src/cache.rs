use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crate::config::Config;
use crate::data::loader::{load_file, parquet_metadata, write_parquet_tagged};
use crate::data::Table;
use crate::error::{PlotError, Result};
use crate::source::SourceKey;

const META_SOURCE: &str = "source";
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// A lock older than this is left over from a crashed writer.
const STALE_LOCK: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// AverageCache – memoised rate averages on disk
// ---------------------------------------------------------------------------

/// One parquet file per averaged source, `avg<sha256>.parquet`, written by
/// at most one process at a time.
///
/// Writers take `avg<sha256>.lock` with exclusive creation, write to a
/// temporary file and rename it into place, so readers never observe a
/// half-written entry. Busy and corrupt entries are logged as
/// [`PlotError::TransientCache`] and recomputed.
#[derive(Debug, Clone)]
pub struct AverageCache {
    dir: PathBuf,
    use_cached: bool,
    wait: Duration,
}

impl AverageCache {
    pub fn new(dir: impl Into<PathBuf>, use_cached: bool, wait: Duration) -> Self {
        Self {
            dir: dir.into(),
            use_cached,
            wait,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.cache_path(),
            config.usecache,
            Duration::from_millis(config.cache_wait_ms),
        )
    }

    pub fn entry_path(&self, key: &SourceKey) -> Result<PathBuf> {
        Ok(self.dir.join(format!("avg{}.parquet", key.stable_hash()?)))
    }

    /// Replay the cached average of `key`, or run `compute` and store its
    /// result. With caching disabled the entry is recomputed and replaced.
    pub fn get_or_compute(
        &self,
        key: &SourceKey,
        compute: impl FnOnce() -> Result<Table>,
    ) -> Result<Table> {
        let entry = self.entry_path(key)?;

        if self.use_cached {
            if let Some(table) = self.read(&entry, key) {
                return Ok(table);
            }
        }

        let Some(_lock) = self.acquire(&entry, key)? else {
            // another writer holds the entry past our patience
            if self.use_cached {
                if let Some(table) = self.read(&entry, key) {
                    return Ok(table);
                }
            }
            log::warn!(
                "{}",
                transient(&entry, "still locked by another writer, computing without caching")
            );
            return compute();
        };

        // a writer may have finished while we waited for the lock
        if self.use_cached {
            if let Some(table) = self.read(&entry, key) {
                return Ok(table);
            }
        }

        let table = compute()?;
        self.write(&entry, key, &table);
        Ok(table)
    }

    /// A valid entry for `key`, or `None`. Corrupt entries are removed.
    fn read(&self, entry: &Path, key: &SourceKey) -> Option<Table> {
        if !entry.is_file() {
            return None;
        }
        let loaded = parquet_metadata(entry).and_then(|meta| {
            let source = meta.get(META_SOURCE).cloned().unwrap_or_default();
            if source != key.to_string() {
                anyhow::bail!("entry belongs to source `{source}`");
            }
            let path = meta.get("path").cloned().unwrap_or_else(|| key.table.clone());
            load_file(entry, &path)
        });

        match loaded {
            Ok(table) => {
                log::debug!("Average of {key} from {}", entry.display());
                Some(table)
            }
            Err(e) => {
                log::warn!("{}", transient(entry, &format!("{e:#}")));
                let _ = fs::remove_file(entry);
                None
            }
        }
    }

    fn write(&self, entry: &Path, key: &SourceKey, table: &Table) {
        let tmp = entry.with_extension(format!("parquet.{}.tmp", std::process::id()));
        let source = key.to_string();
        let result = write_parquet_tagged(&tmp, table, &[(META_SOURCE, &source)])
            .and_then(|_| fs::rename(&tmp, entry).map_err(anyhow::Error::from));
        match result {
            Ok(()) => log::info!("Cached average of {key} in {}", entry.display()),
            Err(e) => {
                log::warn!("Failed to cache average of {key}: {e:#}");
                let _ = fs::remove_file(&tmp);
            }
        }
    }

    /// Take the writer lock of `entry`, waiting at most `self.wait`.
    fn acquire(&self, entry: &Path, key: &SourceKey) -> Result<Option<LockGuard>> {
        fs::create_dir_all(&self.dir)?;
        let lock = entry.with_extension("lock");
        let deadline = Instant::now() + self.wait;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&lock) {
                Ok(_) => return Ok(Some(LockGuard(lock))),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if break_stale_lock(&lock) {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    log::debug!("Waiting for cache writer of {key}");
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn transient(entry: &Path, reason: &str) -> PlotError {
    PlotError::TransientCache {
        entry: entry.display().to_string(),
        reason: reason.to_string(),
    }
}

fn is_stale(lock: &Path) -> bool {
    fs::metadata(lock)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .is_some_and(|age| age > STALE_LOCK)
}

/// Remove `lock` if it is older than `STALE_LOCK`.
///
/// The lock is first renamed aside, so of several waiters only one takes the
/// file. If the file taken turns out to be fresh, another waiter replaced the
/// stale lock in between and it is put back.
fn break_stale_lock(lock: &Path) -> bool {
    if !is_stale(lock) {
        return false;
    }
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.subsec_nanos());
    let aside = lock.with_extension(format!("lock.{}.{nanos}.stale", std::process::id()));
    if fs::rename(lock, &aside).is_err() {
        return false;
    }
    if !is_stale(&aside) {
        // fails when a new lock exists already, which is fine either way
        let _ = fs::hard_link(&aside, lock);
        let _ = fs::remove_file(&aside);
        return false;
    }
    log::warn!("Removing stale cache lock {}", lock.display());
    let _ = fs::remove_file(&aside);
    true
}

/// Removes the lock file when dropped.
struct LockGuard(PathBuf);

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn averaged() -> Table {
        Table::new(
            "weather",
            "/raw/weather",
            vec!["time".into(), "T_a".into(), "count".into()],
            vec!["s".into(), "°C".into(), "1".into()],
            vec![vec![5.0, 15.0], vec![0.1 + 0.2, -1.0 / 3.0], vec![4.0, 4.0]],
        )
        .unwrap()
    }

    fn key() -> SourceKey {
        SourceKey::parse("sample:/raw/weather:10:1:None").unwrap()
    }

    #[test]
    fn second_request_replays_identical_rows() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AverageCache::new(dir.path(), true, Duration::from_millis(100));
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok(averaged())
        };

        let cold = cache.get_or_compute(&key(), compute).unwrap();
        let warm = cache
            .get_or_compute(&key(), || {
                calls.set(calls.get() + 1);
                Ok(averaged())
            })
            .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(cold, warm);
        assert!(cache.entry_path(&key()).unwrap().is_file());
        assert!(!cache.entry_path(&key()).unwrap().with_extension("lock").exists());
    }

    #[test]
    fn corrupt_entry_is_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AverageCache::new(dir.path(), true, Duration::from_millis(100));
        let entry = cache.entry_path(&key()).unwrap();
        fs::write(&entry, b"PAR1 truncated").unwrap();

        let table = cache.get_or_compute(&key(), || Ok(averaged())).unwrap();
        assert_eq!(table, averaged());
        // replaced by a valid entry
        assert!(cache.read(&entry, &key()).is_some());
    }

    #[test]
    fn busy_entry_falls_back_to_computing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AverageCache::new(dir.path(), true, Duration::from_millis(60));
        let entry = cache.entry_path(&key()).unwrap();
        fs::write(entry.with_extension("lock"), b"").unwrap();

        let table = cache.get_or_compute(&key(), || Ok(averaged())).unwrap();
        assert_eq!(table, averaged());
        assert!(!entry.exists());
    }

    #[test]
    fn only_stale_locks_are_broken() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("avg0.lock");

        fs::write(&lock, b"").unwrap();
        assert!(!break_stale_lock(&lock));
        assert!(lock.exists());

        let old = SystemTime::now() - 2 * STALE_LOCK;
        fs::File::options().write(true).open(&lock).unwrap().set_modified(old).unwrap();
        assert!(break_stale_lock(&lock));
        assert!(!lock.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        // a second waiter finds nothing left to break
        assert!(!break_stale_lock(&lock));
    }

    #[test]
    fn disabled_cache_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AverageCache::new(dir.path(), false, Duration::from_millis(60));
        let calls = Cell::new(0);
        for _ in 0..2 {
            cache
                .get_or_compute(&key(), || {
                    calls.set(calls.get() + 1);
                    Ok(averaged())
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 2);
    }
}
