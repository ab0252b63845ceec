use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const API_DIR: &str = "api";
const ASSETS_DIR: &str = "assets";
const LOCK_FILE: &str = ".lock";
const META_SUFFIX: &str = ".meta.json";
const LOCK_TIMEOUT_SECS: u64 = 5;
const LOCK_RETRY_MS: u64 = 50;

/// How cache reads behave for the current run.
///
/// `Bypassed` turns every read into a miss without deleting anything;
/// `Forced` treats every entry as fresh regardless of TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Enabled,
    Bypassed,
    Forced,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    stored_at: u64,
    ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub api_entries: usize,
    pub asset_entries: usize,
    pub total_bytes: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
}

/// Durable key→payload store with per-entry TTL, shared by the release
/// resolver (API responses) and the installer (downloaded assets).
///
/// Writers take an exclusive advisory lock on the store; readers never block
/// on it and may transiently miss during a concurrent write, which callers
/// handle by re-fetching. Every write lands via temp-file + rename so a
/// reader never observes a partially written entry. Cache failures degrade
/// to misses; they are never surfaced as operation errors.
pub struct CacheStore {
    root: PathBuf,
    mode: CacheMode,
}

struct StoreLock {
    file: fs::File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn entry_name(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

impl CacheStore {
    pub fn new(root: PathBuf, mode: CacheMode) -> Self {
        Self { root, mode }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(self.root.join(API_DIR))?;
        fs::create_dir_all(self.root.join(ASSETS_DIR))?;
        Ok(())
    }

    fn lock_exclusive(&self) -> std::io::Result<StoreLock> {
        self.ensure_dirs()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root.join(LOCK_FILE))?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(StoreLock { file }),
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err);
                    }
                    if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) {
                        return Err(std::io::Error::new(
                            ErrorKind::TimedOut,
                            format!("timed out waiting for cache lock ({LOCK_TIMEOUT_SECS}s)"),
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
                }
            }
        }
    }

    fn payload_path(&self, ns: &str, key: &str) -> PathBuf {
        self.root.join(ns).join(entry_name(key))
    }

    fn meta_path(&self, ns: &str, key: &str) -> PathBuf {
        self.root
            .join(ns)
            .join(format!("{}{}", entry_name(key), META_SUFFIX))
    }

    /// An entry is live when its meta exists, parses, and is within TTL
    /// (or TTL is ignored in forced mode). Corrupt metadata reads as a miss.
    fn entry_is_live(&self, ns: &str, key: &str) -> bool {
        if self.mode == CacheMode::Bypassed {
            return false;
        }
        let meta: EntryMeta = match fs::read_to_string(self.meta_path(ns, key))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
        {
            Some(meta) => meta,
            None => return false,
        };
        if self.mode == CacheMode::Forced {
            return true;
        }
        now_secs().saturating_sub(meta.stored_at) <= meta.ttl_secs
    }

    fn write_entry(&self, ns: &str, key: &str, payload_src: PayloadSource<'_>, ttl_secs: u64) {
        if self.mode == CacheMode::Bypassed {
            tracing::debug!("Cache bypassed; not storing entry for {}", key);
            return;
        }
        if let Err(err) = self.try_write_entry(ns, key, payload_src, ttl_secs, now_secs()) {
            tracing::warn!("Failed to cache entry for {}: {}", key, err);
        }
    }

    fn try_write_entry(
        &self,
        ns: &str,
        key: &str,
        payload_src: PayloadSource<'_>,
        ttl_secs: u64,
        stored_at: u64,
    ) -> std::io::Result<()> {
        let _lock = self.lock_exclusive()?;

        let payload_path = self.payload_path(ns, key);
        let tmp_payload = payload_path.with_extension(format!("tmp.{}", std::process::id()));
        match payload_src {
            PayloadSource::Bytes(bytes) => fs::write(&tmp_payload, bytes)?,
            PayloadSource::File(src) => {
                fs::copy(src, &tmp_payload)?;
            }
        }
        fs::rename(&tmp_payload, &payload_path)?;

        // Meta renamed last: a reader that sees the meta always sees a
        // complete payload.
        let meta = EntryMeta {
            key: key.to_string(),
            stored_at,
            ttl_secs,
        };
        let meta_path = self.meta_path(ns, key);
        let tmp_meta = meta_path.with_extension(format!("tmp.{}", std::process::id()));
        fs::write(&tmp_meta, serde_json::to_vec(&meta)?)?;
        fs::rename(&tmp_meta, &meta_path)?;
        Ok(())
    }

    /// Read a cached API payload. Returns `None` on miss, expiry, bypass
    /// mode, or any read error.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        if !self.entry_is_live(API_DIR, key) {
            return None;
        }
        fs::read(self.payload_path(API_DIR, key)).ok()
    }

    /// Store an API payload. Never fails the caller.
    pub fn put(&self, key: &str, payload: &[u8], ttl_secs: u64) {
        self.write_entry(API_DIR, key, PayloadSource::Bytes(payload), ttl_secs);
    }

    /// Path to a cached downloaded asset, if live. The caller verifies the
    /// file's size before trusting it.
    pub fn get_file(&self, key: &str) -> Option<PathBuf> {
        if !self.entry_is_live(ASSETS_DIR, key) {
            return None;
        }
        let path = self.payload_path(ASSETS_DIR, key);
        path.is_file().then_some(path)
    }

    /// Copy a downloaded file into the asset cache.
    pub fn put_file(&self, key: &str, src: &Path, ttl_secs: u64) {
        self.write_entry(ASSETS_DIR, key, PayloadSource::File(src), ttl_secs);
    }

    /// Drop one entry from whichever namespace holds it.
    pub fn invalidate(&self, key: &str) {
        for ns in [API_DIR, ASSETS_DIR] {
            let _ = fs::remove_file(self.payload_path(ns, key));
            let _ = fs::remove_file(self.meta_path(ns, key));
        }
    }

    /// Remove every entry. Holds the writer lock for the duration.
    pub fn clear_all(&self) -> std::io::Result<()> {
        if !self.root.exists() {
            return Ok(());
        }
        let _lock = self.lock_exclusive()?;
        for ns in [API_DIR, ASSETS_DIR] {
            let dir = self.root.join(ns);
            if !dir.exists() {
                continue;
            }
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    fs::remove_file(entry.path())?;
                }
            }
        }
        Ok(())
    }

    /// Entry counts, byte totals and oldest entry. Read-only.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            api_entries: 0,
            asset_entries: 0,
            total_bytes: 0,
            oldest_entry: None,
        };

        for ns in [API_DIR, ASSETS_DIR] {
            let dir = self.root.join(ns);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.contains(".tmp.") {
                    continue;
                }
                if name.ends_with(META_SUFFIX) {
                    let stored_at = fs::read_to_string(entry.path())
                        .ok()
                        .and_then(|raw| serde_json::from_str::<EntryMeta>(&raw).ok())
                        .map(|meta| meta.stored_at);
                    if let Some(secs) = stored_at {
                        let ts = DateTime::<Utc>::from_timestamp(secs as i64, 0);
                        stats.oldest_entry = match (stats.oldest_entry, ts) {
                            (Some(cur), Some(new)) => Some(cur.min(new)),
                            (cur, new) => cur.or(new),
                        };
                    }
                    continue;
                }
                match ns {
                    API_DIR => stats.api_entries += 1,
                    _ => stats.asset_entries += 1,
                }
                if let Ok(meta) = entry.metadata() {
                    stats.total_bytes += meta.len();
                }
            }
        }

        stats
    }
}

enum PayloadSource<'a> {
    Bytes(&'a [u8]),
    File(&'a Path),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir, mode: CacheMode) -> CacheStore {
        CacheStore::new(dir.path().to_path_buf(), mode)
    }

    #[test]
    fn test_get_after_put_within_ttl() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir, CacheMode::Enabled);
        cache.put("release:owner/tool:latest", b"payload", 3600);
        assert_eq!(
            cache.get("release:owner/tool:latest").as_deref(),
            Some(b"payload".as_ref())
        );
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir, CacheMode::Enabled);
        cache
            .try_write_entry(
                API_DIR,
                "k",
                PayloadSource::Bytes(b"old"),
                10,
                now_secs() - 11,
            )
            .unwrap();
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_forced_mode_ignores_expiry() {
        let dir = TempDir::new().unwrap();
        store(&dir, CacheMode::Enabled)
            .try_write_entry(
                API_DIR,
                "k",
                PayloadSource::Bytes(b"old"),
                10,
                now_secs() - 9999,
            )
            .unwrap();
        let forced = store(&dir, CacheMode::Forced);
        assert_eq!(forced.get("k").as_deref(), Some(b"old".as_ref()));
    }

    #[test]
    fn test_bypassed_mode_misses_without_deleting() {
        let dir = TempDir::new().unwrap();
        store(&dir, CacheMode::Enabled).put("k", b"v", 3600);

        let bypassed = store(&dir, CacheMode::Bypassed);
        assert!(bypassed.get("k").is_none());

        // The entry survives for later runs with caching enabled.
        assert_eq!(
            store(&dir, CacheMode::Enabled).get("k").as_deref(),
            Some(b"v".as_ref())
        );
    }

    #[test]
    fn test_bypassed_mode_skips_writes() {
        let dir = TempDir::new().unwrap();
        store(&dir, CacheMode::Bypassed).put("k", b"v", 3600);
        assert!(store(&dir, CacheMode::Enabled).get("k").is_none());
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir, CacheMode::Enabled);
        cache.put("k", b"v", 3600);
        cache.invalidate("k");
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_clear_all_empties_both_namespaces() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir, CacheMode::Enabled);
        cache.put("api-key", b"v", 3600);
        let asset = dir.path().join("asset.bin");
        fs::write(&asset, b"binary").unwrap();
        cache.put_file("asset-key", &asset, 3600);

        cache.clear_all().unwrap();
        assert!(cache.get("api-key").is_none());
        assert!(cache.get_file("asset-key").is_none());
        let stats = cache.stats();
        assert_eq!(stats.api_entries + stats.asset_entries, 0);
    }

    #[test]
    fn test_stats_counts_entries_and_bytes() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir, CacheMode::Enabled);
        cache.put("a", b"12345", 3600);
        let asset = dir.path().join("asset.bin");
        fs::write(&asset, b"123").unwrap();
        cache.put_file("b", &asset, 3600);

        let stats = cache.stats();
        assert_eq!(stats.api_entries, 1);
        assert_eq!(stats.asset_entries, 1);
        assert_eq!(stats.total_bytes, 8);
        assert!(stats.oldest_entry.is_some());
    }

    #[test]
    fn test_corrupt_meta_reads_as_miss() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir, CacheMode::Enabled);
        cache.put("k", b"v", 3600);
        fs::write(cache.meta_path(API_DIR, "k"), b"not json").unwrap();
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_get_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir, CacheMode::Enabled);
        let src = dir.path().join("download.tar.gz");
        fs::write(&src, b"archive bytes").unwrap();
        cache.put_file("asset:abc", &src, 3600);

        let cached = cache.get_file("asset:abc").expect("cached file");
        assert_eq!(fs::read(cached).unwrap(), b"archive bytes");
    }

    #[test]
    fn test_distinct_keys_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir, CacheMode::Enabled);
        cache.put("release:owner/tool:latest", b"latest", 3600);
        cache.put("release:owner/tool:v1.0.0", b"pinned", 3600);
        assert_eq!(
            cache.get("release:owner/tool:latest").as_deref(),
            Some(b"latest".as_ref())
        );
        assert_eq!(
            cache.get("release:owner/tool:v1.0.0").as_deref(),
            Some(b"pinned".as_ref())
        );
    }
}
