use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use fs2::FileExt;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::constants::{CACHE_LOCK_POLL, CACHE_LOCK_TIMEOUT, VERSION};
use crate::orchestrator::TargetReport;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope {
    data: TargetReport,
    checksum: String,
}

/// Per-target result cache, keyed by ASCII target and plugin-hash. The
/// methods block on file locks and disk I/O; the driver calls them through
/// `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    plugin_hash: String,
}

impl CacheStore {
    pub fn open<'a>(
        dir: &Path,
        selected_sources: impl Iterator<Item = &'a str>,
    ) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            plugin_hash: plugin_hash(selected_sources),
        })
    }

    fn payload_path(&self, target: &str) -> PathBuf {
        self.dir.join(format!("{target}-{}.json", self.plugin_hash))
    }

    fn lock_path(&self, target: &str) -> PathBuf {
        self.dir.join(format!("{target}-{}.lock", self.plugin_hash))
    }

    /// Best-effort read. Lock contention, missing or unreadable payloads and
    /// checksum mismatches all degrade to a miss.
    pub fn load(&self, target: &str) -> Option<TargetReport> {
        let _lock = match acquire_lock(&self.lock_path(target)) {
            Some(lock) => lock,
            None => {
                warn!("cache lock for {target} is busy, scanning without cache");
                return None;
            }
        };
        let raw = fs::read_to_string(self.payload_path(target)).ok()?;
        let envelope: CacheEnvelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(_) => {
                warn!("cache entry for {target} is unreadable, rescanning");
                return None;
            }
        };
        match checksum(&envelope.data) {
            Some(digest) if digest == envelope.checksum => Some(envelope.data),
            _ => {
                warn!("cache entry for {target} failed its integrity check, rescanning");
                None
            }
        }
    }

    /// Best-effort write; a busy lock or I/O failure only costs the cache.
    pub fn store(&self, target: &str, report: &TargetReport) {
        let _lock = match acquire_lock(&self.lock_path(target)) {
            Some(lock) => lock,
            None => {
                warn!("cache lock for {target} is busy, result not cached");
                return;
            }
        };
        let Some(checksum) = checksum(report) else {
            warn!("cache entry for {target} could not be serialized");
            return;
        };
        let envelope = CacheEnvelope {
            data: report.clone(),
            checksum,
        };
        if let Err(e) = self.write_atomically(target, &envelope) {
            warn!("cache write for {target} failed: {e}");
        }
    }

    fn write_atomically(&self, target: &str, envelope: &CacheEnvelope) -> io::Result<()> {
        let path = self.payload_path(target);
        let tmp = path.with_extension("tmp");
        let body = serde_json::to_string(envelope)?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)
    }
}

/// Key-sorted, whitespace-free serialization; the basis for the checksum.
/// `serde_json`'s default map is ordered, so a `Value` round trip sorts the
/// object keys.
pub fn canonical_json(report: &TargetReport) -> serde_json::Result<String> {
    serde_json::to_value(report).map(|value| value.to_string())
}

fn checksum(report: &TargetReport) -> Option<String> {
    let canonical = canonical_json(report).ok()?;
    Some(format!("{:x}", Sha256::digest(canonical.as_bytes())))
}

/// 8-hex-digit prefix of md5 over the engine version and the sorted source
/// names. Changing either invalidates prior cache entries.
pub fn plugin_hash<'a>(selected_sources: impl Iterator<Item = &'a str>) -> String {
    let mut names: Vec<&str> = selected_sources.collect();
    names.sort_unstable();
    let digest = Md5::digest(format!("{VERSION}{}", names.join(",")).as_bytes());
    format!("{digest:x}")[..8].to_string()
}

struct CacheLock {
    file: File,
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Bounded advisory lock acquisition; gives up after roughly a second so a
/// stalled holder can never deadlock the driver.
fn acquire_lock(path: &Path) -> Option<CacheLock> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .ok()?;
    let deadline = Instant::now() + CACHE_LOCK_TIMEOUT;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Some(CacheLock { file }),
            Err(_) if Instant::now() < deadline => thread::sleep(CACHE_LOCK_POLL),
            Err(_) => return None,
        }
    }
}
