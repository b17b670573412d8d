//! Plan cache: normalized cache key → executable plan.
//!
//! Process-wide concurrent map with per-key single-flight on store (losing
//! writers observe the winning value) and handbook-version validity. A plan
//! is only returned when its handbook version matches; a handbook change
//! invalidates prior entries. Optionally persisted as one JSON document
//! written atomically via temp file + rename.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::Plan;

const FILE_FORMAT_VERSION: u32 = 1;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One cached plan with bookkeeping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanCacheEntry {
    pub cache_key: String,
    pub handbook_version: String,
    pub plan: Plan,
    pub created_at: u64,
    pub last_used_at: u64,
    pub hit_count: u64,
}

/// On-disk document shape.
#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: Vec<PlanCacheEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_sync: Option<u64>,
}

pub struct PlanCache {
    entries: DashMap<String, PlanCacheEntry>,
    /// Per-key single-flight locks for `store`.
    write_locks: DashMap<String, Arc<Mutex<()>>>,
    path: Option<PathBuf>,
    /// Serializes disk writes.
    persist_lock: Mutex<()>,
}

impl PlanCache {
    pub fn in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            write_locks: DashMap::new(),
            path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Cache persisted at `path`; existing contents are loaded eagerly.
    pub fn with_persistence(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let cache = Self {
            entries: DashMap::new(),
            write_locks: DashMap::new(),
            path: Some(path.clone()),
            persist_lock: Mutex::new(()),
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<CacheFile>(&text) {
                Ok(file) => {
                    let count = file.entries.len();
                    for entry in file.entries {
                        cache.entries.insert(entry.cache_key.clone(), entry);
                    }
                    info!(path = %path.display(), entries = count, "plan cache loaded");
                }
                Err(e) => warn!(path = %path.display(), %e, "plan cache file unreadable, starting empty"),
            },
            Err(_) => debug!(path = %path.display(), "no plan cache file yet"),
        }
        cache
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the plan only when the entry's handbook version matches.
    /// Bumps hit bookkeeping on a match.
    pub fn lookup(&self, cache_key: &str, handbook_version: &str) -> Option<Plan> {
        let mut entry = self.entries.get_mut(cache_key)?;
        if entry.handbook_version != handbook_version {
            return None;
        }
        entry.hit_count += 1;
        entry.last_used_at = unix_now();
        Some(entry.plan.clone())
    }

    /// Stores a plan under `cache_key`, single-flight per key: concurrent
    /// writers linearize, and a writer that finds a fresh entry for the same
    /// handbook version observes it instead of overwriting. Returns the
    /// winning plan.
    pub async fn store(&self, cache_key: &str, handbook_version: &str, plan: Plan) -> Plan {
        let lock = self
            .write_locks
            .entry(cache_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(existing) = self.entries.get(cache_key) {
            if existing.handbook_version == handbook_version {
                debug!(cache_key, "plan store coalesced with existing entry");
                return existing.plan.clone();
            }
        }

        let now = unix_now();
        self.entries.insert(
            cache_key.to_string(),
            PlanCacheEntry {
                cache_key: cache_key.to_string(),
                handbook_version: handbook_version.to_string(),
                plan: plan.clone(),
                created_at: now,
                last_used_at: now,
                hit_count: 0,
            },
        );
        drop(_guard);

        if self.path.is_some() {
            if let Err(e) = self.persist().await {
                warn!(%e, "plan cache persist failed");
            }
        }
        plan
    }

    /// Drops every entry whose handbook version differs from `current`.
    pub fn invalidate(&self, current_version: &str) {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.handbook_version != current_version)
            .map(|e| e.cache_key.clone())
            .collect();
        let count = stale.len();
        for key in stale {
            self.entries.remove(&key);
        }
        if count > 0 {
            info!(invalidated = count, "plan cache invalidated for new handbook version");
        }
    }

    /// Writes the JSON document atomically: temp file in the same directory,
    /// then rename over the target.
    pub async fn persist(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;

        let mut entries: Vec<PlanCacheEntry> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.cache_key.cmp(&b.cache_key));
        let file = CacheFile {
            version: FILE_FORMAT_VERSION,
            entries,
            last_sync: Some(unix_now()),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let tmp = path.with_extension("json.tmp");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
