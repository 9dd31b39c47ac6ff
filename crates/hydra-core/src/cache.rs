//! TTL- and size-bounded schema cache.
//!
//! Keys follow the grammar `kind:db[:entity]` with kinds `schema`, `table`,
//! `profile`, `relationships`, and `dbinfo`. Values are opaque JSON snapshots,
//! so entries never hold references back into live objects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::profile::{DataProfiler, ProfileOptions};
use crate::schema::SchemaAnalyzer;
use hydra_common::{BrokerError, Result};

/// Sizing and expiry knobs for the cache.
#[derive(Debug, Clone)]
pub struct SchemaCacheConfig {
    pub default_ttl_ms: u64,
    /// Total size budget in bytes (estimate: 2x the JSON string length)
    pub max_size_bytes: u64,
    pub max_entries: usize,
    pub cleanup_interval_ms: u64,
}

impl Default for SchemaCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 300_000,
            max_size_bytes: 50 * 1024 * 1024,
            max_entries: 500,
            cleanup_interval_ms: 60_000,
        }
    }
}

/// Tables at or above this row count are skipped by warm-up profiling.
const WARMUP_PROFILE_ROW_LIMIT: u64 = 10_000;

#[derive(Debug, Clone)]
struct CacheEntry {
    data: JsonValue,
    stored_at: Instant,
    ttl: Duration,
    hits: u64,
    size_bytes: u64,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() > self.ttl
    }
}

/// Counter block surfaced in statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_removed: u64,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    total_size_bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expired_removed: u64,
}

impl CacheInner {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            total_size_bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expired_removed: 0,
        }
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key)?;
        self.total_size_bytes = self.total_size_bytes.saturating_sub(removed.size_bytes);
        Some(removed)
    }
}

/// The process-local schema/profile cache.
pub struct SchemaCache {
    config: SchemaCacheConfig,
    inner: RwLock<CacheInner>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SchemaCache {
    pub fn new(config: SchemaCacheConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            inner: RwLock::new(CacheInner::new()),
            sweeper: Mutex::new(None),
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(SchemaCacheConfig::default())
    }

    // Key builders

    pub fn schema_key(db: &str) -> String {
        format!("schema:{}", db)
    }

    pub fn table_key(db: &str, table: &str) -> String {
        format!("table:{}:{}", db, table)
    }

    pub fn profile_key(db: &str, table: &str) -> String {
        format!("profile:{}:{}", db, table)
    }

    pub fn relationships_key(db: &str) -> String {
        format!("relationships:{}", db)
    }

    pub fn dbinfo_key(db: &str) -> String {
        format!("dbinfo:{}", db)
    }

    /// Returns the stored snapshot, or null on miss/expiry. Expired entries
    /// are removed eagerly on access.
    pub fn get(&self, key: &str) -> Option<JsonValue> {
        {
            let inner = self.inner.read();
            match inner.entries.get(key) {
                None => {}
                Some(entry) if entry.is_expired() => {}
                Some(_) => {
                    // Upgrade to a write lock to bump counters.
                    drop(inner);
                    let mut inner = self.inner.write();
                    if let Some(entry) = inner.entries.get_mut(key) {
                        if !entry.is_expired() {
                            entry.hits += 1;
                            let data = entry.data.clone();
                            inner.hits += 1;
                            return Some(data);
                        }
                    }
                }
            }
        }

        let mut inner = self.inner.write();
        if inner
            .entries
            .get(key)
            .map(|entry| entry.is_expired())
            .unwrap_or(false)
        {
            inner.remove_entry(key);
            inner.expired_removed += 1;
        }
        inner.misses += 1;
        None
    }

    /// Stores a snapshot under `key`, evicting least-used entries when the
    /// entry count or size budget would be exceeded.
    pub fn set(&self, key: impl Into<String>, value: JsonValue, ttl_ms: Option<u64>) {
        let key = key.into();
        let size_bytes = estimate_size(&value);
        let ttl = Duration::from_millis(ttl_ms.unwrap_or(self.config.default_ttl_ms));

        let mut inner = self.inner.write();
        inner.remove_entry(&key);

        let over_entries = inner.entries.len() >= self.config.max_entries;
        let over_size = inner.total_size_bytes + size_bytes > self.config.max_size_bytes;
        if over_entries || over_size {
            let required = if over_size {
                (inner.total_size_bytes + size_bytes)
                    .saturating_sub(self.config.max_size_bytes)
            } else {
                0
            };
            Self::evict(&mut inner, required, self.config.max_entries);
        }

        inner.total_size_bytes += size_bytes;
        inner.entries.insert(
            key,
            CacheEntry {
                data: value,
                stored_at: Instant::now(),
                ttl,
                hits: 0,
                size_bytes,
            },
        );
    }

    /// Removes entries sorted by `(hits asc, age desc)` until the freed space
    /// covers `required` bytes and the entry count is under budget.
    fn evict(inner: &mut CacheInner, required: u64, max_entries: usize) {
        let mut candidates: Vec<(String, u64, Instant, u64)> = inner
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.hits, entry.stored_at, entry.size_bytes))
            .collect();
        // Least-hit first; ties broken by oldest timestamp.
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));

        let mut freed = 0u64;
        for (key, _, _, size) in candidates {
            let over_entries = inner.entries.len() >= max_entries;
            if freed >= required && !over_entries {
                break;
            }
            inner.remove_entry(&key);
            inner.evictions += 1;
            freed += size;
        }
    }

    /// Clears everything (no pattern) or removes keys matching the regex.
    pub fn invalidate(&self, pattern: Option<&str>) -> Result<usize> {
        let mut inner = self.inner.write();
        match pattern {
            None => {
                let removed = inner.entries.len();
                *inner = CacheInner::new();
                Ok(removed)
            }
            Some(pattern) => {
                let regex = Regex::new(pattern).map_err(|e| {
                    BrokerError::Validation(format!("Invalid invalidation pattern: {}", e))
                })?;
                let matching: Vec<String> = inner
                    .entries
                    .keys()
                    .filter(|key| regex.is_match(key))
                    .cloned()
                    .collect();
                for key in &matching {
                    inner.remove_entry(key);
                }
                Ok(matching.len())
            }
        }
    }

    /// Drops every entry belonging to one database.
    pub fn invalidate_database(&self, db: &str) -> Result<usize> {
        let pattern = format!(
            "^(schema|table|profile|relationships|dbinfo):{}",
            regex::escape(db)
        );
        self.invalidate(Some(&pattern))
    }

    /// Drops the table and profile entries for one table.
    pub fn invalidate_table(&self, db: &str, table: &str) -> Result<usize> {
        let pattern = format!(
            "^(table|profile):{}:{}",
            regex::escape(db),
            regex::escape(table)
        );
        self.invalidate(Some(&pattern))
    }

    /// Removes every expired entry; the periodic sweep calls this.
    pub fn cleanup(&self) -> usize {
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove_entry(key);
            inner.expired_removed += 1;
        }
        expired.len()
    }

    /// Starts the periodic expiry sweep. Idempotent; a second call replaces
    /// the previous task.
    pub fn start_sweeper(self: &Arc<Self>) {
        let cache = Arc::clone(self);
        let interval = Duration::from_millis(self.config.cleanup_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = cache.cleanup();
                if removed > 0 {
                    debug!(removed, "Schema cache sweep removed expired entries");
                }
            }
        });
        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stops the sweep task and empties the cache.
    pub fn destroy(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        let mut inner = self.inner.write();
        *inner = CacheInner::new();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        CacheStats {
            entries: inner.entries.len(),
            total_size_bytes: inner.total_size_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expired_removed: inner.expired_removed,
        }
    }

    /// Prefetches database info, schema, relationships, per-table info, and
    /// shallow profiles for small tables. Failures are logged, never fatal.
    pub async fn warm_up(
        &self,
        db: &str,
        analyzer: &dyn SchemaAnalyzer,
        profiler: &dyn DataProfiler,
    ) {
        match analyzer.database_info().await {
            Ok(info) => {
                if let Ok(json) = serde_json::to_value(&info) {
                    self.set(Self::dbinfo_key(db), json, None);
                }
            }
            Err(error) => warn!(db, %error, "Warm-up: database info fetch failed"),
        }

        let schema = match analyzer.full_schema().await {
            Ok(schema) => {
                if let Ok(json) = serde_json::to_value(&schema) {
                    self.set(Self::schema_key(db), json, None);
                }
                Some(schema)
            }
            Err(error) => {
                warn!(db, %error, "Warm-up: schema fetch failed");
                None
            }
        };

        match analyzer.relationships().await {
            Ok(map) => {
                if let Ok(json) = serde_json::to_value(&map) {
                    self.set(Self::relationships_key(db), json, None);
                }
            }
            Err(error) => warn!(db, %error, "Warm-up: relationship fetch failed"),
        }

        let Some(schema) = schema else {
            return;
        };
        for table in &schema.tables {
            if let Ok(json) = serde_json::to_value(table) {
                self.set(Self::table_key(db, &table.name), json, None);
            }

            if table.row_count.unwrap_or(u64::MAX) < WARMUP_PROFILE_ROW_LIMIT {
                match profiler
                    .profile_table(&table.name, &ProfileOptions::shallow())
                    .await
                {
                    Ok(profile) => {
                        if let Ok(json) = serde_json::to_value(&profile) {
                            self.set(Self::profile_key(db, &table.name), json, None);
                        }
                    }
                    Err(error) => {
                        warn!(db, table = %table.name, %error, "Warm-up: profile fetch failed")
                    }
                }
            }
        }
    }
}

/// Size estimate used for the byte budget: twice the JSON string length.
fn estimate_size(value: &JsonValue) -> u64 {
    serde_json::to_string(value)
        .map(|s| s.len() as u64 * 2)
        .unwrap_or(0)
}
