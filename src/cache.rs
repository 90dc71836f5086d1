//! Content-addressed caching for parsed ASTs, descriptors, and resolutions.
//!
//! Three disjoint tables share one discipline: entries are keyed by
//! `(absolute path, content hash)`, evicted least-recently-used when a table
//! reaches its capacity, and treated as misses once older than the
//! configured TTL. One mutex per table serializes writers; readers observe a
//! consistent snapshot because every access goes through the same lock.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, trace};
use prost_types::FileDescriptorProto;
use sha2::{Digest, Sha256};

use crate::ast;
use crate::resolver::Resolution;

/// SHA-256 digest of a file's bytes. Equal content yields equal hashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({self})")
    }
}

/// Hashes a file's raw bytes.
pub fn content_hash(bytes: &[u8]) -> ContentHash {
    ContentHash(Sha256::digest(bytes).into())
}

/// Hashes an ordered list of per-file hashes; order matters.
pub fn combined_hash(hashes: &[ContentHash]) -> ContentHash {
    let mut digest = Sha256::new();
    for hash in hashes {
        digest.update(hash.as_bytes());
    }
    ContentHash(digest.finalize().into())
}

/// Capacity and expiry settings, applied per table.
#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    /// Maximum number of entries per table.
    pub max_entries: usize,
    /// Entries older than this are treated as misses. `None` disables
    /// expiry.
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> CacheConfig {
        CacheConfig {
            max_entries: 1024,
            ttl: None,
        }
    }
}

/// Per-table counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct TableStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub inserts: u64,
    total_cost: Duration,
}

impl TableStats {
    /// Mean time spent producing the values inserted into this table.
    pub fn average_production_time(&self) -> Duration {
        if self.inserts == 0 {
            Duration::ZERO
        } else {
            self.total_cost / self.inserts as u32
        }
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A snapshot of all three tables plus the approximate memory footprint.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStatistics {
    pub ast: TableStats,
    pub descriptor: TableStats,
    pub resolution: TableStats,
    /// Sum of per-entry byte sizes across every table.
    pub memory_usage: usize,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: PathBuf,
    hash: ContentHash,
}

struct Entry<V> {
    value: V,
    size: usize,
    inserted: Instant,
    last_access: Instant,
    access_count: u64,
    cost: Duration,
}

struct Table<V> {
    name: &'static str,
    entries: HashMap<CacheKey, Entry<V>>,
    config: CacheConfig,
    stats: TableStats,
}

impl<V: Clone> Table<V> {
    fn new(name: &'static str, config: CacheConfig) -> Table<V> {
        Table {
            name,
            entries: HashMap::new(),
            config,
            stats: TableStats::default(),
        }
    }

    fn get(&mut self, path: &Path, hash: ContentHash) -> Option<V> {
        let key = CacheKey {
            path: path.to_owned(),
            hash,
        };
        let expired = match self.entries.get(&key) {
            Some(entry) => match self.config.ttl {
                Some(ttl) => entry.inserted.elapsed() > ttl,
                None => false,
            },
            None => {
                self.stats.misses += 1;
                return None;
            }
        };
        if expired {
            trace!("{} cache: entry for {} expired", self.name, path.display());
            self.entries.remove(&key);
            self.stats.misses += 1;
            return None;
        }
        let entry = self.entries.get_mut(&key)?;
        entry.last_access = Instant::now();
        entry.access_count += 1;
        self.stats.hits += 1;
        Some(entry.value.clone())
    }

    fn insert(&mut self, path: &Path, hash: ContentHash, value: V, size: usize, cost: Duration) {
        let key = CacheKey {
            path: path.to_owned(),
            hash,
        };
        while !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_entries {
            // Oldest last-access first; insertion time breaks ties.
            let victim = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| (entry.last_access, entry.inserted))
                .map(|(key, _)| key.clone());
            match victim {
                Some(victim) => {
                    trace!("{} cache: evicting {}", self.name, victim.path.display());
                    self.entries.remove(&victim);
                    self.stats.evictions += 1;
                }
                None => break,
            }
        }
        let now = Instant::now();
        self.entries.insert(
            key,
            Entry {
                value,
                size,
                inserted: now,
                last_access: now,
                access_count: 0,
                cost,
            },
        );
        self.stats.inserts += 1;
        self.stats.total_cost += cost;
    }

    fn sweep(&mut self) {
        if let Some(ttl) = self.config.ttl {
            self.entries.retain(|_, entry| entry.inserted.elapsed() <= ttl);
        }
    }

    fn memory_usage(&self) -> usize {
        self.entries.values().map(|entry| entry.size).sum()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// The process-wide mutable state of the performance layer: AST, descriptor,
/// and dependency-resolution tables.
///
/// A `ParserCache` is a handle the caller constructs; the crate-level
/// convenience functions share one default handle.
pub struct ParserCache {
    asts: Mutex<Table<Arc<ast::File>>>,
    descriptors: Mutex<Table<Arc<FileDescriptorProto>>>,
    resolutions: Mutex<Table<Arc<Resolution>>>,
}

impl Default for ParserCache {
    fn default() -> ParserCache {
        ParserCache::new()
    }
}

impl ParserCache {
    pub fn new() -> ParserCache {
        ParserCache::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> ParserCache {
        ParserCache {
            asts: Mutex::new(Table::new("ast", config)),
            descriptors: Mutex::new(Table::new("descriptor", config)),
            resolutions: Mutex::new(Table::new("resolution", config)),
        }
    }

    pub fn get_ast(&self, path: &Path, hash: ContentHash) -> Option<Arc<ast::File>> {
        lock(&self.asts).get(path, hash)
    }

    pub fn put_ast(
        &self,
        path: &Path,
        hash: ContentHash,
        value: Arc<ast::File>,
        size: usize,
        cost: Duration,
    ) {
        lock(&self.asts).insert(path, hash, value, size, cost);
    }

    pub fn get_descriptor(&self, path: &Path, hash: ContentHash) -> Option<Arc<FileDescriptorProto>> {
        lock(&self.descriptors).get(path, hash)
    }

    pub fn put_descriptor(
        &self,
        path: &Path,
        hash: ContentHash,
        value: Arc<FileDescriptorProto>,
        size: usize,
        cost: Duration,
    ) {
        lock(&self.descriptors).insert(path, hash, value, size, cost);
    }

    pub fn get_resolution(&self, path: &Path, hash: ContentHash) -> Option<Arc<Resolution>> {
        lock(&self.resolutions).get(path, hash)
    }

    pub fn put_resolution(
        &self,
        path: &Path,
        hash: ContentHash,
        value: Arc<Resolution>,
        size: usize,
        cost: Duration,
    ) {
        lock(&self.resolutions).insert(path, hash, value, size, cost);
    }

    /// Removes expired entries from every table.
    pub fn sweep(&self) {
        lock(&self.asts).sweep();
        lock(&self.descriptors).sweep();
        lock(&self.resolutions).sweep();
    }

    /// Clears all three tables. Taking each lock in turn quiesces in-flight
    /// readers before their table is dropped.
    pub fn clear(&self) {
        lock(&self.asts).clear();
        lock(&self.descriptors).clear();
        lock(&self.resolutions).clear();
        debug!("caches cleared");
    }

    pub fn statistics(&self) -> CacheStatistics {
        let asts = lock(&self.asts);
        let descriptors = lock(&self.descriptors);
        let resolutions = lock(&self.resolutions);
        CacheStatistics {
            ast: asts.stats,
            descriptor: descriptors.stats,
            resolution: resolutions.stats,
            memory_usage: asts.memory_usage()
                + descriptors.memory_usage()
                + resolutions.memory_usage(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
