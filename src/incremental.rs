//! Incremental parsing: content-hash change detection over a directory tree
//! and re-parsing of only the files a change touches.
//!
//! The driver remembers the last-observed content hash per tracked path.
//! `detect_changes` classifies the current state of a directory into
//! `added` / `modified` / `removed`, and expands `affected` by reverse
//! import propagation: any tracked file importing a member of the other
//! three sets is re-parsed too. Unrelated files are parsed in parallel by a
//! bounded worker pool; workers share the cache read-only and never
//! collaborate on a single file.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use std::{fs, thread};

use log::{debug, trace};
use multimap::MultiMap;
use walkdir::WalkDir;

use crate::ast;
use crate::cache::{content_hash, ContentHash, ParserCache};
use crate::error::{Error, ResolveError};
use crate::parser;
use crate::resolver;

/// Default size of the worker pool used for unrelated files.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// The outcome of a change-detection pass: four disjoint path sets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Paths not previously tracked.
    pub added: Vec<PathBuf>,
    /// Tracked paths whose content hash changed.
    pub modified: Vec<PathBuf>,
    /// Previously tracked paths that no longer exist.
    pub removed: Vec<PathBuf>,
    /// Unchanged files that import a member of the other sets.
    pub affected: Vec<PathBuf>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.removed.is_empty()
            && self.affected.is_empty()
    }

    /// Files that need re-parsing, deduplicated and sorted.
    pub fn to_parse(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .added
            .iter()
            .chain(self.modified.iter())
            .chain(self.affected.iter())
            .cloned()
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

/// Counters kept across the lifetime of an [`IncrementalParser`].
#[derive(Clone, Copy, Debug, Default)]
pub struct IncrementalStats {
    pub files_tracked: usize,
    pub changes_detected: u64,
    pub files_parsed: u64,
}

/// Result of a full incremental pass: the change set plus per-file parse
/// outcomes for everything that needed re-parsing.
#[derive(Debug)]
pub struct IncrementalRun {
    pub changes: ChangeSet,
    pub results: Vec<(PathBuf, Result<Arc<ast::File>, Error>)>,
}

impl IncrementalRun {
    pub fn succeeded(&self) -> bool {
        self.results.iter().all(|(_, result)| result.is_ok())
    }
}

/// Tracks per-file content hashes and re-parses only what changed.
pub struct IncrementalParser {
    cache: Arc<ParserCache>,
    tracked: Mutex<HashMap<PathBuf, ContentHash>>,
    worker_count: usize,
    stats: Mutex<IncrementalStats>,
}

impl IncrementalParser {
    pub fn new(cache: Arc<ParserCache>) -> IncrementalParser {
        IncrementalParser::with_workers(cache, DEFAULT_WORKER_COUNT)
    }

    pub fn with_workers(cache: Arc<ParserCache>, worker_count: usize) -> IncrementalParser {
        IncrementalParser {
            cache,
            tracked: Mutex::new(HashMap::new()),
            worker_count: worker_count.max(1),
            stats: Mutex::new(IncrementalStats::default()),
        }
    }

    /// Compares the `.proto` files under `dir` against the tracked hashes
    /// and updates the tracking map.
    pub fn detect_changes(&self, dir: &Path, recursive: bool) -> Result<ChangeSet, Error> {
        if !dir.is_dir() {
            return Err(ResolveError::DirectoryNotFound(dir.to_owned()).into());
        }

        let mut current: HashMap<PathBuf, (ContentHash, Vec<String>)> = HashMap::new();
        for path in enumerate_protos(dir, recursive) {
            let content = fs::read_to_string(&path).map_err(|source| Error::Io {
                path: path.clone(),
                source,
            })?;
            let header = resolver::scan_header(&content);
            current.insert(path, (content_hash(content.as_bytes()), header.imports));
        }

        let mut changes = ChangeSet::default();
        let dir = dir_key(dir);
        {
            let mut tracked = lock(&self.tracked);

            for (path, (hash, _)) in &current {
                match tracked.get(path) {
                    None => changes.added.push(path.clone()),
                    Some(previous) if previous != hash => changes.modified.push(path.clone()),
                    Some(_) => {}
                }
            }
            for path in tracked.keys() {
                if path.starts_with(&dir) && !current.contains_key(path) {
                    changes.removed.push(path.clone());
                }
            }

            for path in &changes.removed {
                tracked.remove(path);
            }
            for (path, (hash, _)) in &current {
                tracked.insert(path.clone(), *hash);
            }
        }

        changes.affected = affected_importers(&current, &changes);
        changes.added.sort();
        changes.modified.sort();
        changes.removed.sort();

        let mut stats = lock(&self.stats);
        stats.files_tracked = lock(&self.tracked).len();
        stats.changes_detected +=
            (changes.added.len() + changes.modified.len() + changes.removed.len()) as u64;
        debug!(
            "detected changes in {}: {} added, {} modified, {} removed, {} affected",
            dir.display(),
            changes.added.len(),
            changes.modified.len(),
            changes.removed.len(),
            changes.affected.len()
        );
        Ok(changes)
    }

    /// Parses everything a change set touches, farming unrelated files out
    /// to the worker pool.
    pub fn parse_changed(
        &self,
        changes: &ChangeSet,
    ) -> Vec<(PathBuf, Result<Arc<ast::File>, Error>)> {
        let paths = changes.to_parse();
        if paths.is_empty() {
            return Vec::new();
        }

        let queue: Mutex<VecDeque<PathBuf>> = Mutex::new(paths.iter().cloned().collect());
        let results: Mutex<Vec<(PathBuf, Result<Arc<ast::File>, Error>)>> =
            Mutex::new(Vec::with_capacity(paths.len()));

        let workers = self.worker_count.min(paths.len());
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let path = match lock(&queue).pop_front() {
                        Some(path) => path,
                        None => return,
                    };
                    trace!("incremental parse of {}", path.display());
                    let result = parse_file_cached(&self.cache, &path);
                    lock(&results).push((path, result));
                });
            }
        });

        let mut results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        results.sort_by(|(a, _), (b, _)| a.cmp(b));
        lock(&self.stats).files_parsed += results.len() as u64;
        results
    }

    /// `detect_changes` followed by `parse_changed`.
    pub fn parse_incremental(&self, dir: &Path, recursive: bool) -> Result<IncrementalRun, Error> {
        let changes = self.detect_changes(dir, recursive)?;
        let results = self.parse_changed(&changes);
        Ok(IncrementalRun { changes, results })
    }

    pub fn stats(&self) -> IncrementalStats {
        *lock(&self.stats)
    }

    /// Forgets every tracked file. The shared cache is left untouched.
    pub fn reset(&self) {
        lock(&self.tracked).clear();
        lock(&self.stats).files_tracked = 0;
    }
}

/// Parses one file, consulting and populating the shared AST cache.
pub(crate) fn parse_file_cached(
    cache: &ParserCache,
    path: &Path,
) -> Result<Arc<ast::File>, Error> {
    let path = fs::canonicalize(path).map_err(|source| Error::Io {
        path: path.to_owned(),
        source,
    })?;
    let content = fs::read_to_string(&path).map_err(|source| Error::Io {
        path: path.clone(),
        source,
    })?;
    let hash = content_hash(content.as_bytes());

    if let Some(file) = cache.get_ast(&path, hash) {
        return Ok(file);
    }

    let started = Instant::now();
    let (file, errors) = parser::parse(&content);
    if !errors.is_empty() {
        return Err(Error::Parse(errors));
    }
    let file = Arc::new(file);
    cache.put_ast(&path, hash, Arc::clone(&file), content.len(), started.elapsed());
    Ok(file)
}

pub(crate) fn enumerate_protos(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let walker = if recursive {
        WalkDir::new(dir)
    } else {
        WalkDir::new(dir).max_depth(1)
    };
    let mut paths: Vec<PathBuf> = walker
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().map_or(false, |ext| ext == "proto")
        })
        .filter_map(|entry| fs::canonicalize(entry.path()).ok())
        .collect();
    paths.sort();
    paths.dedup();
    paths
}

fn dir_key(dir: &Path) -> PathBuf {
    fs::canonicalize(dir).unwrap_or_else(|_| dir.to_owned())
}

/// Unchanged files importing a changed one, found through a reverse import
/// index. Import strings are matched against the tails of tracked paths.
fn affected_importers(
    current: &HashMap<PathBuf, (ContentHash, Vec<String>)>,
    changes: &ChangeSet,
) -> Vec<PathBuf> {
    let changed: HashSet<&PathBuf> = changes
        .added
        .iter()
        .chain(changes.modified.iter())
        .chain(changes.removed.iter())
        .collect();
    if changed.is_empty() {
        return Vec::new();
    }

    let mut importers: MultiMap<&str, &PathBuf> = MultiMap::new();
    for (path, (_, imports)) in current {
        for import in imports {
            importers.insert(import.as_str(), path);
        }
    }

    let mut affected = Vec::new();
    for (import, candidates) in importers.iter_all() {
        if changed
            .iter()
            .any(|changed_path| path_matches_import(changed_path, import))
        {
            for candidate in candidates {
                if !changed.contains(*candidate) {
                    affected.push((*candidate).clone());
                }
            }
        }
    }
    affected.sort();
    affected.dedup();
    affected
}

/// True if `path` is what `import "…"` would resolve to, judged by
/// comparing trailing path components.
fn path_matches_import(path: &Path, import: &str) -> bool {
    let import_components: Vec<&str> = import.split('/').filter(|c| !c.is_empty()).collect();
    let path_components: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if import_components.len() > path_components.len() {
        return false;
    }
    path_components
        .iter()
        .rev()
        .zip(import_components.iter().rev())
        .all(|(a, b)| a == b)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
