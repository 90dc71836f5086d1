#![doc(html_root_url = "https://docs.rs/protoparse/0.1.0")]

//! `protoparse` is a self-contained parser for Protocol Buffers proto3
//! schema files.
//!
//! Given a `.proto` source (a file path, a directory, or an in-memory
//! string) together with a set of import search roots, it produces either a
//! structured AST ([`ast::File`]) or canonical file descriptors
//! ([`prost_types::FileDescriptorProto`]) without shelling out to `protoc`.
//!
//! ## Example
//!
//! ```
//! let file = protoparse::parse_string(
//!     r#"
//!     syntax = "proto3";
//!     package greeting;
//!
//!     message Hello {
//!         string name = 1;
//!     }
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(file.package.as_deref(), Some("greeting"));
//! assert_eq!(file.messages[0].name, "Hello");
//! ```
//!
//! Descriptors mirror what `protoc --descriptor_set_out` would emit for the
//! same input, including synthetic map-entry messages and fully qualified
//! type names with a leading `.`:
//!
//! ```
//! let descriptor = protoparse::parse_string_to_descriptor(
//!     r#"syntax = "proto3"; package a.b; enum Status { UNKNOWN = 0; }"#,
//!     "status.proto",
//! )
//! .unwrap();
//!
//! assert_eq!(descriptor.package.as_deref(), Some("a.b"));
//! assert_eq!(descriptor.enum_type[0].name.as_deref(), Some("Status"));
//! ```
//!
//! Repeated parsing is made cheap by a content-addressed cache
//! ([`parse_with_caching`]), an incremental driver ([`parse_incremental`]),
//! and a streaming reader for oversize files ([`parse_streaming`]).

pub mod ast;
mod cache;
mod descriptor;
mod error;
mod incremental;
mod lexer;
mod parser;
mod resolver;
mod streaming;
mod token;
mod well_known;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;
use once_cell::sync::Lazy;
use prost_types::FileDescriptorProto;

pub use crate::cache::{
    combined_hash, content_hash, CacheConfig, CacheStatistics, ContentHash, ParserCache,
    TableStats,
};
pub use crate::descriptor::{file_to_descriptor, DescriptorBuilder};
pub use crate::error::{BuildError, Error, LexError, ParseError, ResolveError, Result};
pub use crate::incremental::{
    ChangeSet, IncrementalParser, IncrementalRun, IncrementalStats, DEFAULT_WORKER_COUNT,
};
pub use crate::resolver::{
    scan_header, DependencyResolver, HeaderInfo, Resolution, ResolutionStats, ResolvedFile,
    ResolverConfig,
};
pub use crate::streaming::{StreamingParser, DEFAULT_CHUNK_SIZE, DEFAULT_STREAMING_THRESHOLD};
pub use crate::well_known::{EXTEND_TARGETS, WELL_KNOWN_FILES, WELL_KNOWN_PREFIXES};

/// The process-wide cache handle backing the convenience entry points.
/// Callers needing isolation construct their own [`ParserCache`].
static DEFAULT_CACHE: Lazy<Arc<ParserCache>> = Lazy::new(|| Arc::new(ParserCache::new()));

static DEFAULT_INCREMENTAL: Lazy<IncrementalParser> =
    Lazy::new(|| IncrementalParser::new(Arc::clone(&DEFAULT_CACHE)));

/// Parses proto3 source text into an AST.
///
/// Any accumulated lexical, syntactic, or local semantic error fails the
/// parse; use [`parse_string_lenient`] to receive the AST regardless.
pub fn parse_string(source: &str) -> Result<ast::File> {
    let (file, errors) = parser::parse(source);
    if errors.is_empty() {
        Ok(file)
    } else {
        Err(Error::Parse(errors))
    }
}

/// Parses proto3 source text, returning the AST together with every
/// accumulated error instead of failing on the first batch.
pub fn parse_string_lenient(source: &str) -> (ast::File, Vec<ParseError>) {
    parser::parse(source)
}

/// Parses a single `.proto` file into an AST without resolving imports.
pub fn parse_file(path: impl AsRef<Path>) -> Result<ast::File> {
    parse_string(&read_source(path.as_ref())?)
}

/// Parses `path` and its imports, looked up across `import_roots`.
///
/// Every resolved file must parse cleanly; the entry file's AST is
/// returned. With `allow_missing`, unresolvable imports degrade to
/// warnings.
pub fn parse_file_with_imports(
    path: impl AsRef<Path>,
    import_roots: &[PathBuf],
    allow_missing: bool,
) -> Result<ast::File> {
    let resolver = DependencyResolver::with_config(
        import_roots.iter().cloned(),
        ResolverConfig {
            allow_missing_imports: allow_missing,
            ..ResolverConfig::default()
        },
    );
    let resolution = resolver.resolve(path.as_ref())?;

    let mut entry = None;
    for file in &resolution.ordered {
        let ast = parse_string(&file.content)?;
        if file.is_entry {
            entry = Some(ast);
        }
    }
    entry.ok_or_else(|| Error::Internal("resolution produced no entry file".to_owned()))
}

/// Parses every `.proto` file under `dir` into an AST.
pub fn parse_directory(
    dir: impl AsRef<Path>,
    recursive: bool,
) -> Result<Vec<(PathBuf, ast::File)>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(ResolveError::DirectoryNotFound(dir.to_owned()).into());
    }
    let mut parsed = Vec::new();
    for path in incremental::enumerate_protos(dir, recursive) {
        let file = parse_file(&path)?;
        parsed.push((path, file));
    }
    Ok(parsed)
}

/// Parses source text and lowers it to a file descriptor named `name`.
pub fn parse_string_to_descriptor(source: &str, name: &str) -> Result<FileDescriptorProto> {
    let file = parse_string(source)?;
    Ok(descriptor::file_to_descriptor(name, &file, &[])?)
}

/// Parses a single file and lowers it to a descriptor. Type references must
/// resolve within the file itself (or well-known imports); use
/// [`parse_file_to_descriptors`] when real imports are involved.
pub fn parse_file_to_descriptor(path: impl AsRef<Path>) -> Result<FileDescriptorProto> {
    let path = path.as_ref();
    let file = parse_file(path)?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(descriptor::file_to_descriptor(&name, &file, &[])?)
}

/// Resolves `path` across `import_roots`, parses the whole set, and lowers
/// every file to a descriptor, dependencies first.
///
/// The resolution itself is cached in the process-wide handle, keyed by the
/// entry file's content hash.
pub fn parse_file_to_descriptors(
    path: impl AsRef<Path>,
    import_roots: &[PathBuf],
    allow_missing: bool,
) -> Result<Vec<FileDescriptorProto>> {
    let path = path.as_ref();

    let resolution = match cached_resolution(path) {
        Some(resolution) => resolution,
        None => {
            let resolver = DependencyResolver::with_config(
                import_roots.iter().cloned(),
                ResolverConfig {
                    allow_missing_imports: allow_missing,
                    ..ResolverConfig::default()
                },
            );
            let started = Instant::now();
            let resolution = Arc::new(resolver.resolve(path)?);
            let size: usize = resolution.ordered.iter().map(|f| f.content.len()).sum();
            DEFAULT_CACHE.put_resolution(
                &resolution.entry.path,
                content_hash(resolution.entry.content.as_bytes()),
                Arc::clone(&resolution),
                size,
                started.elapsed(),
            );
            resolution
        }
    };

    let mut builder = DescriptorBuilder::new();
    let mut descriptors = Vec::with_capacity(resolution.ordered.len());
    for file in &resolution.ordered {
        let ast = parse_string(&file.content)?;
        descriptors.push(builder.build(&file.import_path, &ast)?);
    }
    Ok(descriptors)
}

/// Parses every `.proto` file under `dir` and lowers the whole set to
/// descriptors; files may reference types declared by their siblings.
pub fn parse_directory_to_descriptors(
    dir: impl AsRef<Path>,
    recursive: bool,
) -> Result<Vec<FileDescriptorProto>> {
    let dir = dir.as_ref();
    let parsed = parse_directory(dir, recursive)?;
    let root = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_owned());

    let mut builder = DescriptorBuilder::new();
    for (_, file) in &parsed {
        builder.add_symbols(file);
    }
    let mut descriptors = Vec::with_capacity(parsed.len());
    for (path, file) in &parsed {
        let name = path
            .strip_prefix(&root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        descriptors.push(builder.build(&name, file)?);
    }
    Ok(descriptors)
}

/// Resolves and parses `path` like [`parse_file_to_descriptors`], then
/// serializes the set the way `protoc --descriptor_set_out` would.
pub fn parse_file_to_descriptor_set(
    path: impl AsRef<Path>,
    import_roots: &[PathBuf],
    allow_missing: bool,
) -> Result<Vec<u8>> {
    use prost::Message;

    let file = parse_file_to_descriptors(path, import_roots, allow_missing)?;
    let set = prost_types::FileDescriptorSet { file };
    Ok(set.encode_to_vec())
}

/// Parses a file through the process-wide content-addressed cache.
///
/// With `enabled` set to `false` the cache is bypassed entirely.
pub fn parse_with_caching(path: impl AsRef<Path>, enabled: bool) -> Result<Arc<ast::File>> {
    if enabled {
        incremental::parse_file_cached(&DEFAULT_CACHE, path.as_ref())
    } else {
        parse_file(path).map(Arc::new)
    }
}

/// Parses a file to a descriptor through the process-wide cache.
pub fn parse_to_descriptor_with_caching(
    path: impl AsRef<Path>,
) -> Result<Arc<FileDescriptorProto>> {
    let path = fs::canonicalize(path.as_ref()).map_err(|source| Error::Io {
        path: path.as_ref().to_owned(),
        source,
    })?;
    let content = read_source(&path)?;
    let hash = content_hash(content.as_bytes());
    if let Some(descriptor) = DEFAULT_CACHE.get_descriptor(&path, hash) {
        return Ok(descriptor);
    }

    let started = Instant::now();
    let file = parse_string(&content)?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let descriptor = Arc::new(descriptor::file_to_descriptor(&name, &file, &[])?);
    DEFAULT_CACHE.put_descriptor(
        &path,
        hash,
        Arc::clone(&descriptor),
        content.len(),
        started.elapsed(),
    );
    Ok(descriptor)
}

/// Detects changes under `dir` and re-parses only the affected files, using
/// the process-wide incremental driver.
pub fn parse_incremental(dir: impl AsRef<Path>, recursive: bool) -> Result<IncrementalRun> {
    DEFAULT_INCREMENTAL.parse_incremental(dir.as_ref(), recursive)
}

/// Parses a file, streaming it in chunks if it exceeds the default size
/// threshold.
pub fn parse_streaming(path: impl AsRef<Path>) -> Result<ast::File> {
    StreamingParser::new().parse_file(path.as_ref())
}

/// The declared syntax version of `path`, from the header scan alone.
pub fn syntax_of(path: impl AsRef<Path>) -> Result<Option<String>> {
    Ok(resolver::scan_header(&read_source(path.as_ref())?).syntax)
}

/// The declared package of `path`, from the header scan alone.
pub fn package_of(path: impl AsRef<Path>) -> Result<Option<String>> {
    Ok(resolver::scan_header(&read_source(path.as_ref())?).package)
}

/// Names of the top-level messages declared in `path`, in declaration
/// order.
pub fn message_names_of(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let file = parse_file(path)?;
    Ok(file.messages.into_iter().map(|m| m.name).collect())
}

/// Clears the process-wide caches and the incremental tracking map.
pub fn clear_caches() {
    DEFAULT_CACHE.clear();
    DEFAULT_INCREMENTAL.reset();
}

/// Statistics for the process-wide cache tables.
pub fn cache_statistics() -> CacheStatistics {
    DEFAULT_CACHE.statistics()
}

/// Statistics for the process-wide incremental driver.
pub fn incremental_statistics() -> IncrementalStats {
    DEFAULT_INCREMENTAL.stats()
}

/// Configuration for [`benchmark`].
#[derive(Clone, Copy, Debug)]
pub struct BenchmarkConfig {
    pub iterations: usize,
    /// Route iterations through the process-wide cache.
    pub use_cache: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> BenchmarkConfig {
        BenchmarkConfig {
            iterations: 10,
            use_cache: false,
        }
    }
}

/// Wall-clock timings for repeated parses of one file.
#[derive(Clone, Copy, Debug)]
pub struct BenchmarkReport {
    pub iterations: usize,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
}

/// Parses `path` repeatedly and reports timing statistics.
pub fn benchmark(path: impl AsRef<Path>, config: BenchmarkConfig) -> Result<BenchmarkReport> {
    let path = path.as_ref();
    let iterations = config.iterations.max(1);
    let mut timings = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let started = Instant::now();
        if config.use_cache {
            parse_with_caching(path, true)?;
        } else {
            parse_file(path)?;
        }
        timings.push(started.elapsed());
    }
    let total: Duration = timings.iter().sum();
    let report = BenchmarkReport {
        iterations,
        total,
        min: timings.iter().min().copied().unwrap_or_default(),
        max: timings.iter().max().copied().unwrap_or_default(),
        mean: total / iterations as u32,
    };
    info!(
        "benchmark of {}: {} iteration(s), mean {:?}",
        path.display(),
        report.iterations,
        report.mean
    );
    Ok(report)
}

fn cached_resolution(path: &Path) -> Option<Arc<Resolution>> {
    let path = fs::canonicalize(path).ok()?;
    let content = fs::read(&path).ok()?;
    DEFAULT_CACHE.get_resolution(&path, content_hash(&content))
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_owned(),
        source,
    })
}
