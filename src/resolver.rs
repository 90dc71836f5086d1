//! Import resolution: locating `.proto` files, reading them, and ordering
//! them so dependencies always precede dependents.
//!
//! The resolver never runs the full parser. It extracts the header metadata
//! it needs (syntax, package, imports) with a line-oriented scan, which
//! keeps resolution cheap even for very large schemas.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use std::{env, fs, io};

use log::{debug, trace, warn};
use once_cell::sync::Lazy;
use petgraph::algo::toposort;
use petgraph::graph::{Graph, NodeIndex};
use regex::Regex;

use crate::error::ResolveError;
use crate::well_known;

static SYNTAX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*syntax\s*=\s*"([^"]*)"\s*;"#).expect("syntax pattern")
});

static PACKAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*package\s+([A-Za-z_][A-Za-z0-9_.]*)\s*;").expect("package pattern")
});

static IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*import\s+(?:(?:public|weak)\s+)?"([^"]+)"\s*;"#).expect("import pattern")
});

/// Switches controlling a [`DependencyResolver`].
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// Degrade `ImportNotFound` to a warning instead of failing.
    pub allow_missing_imports: bool,
    /// Follow transitive imports; `false` resolves direct imports only.
    pub recursive: bool,
    /// Require every resolved file to declare `syntax = "proto3";`.
    pub validate_syntax: bool,
    /// Fail on import cycles. When disabled, a cyclic set falls back to
    /// insertion order.
    pub detect_cycles: bool,
    /// Safety stop for runaway import chains.
    pub max_depth: usize,
}

impl Default for ResolverConfig {
    fn default() -> ResolverConfig {
        ResolverConfig {
            allow_missing_imports: false,
            recursive: true,
            validate_syntax: true,
            detect_cycles: true,
            max_depth: 100,
        }
    }
}

/// A `.proto` source file located on disk and read into memory, with its
/// header metadata already extracted. Immutable once created.
#[derive(Clone, Debug)]
pub struct ResolvedFile {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// The string used to import this file (the entry file gets its path
    /// relative to the first containing import root, or its file name).
    pub import_path: String,
    /// Raw UTF-8 source text.
    pub content: String,
    /// Import strings declared by this file, in declaration order.
    pub imports: Vec<String>,
    pub syntax: Option<String>,
    pub package: Option<String>,
    pub modified: Option<SystemTime>,
    pub size: u64,
    pub is_entry: bool,
}

/// Header metadata extracted by the lightweight scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderInfo {
    pub syntax: Option<String>,
    pub package: Option<String>,
    pub imports: Vec<String>,
}

/// Statistics for a single resolution request.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResolutionStats {
    /// Files read from disk (the entry file included).
    pub files_resolved: usize,
    /// Imports satisfied as well-known placeholders.
    pub well_known_imports: usize,
    pub duration: Duration,
}

/// The result of resolving an entry file and its imports.
#[derive(Clone, Debug)]
pub struct Resolution {
    pub entry: Arc<ResolvedFile>,
    /// Everything except the entry file, in topological order.
    pub dependencies: Vec<Arc<ResolvedFile>>,
    /// Entry and dependencies together, dependencies first.
    pub ordered: Vec<Arc<ResolvedFile>>,
    pub warnings: Vec<String>,
    pub stats: ResolutionStats,
}

/// Locates an entry file plus its imports across a list of import roots.
///
/// Resolution is deterministic: roots earlier in the list win, and the
/// produced ordering depends only on the input and the filesystem.
#[derive(Clone, Debug, Default)]
pub struct DependencyResolver {
    roots: Vec<PathBuf>,
    config: ResolverConfig,
}

#[derive(Debug)]
enum ImportTarget {
    File(PathBuf),
    WellKnown,
    NotFound(Vec<PathBuf>),
}

impl DependencyResolver {
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> DependencyResolver {
        DependencyResolver {
            roots: roots.into_iter().map(Into::into).collect(),
            config: ResolverConfig::default(),
        }
    }

    pub fn with_config(
        roots: impl IntoIterator<Item = impl Into<PathBuf>>,
        config: ResolverConfig,
    ) -> DependencyResolver {
        DependencyResolver {
            roots: roots.into_iter().map(Into::into).collect(),
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolves `entry` and (if configured) its transitive imports into a
    /// topologically ordered file set.
    pub fn resolve(&self, entry: &Path) -> Result<Resolution, ResolveError> {
        let started = Instant::now();

        for root in &self.roots {
            if !root.is_dir() {
                return Err(ResolveError::DirectoryNotFound(root.clone()));
            }
        }

        let entry_path = canonicalize(entry)?;
        let entry_file = Arc::new(self.read_file(
            &entry_path,
            self.entry_import_path(&entry_path),
            true,
        )?);

        let mut visited: HashMap<PathBuf, Arc<ResolvedFile>> = HashMap::new();
        let mut insertion: Vec<PathBuf> = Vec::new();
        let mut import_sources: HashMap<PathBuf, String> = HashMap::new();
        let mut edges: Vec<(PathBuf, PathBuf)> = Vec::new();
        let mut warnings = Vec::new();
        let mut well_known_imports = 0usize;

        visited.insert(entry_path.clone(), Arc::clone(&entry_file));
        insertion.push(entry_path.clone());

        let mut queue: VecDeque<(Arc<ResolvedFile>, usize)> = VecDeque::new();
        queue.push_back((Arc::clone(&entry_file), 0));

        while let Some((file, depth)) = queue.pop_front() {
            if depth > self.config.max_depth {
                return Err(ResolveError::CircularDependency {
                    chain: vec![format!(
                        "maximum import depth {} exceeded at {}",
                        self.config.max_depth,
                        file.import_path
                    )],
                });
            }
            for import in &file.imports {
                match self.locate_import(import)? {
                    ImportTarget::WellKnown => {
                        trace!("well-known import {import}");
                        well_known_imports += 1;
                    }
                    ImportTarget::File(path) => {
                        if let Some(first) = import_sources.get(&path) {
                            // One file imported under two different names.
                            if first != import {
                                let name = path
                                    .file_name()
                                    .map(|n| n.to_string_lossy().into_owned())
                                    .unwrap_or_default();
                                return Err(ResolveError::DuplicateFile {
                                    name,
                                    first: PathBuf::from(first),
                                    second: PathBuf::from(import),
                                });
                            }
                        } else {
                            import_sources.insert(path.clone(), import.clone());
                        }
                        if !visited.contains_key(&path) {
                            let resolved =
                                Arc::new(self.read_file(&path, import.clone(), false)?);
                            visited.insert(path.clone(), Arc::clone(&resolved));
                            insertion.push(path.clone());
                            if self.config.recursive {
                                queue.push_back((resolved, depth + 1));
                            }
                        }
                        edges.push((file.path.clone(), path));
                    }
                    ImportTarget::NotFound(searched) => {
                        let error = if self.roots.is_empty() {
                            ResolveError::NoImportPaths(file.path.clone())
                        } else {
                            ResolveError::ImportNotFound {
                                import: import.clone(),
                                searched,
                            }
                        };
                        if self.config.allow_missing_imports {
                            warn!("{error}");
                            warnings.push(error.to_string());
                        } else {
                            return Err(error);
                        }
                    }
                }
            }
        }

        if self.config.validate_syntax {
            for path in &insertion {
                let file = &visited[path];
                match file.syntax.as_deref() {
                    Some("proto3") => {}
                    Some(other) => {
                        return Err(ResolveError::InvalidSyntax {
                            path: file.path.clone(),
                            found: other.to_owned(),
                        })
                    }
                    None => return Err(ResolveError::MissingSyntax(file.path.clone())),
                }
            }
        }

        let ordered = self.order(&visited, &insertion, &edges)?;
        let dependencies: Vec<_> = ordered
            .iter()
            .filter(|file| !file.is_entry)
            .cloned()
            .collect();

        let stats = ResolutionStats {
            files_resolved: insertion.len(),
            well_known_imports,
            duration: started.elapsed(),
        };
        debug!(
            "resolved {} file(s) ({} well-known) in {:?}",
            stats.files_resolved, stats.well_known_imports, stats.duration
        );

        Ok(Resolution {
            entry: entry_file,
            dependencies,
            ordered,
            warnings,
            stats,
        })
    }

    /// Topologically sorts the resolved set, dependencies first, insertion
    /// order breaking ties.
    fn order(
        &self,
        visited: &HashMap<PathBuf, Arc<ResolvedFile>>,
        insertion: &[PathBuf],
        edges: &[(PathBuf, PathBuf)],
    ) -> Result<Vec<Arc<ResolvedFile>>, ResolveError> {
        let mut graph: Graph<PathBuf, ()> = Graph::new();
        let mut indices: HashMap<&Path, NodeIndex> = HashMap::new();
        for path in insertion {
            let index = graph.add_node(path.clone());
            indices.insert(path.as_path(), index);
        }
        for (importer, imported) in edges {
            // Edge from dependency to dependent so a topological sort
            // yields dependencies first.
            if let (Some(&from), Some(&to)) =
                (indices.get(imported.as_path()), indices.get(importer.as_path()))
            {
                graph.add_edge(from, to, ());
            }
        }

        match toposort(&graph, None) {
            Ok(order) => Ok(order
                .into_iter()
                .map(|index| Arc::clone(&visited[&graph[index]]))
                .collect()),
            Err(_) if self.config.detect_cycles => {
                let chain = find_cycle(visited, insertion, edges);
                Err(ResolveError::CircularDependency { chain })
            }
            Err(_) => Ok(insertion
                .iter()
                .map(|path| Arc::clone(&visited[path]))
                .collect()),
        }
    }

    /// First match across the import roots wins; the working directory is a
    /// fallback; well-known prefixes are satisfied as placeholders.
    fn locate_import(&self, import: &str) -> Result<ImportTarget, ResolveError> {
        if import.is_empty() {
            return Err(ResolveError::InvalidImportPath {
                path: import.to_owned(),
                reason: "import path is empty".to_owned(),
            });
        }
        if Path::new(import).is_absolute() || import.contains('\\') {
            return Err(ResolveError::InvalidImportPath {
                path: import.to_owned(),
                reason: "import paths must be relative, `/`-separated".to_owned(),
            });
        }
        if import.split('/').any(|segment| segment == "..") {
            return Err(ResolveError::InvalidImportPath {
                path: import.to_owned(),
                reason: "import paths may not traverse upward".to_owned(),
            });
        }

        let mut searched = Vec::new();
        for root in &self.roots {
            let candidate = root.join(import);
            if candidate.is_file() {
                return Ok(ImportTarget::File(canonicalize(&candidate)?));
            }
            searched.push(root.clone());
        }
        if let Ok(cwd) = env::current_dir() {
            let candidate = cwd.join(import);
            if candidate.is_file() {
                return Ok(ImportTarget::File(canonicalize(&candidate)?));
            }
            searched.push(cwd);
        }
        if well_known::is_well_known_import(import) {
            return Ok(ImportTarget::WellKnown);
        }
        Ok(ImportTarget::NotFound(searched))
    }

    fn entry_import_path(&self, path: &Path) -> String {
        for root in &self.roots {
            if let Ok(canonical_root) = fs::canonicalize(root) {
                if let Ok(relative) = path.strip_prefix(&canonical_root) {
                    return relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                }
            }
        }
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn read_file(
        &self,
        path: &Path,
        import_path: String,
        is_entry: bool,
    ) -> Result<ResolvedFile, ResolveError> {
        let metadata = fs::metadata(path).map_err(|source| ResolveError::Io {
            path: path.to_owned(),
            source,
        })?;
        let content = fs::read_to_string(path).map_err(|source| ResolveError::Io {
            path: path.to_owned(),
            source,
        })?;
        let header = scan_header(&content);
        trace!(
            "read {} ({} bytes, package {:?})",
            path.display(),
            metadata.len(),
            header.package
        );
        Ok(ResolvedFile {
            path: path.to_owned(),
            import_path,
            imports: header.imports,
            syntax: header.syntax,
            package: header.package,
            modified: metadata.modified().ok(),
            size: metadata.len(),
            is_entry,
            content,
        })
    }
}

/// Extracts syntax, package, and imports with a line-oriented scan that
/// ignores comments and blank lines. Never invokes the full parser.
pub fn scan_header(content: &str) -> HeaderInfo {
    let mut header = HeaderInfo::default();
    let mut in_block_comment = false;

    for line in content.lines() {
        let line = strip_comments(line, &mut in_block_comment);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if header.syntax.is_none() {
            if let Some(captures) = SYNTAX_RE.captures(line) {
                header.syntax = Some(captures[1].to_owned());
                continue;
            }
        }
        if header.package.is_none() {
            if let Some(captures) = PACKAGE_RE.captures(line) {
                header.package = Some(captures[1].to_owned());
                continue;
            }
        }
        if let Some(captures) = IMPORT_RE.captures(line) {
            header.imports.push(captures[1].to_owned());
        }
    }
    header
}

/// Removes `//` and `/* … */` comment text from one line, tracking block
/// comments that span lines.
fn strip_comments(line: &str, in_block_comment: &mut bool) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    loop {
        if *in_block_comment {
            match rest.find("*/") {
                Some(end) => {
                    *in_block_comment = false;
                    rest = &rest[end + 2..];
                }
                None => return out,
            }
            continue;
        }
        let line_comment = rest.find("//");
        let block_comment = rest.find("/*");
        match (line_comment, block_comment) {
            (Some(l), Some(b)) if l < b => {
                out.push_str(&rest[..l]);
                return out;
            }
            (_, Some(b)) => {
                out.push_str(&rest[..b]);
                *in_block_comment = true;
                rest = &rest[b + 2..];
            }
            (Some(l), None) => {
                out.push_str(&rest[..l]);
                return out;
            }
            (None, None) => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

fn canonicalize(path: &Path) -> Result<PathBuf, ResolveError> {
    fs::canonicalize(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ResolveError::FileNotFound(path.to_owned())
        } else {
            ResolveError::Io {
                path: path.to_owned(),
                source,
            }
        }
    })
}

/// Reconstructs one import cycle as a chain of import paths, using
/// white/grey/black DFS coloring over the importer graph.
fn find_cycle(
    visited: &HashMap<PathBuf, Arc<ResolvedFile>>,
    insertion: &[PathBuf],
    edges: &[(PathBuf, PathBuf)],
) -> Vec<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }

    let mut adjacency: HashMap<&Path, Vec<&Path>> = HashMap::new();
    for (importer, imported) in edges {
        adjacency
            .entry(importer.as_path())
            .or_default()
            .push(imported.as_path());
    }

    let mut colors: HashMap<&Path, Color> =
        insertion.iter().map(|p| (p.as_path(), Color::White)).collect();

    fn dfs<'a>(
        node: &'a Path,
        adjacency: &HashMap<&'a Path, Vec<&'a Path>>,
        colors: &mut HashMap<&'a Path, Color>,
        path: &mut Vec<&'a Path>,
    ) -> Option<Vec<&'a Path>> {
        colors.insert(node, Color::Grey);
        path.push(node);
        for &next in adjacency.get(node).into_iter().flatten() {
            match colors.get(next) {
                Some(Color::Grey) => {
                    let start = path.iter().position(|&p| p == next).unwrap_or(0);
                    let mut chain: Vec<&Path> = path[start..].to_vec();
                    chain.push(next);
                    return Some(chain);
                }
                Some(Color::White) => {
                    if let Some(chain) = dfs(next, adjacency, colors, path) {
                        return Some(chain);
                    }
                }
                _ => {}
            }
        }
        path.pop();
        colors.insert(node, Color::Black);
        None
    }

    for start in insertion {
        if colors[start.as_path()] == Color::White {
            let mut path = Vec::new();
            if let Some(chain) = dfs(start.as_path(), &adjacency, &mut colors, &mut path) {
                return chain
                    .into_iter()
                    .map(|p| {
                        visited
                            .get(p)
                            .map(|f| f.import_path.clone())
                            .unwrap_or_else(|| p.display().to_string())
                    })
                    .collect();
            }
        }
    }
    vec!["<cycle>".to_owned()]
}
