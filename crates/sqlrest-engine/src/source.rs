//! SQL text loading, inline or from the repository.
//!
//! A `sql` attribute beginning with [`FILE_MARKER`] names a file relative to
//! the configured repository root. The reference is rejected unless it stays
//! inside the root, first lexically (so missing files still report the
//! escape) and again after canonicalisation (so symlinks cannot leave it).
//! Loaded text is cached by canonical path for the life of the engine.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, RwLock};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

/// Tracing target for SQL loading.
pub(crate) const SOURCE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::source");

/// Prefix marking a file-backed `sql` attribute.
pub const FILE_MARKER: char = '@';

/// Filesystem operations used by the loader.
pub trait SqlFileSystem: Send + Sync {
    /// Resolves symlinks and relative components.
    ///
    /// # Errors
    ///
    /// Returns the I/O error when the path does not exist.
    fn canonicalize(&self, path: &Utf8Path) -> io::Result<Utf8PathBuf>;

    /// Reads a whole file as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns the I/O error when the file cannot be read.
    fn read_to_string(&self, path: &Utf8Path) -> io::Result<String>;
}

/// [`SqlFileSystem`] backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

impl SqlFileSystem for OsFileSystem {
    fn canonicalize(&self, path: &Utf8Path) -> io::Result<Utf8PathBuf> {
        path.canonicalize_utf8()
    }

    fn read_to_string(&self, path: &Utf8Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Shared cache of loaded SQL files keyed by canonical path.
#[derive(Debug, Clone, Default)]
pub struct SqlCache {
    entries: Arc<RwLock<HashMap<Utf8PathBuf, Arc<str>>>>,
}

impl SqlCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }

    /// Whether nothing has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, path: &Utf8Path) -> Option<Arc<str>> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(path).cloned())
    }

    fn insert(&self, path: Utf8PathBuf, sql: Arc<str>) {
        // A poisoned cache only loses the memoisation, never correctness.
        if let Ok(mut entries) = self.entries.write() {
            entries.entry(path).or_insert(sql);
        }
    }
}

/// Errors raised while loading SQL text.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The reference resolves outside the repository.
    #[error("illegal path '{path}', file must be located in repository")]
    OutsideRepository {
        /// Offending reference or resolved path.
        path: String,
    },
    /// The repository root itself cannot be resolved.
    #[error("repository '{path}' is not accessible: {source}")]
    Repository {
        /// Configured root.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The referenced file cannot be read.
    #[error("could not read '{path}': {source}")]
    Read {
        /// Resolved file path.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Loader for inline and file-backed SQL.
#[derive(Clone)]
pub struct SqlSource {
    repository: Utf8PathBuf,
    files: Arc<dyn SqlFileSystem>,
    cache: SqlCache,
}

impl SqlSource {
    /// Creates a loader rooted at `repository`.
    #[must_use]
    pub fn new(repository: Utf8PathBuf, files: Arc<dyn SqlFileSystem>, cache: SqlCache) -> Self {
        Self {
            repository,
            files,
            cache,
        }
    }

    /// Configured repository root.
    #[must_use]
    pub fn repository(&self) -> &Utf8Path {
        &self.repository
    }

    /// Cache shared by this loader.
    #[must_use]
    pub const fn cache(&self) -> &SqlCache {
        &self.cache
    }

    /// Reads the `sql` attribute of a payload.
    ///
    /// Returns `Ok(None)` when the attribute is absent or not a string.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when a file reference escapes the repository
    /// or cannot be read.
    pub fn statement(&self, payload: Option<&serde_json::Value>) -> Result<Option<Arc<str>>, SourceError> {
        let Some(sql) = payload
            .and_then(|payload| payload.get("sql"))
            .and_then(serde_json::Value::as_str)
        else {
            return Ok(None);
        };
        self.load(sql).map(Some)
    }

    /// Loads SQL text, following a file reference when marked.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when a file reference escapes the repository
    /// or cannot be read.
    pub fn load(&self, sql: &str) -> Result<Arc<str>, SourceError> {
        match sql.strip_prefix(FILE_MARKER) {
            Some(reference) => self.load_file(reference),
            None => Ok(Arc::from(sql)),
        }
    }

    fn load_file(&self, reference: &str) -> Result<Arc<str>, SourceError> {
        let relative = confine(reference)?;
        let root = self
            .files
            .canonicalize(&self.repository)
            .map_err(|source| SourceError::Repository {
                path: self.repository.clone(),
                source,
            })?;

        let candidate = root.join(&relative);
        let path = self
            .files
            .canonicalize(&candidate)
            .map_err(|source| SourceError::Read {
                path: candidate.clone(),
                source,
            })?;
        if path == root || !path.starts_with(&root) {
            return Err(SourceError::OutsideRepository {
                path: path.into_string(),
            });
        }

        if let Some(sql) = self.cache.get(&path) {
            debug!(target: SOURCE_TARGET, path = %path, "sql file cache hit");
            return Ok(sql);
        }

        let sql: Arc<str> = self
            .files
            .read_to_string(&path)
            .map_err(|source| SourceError::Read {
                path: path.clone(),
                source,
            })?
            .into();
        debug!(target: SOURCE_TARGET, path = %path, bytes = sql.len(), "loaded sql file");
        self.cache.insert(path, Arc::clone(&sql));
        Ok(sql)
    }
}

/// Normalises a repository-relative reference without touching the
/// filesystem, rejecting any `..` that climbs above the root.
fn confine(reference: &str) -> Result<Utf8PathBuf, SourceError> {
    let outside = || SourceError::OutsideRepository {
        path: reference.to_owned(),
    };
    let mut parts: Vec<&str> = Vec::new();
    for component in Utf8Path::new(reference).components() {
        match component {
            Utf8Component::Normal(part) => parts.push(part),
            Utf8Component::ParentDir => {
                parts.pop().ok_or_else(outside)?;
            }
            Utf8Component::CurDir | Utf8Component::RootDir | Utf8Component::Prefix(_) => {}
        }
    }
    if parts.is_empty() {
        return Err(outside());
    }
    Ok(parts.iter().collect())
}
