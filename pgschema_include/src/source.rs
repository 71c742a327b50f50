//! Loaded SQL files and the optional content cache.

use crate::error::IncludeErrorKind;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::fs;
use tracing::trace;

/// A SQL file as read from disk. Immutable once loaded.
#[derive(Debug, PartialEq, Eq)]
pub struct SourceFile {
    path: Arc<Path>,
    content: Arc<str>,
}

impl SourceFile {
    pub fn new(path: impl Into<Arc<Path>>, content: impl Into<Arc<str>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Reads `path`, which is expected to be canonical already.
    pub async fn load(path: &Path) -> Result<Self, IncludeErrorKind> {
        let content = fs::read_to_string(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::NotADirectory => IncludeErrorKind::FileNotFound {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
            _ => IncludeErrorKind::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        trace!(path = %path.display(), bytes = content.len(), "Loaded source file");
        Ok(Self::new(path, content))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shared_path(&self) -> Arc<Path> {
        Arc::clone(&self.path)
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Loaded files keyed by canonical path.
///
/// Shared across runs only when the caller hands the same cache to several
/// resolvers; content is assumed stable for as long as the cache lives.
#[derive(Debug, Default)]
pub struct SourceCache {
    files: RwLock<HashMap<PathBuf, Arc<SourceFile>>>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<Arc<SourceFile>> {
        self.files
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(path)
            .cloned()
    }

    /// Returns the cached file or loads and inserts it.
    pub async fn get_or_load(&self, path: &Path) -> Result<Arc<SourceFile>, IncludeErrorKind> {
        if let Some(file) = self.get(path) {
            trace!(path = %path.display(), "Source cache hit");
            return Ok(file);
        }

        let file = Arc::new(SourceFile::load(path).await?);
        let mut files = self
            .files
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // A concurrent run may have won the race; keep the first copy.
        Ok(Arc::clone(
            files.entry(path.to_path_buf()).or_insert(file),
        ))
    }

    pub fn len(&self) -> usize {
        self.files
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.files
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}
