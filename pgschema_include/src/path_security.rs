//! Path sandbox validation for include targets.
//!
//! Every `\i` target is interpreted relative to the sandbox root and must name a
//! regular file strictly inside it. Candidates are first checked lexically
//! (no `..` segment, not absolute) and then canonicalized so that symlinks
//! pointing outside the root are caught as well.
//!
//! ## Security
//! The lexical checks run before any filesystem access, so `\i ../outside.sql`
//! is rejected whether or not `outside.sql` exists.

use crate::error::{IncludeErrorKind, TraversalReason};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// The canonical directory outside of which no file may be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRoot {
    root: PathBuf,
}

impl SandboxRoot {
    /// Canonicalizes `root` and checks that it is a directory.
    pub async fn new(root: &Path) -> Result<Self, IncludeErrorKind> {
        let canonical =
            fs::canonicalize(root)
                .await
                .map_err(|e| IncludeErrorKind::InvalidSandboxRoot {
                    path: root.to_path_buf(),
                    reason: e.to_string(),
                })?;

        let metadata =
            fs::metadata(&canonical)
                .await
                .map_err(|e| IncludeErrorKind::InvalidSandboxRoot {
                    path: root.to_path_buf(),
                    reason: e.to_string(),
                })?;
        if !metadata.is_dir() {
            return Err(IncludeErrorKind::InvalidSandboxRoot {
                path: root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        Ok(Self { root: canonical })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Validates the file a resolution run starts from.
    ///
    /// Unlike include targets the root file may be given as an absolute path or
    /// relative to the current directory; it only has to end up inside the root.
    pub async fn validate_root_file(&self, path: &Path) -> Result<PathBuf, IncludeErrorKind> {
        let canonical = match fs::canonicalize(path).await {
            Ok(p) => p,
            Err(e) => return Err(missing_or_io(path.to_path_buf(), e)),
        };

        if !canonical.starts_with(&self.root) {
            return Err(IncludeErrorKind::PathTraversal {
                candidate: path.display().to_string(),
                root: self.root.clone(),
                reason: TraversalReason::EscapesRoot,
            });
        }

        ensure_regular_file(canonical).await
    }

    /// Validates a raw directive target and returns its canonical absolute path.
    pub async fn validate(&self, candidate: &str) -> Result<PathBuf, IncludeErrorKind> {
        if let Err(reason) = check_lexically(candidate) {
            return Err(self.traversal(candidate, reason));
        }

        let joined = self.root.join(candidate);
        let canonical = match fs::canonicalize(&joined).await {
            Ok(p) => p,
            Err(e) if is_missing(&e) => {
                // Still report an escape through a symlinked directory as traversal.
                let resolved = resolve_missing(&joined).await;
                if !resolved.starts_with(&self.root) {
                    return Err(self.traversal(candidate, TraversalReason::EscapesRoot));
                }
                return Err(IncludeErrorKind::FileNotFound {
                    path: normalize_path(&joined),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                return Err(IncludeErrorKind::Io {
                    path: joined,
                    source: e,
                });
            }
        };

        if !canonical.starts_with(&self.root) {
            return Err(self.traversal(candidate, TraversalReason::EscapesRoot));
        }
        if canonical == self.root {
            return Err(self.traversal(candidate, TraversalReason::IsRoot));
        }

        ensure_regular_file(canonical).await
    }

    fn traversal(&self, candidate: &str, reason: TraversalReason) -> IncludeErrorKind {
        IncludeErrorKind::PathTraversal {
            candidate: candidate.to_string(),
            root: self.root.clone(),
            reason,
        }
    }
}

/// Validates `candidate` against `sandbox_root` in one call.
pub async fn validate_include(
    candidate: &str,
    sandbox_root: &Path,
) -> Result<PathBuf, IncludeErrorKind> {
    SandboxRoot::new(sandbox_root).await?.validate(candidate).await
}

/// Rejects absolute targets and any literal `..` segment before touching the filesystem.
fn check_lexically(candidate: &str) -> Result<(), TraversalReason> {
    let path = Path::new(candidate);
    if path.is_absolute()
        || path.has_root()
        || path
            .components()
            .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
    {
        return Err(TraversalReason::AbsolutePath);
    }

    // Split on both separators so `a\..\b` is caught on every platform.
    if candidate.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(TraversalReason::ParentSegment);
    }

    Ok(())
}

async fn ensure_regular_file(canonical: PathBuf) -> Result<PathBuf, IncludeErrorKind> {
    match fs::metadata(&canonical).await {
        Ok(metadata) if metadata.is_file() => Ok(canonical),
        Ok(_) => Err(IncludeErrorKind::FileNotFound {
            path: canonical,
            reason: "not a regular file".to_string(),
        }),
        Err(e) => Err(missing_or_io(canonical, e)),
    }
}

fn is_missing(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

fn missing_or_io(path: PathBuf, e: std::io::Error) -> IncludeErrorKind {
    if is_missing(&e) {
        IncludeErrorKind::FileNotFound {
            path,
            reason: e.to_string(),
        }
    } else {
        IncludeErrorKind::Io { path, source: e }
    }
}

/// Best-effort location of a path that does not exist: canonicalize the parent
/// so symlinked directories are followed, else normalize lexically.
async fn resolve_missing(path: &Path) -> PathBuf {
    if let Some(parent) = path.parent()
        && let Ok(parent_canonical) = fs::canonicalize(parent).await
    {
        return match path.file_name() {
            Some(name) => parent_canonical.join(name),
            None => parent_canonical,
        };
    }
    normalize_path(path)
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut stack = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                stack.pop();
            }
            Component::Normal(c) => stack.push(c),
            Component::RootDir => {
                stack.clear();
            }
            _ => {}
        }
    }

    let mut result = PathBuf::from("/");
    for c in stack {
        result.push(c);
    }
    result
}
