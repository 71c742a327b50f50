use crate::error::IncludeErrorKind;
use std::path::{Path, PathBuf};

/// Canonical paths currently being expanded, innermost last.
///
/// Each resolution run owns its own stack; a path may appear in two sibling
/// branches but never twice on the stack at the same time.
#[derive(Debug)]
pub struct ResolutionStack {
    paths: Vec<PathBuf>,
    max_depth: usize,
}

impl ResolutionStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            paths: Vec::new(),
            max_depth,
        }
    }

    /// Pushes `path`, failing if it is already being expanded or the depth limit is hit.
    pub fn enter(&mut self, path: &Path) -> Result<(), IncludeErrorKind> {
        if let Some(start) = self.paths.iter().position(|p| p == path) {
            let mut cycle = self.paths[start..].to_vec();
            cycle.push(path.to_path_buf());
            return Err(IncludeErrorKind::CircularDependency { cycle });
        }

        if self.paths.len() >= self.max_depth {
            return Err(IncludeErrorKind::MaxDepthExceeded {
                limit: self.max_depth,
                path: path.to_path_buf(),
            });
        }

        self.paths.push(path.to_path_buf());
        Ok(())
    }

    /// Pops the innermost path.
    pub fn exit(&mut self) -> Option<PathBuf> {
        self.paths.pop()
    }

    pub fn depth(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
