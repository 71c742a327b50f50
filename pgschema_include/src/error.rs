use std::fmt;
use std::path::{Path, PathBuf};

/// Why an include target was refused by the path sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalReason {
    /// The raw target contains a literal `..` segment.
    ParentSegment,
    /// The raw target is absolute (or carries a drive prefix).
    AbsolutePath,
    /// The canonical target lies outside the sandbox root.
    EscapesRoot,
    /// The canonical target is the sandbox root itself.
    IsRoot,
}

impl fmt::Display for TraversalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TraversalReason::ParentSegment => "contains a '..' segment",
            TraversalReason::AbsolutePath => "is an absolute path",
            TraversalReason::EscapesRoot => "resolves outside the sandbox root",
            TraversalReason::IsRoot => "resolves to the sandbox root itself",
        };
        f.write_str(text)
    }
}

/// What went wrong, independent of where in the include chain it happened.
#[derive(Debug, thiserror::Error)]
pub enum IncludeErrorKind {
    #[error("File not found: '{}' ({reason})", .path.display())]
    FileNotFound { path: PathBuf, reason: String },

    #[error("Path traversal rejected: '{candidate}' {reason} (sandbox root '{}')", .root.display())]
    PathTraversal {
        candidate: String,
        root: PathBuf,
        reason: TraversalReason,
    },

    #[error("Circular include detected: {}", format_cycle(.cycle))]
    CircularDependency { cycle: Vec<PathBuf> },

    #[error("Maximum include depth of {limit} exceeded while entering '{}'", .path.display())]
    MaxDepthExceeded { limit: usize, path: PathBuf },

    #[error("Failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid sandbox root '{}': {reason}", .path.display())]
    InvalidSandboxRoot { path: PathBuf, reason: String },

    #[error("Include resolution was cancelled")]
    Cancelled,
}

fn format_cycle(cycle: &[PathBuf]) -> String {
    cycle
        .iter()
        .map(|p| format!("'{}'", p.display()))
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// One step of an include chain: the directive at `file:line` that pulled in `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreadcrumbFrame {
    pub file: PathBuf,
    pub line: usize,
    pub target: String,
}

impl fmt::Display for BreadcrumbFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: \\i {}", self.file.display(), self.line, self.target)
    }
}

/// Ordered include chain from the root file down to the failing directive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Breadcrumb(Vec<BreadcrumbFrame>);

impl Breadcrumb {
    pub fn new(frames: Vec<BreadcrumbFrame>) -> Self {
        Self(frames)
    }

    pub fn frames(&self) -> &[BreadcrumbFrame] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The innermost frame, i.e. the directive that failed.
    pub fn last(&self) -> Option<&BreadcrumbFrame> {
        self.0.last()
    }

    /// Counts how often a file name appears in the chain, as an including file or as a target.
    pub fn mentions(&self, name: &str) -> usize {
        self.0
            .iter()
            .map(|frame| {
                let in_file = frame
                    .file
                    .file_name()
                    .is_some_and(|f| f.to_string_lossy() == name) as usize;
                let in_target = Path::new(&frame.target)
                    .file_name()
                    .is_some_and(|f| f.to_string_lossy() == name)
                    as usize;
                in_file + in_target
            })
            .sum()
    }
}

/// A failed resolution run: the cause plus the include chain that led to it.
#[derive(Debug)]
pub struct IncludeError {
    kind: IncludeErrorKind,
    breadcrumb: Breadcrumb,
}

impl IncludeError {
    pub fn new(kind: IncludeErrorKind, breadcrumb: Breadcrumb) -> Self {
        Self { kind, breadcrumb }
    }

    pub fn kind(&self) -> &IncludeErrorKind {
        &self.kind
    }

    pub fn breadcrumb(&self) -> &Breadcrumb {
        &self.breadcrumb
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, IncludeErrorKind::FileNotFound { .. })
    }

    pub fn is_traversal(&self) -> bool {
        matches!(self.kind, IncludeErrorKind::PathTraversal { .. })
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self.kind, IncludeErrorKind::CircularDependency { .. })
    }
}

impl From<IncludeErrorKind> for IncludeError {
    fn from(kind: IncludeErrorKind) -> Self {
        Self::new(kind, Breadcrumb::default())
    }
}

impl fmt::Display for IncludeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for frame in self.breadcrumb.frames() {
            write!(f, "\n  included from {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for IncludeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            IncludeErrorKind::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
