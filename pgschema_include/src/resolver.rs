//! # Include Resolution
//!
//! Expands `\i <path>` directives depth-first into a single [`ResolvedDocument`].
//!
//! ## Run lifecycle
//!
//! Every call to [`Resolver::resolve`] builds a private run: the canonical
//! sandbox root, a fresh [`ResolutionStack`] and a worklist of open files. The
//! worklist is an explicit vector of frames rather than native recursion, so
//! the depth ceiling from [`ResolverConfig::max_depth`] is enforced the same way
//! no matter how small the thread's stack is.
//!
//! For each open file the resolver:
//!
//! 1. **Enters** it on the stack, failing with a cycle error if it is already there.
//! 2. **Loads** it (through the source cache when one is in use).
//! 3. **Scans** it lazily; literal lines go straight into the file's document.
//! 4. **Expands** each directive by validating the target against the sandbox
//!    and opening it as a new frame.
//! 5. **Exits** when the scan is exhausted, popping the stack and splicing the
//!    finished document into its parent in place of the directive.
//!
//! The first failure ends the run. The error carries the breadcrumb of
//! directives that were being expanded, and no partial document escapes.

use crate::config::ResolverConfig;
use crate::document::{Inclusion, ResolvedDocument};
use crate::error::{Breadcrumb, BreadcrumbFrame, IncludeError, IncludeErrorKind};
use crate::path_security::SandboxRoot;
use crate::scanner::{Checkpoint, LineKind, Scanner};
use crate::source::{SourceCache, SourceFile};
use crate::stack::ResolutionStack;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Expands include directives. Cheap to share; holds no per-run state.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    config: ResolverConfig,
    cache: Option<Arc<SourceCache>>,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            cache: None,
        }
    }

    /// A resolver whose runs all read through `cache`.
    ///
    /// Only appropriate while the files under the sandbox do not change.
    pub fn with_cache(config: ResolverConfig, cache: Arc<SourceCache>) -> Self {
        Self {
            config,
            cache: Some(cache),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolves `root_file`, reading nothing outside `sandbox_root`.
    pub async fn resolve(
        &self,
        root_file: &Path,
        sandbox_root: &Path,
    ) -> Result<ResolvedDocument, IncludeError> {
        self.resolve_with_cancel(root_file, sandbox_root, &CancellationToken::new())
            .await
    }

    /// Like [`Resolver::resolve`], checking `cancel` before every filesystem access.
    pub async fn resolve_with_cancel(
        &self,
        root_file: &Path,
        sandbox_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<ResolvedDocument, IncludeError> {
        if cancel.is_cancelled() {
            return Err(IncludeErrorKind::Cancelled.into());
        }
        let sandbox = SandboxRoot::new(sandbox_root).await?;

        let cache = match (&self.cache, self.config.memoize) {
            (Some(shared), _) => Some(Arc::clone(shared)),
            (None, true) => Some(Arc::new(SourceCache::new())),
            (None, false) => None,
        };

        let run = Run {
            sandbox,
            stack: ResolutionStack::new(self.config.max_depth),
            frames: Vec::new(),
            cache,
            cancel,
        };
        let document = run.execute(root_file).await?;

        info!(
            "Resolved {} ({} files, {} bytes)",
            document.source().display(),
            document.files().len(),
            document.output_len()
        );
        Ok(document)
    }

    /// Resolves and assembles in one step.
    pub async fn resolve_to_sql(
        &self,
        root_file: &Path,
        sandbox_root: &Path,
    ) -> Result<String, IncludeError> {
        Ok(self.resolve(root_file, sandbox_root).await?.to_sql())
    }
}

/// Resolves `root_file` with default settings and returns the assembled SQL.
pub async fn resolve_file(root_file: &Path, sandbox_root: &Path) -> Result<String, IncludeError> {
    Resolver::default()
        .resolve_to_sql(root_file, sandbox_root)
        .await
}

/// The sandbox root used when none is given: the directory holding the root file.
pub fn default_sandbox_root(root_file: &Path) -> PathBuf {
    match root_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// A directive whose target is currently being expanded.
#[derive(Debug, Clone)]
struct PendingInclude {
    line: usize,
    target: String,
    line_ending: String,
}

/// One open file on the worklist.
struct Frame {
    source: Arc<SourceFile>,
    checkpoint: Checkpoint,
    document: ResolvedDocument,
    expanding: Option<PendingInclude>,
}

impl Frame {
    fn new(source: Arc<SourceFile>) -> Self {
        let document = ResolvedDocument::new(Arc::clone(&source));
        Self {
            source,
            checkpoint: Checkpoint::default(),
            document,
            expanding: None,
        }
    }

    /// Copies literal lines into the document up to the next directive.
    fn advance(&mut self) -> Option<PendingInclude> {
        let source = Arc::clone(&self.source);
        let mut scanner = Scanner::resume(source.content(), self.checkpoint);

        let mut directive = None;
        for line in scanner.by_ref() {
            match line.kind {
                LineKind::Literal => self.document.push_literal(line.number, line.span()),
                LineKind::Directive { target } => {
                    directive = Some(PendingInclude {
                        line: line.number,
                        target: target.to_string(),
                        line_ending: line.line_ending().to_string(),
                    });
                    break;
                }
            }
        }

        self.checkpoint = scanner.checkpoint();
        directive
    }
}

struct Run<'a> {
    sandbox: SandboxRoot,
    stack: ResolutionStack,
    frames: Vec<Frame>,
    cache: Option<Arc<SourceCache>>,
    cancel: &'a CancellationToken,
}

impl Run<'_> {
    async fn execute(mut self, root_file: &Path) -> Result<ResolvedDocument, IncludeError> {
        self.start(root_file).await?;
        self.drive().await
    }

    /// Validates the root file and opens it as the first frame.
    async fn start(&mut self, root_file: &Path) -> Result<(), IncludeError> {
        self.check_cancelled()?;
        let root = self
            .sandbox
            .validate_root_file(root_file)
            .await
            .map_err(|kind| self.fail(kind))?;
        self.open(root).await
    }

    /// Works the frame list until the root frame is finished.
    async fn drive(&mut self) -> Result<ResolvedDocument, IncludeError> {
        loop {
            let top = self.frames.len() - 1;
            if let Some(pending) = self.frames[top].advance() {
                trace!(
                    "Directive at {}:{}: \\i {}",
                    self.frames[top].source.path().display(),
                    pending.line,
                    pending.target
                );
                let target = pending.target.clone();
                self.frames[top].expanding = Some(pending);
                self.include(&target).await?;
                continue;
            }

            let finished = self.frames.remove(top);
            self.stack.exit();
            debug!("Leaving {}", finished.source.path().display());

            match self.frames.last_mut() {
                Some(parent) => {
                    let pending = parent.expanding.take();
                    debug_assert!(
                        pending.is_some(),
                        "finished {} without a pending directive in its parent",
                        finished.source.path().display()
                    );
                    if let Some(pending) = pending {
                        parent.document.push_inclusion(Inclusion {
                            line: pending.line,
                            target: pending.target,
                            line_ending: pending.line_ending,
                            document: finished.document,
                        });
                    }
                }
                None => return Ok(finished.document),
            }
        }
    }

    async fn include(&mut self, target: &str) -> Result<(), IncludeError> {
        self.check_cancelled()?;
        let path = match self.sandbox.validate(target).await {
            Ok(path) => path,
            Err(kind) => {
                warn!("Rejected include '{}': {}", target, kind);
                return Err(self.fail(kind));
            }
        };
        self.open(path).await
    }

    /// Pushes `path` on the stack and opens it as a new frame.
    async fn open(&mut self, path: PathBuf) -> Result<(), IncludeError> {
        if let Err(kind) = self.stack.enter(&path) {
            warn!("Refusing to enter {}: {}", path.display(), kind);
            return Err(self.fail(kind));
        }
        debug!(
            "Entering {} (depth {})",
            path.display(),
            self.stack.depth()
        );

        match self.load(&path).await {
            Ok(source) => {
                self.frames.push(Frame::new(source));
                Ok(())
            }
            Err(kind) => {
                if !matches!(kind, IncludeErrorKind::Cancelled) {
                    warn!("Failed to load {}: {}", path.display(), kind);
                }
                let err = self.fail(kind);
                self.stack.exit();
                Err(err)
            }
        }
    }

    async fn load(&self, path: &Path) -> Result<Arc<SourceFile>, IncludeErrorKind> {
        if self.cancel.is_cancelled() {
            return Err(IncludeErrorKind::Cancelled);
        }
        match &self.cache {
            Some(cache) => cache.get_or_load(path).await,
            None => SourceFile::load(path).await.map(Arc::new),
        }
    }

    fn check_cancelled(&self) -> Result<(), IncludeError> {
        if self.cancel.is_cancelled() {
            debug!("Resolution cancelled at depth {}", self.stack.depth());
            return Err(self.fail(IncludeErrorKind::Cancelled));
        }
        Ok(())
    }

    fn fail(&self, kind: IncludeErrorKind) -> IncludeError {
        IncludeError::new(kind, self.breadcrumb())
    }

    fn breadcrumb(&self) -> Breadcrumb {
        Breadcrumb::new(
            self.frames
                .iter()
                .filter_map(|frame| {
                    frame.expanding.as_ref().map(|pending| BreadcrumbFrame {
                        file: frame.source.path().to_path_buf(),
                        line: pending.line,
                        target: pending.target.clone(),
                    })
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_DEPTH;
    use anyhow::Result;
    use tempfile::TempDir;
    use tokio::fs;

    struct Tree {
        _temp: TempDir,
        root: PathBuf,
    }

    impl Tree {
        async fn new(files: &[(&str, &str)]) -> Result<Self> {
            let temp = TempDir::new()?;
            let root = fs::canonicalize(temp.path()).await?.join("schema");
            fs::create_dir(&root).await?;
            for (name, content) in files {
                let path = root.join(name);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(&path, content).await?;
            }
            Ok(Self { _temp: temp, root })
        }

        fn path(&self, name: &str) -> PathBuf {
            self.root.join(name)
        }

        async fn resolve(&self, name: &str) -> Result<String, IncludeError> {
            resolve_file(&self.path(name), &self.root).await
        }

        /// A bare run over this tree, driven step by step.
        async fn run<'a>(&self, cancel: &'a CancellationToken) -> Result<Run<'a>> {
            Ok(Run {
                sandbox: SandboxRoot::new(&self.root).await?,
                stack: ResolutionStack::new(DEFAULT_MAX_DEPTH),
                frames: Vec::new(),
                cache: None,
                cancel,
            })
        }
    }

    #[tokio::test]
    async fn test_directives_expand_in_place() -> Result<()> {
        let tree = Tree::new(&[
            ("main.sql", "\\i a.sql\n\\i b.sql\nL;\n"),
            ("a.sql", "A;\n"),
            ("b.sql", "B;\n"),
        ])
        .await?;

        assert_eq!(tree.resolve("main.sql").await?, "A;\nB;\nL;\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_targets_are_relative_to_sandbox_root() -> Result<()> {
        let tree = Tree::new(&[
            ("main.sql", "\\i tables/all.sql\n"),
            ("tables/all.sql", "\\i tables/users.sql\n"),
            ("tables/users.sql", "CREATE TABLE users ();\n"),
        ])
        .await?;

        assert_eq!(tree.resolve("main.sql").await?, "CREATE TABLE users ();\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_sibling_branches_may_share_a_file() -> Result<()> {
        let tree = Tree::new(&[
            ("main.sql", "\\i a.sql\n\\i b.sql\n"),
            ("a.sql", "\\i shared.sql\n"),
            ("b.sql", "\\i shared.sql\n"),
            ("shared.sql", "S;\n"),
        ])
        .await?;

        assert_eq!(tree.resolve("main.sql").await?, "S;\nS;\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_indirect_cycle_reports_loop_and_breadcrumb() -> Result<()> {
        let tree = Tree::new(&[
            ("main.sql", "-- root\n\\i a.sql\n"),
            ("a.sql", "\\i b.sql\n"),
            ("b.sql", "\n\n\\i a.sql\n"),
        ])
        .await?;

        let err = tree.resolve("main.sql").await.unwrap_err();
        match err.kind() {
            IncludeErrorKind::CircularDependency { cycle } => {
                assert_eq!(
                    cycle,
                    &vec![tree.path("a.sql"), tree.path("b.sql"), tree.path("a.sql")]
                );
            }
            other => panic!("expected cycle, got {other:?}"),
        }

        let frames = err.breadcrumb().frames();
        assert_eq!(frames.len(), 3);
        assert_eq!((frames[0].file.clone(), frames[0].line), (tree.path("main.sql"), 2));
        assert_eq!((frames[1].file.clone(), frames[1].line), (tree.path("a.sql"), 1));
        assert_eq!((frames[2].file.clone(), frames[2].line), (tree.path("b.sql"), 3));
        Ok(())
    }

    #[tokio::test]
    async fn test_max_depth_exceeded() -> Result<()> {
        let tree = Tree::new(&[
            ("d1.sql", "\\i d2.sql\n"),
            ("d2.sql", "\\i d3.sql\n"),
            ("d3.sql", "\\i d4.sql\n"),
            ("d4.sql", "leaf\n"),
        ])
        .await?;

        let resolver = Resolver::new(ResolverConfig::default().with_max_depth(3));
        let err = resolver
            .resolve(&tree.path("d1.sql"), &tree.root)
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            IncludeErrorKind::MaxDepthExceeded { limit: 3, .. }
        ));

        let resolver = Resolver::new(ResolverConfig::default().with_max_depth(4));
        let sql = resolver
            .resolve_to_sql(&tree.path("d1.sql"), &tree.root)
            .await?;
        assert_eq!(sql, "leaf\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_deep_acyclic_chain_resolves() -> Result<()> {
        let mut files = Vec::new();
        for i in 0..200 {
            files.push((format!("f{i}.sql"), format!("-- {i}\n\\i f{}.sql\n", i + 1)));
        }
        files.push(("f200.sql".to_string(), "done\n".to_string()));
        let refs: Vec<(&str, &str)> = files
            .iter()
            .map(|(n, c)| (n.as_str(), c.as_str()))
            .collect();
        let tree = Tree::new(&refs).await?;

        let resolver = Resolver::new(ResolverConfig::default().with_max_depth(1000));
        let sql = resolver
            .resolve_to_sql(&tree.path("f0.sql"), &tree.root)
            .await?;
        assert!(sql.starts_with("-- 0\n-- 1\n"));
        assert!(sql.ends_with("-- 199\ndone\n"));
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_run_yields_no_output() -> Result<()> {
        let tree = Tree::new(&[("main.sql", "\\i a.sql\n"), ("a.sql", "A\n")]).await?;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = Resolver::default()
            .resolve_with_cancel(&tree.path("main.sql"), &tree.root, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), IncludeErrorKind::Cancelled));
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_after_start_discards_partial_output() -> Result<()> {
        // a.sql does not exist: a cancelled run must not even validate it.
        let tree = Tree::new(&[("main.sql", "-- head\n\\i a.sql\ntail\n")]).await?;
        let cancel = CancellationToken::new();
        let mut run = tree.run(&cancel).await?;
        run.start(&tree.path("main.sql")).await?;

        cancel.cancel();
        let err = run.drive().await.unwrap_err();
        assert!(matches!(err.kind(), IncludeErrorKind::Cancelled));

        let frame = err.breadcrumb().last().unwrap();
        assert_eq!(frame.file, tree.path("main.sql"));
        assert_eq!((frame.line, frame.target.as_str()), (2, "a.sql"));

        // The literal before the directive was built, but only the error escapes.
        assert_eq!(run.frames.len(), 1);
        assert_eq!(run.frames[0].document.to_sql(), "-- head\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_load_leaves_stack_balanced() -> Result<()> {
        let tree = Tree::new(&[("main.sql", "\\i a.sql\n"), ("a.sql", "A\n")]).await?;
        let cancel = CancellationToken::new();
        let mut run = tree.run(&cancel).await?;
        run.start(&tree.path("main.sql")).await?;
        assert_eq!(run.stack.depth(), 1);

        cancel.cancel();
        let err = run.open(tree.path("a.sql")).await.unwrap_err();
        assert!(matches!(err.kind(), IncludeErrorKind::Cancelled));
        assert_eq!(run.stack.depth(), 1);
        assert_eq!(run.frames.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_include_reports_io_with_breadcrumb() -> Result<()> {
        let tree = Tree::new(&[("main.sql", "ok\n\\i data.sql\n")]).await?;
        fs::write(tree.path("data.sql"), [0xffu8, 0xfe, 0x00]).await?;

        let err = tree.resolve("main.sql").await.unwrap_err();
        match err.kind() {
            IncludeErrorKind::Io { path, .. } => assert_eq!(path, &tree.path("data.sql")),
            other => panic!("expected io error, got {other:?}"),
        }
        let frame = err.breadcrumb().last().unwrap();
        assert_eq!((frame.line, frame.target.as_str()), (2, "data.sql"));
        Ok(())
    }

    #[cfg(debug_assertions)]
    #[tokio::test]
    #[should_panic(expected = "without a pending directive")]
    async fn test_finished_frame_needs_a_pending_directive() {
        let tree = Tree::new(&[("main.sql", "M\n"), ("a.sql", "A\n")])
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let mut run = tree.run(&cancel).await.unwrap();
        run.start(&tree.path("main.sql")).await.unwrap();
        // Opened without a directive in main.sql asking for it.
        run.open(tree.path("a.sql")).await.unwrap();
        let _ = run.drive().await;
    }

    #[tokio::test]
    async fn test_memoized_run_matches_plain_run() -> Result<()> {
        let tree = Tree::new(&[
            ("main.sql", "\\i a.sql\n\\i a.sql\nend\n"),
            ("a.sql", "A\n"),
        ])
        .await?;

        let plain = Resolver::default()
            .resolve_to_sql(&tree.path("main.sql"), &tree.root)
            .await?;
        let memoized = Resolver::new(ResolverConfig::default().with_memoize(true))
            .resolve_to_sql(&tree.path("main.sql"), &tree.root)
            .await?;
        assert_eq!(plain, memoized);
        assert_eq!(plain, "A\nA\nend\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_shared_cache_is_filled_across_runs() -> Result<()> {
        let tree = Tree::new(&[("main.sql", "\\i a.sql\n"), ("a.sql", "A\n")]).await?;
        let cache = Arc::new(SourceCache::new());
        let resolver = Resolver::with_cache(ResolverConfig::default(), Arc::clone(&cache));

        resolver.resolve(&tree.path("main.sql"), &tree.root).await?;
        assert_eq!(cache.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_independent() -> Result<()> {
        let tree = Arc::new(
            Tree::new(&[
                ("one.sql", "\\i shared.sql\n1\n"),
                ("two.sql", "\\i shared.sql\n2\n"),
                ("shared.sql", "S\n"),
            ])
            .await?,
        );
        let resolver = Arc::new(Resolver::default());

        let mut handles = Vec::new();
        for (name, expected) in [("one.sql", "S\n1\n"), ("two.sql", "S\n2\n")] {
            let tree = Arc::clone(&tree);
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move {
                let sql = resolver
                    .resolve_to_sql(&tree.path(name), &tree.root)
                    .await?;
                assert_eq!(sql, expected);
                Ok::<_, anyhow::Error>(())
            }));
        }
        for handle in handles {
            handle.await??;
        }
        Ok(())
    }

    #[test]
    fn test_default_sandbox_root() {
        assert_eq!(
            default_sandbox_root(Path::new("/s/main.sql")),
            PathBuf::from("/s")
        );
        assert_eq!(default_sandbox_root(Path::new("main.sql")), PathBuf::from("."));
        assert_eq!(
            default_sandbox_root(Path::new("schema/main.sql")),
            PathBuf::from("schema")
        );
    }
}
