//! The resolved include tree and its assembly into one SQL text.
//!
//! A [`ResolvedDocument`] mirrors the include structure: literal lines of one
//! file interleaved with the fully expanded documents of its directives, in
//! file order. [`assemble`] flattens it by plain concatenation.

use crate::source::SourceFile;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

/// Where a piece of output text came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub file: Arc<Path>,
    /// 1-based line within `file`.
    pub line: usize,
}

/// A directive replaced in place by the document it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Inclusion {
    /// Line of the directive in the including file.
    pub line: usize,
    /// Target as written after `\i`.
    pub target: String,
    /// Terminator of the directive line, re-emitted after an expansion that lacks one.
    pub line_ending: String,
    pub document: ResolvedDocument,
}

/// Literal lines are byte spans into the loaded file, never copies.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fragment {
    Literal { line: usize, span: Range<usize> },
    Include(Inclusion),
}

/// Output text with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece<'a> {
    pub text: &'a str,
    pub origin: Provenance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDocument {
    file: Arc<SourceFile>,
    fragments: Vec<Fragment>,
}

impl ResolvedDocument {
    pub fn new(file: Arc<SourceFile>) -> Self {
        Self {
            file,
            fragments: Vec::new(),
        }
    }

    pub(crate) fn push_literal(&mut self, line: usize, span: Range<usize>) {
        self.fragments.push(Fragment::Literal { line, span });
    }

    pub(crate) fn push_inclusion(&mut self, inclusion: Inclusion) {
        self.fragments.push(Fragment::Include(inclusion));
    }

    /// The file this document was expanded from.
    pub fn source(&self) -> &Path {
        self.file.path()
    }

    /// Flattens the tree into output order.
    pub fn pieces(&self) -> Vec<Piece<'_>> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into<'a>(&'a self, out: &mut Vec<Piece<'a>>) {
        for fragment in &self.fragments {
            match fragment {
                Fragment::Literal { line, span } => out.push(Piece {
                    text: &self.file.content()[span.clone()],
                    origin: self.origin(*line),
                }),
                Fragment::Include(inclusion) => {
                    let start = out.len();
                    inclusion.document.flatten_into(out);
                    let needs_terminator = out[start..]
                        .last()
                        .is_some_and(|piece| !piece.text.ends_with('\n'));
                    if needs_terminator && !inclusion.line_ending.is_empty() {
                        out.push(Piece {
                            text: inclusion.line_ending.as_str(),
                            origin: self.origin(inclusion.line),
                        });
                    }
                }
            }
        }
    }

    fn origin(&self, line: usize) -> Provenance {
        Provenance {
            file: self.file.shared_path(),
            line,
        }
    }

    /// Every file that took part in the expansion, in first-visit order.
    pub fn files(&self) -> Vec<&Path> {
        let mut files = Vec::new();
        self.collect_files(&mut files);
        files
    }

    fn collect_files<'a>(&'a self, files: &mut Vec<&'a Path>) {
        if !files.contains(&self.source()) {
            files.push(self.source());
        }
        for fragment in &self.fragments {
            if let Fragment::Include(inclusion) = fragment {
                inclusion.document.collect_files(files);
            }
        }
    }

    /// Maps a 1-based line of the assembled output back to its source.
    pub fn locate(&self, output_line: usize) -> Option<Provenance> {
        let mut current = 1;
        for piece in self.pieces() {
            if current == output_line {
                return Some(piece.origin);
            }
            if piece.text.ends_with('\n') {
                current += 1;
            }
        }
        None
    }

    /// Size in bytes of the assembled SQL text.
    pub fn output_len(&self) -> usize {
        self.pieces().iter().map(|piece| piece.text.len()).sum()
    }

    /// The assembled SQL text.
    pub fn to_sql(&self) -> String {
        assemble(self.pieces().iter().map(|piece| piece.text))
    }
}

/// Concatenates fragments in the given order, adding nothing in between.
pub fn assemble<'a>(fragments: impl IntoIterator<Item = &'a str>) -> String {
    fragments.into_iter().collect()
}
