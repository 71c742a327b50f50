//! Line-oriented detection of `\i <path>` include directives.
//!
//! A line is a directive when, after leading whitespace, it starts with `\i`,
//! then at least one whitespace character, then a non-empty path running to the
//! end of the line (trailing whitespace trimmed). Everything else is literal
//! and passes through untouched.
//!
//! Detection is purely prefix based: a `\i` line inside a string literal or a
//! `$$` function body is still treated as a directive.

use std::ops::Range;

/// How a scanned line should be treated by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    Literal,
    Directive { target: &'a str },
}

/// One line of source text, with its terminator still attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedLine<'a> {
    /// 1-based line number within the owning file.
    pub number: usize,
    /// Byte offset of the line start within the owning file.
    pub offset: usize,
    /// The full line including its `\n` or `\r\n`, if any.
    pub text: &'a str,
    pub kind: LineKind<'a>,
}

impl<'a> ScannedLine<'a> {
    /// Byte range of the line, terminator included.
    pub fn span(&self) -> Range<usize> {
        self.offset..self.offset + self.text.len()
    }

    pub fn is_directive(&self) -> bool {
        matches!(self.kind, LineKind::Directive { .. })
    }

    /// The line terminator (`"\n"`, `"\r\n"` or `""` on a final unterminated line).
    pub fn line_ending(&self) -> &'a str {
        if self.text.ends_with("\r\n") {
            &self.text[self.text.len() - 2..]
        } else if self.text.ends_with('\n') {
            &self.text[self.text.len() - 1..]
        } else {
            ""
        }
    }
}

/// Where a [`Scanner`] stopped, so a scan can be resumed later on the same text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checkpoint {
    offset: usize,
    line: usize,
}

/// Lazy, single-pass iterator over the lines of a file.
#[derive(Debug, Clone)]
pub struct Scanner<'a> {
    content: &'a str,
    offset: usize,
    line: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(content: &'a str) -> Self {
        Self::resume(content, Checkpoint::default())
    }

    /// Continues scanning `content` from a previously taken checkpoint.
    pub fn resume(content: &'a str, checkpoint: Checkpoint) -> Self {
        Self {
            content,
            offset: checkpoint.offset.min(content.len()),
            line: checkpoint.line,
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            offset: self.offset,
            line: self.line,
        }
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = ScannedLine<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.content[self.offset..];
        if rest.is_empty() {
            return None;
        }

        let end = rest.find('\n').map_or(rest.len(), |i| i + 1);
        let text = &rest[..end];
        let offset = self.offset;
        self.offset += end;
        self.line += 1;

        let kind = match directive_target(text) {
            Some(target) => LineKind::Directive { target },
            None => LineKind::Literal,
        };

        Some(ScannedLine {
            number: self.line,
            offset,
            text,
            kind,
        })
    }
}

/// Scans `content` line by line.
pub fn scan(content: &str) -> Scanner<'_> {
    Scanner::new(content)
}

/// Returns the include target if `line` is a directive.
pub fn directive_target(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("\\i")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let target = rest.trim();
    (!target.is_empty()).then_some(target)
}
