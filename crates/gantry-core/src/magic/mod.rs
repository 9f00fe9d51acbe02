//! Magic directive preprocessor.
//!
//! Submissions may contain IPython-style meta-commands that the worker does
//! not understand natively. They are rewritten into plain Python here,
//! before the code is submitted:
//!
//! - A **block directive** (`%%name args`) on the first non-blank line takes
//!   the rest of the submission as one opaque body.
//! - A **line directive** (`%name args`) is replaced in place, keeping the
//!   line's indentation.
//!
//! Unknown directives pass through untouched. Handlers may also emit an
//! immediate notice (a validation error, a "not implemented" note) which is
//! shown to the user without running anything.

mod block;
mod line;
mod literal;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

pub use literal::{is_identifier, python_literal};

/// Severity of a magic notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Message produced by a directive handler instead of (or alongside) code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagicNotice {
    pub level: NoticeLevel,
    pub text: String,
}

impl MagicNotice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

/// All notices produced while preprocessing one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagicOutput {
    pub notices: Vec<MagicNotice>,
}

impl MagicOutput {
    /// Whether any notice is an error.
    pub fn has_errors(&self) -> bool {
        self.notices.iter().any(|n| n.level == NoticeLevel::Error)
    }

    /// Render as display text, one notice per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for notice in &self.notices {
            if notice.level == NoticeLevel::Error {
                out.push_str("Error: ");
            }
            out.push_str(&notice.text);
            out.push('\n');
        }
        out
    }
}

/// Result of preprocessing a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preprocessed {
    /// Code to submit. May be empty.
    pub code: String,
    /// Combined immediate output, if any handler produced one.
    pub immediate: Option<MagicOutput>,
}

/// What a single handler returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Rewrite {
    code: String,
    notice: Option<MagicNotice>,
}

impl Rewrite {
    fn code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            notice: None,
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            code: String::new(),
            notice: Some(MagicNotice::error(text)),
        }
    }

    fn with_notice(mut self, notice: MagicNotice) -> Self {
        self.notice = Some(notice);
        self
    }
}

type LineHandler = fn(&str) -> Rewrite;
type BlockHandler = fn(&str, &str) -> Rewrite;

/// A parsed `%%name args` header and the body that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDirective<'a> {
    /// Directive name without the sigil.
    pub name: &'a str,
    /// Trimmed text after the name on the header line.
    pub args: &'a str,
    /// Everything after the header line, verbatim.
    pub body: &'a str,
}

/// Parse a block directive from the first non-blank line of `code`.
pub fn parse_block(code: &str) -> Option<BlockDirective<'_>> {
    let mut offset = 0;
    for line in code.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            offset += line.len();
            continue;
        }

        let header = trimmed.strip_prefix("%%")?;
        let (name, args) = split_directive(header);
        return Some(BlockDirective {
            name,
            args,
            body: &code[offset + line.len()..],
        });
    }
    None
}

fn split_directive(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (text, ""),
    }
}

fn leading_whitespace(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Rewrites magic directives into plain Python.
pub struct MagicPreprocessor {
    lines: FxHashMap<&'static str, LineHandler>,
    blocks: FxHashMap<&'static str, BlockHandler>,
}

impl Default for MagicPreprocessor {
    fn default() -> Self {
        Self {
            lines: line::HANDLERS.iter().copied().collect(),
            blocks: block::HANDLERS.iter().copied().collect(),
        }
    }
}

impl MagicPreprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supported line directive names, sorted.
    pub fn line_directives(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.lines.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Supported block directive names, sorted.
    pub fn block_directives(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.blocks.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Rewrite every recognised directive in `code`.
    ///
    /// Code without a recognised directive is returned unchanged.
    pub fn process(&self, code: &str) -> Preprocessed {
        if let Some(block) = parse_block(code)
            && let Some(handler) = self.blocks.get(block.name)
        {
            let rewrite = handler(block.args, block.body);
            return Preprocessed {
                code: rewrite.code,
                immediate: rewrite.notice.map(|notice| MagicOutput {
                    notices: vec![notice],
                }),
            };
        }

        let mut matched = false;
        let mut lines = Vec::new();
        let mut notices = Vec::new();

        for line in code.split('\n') {
            match self.rewrite_line(line) {
                Some(rewrite) => {
                    matched = true;
                    if !rewrite.code.is_empty() {
                        lines.push(reindent(&rewrite.code, leading_whitespace(line)));
                    }
                    notices.extend(rewrite.notice);
                }
                None => lines.push(line.to_string()),
            }
        }

        if !matched {
            return Preprocessed {
                code: code.to_string(),
                immediate: None,
            };
        }

        Preprocessed {
            code: lines.join("\n"),
            immediate: (!notices.is_empty()).then_some(MagicOutput { notices }),
        }
    }

    fn rewrite_line(&self, line: &str) -> Option<Rewrite> {
        let directive = line.trim().strip_prefix('%')?;
        if directive.starts_with('%') {
            return None;
        }
        let (name, args) = split_directive(directive);
        let handler = self.lines.get(name)?;
        Some(handler(args))
    }
}

fn reindent(code: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return code.to_string();
    }
    code.split('\n')
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
