// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Fence-aware rewriting of message text.
//!
//! Two transformations live here:
//!
//! - [`rewrite_math`] turns LaTeX-style `\( … \)` and `\[ … \]` delimiters
//!   into the `$ … $` and `$$` forms most Markdown renderers understand.
//! - [`blockquote`] and [`quote_code_run`] wrap reasoning content in a
//!   contiguous quote block.
//!
//! Both agree on fence boundaries through [`FenceScanner`], which also
//! recognizes fences behind a quote marker (`> ```python`). Code inside a
//! fence or an inline code span is never modified. Unbalanced delimiters are
//! left as they are and reported as a [`Degradation`].

use std::fmt;

/// A span the rewriter could not process and emitted unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degradation {
    /// A code fence opened on `line` (1-based) is never closed.
    UnterminatedFence {
        /// Line of the opening fence.
        line: usize,
    },
    /// A `\[` on `line` (1-based) has no matching `\]`.
    UnterminatedDisplayMath {
        /// Line of the opening delimiter.
        line: usize,
    },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnterminatedFence { line } => {
                write!(f, "unterminated code fence opened on line {line}")
            }
            Self::UnterminatedDisplayMath { line } => {
                write!(f, "unterminated display math opened on line {line}")
            }
        }
    }
}

/// Output of a rewrite pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    /// The rewritten text.
    pub text: String,
    /// Spans that were left unmodified.
    pub issues: Vec<Degradation>,
}

/// How a line relates to code fences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    /// The line opens or closes a fence.
    Fence,
    /// The line is inside a fence.
    Code,
    /// The line is ordinary text.
    Prose,
}

#[derive(Debug, Clone, Copy)]
struct OpenFence {
    marker: usize,
    line: usize,
}

/// Line-by-line fence state.
///
/// A fence opens on a run of at least three backticks (optionally behind
/// quote markers) and closes on a bare run at least as long as the opening
/// one, so a longer outer fence can safely contain shorter ones.
#[derive(Debug, Clone, Default)]
pub struct FenceScanner {
    open: Option<OpenFence>,
}

impl FenceScanner {
    /// Creates a scanner positioned outside any fence.
    #[must_use]
    pub const fn new() -> Self {
        Self { open: None }
    }

    /// Classifies `line` (numbered `line_no`) and advances the fence state.
    pub fn classify(&mut self, line_no: usize, line: &str) -> LineClass {
        let marker = fence_marker(line);
        match (self.open, marker) {
            (None, Some(m)) => {
                self.open = Some(OpenFence {
                    marker: m.len,
                    line: line_no,
                });
                LineClass::Fence
            }
            (Some(open), Some(m)) if m.bare && m.len >= open.marker => {
                self.open = None;
                LineClass::Fence
            }
            (Some(_), _) => LineClass::Code,
            (None, None) => LineClass::Prose,
        }
    }

    /// Returns `true` while inside a fence.
    #[must_use]
    pub const fn is_inside(&self) -> bool {
        self.open.is_some()
    }

    /// Ends the scan, reporting a fence that was never closed.
    #[must_use]
    pub fn finish(self) -> Option<Degradation> {
        self.open
            .map(|open| Degradation::UnterminatedFence { line: open.line })
    }
}

struct FenceMarker {
    len: usize,
    bare: bool,
}

fn fence_marker(line: &str) -> Option<FenceMarker> {
    let (_, rest) = split_quote_prefix(line);
    let rest = rest.trim_start();
    let len = rest.bytes().take_while(|&b| b == b'`').count();
    if len < 3 {
        return None;
    }
    let info = &rest[len..];
    // ```foo``` on one line is an inline span, not a fence
    if info.contains('`') {
        return None;
    }
    Some(FenceMarker {
        len,
        bare: info.trim().is_empty(),
    })
}

/// Splits leading blockquote markers (`>`, `> >`, `  > `) from a line.
///
/// Returns `("", line)` when the line is not quoted.
#[must_use]
pub fn split_quote_prefix(line: &str) -> (&str, &str) {
    let bytes = line.as_bytes();
    let mut end = 0;
    let mut i = 0;
    loop {
        while i < bytes.len() && matches!(bytes[i], b' ' | b'\t') {
            i += 1;
        }
        if i < bytes.len() && bytes[i] == b'>' {
            i += 1;
            if i < bytes.len() && bytes[i] == b' ' {
                i += 1;
            }
            end = i;
        } else {
            break;
        }
    }
    line.split_at(end)
}

fn is_blank(line: &str) -> bool {
    split_quote_prefix(line).1.trim().is_empty()
}

fn is_list_item(line: &str) -> bool {
    let s = line.trim_start();
    let rest = if let Some(rest) = s.strip_prefix(['-', '*', '+']) {
        rest
    } else {
        let digits = s.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return false;
        }
        match s[digits..].strip_prefix(['.', ')']) {
            Some(rest) => rest,
            None => return false,
        }
    };
    rest.starts_with([' ', '\t'])
}

/// Looks back through the current paragraph for a list item.
fn in_list_context(out: &[String]) -> bool {
    for line in out.iter().rev() {
        let rest = split_quote_prefix(line).1;
        if rest.trim().is_empty() {
            return false;
        }
        if is_list_item(rest) {
            return true;
        }
    }
    false
}

/// Returns the index just past a backtick code span starting at `start`.
///
/// An unmatched run is literal text and only the run itself is skipped.
fn code_span_end(bytes: &[u8], start: usize) -> usize {
    let run = bytes[start..].iter().take_while(|&&b| b == b'`').count();
    let mut j = start + run;
    while j < bytes.len() {
        if bytes[j] == b'`' {
            let len = bytes[j..].iter().take_while(|&&b| b == b'`').count();
            if len == run {
                return j + len;
            }
            j += len;
        } else {
            j += 1;
        }
    }
    start + run
}

/// Finds the first `open … close` pair outside inline code spans.
///
/// Returns the byte offset of `open`, the trimmed content, and the byte
/// offset just past `close`. Pairs with blank content are ignored.
fn find_delimited<'s>(s: &'s str, open: &str, close: &str) -> Option<(usize, &'s str, usize)> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'`' => i = code_span_end(bytes, i),
            b'\\' if bytes[i..].starts_with(open.as_bytes()) => {
                let content_start = i + open.len();
                if let Some(rel) = s[content_start..].find(close) {
                    let inner = s[content_start..content_start + rel].trim();
                    if !inner.is_empty() {
                        return Some((i, inner, content_start + rel + close.len()));
                    }
                }
                i = content_start;
            }
            // an escaped character never starts a delimiter
            b'\\' => i += 2,
            _ => i += 1,
        }
    }
    None
}

/// Rewrites every `\( … \)` on a line to `$ … $`.
fn rewrite_inline(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some((start, inner, end)) = find_delimited(rest, r"\(", r"\)") {
        out.push_str(&rest[..start]);
        out.push('$');
        out.push_str(inner);
        out.push('$');
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}

/// Index of the `\]` line closing a display block opened before `from`.
///
/// A fence boundary ends the search; math never spans into code.
fn find_display_close(lines: &[&str], from: usize) -> Option<usize> {
    for (j, line) in lines.iter().enumerate().skip(from) {
        if fence_marker(line).is_some() {
            return None;
        }
        if split_quote_prefix(line).1.trim() == r"\]" {
            return Some(j);
        }
    }
    None
}

/// Emits a `$$` block with exactly one blank line before it.
fn push_display_block(out: &mut Vec<String>, prefix: &str, body: &[&str]) {
    let indent = if in_list_context(out) { "  " } else { "" };

    while out.len() >= 2 && out.iter().rev().take(2).all(|l| is_blank(l)) {
        out.pop();
    }
    if out.last().is_some_and(|l| !is_blank(l)) {
        out.push(prefix.trim_end().to_owned());
    }

    out.push(format!("{prefix}{indent}$$"));
    for line in body {
        out.push(format!("{prefix}{indent}{line}").trim_end().to_owned());
    }
    out.push(format!("{prefix}{indent}$$"));
}

/// Skips blank input after a display block and emits one separator if more follows.
fn close_display_block(lines: &[&str], from: usize, prefix: &str, out: &mut Vec<String>) -> usize {
    let next = from + lines[from..].iter().take_while(|l| is_blank(l)).count();
    if next < lines.len() {
        out.push(prefix.trim_end().to_owned());
    }
    next
}

/// Converts LaTeX math delimiters outside code fences.
///
/// - `\( … \)` becomes `$ … $`.
/// - A `\[` line through a `\]` line becomes a `$$` block, separated from the
///   surrounding text by exactly one blank line and indented two spaces when
///   it continues a list item.
/// - `\[ … \]` within a single line is split out into its own `$$` block.
///
/// Quoted lines are handled like plain ones with their quote prefix carried
/// onto every emitted line. Fenced lines, inline code spans, and escapes such
/// as `\~` and `\@` are left untouched. Running this on its own output
/// changes nothing.
///
/// # Example
///
/// ```
/// use chatgpt2md::rewrite::rewrite_math;
///
/// let out = rewrite_math("Energy: \\(E=mc^2\\)\n```\n\\(x\\)\n```");
/// assert_eq!(out.text, "Energy: $E=mc^2$\n```\n\\(x\\)\n```");
/// assert!(out.issues.is_empty());
/// ```
#[must_use]
pub fn rewrite_math(text: &str) -> Rewrite {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut issues = Vec::new();
    let mut fences = FenceScanner::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if fences.classify(i + 1, line) != LineClass::Prose {
            out.push(line.to_owned());
            i += 1;
            continue;
        }

        let (prefix, rest) = split_quote_prefix(line);

        if rest.trim() == r"\[" {
            if let Some(close) = find_display_close(&lines, i + 1) {
                let body: Vec<&str> = lines[i + 1..close]
                    .iter()
                    .map(|l| split_quote_prefix(l).1.trim())
                    .collect();
                push_display_block(&mut out, prefix, &body);
                i = close_display_block(&lines, close + 1, prefix, &mut out);
            } else {
                issues.push(Degradation::UnterminatedDisplayMath { line: i + 1 });
                out.push(line.to_owned());
                i += 1;
            }
            continue;
        }

        if let Some((start, math, end)) = find_delimited(rest, r"\[", r"\]") {
            let before = rest[..start].trim_end();
            let after = rest[end..].trim_start();
            if !before.is_empty() {
                out.push(format!("{prefix}{}", rewrite_inline(before)));
            }
            push_display_block(&mut out, prefix, &math.lines().map(str::trim).collect::<Vec<_>>());
            if after.is_empty() {
                i = close_display_block(&lines, i + 1, prefix, &mut out);
            } else {
                out.push(prefix.trim_end().to_owned());
                out.push(format!("{prefix}{}", rewrite_inline(after)));
                i += 1;
            }
            continue;
        }

        out.push(format!("{prefix}{}", rewrite_inline(rest)));
        i += 1;
    }

    issues.extend(fences.finish());
    Rewrite {
        text: out.join("\n"),
        issues,
    }
}

/// Prefixes every line with a quote marker.
///
/// Blank lines become a bare `>` so the result is one contiguous quote.
#[must_use]
pub fn blockquote(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            if line.trim().is_empty() {
                ">".to_owned()
            } else {
                format!("> {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Returns a backtick fence longer than any backtick run in `content`.
fn fence_for(content: &str) -> String {
    let longest = content
        .split(|c: char| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    "`".repeat((longest + 1).max(3))
}

/// Renders a code-reasoning step as a single quote block.
///
/// The block holds a bold title line, the code fence, and (when present) a
/// second fence with the execution output.
///
/// # Example
///
/// ```
/// use chatgpt2md::rewrite::quote_code_run;
///
/// let quoted = quote_code_run("Adding", Some("python"), "print(1 + 1)", Some("2"));
/// assert_eq!(
///     quoted,
///     "> **Adding**\n> ```python\n> print(1 + 1)\n> ```\n> ```\n> 2\n> ```"
/// );
/// ```
#[must_use]
pub fn quote_code_run(title: &str, language: Option<&str>, code: &str, output: Option<&str>) -> String {
    let mut lines = vec![format!("**{}**", title.trim())];

    let fence = fence_for(code);
    lines.push(format!("{fence}{}", language.unwrap_or_default()));
    lines.push(code.trim_end_matches('\n').to_owned());
    lines.push(fence);

    if let Some(output) = output.filter(|o| !o.trim().is_empty()) {
        let fence = fence_for(output);
        lines.push(fence.clone());
        lines.push(output.trim_matches('\n').to_owned());
        lines.push(fence);
    }

    blockquote(&lines.join("\n"))
}
