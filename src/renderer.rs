// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Markdown rendering for aggregated conversation branches.
//!
//! This module turns the [`RenderUnit`]s produced by
//! [`reasoning::aggregate`](crate::reasoning::aggregate) into a Markdown
//! document.
//!
//! # Output Format
//!
//! - An optional `# <title>` heading
//! - `## User` and `## Assistant` sections for each visible message
//! - An italic metadata line with the timestamp and model identifier
//! - Reasoning as a `<details>` block whose items are quoted, one bold
//!   summary line per item
//! - The message body with math delimiters rewritten
//! - Attachments as a `[Image N: name]` line plus an HTML comment carrying
//!   the attachment metadata
//!
//! # Example
//!
//! ```
//! use chatgpt2md::parser::{Content, Message, Part, Role};
//! use chatgpt2md::reasoning::RenderUnit;
//! use chatgpt2md::renderer::{render_document, RenderOptions};
//!
//! let message = Message {
//!     role: Role::User,
//!     author_name: None,
//!     create_time: Some(1_733_356_800.0),
//!     content: Content::Text(vec![Part::Text("Hello!".into())]),
//!     model: None,
//!     reasoning_title: None,
//!     recipient: None,
//!     hidden: false,
//! };
//! let units = [RenderUnit::Message { node_id: "a", message: &message, bundle: None }];
//!
//! let opts = RenderOptions { utc: true, ..Default::default() };
//! let doc = render_document(Some("Greeting"), &units, &opts);
//!
//! assert_eq!(
//!     doc.markdown,
//!     "# Greeting\n\n## User\n\n*2024-12-05 00:00:00*\n\nHello!\n"
//! );
//! ```

use crate::parser::{Attachment, Content, Message, Part, Role};
use crate::reasoning::{Bundle, ReasoningItem, ReasoningPayload, RenderUnit};
use crate::rewrite::{self, Rewrite};
use crate::warning::Warning;
use chrono::{DateTime, Local, Utc};
use std::fmt::Write;

/// Shown in place of a missing or invalid timestamp.
pub const UNKNOWN_TIME: &str = "unknown time";

const DEFAULT_BUNDLE_SUMMARY: &str = "Thinking";
const DEFAULT_CODE_TITLE: &str = "code reasoning";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Configuration options for Markdown rendering.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Whether to start the document with the conversation title.
    pub show_title: bool,

    /// Whether to include a timestamp line for each message.
    pub show_timestamps: bool,

    /// Whether to include the model identifier of assistant messages.
    pub show_model: bool,

    /// Whether to include reasoning bundles.
    pub show_reasoning: bool,

    /// Format timestamps in UTC instead of the local time zone.
    pub utc: bool,

    /// Number of heading levels to shift (0-5).
    ///
    /// A value of 0 produces H1/H2 headings (default).
    pub heading_offset: u8,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            show_title: true,
            show_timestamps: true,
            show_model: true,
            show_reasoning: true,
            utc: false,
            heading_offset: 0,
        }
    }
}

/// A rendered document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// The Markdown text, ending in a newline.
    pub markdown: String,
    /// Spans that were emitted without rewriting.
    pub warnings: Vec<Warning>,
}

/// Returns a markdown heading prefix with the given level and offset.
///
/// The heading level is clamped to a maximum of 6 (H6).
fn heading(level: u8, offset: u8) -> String {
    let actual = level.saturating_add(offset).min(6);
    "#".repeat(actual as usize)
}

/// Formats a Unix timestamp as `YYYY-MM-DD HH:MM:SS`.
///
/// Uses the local time zone unless `utc` is set. A missing or out-of-range
/// timestamp yields [`UNKNOWN_TIME`].
#[must_use]
pub fn format_timestamp(seconds: Option<f64>, utc: bool) -> String {
    let Some(dt) = seconds.and_then(to_datetime) else {
        return UNKNOWN_TIME.to_owned();
    };
    if utc {
        dt.format(TIMESTAMP_FORMAT).to_string()
    } else {
        dt.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

const fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Assistant => "Assistant",
        Role::System => "System",
        Role::Tool => "Tool",
        Role::Unknown => "Unknown",
    }
}

/// Escapes text for use inside an HTML element.
fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Makes a value safe inside a quoted attribute of an HTML comment.
fn comment_attr(s: &str) -> String {
    s.replace('"', "&quot;").replace("--", "&#45;&#45;")
}

/// Drops CRs, trailing whitespace, and leading blank lines.
fn normalize_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text = text.trim_end();
    let first = text.len() - text.trim_start().len();
    let line_start = text[..first].rfind('\n').map_or(0, |i| i + 1);
    text[line_start..].to_owned()
}

struct Renderer<'o> {
    opts: &'o RenderOptions,
    attachments: usize,
    warnings: Vec<Warning>,
}

impl Renderer<'_> {
    fn rewrite(&mut self, node_id: &str, text: &str) -> String {
        let Rewrite { text, issues } = rewrite::rewrite_math(text);
        self.warnings
            .extend(issues.into_iter().map(|issue| Warning::RewriteDegradation {
                node_id: node_id.to_owned(),
                issue,
            }));
        text
    }

    fn render_message(&mut self, out: &mut Vec<String>, node_id: &str, message: &Message, bundle: Option<&Bundle>) {
        out.push(format!(
            "{} {}",
            heading(2, self.opts.heading_offset),
            role_label(message.role)
        ));

        if let Some(metadata) = self.metadata_line(message) {
            out.push(metadata);
        }

        if self.opts.show_reasoning
            && let Some(bundle) = bundle
        {
            out.push(self.render_bundle(bundle));
        }

        let body = self.render_body(node_id, message);
        if !body.is_empty() {
            out.push(body);
        }
    }

    fn metadata_line(&self, message: &Message) -> Option<String> {
        let timestamp = self
            .opts
            .show_timestamps
            .then(|| format_timestamp(message.create_time, self.opts.utc));

        let model = if self.opts.show_model && message.role == Role::Assistant {
            message.model.as_deref()
        } else {
            None
        };

        match (timestamp, model) {
            (Some(ts), Some(model)) => Some(format!("*{ts} · {model}*")),
            (Some(ts), None) => Some(format!("*{ts}*")),
            (None, Some(model)) => Some(format!("*{model}*")),
            (None, None) => None,
        }
    }

    fn render_bundle(&mut self, bundle: &Bundle) -> String {
        let recaps: Vec<&str> = bundle.recaps().collect();
        let summary = if recaps.is_empty() {
            DEFAULT_BUNDLE_SUMMARY.to_owned()
        } else {
            escape_html(&recaps.join(" · "))
        };

        let items: Vec<String> = bundle
            .items
            .iter()
            .filter_map(|item| self.render_item(item))
            .collect();

        let mut block = String::new();
        writeln!(block, "<details>\n<summary>{summary}</summary>\n").unwrap();
        for item in &items {
            writeln!(block, "{item}\n").unwrap();
        }
        block.push_str("</details>");
        block
    }

    fn render_item(&mut self, item: &ReasoningItem) -> Option<String> {
        let quoted = match &item.payload {
            ReasoningPayload::Thought { summary, content } => {
                let mut lines = Vec::new();
                if !summary.is_empty() {
                    lines.push(format!("**{summary}**"));
                }
                if !content.is_empty() {
                    lines.push(content.replace("\r\n", "\n"));
                }
                rewrite::blockquote(&lines.join("\n"))
            }
            ReasoningPayload::Code {
                title,
                language,
                code,
                output,
            } => rewrite::quote_code_run(
                title.as_deref().unwrap_or(DEFAULT_CODE_TITLE),
                language.as_deref(),
                code,
                output.as_deref(),
            ),
            ReasoningPayload::Recap(_) => return None,
        };
        Some(self.rewrite(&item.node_id, &quoted))
    }

    fn render_body(&mut self, node_id: &str, message: &Message) -> String {
        let parts = match &message.content {
            Content::Text(parts) | Content::MultimodalText(parts) => parts.as_slice(),
            _ => &[],
        };

        let mut segments = Vec::new();
        let mut run = Vec::new();

        for part in parts {
            match part {
                Part::Text(text) => {
                    let text = normalize_text(text);
                    if !text.trim().is_empty() {
                        run.push(text);
                    }
                }
                Part::Attachment(attachment) => {
                    self.flush_text(node_id, &mut run, &mut segments);
                    segments.push(self.placeholder(attachment));
                }
            }
        }
        self.flush_text(node_id, &mut run, &mut segments);

        segments.join("\n\n")
    }

    /// Rewrites a run of consecutive text parts as one block, so fences may
    /// span part boundaries.
    fn flush_text(&mut self, node_id: &str, run: &mut Vec<String>, segments: &mut Vec<String>) {
        if !run.is_empty() {
            let joined = run.join("\n");
            run.clear();
            segments.push(self.rewrite(node_id, &joined));
        }
    }

    fn placeholder(&mut self, attachment: &Attachment) -> String {
        self.attachments += 1;
        let label = if attachment.is_image() {
            "Image"
        } else {
            "Attachment"
        };

        let mut out = match &attachment.name {
            Some(name) => format!("[{label} {}: {name}]", self.attachments),
            None => format!("[{label} {}]", self.attachments),
        };

        let dimension = |d: Option<u64>| d.map(|d| d.to_string()).unwrap_or_default();
        write!(
            out,
            "\n<!-- attachment id=\"{}\" name=\"{}\" width=\"{}\" height=\"{}\" source=\"{}\" -->",
            comment_attr(attachment.id.as_deref().unwrap_or_default()),
            comment_attr(attachment.name.as_deref().unwrap_or_default()),
            dimension(attachment.width),
            dimension(attachment.height),
            comment_attr(attachment.source.as_deref().unwrap_or_default()),
        )
        .unwrap();
        out
    }
}

/// Renders aggregated units as a Markdown document.
///
/// Sections are separated by one blank line and the document ends with a
/// newline. Standalone bundles are rendered without a heading.
#[must_use]
pub fn render_document(title: Option<&str>, units: &[RenderUnit<'_>], opts: &RenderOptions) -> Document {
    let mut renderer = Renderer {
        opts,
        attachments: 0,
        warnings: Vec::new(),
    };
    let mut blocks = Vec::new();

    if opts.show_title
        && let Some(title) = title
    {
        blocks.push(format!("{} {}", heading(1, opts.heading_offset), title.trim()));
    }

    for unit in units {
        match unit {
            RenderUnit::Message {
                node_id,
                message,
                bundle,
            } => renderer.render_message(&mut blocks, node_id, message, bundle.as_ref()),
            RenderUnit::Standalone(bundle) => {
                if opts.show_reasoning {
                    blocks.push(renderer.render_bundle(bundle));
                }
            }
        }
    }

    let mut markdown = blocks.join("\n\n");
    markdown.push('\n');

    Document {
        markdown,
        warnings: renderer.warnings,
    }
}
