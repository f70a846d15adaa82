// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! JSON parsing for ChatGPT conversation exports.
//!
//! A conversation export is a tree of message nodes keyed by id. Each node
//! points at its parent; editing or regenerating a message creates sibling
//! branches, and `current_node` marks the leaf of the branch the user was
//! looking at when the export was made.
//!
//! Parsing is deliberately lenient: unknown roles and content types are kept
//! as [`Role::Unknown`] and [`Content::Other`] so the aggregator can filter
//! them instead of the whole export failing to load.
//!
//! # Example
//!
//! ```
//! use chatgpt2md::parser::parse_export;
//!
//! let json = r#"{
//!     "title": "Greeting",
//!     "current_node": "b",
//!     "mapping": {
//!         "a": { "id": "a", "parent": null, "message": {
//!             "author": { "role": "user" },
//!             "create_time": 1733356800.0,
//!             "content": { "content_type": "text", "parts": ["hi"] }
//!         }},
//!         "b": { "id": "b", "parent": "a", "message": {
//!             "author": { "role": "assistant" },
//!             "create_time": "1733356801.5",
//!             "content": { "content_type": "text", "parts": ["hello"] }
//!         }}
//!     }
//! }"#;
//!
//! let export = parse_export(json).unwrap();
//! assert_eq!(export.current_node, "b");
//! assert_eq!(export.nodes.len(), 2);
//! ```

use serde::Deserialize;
use serde_json::Value;
use snafu::prelude::*;
use std::collections::BTreeMap;

/// Error type for export parsing failures.
#[derive(Debug, Snafu)]
pub enum ParseError {
    /// The input is not syntactically valid JSON.
    #[snafu(display("failed to parse JSON: {source}"))]
    Json {
        /// The underlying JSON parsing error.
        source: serde_json::Error,
    },

    /// The JSON is valid but does not have the shape of a conversation export.
    #[snafu(display("unexpected export structure: {source}"))]
    Schema {
        /// The underlying deserialization error.
        source: serde_json::Error,
    },

    /// A field required to locate the conversation is absent or null.
    #[snafu(display("missing required field `{field}`"))]
    MissingField {
        /// Name of the missing top-level field.
        field: &'static str,
    },
}

/// A parsed conversation export.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationExport {
    /// Conversation title as shown in the ChatGPT sidebar.
    pub title: Option<String>,

    /// Id of the leaf node of the visible branch.
    pub current_node: String,

    /// All nodes of the conversation tree, ordered by id.
    pub nodes: Vec<Node>,
}

/// One node of the conversation tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// The node id (the key in `mapping`).
    pub id: String,

    /// The parent node id, or `None` for a root.
    pub parent: Option<String>,

    /// The message carried by this node. Roots usually have none.
    pub message: Option<Message>,
}

/// Author role of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The human side of the conversation.
    User,
    /// The model.
    Assistant,
    /// System prompts and context injected by the product.
    System,
    /// Tool executions such as the Python sandbox or the browser.
    Tool,
    /// Any role string this crate does not know about.
    Unknown,
}

impl Role {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "system" => Self::System,
            "tool" => Self::Tool,
            _ => Self::Unknown,
        }
    }

    /// Returns the lowercase role tag used in the export format.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
            Self::Unknown => "unknown",
        }
    }
}

/// A single message attached to a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Who produced the message.
    pub role: Role,

    /// Author name, set for tool messages (e.g. `"python"`).
    pub author_name: Option<String>,

    /// Unix timestamp in (fractional) seconds.
    pub create_time: Option<f64>,

    /// The message payload.
    pub content: Content,

    /// Model identifier from `metadata.model_slug` (e.g. `"gpt-4o"`).
    pub model: Option<String>,

    /// Title of a code-reasoning step from `metadata.reasoning_title`.
    pub reasoning_title: Option<String>,

    /// Where an assistant message was addressed (`"python"` for code runs).
    pub recipient: Option<String>,

    /// Whether the product hides this message from the conversation view.
    pub hidden: bool,
}

/// The payload of a message, dispatched on `content.content_type`.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Plain text parts.
    Text(Vec<Part>),

    /// Text parts interleaved with attachments such as images.
    MultimodalText(Vec<Part>),

    /// Code the assistant sent to a tool.
    Code {
        /// Normalized language tag, if one is meaningful.
        language: Option<String>,
        /// The code itself.
        text: String,
    },

    /// Output of a tool run, paired with the preceding [`Content::Code`].
    ExecutionOutput(String),

    /// Chain-of-thought fragments.
    Thoughts(Vec<Thought>),

    /// A one-line recap of a reasoning phase (e.g. "Thought for 12s").
    ReasoningRecap(String),

    /// Any content type this crate does not render.
    Other(String),
}

impl Content {
    /// Returns the `content_type` tag this content was parsed from.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Text(_) => "text",
            Self::MultimodalText(_) => "multimodal_text",
            Self::Code { .. } => "code",
            Self::ExecutionOutput(_) => "execution_output",
            Self::Thoughts(_) => "thoughts",
            Self::ReasoningRecap(_) => "reasoning_recap",
            Self::Other(kind) => kind,
        }
    }
}

/// One entry of a `parts` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// A prose fragment.
    Text(String),
    /// A non-text part, rendered as a placeholder.
    Attachment(Attachment),
}

/// A non-text content part such as an uploaded or generated image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachment {
    /// The part's `content_type` (e.g. `"image_asset_pointer"`).
    pub content_type: String,
    /// Asset id with the pointer scheme removed.
    pub id: Option<String>,
    /// Original filename, recovered from the message's attachment metadata.
    pub name: Option<String>,
    /// Pixel width, for images.
    pub width: Option<u64>,
    /// Pixel height, for images.
    pub height: Option<u64>,
    /// Storage scheme of the asset pointer (e.g. `"file-service"`).
    pub source: Option<String>,
}

impl Attachment {
    /// Returns `true` if this attachment is an image.
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image")
    }
}

/// One chain-of-thought fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thought {
    /// Short heading of the fragment, empty when absent or null.
    pub summary: String,
    /// Body of the fragment, empty when absent or null.
    pub content: String,
}

#[derive(Deserialize)]
struct RawExport {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    current_node: Option<String>,
    #[serde(default)]
    mapping: Option<BTreeMap<String, RawNode>>,
}

#[derive(Deserialize)]
struct RawNode {
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    message: Option<Message>,
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;

        let role = get_str(&value, &["author", "role"]).map_or(Role::Unknown, Role::from_tag);
        let author_name = get_string(&value, &["author", "name"]);
        let create_time = value.get("create_time").and_then(parse_timestamp);
        let recipient = get_string(&value, &["recipient"]);
        let model = get_string(&value, &["metadata", "model_slug"]);
        let reasoning_title = get_string(&value, &["metadata", "reasoning_title"])
            .filter(|title| !title.trim().is_empty());
        let hidden = value
            .get("metadata")
            .and_then(|m| m.get("is_visually_hidden_from_conversation"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let content = value.get("content").map_or_else(
            || Content::Other(String::new()),
            |c| parse_content(c, &value, recipient.as_deref()),
        );

        Ok(Self {
            role,
            author_name,
            create_time,
            content,
            model,
            reasoning_title,
            recipient,
            hidden,
        })
    }
}

/// Accepts a timestamp as a JSON number or a numeric string.
fn parse_timestamp(value: &Value) -> Option<f64> {
    let seconds = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    seconds.is_finite().then_some(seconds)
}

fn parse_content(content: &Value, message: &Value, recipient: Option<&str>) -> Content {
    let kind = get_str(content, &["content_type"]).unwrap_or_default();
    match kind {
        "text" => Content::Text(parse_parts(content, message)),
        "multimodal_text" => Content::MultimodalText(parse_parts(content, message)),
        "code" => Content::Code {
            language: normalize_language(get_str(content, &["language"]), recipient),
            text: get_string(content, &["text"]).unwrap_or_default(),
        },
        "execution_output" => {
            Content::ExecutionOutput(get_string(content, &["text"]).unwrap_or_default())
        }
        "thoughts" => Content::Thoughts(
            content
                .get("thoughts")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter(|t| t.is_object())
                .map(|t| Thought {
                    summary: get_string(t, &["summary"]).unwrap_or_default(),
                    content: get_string(t, &["content"]).unwrap_or_default(),
                })
                .collect(),
        ),
        "reasoning_recap" => {
            Content::ReasoningRecap(get_string(content, &["content"]).unwrap_or_default())
        }
        other => Content::Other(other.to_owned()),
    }
}

/// Maps meaningless language tags to `None` and infers Python for sandbox calls.
fn normalize_language(language: Option<&str>, recipient: Option<&str>) -> Option<String> {
    let language = language.unwrap_or_default().trim().to_lowercase();
    match language.as_str() {
        "" | "unknown" | "plain" | "text" => recipient
            .filter(|r| r.trim().eq_ignore_ascii_case("python"))
            .map(|_| "python".to_owned()),
        _ => Some(language),
    }
}

fn parse_parts(content: &Value, message: &Value) -> Vec<Part> {
    let metadata = message
        .get("metadata")
        .and_then(|m| m.get("attachments"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    content
        .get("parts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|part| match part {
            Value::String(text) => Some(Part::Text(text.clone())),
            Value::Object(_) => Some(Part::Attachment(parse_attachment(part, metadata))),
            _ => None,
        })
        .collect()
}

fn parse_attachment(part: &Value, metadata: &[Value]) -> Attachment {
    let pointer = get_str(part, &["asset_pointer"]);
    let (source, id) = match pointer.and_then(|p| p.split_once("://")) {
        Some((scheme, id)) => (Some(scheme.to_owned()), Some(id.to_owned())),
        None => (None, pointer.or_else(|| get_str(part, &["id"])).map(str::to_owned)),
    };

    let meta = id
        .as_deref()
        .and_then(|id| metadata.iter().find(|m| get_str(m, &["id"]) == Some(id)));

    let name = get_string(part, &["name"]).or_else(|| meta.and_then(|m| get_string(m, &["name"])));
    let width = part
        .get("width")
        .and_then(Value::as_u64)
        .or_else(|| meta.and_then(|m| m.get("width")?.as_u64()));
    let height = part
        .get("height")
        .and_then(Value::as_u64)
        .or_else(|| meta.and_then(|m| m.get("height")?.as_u64()));

    Attachment {
        content_type: get_string(part, &["content_type"]).unwrap_or_default(),
        id,
        name,
        width,
        height,
        source,
    }
}

/// Navigates a JSON path and returns the string value at the end.
fn get_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    current.as_str()
}

/// Like [`get_str`] but returns an owned `String`.
fn get_string(value: &Value, path: &[&str]) -> Option<String> {
    get_str(value, path).map(str::to_owned)
}

/// Parses a JSON string into a [`ConversationExport`].
///
/// # Errors
///
/// Returns [`ParseError::Json`] for invalid JSON, [`ParseError::Schema`] when
/// the document is not shaped like an export, and [`ParseError::MissingField`]
/// when `mapping` or `current_node` is absent.
pub fn parse_export(json_str: &str) -> Result<ConversationExport, ParseError> {
    let value: Value = serde_json::from_str(json_str).context(JsonSnafu)?;
    export_from_value(value)
}

/// Builds a [`ConversationExport`] from an already-parsed JSON value.
///
/// # Errors
///
/// See [`parse_export`]; [`ParseError::Json`] is never returned.
pub fn export_from_value(value: Value) -> Result<ConversationExport, ParseError> {
    let raw = RawExport::deserialize(value).context(SchemaSnafu)?;
    let mapping = raw.mapping.context(MissingFieldSnafu { field: "mapping" })?;
    let current_node = raw
        .current_node
        .context(MissingFieldSnafu { field: "current_node" })?;

    let nodes = mapping
        .into_iter()
        .map(|(id, raw)| Node {
            id,
            parent: raw.parent.filter(|p| !p.is_empty()),
            message: raw.message,
        })
        .collect();

    Ok(ConversationExport {
        title: raw.title.filter(|t| !t.trim().is_empty()),
        current_node,
        nodes,
    })
}
