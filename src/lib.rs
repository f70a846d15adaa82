// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Convert ChatGPT conversation exports to Markdown.
//!
//! This crate turns the JSON tree of a single ChatGPT conversation into a
//! readable Markdown transcript of the branch the user was viewing.
//!
//! # Overview
//!
//! A conversation export stores every message ever written, including
//! regenerated answers and edited prompts, as a tree. Converting it takes
//! four steps:
//!
//! 1. Parse the JSON into typed nodes ([`parser`])
//! 2. Walk parent links from `current_node` to the root ([`graph`])
//! 3. Group hidden reasoning fragments with the reply they precede
//!    ([`reasoning`])
//! 4. Render Markdown, rewriting LaTeX delimiters outside code fences
//!    ([`renderer`], [`rewrite`])
//!
//! The conversion is a pure function; it performs no I/O and only emits
//! `tracing` debug events.
//!
//! # Example
//!
//! ```
//! use chatgpt2md::{convert, renderer::RenderOptions};
//!
//! let json = r#"{
//!     "title": "Physics",
//!     "current_node": "b",
//!     "mapping": {
//!         "a": { "id": "a", "message": {
//!             "author": { "role": "user" },
//!             "create_time": 1733356800,
//!             "content": { "content_type": "text", "parts": ["Famous formula?"] }
//!         }},
//!         "b": { "id": "b", "parent": "a", "message": {
//!             "author": { "role": "assistant" },
//!             "create_time": 1733356801,
//!             "content": { "content_type": "text", "parts": ["\\(E=mc^2\\)"] }
//!         }}
//!     }
//! }"#;
//!
//! let opts = RenderOptions { show_timestamps: false, ..Default::default() };
//! let conversion = convert(json, &opts).unwrap();
//!
//! assert_eq!(
//!     conversion.markdown,
//!     "# Physics\n\n## User\n\nFamous formula?\n\n## Assistant\n\n$E=mc^2$\n"
//! );
//! assert!(conversion.warnings.is_empty());
//! ```
//!
//! # Modules
//!
//! - [`parser`]: JSON parsing and type definitions for conversation exports
//! - [`graph`]: node arena and active-branch extraction
//! - [`reasoning`]: grouping of reasoning fragments into bundles
//! - [`rewrite`]: fence-aware math rewriting and blockquoting
//! - [`renderer`]: Markdown generation with configurable output options
//! - [`warning`]: non-fatal issues reported alongside the output

#![deny(missing_docs)]

pub mod graph;
pub mod parser;
pub mod reasoning;
pub mod renderer;
pub mod rewrite;
pub mod warning;

use graph::{GraphError, NodeGraph};
use parser::{ConversationExport, ParseError};
use renderer::RenderOptions;
use snafu::prelude::*;
use warning::Warning;

/// Error type for a conversion that produced no output.
#[derive(Debug, Snafu)]
pub enum ConvertError {
    /// The export could not be parsed.
    #[snafu(display("{source}"))]
    Parse {
        /// The underlying parse error.
        source: ParseError,
    },

    /// The conversation tree could not be walked.
    #[snafu(display("{source}"))]
    Graph {
        /// The underlying graph error.
        source: GraphError,
    },
}

/// Broad category of a [`ConvertError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input is not valid JSON.
    InvalidJson,
    /// The input is JSON but not a walkable conversation.
    MalformedInput,
}

impl ConvertError {
    /// Returns the category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse {
                source: ParseError::Json { .. },
            } => ErrorKind::InvalidJson,
            Self::Parse { .. } | Self::Graph { .. } => ErrorKind::MalformedInput,
        }
    }
}

/// The result of a successful conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    /// The Markdown document, ending in a newline.
    pub markdown: String,
    /// Recoverable issues met along the way, in branch order.
    pub warnings: Vec<Warning>,
}

/// Converts a conversation export from JSON text to Markdown.
///
/// # Errors
///
/// Returns [`ConvertError`] if the JSON is invalid, required fields are
/// missing, or the parent chain from `current_node` is broken or cyclic.
pub fn convert(json: &str, opts: &RenderOptions) -> Result<Conversion, ConvertError> {
    let export = parser::parse_export(json).context(ParseSnafu)?;
    convert_export(&export, opts)
}

/// Converts an already-parsed export to Markdown.
///
/// # Errors
///
/// Returns [`ConvertError::Graph`] if the active branch cannot be extracted.
pub fn convert_export(
    export: &ConversationExport,
    opts: &RenderOptions,
) -> Result<Conversion, ConvertError> {
    let graph = NodeGraph::new(&export.nodes);
    let branch = graph
        .active_branch(&export.current_node)
        .context(GraphSnafu)?;

    let aggregated = reasoning::aggregate(&branch);
    let document = renderer::render_document(export.title.as_deref(), &aggregated.units, opts);

    let mut warnings = aggregated.warnings;
    warnings.extend(document.warnings);

    Ok(Conversion {
        markdown: document.markdown,
        warnings,
    })
}
