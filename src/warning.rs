// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Non-fatal problems found during a conversion.

use crate::rewrite::Degradation;
use std::fmt;

/// A recoverable issue; the conversion still produced a complete document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A node on the branch had a role or content type that is not rendered.
    UnrecognizedContent {
        /// Id of the filtered node.
        node_id: String,
        /// Author role tag.
        role: String,
        /// Content type tag.
        kind: String,
    },

    /// A tool output had no code step to attach to and was dropped.
    UnpairedOutput {
        /// Id of the output node.
        node_id: String,
    },

    /// A span of text was emitted unmodified because its delimiters were unbalanced.
    RewriteDegradation {
        /// Id of the node whose text was being rewritten.
        node_id: String,
        /// What could not be rewritten.
        issue: Degradation,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnrecognizedContent {
                node_id,
                role,
                kind,
            } => write!(f, "skipped node {node_id}: unrecognized {role}/{kind} content"),
            Self::UnpairedOutput { node_id } => {
                write!(f, "dropped execution output {node_id}: no code step to pair with")
            }
            Self::RewriteDegradation { node_id, issue } => {
                write!(f, "node {node_id}: {issue}; span left unmodified")
            }
        }
    }
}
