// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Node arena and active-branch extraction.
//!
//! Nodes are stored once in a flat arena and referenced by id; parent links
//! are resolved through an index rather than by owning pointers.

use crate::parser::{Message, Node};
use snafu::prelude::*;
use std::collections::HashMap;

/// Error type for a conversation tree that cannot be walked.
#[derive(Debug, Snafu)]
pub enum GraphError {
    /// `current_node` does not name a node in the mapping.
    #[snafu(display("current node `{id}` is not in the mapping"))]
    MissingCurrentNode {
        /// The dangling id.
        id: String,
    },

    /// A node's parent id does not name a node in the mapping.
    #[snafu(display("node `{child}` points to missing parent `{parent}`"))]
    BrokenParentChain {
        /// The node holding the dangling reference.
        child: String,
        /// The missing parent id.
        parent: String,
    },

    /// Following parent links from `current_node` never reached a root.
    #[snafu(display("cycle detected in parent chain starting at `{id}`"))]
    Cycle {
        /// The leaf the walk started from.
        id: String,
    },
}

/// An arena of conversation nodes indexed by id.
#[derive(Debug)]
pub struct NodeGraph<'a> {
    nodes: &'a [Node],
    index: HashMap<&'a str, usize>,
}

impl<'a> NodeGraph<'a> {
    /// Indexes the given nodes by id.
    #[must_use]
    pub fn new(nodes: &'a [Node]) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.as_str(), i))
            .collect();
        Self { nodes, index }
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph holds no nodes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&'a Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Returns the parent id of `id`, or `None` for a root or unknown id.
    #[must_use]
    pub fn parent(&self, id: &str) -> Option<&'a str> {
        self.node(id)?.parent.as_deref()
    }

    /// Returns the message carried by `id`, if any.
    #[must_use]
    pub fn message(&self, id: &str) -> Option<&'a Message> {
        self.node(id)?.message.as_ref()
    }

    /// Walks from `leaf` up to its root and returns the path root-first.
    ///
    /// The walk is bounded by the node count, so a cycle is reported instead
    /// of looping forever.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::MissingCurrentNode`] if `leaf` is unknown,
    /// [`GraphError::BrokenParentChain`] if a parent id is dangling, and
    /// [`GraphError::Cycle`] if no root is reached.
    pub fn active_branch(&self, leaf: &str) -> Result<Vec<&'a Node>, GraphError> {
        let mut current = self
            .node(leaf)
            .context(MissingCurrentNodeSnafu { id: leaf })?;
        let mut branch = vec![current];

        while let Some(parent_id) = current.parent.as_deref() {
            ensure!(branch.len() < self.len(), CycleSnafu { id: leaf });
            current = self.node(parent_id).context(BrokenParentChainSnafu {
                child: &current.id,
                parent: parent_id,
            })?;
            branch.push(current);
        }

        branch.reverse();
        tracing::debug!(leaf, depth = branch.len(), "extracted active branch");
        Ok(branch)
    }
}
