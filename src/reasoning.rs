// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Grouping of reasoning fragments into collapsible bundles.
//!
//! Reasoning models interleave hidden work with visible replies: thought
//! fragments, code sent to the Python tool together with its output, and a
//! short recap. On the exported branch these show up as separate nodes before
//! the assistant's text. [`aggregate`] walks the branch once, collects those
//! fragments into a pending [`Bundle`], and attaches the bundle to the next
//! assistant reply, even when a user message comes in between. Fragments still
//! pending when the branch ends become a standalone bundle.

use crate::parser::{Content, Message, Node, Part, Role, Thought};
use crate::warning::Warning;
use std::cmp::Ordering;
use tracing::debug;

/// Ordering key of a reasoning item.
///
/// Items are ordered by creation time, falling back to the discovery counter
/// for untimed fragments, and then by discovery order.
#[derive(Debug, Clone, Copy)]
pub struct SortKey {
    /// Creation time in seconds, or the discovery counter when untimed.
    pub time: f64,
    /// Position in which the fragment was encountered during the walk.
    pub seq: u64,
}

impl SortKey {
    #[allow(clippy::cast_precision_loss)]
    fn new(time: Option<f64>, seq: u64) -> Self {
        Self {
            time: time.unwrap_or(seq as f64),
            seq,
        }
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

/// What a reasoning item shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasoningPayload {
    /// One chain-of-thought fragment.
    Thought {
        /// Short heading.
        summary: String,
        /// Body text.
        content: String,
    },

    /// Code sent to a tool, with the tool's output when it was paired.
    Code {
        /// Step title from the message metadata.
        title: Option<String>,
        /// Fence language.
        language: Option<String>,
        /// The code.
        code: String,
        /// The paired execution output.
        output: Option<String>,
    },

    /// A recap line such as "Thought for 12s".
    Recap(String),
}

/// One fragment of a reasoning bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningItem {
    /// Node the fragment came from.
    pub node_id: String,
    /// Author of the fragment.
    pub role: Role,
    /// Position within the bundle.
    pub key: SortKey,
    /// The fragment itself.
    pub payload: ReasoningPayload,
}

/// Reasoning items rendered together as one collapsible block, sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    /// The items in display order.
    pub items: Vec<ReasoningItem>,
}

impl Bundle {
    /// Returns the recap texts of the bundle in display order.
    pub fn recaps(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| match &item.payload {
            ReasoningPayload::Recap(text) => Some(text.as_str()),
            _ => None,
        })
    }
}

/// One entry of the output document.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderUnit<'a> {
    /// A visible user or assistant message, optionally preceded by reasoning.
    Message {
        /// Id of the message's node.
        node_id: &'a str,
        /// The message.
        message: &'a Message,
        /// Reasoning that led to this reply.
        bundle: Option<Bundle>,
    },

    /// Reasoning with no reply to attach to.
    Standalone(Bundle),
}

/// Result of [`aggregate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregated<'a> {
    /// Units in document order.
    pub units: Vec<RenderUnit<'a>>,
    /// Nodes that were skipped or could not be placed.
    pub warnings: Vec<Warning>,
}

/// Reasoning collected since the last flush.
enum Pending {
    Idle,
    Accumulating(Vec<ReasoningItem>),
}

impl Pending {
    fn push(&mut self, item: ReasoningItem) {
        match self {
            Self::Idle => *self = Self::Accumulating(vec![item]),
            Self::Accumulating(items) => items.push(item),
        }
    }

    /// Attaches an output to the latest code item that has none yet.
    fn pair_output(&mut self, text: &str) -> bool {
        let Self::Accumulating(items) = self else {
            return false;
        };
        let unpaired = items.iter_mut().rev().find_map(|item| match &mut item.payload {
            ReasoningPayload::Code { output, .. } if output.is_none() => Some(output),
            _ => None,
        });
        unpaired.is_some_and(|output| {
            *output = Some(text.to_owned());
            true
        })
    }

    /// Takes the pending items as a sorted bundle and returns to idle.
    fn flush(&mut self) -> Option<Bundle> {
        match std::mem::replace(self, Self::Idle) {
            Self::Idle => None,
            Self::Accumulating(mut items) => {
                items.sort_by_key(|item| item.key);
                debug!(items = items.len(), "flushed reasoning bundle");
                Some(Bundle { items })
            }
        }
    }
}

/// Hands out discovery-ordered sort keys.
#[derive(Default)]
struct Discovery {
    next: u64,
}

impl Discovery {
    fn key(&mut self, time: Option<f64>) -> SortKey {
        let key = SortKey::new(time, self.next);
        self.next += 1;
        key
    }
}

enum Entry<'a> {
    Text,
    Thoughts(&'a [Thought]),
    Code {
        language: Option<&'a str>,
        text: &'a str,
    },
    Output(&'a str),
    Recap(&'a str),
}

struct Classified<'a> {
    node: &'a Node,
    message: &'a Message,
    entry: Entry<'a>,
}

/// Decides what a node contributes, or filters it out.
fn classify<'a>(node: &'a Node, warnings: &mut Vec<Warning>) -> Option<Classified<'a>> {
    let message = node.message.as_ref()?;
    if message.hidden {
        debug!(node = %node.id, "skipping hidden message");
        return None;
    }

    let entry = match (&message.content, message.role) {
        (Content::Text(_) | Content::MultimodalText(_), Role::User | Role::Assistant) => {
            Entry::Text
        }
        (Content::Thoughts(thoughts), Role::User | Role::Assistant) => Entry::Thoughts(thoughts),
        (Content::Code { language, text }, Role::User | Role::Assistant) => Entry::Code {
            language: language.as_deref(),
            text,
        },
        (Content::ReasoningRecap(text), Role::User | Role::Assistant) => Entry::Recap(text),
        (Content::ExecutionOutput(text), Role::Tool | Role::System) => Entry::Output(text),
        (Content::Text(_) | Content::MultimodalText(_), Role::System | Role::Tool) => {
            debug!(node = %node.id, role = message.role.as_str(), "skipping non-conversational text");
            return None;
        }
        (content, role) => {
            debug!(node = %node.id, role = role.as_str(), kind = content.kind(), "skipping unrecognized content");
            warnings.push(Warning::UnrecognizedContent {
                node_id: node.id.clone(),
                role: role.as_str().to_owned(),
                kind: content.kind().to_owned(),
            });
            return None;
        }
    };

    Some(Classified {
        node,
        message,
        entry,
    })
}

/// Returns `true` if a text message has anything to show.
fn has_visible_content(message: &Message) -> bool {
    match &message.content {
        Content::Text(parts) | Content::MultimodalText(parts) => parts.iter().any(|part| match part {
            Part::Text(text) => !text.trim().is_empty(),
            Part::Attachment(_) => true,
        }),
        _ => false,
    }
}

/// Groups the nodes of a branch into render units.
///
/// `branch` must be in root-to-leaf order, as returned by
/// [`NodeGraph::active_branch`](crate::graph::NodeGraph::active_branch).
///
/// - Thought fragments, code steps, and recaps accumulate in a pending bundle.
/// - A `code` node immediately followed by a tool `execution_output` is
///   paired into one item. An output arriving later pairs with the most
///   recent unpaired code item.
/// - An assistant text reply takes the pending bundle, sorted by
///   [`SortKey`]. A user message leaves the pending bundle for the next
///   assistant reply.
/// - Whatever is pending at the end becomes a final standalone unit.
#[must_use]
pub fn aggregate<'a>(branch: &[&'a Node]) -> Aggregated<'a> {
    let mut warnings = Vec::new();
    let classified: Vec<Classified<'a>> = branch
        .iter()
        .filter_map(|&node| classify(node, &mut warnings))
        .collect();

    let mut units = Vec::new();
    let mut pending = Pending::Idle;
    let mut discovery = Discovery::default();
    let mut entries = classified.into_iter().peekable();

    while let Some(Classified {
        node,
        message,
        entry,
    }) = entries.next()
    {
        let item = |key, payload| ReasoningItem {
            node_id: node.id.clone(),
            role: message.role,
            key,
            payload,
        };

        match entry {
            Entry::Thoughts(thoughts) => {
                for thought in thoughts {
                    let summary = thought.summary.trim();
                    let content = thought.content.trim();
                    if summary.is_empty() && content.is_empty() {
                        continue;
                    }
                    pending.push(item(
                        discovery.key(message.create_time),
                        ReasoningPayload::Thought {
                            summary: summary.to_owned(),
                            content: content.to_owned(),
                        },
                    ));
                }
            }
            Entry::Code { language, text } => {
                let paired = entries.next_if(|next| matches!(next.entry, Entry::Output(_)));
                let (output, output_time) = match paired {
                    Some(Classified {
                        entry: Entry::Output(output),
                        message: output_message,
                        ..
                    }) => (Some(output.to_owned()), output_message.create_time),
                    _ => (None, None),
                };
                pending.push(item(
                    discovery.key(message.create_time.or(output_time)),
                    ReasoningPayload::Code {
                        title: message.reasoning_title.clone(),
                        language: language.map(str::to_owned),
                        code: text.to_owned(),
                        output,
                    },
                ));
            }
            Entry::Output(text) => {
                if !pending.pair_output(text) {
                    warnings.push(Warning::UnpairedOutput {
                        node_id: node.id.clone(),
                    });
                }
            }
            Entry::Recap(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    pending.push(item(
                        discovery.key(message.create_time),
                        ReasoningPayload::Recap(text.to_owned()),
                    ));
                }
            }
            Entry::Text => {
                if !has_visible_content(message) {
                    debug!(node = %node.id, "skipping empty message");
                    continue;
                }
                let bundle = if message.role == Role::Assistant {
                    pending.flush()
                } else {
                    None
                };
                units.push(RenderUnit::Message {
                    node_id: &node.id,
                    message,
                    bundle,
                });
            }
        }
    }

    units.extend(pending.flush().map(RenderUnit::Standalone));

    Aggregated { units, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Builder {
        nodes: Vec<Node>,
    }

    impl Builder {
        fn new() -> Self {
            Self {
                nodes: vec![Node {
                    id: "root".into(),
                    parent: None,
                    message: None,
                }],
            }
        }

        fn push(self, role: Role, time: Option<f64>, content: Content) -> Self {
            self.push_message(Message {
                role,
                author_name: None,
                create_time: time,
                content,
                model: None,
                reasoning_title: None,
                recipient: None,
                hidden: false,
            })
        }

        fn push_message(mut self, message: Message) -> Self {
            let parent = self.nodes.last().map(|n| n.id.clone());
            self.nodes.push(Node {
                id: format!("n{}", self.nodes.len()),
                parent,
                message: Some(message),
            });
            self
        }

        fn text(self, role: Role, time: f64, text: &str) -> Self {
            self.push(role, Some(time), Content::Text(vec![Part::Text(text.into())]))
        }

        fn thoughts(self, time: Option<f64>, thoughts: &[(&str, &str)]) -> Self {
            let thoughts = thoughts
                .iter()
                .map(|(summary, content)| Thought {
                    summary: (*summary).into(),
                    content: (*content).into(),
                })
                .collect();
            self.push(Role::Assistant, time, Content::Thoughts(thoughts))
        }

        fn code(self, time: Option<f64>, code: &str) -> Self {
            self.push(
                Role::Assistant,
                time,
                Content::Code {
                    language: Some("python".into()),
                    text: code.into(),
                },
            )
        }

        fn output(self, time: Option<f64>, text: &str) -> Self {
            self.push(Role::Tool, time, Content::ExecutionOutput(text.into()))
        }

        fn refs(&self) -> Vec<&Node> {
            self.nodes.iter().collect()
        }
    }

    fn bundle_of<'a>(unit: &'a RenderUnit<'_>) -> &'a Bundle {
        match unit {
            RenderUnit::Message {
                bundle: Some(bundle),
                ..
            }
            | RenderUnit::Standalone(bundle) => bundle,
            RenderUnit::Message { bundle: None, .. } => panic!("unit has no bundle: {unit:?}"),
        }
    }

    fn summaries(bundle: &Bundle) -> Vec<String> {
        bundle
            .items
            .iter()
            .map(|item| match &item.payload {
                ReasoningPayload::Thought { summary, .. } => summary.clone(),
                ReasoningPayload::Code { code, .. } => code.clone(),
                ReasoningPayload::Recap(text) => text.clone(),
            })
            .collect()
    }

    #[test]
    fn emits_plain_messages_in_order() {
        let b = Builder::new()
            .text(Role::User, 1.0, "hi")
            .text(Role::Assistant, 2.0, "hello");
        let out = aggregate(&b.refs());

        assert_eq!(out.units.len(), 2);
        assert!(out.warnings.is_empty());
        for (unit, role) in out.units.iter().zip([Role::User, Role::Assistant]) {
            match unit {
                RenderUnit::Message {
                    message, bundle, ..
                } => {
                    assert_eq!(message.role, role);
                    assert!(bundle.is_none());
                }
                RenderUnit::Standalone(_) => panic!("unexpected standalone unit"),
            }
        }
    }

    #[test]
    fn attaches_thoughts_to_next_assistant_reply() {
        let b = Builder::new()
            .text(Role::User, 1.0, "question")
            .thoughts(Some(10.0), &[("check", "ok")])
            .text(Role::Assistant, 11.0, "done");
        let out = aggregate(&b.refs());

        assert_eq!(out.units.len(), 2);
        let RenderUnit::Message {
            message,
            bundle: Some(bundle),
            ..
        } = &out.units[1]
        else {
            panic!("expected assistant reply with bundle");
        };
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(
            bundle.items[0].payload,
            ReasoningPayload::Thought {
                summary: "check".into(),
                content: "ok".into(),
            }
        );
    }

    #[test]
    fn pairs_code_with_following_output() {
        let b = Builder::new()
            .code(Some(5.0), "print(2)")
            .output(Some(6.0), "2")
            .text(Role::Assistant, 7.0, "two");
        let out = aggregate(&b.refs());

        let bundle = bundle_of(&out.units[0]);
        assert_eq!(bundle.items.len(), 1);
        assert_eq!(
            bundle.items[0].payload,
            ReasoningPayload::Code {
                title: None,
                language: Some("python".into()),
                code: "print(2)".into(),
                output: Some("2".into()),
            }
        );
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn pairs_late_output_with_latest_unpaired_code() {
        let b = Builder::new()
            .code(Some(5.0), "a()")
            .thoughts(Some(5.5), &[("waiting", "")])
            .output(Some(6.0), "result")
            .text(Role::Assistant, 7.0, "done");
        let out = aggregate(&b.refs());

        let bundle = bundle_of(&out.units[0]);
        assert_eq!(bundle.items.len(), 2);
        assert!(matches!(
            &bundle.items[0].payload,
            ReasoningPayload::Code { output: Some(o), .. } if o == "result"
        ));
    }

    #[test]
    fn warns_about_output_without_code() {
        let b = Builder::new()
            .output(Some(1.0), "stray")
            .text(Role::Assistant, 2.0, "reply");
        let out = aggregate(&b.refs());

        assert_eq!(out.units.len(), 1);
        assert_eq!(
            out.warnings,
            vec![Warning::UnpairedOutput {
                node_id: "n1".into()
            }]
        );
    }

    #[test]
    fn flushes_trailing_reasoning_as_standalone() {
        let b = Builder::new()
            .text(Role::User, 1.0, "go")
            .thoughts(Some(2.0), &[("thinking", "hard")]);
        let out = aggregate(&b.refs());

        assert_eq!(out.units.len(), 2);
        assert!(matches!(&out.units[1], RenderUnit::Standalone(bundle) if bundle.items.len() == 1));
    }

    #[test]
    fn carries_pending_past_user_message() {
        let b = Builder::new()
            .thoughts(Some(1.0), &[("plan", "")])
            .text(Role::User, 2.0, "q")
            .text(Role::Assistant, 3.0, "ans");
        let out = aggregate(&b.refs());

        assert_eq!(out.units.len(), 2);
        assert!(matches!(
            out.units[0],
            RenderUnit::Message { bundle: None, .. }
        ));
        assert!(matches!(
            out.units[1],
            RenderUnit::Message { bundle: Some(_), .. }
        ));
        assert_eq!(summaries(bundle_of(&out.units[1])), ["plan"]);
    }

    #[test]
    fn sorts_bundle_by_time_then_discovery() {
        let b = Builder::new()
            .thoughts(Some(10.0), &[("t10-a", ""), ("t10-b", "")])
            .code(Some(5.0), "t5")
            .thoughts(Some(10.0), &[("t10-c", "")])
            .text(Role::Assistant, 11.0, "reply");
        let out = aggregate(&b.refs());

        let bundle = bundle_of(&out.units[0]);
        assert_eq!(summaries(bundle), ["t5", "t10-a", "t10-b", "t10-c"]);
        assert!(bundle.items.windows(2).all(|w| w[0].key <= w[1].key));
    }

    #[test]
    fn untimed_items_fall_back_to_discovery_order() {
        let b = Builder::new()
            .thoughts(None, &[("first", "")])
            .thoughts(None, &[("second", "")])
            .text(Role::Assistant, 3.0, "reply");
        let out = aggregate(&b.refs());

        assert_eq!(summaries(bundle_of(&out.units[0])), ["first", "second"]);
    }

    #[test]
    fn code_without_time_uses_output_time() {
        let b = Builder::new()
            .thoughts(Some(8.0), &[("late", "")])
            .code(None, "early")
            .output(Some(2.0), "x")
            .text(Role::Assistant, 9.0, "reply");
        let out = aggregate(&b.refs());

        assert_eq!(summaries(bundle_of(&out.units[0])), ["early", "late"]);
    }

    #[test]
    fn never_drops_fragments() {
        let b = Builder::new()
            .thoughts(Some(1.0), &[("a", "1"), ("b", "2")])
            .code(Some(2.0), "c")
            .output(Some(2.5), "out")
            .push(
                Role::Assistant,
                Some(3.0),
                Content::ReasoningRecap("Thought for 3s".into()),
            )
            .text(Role::Assistant, 4.0, "reply")
            .thoughts(Some(5.0), &[("d", "")])
            .code(Some(6.0), "e");
        let out = aggregate(&b.refs());

        let total: usize = out
            .units
            .iter()
            .filter_map(|unit| match unit {
                RenderUnit::Message { bundle, .. } => bundle.as_ref(),
                RenderUnit::Standalone(bundle) => Some(bundle),
            })
            .map(|bundle| bundle.items.len())
            .sum();
        assert_eq!(total, 6);
        assert_eq!(bundle_of(&out.units[0]).recaps().collect::<Vec<_>>(), ["Thought for 3s"]);
    }

    #[test]
    fn skips_blank_thoughts_and_recaps() {
        let b = Builder::new()
            .thoughts(Some(1.0), &[("  ", "\n")])
            .push(Role::Assistant, Some(1.0), Content::ReasoningRecap(" ".into()))
            .text(Role::Assistant, 2.0, "reply");
        let out = aggregate(&b.refs());

        assert!(matches!(
            out.units[0],
            RenderUnit::Message { bundle: None, .. }
        ));
    }

    #[test]
    fn filters_unrecognized_and_system_content() {
        let b = Builder::new()
            .text(Role::System, 0.0, "You are ChatGPT")
            .push(Role::Tool, Some(1.0), Content::Other("tether_quote".into()))
            .push(Role::Unknown, Some(1.0), Content::Text(vec![Part::Text("?".into())]))
            .text(Role::User, 2.0, "hi");
        let out = aggregate(&b.refs());

        assert_eq!(out.units.len(), 1);
        assert_eq!(out.warnings.len(), 2);
        assert!(matches!(
            &out.warnings[0],
            Warning::UnrecognizedContent { kind, .. } if kind == "tether_quote"
        ));
        assert!(matches!(
            &out.warnings[1],
            Warning::UnrecognizedContent { role, .. } if role == "unknown"
        ));
    }

    #[test]
    fn skips_hidden_messages() {
        let b = Builder::new().push_message(Message {
            role: Role::User,
            author_name: None,
            create_time: None,
            content: Content::Text(vec![Part::Text("context".into())]),
            model: None,
            reasoning_title: None,
            recipient: None,
            hidden: true,
        });
        let out = aggregate(&b.refs());

        assert!(out.units.is_empty());
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn empty_reply_keeps_bundle_pending() {
        let b = Builder::new()
            .thoughts(Some(1.0), &[("plan", "")])
            .text(Role::Assistant, 2.0, "   ")
            .text(Role::Assistant, 3.0, "answer");
        let out = aggregate(&b.refs());

        assert_eq!(out.units.len(), 1);
        assert_eq!(summaries(bundle_of(&out.units[0])), ["plan"]);
    }
}
