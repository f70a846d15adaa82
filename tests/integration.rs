// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Integration tests for chatgpt2md conversion.

use chatgpt2md::renderer::RenderOptions;
use chatgpt2md::warning::Warning;
use chatgpt2md::{ErrorKind, convert};
use serde_json::{Value, json};

const T: f64 = 1_733_356_800.0; // 2024-12-05 00:00:00 UTC

/// Builds an export whose nodes form a single chain under an empty root.
fn chain(messages: &[Value]) -> String {
    let mut mapping = serde_json::Map::new();
    mapping.insert(
        "root".into(),
        json!({ "id": "root", "parent": null, "message": null }),
    );

    let mut parent = "root".to_owned();
    for (i, message) in messages.iter().enumerate() {
        let id = format!("n{i}");
        mapping.insert(
            id.clone(),
            json!({ "id": &id, "parent": &parent, "message": message }),
        );
        parent = id;
    }

    json!({ "current_node": parent, "mapping": mapping }).to_string()
}

fn text(role: &str, time: f64, body: &str) -> Value {
    json!({
        "author": { "role": role },
        "create_time": time,
        "content": { "content_type": "text", "parts": [body] }
    })
}

fn thoughts(time: f64, summary: &str, content: &str) -> Value {
    json!({
        "author": { "role": "assistant" },
        "create_time": time,
        "content": {
            "content_type": "thoughts",
            "thoughts": [{ "summary": summary, "content": content }]
        }
    })
}

fn utc() -> RenderOptions {
    RenderOptions {
        utc: true,
        ..Default::default()
    }
}

fn render(messages: &[Value]) -> String {
    convert(&chain(messages), &utc()).unwrap().markdown
}

#[test]
fn renders_plain_exchange() {
    let output = render(&[
        text("user", T, "hi"),
        text("assistant", T + 1.0, "hello"),
    ]);

    assert_eq!(
        output,
        "## User\n\n*2024-12-05 00:00:00*\n\nhi\n\n\
         ## Assistant\n\n*2024-12-05 00:00:01*\n\nhello\n"
    );
}

#[test]
fn attaches_thoughts_to_following_reply() {
    let output = render(&[
        text("user", T, "question"),
        thoughts(T + 1.0, "check", "ok"),
        text("assistant", T + 2.0, "done"),
    ]);

    assert_eq!(
        output,
        "## User\n\n*2024-12-05 00:00:00*\n\nquestion\n\n\
         ## Assistant\n\n*2024-12-05 00:00:02*\n\n\
         <details>\n<summary>Thinking</summary>\n\n> **check**\n> ok\n\n</details>\n\n\
         done\n"
    );
}

#[test]
fn rewrites_math_outside_fences_only() {
    let body = "Energy is \\(E=mc^2\\).\n\n```\n\\(x\\)\n```";
    let output = render(&[text("assistant", T, body)]);

    assert!(output.contains("Energy is $E=mc^2$."));
    assert!(output.contains("```\n\\(x\\)\n```"));
}

#[test]
fn pairs_code_with_execution_output() {
    let output = render(&[
        text("user", T, "add"),
        json!({
            "author": { "role": "assistant" },
            "create_time": T + 1.0,
            "recipient": "python",
            "metadata": { "reasoning_title": "Compute" },
            "content": { "content_type": "code", "language": "unknown", "text": "print(1+1)" }
        }),
        json!({
            "author": { "role": "tool", "name": "python" },
            "create_time": T + 1.0,
            "content": { "content_type": "execution_output", "text": "2" }
        }),
        text("assistant", T + 2.0, "It is 2."),
    ]);

    assert!(output.contains(
        "> **Compute**\n> ```python\n> print(1+1)\n> ```\n> ```\n> 2\n> ```\n\n</details>"
    ));
    assert_eq!(output.matches("> **").count(), 1);
}

#[test]
fn flushes_trailing_reasoning_as_standalone() {
    let output = render(&[
        text("user", T, "question"),
        thoughts(T + 1.0, "still thinking", ""),
    ]);

    assert_eq!(
        output,
        "## User\n\n*2024-12-05 00:00:00*\n\nquestion\n\n\
         <details>\n<summary>Thinking</summary>\n\n> **still thinking**\n\n</details>\n"
    );
}

#[test]
fn interleaves_image_placeholders() {
    let output = render(&[json!({
        "author": { "role": "user" },
        "create_time": T,
        "metadata": { "attachments": [{ "id": "file-abc", "name": "cat.png" }] },
        "content": {
            "content_type": "multimodal_text",
            "parts": [
                "before",
                {
                    "content_type": "image_asset_pointer",
                    "asset_pointer": "file-service://file-abc",
                    "width": 800,
                    "height": 600
                },
                "after"
            ]
        }
    })]);

    assert!(output.ends_with(
        "before\n\n[Image 1: cat.png]\n\
         <!-- attachment id=\"file-abc\" name=\"cat.png\" width=\"800\" height=\"600\" source=\"file-service\" -->\n\n\
         after\n"
    ));
}

#[test]
fn follows_current_branch_only() {
    let json = json!({
        "title": "Branches",
        "current_node": "b2",
        "mapping": {
            "root": { "id": "root", "message": null },
            "q": { "id": "q", "parent": "root", "message": text("user", T, "pick one") },
            "b1": { "id": "b1", "parent": "q", "message": text("assistant", T + 1.0, "first draft") },
            "b2": { "id": "b2", "parent": "q", "message": text("assistant", T + 2.0, "second draft") }
        }
    })
    .to_string();
    let output = convert(&json, &utc()).unwrap().markdown;

    assert!(output.starts_with("# Branches\n\n## User"));
    assert!(output.contains("second draft"));
    assert!(!output.contains("first draft"));
}

#[test]
fn collects_warnings_without_failing() {
    let conversion = convert(
        &chain(&[
            text("user", T, "hi"),
            json!({
                "author": { "role": "assistant" },
                "create_time": T + 1.0,
                "content": { "content_type": "tether_browsing_display", "result": "" }
            }),
            json!({
                "author": { "role": "tool" },
                "create_time": T + 2.0,
                "content": { "content_type": "execution_output", "text": "orphan" }
            }),
            text("assistant", T + 3.0, "```\nunclosed"),
        ]),
        &utc(),
    )
    .unwrap();

    assert!(conversion.markdown.contains("unclosed"));
    assert!(!conversion.markdown.contains("orphan"));
    assert!(matches!(
        conversion.warnings.as_slice(),
        [
            Warning::UnrecognizedContent { kind, .. },
            Warning::UnpairedOutput { .. },
            Warning::RewriteDegradation { .. },
        ] if kind == "tether_browsing_display"
    ));
}

#[test]
fn respects_hide_options() {
    let json = chain(&[
        text("user", T, "question"),
        thoughts(T + 1.0, "secret", "plan"),
        json!({
            "author": { "role": "assistant" },
            "create_time": T + 2.0,
            "metadata": { "model_slug": "o3" },
            "content": { "content_type": "text", "parts": ["answer"] }
        }),
    ]);
    let opts = RenderOptions {
        show_timestamps: false,
        show_model: false,
        show_reasoning: false,
        ..utc()
    };

    assert_eq!(
        convert(&json, &opts).unwrap().markdown,
        "## User\n\nquestion\n\n## Assistant\n\nanswer\n"
    );
}

#[test]
fn rejects_cyclic_branch() {
    let json = json!({
        "current_node": "a",
        "mapping": {
            "a": { "id": "a", "parent": "b" },
            "b": { "id": "b", "parent": "a" }
        }
    })
    .to_string();

    let err = convert(&json, &utc()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
}

#[test]
fn keeps_fence_split_across_parts() {
    let conversion = convert(
        &chain(&[json!({
            "author": { "role": "assistant" },
            "create_time": T,
            "content": { "content_type": "text", "parts": ["```latex", "\\(x\\)\n```"] }
        })]),
        &RenderOptions {
            show_timestamps: false,
            ..utc()
        },
    )
    .unwrap();

    assert_eq!(conversion.markdown, "## Assistant\n\n```latex\n\\(x\\)\n```\n");
    assert!(conversion.warnings.is_empty());
}

#[test]
fn keeps_thought_with_null_summary() {
    let conversion = convert(
        &chain(&[
            json!({
                "author": { "role": "assistant" },
                "create_time": T,
                "content": {
                    "content_type": "thoughts",
                    "thoughts": [{ "summary": null, "content": "important step" }]
                }
            }),
            text("assistant", T + 1.0, "done"),
        ]),
        &utc(),
    )
    .unwrap();

    assert!(conversion.markdown.contains("> important step\n\n</details>\n\ndone"));
    assert!(conversion.warnings.is_empty());
}

#[test]
fn carries_reasoning_past_user_turn() {
    let output = render(&[
        thoughts(T, "plan", ""),
        text("user", T + 1.0, "q"),
        text("assistant", T + 2.0, "ans"),
    ]);

    assert_eq!(
        output,
        "## User\n\n*2024-12-05 00:00:01*\n\nq\n\n\
         ## Assistant\n\n*2024-12-05 00:00:02*\n\n\
         <details>\n<summary>Thinking</summary>\n\n> **plan**\n\n</details>\n\n\
         ans\n"
    );
}
