use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{HarnessError, Result};
use crate::flow::plan;
use crate::flow::steps::{flow_in, Expect};
use crate::harness::{assert, fs, CommandResult, Context, Scenario, Step};
use crate::scenarios::setup_project;

const EXTRACT_CONFIG: &str = "name: test-project
flow:
  plans_directory: ./plans
  oneshot_model: mock
  agent_model: mock
";

const PLAN_DEFAULTS: &str = "model: claude-3.5-sonnet\nworktree: test-worktree\n";

const RECIPE_CHAT: &str = r#"---
id: test-chat
title: test-chat
type: chat
status: completed
---

Initial user prompt asking for cookie recipes.

<!-- grove: {"id": "cfa5f7"} -->

## LLM Response (2025-08-20 08:26:19)

Here are a few ideas:
1. Double Chocolate Espresso Cookies
2. Salted Caramel Pretzel Cookies
3. Brown Butter Toffee Cookies

<!-- grove: {"template": "chat"} -->

Let's go with option 3; rewrite the entire recipe based on brown butter.

<!-- grove: {"id": "161603"} -->

## LLM Response (2025-08-20 08:29:33)

### Brown Butter Toffee Cookies

1. Brown the butter in a saucepan until fragrant and amber-colored
2. Fold in toffee and chocolate chips
3. Bake at 375°F for 9-11 minutes
"#;

const SESSION_CHAT: &str = r#"---
id: test-chat
title: test-chat
type: chat
status: completed
---

Initial user prompt asking for help.

<!-- grove: {"id": "block1"} -->
## LLM Response

This is the first response with some content that will be shown in the preview.

<!-- grove: {"template": "chat"} -->

Follow up question from user.

<!-- grove: {"id": "block2"} -->
## Another Response

This is the second response with more content.

<!-- grove: {"id": "block3"} -->
## Final Response

The last response in the conversation with even more detailed information.
"#;

const SPEC_DOCUMENT: &str = "---
id: spec-doc
title: Specification Document
type: document
status: draft
metadata:
  author: Test Author
  version: 1.0
---

# Grove NeoVim Text Interaction Specification

## Overview

This document specifies the text interaction features for Grove NeoVim plugin.

## Conclusion

This specification provides the foundation for advanced text interaction features.
";

/// One entry of `flow plan extract list --json`.
#[derive(Debug, Deserialize)]
struct BlockInfo {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    line_start: usize,
    preview: String,
}

fn plan_dir(ctx: &Context) -> PathBuf {
    plan::resolve_plan_path(ctx, "test-plan")
}

/// `flow plan extract <args>` from inside the plan directory.
fn extract(ctx: &Context, args: &[&str]) -> Result<CommandResult> {
    let mut full = vec!["plan", "extract"];
    full.extend_from_slice(args);
    let dir = plan_dir(ctx);
    flow_in(ctx, Some(dir.as_path()), &full)
}

fn extract_step(name: &str, args: &'static [&'static str], expect: Expect) -> Step {
    Step::new(name, move |ctx: &mut Context| {
        let result = extract(ctx, args)?;
        expect.check(&result)
    })
}

/// Plan with `.grove-plan.yml` holding `plan_config` and `file` holding `content`.
fn setup_plan_file(plan_config: &'static str, file: &'static str, content: &'static str) -> Step {
    Step::new(format!("Create plan with {file}"), move |ctx: &mut Context| {
        let dir = plan_dir(ctx);
        fs::write_string(&dir.join(plan::PLAN_CONFIG_FILE), plan_config)?;
        fs::write_string(&dir.join(file), content)
    })
}

/// Job file in the plan whose name contains `title`.
fn extracted_job(dir: &Path, title: &str) -> Result<String> {
    let name = fs::list_files(dir)?
        .into_iter()
        .find(|f| f.contains(title))
        .ok_or_else(|| HarnessError::assertion(format!("{title} file not found")))?;
    fs::read_string(&dir.join(name))
}

/// Extracted jobs reference their source instead of copying it.
fn verify_extracted(title: &'static str, expected: &'static [&'static str]) -> Step {
    Step::new(format!("Verify extracted job {title}"), move |ctx: &mut Context| {
        let content = extracted_job(&plan_dir(ctx), title)?;
        ctx.verify(&format!("extracted job {title}"), |v| {
            for needle in expected {
                v.contains("frontmatter", &content, needle);
            }
            v.is_true(
                "body should be empty with source_block reference",
                assert::body(&content).trim().is_empty(),
            );
        })
    })
}

pub fn basic() -> Scenario {
    Scenario::new(
        "flow-chat-extract-basic",
        "Tests basic chat block extraction functionality",
        &["chat", "extract"],
        vec![
            setup_project("Setup project", EXTRACT_CONFIG),
            setup_plan_file(PLAN_DEFAULTS, "01-recipe-chat.md", RECIPE_CHAT),
            extract_step(
                "Extract single block",
                &[
                    "cfa5f7",
                    "--title",
                    "double-chocolate-variant",
                    "--file",
                    "01-recipe-chat.md",
                ],
                Expect::success().stdout("Extracted 1 blocks to new chat job"),
            ),
            verify_extracted(
                "double-chocolate-variant",
                &[
                    "title: double-chocolate-variant",
                    "type: chat",
                    "model: claude-3.5-sonnet",
                    "worktree: test-worktree",
                    "source_block: 01-recipe-chat.md#cfa5f7",
                ],
            ),
            extract_step(
                "Extract multiple blocks",
                &[
                    "cfa5f7",
                    "161603",
                    "--title",
                    "all-recipes",
                    "--file",
                    "01-recipe-chat.md",
                ],
                Expect::success().stdout("Extracted 2 blocks to new chat job"),
            ),
            extract_step(
                "Extract with dependencies and custom flags",
                &[
                    "161603",
                    "--title",
                    "brown-butter-recipe",
                    "--file",
                    "01-recipe-chat.md",
                    "--depends-on",
                    "02-double-chocolate-variant.md",
                    "--model",
                    "gpt-4",
                    "--worktree",
                    "custom-worktree",
                    "--output",
                    "commit",
                ],
                Expect::success(),
            ),
            verify_extracted(
                "brown-butter-recipe",
                &[
                    "model: gpt-4",
                    "worktree: custom-worktree",
                    "type: commit",
                    "depends_on:",
                    "02-double-chocolate-variant.md",
                    "source_block: 01-recipe-chat.md#161603",
                ],
            ),
        ],
    )
}

pub fn list() -> Scenario {
    Scenario::new(
        "flow-chat-extract-list",
        "Tests listing available blocks in chat files",
        &["chat", "extract", "list"],
        vec![
            setup_project("Setup project", EXTRACT_CONFIG),
            setup_plan_file("", "chat-session.md", SESSION_CHAT),
            extract_step(
                "List blocks in text format",
                &["list", "--file", "chat-session.md"],
                Expect::success()
                    .stdout("Found 3 extractable blocks")
                    .stdout("ID: block1")
                    .stdout("ID: block2")
                    .stdout("ID: block3")
                    .stdout("Type: llm")
                    .stdout("Line:")
                    .stdout("Preview:"),
            ),
            Step::new("List blocks in JSON format", |ctx: &mut Context| {
                let result = extract(ctx, &["list", "--file", "chat-session.md", "--json"])?;
                result.assert_success()?;
                let blocks: Vec<BlockInfo> = serde_json::from_str(&result.stdout)?;
                let ids: Vec<&str> = blocks.iter().map(|b| b.id.as_str()).collect();
                assert::equal(vec!["block1", "block2", "block3"], ids, "block ids")?;
                let first = &blocks[0];
                ctx.verify("first block", |v| {
                    v.equal("type", "llm", first.kind.as_str())
                        .is_true("line number set", first.line_start > 0)
                        .is_true("preview set", !first.preview.is_empty());
                })
            }),
            Step::new("List blocks from absolute path", |ctx: &mut Context| {
                let external = ctx.root_dir.join("external").join("external-chat.md");
                fs::write_string(
                    &external,
                    "---\nid: external-chat\ntitle: External Chat\ntype: chat\nstatus: completed\n---\n\nQuestion about external file.\n\n<!-- grove: {\"id\": \"ext1\"} -->\nResponse in external file.\n",
                )?;
                let path = external.to_string_lossy().into_owned();
                let result = flow_in(
                    ctx,
                    None,
                    &["plan", "extract", "list", "--file", path.as_str()],
                )?;
                Expect::success()
                    .stdout("Found 1 extractable blocks")
                    .stdout("ID: ext1")
                    .check(&result)
            }),
            Step::new("List from file with no blocks", |ctx: &mut Context| {
                fs::write_string(
                    &plan_dir(ctx).join("no-blocks.md"),
                    "---\nid: no-blocks\ntitle: No Blocks\ntype: chat\nstatus: completed\n---\n\nThis is a chat file without any grove directives.\n",
                )?;
                let text = extract(ctx, &["list", "--file", "no-blocks.md"])?;
                Expect::success()
                    .stdout("No extractable blocks found")
                    .check(&text)?;

                let json = extract(ctx, &["list", "--file", "no-blocks.md", "--json"])?;
                json.assert_success()?;
                let blocks: Vec<BlockInfo> = serde_json::from_str(&json.stdout)?;
                assert::equal(0, blocks.len(), "expected empty array")
            }),
        ],
    )
}

pub fn all_blocks() -> Scenario {
    Scenario::new(
        "flow-chat-extract-all",
        "Tests extracting all content below frontmatter with 'all' argument",
        &["chat", "extract", "all"],
        vec![
            setup_project("Setup project", EXTRACT_CONFIG),
            setup_plan_file(PLAN_DEFAULTS, "spec-document.md", SPEC_DOCUMENT),
            extract_step(
                "Extract all content with 'all' argument",
                &["all", "--title", "extracted-spec", "--file", "spec-document.md"],
                Expect::success().stdout("Extracted 1 blocks to new chat job"),
            ),
            verify_extracted(
                "extracted-spec",
                &[
                    "title: extracted-spec",
                    "type: chat",
                    "source_block: spec-document.md",
                ],
            ),
            Step::new("Original frontmatter is not copied", |ctx: &mut Context| {
                let content = extracted_job(&plan_dir(ctx), "extracted-spec")?;
                assert::not_contains(
                    &content,
                    "author: Test Author",
                    "original frontmatter should not be included",
                )
            }),
            extract_step(
                "Extract all with custom parameters",
                &[
                    "all",
                    "--title",
                    "full-spec-custom",
                    "--file",
                    "spec-document.md",
                    "--model",
                    "gpt-4-turbo",
                    "--worktree",
                    "feature-branch",
                    "--output",
                    "generate_jobs",
                ],
                Expect::success(),
            ),
            verify_extracted(
                "full-spec-custom",
                &[
                    "model: gpt-4-turbo",
                    "worktree: feature-branch",
                    "type: generate_jobs",
                    "source_block: spec-document.md",
                ],
            ),
            Step::new("Extract all from absolute path", |ctx: &mut Context| {
                let external = ctx.root_dir.join("external-docs").join("external.md");
                fs::write_string(
                    &external,
                    "---\ntitle: External Document\ntype: document\n---\n\n# External Content\n\nImportant content that needs to be extracted.\n",
                )?;
                let path = external.to_string_lossy().into_owned();
                let result = extract(
                    ctx,
                    &["all", "--title", "external-content", "--file", path.as_str()],
                )?;
                Expect::success()
                    .stdout("Extracted 1 blocks to new chat job")
                    .check(&result)
            }),
            verify_extracted("external-content", &["source_block: external.md"]),
        ],
    )
}

pub fn errors() -> Scenario {
    Scenario::new(
        "flow-chat-extract-errors",
        "Tests error handling in chat extract command",
        &["chat", "extract", "errors"],
        vec![
            setup_project("Setup project", crate::flow::fixtures::PLANS_CONFIG),
            setup_plan_file(
                "",
                "test.md",
                "---\nid: test-chat\ntitle: test-chat\ntype: chat\nstatus: completed\n---\n\nInitial prompt.\n\n<!-- grove: {\"id\": \"block1\"} -->\n## Response\n\nThis is a response.\n",
            ),
            extract_step(
                "Extract with invalid block ID",
                &["invalid-id", "--title", "test", "--file", "test.md"],
                Expect::failure().stderr("no valid blocks found to extract"),
            ),
            extract_step(
                "Extract with non-existent file",
                &["block1", "--title", "test", "--file", "nonexistent.md"],
                Expect::failure().stderr("not found"),
            ),
            extract_step(
                "Extract with invalid dependency",
                &[
                    "block1",
                    "--title",
                    "test",
                    "--file",
                    "test.md",
                    "--depends-on",
                    "nonexistent-job.md",
                ],
                Expect::failure().stderr("dependency not found"),
            ),
        ],
    )
}
