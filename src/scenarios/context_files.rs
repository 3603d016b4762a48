//! What reaches the model: `--source-files` references and per-job `rules_file`.

use std::path::Path;

use crate::error::{HarnessError, Result};
use crate::flow::fixtures::{self, TestEnvOptions};
use crate::flow::plan;
use crate::flow::steps::{flow, flow_env, flow_ok, run_flow, Expect};
use crate::harness::{fs, git, Context, Scenario, Step};

const MAIN_GO: &str = r#"package main

import "fmt"

// TestMarker12345 - unique marker for testing
func TestFunction() string {
    return "test-marker-12345"
}

func main() {
    fmt.Println(TestFunction())
}
"#;

const UTILS_GO: &str = r#"package main

// UtilsMarker67890 - another unique marker
func HelperFunction() string {
    return "utils-marker-67890"
}
"#;

const REVIEW_MAIN_PROMPT: &str = "Please review the provided Go source files and check for:
1. Code quality issues
2. Potential bugs
3. Suggested improvements

Focus on the main.go file first.";

const REVIEW_UTILS_PROMPT: &str = "Review the utility functions in the provided source files.
Check for proper error handling and clear function names.";

/// Echoes its prompt back so the run output shows what was sent.
const ECHO_LLM: &str = r#"#!/bin/bash
echo "=== LLM INPUT START ==="
cat
echo ""
echo "=== LLM INPUT END ==="
echo ""
echo "Based on the provided source files, I can see TestMarker12345 and UtilsMarker67890. Code review completed."
"#;

const REFERENCE_CONFIG: &str = "name: test-project
flow:
  plans_directory: ./plans
  oneshot_model: test
orchestration:
  target_agent_container: test-container
llm:
  provider: openai
  model: test
";

/// Repo with one commit containing `files`, then `grove_yml` on top.
fn committed_project(ctx: &Context, files: &[(&str, &str)], grove_yml: &str) -> Result<()> {
    git::init(&ctx.root_dir)?;
    git::setup_test_config(&ctx.root_dir)?;
    for (relative, content) in files {
        fs::write_string(&ctx.root_dir.join(relative), content)?;
    }
    fs::write_string(&ctx.root_dir.join("README.md"), "Test project")?;
    git::add(&ctx.root_dir, ".")?;
    git::commit(&ctx.root_dir, "Initial commit")?;
    fixtures::setup_empty_global_config(ctx)?;
    fixtures::write_grove_config(&ctx.root_dir, grove_yml)
}

/// Files in `dir` named `<prefix>*<suffix>`; prompt logs carry a timestamp in between.
fn matching_files(dir: &Path, prefix: &str, suffix: &str) -> Result<Vec<String>> {
    Ok(fs::list_files(dir)?
        .into_iter()
        .filter(|name| name.starts_with(prefix) && name.ends_with(suffix))
        .collect())
}

fn mentions_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

pub fn reference_prompts() -> Scenario {
    Scenario::new(
        "flow-reference-prompts",
        "Test jobs that reference source files via prompt_source using flow plan add",
        &["plan", "reference", "prompt_source"],
        vec![
            Step::new("Setup project with source files", |ctx: &mut Context| {
                committed_project(
                    ctx,
                    &[("src/main.go", MAIN_GO), ("src/utils.go", UTILS_GO)],
                    REFERENCE_CONFIG,
                )
            }),
            fixtures::setup_test_environment(TestEnvOptions::default().mock("llm", ECHO_LLM)),
            run_flow("Initialize plan", &["plan", "init", "code-review"], Expect::success()),
            Step::new("Create prompt files for reference", |ctx: &mut Context| {
                fs::write_string(&ctx.root_dir.join("prompts/review-main.txt"), REVIEW_MAIN_PROMPT)?;
                fs::write_string(&ctx.root_dir.join("prompts/review-utils.txt"), REVIEW_UTILS_PROMPT)
            }),
            Step::new("Add job with source file references", |ctx: &mut Context| {
                flow_ok(
                    ctx,
                    &[
                        "plan", "add", "code-review", "--title", "Review Main Code", "--type",
                        "oneshot", "--prompt-file", "prompts/review-main.txt", "--source-files",
                        "src/main.go,src/utils.go",
                    ],
                )?;
                let job = plan::find_job_by_prefix(&plan::resolve_plan_path(ctx, "code-review"), "01-")?;
                let name = job
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                ctx.set("job1_file", name);
                Ok(())
            }),
            Step::new("Run job and capture output", |ctx: &mut Context| {
                flow_ok(ctx, &["plan", "set", "code-review"])?;
                let job = format!("plans/code-review/{}", ctx.require("job1_file")?);
                let result = flow_env(ctx, &["GROVE_DEBUG=1"], &["plan", "run", job.as_str()])?;
                result.assert_success()?;
                ctx.set("run_output", format!("{}\n{}", result.stdout, result.stderr));
                Ok(())
            }),
            Step::new("Verify source files were included", |ctx: &mut Context| {
                let job = plan::resolve_plan_path(ctx, "code-review").join(ctx.require("job1_file")?);
                let job_content = fs::read_string(&job)?;
                let all = format!("{}\n{job_content}", ctx.require("run_output")?);
                ctx.verify("source files reached the model", |v| {
                    v.is_true(
                        "main.go content in output",
                        mentions_any(&all, &["TestMarker12345", "test-marker-12345", "TestFunction"]),
                    )
                    .is_true(
                        "utils.go content in output",
                        mentions_any(&all, &["UtilsMarker67890", "utils-marker-67890", "HelperFunction"]),
                    )
                    .contains("prompt file content", &all, "Please review the provided Go source files")
                    .contains("job completed", &job_content, "status: completed");
                })
            }),
            Step::new("Verify prompt log file was created", |ctx: &mut Context| {
                let logs = ctx.root_dir.join(".grove/logs/code-review/prompts");
                let matches = matching_files(&logs, "review-main-code-", "-prompt.txt")?;
                let Some(first) = matches.first() else {
                    return Err(HarnessError::assertion(format!(
                        "no review-main-code-*-prompt.txt in {}",
                        logs.display()
                    )));
                };
                let content = fs::read_string(&logs.join(first))?;
                ctx.verify("prompt log content", |v| {
                    v.contains("main.go in log", &content, "TestMarker12345")
                        .contains("utils.go in log", &content, "UtilsMarker67890")
                        .contains("prompt in log", &content, "Please review the provided Go source files");
                })
            }),
            run_flow(
                "Add second job with single source file",
                &[
                    "plan", "add", "code-review", "--title", "Review Utils Only", "--type",
                    "oneshot", "--prompt-file", "prompts/review-utils.txt", "--source-files",
                    "src/utils.go",
                ],
                Expect::success(),
            ),
            run_flow(
                "Verify plan status shows both jobs",
                &["plan", "status", "code-review"],
                Expect::success()
                    .stdout("01-review-main-code.md")
                    .stdout("02-review-utils-only.md")
                    .stdout("Completed: 1"),
            ),
        ],
    )
}

/// Lists which project files appeared in the prompt on stdin.
const CONTEXT_LISTING_LLM: &str = r#"#!/bin/bash
prompt=$(cat)
echo "Context received:"
for f in src/main.go src/helper.go src/test.go docs/readme.md docs/guide.md; do
  if echo "$prompt" | grep -q "$f"; then
    echo "- $f"
  fi
done
echo "Task completed."
"#;

const RULES_CX: &str = r#"#!/bin/bash
case "$1" in
  "generate")
    mkdir -p .grove
    touch .grove/context .grove/context-files
    echo "Context generated"
    ;;
  "reset")
    mkdir -p .grove
    printf '# Default rules\nsrc/*.go\n' > .grove/rules
    echo "Context reset to defaults"
    ;;
  *)
    echo "cx mock: $@"
    ;;
esac
exit 0
"#;

const RULES_CONFIG: &str = "name: test-project
flow:
  plans_directory: ./plans
llm:
  provider: openai
  model: test
";

const RULE_FILES: [(&str, &str); 3] = [
    ("go-only.rules", "# Go files only\nsrc/*.go\n"),
    ("docs-only.rules", "# Documentation files only\ndocs/*.md\n"),
    ("all-files.rules", "# All files\nsrc/*.go\ndocs/*.md\n"),
];

fn rules_job(id: &str, title: &str, rules_file: Option<&str>, prompt: &str) -> String {
    let rules = rules_file
        .map(|f| format!("rules_file: {f}\n"))
        .unwrap_or_default();
    format!(
        "---\nid: {id}\ntitle: \"{title}\"\ntype: oneshot\nstatus: pending\n{rules}---\n\n{prompt}\n"
    )
}

/// `flow plan run <job> -d <plan>`; checks which rules file was announced.
fn run_rules_job(job_file: &'static str, job_id: &'static str, rules_file: Option<&'static str>) -> Step {
    Step::new(format!("Run {job_file}"), move |ctx: &mut Context| {
        let plan_dir = plan::resolve_plan_path(ctx, "test-plan").to_string_lossy().into_owned();
        let result = flow_ok(ctx, &["plan", "run", job_file, "-d", &plan_dir])?;
        match rules_file {
            Some(rules) => result.assert_stdout_contains(&["Using job-specific context from", rules])?,
            None if result.stdout.contains("Using job-specific context from") => {
                return Err(HarnessError::assertion(
                    "job without rules_file should not use a custom rules file",
                ));
            }
            None => {}
        }
        let done = format!("✓ Job completed: {job_id}");
        result.assert_stdout_contains(&[done.as_str()])
    })
}

pub fn rules_in_frontmatter() -> Scenario {
    Scenario::new(
        "flow-rules-in-frontmatter",
        "Test job-specific context rules via rules_file in frontmatter",
        &["plan", "context", "rules_file"],
        vec![
            Step::new("Setup project with git repo", |ctx: &mut Context| {
                committed_project(
                    ctx,
                    &[
                        ("src/main.go", "package main\n// Main file"),
                        ("src/helper.go", "package main\n// Helper file"),
                        ("src/test.go", "package main\n// Test file"),
                        ("docs/readme.md", "# Documentation"),
                        ("docs/guide.md", "# Guide"),
                    ],
                    RULES_CONFIG,
                )
            }),
            fixtures::setup_test_environment(
                TestEnvOptions::default()
                    .mock("llm", CONTEXT_LISTING_LLM)
                    .mock("cx", RULES_CX),
            ),
            Step::new("Initialize new plan", |ctx: &mut Context| {
                flow_ok(ctx, &["plan", "init", "test-plan"])?;
                fs::assert_exists(&plan::resolve_plan_path(ctx, "test-plan"))
            }),
            Step::new("Create rules files and jobs", |ctx: &mut Context| {
                let plan_dir = plan::resolve_plan_path(ctx, "test-plan");
                for (name, rules) in RULE_FILES {
                    fs::write_string(&plan_dir.join(name), rules)?;
                }
                let jobs = [
                    ("01-go-analysis.md", rules_job("go-analysis", "Analyze Go files", Some("go-only.rules"), "Please analyze the Go source files in this project.")),
                    ("02-docs-review.md", rules_job("docs-review", "Review documentation", Some("docs-only.rules"), "Please review the documentation files in this project.")),
                    ("03-general-task.md", rules_job("general-task", "General task", None, "Please perform a general analysis of the project.")),
                ];
                for (file, content) in jobs {
                    fs::write_string(&plan_dir.join(file), &content)?;
                }
                Ok(())
            }),
            run_rules_job("01-go-analysis.md", "go-analysis", Some("go-only.rules")),
            run_rules_job("02-docs-review.md", "docs-review", Some("docs-only.rules")),
            Step::new("Write default project rules", |ctx: &mut Context| {
                fs::write_string(&ctx.root_dir.join(".grove/rules"), "# Default rules\nREADME.md\n")
            }),
            run_rules_job("03-general-task.md", "general-task", None),
            Step::new("Verify job status after runs", |ctx: &mut Context| {
                let result = flow(ctx, &["plan", "status", "test-plan"])?;
                result.assert_success()?;
                if result.stdout.to_lowercase().contains("completed: 3") {
                    Ok(())
                } else {
                    Err(HarnessError::assertion("all three jobs should be completed"))
                }
            }),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_job_frontmatter() {
        let job = rules_job("go-analysis", "Analyze Go files", Some("go-only.rules"), "Analyze.");
        let fm = crate::harness::assert::frontmatter(&job).unwrap();
        assert_eq!(fm["rules_file"].as_str(), Some("go-only.rules"));
        assert_eq!(fm["title"].as_str(), Some("Analyze Go files"));

        let plain = rules_job("general-task", "General task", None, "Go.");
        assert!(!plain.contains("rules_file"));
    }

    #[test]
    fn test_matching_files_skips_other_jobs() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "review-main-code-20240101-prompt.txt",
            "review-utils-only-20240101-prompt.txt",
            "review-main-code-20240101-response.txt",
        ] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let found = matching_files(dir.path(), "review-main-code-", "-prompt.txt").unwrap();
        assert_eq!(found, ["review-main-code-20240101-prompt.txt"]);
    }
}
