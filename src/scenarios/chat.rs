use crate::error::{HarnessError, Result};
use crate::flow::fixtures::{self, TestEnvOptions};
use crate::flow::plan;
use crate::flow::steps::{flow, flow_env, flow_ok, run_flow, Expect};
use crate::harness::{assert, fs, git, Context, Scenario, Step};
use crate::scenarios::{replace_in_file, setup_project};

/// Writes `chats/<name>.md` and lets `flow chat -s` add its frontmatter, then
/// moves the chat from `pending_user` to `status` when given.
fn init_chat(name: &'static str, body: &'static str, status: Option<&'static str>) -> Step {
    Step::new(format!("Create and initialize {name}"), move |ctx: &mut Context| {
        let chat = ctx.root_dir.join("chats").join(format!("{name}.md"));
        fs::write_string(&chat, body)?;
        let chat_arg = chat.to_string_lossy().into_owned();
        flow_ok(ctx, &["chat", "-s", chat_arg.as_str(), "-m", "mock"])?;

        let content = fs::read_string(&chat)?;
        if !content.contains("model: mock") {
            replace_in_file(&chat, "model: gemini-2.5-pro", "model: mock")?;
        }
        if let Some(status) = status {
            replace_in_file(
                &chat,
                "status: pending_user",
                &format!("status: {status}"),
            )?;
        }
        Ok(())
    })
}

pub fn run_filtering() -> Scenario {
    Scenario::new(
        "flow-chat-run-filtering",
        "Test that 'flow chat run' correctly filters chats by status and title",
        &["chat", "filtering"],
        vec![
            setup_project(
                "Setup project with chat directory",
                "name: test-project\nflow:\n  chat_directory: ./chats\n  oneshot_model: mock\n",
            ),
            fixtures::setup_test_environment(TestEnvOptions::with_response(
                "Test response from mock LLM",
            )),
            init_chat("chat1", "# Chat One\n\nUser: Tell me about testing.\n", None),
            init_chat("chat2", "# Chat Two\n\nUser: Already done.\n", Some("completed")),
            init_chat("chat3", "# Chat Three\n\nUser: Another test question.\n", None),
            init_chat("chat4", "# Chat Four\n\nUser: Currently being processed.\n", Some("running")),
            run_flow(
                "List chats",
                &["chat", "list"],
                Expect::success()
                    .stdout("chat1")
                    .stdout("chat2")
                    .stdout("chat3")
                    .stdout("chat4"),
            ),
            Step::new("Run all runnable chats", |ctx: &mut Context| {
                // Execution may fail against the mock; only the selection matters.
                let result = flow(ctx, &["chat", "run"])?;
                let out = &result.stdout;
                ctx.verify("chat run selects pending_user chats", |v| {
                    v.contains("found two runnable chats", out, "Found 2 runnable chat(s)")
                        .contains("chat1 processed", out, "Running Chat: chat1")
                        .contains("chat3 processed", out, "Running Chat: chat3")
                        .not_contains("completed chat2 skipped", out, "Running Chat: chat2")
                        .not_contains("running chat4 skipped", out, "Running Chat: chat4");
                })
            }),
            Step::new("Reset chat1 status back to pending_user", |ctx: &mut Context| {
                let chat = ctx.root_dir.join("chats/chat1.md");
                replace_in_file(&chat, "status: completed", "status: pending_user")?;
                replace_in_file(&chat, "status: failed", "status: pending_user")
            }),
            Step::new("Run specific chats by title", |ctx: &mut Context| {
                let result = flow(ctx, &["chat", "run", "chat1", "chat4"])?;
                let out = &result.stdout;
                assert::not_contains(out, "Running Chat: chat4", "chat4 is running and must be skipped")?;
                if out.contains("Found 1 runnable chat(s)") {
                    assert::contains(out, "Running Chat: chat1", "chat1 should run when named")
                } else if out.contains("No runnable chats found") {
                    assert::contains(out, "Available chats:", "expected the available chats list")
                } else {
                    Err(HarnessError::assertion(format!(
                        "unexpected output for title filtering:\n{out}"
                    )))
                }
            }),
        ],
    )
}

const MOCK_EDITOR: &str = "#!/bin/bash
echo \"\" >> \"$1\"
echo \"User added this line\" >> \"$1\"
";

const CHAT_PROMPT: &str = "Chat job 'Design Discussion' is pending... Would you like to:";

fn chat_job(ctx: &Context) -> std::path::PathBuf {
    plan::resolve_plan_path(ctx, "multi-job-plan").join("01-design-discussion.md")
}

/// `flow plan run multi-job-plan` answering the prompts with `answers`.
fn run_with_answers(ctx: &Context, answers: &str, editor: Option<&str>) -> Result<String> {
    let mut cmd = ctx.flow(["plan", "run", "multi-job-plan"])?;
    cmd.stdin(answers);
    if let Some(editor) = editor {
        cmd.env_pair("EDITOR", editor);
    }
    let result = cmd.run();
    ctx.show_command_output(&result.command, &result.stdout, &result.stderr);
    result.assert_success()?;
    Ok(result.stdout)
}

fn prompt_count(stdout: &str) -> usize {
    stdout.matches(CHAT_PROMPT).count()
}

pub fn interactive_prompt() -> Scenario {
    Scenario::new(
        "flow-chat-interactive-prompt",
        "Tests interactive prompt for chat jobs in multi-job plans (run, complete, edit options)",
        &["chat", "interactive", "plan"],
        vec![
            setup_project(
                "Setup project with config",
                "name: test-project\nflow:\n  plans_directory: ./plans\n  oneshot_model: mock\n",
            ),
            Step::new("Create plan with chat job and oneshot job", |ctx: &mut Context| {
                flow_ok(ctx, &["plan", "init", "multi-job-plan"])?;
                flow_ok(
                    ctx,
                    &[
                        "plan",
                        "add",
                        "multi-job-plan",
                        "--title",
                        "Design Discussion",
                        "--type",
                        "chat",
                        "-p",
                        "Let's discuss the design for our new feature",
                    ],
                )?;
                flow_ok(
                    ctx,
                    &[
                        "plan",
                        "add",
                        "multi-job-plan",
                        "--title",
                        "Implement Design",
                        "--type",
                        "oneshot",
                        "--depends-on",
                        "01-design-discussion.md",
                        "-p",
                        "Implement the design we discussed",
                    ],
                )
                .map(|_| ())
            }),
            fixtures::setup_test_environment(TestEnvOptions::default()),
            Step::new("Run the chat job with 'r'", |ctx: &mut Context| {
                let stdout = run_with_answers(ctx, "y\nr\n", None)?;
                let content = fs::read_string(&chat_job(ctx))?;
                ctx.verify("chat turn ran", |v| {
                    v.contains("chat turn", &stdout, "Running one turn of the chat")
                        .contains("response appended", &content, "LLM Response");
                })
            }),
            Step::new("Complete the chat job with 'c'", |ctx: &mut Context| {
                let job = chat_job(ctx);
                replace_in_file(&job, "status: pending_user", "status: pending")?;
                let stdout = run_with_answers(ctx, "y\nc\n", None)?;
                assert::contains(&stdout, "Marking chat as complete", "complete message")?;
                fs::assert_contains(&job, "status: completed")
            }),
            Step::new("Edit option loops back to the prompt", |ctx: &mut Context| {
                let job = chat_job(ctx);
                replace_in_file(&job, "status: completed", "status: pending")?;
                let editor = ctx.sandbox_dir().join("mock-editor");
                fs::write_executable(&editor, MOCK_EDITOR)?;

                let editor = editor.to_string_lossy().into_owned();
                let stdout = run_with_answers(ctx, "y\ne\nr\n", Some(editor.as_str()))?;
                let content = fs::read_string(&job)?;
                ctx.verify("edit then run", |v| {
                    v.contains("editing finished", &stdout, "Editing finished")
                        .is_true("prompt shown again after edit", prompt_count(&stdout) >= 2)
                        .contains("editor appended", &content, "User added this line");
                })
            }),
            Step::new("Invalid input re-prompts", |ctx: &mut Context| {
                replace_in_file(&chat_job(ctx), "status: pending_user", "status: pending")?;
                let stdout = run_with_answers(ctx, "y\nx\nc\n", None)?;
                ctx.verify("invalid choice", |v| {
                    v.contains("invalid choice message", &stdout, "Invalid choice 'x'")
                        .is_true("prompt shown again after invalid input", prompt_count(&stdout) >= 2);
                })
            }),
        ],
    )
}

pub fn launch() -> Scenario {
    Scenario::new(
        "flow-chat-launch",
        "Tests launching a chat, which should create a worktree.",
        &["chat", "launch", "worktree"],
        vec![
            setup_project(
                "Setup git repo, config, and chat",
                "name: test-project\nflow:\n  target_agent_container: fake-container\n  plans_directory: ./plans\n  oneshot_model: mock\n",
            ),
            Step::new("Initialize the chat", |ctx: &mut Context| {
                let chat = ctx.root_dir.join("dev-task.md");
                fs::write_string(&chat, "# Dev Task\n\nImplement the login page.")?;
                let chat = chat.to_string_lossy().into_owned();
                flow_ok(ctx, &["chat", "-s", chat.as_str()]).map(|_| ())
            }),
            fixtures::setup_test_environment(TestEnvOptions::default()),
            Step::new("Launch the chat", |ctx: &mut Context| {
                let chat = ctx.root_dir.join("dev-task.md").to_string_lossy().into_owned();
                flow_env(
                    ctx,
                    &["GROVE_FLOW_SKIP_DOCKER_CHECK=true"],
                    &["chat", "launch", chat.as_str()],
                )?
                .assert_success()
            }),
            // The worktree is named after the chat file.
            Step::new("Verify worktree for chat was created", |ctx: &mut Context| {
                fs::assert_exists(&ctx.root_dir.join(".grove-worktrees/dev-task"))
            }),
        ],
    )
}

/// Answers "First response", "Second response", then a generic follow-up,
/// counting calls in a file beside the script.
const TURN_COUNTING_LLM: &str = r#"#!/bin/bash
state="$(dirname "$0")/llm_call_count"
count=$(cat "$state" 2>/dev/null || echo "0")
echo "$((count + 1))" > "$state"
case "$count" in
  0)
    echo "First response: I'll help you build a test application. Let me outline the basic structure we'll need."
    ;;
  1)
    echo "Second response: Based on your feedback, I'll add database configuration to the plan."
    ;;
  *)
    echo "Additional response: Continuing our conversation about the test application."
    ;;
esac
"#;

fn append_user_turn(path: &std::path::Path, message: &str) -> Result<()> {
    let content = fs::read_string(path)?;
    fs::write_string(path, &format!("{content}\n\nUser: {message}\n"))
}

/// True when each of `needles` starts on a later line than the one before it.
fn in_line_order(content: &str, needles: &[&str]) -> bool {
    let mut lines = content.lines();
    needles
        .iter()
        .all(|needle| lines.by_ref().any(|line| line.contains(needle)))
}

pub fn pipeline() -> Scenario {
    Scenario::new(
        "flow-chat-pipeline",
        "Test multi-turn chat conversations with LLM responses",
        &["chat", "pipeline"],
        vec![
            Step::new("Setup project with chat configuration", |ctx: &mut Context| {
                git::init(&ctx.root_dir)?;
                git::setup_test_config(&ctx.root_dir)?;
                fixtures::setup_empty_global_config(ctx)?;
                fs::create_dir(&ctx.root_dir.join("chats"))?;
                fixtures::write_grove_config(
                    &ctx.root_dir,
                    "name: test-project\nflow:\n  chat_directory: ./chats\n",
                )
            }),
            fixtures::setup_test_environment(
                TestEnvOptions::default().mock("llm", TURN_COUNTING_LLM),
            ),
            Step::new("Initialize chat with user prompt", |ctx: &mut Context| {
                let chat = ctx.root_dir.join("chats/pipeline-test.md");
                fs::write_string(
                    &chat,
                    "# Pipeline Test\n\nUser: I want to build a test application.\n",
                )?;
                let chat = chat.to_string_lossy().into_owned();
                flow_ok(ctx, &["chat", "-s", chat.as_str()]).map(|_| ())
            }),
            Step::new("Run chat for first LLM response", |ctx: &mut Context| {
                flow_ok(ctx, &["chat", "run", "pipeline-test"])?;
                let content = fs::read_string(&ctx.root_dir.join("chats/pipeline-test.md"))?;
                ctx.verify("chat after first turn", |v| {
                    v.contains("first response appended", &content, "First response")
                        .contains("still waiting on the user", &content, "status: pending_user");
                })
            }),
            Step::new("Append user follow-up question", |ctx: &mut Context| {
                append_user_turn(
                    &ctx.root_dir.join("chats/pipeline-test.md"),
                    "Please include database configuration in the plan.",
                )
            }),
            Step::new("Run chat for second LLM response", |ctx: &mut Context| {
                flow_ok(ctx, &["chat", "run", "pipeline-test"])?;
                let content = fs::read_string(&ctx.root_dir.join("chats/pipeline-test.md"))?;
                ctx.verify("chat after second turn", |v| {
                    v.contains("first response kept", &content, "First response")
                        .contains("second response appended", &content, "Second response")
                        .equal("response count", 2, content.matches("## LLM Response").count());
                })
            }),
            Step::new("Verify conversation flow", |ctx: &mut Context| {
                let content = fs::read_string(&ctx.root_dir.join("chats/pipeline-test.md"))?;
                let order = [
                    "User: I want to build",
                    "First response",
                    "User: Please include database",
                    "Second response",
                ];
                if in_line_order(&content, &order) {
                    Ok(())
                } else {
                    Err(HarnessError::assertion(format!(
                        "conversation turns out of order:\n{content}"
                    )))
                }
            }),
        ],
    )
}

const GREETING_TEMPLATE: &str = "---
title: Test Chat Template
type: chat
---

You are a helpful assistant. IMPORTANT: Start every response with \"Greetings!\" to indicate this template is being used.
";

const UNTEMPLATED_CHAT: &str = "---
id: test-chat
title: Test Chat Without Template
status: pending_user
type: chat
---

# Test Chat

User: Please help me with a test task.
";

pub fn template_injection() -> Scenario {
    Scenario::new(
        "flow-chat-template-injection",
        "Test automatic injection of template: chat when missing",
        &["chat", "template"],
        vec![
            Step::new("Setup project with chat configuration", |ctx: &mut Context| {
                git::init(&ctx.root_dir)?;
                git::setup_test_config(&ctx.root_dir)?;
                fixtures::setup_empty_global_config(ctx)?;
                fs::create_dir(&ctx.root_dir.join("chats"))?;
                fs::write_string(
                    &ctx.root_dir.join(".grove/job-templates/chat.md"),
                    GREETING_TEMPLATE,
                )?;
                fixtures::write_grove_config(
                    &ctx.root_dir,
                    "name: test-project\nflow:\n  chat_directory: ./chats\n  oneshot_model: mock\n",
                )
            }),
            fixtures::setup_test_environment(TestEnvOptions::default().mock(
                "llm",
                "#!/bin/bash\necho \"Greetings! I am ready to assist you with your request.\"\n",
            )),
            Step::new("Create chat without template in frontmatter", |ctx: &mut Context| {
                let chat = ctx.root_dir.join("chats/test-chat.md");
                fs::write_string(&chat, UNTEMPLATED_CHAT)?;
                fs::assert_not_contains(&chat, "template:")
            }),
            Step::new("Run chat and verify template injection", |ctx: &mut Context| {
                flow_ok(ctx, &["chat", "run", "Test Chat Without Template"])?;
                let content = fs::read_string(&ctx.root_dir.join("chats/test-chat.md"))?;
                ctx.verify("template injected", |v| {
                    v.contains("template in frontmatter", &content, "template: chat")
                        .contains("template shaped the response", &content, "Greetings!");
                })
            }),
            Step::new("Run chat again to ensure template persists", |ctx: &mut Context| {
                let chat = ctx.root_dir.join("chats/test-chat.md");
                append_user_turn(&chat, "Thank you! Can you help with another task?")?;
                flow_ok(ctx, &["chat", "run", "Test Chat Without Template"])?;
                let content = fs::read_string(&chat)?;
                ctx.verify("template persisted", |v| {
                    v.contains("template kept", &content, "template: chat")
                        .is_true(
                            "both responses used the template",
                            content.matches("Greetings!").count() >= 2,
                        );
                })
            }),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_line_order() {
        let chat = "User: hi\nFirst response\nUser: more\nSecond response\n";
        assert!(in_line_order(chat, &["User: hi", "First", "User: more", "Second"]));
        assert!(!in_line_order(chat, &["Second", "First"]));
    }

    #[test]
    fn test_append_user_turn() {
        let dir = tempfile::tempdir().unwrap();
        let chat = dir.path().join("chat.md");
        std::fs::write(&chat, "User: hi\n").unwrap();
        append_user_turn(&chat, "again").unwrap();
        assert_eq!(std::fs::read_to_string(&chat).unwrap(), "User: hi\n\n\nUser: again\n");
    }
}
