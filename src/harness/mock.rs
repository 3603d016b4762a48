//! Shell-script stand-ins for the external tools `flow` shells out to.

use tracing::debug;

use crate::error::Result;
use crate::harness::context::Context;
use crate::harness::fs;
use crate::harness::scenario::Step;

pub const MOCK_LLM_RESPONSE_FILE_ENV: &str = "GROVE_MOCK_LLM_RESPONSE_FILE";

const LLM: &str = r#"#!/bin/bash
# Mock 'llm': real LLM commands return just the response text.
args="$*"
if [[ "$args" == *"mock-summarizer"* ]]; then
  printf '%s' "This is a concise mock summary."
  exit 0
fi
if [[ -n "$GROVE_MOCK_LLM_RESPONSE_FILE" ]]; then
  if [[ ! -r "$GROVE_MOCK_LLM_RESPONSE_FILE" ]]; then
    echo "mock llm error: could not read response file: $GROVE_MOCK_LLM_RESPONSE_FILE" >&2
    exit 1
  fi
  cat "$GROVE_MOCK_LLM_RESPONSE_FILE"
  exit 0
fi
if [[ -n "$MOCK_LLM_RESPONSE" ]]; then
  printf '%s' "$MOCK_LLM_RESPONSE"
  exit 0
fi
printf '%s' "This is a generic default response from the mock LLM."
"#;

const TMUX: &str = r#"#!/bin/bash
case "$1" in
  "new-session")
    echo "Created session: $4"
    ;;
  "has-session")
    exit 1
    ;;
  "capture-pane")
    echo "Mock session output"
    ;;
  *)
    echo "Mock tmux called with: $@"
    ;;
esac
"#;

const DOCKER: &str = r#"#!/bin/bash
# Reports every container as running.
if [[ "$1" == "ps" ]] || [[ "$2" == "ps" ]]; then
  for arg in "$@"; do
    if [[ "$arg" == name=* ]]; then
      echo "${arg#name=}"
      exit 0
    fi
  done
  echo "fake-container"
  exit 0
fi
echo "Mock docker called with: $@"
"#;

const CX: &str = r##"#!/bin/bash
case "$1" in
  "edit")
    mkdir -p .grove
    echo "*.go" > .grove/rules
    echo "Mock cx edit completed - created .grove/rules"
    ;;
  "generate")
    mkdir -p .grove
    echo "# mock context" > .grove/context
    echo "Mock cx generated context"
    ;;
  *)
    echo "Mock cx called with: $@"
    ;;
esac
"##;

const GROVE: &str = r#"#!/bin/bash
# Dev links live in ~/.grove/dev-links as "alias<TAB>dir" lines; the last one is current.
links="$HOME/.grove/dev-links"
mkdir -p "$HOME/.grove"
touch "$links"
case "$1 $2" in
  "dev link")
    dir="$3"
    alias="default"
    shift 3
    while [[ $# -gt 0 ]]; do
      if [[ "$1" == "--as" ]]; then
        alias="$2"
        shift
      fi
      shift
    done
    grep -v "^${alias}"$'\t' "$links" > "$links.tmp"
    mv "$links.tmp" "$links"
    printf '%s\t%s\n' "$alias" "$dir" >> "$links"
    echo "Linked testbin from $dir as '$alias'"
    ;;
  "dev list")
    if [[ ! -s "$links" ]]; then
      echo "No development binaries linked"
      exit 0
    fi
    current=$(tail -n 1 "$links" | cut -f1)
    echo "Binary: testbin"
    while IFS=$'\t' read -r alias dir; do
      marker=" "
      [[ "$alias" == "$current" ]] && marker="*"
      echo "$marker $alias ($dir)"
    done < "$links"
    ;;
  "dev prune")
    : > "$links.tmp"
    while IFS=$'\t' read -r alias dir; do
      if [[ -d "$dir" ]]; then
        printf '%s\t%s\n' "$alias" "$dir" >> "$links.tmp"
      else
        echo "Removing testbin:$alias (path no longer exists: $dir)"
      fi
    done < "$links"
    mv "$links.tmp" "$links"
    ;;
  *)
    echo "[GROVE MOCK] Unknown command: $*" >&2
    exit 1
    ;;
esac
"#;

const GROVE_HOOKS: &str = r#"#!/bin/bash
echo "Mock grove-hooks called with: $@"
"#;

const NB: &str = r#"#!/bin/bash
# Records calls so hook scenarios can assert on them.
echo "$@" >> "${NB_MOCK_LOG:-/tmp/nb_mock_calls.log}"
echo "Mock nb called with: $@"
"#;

const GENERIC: &str = r#"#!/bin/bash
echo "Mock $(basename "$0") called with: $@"
"#;

/// A mock executable installed into the sandbox's `test_bin`.
#[derive(Debug, Clone)]
pub struct Mock {
    pub command_name: String,
    pub script: String,
}

impl Mock {
    /// Mock with the built-in script for `name`, or one that echoes its arguments.
    pub fn new(name: &str) -> Self {
        Self::with_script(name, builtin_script(name).unwrap_or(GENERIC))
    }

    pub fn with_script(name: &str, script: &str) -> Self {
        Self {
            command_name: name.to_string(),
            script: script.to_string(),
        }
    }

    pub fn install(&self, ctx: &Context) -> Result<()> {
        let path = ctx.bin_dir().join(&self.command_name);
        debug!("installing mock {}", path.display());
        fs::write_executable(&path, &self.script)
    }
}

pub fn builtin_script(name: &str) -> Option<&'static str> {
    match name {
        "llm" => Some(LLM),
        "tmux" => Some(TMUX),
        "docker" => Some(DOCKER),
        "cx" => Some(CX),
        "grove" => Some(GROVE),
        "grove-hooks" => Some(GROVE_HOOKS),
        "nb" => Some(NB),
        _ => None,
    }
}

/// Installs `mocks` and records the mock directory under `test_bin_dir`.
pub fn install_all(ctx: &mut Context, mocks: &[Mock]) -> Result<()> {
    fs::create_dir(ctx.bin_dir())?;
    for mock in mocks {
        mock.install(ctx)?;
    }
    let bin_dir = ctx.bin_dir().to_path_buf();
    ctx.set_path("test_bin_dir", &bin_dir);
    Ok(())
}

pub fn setup_mocks(mocks: Vec<Mock>) -> Step {
    let names: Vec<&str> = mocks.iter().map(|m| m.command_name.as_str()).collect();
    let step_name = format!("Setup mocks: {}", names.join(", "));
    Step::new(step_name, move |ctx: &mut Context| install_all(ctx, &mocks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::context::ContextSettings;

    fn ctx_with(mocks: &[Mock]) -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::new(dir.path(), ContextSettings::default()).unwrap();
        install_all(&mut ctx, mocks).unwrap();
        (dir, ctx)
    }

    #[test]
    fn test_llm_mock_response_precedence() {
        let (_dir, mut ctx) = ctx_with(&[Mock::new("llm")]);

        let result = ctx.command("llm", ["-m", "mock"]).run();
        assert_eq!(
            result.stdout,
            "This is a generic default response from the mock LLM."
        );

        let result = ctx
            .command("llm", ["-m", "mock"])
            .env("MOCK_LLM_RESPONSE=inline answer")
            .run();
        assert_eq!(result.stdout, "inline answer");

        let response = ctx.root_dir.join("mock-response.txt");
        fs::write_string(&response, "Test job completed successfully.").unwrap();
        ctx.export_env(MOCK_LLM_RESPONSE_FILE_ENV, response.to_string_lossy());
        let result = ctx
            .command("llm", ["-m", "mock"])
            .env("MOCK_LLM_RESPONSE=ignored")
            .run();
        assert_eq!(result.stdout, "Test job completed successfully.");

        let result = ctx.command("llm", ["-m", "mock-summarizer"]).run();
        assert_eq!(result.stdout, "This is a concise mock summary.");
    }

    #[test]
    fn test_llm_mock_unreadable_file_fails() {
        let (_dir, mut ctx) = ctx_with(&[Mock::new("llm")]);
        ctx.export_env(MOCK_LLM_RESPONSE_FILE_ENV, "/nonexistent/response.txt");
        let result = ctx.command("llm", Vec::<String>::new()).run();
        assert!(result.assert_failure().is_ok());
        assert!(result.stderr.contains("could not read response file"));
    }

    #[test]
    fn test_grove_prune_falls_back_to_remaining_link() {
        let (dir, ctx) = ctx_with(&[Mock::new("grove")]);
        let main_repo = dir.path().join("main");
        let worktree = dir.path().join("wt");
        std::fs::create_dir_all(&main_repo).unwrap();
        std::fs::create_dir_all(&worktree).unwrap();

        for (path, alias) in [(&main_repo, "main-repo"), (&worktree, "feature")] {
            let path = path.to_string_lossy().to_string();
            ctx.command("grove", ["dev", "link", path.as_str(), "--as", alias])
                .run()
                .assert_success()
                .unwrap();
        }
        let list = ctx.command("grove", ["dev", "list"]).run();
        assert!(list.stdout.contains("* feature"), "{}", list.stdout);

        std::fs::remove_dir_all(&worktree).unwrap();
        let prune = ctx.command("grove", ["dev", "prune"]).run();
        assert!(prune.stdout.contains("Removing testbin:feature"));

        let list = ctx.command("grove", ["dev", "list"]).run();
        assert!(list.stdout.contains("* main-repo"), "{}", list.stdout);
        assert!(!list.stdout.contains("feature"));
    }

    #[test]
    fn test_docker_reports_named_container() {
        let (_dir, ctx) = ctx_with(&[Mock::new("docker")]);
        let result = ctx
            .command("docker", ["ps", "--filter", "name=grove-agent-ide"])
            .run();
        assert_eq!(result.stdout.trim(), "grove-agent-ide");
    }

    #[test]
    fn test_generic_mock_and_context_key() {
        let (_dir, ctx) = ctx_with(&[Mock::new("gh")]);
        let result = ctx.command("gh", ["pr", "view"]).run();
        assert_eq!(result.stdout.trim(), "Mock gh called with: pr view");
        assert_eq!(ctx.get_path("test_bin_dir").unwrap(), ctx.bin_dir());
    }

    #[test]
    fn test_cx_edit_creates_rules() {
        let (_dir, ctx) = ctx_with(&[Mock::new("cx")]);
        ctx.command("cx", ["edit"]).run().assert_success().unwrap();
        assert!(ctx.root_dir.join(".grove/rules").exists());
    }

    #[test]
    fn test_cx_generate_writes_context_heading() {
        let (_dir, ctx) = ctx_with(&[Mock::new("cx")]);
        let result = ctx.command("cx", ["generate"]).run();
        result.assert_success().unwrap();
        assert_eq!(result.stdout.trim(), "Mock cx generated context");
        let context = std::fs::read_to_string(ctx.root_dir.join(".grove/context")).unwrap();
        assert_eq!(context, "# mock context\n");
    }
}
