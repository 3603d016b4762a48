//! Recipes combined with extraction, and recipes generated from existing plans.

use crate::error::{HarnessError, Result};
use crate::flow::fixtures::{self, TestEnvOptions};
use crate::flow::plan;
use crate::flow::steps::flow_ok;
use crate::harness::{fs, Context, Scenario, Step};
use crate::scenarios::setup_project;

const AUTH_SPEC: &str = "# Authentication System Specification

## Overview
We need to implement a comprehensive authentication system for our application.

## Functional Requirements

### User Registration
- Email and password registration
- Email verification required
- Password strength requirements

### Session Management
- JWT-based authentication
- Refresh token rotation
- Session timeout after 30 minutes of inactivity

## API Endpoints
- POST /auth/register
- POST /auth/login
- POST /auth/logout
";

const FEATURE_DOC: &str = "# Feature Documentation

## Current State
The system currently lacks proper error handling.

## Proposed Changes
- Add comprehensive error types
- Implement error recovery mechanisms
- Add error logging and monitoring
";

const API_SPEC: &str = "# API Specification

## Endpoints
- GET /api/users
- POST /api/users
- PUT /api/users/:id
- DELETE /api/users/:id

## Authentication
All endpoints require Bearer token authentication.
";

const UI_SPEC: &str = "# UI Components Specification

## Components to Build
- Button component with multiple variants
- Form input with validation
- Modal dialog system
";

const COMPLEX_SPEC: &str = r#"# Complex Feature Specification

## Code Examples

```javascript
function authenticate(username, password) {
  const hashedPassword = bcrypt.hash(password, 10);
  return generateToken(user);
}
```

```python
def process_data(items):
    """Process a list of items."""
    return [item.transform() for item in items if item.is_valid()]
```

## Tables

| Method | Endpoint | Description |
|--------|----------|-------------|
| GET | /api/users | List all users |
| POST | /api/users | Create new user |

## Lists and Nested Items

1. First level item
   - Nested item 1
     - Deep nested item
2. Second level item

## Special Characters & Formatting

This includes **bold text**, *italic text*, `inline code`, and [links](https://example.com).

> This is a blockquote with important information
> that spans multiple lines.

<!-- grove: {"id": "abc123"} -->
This is a Grove-specific block that should be preserved exactly.
"#;

/// Writes `content` to `<root_dir>/<name>` and returns the path as a string for `flow`.
fn write_source(ctx: &Context, name: &str, content: &str) -> Result<String> {
    let path = ctx.root_dir.join(name);
    fs::write_string(&path, content)?;
    Ok(path.to_string_lossy().to_string())
}

fn plan_file(ctx: &Context, plan_name: &str, file: &str) -> Result<String> {
    fs::read_string(&plan::resolve_plan_path(ctx, plan_name).join(file))
}

pub fn recipe_with_extract() -> Scenario {
    Scenario::new(
        "flow-plan-recipe-extract",
        "Tests plan init with both --recipe and --extract-all-from flags",
        &["plan", "recipes", "extract", "init"],
        vec![
            setup_project("Setup git repository and config", fixtures::PLANS_CONFIG),
            Step::new(
                "Test recipe with extracted spec replaces recipe spec",
                |ctx: &mut Context| {
                    let spec = write_source(ctx, "auth-spec.md", AUTH_SPEC)?;
                    let result = flow_ok(
                        ctx,
                        &[
                            "plan", "init", "auth-system", "--recipe", "standard-feature",
                            "--extract-all-from", &spec, "--with-worktree",
                        ],
                    )?;
                    result.assert_stdout_contains(&[
                        "Using recipe: standard-feature",
                        "Extracted content from",
                    ])?;

                    let extracted = plan_file(ctx, "auth-system", "01-auth-spec.md")?;
                    let implement = plan_file(ctx, "auth-system", "02-implement.md")?;
                    let files = fs::list_files(&plan::resolve_plan_path(ctx, "auth-system"))?;
                    let duplicates: Vec<&String> = files
                        .iter()
                        .filter(|f| f.to_lowercase().contains("spec") && *f != "01-auth-spec.md")
                        .collect();
                    ctx.verify("recipe spec replaced by extracted spec", |v| {
                        v.contains("original content kept", &extracted, "Authentication System Specification")
                            .contains("details kept", &extracted, "JWT-based authentication")
                            .contains("worktree set", &extracted, "worktree: auth-system")
                            .equal("no duplicate spec from recipe", 0, duplicates.len())
                            .contains("implementation depends on spec", &implement, "depends_on:");
                    })
                },
            ),
            Step::new("Test extraction without recipe", |ctx: &mut Context| {
                let doc = write_source(ctx, "feature-doc.md", FEATURE_DOC)?;
                flow_ok(
                    ctx,
                    &["plan", "init", "error-handling", "--extract-all-from", &doc, "--with-worktree"],
                )?;
                let dir = plan::resolve_plan_path(ctx, "error-handling");
                let count = std::fs::read_dir(&dir)?.count();
                let extracted = plan_file(ctx, "error-handling", "01-feature-doc.md")?;
                ctx.verify("extraction only", |v| {
                    v.equal("config plus extracted job", 2, count)
                        .contains("content extracted", &extracted, "Feature Documentation")
                        .contains("worktree set", &extracted, "worktree: error-handling");
                })
            }),
            Step::new("Test recipe with explicit worktree", |ctx: &mut Context| {
                let spec = write_source(ctx, "api-spec.md", API_SPEC)?;
                flow_ok(
                    ctx,
                    &[
                        "plan", "init", "api-feature", "--recipe", "standard-feature",
                        "--extract-all-from", &spec, "--worktree", "api-wt",
                    ],
                )?;
                let extracted = plan_file(ctx, "api-feature", "01-api-spec.md")?;
                let config = plan_file(ctx, "api-feature", plan::PLAN_CONFIG_FILE)?;
                ctx.verify("explicit worktree wins", |v| {
                    v.contains("job uses explicit worktree", &extracted, "worktree: api-wt")
                        .contains("config uses explicit worktree", &config, "worktree: api-wt");
                })
            }),
            Step::new("Test extraction with path-based plan name", |ctx: &mut Context| {
                let spec = write_source(ctx, "ui-spec.md", UI_SPEC)?;
                let result = flow_ok(
                    ctx,
                    &[
                        "plan", "init", "frontend/ui-components", "--recipe", "standard-feature",
                        "--extract-all-from", &spec, "--with-worktree",
                    ],
                )?;
                let extracted = fs::read_string(
                    &ctx.root_dir.join("plans/frontend/ui-components/01-ui-spec.md"),
                )?;
                ctx.verify("base name used for worktree and active plan", |v| {
                    v.contains("worktree is base name", &extracted, "worktree: ui-components")
                        .contains(
                            "active plan is base name",
                            &result.stdout,
                            "Set active plan to: ui-components",
                        );
                })
            }),
            Step::new("Test extraction preserves complex markdown content", |ctx: &mut Context| {
                let spec = write_source(ctx, "complex-spec.md", COMPLEX_SPEC)?;
                flow_ok(ctx, &["plan", "init", "complex-feature", "--extract-all-from", &spec])?;
                let content = plan_file(ctx, "complex-feature", "01-complex-spec.md")?;
                ctx.verify("complex markdown preserved", |v| {
                    for (what, needle) in [
                        ("JavaScript code block", "```javascript"),
                        ("Python code block", "```python"),
                        ("Table formatting", "| Method | Endpoint | Description |"),
                        ("Nested lists", "- Deep nested item"),
                        ("Bold text", "**bold text**"),
                        ("Italic text", "*italic text*"),
                        ("Inline code", "`inline code`"),
                        ("Links", "[links](https://example.com)"),
                        ("Blockquote", "> This is a blockquote"),
                        ("Grove blocks", "<!-- grove:"),
                        ("Special characters", "Special Characters & Formatting"),
                    ] {
                        v.contains(what, &content, needle);
                    }
                })
            }),
        ],
    )
}

const GENERATE_CONFIG: &str = "name: test-project
flow:
  plans_directory: ./plans
  oneshot_model: mock-summarizer
";

/// Answers every model with the canned response file, whatever the model name.
const RESPONSE_FILE_LLM: &str = r#"#!/bin/bash
if [[ ! -t 0 ]]; then
  cat > /dev/null
fi
cat "$GROVE_MOCK_LLM_RESPONSE_FILE"
"#;

const API_MIGRATION_RESPONSE: &str = r#"--- [01-spec.md] ---
---
id: spec
title: "Specification for {{ .PlanName }}"
type: oneshot
status: pending
---
Define the detailed specification for the "{{ .PlanName }}" feature.

--- [02-implement.md] ---
---
id: implement
title: "Implement {{ .PlanName }}"
type: interactive_agent
depends_on:
  - 01-spec.md
worktree: "{{ .PlanName }}"
status: pending
---
Implement the "{{ .PlanName }}" feature based on the specification.
"#;

const API_MIGRATION_JOB: &str = "---
id: generate-api-migration-recipe
title: Generate API Migration Recipe
status: pending
type: generate-recipe
source_plan: plans/api-migration-example
recipe_name: api-migration
model: mock-summarizer
---
Generalize this plan for API endpoint migrations. Replace 'user-profile-api' with '{{ .PlanName }}'.
";

const MICROSERVICE_RESPONSE: &str = r#"--- [01-design-api.md] ---
---
id: design-api
title: "Design {{ .ServiceName }} API"
type: oneshot
status: pending
---

Design the REST API for {{ .ServiceName }} using OpenAPI 3.0 specification.

--- [02-implement-service.md] ---
---
id: implement-service
title: "Implement {{ .ServiceName }} in {{ .Language }}"
type: interactive_agent
depends_on:
  - 01-design-api.md
worktree: "{{ .ServiceName }}"
status: pending
---

Implement the {{ .ServiceName }} microservice in {{ .Language }} based on the API design.
"#;

const MICROSERVICE_JOB: &str = "---
id: generate-microservice-recipe
title: Generate Microservice Setup Recipe
status: pending
type: generate-recipe
source_plan: plans/microservice-setup
recipe_name: microservice-template
model: mock-summarizer
---

Generalize this plan for creating any microservice. The variable parts are:
- Service name: 'user-service' should become '{{ .ServiceName }}'
- Programming language: 'Go' should become '{{ .Language }}'
";

fn recipe_dir(ctx: &Context, recipe: &str) -> std::path::PathBuf {
    ctx.config_dir().join("grove/recipes").join(recipe)
}

/// Writes a `generate-recipe` job into a fresh plan directory and runs it with `--next`.
fn run_generate_job(plan_dir: &'static str, job_file: &'static str, job: &'static str) -> Step {
    Step::new("Create and run the generate-recipe job", move |ctx: &mut Context| {
        let dir = ctx.root_dir.join("plans").join(plan_dir);
        fs::create_dir(&dir)?;
        fs::write_string(&dir.join(job_file), job)?;
        let target = format!("plans/{plan_dir}");
        flow_ok(ctx, &["plan", "run", "--next", "--yes", &target]).map(|_| ())
    })
}

pub fn generate_recipe() -> Scenario {
    Scenario::new(
        "flow-generate-recipe",
        "Tests generate-recipe job type: creating reusable recipes from existing plans",
        &["plan", "recipes", "generate"],
        vec![
            setup_project("Setup git repository and config", GENERATE_CONFIG),
            Step::new("Create the source plan", |ctx: &mut Context| {
                flow_ok(ctx, &["plan", "init", "api-migration-example"])?;
                flow_ok(
                    ctx,
                    &[
                        "plan", "add", "api-migration-example", "--title",
                        "Spec for user-profile-api", "--type", "oneshot", "-p", "Define the spec.",
                    ],
                )?;
                flow_ok(
                    ctx,
                    &[
                        "plan", "add", "api-migration-example", "--title",
                        "Implement user-profile-api migration", "--type", "interactive_agent",
                        "--depends-on", "01-spec-for-user-profile-api.md", "--worktree",
                        "user-profile-api", "-p", "Implement the migration.",
                    ],
                )
                .map(|_| ())
            }),
            fixtures::setup_test_environment(
                TestEnvOptions::with_response(API_MIGRATION_RESPONSE).mock("llm", RESPONSE_FILE_LLM),
            ),
            run_generate_job(
                "recipe-generation-plan",
                "01-generate-recipe.md",
                API_MIGRATION_JOB,
            ),
            Step::new("Verify recipe was created in user config", |ctx: &mut Context| {
                let spec = recipe_dir(ctx, "api-migration").join("01-spec.md");
                fs::assert_contains(&spec, "{{ .PlanName }}")
            }),
            Step::new(
                "Initialize a new plan from the generated recipe",
                |ctx: &mut Context| {
                    fs::write_string(
                        &recipe_dir(ctx, "api-migration").join("01-spec.md"),
                        "title: Specification for {{ .PlanName }}",
                    )?;
                    flow_ok(ctx, &["plan", "init", "new-api-plan", "--recipe", "api-migration"])?;
                    let spec = plan::resolve_plan_path(ctx, "new-api-plan").join("01-spec.md");
                    fs::assert_contains(&spec, "title: Specification for new-api-plan")
                },
            ),
        ],
    )
}

pub fn generate_recipe_with_variables() -> Scenario {
    Scenario::new(
        "flow-generate-recipe-variables",
        "Tests generate-recipe with multiple template variables",
        &["plan", "recipes", "generate"],
        vec![
            setup_project("Setup git repository and config", GENERATE_CONFIG),
            Step::new("Create the source plan", |ctx: &mut Context| {
                flow_ok(ctx, &["plan", "init", "microservice-setup"])?;
                flow_ok(
                    ctx,
                    &[
                        "plan", "add", "microservice-setup", "--title", "Design user-service API",
                        "--type", "oneshot", "-p",
                        "Design the REST API for user-service using OpenAPI 3.0 specification.",
                    ],
                )?;
                flow_ok(
                    ctx,
                    &[
                        "plan", "add", "microservice-setup", "--title",
                        "Implement user-service in Go", "--type", "interactive_agent",
                        "--worktree", "user-service", "-p",
                        "Implement the user-service microservice in Go based on the API design.",
                    ],
                )
                .map(|_| ())
            }),
            fixtures::setup_test_environment(
                TestEnvOptions::with_response(MICROSERVICE_RESPONSE).mock("llm", RESPONSE_FILE_LLM),
            ),
            run_generate_job(
                "recipe-gen-multi",
                "01-generate-microservice-recipe.md",
                MICROSERVICE_JOB,
            ),
            Step::new("Verify recipe contains multiple variables", |ctx: &mut Context| {
                let dir = recipe_dir(ctx, "microservice-template");
                let design = fs::read_string(&dir.join("01-design-api.md"))?;
                let implement = fs::read_string(&dir.join("02-implement-service.md"))?;
                if !implement.contains("{{ .Language }}") {
                    return Err(HarnessError::assertion(
                        "implementation file missing {{ .Language }} variable",
                    ));
                }
                ctx.verify("service name is a variable", |v| {
                    v.contains("design uses ServiceName", &design, "{{ .ServiceName }}")
                        .contains("implementation uses ServiceName", &implement, "{{ .ServiceName }}");
                })
            }),
        ],
    )
}
