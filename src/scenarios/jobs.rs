//! `flow plan jobs`: renaming a job and rewriting its dependencies.

use crate::flow::fixtures;
use crate::flow::steps::{flow, flow_ok};
use crate::harness::{fs, git, Context, Scenario, Step};

const DESIGN_JOB: &str = "---
id: design-api-123
title: Design API
type: oneshot
status: pending
---

# Design API

This is the API design job.
";

const DEPENDENT_JOB: &str = "---
id: implement-api-456
title: Implement API
type: oneshot
status: pending
depends_on:
  - 01-design-api.md
---

# Implement API

This job depends on the design job.
";

const PROMPT_SOURCE_JOB: &str = "---
id: test-api-789
title: Test API
type: oneshot
status: pending
prompt_source:
  - spec.md
  - 01-design-api.md
---

# Test API

This job uses the design as context.
";

const IMPLEMENT_JOB: &str = "---
id: implement-api-456
title: Implement API
type: oneshot
status: pending
---

# Implement API

Implementation job content.
";

const UNLINKED_TEST_JOB: &str = "---
id: test-api-789
title: Test API
type: oneshot
status: pending
---

# Test API

Test job with no initial dependencies.
";

/// Committed repo plus a plan at the location `flow` resolves for `plan_name`,
/// stored as `plan_path` and seeded with `jobs`.
fn setup_plan_with_jobs(plan_name: &'static str, jobs: &'static [(&'static str, &'static str)]) -> Step {
    Step::new(format!("Create plan '{plan_name}' with jobs"), move |ctx: &mut Context| {
        git::init(&ctx.root_dir)?;
        git::setup_test_config(&ctx.root_dir)?;
        fs::write_string(&ctx.root_dir.join("README.md"), "Test project")?;
        git::add(&ctx.root_dir, ".")?;
        git::commit(&ctx.root_dir, "Initial commit")?;
        fixtures::setup_empty_global_config(ctx)?;
        fixtures::create_test_grove_config(ctx)?;

        let plan_dir = fixtures::setup_plan_in_expected_location(ctx, plan_name)?;
        for (file, content) in jobs {
            fs::write_string(&plan_dir.join(file), content)?;
        }
        ctx.set_path("plan_path", &plan_dir);
        Ok(())
    })
}

fn job_arg(ctx: &Context, file: &str) -> crate::error::Result<String> {
    Ok(ctx.get_path("plan_path")?.join(file).to_string_lossy().into_owned())
}

pub fn rename() -> Scenario {
    Scenario::new(
        "flow-plan-jobs-rename",
        "Tests renaming a job and updating dependencies",
        &["jobs", "rename"],
        vec![
            setup_plan_with_jobs(
                "test-rename-plan",
                &[
                    ("01-design-api.md", DESIGN_JOB),
                    ("02-implement-api.md", DEPENDENT_JOB),
                    ("03-test-api.md", PROMPT_SOURCE_JOB),
                ],
            ),
            Step::new("Rename the first job", |ctx: &mut Context| {
                let job = job_arg(ctx, "01-design-api.md")?;
                flow_ok(ctx, &["plan", "jobs", "rename", job.as_str(), "Design REST API"])?
                    .assert_stdout_contains(&["Job renamed successfully", "Design API → Design REST API"])
            }),
            Step::new("Verify the file was renamed", |ctx: &mut Context| {
                let plan_dir = ctx.get_path("plan_path")?;
                fs::assert_not_exists(&plan_dir.join("01-design-api.md"))?;
                fs::assert_exists(&plan_dir.join("01-design-rest-api.md"))
            }),
            Step::new("Verify frontmatter title was updated", |ctx: &mut Context| {
                let content = fs::read_string(&ctx.get_path("plan_path")?.join("01-design-rest-api.md"))?;
                ctx.verify("renamed job", |v| {
                    v.contains("new title", &content, "title: Design REST API")
                        .not_contains("old title", &content, "title: Design API")
                        .contains("body preserved", &content, "This is the API design job.");
                })
            }),
            Step::new("Verify references were updated", |ctx: &mut Context| {
                let plan_dir = ctx.get_path("plan_path")?;
                let dependent = fs::read_string(&plan_dir.join("02-implement-api.md"))?;
                let prompt_source = fs::read_string(&plan_dir.join("03-test-api.md"))?;
                ctx.verify("references to the renamed job", |v| {
                    v.contains("depends_on rewritten", &dependent, "01-design-rest-api.md")
                        .not_contains("old depends_on gone", &dependent, "01-design-api.md")
                        .contains("prompt_source rewritten", &prompt_source, "01-design-rest-api.md")
                        .not_contains("old prompt_source gone", &prompt_source, "01-design-api.md")
                        .contains("other prompt_source kept", &prompt_source, "spec.md");
                })
            }),
            Step::new("Renaming onto an existing file fails", |ctx: &mut Context| {
                let job = job_arg(ctx, "01-design-rest-api.md")?;
                let result = flow(ctx, &["plan", "jobs", "rename", job.as_str(), "Design REST API"])?;
                result.assert_failure()?;
                result.assert_stderr_contains(&["already exists"])
            }),
        ],
    )
}

fn update_deps(name: &'static str, deps: &'static [&'static str]) -> Step {
    Step::new(name, move |ctx: &mut Context| {
        let job = job_arg(ctx, "03-test-api.md")?;
        let mut args = vec!["plan", "jobs", "update-deps", job.as_str()];
        args.extend_from_slice(deps);
        let result = flow_ok(ctx, &args)?;
        if deps.is_empty() {
            result.assert_stdout_contains(&["New dependencies: (none)"])
        } else {
            result.assert_stdout_contains(&["Dependencies updated"])
        }
    })
}

fn verify_deps(name: &'static str, present: &'static [&'static str], absent: &'static [&'static str]) -> Step {
    Step::new(name, move |ctx: &mut Context| {
        let content = fs::read_string(&ctx.get_path("plan_path")?.join("03-test-api.md"))?;
        ctx.verify("job 03 dependencies", |v| {
            if !present.is_empty() {
                v.contains("depends_on field", &content, "depends_on:");
            }
            for dep in present {
                v.contains("dependency listed", &content, dep);
            }
            for dep in absent {
                v.not_contains("dependency removed", &content, dep);
            }
        })
    })
}

pub fn update_dependencies() -> Scenario {
    Scenario::new(
        "flow-plan-jobs-update-deps",
        "Tests updating job dependencies via CLI",
        &["jobs", "dependencies"],
        vec![
            setup_plan_with_jobs(
                "test-deps-plan",
                &[
                    ("01-design-api.md", DESIGN_JOB),
                    ("02-implement-api.md", IMPLEMENT_JOB),
                    ("03-test-api.md", UNLINKED_TEST_JOB),
                ],
            ),
            update_deps(
                "Update job 03 to depend on jobs 01 and 02",
                &["01-design-api.md", "02-implement-api.md"],
            ),
            verify_deps(
                "Verify job 03 dependencies were added",
                &["01-design-api.md", "02-implement-api.md"],
                &[],
            ),
            update_deps("Update job 03 to only depend on job 01", &["01-design-api.md"]),
            verify_deps(
                "Verify job 03 now only depends on job 01",
                &["01-design-api.md"],
                &["02-implement-api.md"],
            ),
            update_deps("Clear all dependencies from job 03", &[]),
            verify_deps(
                "Verify job 03 has no dependencies",
                &[],
                &["01-design-api.md", "02-implement-api.md"],
            ),
        ],
    )
}
