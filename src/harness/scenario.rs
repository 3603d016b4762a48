use std::fmt;

use crate::error::Result;
use crate::harness::context::Context;

type StepFn = Box<dyn Fn(&mut Context) -> Result<()> + Send + Sync>;

/// One named action in a scenario.
pub struct Step {
    name: String,
    func: StepFn,
}

impl Step {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&self, ctx: &mut Context) -> Result<()> {
        (self.func)(ctx)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

#[derive(Debug)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub steps: Vec<Step>,
    /// Only selected when requested by exact name.
    pub explicit_only: bool,
}

impl Scenario {
    pub fn new(name: &str, description: &str, tags: &[&str], steps: Vec<Step>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            steps,
            explicit_only: false,
        }
    }

    pub fn explicit_only(mut self) -> Self {
        self.explicit_only = true;
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Selection criteria for a run.
#[derive(Debug, Clone, Default)]
pub struct ScenarioFilter {
    pub names: Vec<String>,
    pub tags: Vec<String>,
}

impl ScenarioFilter {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.tags.is_empty()
    }

    fn named_exactly(&self, scenario: &Scenario) -> bool {
        self.names.iter().any(|n| *n == scenario.name)
    }

    pub fn matches(&self, scenario: &Scenario) -> bool {
        if scenario.explicit_only && !self.named_exactly(scenario) {
            return false;
        }
        let name_ok = self.names.is_empty()
            || self
                .names
                .iter()
                .any(|n| scenario.name == *n || scenario.name.contains(n.as_str()));
        let tag_ok = self.tags.is_empty() || self.tags.iter().any(|t| scenario.has_tag(t));
        name_ok && tag_ok
    }

    /// Scenarios selected by this filter, in catalog order. A name that matches
    /// one scenario exactly selects only that one, even if it is a substring
    /// of other names.
    pub fn select(&self, scenarios: Vec<Scenario>) -> Vec<Scenario> {
        let exact: Vec<&String> = self
            .names
            .iter()
            .filter(|n| scenarios.iter().any(|s| s.name == **n))
            .collect();
        scenarios
            .into_iter()
            .filter(|s| {
                if !self.matches(s) {
                    return false;
                }
                if self.names.is_empty() || exact.iter().any(|n| **n == s.name) {
                    return true;
                }
                // Substring matches only count for names with no exact hit.
                self.names
                    .iter()
                    .filter(|n| !exact.contains(n))
                    .any(|n| s.name.contains(n.as_str()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(name: &str, tags: &[&str]) -> Scenario {
        Scenario::new(name, "test", tags, vec![Step::new("noop", |_| Ok(()))])
    }

    fn catalog() -> Vec<Scenario> {
        vec![
            scenario("flow-chat-extract", &["chat", "extract"]),
            scenario("flow-chat-extract-list", &["chat", "extract"]),
            scenario("flow-plan-hold-workflow", &["plan", "hold"]),
            scenario("flow-plan-add-editor", &["plan", "editor"]).explicit_only(),
        ]
    }

    fn names(selected: &[Scenario]) -> Vec<&str> {
        selected.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_empty_filter_skips_explicit_only() {
        let selected = ScenarioFilter::default().select(catalog());
        assert_eq!(
            names(&selected),
            vec!["flow-chat-extract", "flow-chat-extract-list", "flow-plan-hold-workflow"]
        );
    }

    #[test]
    fn test_exact_name_wins_over_substring() {
        let filter = ScenarioFilter {
            names: vec!["flow-chat-extract".into()],
            tags: vec![],
        };
        assert_eq!(names(&filter.select(catalog())), vec!["flow-chat-extract"]);
    }

    #[test]
    fn test_substring_and_tags() {
        let filter = ScenarioFilter {
            names: vec!["chat".into()],
            tags: vec![],
        };
        assert_eq!(filter.select(catalog()).len(), 2);

        let filter = ScenarioFilter {
            names: vec![],
            tags: vec!["hold".into(), "editor".into()],
        };
        assert_eq!(names(&filter.select(catalog())), vec!["flow-plan-hold-workflow"]);
    }

    #[test]
    fn test_explicit_only_by_exact_name() {
        let filter = ScenarioFilter {
            names: vec!["flow-plan-add-editor".into()],
            tags: vec![],
        };
        assert_eq!(names(&filter.select(catalog())), vec!["flow-plan-add-editor"]);

        let filter = ScenarioFilter {
            names: vec!["editor".into()],
            tags: vec![],
        };
        assert!(filter.select(catalog()).is_empty());
    }

    #[test]
    fn test_step_runs_closure() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::new(dir.path(), Default::default()).unwrap();
        let step = Step::new("remember", |ctx: &mut Context| {
            ctx.set("seen", "yes");
            Ok(())
        });
        step.run(&mut ctx).unwrap();
        assert_eq!(ctx.get("seen"), Some("yes"));
        assert_eq!(step.name(), "remember");
    }
}
