use std::collections::HashSet;

use flow_e2e::harness::ScenarioFilter;
use flow_e2e::scenarios;

#[test]
fn scenario_names_are_unique() {
    let all = scenarios::all();
    let names: HashSet<&str> = all.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names.len(), all.len());
}

#[test]
fn every_scenario_is_described() {
    for scenario in scenarios::all() {
        assert!(!scenario.description.is_empty(), "{}", scenario.name);
        assert!(!scenario.tags.is_empty(), "{}", scenario.name);
        assert!(!scenario.steps.is_empty(), "{}", scenario.name);
    }
}

#[test]
fn prepend_dependencies_needs_an_exact_name() {
    let everything = ScenarioFilter::default().select(scenarios::all());
    assert!(everything
        .iter()
        .all(|s| s.name != "flow-prepend-dependencies"));

    let by_substring = ScenarioFilter {
        names: vec!["prepend".into()],
        tags: vec![],
    }
    .select(scenarios::all());
    assert!(by_substring.is_empty());

    let exact = ScenarioFilter {
        names: vec!["flow-prepend-dependencies".into()],
        tags: vec![],
    }
    .select(scenarios::all());
    assert_eq!(exact.len(), 1);
    assert!(exact[0].explicit_only);
}

#[test]
fn tag_filter_selects_extract_scenarios() {
    let selected = ScenarioFilter {
        names: vec![],
        tags: vec!["extract".into()],
    }
    .select(scenarios::all());
    let names: Vec<&str> = selected.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "flow-plan-recipe-extract",
            "flow-chat-extract-basic",
            "flow-chat-extract-list",
            "flow-chat-extract-all",
            "flow-chat-extract-errors",
        ]
    );
}

#[test]
fn rules_prompt_scenarios_share_a_tag() {
    let selected = ScenarioFilter {
        names: vec![],
        tags: vec!["rules".into()],
    }
    .select(scenarios::all());
    assert_eq!(selected.len(), 3);
    assert!(selected.iter().all(|s| s.name.starts_with("rules-prompt-")));
}

#[test]
fn worktree_tag_spans_modules() {
    let selected = ScenarioFilter {
        names: vec![],
        tags: vec!["worktree".into()],
    }
    .select(scenarios::all());
    let names: Vec<&str> = selected.iter().map(|s| s.name.as_str()).collect();
    for expected in [
        "worktree-state-isolation",
        "worktree-state-direct-navigation",
        "simple-worktree-context-test",
        "flow-go-workspace-worktree",
    ] {
        assert!(names.contains(&expected), "{expected} missing from {names:?}");
    }
}
