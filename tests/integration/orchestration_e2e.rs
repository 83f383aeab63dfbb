//! Manifest-to-summary runs through the script executor.

use clavain::core::{ExecutionMode, TaskId, TaskStatus};
use clavain::orchestration::{validation_report, Orchestrator, RunEvent, RunOptions, RunSummary};
use clavain::Error;

use crate::fixtures::{manifest, ScriptProject};

const DIAMOND: &str = r#"
mode: dependency-driven
max_parallel: 2
timeout_per_task: 30
stages:
  - name: Base
    tasks:
      - id: a
        title: Define types
        files: [src/types.rs]
  - name: Middle
    tasks:
      - id: b
        title: Parser
        depends: [a]
      - id: c
        title: Printer
        depends: [a]
        tier: fast
  - name: Top
    tasks:
      - id: d
        title: Wire up
        depends: [b, c]
        prompt_hint: Keep main small.
"#;

const FAILING_CHAIN: &str = r#"
timeout_per_task: 30
stages:
  - name: Only
    tasks:
      - id: a
        title: First
      - id: b-fail
        title: Breaks
        depends: [a]
      - id: c
        title: Needs b
        depends: [b-fail]
      - id: x
        title: Independent
"#;

async fn run(
    project: &ScriptProject,
    yaml: &str,
    mode: Option<ExecutionMode>,
    dry_run: bool,
) -> (RunSummary, Vec<RunEvent>) {
    let orchestrator = Orchestrator::new(manifest(yaml), mode).unwrap();
    let options = RunOptions {
        project_dir: project.path().to_path_buf(),
        plan_path: None,
        dry_run,
    };
    let executor = if dry_run { None } else { Some(project.executor()) };
    let mut events = Vec::new();
    let summary = orchestrator
        .run(&options, executor, &mut |event| events.push(event.clone()))
        .await
        .unwrap();
    (summary, events)
}

fn status(summary: &RunSummary, id: &str) -> TaskStatus {
    summary.get(&TaskId::from(id)).unwrap().status.clone()
}

#[tokio::test]
async fn test_diamond_runs_in_dependency_waves() {
    let project = ScriptProject::new();
    let (summary, events) = run(&project, DIAMOND, None, false).await;

    assert!(summary.all_succeeded());
    assert_eq!(summary.total(), 4);

    let waves: Vec<Vec<String>> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::Wave { task_ids, .. } => {
                let mut ids: Vec<String> = task_ids.iter().map(|t| t.to_string()).collect();
                ids.sort();
                Some(ids)
            }
            _ => None,
        })
        .collect();
    assert_eq!(waves, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);

    let calls = project.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[0], "a tier=deep");
    assert!(calls.contains(&"c tier=fast".to_string()));
    assert_eq!(calls[3], "d tier=deep");
}

#[tokio::test]
async fn test_dependency_context_reaches_prompt() {
    let project = ScriptProject::new();
    run(&project, DIAMOND, None, false).await;

    let prompt = project.prompt("d");
    assert!(prompt.contains("## Context from dependencies"));
    let b = prompt.find("### b: Parser").unwrap();
    let c = prompt.find("### c: Printer").unwrap();
    assert!(b < c);
    assert!(prompt.contains("output of b"));
    assert!(prompt.contains("## Task: Wire up"));
    assert!(prompt.contains("Keep main small."));
    assert!(prompt.contains("VERDICT: CLEAN | NEEDS_ATTENTION"));

    let root = project.prompt("a");
    assert!(!root.contains("## Context from dependencies"));
    assert!(root.contains("- src/types.rs"));
}

#[tokio::test]
async fn test_failure_skips_transitive_dependents() {
    let project = ScriptProject::new();
    let (summary, events) = run(&project, FAILING_CHAIN, None, false).await;

    assert_eq!(status(&summary, "a"), TaskStatus::Pass);
    assert_eq!(status(&summary, "b-fail"), TaskStatus::Fail);
    assert_eq!(status(&summary, "c"), TaskStatus::Skipped);
    assert_eq!(status(&summary, "x"), TaskStatus::Pass);
    assert_eq!(
        summary.get(&TaskId::from("c")).unwrap().error.as_deref(),
        Some("Dependency b-fail failed")
    );
    assert!(!summary.all_succeeded());
    assert!(events.contains(&RunEvent::Skipped {
        failed: TaskId::from("b-fail"),
        skipped: vec![TaskId::from("c")],
    }));
    assert!(!project.calls().iter().any(|c| c.starts_with("c ")));
}

#[tokio::test]
async fn test_static_mode_skips_the_same_tasks() {
    let project = ScriptProject::new();
    let (summary, _) = run(&project, FAILING_CHAIN, Some(ExecutionMode::AllSequential), false).await;

    assert_eq!(status(&summary, "b-fail"), TaskStatus::Fail);
    assert_eq!(status(&summary, "c"), TaskStatus::Skipped);
    assert_eq!(status(&summary, "x"), TaskStatus::Pass);
    assert_eq!(project.calls().len(), 3);

    let text = summary.format(&manifest(FAILING_CHAIN));
    assert!(text.contains("Orchestration Summary"));
    assert!(text.contains("c: Needs b — Dependency b-fail failed"));
    assert!(text.contains("Total: 4, Passed: 2, Failed/Skipped: 2"));
}

#[tokio::test]
async fn test_missing_verdict_falls_back_to_exit_code() {
    let project = ScriptProject::new();
    let yaml = r#"
stages:
  - tasks:
      - id: t-quiet
        title: No verdict
"#;
    let (summary, _) = run(&project, yaml, None, false).await;
    assert_eq!(status(&summary, "t-quiet"), TaskStatus::Pass);
}

#[tokio::test]
async fn test_timeout_reports_partial_stderr() {
    let project = ScriptProject::new();
    let yaml = r#"
timeout_per_task: 1
stages:
  - tasks:
      - id: t-slow
        title: Never finishes
      - id: t-ok
        title: Finishes
"#;
    let (summary, _) = run(&project, yaml, None, false).await;

    let slow = summary.get(&TaskId::from("t-slow")).unwrap();
    assert_eq!(slow.status, TaskStatus::Error);
    assert_eq!(
        slow.error.as_deref(),
        Some("Timeout expired after 1s. Last stderr: partial progress on t-slow")
    );
    assert_eq!(status(&summary, "t-ok"), TaskStatus::Pass);
}

#[tokio::test]
async fn test_dry_run_dispatches_nothing() {
    let project = ScriptProject::new();
    let (summary, events) = run(&project, DIAMOND, None, true).await;

    assert!(project.calls().is_empty());
    assert!(summary.results().iter().all(|r| r.status == TaskStatus::DryRun));
    assert!(summary.all_succeeded());
    assert!(events
        .iter()
        .all(|e| !matches!(e, RunEvent::Wave { dry_run: false, .. })));
}

#[tokio::test]
async fn test_live_run_requires_executor() {
    let project = ScriptProject::new();
    let orchestrator = Orchestrator::new(manifest(DIAMOND), None).unwrap();
    let options = RunOptions {
        project_dir: project.path().to_path_buf(),
        plan_path: None,
        dry_run: false,
    };
    let result = orchestrator.run(&options, None, &mut |_| {}).await;
    assert!(matches!(result, Err(Error::ExecutorNotFound)));
}

#[tokio::test]
async fn test_run_artifacts_are_removed() {
    let project = ScriptProject::new();
    let (summary, _) = run(&project, DIAMOND, None, false).await;
    let output = summary
        .get(&TaskId::from("a"))
        .and_then(|r| r.output_path.clone())
        .unwrap();
    assert!(!output.exists());
    assert!(!output.parent().unwrap().exists());
}

#[test]
fn test_invalid_manifest_reports_every_error() {
    let yaml = r#"
stages:
  - tasks:
      - id: a
        title: A
        depends: [b]
      - id: b
        title: B
        depends: [a]
      - id: c
        title: C
        depends: [ghost]
"#;
    let errors = validation_report(&manifest(yaml)).unwrap_err();
    assert!(errors.len() >= 2);
    assert!(errors.iter().any(|e| e.contains("ghost")));

    match Orchestrator::new(manifest(yaml), None) {
        Err(Error::InvalidGraph(found)) => assert_eq!(found, errors),
        other => panic!("Expected InvalidGraph, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_valid_manifest_report() {
    assert_eq!(
        validation_report(&manifest(DIAMOND)).unwrap(),
        "Manifest valid: 4 tasks, 0 cycles, mode: dependency-driven"
    );
}
