//! Upstream sync against real git clones.

use std::sync::Arc;

use clavain::sync::engine::SyncRun;
use clavain::sync::{
    Classification, ConflictDecision, Decision, FileAction, Risk, SemanticAnalyzer, SyncEngine,
    SyncMode, UpstreamConfig, UpstreamStatus,
};
use clavain::Error;

use crate::fixtures::{FixedAnalyzer, OriginRepo, SyncProject};

struct Scenario {
    origin: OriginRepo,
    project: SyncProject,
    base: String,
    head: String,
}

/// Upstream `tools` with a `plugin/` base path. The clone is taken at the
/// base commit; the origin then moves one commit ahead, so every sync has
/// to fetch first.
fn scenario() -> Scenario {
    let origin = OriginRepo::new();
    let base = origin.commit(
        &[
            ("plugin/skills/auto.md", Some("Run /workflows:plan\n")),
            ("plugin/skills/conflict.md", Some("line1\nline2\n")),
            ("plugin/commands/lfg.md", Some("upstream lfg\n")),
            ("plugin/README.md", Some("readme\n")),
            ("outside.md", Some("not under base path\n")),
        ],
        "base",
    );

    let project = SyncProject::new();
    project.clone_upstream("tools", &origin);
    project.write("skills/auto.md", "Run /clavain:plan\n");
    project.write("skills/conflict.md", "line1\nline2 local\n");
    project.write("commands/lfg.md", "our lfg\n");
    project.write_config(&config_json(&base));

    let head = origin.commit(
        &[
            ("plugin/skills/auto.md", Some("Run /workflows:plan twice\n")),
            ("plugin/skills/conflict.md", Some("line1 upstream\nline2\n")),
            ("plugin/commands/lfg.md", Some("upstream lfg v2\n")),
            ("plugin/skills/new.md", Some("brand new\n")),
            ("outside.md", Some("still not mapped\n")),
        ],
        "upstream work",
    );

    Scenario {
        origin,
        project,
        base,
        head,
    }
}

fn config_json(last_synced: &str) -> String {
    format!(
        r#"{{
  "upstreams": [
    {{
      "name": "tools",
      "url": "https://example.com/tools.git",
      "branch": "main",
      "lastSyncedCommit": "{}",
      "basePath": "plugin",
      "fileMap": {{
        "skills/*": "skills/*",
        "commands/*": "commands/*"
      }}
    }}
  ],
  "syncConfig": {{
    "protectedFiles": ["commands/lfg.md"],
    "deletedLocally": [],
    "namespaceReplacements": {{
      "/workflows:": "/clavain:"
    }},
    "contentBlocklist": ["rails_model"]
  }}
}}
"#,
        last_synced
    )
}

fn accept_low() -> ConflictDecision {
    ConflictDecision {
        decision: Decision::AcceptUpstream,
        risk: Risk::Low,
        rationale: "Edits touch different lines".to_string(),
        blocklist_found: Vec::new(),
    }
}

async fn sync(
    s: &Scenario,
    mode: SyncMode,
    analyzer: Option<Arc<dyn SemanticAnalyzer>>,
    only: Option<&str>,
) -> clavain::Result<SyncRun> {
    let config = UpstreamConfig::load(&s.project.config_path())?;
    let engine = SyncEngine::new(
        s.project.path().to_path_buf(),
        s.project.config_path(),
        mode,
        analyzer,
    );
    engine
        .run(&config, &s.project.upstreams_dir(), only, &mut |_| {})
        .await
}

fn action(run: &SyncRun, path: &str) -> (Classification, FileAction) {
    let record = run.outcomes[0]
        .files
        .iter()
        .find(|f| f.local_path == path)
        .unwrap_or_else(|| panic!("{} was not classified", path));
    (record.classification, record.action)
}

#[tokio::test]
async fn test_auto_sync_applies_and_advances() {
    let s = scenario();
    let analyzer = FixedAnalyzer::new(accept_low());

    let run = sync(&s, SyncMode::Auto, Some(analyzer.clone() as Arc<dyn SemanticAnalyzer>), None)
        .await
        .unwrap();

    assert_eq!(
        run.outcomes[0].status,
        UpstreamStatus::Synced {
            head: s.head.clone(),
            new_commits: 1
        }
    );
    assert_eq!(action(&run, "skills/auto.md"), (Classification::Auto, FileAction::Applied));
    assert_eq!(action(&run, "skills/conflict.md"), (Classification::Conflict, FileAction::Applied));
    assert_eq!(
        action(&run, "commands/lfg.md"),
        (Classification::SkipProtected, FileAction::Untouched)
    );
    assert_eq!(
        action(&run, "skills/new.md"),
        (Classification::SkipNotPresent, FileAction::Untouched)
    );
    assert_eq!(run.outcomes[0].files.len(), 4);

    assert_eq!(s.project.read("skills/auto.md"), "Run /clavain:plan twice\n");
    assert_eq!(s.project.read("skills/conflict.md"), "line1 upstream\nline2\n");
    assert_eq!(s.project.read("commands/lfg.md"), "our lfg\n");
    assert!(!s.project.path().join("skills/new.md").exists());

    assert_eq!(analyzer.calls(), 1);
    let request = &analyzer.requests()[0];
    assert_eq!(request.local, "line1\nline2 local\n");
    assert_eq!(request.ancestor, "line1\nline2\n");
    assert_eq!(request.blocklist, vec!["rails_model".to_string()]);

    let counts = run.report.counts();
    assert_eq!((counts.auto, counts.conflict, counts.skip, counts.resolved), (1, 1, 2, 1));
    assert!(run.report.generate().contains("- skills/conflict.md: **accept_upstream** (risk: low)"));
    assert!(run.contamination.is_empty());

    assert!(run.outcomes[0].checkpoint_advanced);
    assert_eq!(s.project.checkpoint("tools"), s.head);
    let written: serde_json::Value = serde_json::from_str(&s.project.config_text()).unwrap();
    let expected: serde_json::Value = serde_json::from_str(&config_json(&s.head)).unwrap();
    assert_eq!(written, expected);
}

#[tokio::test]
async fn test_second_sync_is_up_to_date() {
    let s = scenario();
    sync(&s, SyncMode::Auto, None, None).await.unwrap();

    let run = sync(&s, SyncMode::Auto, None, None).await.unwrap();
    assert_eq!(
        run.outcomes[0].status,
        UpstreamStatus::UpToDate {
            head: s.head.clone()
        }
    );
    assert!(run.outcomes[0].files.is_empty());
}

#[tokio::test]
async fn test_dry_run_changes_nothing_locally() {
    let s = scenario();
    let before = s.project.config_text();
    let analyzer = FixedAnalyzer::new(accept_low());

    let run = sync(&s, SyncMode::DryRun, Some(analyzer.clone() as Arc<dyn SemanticAnalyzer>), None)
        .await
        .unwrap();

    assert_eq!(action(&run, "skills/auto.md"), (Classification::Auto, FileAction::Untouched));
    assert_eq!(action(&run, "skills/conflict.md"), (Classification::Conflict, FileAction::Untouched));
    assert_eq!(s.project.read("skills/auto.md"), "Run /clavain:plan\n");
    assert_eq!(s.project.config_text(), before);
    assert_eq!(analyzer.calls(), 0);
    assert!(run.modified().is_empty());
}

#[tokio::test]
async fn test_interactive_leaves_conflicts() {
    let s = scenario();
    let analyzer = FixedAnalyzer::new(accept_low());

    let run = sync(&s, SyncMode::Interactive, Some(analyzer.clone() as Arc<dyn SemanticAnalyzer>), None)
        .await
        .unwrap();

    assert_eq!(
        action(&run, "skills/conflict.md"),
        (Classification::Conflict, FileAction::LeftForReview)
    );
    assert_eq!(s.project.read("skills/conflict.md"), "line1\nline2 local\n");
    assert_eq!(s.project.read("skills/auto.md"), "Run /clavain:plan twice\n");
    assert_eq!(analyzer.calls(), 0);
    assert_eq!(s.project.checkpoint("tools"), s.head);
}

#[tokio::test]
async fn test_no_ai_conflict_needs_human() {
    let s = scenario();
    let run = sync(&s, SyncMode::Auto, None, None).await.unwrap();

    let record = run.outcomes[0]
        .files
        .iter()
        .find(|f| f.local_path == "skills/conflict.md")
        .unwrap();
    assert_eq!(record.action, FileAction::LeftForReview);
    assert_eq!(record.decision, Some(ConflictDecision::fallback()));
    assert_eq!(s.project.read("skills/conflict.md"), "line1\nline2 local\n");
}

#[tokio::test]
async fn test_unreachable_checkpoint_is_skipped() {
    let s = scenario();
    let bogus = "0123456789abcdef0123456789abcdef01234567";
    s.project.write_config(&config_json(bogus));

    let run = sync(&s, SyncMode::Auto, None, None).await.unwrap();

    assert_eq!(
        run.outcomes[0].status,
        UpstreamStatus::BaseUnreachable {
            base: bogus.to_string()
        }
    );
    assert_eq!(s.project.read("skills/auto.md"), "Run /clavain:plan\n");
    assert_eq!(s.project.config_text(), config_json(bogus));
}

#[tokio::test]
async fn test_missing_clone_is_reported() {
    let s = scenario();
    std::fs::remove_dir_all(s.project.upstreams_dir().join("tools")).unwrap();

    let run = sync(&s, SyncMode::Auto, None, None).await.unwrap();
    assert!(matches!(run.outcomes[0].status, UpstreamStatus::CloneMissing(_)));
    assert_eq!(s.project.checkpoint("tools"), s.base);
}

#[tokio::test]
async fn test_unknown_upstream_filter() {
    let s = scenario();
    let result = sync(&s, SyncMode::Auto, None, Some("nope")).await;
    assert!(matches!(result, Err(Error::Validation(_))));

    let run = sync(&s, SyncMode::DryRun, None, Some("tools")).await.unwrap();
    assert_eq!(run.outcomes.len(), 1);
}

#[tokio::test]
async fn test_contamination_reported_for_written_files() {
    let s = scenario();
    s.origin.commit(
        &[("plugin/skills/auto.md", Some("Run /workflows:plan with rails_model\n"))],
        "more",
    );
    // Already carries the term locally, so the rewritten upstream is a COPY.
    s.project.write("skills/auto.md", "Run /clavain:plan with rails_model\n");

    let run = sync(&s, SyncMode::Interactive, None, None).await.unwrap();

    assert_eq!(action(&run, "skills/auto.md"), (Classification::Copy, FileAction::Applied));
    assert_eq!(
        run.contamination,
        vec!["skills/auto.md contains blocklisted term: rails_model".to_string()]
    );
}
