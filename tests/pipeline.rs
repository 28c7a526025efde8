//! End-to-end pipeline behavior over the in-memory store, with scripted
//! hosting and generation backends.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::*;
use repo_atlas::chat::FALLBACK_ANSWER;
use repo_atlas::classify::Framework;
use repo_atlas::config::Config;
use repo_atlas::describe::{Origin, NO_EXPLANATION};
use repo_atlas::error::{AnalysisError, QueryError};
use repo_atlas::events::PipelineEvent;
use repo_atlas::graph::EdgeKind;
use repo_atlas::models::{
    AnalysisResult, AnalysisStatus, CachedDescription, ChatMessage, ChatRole, ChatSession,
    FileExplanation, Repository, SubsystemDescription,
};
use repo_atlas::pipeline::{AnalysisOutcome, Pipeline};
use repo_atlas::repo_ref::RepoRef;
use repo_atlas::store::memory::InMemoryStore;
use repo_atlas::store::{StatusUpdate, Store};

fn svelte_app() -> FakeHosting {
    FakeHosting::new().with_repo("acme/app", ts(1_700_000_000), SVELTE_TREE)
}

#[tokio::test]
async fn svelte_repository_is_partitioned_and_graphed() {
    let h = harness(svelte_app(), FakeGenerator::replying(DESCRIPTION_JSON));

    let outcome = h.pipeline.analyze("acme/app", false).await.unwrap();
    assert!(matches!(outcome, AnalysisOutcome::Completed(_)));
    let record = outcome.repository();
    assert_eq!(record.id, "acme/app");
    assert_eq!(record.analysis_status, AnalysisStatus::Completed);
    assert_eq!(record.default_branch.as_deref(), Some("main"));
    assert_eq!(record.upstream_pushed_at, Some(ts(1_700_000_000)));
    assert!(record.last_error.is_none());

    let (_, analysis) = h.pipeline.analysis("https://github.com/Acme/App").await.unwrap();
    assert_eq!(analysis.framework, Framework::Svelte);
    assert_eq!(analysis.file_tree.len(), SVELTE_TREE.len());
    analysis.validate().unwrap();
    for name in ["Routes", "Components", "Services"] {
        assert!(analysis.subsystem(name).is_some(), "missing {}", name);
    }
    assert_eq!(
        analysis.subsystem("Routes").unwrap().files,
        vec!["src/routes/a.x"]
    );

    let graph = h.pipeline.graph("acme/app", false).await.unwrap();
    let flow = |from: &str, to: &str| {
        graph
            .edges
            .iter()
            .any(|e| e.from == from && e.to == to && e.kind == EdgeKind::Flow)
    };
    assert!(flow("Routes", "Components"));
    assert!(flow("Components", "Services"));
    // No Stores subsystem, so no edge may point at one.
    assert!(!graph.has_node("Stores"));
    assert!(graph.edges.iter().all(|e| e.from != "Stores" && e.to != "Stores"));
}

#[tokio::test]
async fn unchanged_upstream_is_fresh_and_newer_upstream_reanalyzes() {
    let h = harness(svelte_app(), FakeGenerator::replying(DESCRIPTION_JSON));

    h.pipeline.analyze("acme/app", false).await.unwrap();
    assert_eq!(h.hosting.tree_calls.load(Ordering::SeqCst), 1);

    let again = h.pipeline.analyze("acme/app", false).await.unwrap();
    assert!(matches!(again, AnalysisOutcome::Fresh(_)));
    assert_eq!(h.hosting.tree_calls.load(Ordering::SeqCst), 1);

    let (_, first) = h.pipeline.analysis("acme/app").await.unwrap();

    h.hosting.set_repo(
        "acme/app",
        ts(1_700_000_600),
        &["svelte.config.js", "package.json", "src/routes/a.x", "src/routes/b.x"],
    );
    let rerun = h.pipeline.analyze("acme/app", false).await.unwrap();
    assert!(matches!(rerun, AnalysisOutcome::Completed(_)));
    assert_eq!(h.hosting.tree_calls.load(Ordering::SeqCst), 2);
    assert_eq!(rerun.repository().upstream_pushed_at, Some(ts(1_700_000_600)));

    let (_, second) = h.pipeline.analysis("acme/app").await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.subsystem("Routes").unwrap().files.len(), 2);
    assert!(second.subsystem("Components").is_none());
}

#[tokio::test]
async fn force_reanalyzes_a_fresh_repository() {
    let h = harness(svelte_app(), FakeGenerator::replying(DESCRIPTION_JSON));

    h.pipeline.analyze("acme/app", false).await.unwrap();
    let forced = h.pipeline.analyze("acme/app", true).await.unwrap();
    assert!(matches!(forced, AnalysisOutcome::Completed(_)));
    assert_eq!(h.hosting.tree_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missing_repository_fails_and_retry_reuses_the_record() {
    let h = harness(FakeHosting::new(), FakeGenerator::replying(DESCRIPTION_JSON));

    let err = h.pipeline.analyze("acme/ghost", false).await.unwrap_err();
    assert!(matches!(err, AnalysisError::NotFound(_)));

    let failed = h.pipeline.repository("acme/ghost").await.unwrap().unwrap();
    assert_eq!(failed.analysis_status, AnalysisStatus::Failed);
    assert!(failed
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("[not_found]"));

    h.hosting.set_repo("acme/ghost", ts(1_700_000_000), SVELTE_TREE);
    let outcome = h.pipeline.analyze("acme/ghost", false).await.unwrap();
    let done = outcome.repository();
    assert_eq!(done.analysis_status, AnalysisStatus::Completed);
    assert_eq!(done.id, failed.id);
    assert_eq!(done.created_at, failed.created_at);
    assert!(done.last_error.is_none());
}

#[tokio::test]
async fn rate_limit_is_recorded_with_its_category() {
    let hosting = svelte_app();
    hosting.fail_with(Some(AnalysisError::RateLimited {
        reset_at: Some(ts(1_700_003_600)),
    }));
    let h = harness(hosting, FakeGenerator::replying(DESCRIPTION_JSON));

    let err = h.pipeline.analyze("acme/app", false).await.unwrap_err();
    assert_eq!(err.category(), "rate_limited");

    let record = h.pipeline.repository("acme/app").await.unwrap().unwrap();
    assert_eq!(record.analysis_status, AnalysisStatus::Failed);
    let message = record.last_error.unwrap();
    assert!(message.starts_with("[rate_limited]"), "{}", message);
    assert!(message.contains("2023-11-14T23:13:20Z"), "{}", message);

    // A failed analysis is not visible to the read side.
    let err = h.pipeline.graph("acme/app", false).await.unwrap_err();
    assert!(matches!(err, QueryError::NotAnalyzed(_)));
}

#[tokio::test]
async fn failed_freshness_check_keeps_the_completed_analysis() {
    let h = harness(svelte_app(), FakeGenerator::replying(DESCRIPTION_JSON));
    h.pipeline.analyze("acme/app", false).await.unwrap();
    let before = h.pipeline.repository("acme/app").await.unwrap().unwrap();
    let tree_calls = h.hosting.tree_calls.load(Ordering::SeqCst);

    for failure in [
        AnalysisError::RateLimited { reset_at: None },
        AnalysisError::NotFound("acme/app".to_string()),
        AnalysisError::Network("connection reset".to_string()),
    ] {
        let category = failure.category();
        h.hosting.fail_with(Some(failure));
        let err = h.pipeline.analyze("acme/app", false).await.unwrap_err();
        assert_eq!(err.category(), category);

        let record = h.pipeline.repository("acme/app").await.unwrap().unwrap();
        assert_eq!(record.analysis_status, AnalysisStatus::Completed);
        assert_eq!(record.version, before.version);
        assert!(record.last_error.is_none());
        assert!(h.pipeline.graph("acme/app", false).await.is_ok());
    }
    assert_eq!(h.hosting.tree_calls.load(Ordering::SeqCst), tree_calls);

    h.hosting.fail_with(None);
    let outcome = h.pipeline.analyze("acme/app", false).await.unwrap();
    assert!(matches!(outcome, AnalysisOutcome::Fresh(_)));
}

#[tokio::test]
async fn invalid_reference_is_rejected_before_any_fetch() {
    let h = harness(svelte_app(), FakeGenerator::replying(DESCRIPTION_JSON));

    let err = h.pipeline.analyze("not a repo!!", false).await.unwrap_err();
    assert!(matches!(err, AnalysisError::InvalidInput(_)));
    assert_eq!(h.hosting.metadata_calls.load(Ordering::SeqCst), 0);
    assert!(h.store.get_repository("not a repo!!").await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_analysis_reports_in_progress() {
    let hosting = svelte_app();
    let gate = hosting.gate();
    let h = harness(hosting, FakeGenerator::replying(DESCRIPTION_JSON));

    let first = {
        let pipeline = h.pipeline.clone();
        tokio::spawn(async move { pipeline.analyze("acme/app", false).await })
    };

    let hosting = h.hosting.clone();
    tokio::time::timeout(Duration::from_secs(5), async move {
        while hosting.tree_calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first run never reached the tree fetch");

    let second = h.pipeline.analyze("acme/app", false).await.unwrap();
    match &second {
        AnalysisOutcome::InProgress(record) => {
            assert_eq!(record.analysis_status, AnalysisStatus::Analyzing)
        }
        other => panic!("expected in-progress, got {:?}", other),
    }

    gate.add_permits(1);
    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, AnalysisOutcome::Completed(_)));
    assert_eq!(h.hosting.tree_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn status_changes_are_published() {
    let h = harness(svelte_app(), FakeGenerator::replying(DESCRIPTION_JSON));
    let mut events = h.pipeline.subscribe();

    h.pipeline.analyze("acme/app", false).await.unwrap();

    let statuses: Vec<AnalysisStatus> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|e| match e {
            PipelineEvent::StatusChanged { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![AnalysisStatus::Analyzing, AnalysisStatus::Completed]
    );
}

#[tokio::test]
async fn descriptions_are_generated_once_then_served_from_cache() {
    let h = harness(svelte_app(), FakeGenerator::replying(DESCRIPTION_JSON));
    h.pipeline.analyze("acme/app", false).await.unwrap();

    let first = h.pipeline.describe("acme/app", "Routes", false).await.unwrap();
    assert_eq!(first.origin, Origin::Generated);
    assert_eq!(first.value.name, "Routes");
    assert_eq!(first.value.purpose, "Defines the pages.");
    assert_eq!(first.value.entry_points, vec!["src/routes/a.x"]);
    assert_eq!(h.generator.call_count(), 1);

    let second = h.pipeline.describe("acme/app", "Routes", false).await.unwrap();
    assert_eq!(second.origin, Origin::Cached);
    assert_eq!(second.value, first.value);
    assert_eq!(h.generator.call_count(), 1);

    let (_, analysis) = h.pipeline.analysis("acme/app").await.unwrap();
    assert_eq!(analysis.description_for("Routes"), Some(&first.value));

    let refreshed = h.pipeline.describe("acme/app", "Routes", true).await.unwrap();
    assert_eq!(refreshed.origin, Origin::Generated);
    assert_eq!(h.generator.call_count(), 2);
}

#[tokio::test]
async fn generation_failure_falls_back_without_failing_the_analysis() {
    let h = harness(svelte_app(), FakeGenerator::failing());
    h.pipeline.analyze("acme/app", false).await.unwrap();

    let described = h.pipeline.describe("acme/app", "Routes", false).await.unwrap();
    assert_eq!(described.origin, Origin::Fallback);
    assert_eq!(described.value.purpose, "SvelteKit routes, pages and endpoints");
    assert_eq!(described.value.key_files, vec!["src/routes/a.x"]);

    let record = h.pipeline.repository("acme/app").await.unwrap().unwrap();
    assert_eq!(record.analysis_status, AnalysisStatus::Completed);

    // Placeholders are never persisted.
    let (_, analysis) = h.pipeline.analysis("acme/app").await.unwrap();
    assert!(analysis.description_for("Routes").is_none());
}

#[tokio::test]
async fn expired_cache_is_served_stale_when_regeneration_fails() {
    let mut config = Config::with_db_path("unused.sqlite");
    config.cache.ttl_secs = 0;
    let h = harness_with(config, svelte_app(), FakeGenerator::replying(DESCRIPTION_JSON));
    h.pipeline.analyze("acme/app", false).await.unwrap();

    let generated = h.pipeline.describe("acme/app", "Routes", false).await.unwrap();
    assert_eq!(generated.origin, Origin::Generated);

    h.generator
        .set_reply(Err(AnalysisError::Timeout("generation took too long".into())));
    let stale = h.pipeline.describe("acme/app", "Routes", false).await.unwrap();
    assert_eq!(stale.origin, Origin::Stale);
    assert_eq!(stale.value, generated.value);
    assert_eq!(h.generator.call_count(), 2);
}

#[tokio::test]
async fn unknown_names_are_reported() {
    let h = harness(svelte_app(), FakeGenerator::replying(DESCRIPTION_JSON));

    let err = h.pipeline.describe("acme/app", "Routes", false).await.unwrap_err();
    assert!(matches!(err, QueryError::NotAnalyzed(_)));

    h.pipeline.analyze("acme/app", false).await.unwrap();
    let err = h.pipeline.describe("acme/app", "Nope", false).await.unwrap_err();
    assert!(matches!(err, QueryError::UnknownSubsystem(_)));
    let err = h.pipeline.explain("acme/app", "src/nope.x", false).await.unwrap_err();
    assert!(matches!(err, QueryError::UnknownFile(_)));
    let err = h.pipeline.related("acme/app", "Nope", None).await.unwrap_err();
    assert_eq!(err.code(), "unknown_subsystem");
    assert_eq!(h.generator.call_count(), 0);
}

#[tokio::test]
async fn describe_all_covers_only_undescribed_subsystems() {
    let h = harness(svelte_app(), FakeGenerator::replying(DESCRIPTION_JSON));
    h.pipeline.analyze("acme/app", false).await.unwrap();
    h.pipeline.describe("acme/app", "Routes", false).await.unwrap();

    let (_, analysis) = h.pipeline.analysis("acme/app").await.unwrap();
    let expected: Vec<String> = analysis
        .subsystems
        .iter()
        .map(|s| s.name.clone())
        .filter(|n| n != "Routes")
        .collect();

    let described = h.pipeline.describe_all("acme/app").await.unwrap();
    let names: Vec<String> = described.iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(names, expected);
    assert!(described.iter().all(|(_, d)| d.origin == Origin::Generated));

    let again = h.pipeline.describe_all("acme/app").await.unwrap();
    assert!(again.is_empty());
}

/// Delegates to an in-memory store but fails the first description upsert.
struct FirstUpsertFails {
    inner: InMemoryStore,
    upserts: AtomicUsize,
}

#[async_trait]
impl Store for FirstUpsertFails {
    async fn find_or_create_repository(
        &self,
        repo: &RepoRef,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Repository> {
        self.inner.find_or_create_repository(repo, now).await
    }

    async fn get_repository(&self, id: &str) -> anyhow::Result<Option<Repository>> {
        self.inner.get_repository(id).await
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        expected_version: i64,
        update: &StatusUpdate,
    ) -> anyhow::Result<Option<Repository>> {
        self.inner.compare_and_set_status(id, expected_version, update).await
    }

    async fn load_analysis(&self, repo_id: &str) -> anyhow::Result<Option<AnalysisResult>> {
        self.inner.load_analysis(repo_id).await
    }

    async fn upsert_subsystem_description(
        &self,
        analysis_id: &str,
        description: &SubsystemDescription,
    ) -> anyhow::Result<bool> {
        if self.upserts.fetch_add(1, Ordering::SeqCst) == 0 {
            anyhow::bail!("disk full");
        }
        self.inner.upsert_subsystem_description(analysis_id, description).await
    }

    async fn upsert_file_explanation(
        &self,
        analysis_id: &str,
        file_key: &str,
        explanation: &FileExplanation,
    ) -> anyhow::Result<bool> {
        self.inner.upsert_file_explanation(analysis_id, file_key, explanation).await
    }

    async fn get_cached(&self, key: &str) -> anyhow::Result<Option<CachedDescription>> {
        self.inner.get_cached(key).await
    }

    async fn put_cached(&self, entry: &CachedDescription) -> anyhow::Result<()> {
        self.inner.put_cached(entry).await
    }

    async fn get_or_create_session(
        &self,
        repo_id: &str,
        client: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ChatSession> {
        self.inner.get_or_create_session(repo_id, client, now).await
    }

    async fn get_session(&self, session_id: &str) -> anyhow::Result<Option<ChatSession>> {
        self.inner.get_session(session_id).await
    }

    async fn append_message(&self, session_id: &str, message: &ChatMessage) -> anyhow::Result<()> {
        self.inner.append_message(session_id, message).await
    }

    async fn load_messages(&self, session_id: &str) -> anyhow::Result<Vec<ChatMessage>> {
        self.inner.load_messages(session_id).await
    }
}

#[tokio::test]
async fn describe_all_finishes_siblings_of_a_failed_subsystem() {
    let mut config = Config::with_db_path("unused.sqlite");
    config.generation.concurrency = 1;
    let store = Arc::new(FirstUpsertFails {
        inner: InMemoryStore::new(),
        upserts: AtomicUsize::new(0),
    });
    let generator = Arc::new(FakeGenerator::replying(DESCRIPTION_JSON));
    let pipeline = Pipeline::new(&config, store.clone(), Arc::new(svelte_app()), generator.clone());
    pipeline.analyze("acme/app", false).await.unwrap();

    let err = pipeline.describe_all("acme/app").await.unwrap_err();
    assert!(err.to_string().contains("disk full"), "{}", err);

    // All three subsystems were generated; the two that stored are kept.
    assert_eq!(generator.call_count(), 3);
    assert_eq!(store.upserts.load(Ordering::SeqCst), 3);
    let (_, analysis) = pipeline.analysis("acme/app").await.unwrap();
    assert_eq!(analysis.subsystem_descriptions.len(), 2);

    let retried = pipeline.describe_all("acme/app").await.unwrap();
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].1.origin, Origin::Cached);
    assert_eq!(generator.call_count(), 3);
}

#[tokio::test]
async fn file_explanations_use_the_file_content() {
    let hosting = svelte_app();
    hosting.set_content("src/services/c.x", "export function fetchUsers() {}");
    let h = harness(hosting, FakeGenerator::replying("  Fetches users.  "));
    h.pipeline.analyze("acme/app", false).await.unwrap();

    let explained = h
        .pipeline
        .explain("acme/app", "src/services/c.x", false)
        .await
        .unwrap();
    assert_eq!(explained.origin, Origin::Generated);
    assert_eq!(explained.value.explanation, "Fetches users.");
    assert!(h.generator.prompts.lock().unwrap()[0].contains("fetchUsers"));

    let (_, analysis) = h.pipeline.analysis("acme/app").await.unwrap();
    assert_eq!(
        analysis.explanation_for("src/services/c.x"),
        Some(&explained.value)
    );

    let cached = h
        .pipeline
        .explain("acme/app", "src/services/c.x", false)
        .await
        .unwrap();
    assert_eq!(cached.origin, Origin::Cached);
    assert_eq!(h.generator.call_count(), 1);
}

#[tokio::test]
async fn file_explanation_falls_back_to_placeholder() {
    let h = harness(svelte_app(), FakeGenerator::failing());
    h.pipeline.analyze("acme/app", false).await.unwrap();

    let explained = h
        .pipeline
        .explain("acme/app", "src/routes/a.x", false)
        .await
        .unwrap();
    assert_eq!(explained.origin, Origin::Fallback);
    assert_eq!(explained.value.explanation, NO_EXPLANATION);
}

#[tokio::test]
async fn chat_appends_to_the_current_session() {
    let h = harness(svelte_app(), FakeGenerator::replying("Routes live in src/routes."));
    h.pipeline.analyze("acme/app", false).await.unwrap();

    let reply = h
        .pipeline
        .chat("acme/app", "browser", "Where are the routes?")
        .await
        .unwrap();
    assert_eq!(reply.origin, Origin::Generated);
    assert_eq!(reply.question.role, ChatRole::User);
    assert_eq!(reply.answer.content, "Routes live in src/routes.");
    assert!(h.generator.prompts.lock().unwrap()[0].contains("src/routes/a.x"));

    h.generator
        .set_reply(Err(AnalysisError::Generation("overloaded".into())));
    let fallback = h
        .pipeline
        .chat("acme/app", "browser", "And the services?")
        .await
        .unwrap();
    assert_eq!(fallback.origin, Origin::Fallback);
    assert_eq!(fallback.answer.content, FALLBACK_ANSWER);
    assert_eq!(fallback.session_id, reply.session_id);

    let (session, messages) = h.pipeline.history("acme/app", "browser").await.unwrap();
    assert_eq!(session.id, reply.session_id);
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![
            "Where are the routes?",
            "Routes live in src/routes.",
            "And the services?",
            FALLBACK_ANSWER,
        ]
    );

    // Another client gets its own session.
    let (other, messages) = h.pipeline.history("acme/app", "cli").await.unwrap();
    assert_ne!(other.id, session.id);
    assert!(messages.is_empty());
}

#[tokio::test]
async fn related_and_graph_edges_follow_shared_top_level_directories() {
    let hosting = FakeHosting::new().with_repo(
        "acme/app",
        ts(1_700_000_000),
        &[
            "svelte.config.js",
            "src/routes/a.x",
            "src/components/b.x",
            "src/stores/s.x",
            "docs/guide.md",
        ],
    );
    let h = harness(hosting, FakeGenerator::replying(DESCRIPTION_JSON));
    h.pipeline.analyze("acme/app", false).await.unwrap();

    let related = h.pipeline.related("acme/app", "Routes", None).await.unwrap();
    assert!(related.contains(&"Components".to_string()));
    assert!(related.contains(&"Stores".to_string()));
    assert!(!related.contains(&"Routes".to_string()));

    let limited = h.pipeline.related("acme/app", "Routes", Some(1)).await.unwrap();
    assert_eq!(limited.len(), 1);

    let plain = h.pipeline.graph("acme/app", false).await.unwrap();
    assert!(plain.edges.iter().all(|e| e.kind == EdgeKind::Flow));
    let augmented = h.pipeline.graph("acme/app", true).await.unwrap();
    assert!(augmented.edges.len() >= plain.edges.len());
    assert!(augmented
        .edges
        .iter()
        .any(|e| e.kind == EdgeKind::Related && (e.from == "Routes" || e.to == "Routes")));
}
