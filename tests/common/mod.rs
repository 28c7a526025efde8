#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use repo_atlas::config::Config;
use repo_atlas::error::AnalysisError;
use repo_atlas::generation::TextGenerator;
use repo_atlas::github::HostingApi;
use repo_atlas::models::{RepoMetadata, TreeEntry};
use repo_atlas::pipeline::Pipeline;
use repo_atlas::repo_ref::RepoRef;
use repo_atlas::store::memory::InMemoryStore;
use repo_atlas::store::Store;

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// A scripted hosting API serving one repository per `owner/name` id.
pub struct FakeHosting {
    repos: Mutex<HashMap<String, (RepoMetadata, Vec<TreeEntry>)>>,
    failure: Mutex<Option<AnalysisError>>,
    contents: Mutex<HashMap<String, String>>,
    /// When set, `file_tree` waits for a permit before answering.
    gate: Mutex<Option<Arc<Semaphore>>>,
    pub metadata_calls: AtomicUsize,
    pub tree_calls: AtomicUsize,
}

impl FakeHosting {
    pub fn new() -> Self {
        Self {
            repos: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            contents: Mutex::new(HashMap::new()),
            gate: Mutex::new(None),
            metadata_calls: AtomicUsize::new(0),
            tree_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_repo(self, full_name: &str, pushed_at: DateTime<Utc>, paths: &[&str]) -> Self {
        self.set_repo(full_name, pushed_at, paths);
        self
    }

    pub fn set_repo(&self, full_name: &str, pushed_at: DateTime<Utc>, paths: &[&str]) {
        let metadata = RepoMetadata {
            full_name: full_name.to_string(),
            url: format!("https://github.com/{}", full_name),
            stars: 42,
            forks: 7,
            default_branch: "main".to_string(),
            pushed_at,
            primary_language: Some("TypeScript".to_string()),
        };
        let tree = paths
            .iter()
            .map(|p| TreeEntry {
                path: p.to_string(),
                size: 100,
            })
            .collect();
        self.repos
            .lock()
            .unwrap()
            .insert(full_name.to_ascii_lowercase(), (metadata, tree));
    }

    pub fn fail_with(&self, err: Option<AnalysisError>) {
        *self.failure.lock().unwrap() = err;
    }

    pub fn set_content(&self, path: &str, text: &str) {
        self.contents
            .lock()
            .unwrap()
            .insert(path.to_string(), text.to_string());
    }

    pub fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn lookup(&self, repo: &RepoRef) -> Result<(RepoMetadata, Vec<TreeEntry>), AnalysisError> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.repos
            .lock()
            .unwrap()
            .get(&repo.id())
            .cloned()
            .ok_or_else(|| AnalysisError::NotFound(repo.full_name()))
    }
}

#[async_trait]
impl HostingApi for FakeHosting {
    async fn repository(&self, repo: &RepoRef) -> Result<RepoMetadata, AnalysisError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.lookup(repo)?.0)
    }

    async fn file_tree(
        &self,
        repo: &RepoRef,
        _branch: &str,
    ) -> Result<Vec<TreeEntry>, AnalysisError> {
        self.tree_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        Ok(self.lookup(repo)?.1)
    }

    async fn file_content(
        &self,
        _repo: &RepoRef,
        _branch: &str,
        path: &str,
    ) -> Result<String, AnalysisError> {
        self.contents
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| AnalysisError::NotFound(path.to_string()))
    }
}

/// Counts calls and answers with a fixed reply, or fails.
pub struct FakeGenerator {
    reply: Mutex<Result<String, AnalysisError>>,
    pub prompts: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
}

impl FakeGenerator {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Mutex::new(Ok(text.to_string())),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Mutex::new(Err(AnalysisError::Generation("service unavailable".into()))),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_reply(&self, reply: Result<String, AnalysisError>) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    fn model_name(&self) -> &str {
        "fake"
    }

    async fn generate(&self, prompt: &str) -> Result<String, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.lock().unwrap().clone()
    }
}

pub const SVELTE_TREE: &[&str] = &[
    "svelte.config.js",
    "package.json",
    "src/routes/a.x",
    "src/components/b.x",
    "src/services/c.x",
];

pub const DESCRIPTION_JSON: &str = r#"{"purpose": "Defines the pages.", "entryPoints": ["src/routes/a.x"], "dependencies": ["svelte"], "keyFiles": ["src/routes/a.x"], "technologies": ["Svelte"]}"#;

pub struct Harness {
    pub pipeline: Pipeline,
    pub store: Arc<InMemoryStore>,
    pub hosting: Arc<FakeHosting>,
    pub generator: Arc<FakeGenerator>,
}

pub fn harness(hosting: FakeHosting, generator: FakeGenerator) -> Harness {
    harness_with(Config::with_db_path("unused.sqlite"), hosting, generator)
}

pub fn harness_with(config: Config, hosting: FakeHosting, generator: FakeGenerator) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let hosting = Arc::new(hosting);
    let generator = Arc::new(generator);
    let shared: Arc<dyn Store> = store.clone();
    let pipeline = Pipeline::new(&config, shared, hosting.clone(), generator.clone());
    Harness {
        pipeline,
        store,
        hosting,
        generator,
    }
}
