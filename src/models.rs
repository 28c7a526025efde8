//! Core data models.
//!
//! These types are the artifacts the pipeline produces and persists:
//! repositories and their analysis status, analysis results with their
//! subsystem partition, lazily generated descriptions, and chat sessions.
//! They serialize with camelCase field names, which is the shape the
//! HTTP API hands to downstream renderers.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::classify::Framework;

/// Analysis lifecycle of a repository.
///
/// ```text
/// pending ──▶ analyzing ──▶ completed
///                 │  ▲          │
///                 ▼  │          │
///               failed ◀────────┘ (via analyzing)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Analyzing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzing => "analyzing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `analyzing -> analyzing` is not a transition; taking over an
    /// abandoned run is handled separately by the freshness tracker.
    pub fn can_transition_to(&self, next: AnalysisStatus) -> bool {
        use AnalysisStatus::*;
        matches!(
            (self, next),
            (Pending, Analyzing)
                | (Failed, Analyzing)
                | (Completed, Analyzing)
                | (Analyzing, Completed)
                | (Analyzing, Failed)
        )
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "analyzing" => Ok(Self::Analyzing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => anyhow::bail!("unknown analysis status: {}", other),
        }
    }
}

/// A tracked repository. Mutated only through status transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Lowercased `owner/name`.
    pub id: String,
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub url: String,
    pub stars: u64,
    pub forks: u64,
    pub primary_language: Option<String>,
    pub default_branch: Option<String>,
    pub upstream_pushed_at: Option<DateTime<Utc>>,
    pub analysis_status: AnalysisStatus,
    pub analysis_started_at: Option<DateTime<Utc>>,
    pub last_analyzed: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Incremented on every status write; the compare-and-swap token.
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

/// Repository metadata as reported by the hosting provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoMetadata {
    pub full_name: String,
    pub url: String,
    pub stars: u64,
    pub forks: u64,
    pub default_branch: String,
    pub pushed_at: DateTime<Utc>,
    pub primary_language: Option<String>,
}

/// One blob entry of the upstream file tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub path: String,
    pub size: u64,
    /// Lowercased extension without the dot, if any.
    pub extension: Option<String>,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        let extension = extension_of(&path);
        Self {
            path,
            size,
            extension,
        }
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// A named, disjoint group of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subsystem {
    pub name: String,
    /// Paths from the parent analysis's file tree, in tree order.
    pub files: Vec<String>,
    /// Short fallback text assigned at partition time.
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubsystemDescription {
    pub name: String,
    pub purpose: String,
    pub entry_points: Vec<String>,
    pub dependencies: Vec<String>,
    pub key_files: Vec<String>,
    pub technologies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileExplanation {
    pub explanation: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Snapshot id; lazy enrichment writes target exactly this snapshot.
    pub id: String,
    pub framework: Framework,
    pub file_tree: Vec<FileRecord>,
    /// Language name to total byte size.
    pub languages: BTreeMap<String, u64>,
    pub subsystems: Vec<Subsystem>,
    /// Sparse; filled lazily after the analysis completes.
    pub subsystem_descriptions: Vec<SubsystemDescription>,
    /// Keyed by [`file_key`].
    pub file_explanations: BTreeMap<String, FileExplanation>,
    pub main_files: Vec<String>,
    pub config_files: Vec<String>,
    pub documentation_files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn subsystem(&self, name: &str) -> Option<&Subsystem> {
        self.subsystems.iter().find(|s| s.name == name)
    }

    pub fn description_for(&self, name: &str) -> Option<&SubsystemDescription> {
        self.subsystem_descriptions.iter().find(|d| d.name == name)
    }

    pub fn explanation_for(&self, path: &str) -> Option<&FileExplanation> {
        self.file_explanations.get(&file_key(path))
    }

    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.file_tree.iter().find(|f| f.path == path)
    }

    /// Checks the structural invariants: unique subsystem names, every
    /// subsystem file present in the tree, and every tree file in exactly
    /// one subsystem.
    pub fn validate(&self) -> anyhow::Result<()> {
        let tree: HashSet<&str> = self.file_tree.iter().map(|f| f.path.as_str()).collect();
        let mut names = HashSet::new();
        let mut assigned = HashSet::new();

        for subsystem in &self.subsystems {
            if !names.insert(subsystem.name.as_str()) {
                anyhow::bail!("duplicate subsystem name: {}", subsystem.name);
            }
            for file in &subsystem.files {
                if !tree.contains(file.as_str()) {
                    anyhow::bail!(
                        "subsystem {} references unknown file {}",
                        subsystem.name,
                        file
                    );
                }
                if !assigned.insert(file.as_str()) {
                    anyhow::bail!("file {} assigned to more than one subsystem", file);
                }
            }
        }

        if assigned.len() != tree.len() {
            anyhow::bail!(
                "{} of {} files are not assigned to a subsystem",
                tree.len() - assigned.len(),
                tree.len()
            );
        }
        Ok(())
    }
}

/// A generated text blob with a time-to-live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedDescription {
    pub key: String,
    pub content: String,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedDescription {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl FromStr for ChatRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => anyhow::bail!("unknown chat role: {}", other),
        }
    }
}

/// A chat session. Messages live in their own append-only log and are
/// read with [`Store::load_messages`](crate::store::Store::load_messages).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub repo_id: String,
    /// Client context the session is "current" for (browser, CLI user, ...).
    pub client: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Reversible, separator-free key for a file path.
///
/// URL-safe base64 never produces `/` or `.`, so keys are safe as map keys
/// and nested document paths, and distinct paths never collide.
pub fn file_key(path: &str) -> String {
    URL_SAFE_NO_PAD.encode(path.as_bytes())
}

/// Inverse of [`file_key`].
pub fn path_from_file_key(key: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(key).ok()?;
    String::from_utf8(bytes).ok()
}
