//! TOML configuration.
//!
//! Every section has defaults, so a minimal file only needs `[db] path`.
//! See [`load_config`] for the validation rules applied after parsing.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Name of the environment variable holding an optional API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_github_timeout")]
    pub timeout_secs: u64,
    /// Retries for idempotent GET requests (network errors, timeouts, 5xx).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token_env: default_token_env(),
            timeout_secs: default_github_timeout(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_github_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_user_agent() -> String {
    format!("repo-atlas/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL override (e.g. a proxy, or a non-default Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    /// Maximum number of generation requests in flight for bulk enrichment.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_prompt_files")]
    pub max_prompt_files: usize,
    #[serde(default = "default_max_file_chars")]
    pub max_file_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_generation_timeout(),
            concurrency: default_concurrency(),
            max_prompt_files: default_max_prompt_files(),
            max_file_chars: default_max_file_chars(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_generation_timeout() -> u64 {
    60
}
fn default_concurrency() -> usize {
    4
}
fn default_max_prompt_files() -> usize {
    40
}
fn default_max_file_chars() -> usize {
    6000
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> i64 {
    7 * 24 * 60 * 60
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// Age after which an `analyzing` status is treated as abandoned.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: i64,
    #[serde(default = "default_related_limit")]
    pub related_limit: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            lease_secs: default_lease_secs(),
            related_limit: default_related_limit(),
        }
    }
}

fn default_lease_secs() -> i64 {
    900
}
fn default_related_limit() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
        }
    }
}

fn default_history_window() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// A configuration with every default and the given database path.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            github: GithubConfig::default(),
            generation: GenerationConfig::default(),
            cache: CacheConfig::default(),
            analysis: AnalysisConfig::default(),
            chat: ChatConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.cache.ttl_secs <= 0 {
        anyhow::bail!("cache.ttl_secs must be > 0");
    }
    if config.analysis.lease_secs <= 0 {
        anyhow::bail!("analysis.lease_secs must be > 0");
    }
    if config.analysis.related_limit == 0 {
        anyhow::bail!("analysis.related_limit must be >= 1");
    }
    if config.generation.concurrency == 0 {
        anyhow::bail!("generation.concurrency must be >= 1");
    }
    if config.chat.history_window == 0 {
        anyhow::bail!("chat.history_window must be >= 1");
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.generation.is_enabled() && config.generation.model.is_none() {
        anyhow::bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }

    Ok(())
}
