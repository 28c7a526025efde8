//! Error taxonomy for the analysis pipeline.
//!
//! [`AnalysisError`] classifies everything that can go wrong while fetching
//! and analyzing a repository. [`StatusError`] covers the analysis status
//! state machine owned by [`FreshnessTracker`](crate::freshness::FreshnessTracker),
//! and [`QueryError`] the read side (descriptions, graphs, chat).

use chrono::{DateTime, Utc};

use crate::models::AnalysisStatus;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    #[error("repository not found or inaccessible: {0}")]
    NotFound(String),

    #[error("hosting API rate limit exceeded{}", reset_suffix(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    #[error("invalid repository reference: {0}")]
    InvalidInput(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("generation failed: {0}")]
    Generation(String),
}

fn reset_suffix(reset_at: &Option<DateTime<Utc>>) -> String {
    match reset_at {
        Some(ts) => format!(" (resets at {})", ts.format("%Y-%m-%dT%H:%M:%SZ")),
        None => String::new(),
    }
}

impl AnalysisError {
    /// Stable snake_case code used in stored messages and HTTP responses.
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidInput(_) => "invalid_input",
            Self::Network(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::Persistence(_) => "persistence_error",
            Self::Generation(_) => "generation_error",
        }
    }

    /// Transient failures that a GET request may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }

    /// Failures that end the current analysis attempt without retrying.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::RateLimited { .. } | Self::InvalidInput(_)
        )
    }

    /// `[category] message`, the form stored in `Repository::last_error`.
    pub fn categorized_message(&self) -> String {
        format!("[{}] {}", self.category(), self)
    }
}

impl From<anyhow::Error> for AnalysisError {
    fn from(err: anyhow::Error) -> Self {
        Self::Persistence(format!("{:#}", err))
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("unknown repository: {0}")]
    UnknownRepository(String),

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: AnalysisStatus,
        to: AnalysisStatus,
    },

    #[error("repository {0} is already being analyzed")]
    AlreadyAnalyzing(String),

    #[error("status of {0} changed concurrently")]
    Conflict(String),

    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

/// Failures of read-side requests against stored analyses.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("{0} has no completed analysis")]
    NotAnalyzed(String),

    #[error("unknown subsystem: {0}")]
    UnknownSubsystem(String),

    #[error("file not in analysis: {0}")]
    UnknownFile(String),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl QueryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAnalyzed(_) => "not_analyzed",
            Self::UnknownSubsystem(_) => "unknown_subsystem",
            Self::UnknownFile(_) => "unknown_file",
            Self::Analysis(err) => err.category(),
            Self::Persistence(_) => "persistence_error",
        }
    }
}
