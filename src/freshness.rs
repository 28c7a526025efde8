//! Freshness tracking and the analysis status state machine.
//!
//! Every status write goes through [`FreshnessTracker::transition_from`],
//! which checks the transition against
//! [`AnalysisStatus::can_transition_to`] and then applies it with a
//! version compare-and-swap on the store. Two callers racing to start an
//! analysis of the same repository both observe the same version; only
//! one swap succeeds and the other gets [`StatusError::AlreadyAnalyzing`].
//!
//! # Leases
//!
//! An `analyzing` record carries `analysis_started_at`. A run that has not
//! finished within `analysis.lease_secs` is treated as abandoned (a crashed
//! process, a killed CLI) and a new caller may take it over. The takeover
//! is itself a compare-and-swap, so at most one caller wins it.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};

use crate::error::{AnalysisError, StatusError};
use crate::events::{EventBus, PipelineEvent};
use crate::models::{AnalysisResult, AnalysisStatus, RepoMetadata, Repository};
use crate::store::{StatusUpdate, Store};

/// Attempts made by [`FreshnessTracker::begin_analysis`] when the record
/// keeps moving under it without being claimed by another run.
const BEGIN_ATTEMPTS: usize = 3;

pub struct FreshnessTracker {
    store: Arc<dyn Store>,
    events: EventBus,
    lease: Duration,
}

impl FreshnessTracker {
    pub fn new(store: Arc<dyn Store>, events: EventBus, lease_secs: i64) -> Self {
        Self {
            store,
            events,
            lease: Duration::seconds(lease_secs),
        }
    }

    /// `true` iff a completed analysis exists and its stored upstream
    /// timestamp is not older than `live_pushed_at`. Read-only.
    pub async fn check_freshness(
        &self,
        repo_id: &str,
        live_pushed_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let Some(repo) = self.store.get_repository(repo_id).await? else {
            return Ok(false);
        };
        if repo.analysis_status != AnalysisStatus::Completed {
            return Ok(false);
        }
        match repo.upstream_pushed_at {
            Some(stored) if stored >= live_pushed_at => {}
            _ => return Ok(false),
        }
        Ok(self.store.load_analysis(repo_id).await?.is_some())
    }

    /// Whether an `analyzing` record's lease has run out at `now`.
    pub fn lease_expired(&self, repo: &Repository, now: DateTime<Utc>) -> bool {
        if repo.analysis_status != AnalysisStatus::Analyzing {
            return false;
        }
        match repo.analysis_started_at {
            Some(started) => now - started >= self.lease,
            None => true,
        }
    }

    /// Reads the current record and applies `update` to it.
    pub async fn transition_status(
        &self,
        repo_id: &str,
        update: StatusUpdate,
    ) -> Result<Repository, StatusError> {
        let current = self
            .store
            .get_repository(repo_id)
            .await?
            .ok_or_else(|| StatusError::UnknownRepository(repo_id.to_string()))?;
        self.transition_from(&current, update).await
    }

    /// Applies `update` if the stored record still has `observed.version`.
    pub async fn transition_from(
        &self,
        observed: &Repository,
        update: StatusUpdate,
    ) -> Result<Repository, StatusError> {
        let from = observed.analysis_status;
        let to = update.target();

        match &update {
            StatusUpdate::Analyzing { started_at } if from == AnalysisStatus::Analyzing => {
                if !self.lease_expired(observed, *started_at) {
                    return Err(StatusError::AlreadyAnalyzing(observed.id.clone()));
                }
                tracing::warn!(
                    repo = %observed.id,
                    started_at = ?observed.analysis_started_at,
                    "taking over abandoned analysis"
                );
            }
            _ if !from.can_transition_to(to) => {
                return Err(StatusError::InvalidTransition { from, to });
            }
            _ => {}
        }

        if let StatusUpdate::Completed { result, .. } = &update {
            result
                .validate()
                .context("refusing to publish an inconsistent analysis")?;
        }

        let swapped = self
            .store
            .compare_and_set_status(&observed.id, observed.version, &update)
            .await?;

        let Some(updated) = swapped else {
            let latest = self
                .store
                .get_repository(&observed.id)
                .await?
                .ok_or_else(|| StatusError::UnknownRepository(observed.id.clone()))?;
            tracing::debug!(
                repo = %observed.id,
                expected = observed.version,
                actual = latest.version,
                status = %latest.analysis_status,
                "status compare-and-swap lost"
            );
            if to == AnalysisStatus::Analyzing && latest.analysis_status == AnalysisStatus::Analyzing
            {
                return Err(StatusError::AlreadyAnalyzing(observed.id.clone()));
            }
            return Err(StatusError::Conflict(observed.id.clone()));
        };

        tracing::info!(repo = %updated.id, from = %from, to = %to, "analysis status changed");
        self.events.publish(PipelineEvent::StatusChanged {
            repo_id: updated.id.clone(),
            status: updated.analysis_status,
            error: updated.last_error.clone(),
        });
        Ok(updated)
    }

    /// Claims the single-flight lease for `repo_id`. The returned record
    /// is the lease holder's view and must be passed to
    /// [`complete`](Self::complete) or [`fail`](Self::fail).
    pub async fn begin_analysis(
        &self,
        repo_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Repository, StatusError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .transition_status(repo_id, StatusUpdate::Analyzing { started_at: now })
                .await
            {
                Err(StatusError::Conflict(_)) if attempt < BEGIN_ATTEMPTS => continue,
                other => return other,
            }
        }
    }

    /// Publishes `result` and the metadata it was built from.
    pub async fn complete(
        &self,
        lease: &Repository,
        metadata: RepoMetadata,
        result: AnalysisResult,
        now: DateTime<Utc>,
    ) -> Result<Repository, StatusError> {
        self.transition_from(
            lease,
            StatusUpdate::Completed {
                metadata,
                result: Box::new(result),
                analyzed_at: now,
            },
        )
        .await
    }

    /// Records a terminal failure with its categorized message.
    pub async fn fail(
        &self,
        lease: &Repository,
        error: &AnalysisError,
    ) -> Result<Repository, StatusError> {
        self.transition_from(
            lease,
            StatusUpdate::Failed {
                error: error.categorized_message(),
            },
        )
        .await
    }
}
