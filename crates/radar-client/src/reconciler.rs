//! JobReconciler — keeps the local view of the remote scan job in step with
//! the server.
//!
//! Every `poll()` fetches the job status.  Results are pulled only when the
//! job has something new to offer:
//!
//! ```text
//!  result_count > last fetched count     partial results streamed mid-scan
//!  phase == completed, not yet fetched   final results, fetched once
//! ```
//!
//! A poll that sees neither never touches `GET results`.

use std::sync::Arc;

use radar_proto::protocol::{ScanParams, ScanPhase, ScanStatus, Track};
use tracing::{debug, info, warn};

use crate::error::{RadarError, Result};
use crate::transport::JobApi;

/// What one poll observed.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub status: ScanStatus,
    /// Fresh results, present only when this poll fetched them.
    pub results: Option<Vec<Track>>,
    /// `(from, to)` when the phase changed on this poll.
    pub transition: Option<(ScanPhase, ScanPhase)>,
}

pub struct JobReconciler {
    api: Arc<dyn JobApi>,
    last_status: ScanStatus,
    /// `result_count` at the last successful results fetch.
    fetched_count: u64,
    /// Set once the results of the current completion have been pulled.
    completion_fetched: bool,
    /// A start was acknowledged but no poll has seen the job yet.
    start_pending: bool,
}

impl JobReconciler {
    pub fn new(api: Arc<dyn JobApi>) -> Self {
        Self {
            api,
            last_status: ScanStatus::default(),
            fetched_count: 0,
            completion_fetched: false,
            start_pending: false,
        }
    }

    pub fn status(&self) -> &ScanStatus {
        &self.last_status
    }

    pub fn phase(&self) -> ScanPhase {
        self.last_status.phase
    }

    pub async fn start(&mut self, params: &ScanParams) -> Result<()> {
        if self.last_status.running || self.start_pending {
            return Err(RadarError::AlreadyRunning);
        }
        params
            .filter_settings()
            .validate()
            .map_err(|issue| RadarError::Validation(issue.to_string()))?;

        self.api.start(params).await?;

        info!(
            "Scan started: {} .. {} (followed={}, liked={})",
            params.start_date, params.end_date, params.include_followed, params.include_liked_songs
        );
        self.fetched_count = 0;
        self.completion_fetched = false;
        self.start_pending = true;
        // The server reports "initializing" until the job is underway; a job
        // that completes before the next poll still shows up as a transition.
        self.last_status = ScanStatus {
            running: true,
            phase: ScanPhase::FetchingArtists,
            ..Default::default()
        };
        Ok(())
    }

    /// Request cancellation.  The job keeps running until a later poll
    /// observes a non-running phase.
    pub async fn stop(&mut self) -> Result<()> {
        let phase = self.last_status.phase;
        if !phase.is_stoppable() {
            return Err(RadarError::NotStoppable(phase));
        }
        self.api.stop().await?;
        info!("Stop requested while {}", phase);
        Ok(())
    }

    pub async fn poll(&mut self) -> Result<PollOutcome> {
        let status = self.api.status().await?;
        self.start_pending = false;

        let previous = self.last_status.phase;
        let transition = (previous != status.phase).then_some((previous, status.phase));
        if let Some((from, to)) = transition {
            info!("Scan phase {} -> {}", from, to);
            if to == ScanPhase::Error {
                warn!(
                    "Scan failed: {}",
                    status.error.as_deref().unwrap_or("no message")
                );
            }
        }

        if status.phase != ScanPhase::Completed {
            self.completion_fetched = false;
        }
        if status.result_count < self.fetched_count {
            // Counter went backwards: a new job replaced the one we were following.
            debug!(
                "result_count reset {} -> {}",
                self.fetched_count, status.result_count
            );
            self.fetched_count = status.result_count;
        }

        let completed_unfetched =
            status.phase == ScanPhase::Completed && !self.completion_fetched;
        let advanced = status.result_count > self.fetched_count;
        self.last_status = status.clone();

        let results = if completed_unfetched || advanced {
            let tracks = self.api.results().await?;
            debug!(
                "Fetched {} results (count {} -> {})",
                tracks.len(),
                self.fetched_count,
                status.result_count
            );
            self.fetched_count = status.result_count;
            if status.phase == ScanPhase::Completed {
                self.completion_fetched = true;
            }
            Some(tracks)
        } else {
            None
        };

        Ok(PollOutcome {
            status,
            results,
            transition,
        })
    }
}
