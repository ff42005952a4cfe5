//! Per-request job record and lifecycle
//!
//! A [`Job`] follows one upload through the service. Its status only moves
//! along the allowed edges:
//!
//! ```text
//! Pending ──► Processing ──► Done
//!    │             └───────► Failed
//!    ├──► Done    (cache hit, passthrough)
//!    └──► Failed  (rejected before processing)
//! ```
//!
//! Alongside the status the job keeps the request stages it passed through,
//! which is what request logs and tests inspect.

use crate::error::{Result, ServiceError};
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    /// Whether `self -> next` is an allowed transition
    #[must_use]
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing | Self::Done | Self::Failed)
                | (Self::Processing, Self::Done | Self::Failed)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Request-handling stages, in the order a request may reach them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStage {
    Received,
    Fingerprinted,
    CacheHit,
    CacheMiss,
    Bypassed,
    SlotAcquired,
    Processing,
    Succeeded,
    Failed,
}

impl std::fmt::Display for RequestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Fingerprinted => "fingerprinted",
            Self::CacheHit => "cache_hit",
            Self::CacheMiss => "cache_miss",
            Self::Bypassed => "bypassed",
            Self::SlotAcquired => "slot_acquired",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One upload's journey through the service
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub fingerprint: Fingerprint,
    pub input_size: usize,
    pub status: JobStatus,
    /// Cache key of the produced output
    pub result_key: Option<Fingerprint>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cache_hit: bool,
    pub stages: Vec<RequestStage>,
}

impl Job {
    /// New pending job for an already fingerprinted upload
    #[must_use]
    pub fn new(fingerprint: Fingerprint, input_size: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint,
            input_size,
            status: JobStatus::Pending,
            result_key: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cache_hit: false,
            stages: vec![RequestStage::Received, RequestStage::Fingerprinted],
        }
    }

    /// Record that the request reached `stage`
    pub fn enter(&mut self, stage: RequestStage) {
        tracing::debug!(
            job_id = %self.id,
            fingerprint = self.fingerprint.short(),
            %stage,
            "request stage"
        );
        self.stages.push(stage);
    }

    #[must_use]
    pub fn reached(&self, stage: RequestStage) -> bool {
        self.stages.contains(&stage)
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ServiceError::internal(format!(
                "Invalid job transition {:?} -> {:?} for job {}",
                self.status, next, self.id
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Pending -> Processing
    ///
    /// # Errors
    /// - `Internal` if the job is not pending
    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::Processing)?;
        self.started_at = Some(Utc::now());
        self.enter(RequestStage::Processing);
        Ok(())
    }

    /// Pending -> Done, served from the result cache
    ///
    /// # Errors
    /// - `Internal` if the job is not pending
    pub fn complete_from_cache(&mut self) -> Result<()> {
        self.transition(JobStatus::Done)?;
        self.cache_hit = true;
        self.result_key = Some(self.fingerprint.clone());
        self.completed_at = Some(Utc::now());
        self.enter(RequestStage::CacheHit);
        Ok(())
    }

    /// Pending -> Done without touching the engine or the cache
    ///
    /// # Errors
    /// - `Internal` if the job is not pending
    pub fn complete_bypassed(&mut self) -> Result<()> {
        self.transition(JobStatus::Done)?;
        self.completed_at = Some(Utc::now());
        self.enter(RequestStage::Bypassed);
        Ok(())
    }

    /// Processing -> Done
    ///
    /// # Errors
    /// - `Internal` if the job is not processing
    pub fn succeed(&mut self) -> Result<()> {
        if self.status != JobStatus::Processing {
            return Err(ServiceError::internal(format!(
                "Job {} cannot succeed from {:?}",
                self.id, self.status
            )));
        }
        self.transition(JobStatus::Done)?;
        self.result_key = Some(self.fingerprint.clone());
        self.completed_at = Some(Utc::now());
        self.enter(RequestStage::Succeeded);
        Ok(())
    }

    /// Pending | Processing -> Failed
    ///
    /// # Errors
    /// - `Internal` if the job already finished
    pub fn fail(&mut self, error: &ServiceError) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.to_string());
        self.completed_at = Some(Utc::now());
        self.enter(RequestStage::Failed);
        Ok(())
    }

    /// Wall time from creation to completion, if completed
    #[must_use]
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|done| done - self.created_at)
    }
}
