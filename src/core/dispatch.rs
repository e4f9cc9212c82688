//! Turning proposals into work items and executing them through the gate.

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::collaborators::JobRunner;
use crate::core::gate::ConcurrencyGate;
use crate::model::{JobStatus, Proposal, WorkItem};
use crate::store::{ContentRepository, JobRepository, Store};
use crate::types::JobId;

/// Prefix written in front of a job error for the `n`-th retry.
pub fn retry_marker(attempt: u32) -> String {
    format!("[RETRY #{attempt}]")
}

/// Records step and progress on a running job.
pub struct ProgressReporter {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    job_id: JobId,
}

impl ProgressReporter {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Best effort: a failed progress write is logged and otherwise ignored.
    pub async fn report(&self, step: &str, percent: u8) {
        if let Err(e) = self.try_report(step, percent).await {
            warn!(job_id = %self.job_id, "Failed to record progress: {:#}", e);
        }
    }

    async fn try_report(&self, step: &str, percent: u8) -> Result<()> {
        let Some(mut job) = self.store.get_job(&self.job_id).await? else {
            return Ok(());
        };
        if job.status != JobStatus::Generating {
            return Ok(());
        }
        job.current_step = Some(step.to_string());
        job.progress_percent = percent.min(100);
        job.updated_at = self.clock.now();
        self.store.save_job(&job).await
    }
}

/// The single dispatch path for new and retried work items.
#[derive(Clone)]
pub struct JobDispatcher {
    store: Arc<dyn Store>,
    runner: Arc<dyn JobRunner>,
    gate: Arc<ConcurrencyGate>,
    clock: Arc<dyn Clock>,
}

impl JobDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        runner: Arc<dyn JobRunner>,
        gate: Arc<ConcurrencyGate>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            runner,
            gate,
            clock,
        }
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    /// Create and launch the work item for `proposal`.
    ///
    /// Dispatching the same proposal again returns the existing item without
    /// launching anything.
    pub async fn dispatch(&self, proposal: &Proposal) -> Result<WorkItem> {
        if let Some(existing) = self.store.find_job_by_proposal(&proposal.proposal_id).await? {
            debug!(
                proposal_id = %proposal.proposal_id,
                job_id = %existing.job_id,
                "Proposal already dispatched"
            );
            return Ok(existing);
        }

        let job = WorkItem::for_proposal(proposal, self.clock.now());
        self.store.save_job(&job).await?;
        info!(
            job_id = %job.job_id,
            brand_id = %job.brand_id,
            content_type = %job.content_type,
            "Dispatched work item"
        );
        self.launch(job.job_id.clone());
        Ok(job)
    }

    /// Queue an already persisted pending item on the gate.
    pub fn launch(&self, job_id: JobId) -> JoinHandle<()> {
        let worker = self.clone();
        let label = job_id.to_string();
        self.gate.launch(label, async move {
            worker.execute(job_id).await;
        })
    }

    async fn execute(&self, job_id: JobId) {
        if let Err(e) = self.try_execute(&job_id).await {
            error!(job_id = %job_id, "Work item execution failed to record: {:#}", e);
        }
    }

    async fn try_execute(&self, job_id: &JobId) -> Result<()> {
        let Some(mut job) = self.store.get_job(job_id).await? else {
            warn!(job_id = %job_id, "Launched work item no longer exists");
            return Ok(());
        };
        if job.status != JobStatus::Pending {
            debug!(job_id = %job_id, status = %job.status, "Skipping launch of non-pending item");
            return Ok(());
        }

        job.status = JobStatus::Generating;
        job.updated_at = self.clock.now();
        self.store.save_job(&job).await?;

        let proposal = match &job.proposal_id {
            Some(id) => self.store.get_proposal(id).await?,
            None => None,
        };
        let reporter = ProgressReporter {
            store: self.store.clone(),
            clock: self.clock.clone(),
            job_id: job_id.clone(),
        };
        let outcome = self.runner.run(&job, proposal.as_ref(), &reporter).await;

        let mut latest = self.store.get_job(job_id).await?.unwrap_or(job);
        if latest.status != JobStatus::Generating {
            // The timeout sweep took the item over while it was running.
            warn!(
                job_id = %job_id,
                status = %latest.status,
                "Work item changed state while running"
            );
            return Ok(());
        }

        let now = self.clock.now();
        latest.updated_at = now;
        match outcome {
            Ok(()) => {
                latest.status = JobStatus::Completed;
                latest.progress_percent = 100;
                latest.completed_at = Some(now);
                info!(job_id = %job_id, "Work item completed");
            }
            Err(e) => {
                let message = format!("{e:#}");
                latest.status = JobStatus::Failed;
                latest.error = Some(if latest.retry_count > 0 {
                    format!("{} {}", retry_marker(latest.retry_count), message)
                } else {
                    message
                });
                warn!(job_id = %job_id, "Work item failed: {:#}", e);
            }
        }
        self.store.save_job(&latest).await
    }
}
