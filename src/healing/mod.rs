//! Self-healing for stuck and failed work items.
//!
//! Each pass sweeps in-flight items past the timeout into `failed`, then
//! diagnoses recent failures and either retries them through the dispatcher
//! or escalates them to operators as notifications.

pub mod diagnosis;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::{DnaConfig, HealingConfig};
use crate::core::dispatch::{JobDispatcher, retry_marker};
use crate::model::{AgentDna, JobStatus, WorkItem};
use crate::store::{AgentRepository, ContentRepository, JobRepository, Store};
use crate::types::{AgentId, BrandId, JobId};

pub use diagnosis::{Diagnosis, FailureCategory, TIMEOUT_MARKER, diagnose};

/// An unretryable or manual failure surfaced to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealingNotification {
    pub job_id: JobId,
    pub brand_id: BrandId,
    pub title: String,
    pub category: FailureCategory,
    pub reason: String,
    pub error_excerpt: String,
    pub suggested_action: String,
    /// False for jobs the orchestrator did not issue.
    pub managed: bool,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PopulationReport {
    pub active_brands: usize,
    pub active_agents: usize,
    pub provisioned: Vec<AgentId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealingReport {
    pub timed_out: Vec<JobId>,
    pub scanned: usize,
    pub retried: Vec<JobId>,
    /// Newest first, in the order they belong at the front of the queue.
    pub notifications: Vec<HealingNotification>,
    pub population: PopulationReport,
}

impl HealingReport {
    pub fn healed(&self) -> usize {
        self.retried.len()
    }

    pub fn failures(&self) -> usize {
        self.notifications.len()
    }
}

/// Drop a leading `[RETRY #n]` marker so retries do not stack markers.
fn strip_retry_marker(error: &str) -> &str {
    let trimmed = error.trim_start();
    if let Some(rest) = trimmed.strip_prefix("[RETRY #")
        && let Some(end) = rest.find(']')
        && rest[..end].chars().all(|c| c.is_ascii_digit())
    {
        return rest[end + 1..].trim_start();
    }
    trimmed
}

pub struct HealingEngine {
    store: Arc<dyn Store>,
    dispatcher: JobDispatcher,
    clock: Arc<dyn Clock>,
    config: HealingConfig,
    dna: DnaConfig,
}

impl HealingEngine {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: JobDispatcher,
        clock: Arc<dyn Clock>,
        config: HealingConfig,
        dna: DnaConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            config,
            dna,
        }
    }

    /// One full healing pass. Each stage logs its own failures and the pass
    /// continues with whatever the earlier stages produced.
    pub async fn run(&self) -> HealingReport {
        let mut report = HealingReport::default();

        match self.sweep_timeouts().await {
            Ok(timed_out) => report.timed_out = timed_out,
            Err(e) => error!("Timeout sweep failed: {:#}", e),
        }
        if let Err(e) = self.heal_failures(&mut report).await {
            error!("Failure scan failed: {:#}", e);
        }
        match self.population_guard().await {
            Ok(population) => report.population = population,
            Err(e) => error!("Population guard failed: {:#}", e),
        }

        if !report.timed_out.is_empty() || report.scanned > 0 {
            info!(
                timed_out = report.timed_out.len(),
                scanned = report.scanned,
                retried = report.retried.len(),
                escalated = report.notifications.len(),
                "Healing pass finished"
            );
        }
        report
    }

    /// Force in-flight items older than the timeout into `failed`.
    pub async fn sweep_timeouts(&self) -> Result<Vec<JobId>> {
        let now = self.clock.now();
        let timeout = Duration::minutes(self.config.timeout_mins);
        let in_flight = self
            .store
            .jobs_with_status(&[JobStatus::Pending, JobStatus::Generating])
            .await?;

        let mut timed_out = Vec::new();
        for mut job in in_flight {
            let age = now - job.dispatched_at;
            if age <= timeout {
                continue;
            }
            let message = format!(
                "{TIMEOUT_MARKER} no completion after {} min while {} (last step: {}, progress {}%)",
                age.num_minutes(),
                job.status,
                job.current_step.as_deref().unwrap_or("none"),
                job.progress_percent
            );
            job.error = Some(if job.retry_count > 0 {
                format!("{} {}", retry_marker(job.retry_count), message)
            } else {
                message
            });
            job.status = JobStatus::Failed;
            job.updated_at = now;
            self.store.save_job(&job).await?;
            warn!(job_id = %job.job_id, age_mins = age.num_minutes(), "Work item timed out");
            timed_out.push(job.job_id);
        }
        Ok(timed_out)
    }

    async fn heal_failures(&self, report: &mut HealingReport) -> Result<()> {
        let now = self.clock.now();
        let since = now - Duration::hours(self.config.lookback_hours);
        let failed: Vec<WorkItem> = self
            .store
            .jobs_with_status(&[JobStatus::Failed])
            .await?
            .into_iter()
            .filter(|job| job.updated_at >= since && job.escalated_at.is_none())
            .collect();
        report.scanned = failed.len();

        for job in failed {
            let job_id = job.job_id.clone();
            match self.heal_one(job, now).await {
                Ok(Some(notification)) => report.notifications.insert(0, notification),
                Ok(None) => report.retried.push(job_id),
                Err(e) => error!(job_id = %job_id, "Healing failed for work item: {:#}", e),
            }
        }
        Ok(())
    }

    /// Retry `job`, or return the notification escalating it.
    async fn heal_one(
        &self,
        mut job: WorkItem,
        now: DateTime<Utc>,
    ) -> Result<Option<HealingNotification>> {
        let managed = match &job.proposal_id {
            Some(id) => self.store.get_proposal(id).await?.is_some(),
            None => false,
        };
        let prior = job.error.clone().unwrap_or_default();
        let diagnosis = diagnose(&prior);

        if managed && job.retry_count < diagnosis.category.retry_limit(self.config.max_retries) {
            job.retry_count += 1;
            job.status = JobStatus::Pending;
            job.error = Some(format!(
                "{} {}",
                retry_marker(job.retry_count),
                strip_retry_marker(&prior)
            ));
            job.current_step = None;
            job.progress_percent = 0;
            job.completed_at = None;
            job.dispatched_at = now;
            job.updated_at = now;
            self.store.save_job(&job).await?;
            info!(
                job_id = %job.job_id,
                category = %diagnosis.category,
                attempt = job.retry_count,
                "Retrying failed work item"
            );
            self.dispatcher.launch(job.job_id.clone());
            return Ok(None);
        }

        let reason = if !managed {
            format!("manual job, not retried ({})", diagnosis.reason)
        } else if !diagnosis.retryable {
            format!("{} is not retryable ({})", diagnosis.category, diagnosis.reason)
        } else {
            format!("retries exhausted after {} attempts", job.retry_count)
        };
        let notification = HealingNotification {
            job_id: job.job_id.clone(),
            brand_id: job.brand_id.clone(),
            title: job.title.clone(),
            category: diagnosis.category,
            reason,
            error_excerpt: diagnosis::excerpt(&prior, self.config.error_excerpt_chars),
            suggested_action: diagnosis.suggested_action.to_string(),
            managed,
            retry_count: job.retry_count,
            created_at: now,
        };

        job.escalated_at = Some(now);
        self.store.save_job(&job).await?;
        warn!(
            job_id = %job.job_id,
            category = %diagnosis.category,
            "Escalated failed work item: {}",
            notification.reason
        );
        Ok(Some(notification))
    }

    /// Provision an agent for every active brand without one of its own.
    pub async fn population_guard(&self) -> Result<PopulationReport> {
        let brands: Vec<_> = self
            .store
            .list_brands()
            .await?
            .into_iter()
            .filter(|b| b.active)
            .collect();
        let agents: Vec<AgentDna> = self
            .store
            .list_agents()
            .await?
            .into_iter()
            .filter(|a| a.active)
            .collect();
        let covered: HashSet<&BrandId> = agents
            .iter()
            .filter_map(|a| a.lineage_brand.as_ref())
            .collect();

        let mut report = PopulationReport {
            active_brands: brands.len(),
            active_agents: agents.len(),
            provisioned: Vec::new(),
        };
        for brand in brands.iter().filter(|b| !covered.contains(&b.brand_id)) {
            let agent = AgentDna::provision_for_brand(brand, &self.dna, self.clock.now());
            self.store.save_agent(&agent).await?;
            info!(
                brand = %brand.name,
                agent_id = %agent.agent_id,
                "Provisioned agent for uncovered brand"
            );
            report.provisioned.push(agent.agent_id);
        }
        report.active_agents += report.provisioned.len();

        if report.active_agents > report.active_brands {
            warn!(
                agents = report.active_agents,
                brands = report.active_brands,
                "More active agents than active brands"
            );
        }
        Ok(report)
    }
}
