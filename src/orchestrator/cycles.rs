//! Periodic cycles and their registration with the scheduler.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{error, info, warn};

use super::Orchestrator;
use super::state::DiagnosticsReport;
use crate::core::Trigger;
use crate::error::OrchestratorResult;
use crate::evolution::{AdaptationReport, FeedbackWindow, SelectionReport};
use crate::healing::HealingReport;
use crate::model::{JobStatus, TrendTopic};
use crate::store::{AgentRepository, ContentRepository, JobRepository};

pub const CYCLE_BURST_CHECK: &str = "burst_check";
pub const CYCLE_OBSERVE: &str = "observe";
pub const CYCLE_FEEDBACK: &str = "feedback";
pub const CYCLE_HEALING: &str = "healing";
pub const CYCLE_SELECTION: &str = "selection";
pub const CYCLE_DIAGNOSTICS: &str = "diagnostics";
pub const CYCLE_BOOTSTRAP: &str = "bootstrap";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BootstrapOutcome {
    Disabled,
    /// The bootstrap settings could not be read; nothing ran.
    Unavailable,
    Matured,
    Discovered { topics: usize },
}

fn minutes(n: u64) -> Trigger {
    Trigger::Every(StdDuration::from_secs(n.max(1) * 60))
}

fn hours(n: u64) -> Trigger {
    minutes(n.max(1) * 60)
}

impl Orchestrator {
    pub(super) fn register_cycles(self: &Arc<Self>) -> OrchestratorResult<()> {
        let schedule = &self.config.schedule;

        self.scheduler.register(
            CYCLE_BURST_CHECK,
            minutes(schedule.burst_check_mins),
            self.cycle(|o| async move {
                let decision = o.check_daily_burst().await;
                tracing::debug!(?decision, "Daily burst check");
            }),
        )?;
        self.scheduler.register(
            CYCLE_OBSERVE,
            hours(schedule.observe_hours),
            self.cycle(|o| async move {
                o.run_observe_cycle().await;
            }),
        )?;
        self.scheduler.register(
            CYCLE_FEEDBACK,
            hours(schedule.feedback_hours),
            self.cycle(|o| async move {
                o.run_feedback_cycle().await;
            }),
        )?;
        self.scheduler.register(
            CYCLE_HEALING,
            minutes(schedule.healing_mins),
            self.cycle(|o| async move {
                o.run_healing_cycle().await;
            }),
        )?;
        self.scheduler.register(
            CYCLE_SELECTION,
            Trigger::Weekly {
                weekday: schedule.selection_weekday,
                hour: schedule.selection_hour,
                offset: self.reference_offset,
            },
            self.cycle(|o| async move {
                o.run_selection_cycle().await;
            }),
        )?;
        self.scheduler.register(
            CYCLE_DIAGNOSTICS,
            hours(schedule.diagnostics_hours),
            self.cycle(|o| async move {
                o.run_diagnostics_cycle().await;
            }),
        )?;
        self.scheduler.register(
            CYCLE_BOOTSTRAP,
            minutes(schedule.bootstrap_mins),
            self.cycle(|o| async move {
                o.run_bootstrap_cycle().await;
            }),
        )?;
        Ok(())
    }

    /// Wrap a cycle body so the scheduler holds only a weak reference.
    fn cycle<F, Fut>(
        self: &Arc<Self>,
        body: F,
    ) -> impl Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static
    where
        F: Fn(Arc<Orchestrator>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        move || {
            let run = weak.upgrade().map(&body);
            async move {
                if let Some(run) = run {
                    run.await;
                }
            }
            .boxed()
        }
    }

    /// Discover trend topics for every active brand.
    pub async fn run_observe_cycle(&self) -> usize {
        let discovered = self.discover_trends(CYCLE_OBSERVE).await;
        self.finish_cycle(CYCLE_OBSERVE, format!("{discovered} trend topics discovered"))
            .await;
        discovered
    }

    /// Score the last window and adapt the agents that were scored.
    pub async fn run_feedback_cycle(&self) -> AdaptationReport {
        let window = FeedbackWindow::from_config(&self.config.feedback);
        let snapshots = self.feedback.run(window).await;
        let report = self.adaptation.adapt(&snapshots).await;
        self.finish_cycle(
            CYCLE_FEEDBACK,
            format!(
                "{} agents scored, {} mutations across {} agents",
                snapshots.len(),
                report.mutations,
                report.agents_mutated
            ),
        )
        .await;
        report
    }

    pub async fn run_healing_cycle(&self) -> HealingReport {
        let report = self.healing.run().await;
        let now = self.clock.now();
        {
            let mut state = self.state.write().await;
            state.record_healing(now, &report);
            state.record_cycle(CYCLE_HEALING, now);
        }
        report
    }

    pub async fn run_selection_cycle(&self) -> SelectionReport {
        let report = self.selection.run_weekly_selection().await;
        self.state.write().await.last_selection = Some(report.clone());
        self.finish_cycle(
            CYCLE_SELECTION,
            format!(
                "{} ranked, {} archived, {} retired, {} spawned",
                report.ranked,
                report.archived.len(),
                report.retired.len(),
                report.spawned.len()
            ),
        )
        .await;
        report
    }

    pub async fn run_diagnostics_cycle(&self) -> DiagnosticsReport {
        let now = self.clock.now();
        let report = match self.diagnose(now).await {
            Ok(report) => report,
            Err(e) => {
                error!("Diagnostics failed: {:#}", e);
                DiagnosticsReport {
                    generated_at: Some(now),
                    ..Default::default()
                }
            }
        };

        if report.alert {
            warn!(
                failure_ratio = report.failure_ratio,
                failed = report.recent_failed,
                "Recent failure ratio above alert threshold"
            );
        }
        {
            let mut state = self.state.write().await;
            if report.alert {
                state.log(
                    now,
                    CYCLE_DIAGNOSTICS,
                    format!("failure ratio {:.2} above alert threshold", report.failure_ratio),
                );
            }
            state.last_diagnostics = Some(report.clone());
            state.record_cycle(CYCLE_DIAGNOSTICS, now);
        }
        report
    }

    /// Aggressive trend discovery until the system is mature, then switch off.
    pub async fn run_bootstrap_cycle(&self) -> BootstrapOutcome {
        let enabled = self
            .settings
            .bootstrap_enabled(self.config.bootstrap.enabled)
            .await;
        let started_at = match enabled {
            Ok(false) => return BootstrapOutcome::Disabled,
            Ok(true) => self.settings.bootstrap_started_at().await,
            Err(e) => Err(e),
        };
        let started_at = match started_at {
            Ok(started_at) => started_at,
            Err(e) => {
                error!("Config store unavailable, skipping bootstrap: {}", e);
                return BootstrapOutcome::Unavailable;
            }
        };

        let now = self.clock.now();
        let started_at = match started_at {
            Some(at) => at,
            None => {
                if let Err(e) = self.settings.set_bootstrap_started_at(now).await {
                    error!("Failed to record bootstrap start: {}", e);
                }
                now
            }
        };
        let trend_count = match self.store.trend_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to count trend topics: {:#}", e);
                0
            }
        };

        let aged_out = now - started_at >= Duration::days(self.config.bootstrap.max_days);
        if aged_out || trend_count >= self.config.bootstrap.trend_target {
            if let Err(e) = self.settings.set_bootstrap_enabled(false).await {
                error!("Failed to disable bootstrap mode: {}", e);
            }
            info!(trend_count, aged_out, "Bootstrap mode complete, disabling");
            self.finish_cycle(CYCLE_BOOTSTRAP, "bootstrap complete, disabled").await;
            return BootstrapOutcome::Matured;
        }

        let topics = self.discover_trends(CYCLE_BOOTSTRAP).await;
        self.finish_cycle(CYCLE_BOOTSTRAP, format!("{topics} trend topics discovered"))
            .await;
        BootstrapOutcome::Discovered { topics }
    }

    async fn discover_trends(&self, source: &str) -> usize {
        let brands = match self.store.list_brands().await {
            Ok(brands) => brands,
            Err(e) => {
                error!("Failed to list brands for trend discovery: {:#}", e);
                return 0;
            }
        };

        let mut discovered = 0;
        for brand in brands.iter().filter(|b| b.active) {
            let topics = match self.collaborators.scout.discover(brand).await {
                Ok(topics) => topics,
                Err(e) => {
                    warn!(brand = %brand.name, "Trend discovery failed: {:#}", e);
                    continue;
                }
            };
            let now = self.clock.now();
            let trends: Vec<TrendTopic> = topics
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .map(|topic| TrendTopic {
                    brand_id: brand.brand_id.clone(),
                    topic,
                    discovered_at: now,
                    source: source.to_string(),
                })
                .collect();
            if trends.is_empty() {
                continue;
            }
            match self.store.save_trends(&trends).await {
                Ok(()) => discovered += trends.len(),
                Err(e) => error!(brand = %brand.name, "Failed to save trend topics: {:#}", e),
            }
        }
        discovered
    }

    async fn diagnose(&self, now: DateTime<Utc>) -> Result<DiagnosticsReport> {
        let active_brands = self
            .store
            .list_brands()
            .await?
            .iter()
            .filter(|b| b.active)
            .count();
        let agents: Vec<_> = self
            .store
            .list_agents()
            .await?
            .into_iter()
            .filter(|a| a.active)
            .collect();
        let average_survival = if agents.is_empty() {
            0.0
        } else {
            agents.iter().map(|a| a.survival_score).sum::<f64>() / agents.len() as f64
        };
        let top_agent = agents
            .iter()
            .max_by(|a, b| a.survival_score.total_cmp(&b.survival_score))
            .map(|a| a.name.clone());

        let in_flight = self
            .store
            .jobs_with_status(&[JobStatus::Pending, JobStatus::Generating])
            .await?;
        let since = now - Duration::hours(self.config.healing.lookback_hours);
        let finished = self
            .store
            .jobs_with_status(&[JobStatus::Completed, JobStatus::Failed])
            .await?;
        let recent_failed = finished
            .iter()
            .filter(|j| j.updated_at >= since && j.status == JobStatus::Failed)
            .count();
        let recent_completed = finished
            .iter()
            .filter(|j| j.updated_at >= since && j.status == JobStatus::Completed)
            .count();
        let finished_recently = recent_failed + recent_completed;
        let failure_ratio = if finished_recently == 0 {
            0.0
        } else {
            recent_failed as f64 / finished_recently as f64
        };

        let gate = self.dispatcher.gate();
        Ok(DiagnosticsReport {
            generated_at: Some(now),
            active_brands,
            active_agents: agents.len(),
            average_survival,
            top_agent,
            pending_jobs: in_flight.iter().filter(|j| j.status == JobStatus::Pending).count(),
            generating_jobs: in_flight
                .iter()
                .filter(|j| j.status == JobStatus::Generating)
                .count(),
            recent_completed,
            recent_failed,
            failure_ratio,
            gate_capacity: gate.capacity(),
            gate_available: gate.available(),
            pending_notifications: self.state.read().await.notifications.len(),
            alert: failure_ratio > self.config.diagnostics.failure_ratio_alert,
        })
    }

    async fn finish_cycle(&self, name: &str, message: impl Into<String>) {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        state.record_cycle(name, now);
        state.log(now, name, message);
    }
}
