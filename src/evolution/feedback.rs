//! Attributes published outcomes to the agents that proposed them and scores
//! each agent's fitness.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::collaborators::OutcomeSource;
use crate::config::FeedbackConfig;
use crate::model::{PerformanceSnapshot, PublishedItem};
use crate::store::{AgentRepository, ContentRepository, JobRepository, Store};
use crate::strategy::Strategy;
use crate::types::AgentId;

/// Attribution window, in hours before now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackWindow {
    pub start_hours_ago: u32,
    pub end_hours_ago: u32,
}

impl FeedbackWindow {
    pub fn from_config(config: &FeedbackConfig) -> Self {
        Self {
            start_hours_ago: config.window_start_hours,
            end_hours_ago: config.window_end_hours,
        }
    }

    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            now - Duration::hours(i64::from(self.start_hours_ago)),
            now - Duration::hours(i64::from(self.end_hours_ago)),
        )
    }
}

/// Raw per-agent totals collected while attributing a window.
#[derive(Debug, Default, Clone)]
struct AgentTally {
    views: Vec<u64>,
    likes: u64,
    comments: u64,
    saves: u64,
    reach: u64,
    examiner_total: f64,
    strategy_views: BTreeMap<Strategy, Vec<u64>>,
}

impl AgentTally {
    fn add(&mut self, item: &PublishedItem, strategy: Strategy) {
        self.views.push(item.views);
        self.likes += item.likes;
        self.comments += item.comments;
        self.saves += item.saves;
        self.reach += item.reach;
        self.examiner_total += item.examiner_score.unwrap_or(0.0).clamp(0.0, 10.0);
        self.strategy_views
            .entry(strategy)
            .or_default()
            .push(item.views);
    }
}

fn mean(values: &[u64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64
    }
}

/// Scale `value` onto 0–100 against `cap`.
fn normalize(value: f64, cap: f64) -> f64 {
    if cap <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    (value / cap * 100.0).clamp(0.0, 100.0)
}

/// `(likes + comments + saves) / reach`, or 0 without reach.
pub fn engagement_rate(likes: u64, comments: u64, saves: u64, reach: u64) -> f64 {
    if reach == 0 {
        0.0
    } else {
        (likes + comments + saves) as f64 / reach as f64
    }
}

/// How steady an agent's views are: 100 means identical, 0 means the spread
/// is at least as large as the mean. One sample is neutral (50).
pub fn consistency(views: &[u64]) -> f64 {
    match views.len() {
        0 => 0.0,
        1 => 50.0,
        n => {
            let avg = mean(views);
            if avg <= 0.0 {
                return 0.0;
            }
            let variance = views
                .iter()
                .map(|v| {
                    let d = *v as f64 - avg;
                    d * d
                })
                .sum::<f64>()
                / n as f64;
            ((1.0 - variance.sqrt() / avg) * 100.0).clamp(0.0, 100.0)
        }
    }
}

/// Composite fitness in [0, 100], rounded to one decimal.
pub fn survival_score(
    avg_views: f64,
    engagement_rate: f64,
    consistency: f64,
    avg_examiner_score: f64,
    config: &FeedbackConfig,
) -> f64 {
    let w = &config.survival_weights;
    let score = w.views * normalize(avg_views, config.views_cap)
        + w.engagement * normalize(engagement_rate * 1000.0, config.engagement_cap)
        + w.consistency * consistency.clamp(0.0, 100.0)
        + w.examiner * normalize(avg_examiner_score / 10.0 * 100.0, 100.0);
    ((score * 10.0).round() / 10.0).clamp(0.0, 100.0)
}

pub struct FeedbackEngine {
    store: Arc<dyn Store>,
    outcomes: Arc<dyn OutcomeSource>,
    clock: Arc<dyn Clock>,
    config: FeedbackConfig,
}

impl FeedbackEngine {
    pub fn new(
        store: Arc<dyn Store>,
        outcomes: Arc<dyn OutcomeSource>,
        clock: Arc<dyn Clock>,
        config: FeedbackConfig,
    ) -> Self {
        Self {
            store,
            outcomes,
            clock,
            config,
        }
    }

    /// Score every agent with published items in `window`.
    ///
    /// Returns the snapshots written. Any internal failure is logged and
    /// yields an empty result.
    pub async fn run(&self, window: FeedbackWindow) -> Vec<PerformanceSnapshot> {
        match self.try_run(window).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                error!("Feedback run failed: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn try_run(&self, window: FeedbackWindow) -> Result<Vec<PerformanceSnapshot>> {
        let now = self.clock.now();
        let (start, end) = window.bounds(now);
        let items = self.outcomes.published_between(start, end).await?;
        debug!(items = items.len(), %start, %end, "Attributing published items");

        let mut tallies: BTreeMap<AgentId, AgentTally> = BTreeMap::new();
        let mut unattributed = 0usize;
        for item in &items {
            let Some(job) = self.store.get_job(&item.job_id).await? else {
                unattributed += 1;
                continue;
            };
            let Some(proposal_id) = job.proposal_id else {
                unattributed += 1;
                continue;
            };
            let Some(proposal) = self.store.get_proposal(&proposal_id).await? else {
                unattributed += 1;
                continue;
            };
            tallies
                .entry(proposal.agent_id)
                .or_default()
                .add(item, proposal.strategy);
        }

        let mut snapshots = Vec::with_capacity(tallies.len());
        for (agent_id, tally) in tallies {
            let snapshot = self.snapshot(agent_id, &tally, start, end, now);
            self.store.append_snapshot(&snapshot).await?;

            self.store
                .record_survival(
                    &snapshot.agent_id,
                    snapshot.survival_score,
                    snapshot.total_views,
                )
                .await?;
            debug!(
                agent_id = %snapshot.agent_id,
                survival = snapshot.survival_score,
                published = snapshot.published_count,
                "Recorded performance snapshot"
            );
            snapshots.push(snapshot);
        }

        info!(
            "Feedback attributed {} items to {} agents ({} unattributed)",
            items.len() - unattributed,
            snapshots.len(),
            unattributed
        );
        Ok(snapshots)
    }

    fn snapshot(
        &self,
        agent_id: AgentId,
        tally: &AgentTally,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> PerformanceSnapshot {
        let published_count = tally.views.len();
        let total_views: u64 = tally.views.iter().sum();
        let avg_views = mean(&tally.views);
        let rate = engagement_rate(tally.likes, tally.comments, tally.saves, tally.reach);
        let steadiness = consistency(&tally.views);
        let avg_examiner = if published_count == 0 {
            0.0
        } else {
            tally.examiner_total / published_count as f64
        };

        let strategy_avg_views: BTreeMap<Strategy, f64> = tally
            .strategy_views
            .iter()
            .map(|(strategy, views)| (*strategy, mean(views)))
            .collect();
        let strategy_samples: BTreeMap<Strategy, usize> = tally
            .strategy_views
            .iter()
            .map(|(strategy, views)| (*strategy, views.len()))
            .collect();

        let mut best: Option<(Strategy, f64)> = None;
        let mut worst: Option<(Strategy, f64)> = None;
        for (strategy, avg) in &strategy_avg_views {
            if best.is_none_or(|(_, b)| *avg > b) {
                best = Some((*strategy, *avg));
            }
            if worst.is_none_or(|(_, w)| *avg < w) {
                worst = Some((*strategy, *avg));
            }
        }

        PerformanceSnapshot {
            agent_id,
            published_count,
            total_views,
            avg_views,
            total_likes: tally.likes,
            total_comments: tally.comments,
            total_saves: tally.saves,
            total_reach: tally.reach,
            engagement_rate: rate,
            best_strategy: best.map(|(s, _)| s),
            worst_strategy: worst.map(|(s, _)| s),
            strategy_avg_views,
            strategy_samples,
            consistency: steadiness,
            avg_examiner_score: avg_examiner,
            survival_score: survival_score(avg_views, rate, steadiness, avg_examiner, &self.config),
            window_start,
            window_end,
            recorded_at: now,
        }
    }
}
