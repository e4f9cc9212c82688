//! The daily burst: fan proposal generation out across brands and agents.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

use super::Orchestrator;
use crate::agent::ContentAgent;
use crate::model::{AgentDna, Brand};
use crate::store::{AgentRepository, ContentRepository};
use crate::strategy::PlanInputs;
use crate::types::{AgentId, BrandId, ContentType};

/// Outcome of one agent's share for one brand.
#[derive(Debug, Clone, Serialize)]
pub struct AgentTally {
    pub agent_id: AgentId,
    pub brand_id: BrandId,
    pub requested: usize,
    pub proposals: usize,
    pub dispatched: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub content_type: ContentType,
    pub agents: Vec<AgentTally>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BurstReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub manual: bool,
    pub brands: usize,
    pub phases: Vec<PhaseReport>,
}

impl BurstReport {
    fn sum(&self, field: impl Fn(&AgentTally) -> usize) -> usize {
        self.phases
            .iter()
            .flat_map(|phase| phase.agents.iter())
            .map(field)
            .sum()
    }

    pub fn total_proposals(&self) -> usize {
        self.sum(|t| t.proposals)
    }

    pub fn total_dispatched(&self) -> usize {
        self.sum(|t| t.dispatched)
    }

    pub fn total_failures(&self) -> usize {
        self.sum(|t| t.failures)
    }
}

/// Split a per-brand quota across agents ordered by seniority.
///
/// Integer division with the remainder going to the earliest agents; each
/// share is then capped by the agent's own per-brand quota.
pub fn split_quota(quota: usize, caps: &[usize]) -> Vec<usize> {
    if caps.is_empty() {
        return Vec::new();
    }
    let base = quota / caps.len();
    let remainder = quota % caps.len();
    caps.iter()
        .enumerate()
        .map(|(i, cap)| (base + usize::from(i < remainder)).min(*cap))
        .collect()
}

impl Orchestrator {
    pub(super) async fn run_burst(&self, manual: bool) -> Result<BurstReport> {
        let started_at = self.clock.now();
        let brands: Vec<Brand> = self
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

        let mut report = BurstReport {
            started_at,
            finished_at: started_at,
            manual,
            brands: brands.len(),
            phases: Vec::new(),
        };
        if brands.is_empty() || agents.is_empty() {
            warn!(
                brands = brands.len(),
                agents = agents.len(),
                "Nothing to burst: no active brands or agents"
            );
            return Ok(report);
        }

        info!(
            brands = brands.len(),
            agents = agents.len(),
            manual,
            "Starting content burst"
        );
        let inputs: Vec<PlanInputs> = join_all(brands.iter().map(|b| self.plan_inputs(b))).await;
        let caps: Vec<usize> = agents.iter().map(|a| a.proposals_per_brand).collect();

        for content_type in ContentType::PHASES {
            let quota = match content_type {
                ContentType::Reel => self.config.burst.reels_per_brand,
                ContentType::Post => self.config.burst.posts_per_brand,
            };
            let shares = split_quota(quota, &caps);

            let mut tasks = Vec::new();
            for (brand, brand_inputs) in brands.iter().zip(&inputs) {
                for (agent, share) in agents.iter().zip(&shares) {
                    if *share > 0 {
                        tasks.push(self.generate(agent, brand, content_type, *share, brand_inputs));
                    }
                }
            }
            let tallies = join_all(tasks).await;
            self.record_lifetime(&tallies).await;

            let phase = PhaseReport {
                content_type,
                agents: tallies,
            };
            info!(
                content_type = %content_type,
                proposals = phase.agents.iter().map(|t| t.proposals).sum::<usize>(),
                failures = phase.agents.iter().map(|t| t.failures).sum::<usize>(),
                "Burst phase finished"
            );
            report.phases.push(phase);
        }

        report.finished_at = self.clock.now();
        Ok(report)
    }

    async fn generate(
        &self,
        dna: &AgentDna,
        brand: &Brand,
        content_type: ContentType,
        share: usize,
        inputs: &PlanInputs,
    ) -> AgentTally {
        let agent = ContentAgent::new(
            dna.clone(),
            self.collaborators.writer.clone(),
            self.store.clone(),
            self.clock.clone(),
        );
        let proposals = agent.run(share, content_type, brand, inputs).await;

        let mut tally = AgentTally {
            agent_id: dna.agent_id.clone(),
            brand_id: brand.brand_id.clone(),
            requested: share,
            proposals: proposals.len(),
            dispatched: 0,
            failures: share.saturating_sub(proposals.len()),
        };
        for proposal in &proposals {
            match self.dispatcher.dispatch(proposal).await {
                Ok(_) => tally.dispatched += 1,
                Err(e) => {
                    tally.failures += 1;
                    error!(
                        proposal_id = %proposal.proposal_id,
                        agent_id = %dna.agent_id,
                        "Failed to dispatch proposal: {:#}", e
                    );
                }
            }
        }
        tally
    }

    async fn plan_inputs(&self, brand: &Brand) -> PlanInputs {
        let winners = match self
            .collaborators
            .outcomes
            .top_performers(&brand.brand_id, self.config.burst.winners_per_request)
            .await
        {
            Ok(winners) => winners,
            Err(e) => {
                warn!(brand = %brand.name, "Failed to load winners: {:#}", e);
                Vec::new()
            }
        };
        let topics = match self
            .store
            .recent_trends(&brand.brand_id, self.config.burst.topics_per_request)
            .await
        {
            Ok(trends) => trends.into_iter().map(|t| t.topic).collect(),
            Err(e) => {
                warn!(brand = %brand.name, "Failed to load trend topics: {:#}", e);
                Vec::new()
            }
        };
        PlanInputs { winners, topics }
    }

    /// Fold a phase's tallies into each agent's lifetime counters.
    pub(super) async fn record_lifetime(&self, tallies: &[AgentTally]) {
        let mut totals: BTreeMap<&AgentId, (u64, u64)> = BTreeMap::new();
        for tally in tallies {
            let entry = totals.entry(&tally.agent_id).or_default();
            entry.0 += tally.proposals as u64;
            entry.1 += tally.dispatched as u64;
        }

        for (agent_id, (proposals, dispatched)) in totals {
            let result = self
                .store
                .add_lifetime_counts(agent_id, proposals, dispatched)
                .await;
            if let Err(e) = result {
                error!(agent_id = %agent_id, "Failed to update lifetime counters: {:#}", e);
            }
        }
    }
}
