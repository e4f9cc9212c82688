//! A content agent: turns its DNA into proposals for one brand at a time.

use rand::Rng;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::collaborators::{ProposalBrief, ProposalWriter};
use crate::model::{AgentDna, Brand, Proposal};
use crate::store::{ContentRepository, Store};
use crate::strategy::{PlanInputs, StrategyPlan, allocate};
use crate::types::{ContentType, ProposalId};

pub struct ContentAgent {
    dna: AgentDna,
    writer: Arc<dyn ProposalWriter>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl ContentAgent {
    pub fn new(
        dna: AgentDna,
        writer: Arc<dyn ProposalWriter>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            dna,
            writer,
            store,
            clock,
        }
    }

    pub fn dna(&self) -> &AgentDna {
        &self.dna
    }

    /// Produce up to `max_count` proposals for `brand`.
    ///
    /// Never fails: a proposal the writer or the store cannot produce is
    /// logged and left out, so the result may be shorter than `max_count`.
    pub async fn run(
        &self,
        max_count: usize,
        content_type: ContentType,
        brand: &Brand,
        inputs: &PlanInputs,
    ) -> Vec<Proposal> {
        let plans = {
            let mut rng = rand::rng();
            self.plan(max_count, inputs, &mut rng)
        };
        debug!(
            agent_id = %self.dna.agent_id,
            brand_id = %brand.brand_id,
            content_type = %content_type,
            planned = plans.len(),
            "Planned proposals"
        );

        let mut proposals = Vec::with_capacity(plans.len());
        for plan in plans {
            match self.propose(plan, content_type, brand).await {
                Ok(proposal) => proposals.push(proposal),
                Err(e) => error!(
                    agent_id = %self.dna.agent_id,
                    brand_id = %brand.brand_id,
                    "Proposal generation failed: {:#}", e
                ),
            }
        }

        info!(
            agent = %self.dna.name,
            brand = %brand.name,
            content_type = %content_type,
            "Generated {}/{} proposals",
            proposals.len(),
            max_count
        );
        proposals
    }

    /// One plan per requested proposal, in allocation order.
    pub fn plan<R: Rng + ?Sized>(
        &self,
        max_count: usize,
        inputs: &PlanInputs,
        rng: &mut R,
    ) -> Vec<StrategyPlan> {
        let allocation = allocate(
            max_count,
            self.dna.strategy_weights.as_map(),
            &inputs.availability(),
        );

        let mut plans = Vec::with_capacity(max_count);
        for (strategy, count) in allocation {
            for ordinal in 0..count {
                let plan = StrategyPlan::build(
                    strategy,
                    inputs,
                    self.dna.exploration,
                    ordinal as u32,
                    rng,
                )
                .unwrap_or(StrategyPlan::Explore {
                    novelty: self.dna.exploration,
                });
                plans.push(plan);
            }
        }
        plans
    }

    async fn propose(
        &self,
        plan: StrategyPlan,
        content_type: ContentType,
        brand: &Brand,
    ) -> anyhow::Result<Proposal> {
        let brief = ProposalBrief {
            agent_id: self.dna.agent_id.clone(),
            agent_name: self.dna.name.clone(),
            variant: self.dna.variant,
            risk_tolerance: self.dna.risk_tolerance,
            exploration: self.dna.exploration,
            brand_id: brand.brand_id.clone(),
            brand_name: brand.name.clone(),
            content_type,
            directive: plan.directive(),
            plan,
        };
        let draft = self.writer.write(&brief).await?;

        let proposal = Proposal {
            proposal_id: ProposalId::generate(),
            agent_id: self.dna.agent_id.clone(),
            brand_id: brand.brand_id.clone(),
            content_type,
            strategy: brief.plan.strategy(),
            plan: brief.plan,
            title: draft.title,
            body: draft.body,
            created_at: self.clock.now(),
        };
        self.store.save_proposal(&proposal).await?;
        Ok(proposal)
    }
}
