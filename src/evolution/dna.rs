//! Building DNA for newly spawned agents.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::IndexedRandom;

use crate::config::{DnaConfig, SelectionConfig};
use crate::model::{AgentDna, AgentVariant, GenePoolEntry, RiskTolerance};
use crate::strategy::{Strategy, StrategyWeights};
use crate::types::{AgentId, BrandId};

fn spawn_name(variant: AgentVariant, agent_id: &AgentId) -> String {
    let tag: String = agent_id.as_str().chars().take(6).collect();
    let mut label = variant.as_str().to_string();
    if let Some(first) = label.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    format!("{label}-{tag}")
}

fn blank(
    agent_id: AgentId,
    variant: AgentVariant,
    risk_tolerance: RiskTolerance,
    exploration: f64,
    strategy_weights: StrategyWeights,
    proposals_per_brand: usize,
    lineage_brand: Option<BrandId>,
    now: DateTime<Utc>,
) -> AgentDna {
    AgentDna {
        name: spawn_name(variant, &agent_id),
        agent_id,
        exploration,
        variant,
        risk_tolerance,
        strategy_weights,
        proposals_per_brand,
        active: true,
        built_in: false,
        parent_agent_id: None,
        lineage_brand,
        generation: 1,
        mutation_count: 0,
        survival_score: 0.0,
        lifetime_views: 0,
        lifetime_proposals: 0,
        lifetime_accepted: 0,
        created_at: now,
        last_mutation_at: None,
    }
}

/// Fully random DNA within the configured bounds.
pub fn randomize<R: Rng + ?Sized>(
    rng: &mut R,
    dna: &DnaConfig,
    lineage_brand: Option<BrandId>,
    now: DateTime<Utc>,
) -> AgentDna {
    let variant = *AgentVariant::ALL
        .choose(rng)
        .unwrap_or(&AgentVariant::Creator);
    let risk = *RiskTolerance::ALL
        .choose(rng)
        .unwrap_or(&RiskTolerance::Medium);
    let exploration = if dna.exploration_max > dna.exploration_min {
        rng.random_range(dna.exploration_min..=dna.exploration_max)
    } else {
        dna.exploration_min
    };
    let weights = StrategyWeights::new(
        Strategy::ALL
            .into_iter()
            .map(|strategy| (strategy, rng.random_range(0.05..1.0))),
    );

    blank(
        AgentId::generate(),
        variant,
        risk,
        exploration,
        weights,
        dna.default_proposals_per_brand,
        lineage_brand,
        now,
    )
}

/// DNA copied from an archived ancestor with small random jitter.
pub fn inherit<R: Rng + ?Sized>(
    rng: &mut R,
    ancestor: &GenePoolEntry,
    dna: &DnaConfig,
    selection: &SelectionConfig,
    lineage_brand: Option<BrandId>,
    now: DateTime<Utc>,
) -> AgentDna {
    let parent = &ancestor.dna;

    let exploration_jitter = selection.exploration_jitter.abs();
    let exploration = dna.clamp_exploration(
        parent.exploration + rng.random_range(-exploration_jitter..=exploration_jitter),
    );

    let weight_jitter = selection.weight_jitter.abs();
    let weights = StrategyWeights::new(parent.strategy_weights.iter().map(|(strategy, weight)| {
        let jittered = weight + rng.random_range(-weight_jitter..=weight_jitter);
        (strategy, jittered.max(0.0))
    }));

    let mut child = blank(
        AgentId::generate(),
        parent.variant,
        parent.risk_tolerance,
        exploration,
        weights,
        parent.proposals_per_brand,
        lineage_brand,
        now,
    );
    child.parent_agent_id = Some(parent.agent_id.clone());
    child
}
