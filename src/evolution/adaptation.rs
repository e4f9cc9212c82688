//! Evidence-gated, bounded mutation of agent DNA after each feedback run.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{AdaptationConfig, DnaConfig};
use crate::model::{AgentDna, MutationKind, MutationRecord, PerformanceSnapshot};
use crate::store::{AgentRepository, Store};
use crate::strategy::{Strategy, StrategyWeights};

pub const TRIGGER_FEEDBACK: &str = "feedback";

/// A mutation the evidence supports, before it is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposedMutation {
    WeightShift {
        from: Strategy,
        to: Strategy,
        amount: f64,
        confidence: f64,
        old: StrategyWeights,
        new: StrategyWeights,
    },
    ExplorationShift {
        old: f64,
        new: f64,
    },
}

impl ProposedMutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::WeightShift { .. } => MutationKind::WeightShift,
            Self::ExplorationShift { .. } => MutationKind::ExplorationShift,
        }
    }
}

/// Ratio of best to worst strategy average views. A worst average of zero
/// against a positive best is unbounded dominance.
fn dominance(best_avg: f64, worst_avg: f64) -> Option<f64> {
    if worst_avg > 0.0 {
        Some(best_avg / worst_avg)
    } else if best_avg > 0.0 {
        Some(f64::INFINITY)
    } else {
        None
    }
}

fn propose_weight_shift(
    agent: &AgentDna,
    snapshot: &PerformanceSnapshot,
    config: &AdaptationConfig,
) -> Option<ProposedMutation> {
    let best = snapshot.best_strategy?;
    let worst = snapshot.worst_strategy?;
    if best == worst {
        return None;
    }

    let best_avg = snapshot.strategy_avg_views.get(&best).copied()?;
    let worst_avg = snapshot.strategy_avg_views.get(&worst).copied()?;
    let ratio = dominance(best_avg, worst_avg)?;
    if ratio < config.dominance_ratio {
        return None;
    }

    let confidence = ((ratio - 1.0) / 2.0).min(1.0);
    if confidence < config.confidence_threshold {
        debug!(agent_id = %agent.agent_id, ratio, confidence, "Weight shift below confidence");
        return None;
    }

    let old = agent.strategy_weights.clone();
    let amount = config
        .weight_shift_cap
        .min(old.get(worst) - config.min_weight)
        .max(0.0);
    if amount <= f64::EPSILON {
        return None;
    }

    let mut new = old.clone();
    new.set(worst, old.get(worst) - amount);
    new.set(best, old.get(best) + amount);
    new.normalize();

    Some(ProposedMutation::WeightShift {
        from: worst,
        to: best,
        amount,
        confidence,
        old,
        new,
    })
}

fn propose_exploration_shift(
    agent: &AgentDna,
    snapshot: &PerformanceSnapshot,
    config: &AdaptationConfig,
    dna: &DnaConfig,
) -> Option<ProposedMutation> {
    let old = agent.exploration;
    let target = if snapshot.survival_score > config.exploit_above {
        old - config.exploration_shift_cap
    } else if snapshot.survival_score < config.explore_below {
        old + config.exploration_shift_cap
    } else {
        return None;
    };

    let new = dna.clamp_exploration(target);
    if (new - old).abs() < 1e-9 {
        return None;
    }
    Some(ProposedMutation::ExplorationShift { old, new })
}

/// Mutations supported by one snapshot. Pure: nothing is applied.
pub fn propose_mutations(
    agent: &AgentDna,
    snapshot: &PerformanceSnapshot,
    config: &AdaptationConfig,
    dna: &DnaConfig,
) -> Vec<ProposedMutation> {
    if snapshot.published_count < config.min_samples {
        return Vec::new();
    }

    propose_weight_shift(agent, snapshot, config)
        .into_iter()
        .chain(propose_exploration_shift(agent, snapshot, config, dna))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdaptationReport {
    pub agents_mutated: usize,
    pub mutations: usize,
}

pub struct AdaptationEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: AdaptationConfig,
    dna: DnaConfig,
}

impl AdaptationEngine {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: AdaptationConfig,
        dna: DnaConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            dna,
        }
    }

    /// Apply the supported mutations for each snapshot's agent.
    pub async fn adapt(&self, snapshots: &[PerformanceSnapshot]) -> AdaptationReport {
        let mut report = AdaptationReport::default();
        for snapshot in snapshots {
            match self.adapt_agent(snapshot).await {
                Ok(0) => {}
                Ok(applied) => {
                    report.agents_mutated += 1;
                    report.mutations += applied;
                }
                Err(e) => error!(agent_id = %snapshot.agent_id, "Adaptation failed: {:#}", e),
            }
        }
        if report.mutations > 0 {
            info!(
                "Adaptation applied {} mutations across {} agents",
                report.mutations, report.agents_mutated
            );
        }
        report
    }

    async fn adapt_agent(&self, snapshot: &PerformanceSnapshot) -> Result<usize> {
        let Some(mut agent) = self.store.get_agent(&snapshot.agent_id).await? else {
            return Ok(0);
        };
        if !agent.active {
            return Ok(0);
        }

        let proposed = propose_mutations(&agent, snapshot, &self.config, &self.dna);
        if proposed.is_empty() {
            return Ok(0);
        }

        let now = self.clock.now();
        let expected_generation = agent.generation;
        let mut records = Vec::with_capacity(proposed.len());
        for mutation in &proposed {
            let record = match mutation {
                ProposedMutation::WeightShift {
                    from,
                    to,
                    amount,
                    confidence,
                    old,
                    new,
                } => {
                    info!(
                        agent_id = %agent.agent_id,
                        "Shifting {:.3} weight from {} to {} (confidence {:.2})",
                        amount, from, to, confidence
                    );
                    agent.strategy_weights = new.clone();
                    MutationRecord::new(
                        agent.agent_id.clone(),
                        MutationKind::WeightShift,
                        Some(old),
                        Some(new),
                        TRIGGER_FEEDBACK,
                        *confidence,
                        snapshot.survival_score,
                        now,
                    )
                }
                ProposedMutation::ExplorationShift { old, new } => {
                    info!(
                        agent_id = %agent.agent_id,
                        "Exploration {:.3} -> {:.3} at survival {:.1}",
                        old, new, snapshot.survival_score
                    );
                    agent.exploration = *new;
                    MutationRecord::new(
                        agent.agent_id.clone(),
                        MutationKind::ExplorationShift,
                        Some(old),
                        Some(new),
                        TRIGGER_FEEDBACK,
                        1.0,
                        snapshot.survival_score,
                        now,
                    )
                }
            };
            records.push(record);
        }

        agent.generation += 1;
        agent.mutation_count += proposed.len() as u32;
        agent.last_mutation_at = Some(now);
        if !self.store.apply_mutation(&agent, expected_generation).await? {
            warn!(
                agent_id = %agent.agent_id,
                generation = expected_generation,
                "Agent changed while adapting, skipping this round"
            );
            return Ok(0);
        }
        for record in &records {
            self.store.append_mutation(record).await?;
        }
        Ok(proposed.len())
    }
}
