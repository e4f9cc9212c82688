//! Weekly natural selection over the active agent population.
//!
//! Agents are ranked by survival score and tiered. Strong agents are archived
//! to the gene pool; persistently weak ones are retired and each retirement
//! spawns exactly one replacement, inherited from the gene pool or random.

use anyhow::{Result, anyhow};
use rand::{Rng, SeedableRng};
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::{DnaConfig, SelectionConfig};
use crate::evolution::dna;
use crate::model::{AgentDna, ArchiveReason, GenePoolEntry, MutationKind, MutationRecord};
use crate::store::{AgentRepository, Store};
use crate::types::AgentId;

pub const TRIGGER_SELECTION: &str = "selection";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Thriving,
    Surviving,
    Struggling,
}

/// Sizes of the thriving and surviving tiers for `n` ranked agents.
///
/// Each boundary is `max(1, ceil(n * fraction))`, so a non-empty population
/// always has a thriving agent. The struggling tier gets what is left.
pub fn tier_sizes(n: usize, config: &SelectionConfig) -> (usize, usize) {
    if n == 0 {
        return (0, 0);
    }
    let boundary = |fraction: f64| ((n as f64 * fraction).ceil() as usize).max(1);
    let thriving = boundary(config.thriving_fraction).min(n);
    let surviving = boundary(config.surviving_fraction).min(n - thriving);
    (thriving, surviving)
}

/// Assign a tier to each agent of a population sorted best first.
pub fn tiers(n: usize, config: &SelectionConfig) -> Vec<Tier> {
    let (thriving, surviving) = tier_sizes(n, config);
    (0..n)
        .map(|rank| {
            if rank < thriving {
                Tier::Thriving
            } else if rank < thriving + surviving {
                Tier::Surviving
            } else {
                Tier::Struggling
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SelectionReport {
    pub ranked: usize,
    pub thriving: usize,
    pub surviving: usize,
    pub struggling: usize,
    pub archived: Vec<AgentId>,
    pub retired: Vec<AgentId>,
    pub spawned: Vec<AgentId>,
}

pub struct SelectionEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: SelectionConfig,
    dna: DnaConfig,
    rng: Mutex<StdRng>,
}

impl SelectionEngine {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: SelectionConfig,
        dna: DnaConfig,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self {
            store,
            clock,
            config,
            dna,
            rng: Mutex::new(rng),
        }
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run one selection pass. Failures are logged and yield the partial report.
    pub async fn run_weekly_selection(&self) -> SelectionReport {
        let mut report = SelectionReport::default();
        if let Err(e) = self.try_run(&mut report).await {
            error!("Selection run failed: {:#}", e);
        }
        info!(
            "Selection ranked {} agents: {} archived, {} retired, {} spawned",
            report.ranked,
            report.archived.len(),
            report.retired.len(),
            report.spawned.len()
        );
        report
    }

    async fn try_run(&self, report: &mut SelectionReport) -> Result<()> {
        let mut ranked: Vec<AgentDna> = self
            .store
            .list_agents()
            .await?
            .into_iter()
            .filter(|a| a.active)
            .collect();
        ranked.sort_by(|a, b| b.survival_score.total_cmp(&a.survival_score));

        let tiers = tiers(ranked.len(), &self.config);
        report.ranked = ranked.len();
        report.thriving = tiers.iter().filter(|t| **t == Tier::Thriving).count();
        report.surviving = tiers.iter().filter(|t| **t == Tier::Surviving).count();
        report.struggling = tiers.iter().filter(|t| **t == Tier::Struggling).count();

        let pool = self.store.gene_pool().await?;
        let mut active_count = ranked.len();

        for (agent, tier) in ranked.iter().zip(tiers) {
            match tier {
                Tier::Thriving if agent.survival_score > self.config.archive_threshold => {
                    let already = pool.iter().any(|entry| {
                        entry.agent_id == agent.agent_id
                            && entry.reason == ArchiveReason::TopPerformer
                    });
                    if !already {
                        let now = self.clock.now();
                        let entry = GenePoolEntry::archive(agent, ArchiveReason::TopPerformer, now);
                        self.store.archive_gene(&entry).await?;
                        info!(
                            agent_id = %agent.agent_id,
                            score = agent.survival_score,
                            "Archived top performer"
                        );
                        report.archived.push(agent.agent_id.clone());
                    }
                }
                Tier::Struggling => {
                    if !self.death_eligible(agent, active_count).await? {
                        continue;
                    }
                    match self.retire(agent).await {
                        Ok(()) => {
                            report.retired.push(agent.agent_id.clone());
                            active_count -= 1;
                        }
                        Err(e) => {
                            error!(agent_id = %agent.agent_id, "Retirement failed: {:#}", e);
                            continue;
                        }
                    }
                    match self.spawn_replacement(agent).await {
                        Ok(child) => {
                            report.spawned.push(child.agent_id);
                            active_count += 1;
                        }
                        Err(e) => {
                            error!(agent_id = %agent.agent_id, "Replacement spawn failed: {:#}", e)
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Whether retiring `agent` is allowed with `active_count` agents active.
    pub async fn death_eligible(&self, agent: &AgentDna, active_count: usize) -> Result<bool> {
        if agent.built_in || !agent.active {
            return Ok(false);
        }
        if active_count.saturating_sub(1) <= self.config.protected_minimum {
            return Ok(false);
        }
        if agent.survival_score >= self.config.death_threshold {
            return Ok(false);
        }
        if self.store.snapshot_count(&agent.agent_id).await? < self.config.min_feedback_cycles {
            return Ok(false);
        }

        let window = self.config.death_window.max(1);
        let recent = self.store.recent_snapshots(&agent.agent_id, window).await?;
        Ok(recent.len() >= window
            && recent
                .iter()
                .all(|s| s.survival_score < self.config.death_threshold))
    }

    async fn retire(&self, ranked: &AgentDna) -> Result<()> {
        let now = self.clock.now();
        // Archive the row as it is now, not as it was when the pass ranked it.
        let agent = self
            .store
            .get_agent(&ranked.agent_id)
            .await?
            .unwrap_or_else(|| ranked.clone());
        let entry = GenePoolEntry::archive(&agent, ArchiveReason::Retirement, now);
        self.store.archive_gene(&entry).await?;
        self.store.deactivate_agent(&agent.agent_id).await?;

        self.store
            .append_mutation(&MutationRecord::new::<AgentDna, bool>(
                agent.agent_id.clone(),
                MutationKind::Death,
                Some(&agent),
                Some(&false),
                TRIGGER_SELECTION,
                1.0,
                agent.survival_score,
                now,
            ))
            .await?;
        warn!(
            agent_id = %agent.agent_id,
            score = agent.survival_score,
            "Retired agent after sustained low survival"
        );
        Ok(())
    }

    /// Create the replacement for `dead`, inherited or random.
    pub async fn spawn_replacement(&self, dead: &AgentDna) -> Result<AgentDna> {
        let now = self.clock.now();
        let pool = self.store.gene_pool().await?;
        let ancestor = self.pick_ancestor(&pool, &dead.agent_id);

        let child = {
            let mut rng = self.rng();
            match &ancestor {
                Some(entry) => dna::inherit(
                    &mut *rng,
                    entry,
                    &self.dna,
                    &self.config,
                    dead.lineage_brand.clone(),
                    now,
                ),
                None => dna::randomize(&mut *rng, &self.dna, dead.lineage_brand.clone(), now),
            }
        };
        child.validate(&self.dna)?;

        self.store.save_agent(&child).await?;
        if let Some(entry) = &ancestor {
            self.store.increment_inheritance(&entry.entry_id).await?;
        }
        self.store
            .append_mutation(&MutationRecord::new::<AgentDna, AgentDna>(
                child.agent_id.clone(),
                MutationKind::Spawn,
                None,
                Some(&child),
                TRIGGER_SELECTION,
                1.0,
                0.0,
                now,
            ))
            .await?;

        info!(
            agent_id = %child.agent_id,
            replaces = %dead.agent_id,
            inherited_from = ancestor.as_ref().map(|e| e.agent_id.to_string()).unwrap_or_default(),
            "Spawned replacement agent"
        );
        Ok(child)
    }

    /// Weighted pick among the top gene pool entries, or `None` for a random spawn.
    fn pick_ancestor(&self, pool: &[GenePoolEntry], exclude: &AgentId) -> Option<GenePoolEntry> {
        let mut rng = self.rng();
        if !rng.random_bool(self.config.inherit_probability.clamp(0.0, 1.0)) {
            return None;
        }

        let mut candidates: Vec<&GenePoolEntry> =
            pool.iter().filter(|entry| &entry.agent_id != exclude).collect();
        candidates.sort_by(|a, b| b.survival_score.total_cmp(&a.survival_score));
        candidates.truncate(self.config.gene_pool_top_k.max(1));
        if candidates.is_empty() {
            return None;
        }

        let weights: Vec<f64> = candidates
            .iter()
            .map(|entry| entry.survival_score.max(0.0) + 1.0)
            .collect();
        let index = WeightedIndex::new(&weights)
            .map_err(|e| anyhow!("failed to weight gene pool: {e}"))
            .map(|dist| dist.sample(&mut *rng));
        match index {
            Ok(i) => candidates.get(i).map(|entry| (*entry).clone()),
            Err(e) => {
                warn!("{:#}", e);
                None
            }
        }
    }
}
