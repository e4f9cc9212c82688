//! Persistent records shared by the engines.
//!
//! Field names avoid `id` so the records can be written as SurrealDB
//! `CONTENT` without clashing with the database's own record id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::DnaConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::strategy::{Strategy, StrategyPlan, StrategyWeights, keyed};
use crate::types::{AgentId, BrandId, ContentType, GeneEntryId, JobId, ProposalId};

/// Personality archetype of an agent; shapes the writer's voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentVariant {
    Creator,
    Analyst,
    Trendsetter,
    Curator,
}

impl AgentVariant {
    pub const ALL: [AgentVariant; 4] = [
        AgentVariant::Creator,
        AgentVariant::Analyst,
        AgentVariant::Trendsetter,
        AgentVariant::Curator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creator => "creator",
            Self::Analyst => "analyst",
            Self::Trendsetter => "trendsetter",
            Self::Curator => "curator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Low,
    Medium,
    High,
}

impl RiskTolerance {
    pub const ALL: [RiskTolerance; 3] = [
        RiskTolerance::Low,
        RiskTolerance::Medium,
        RiskTolerance::High,
    ];
}

/// The mutable identity of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDna {
    pub agent_id: AgentId,
    pub name: String,
    /// Temperature-like exploration parameter, kept within the configured range.
    pub exploration: f64,
    pub variant: AgentVariant,
    pub risk_tolerance: RiskTolerance,
    pub strategy_weights: StrategyWeights,
    pub proposals_per_brand: usize,
    pub active: bool,
    pub built_in: bool,
    pub parent_agent_id: Option<AgentId>,
    /// Brand this lineage was provisioned for. Bookkeeping only: every agent
    /// serves every brand.
    pub lineage_brand: Option<BrandId>,
    pub generation: u32,
    pub mutation_count: u32,
    pub survival_score: f64,
    pub lifetime_views: u64,
    pub lifetime_proposals: u64,
    pub lifetime_accepted: u64,
    pub created_at: DateTime<Utc>,
    pub last_mutation_at: Option<DateTime<Utc>>,
}

impl AgentDna {
    /// The agent auto-provisioned for a newly seen brand.
    pub fn provision_for_brand(brand: &Brand, dna: &DnaConfig, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: AgentId::generate(),
            name: format!("{} Studio", brand.name),
            exploration: dna.clamp_exploration(dna.default_exploration),
            variant: AgentVariant::Creator,
            risk_tolerance: RiskTolerance::Medium,
            strategy_weights: StrategyWeights::starter(),
            proposals_per_brand: dna.default_proposals_per_brand,
            active: true,
            built_in: false,
            parent_agent_id: None,
            lineage_brand: Some(brand.brand_id.clone()),
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

    /// Check the DNA invariants against the configured bounds.
    pub fn validate(&self, dna: &DnaConfig) -> OrchestratorResult<()> {
        if !self.strategy_weights.is_normalized() {
            return Err(OrchestratorError::InvalidDna(format!(
                "agent {} weights sum to {:.4}",
                self.agent_id,
                self.strategy_weights.sum()
            )));
        }
        if self.exploration < dna.exploration_min || self.exploration > dna.exploration_max {
            return Err(OrchestratorError::InvalidDna(format!(
                "agent {} exploration {:.3} outside [{}, {}]",
                self.agent_id, self.exploration, dna.exploration_min, dna.exploration_max
            )));
        }
        Ok(())
    }
}

/// Immutable per-agent result of one feedback run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub agent_id: AgentId,
    pub published_count: usize,
    pub total_views: u64,
    pub avg_views: f64,
    pub total_likes: u64,
    pub total_comments: u64,
    pub total_saves: u64,
    pub total_reach: u64,
    pub engagement_rate: f64,
    pub best_strategy: Option<Strategy>,
    pub worst_strategy: Option<Strategy>,
    #[serde(with = "keyed")]
    pub strategy_avg_views: BTreeMap<Strategy, f64>,
    #[serde(with = "keyed")]
    pub strategy_samples: BTreeMap<Strategy, usize>,
    pub consistency: f64,
    pub avg_examiner_score: f64,
    pub survival_score: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    WeightShift,
    ExplorationShift,
    Death,
    Spawn,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::WeightShift => "weight_shift",
            Self::ExplorationShift => "exploration_shift",
            Self::Death => "death",
            Self::Spawn => "spawn",
        };
        f.write_str(label)
    }
}

/// Append-only audit entry for every change made to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub agent_id: AgentId,
    pub kind: MutationKind,
    /// JSON text of the value before the change; `None` for spawns.
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub trigger: String,
    pub confidence: f64,
    pub survival_score: f64,
    pub created_at: DateTime<Utc>,
}

impl MutationRecord {
    pub fn new<O: Serialize, N: Serialize>(
        agent_id: AgentId,
        kind: MutationKind,
        old_value: Option<&O>,
        new_value: Option<&N>,
        trigger: impl Into<String>,
        confidence: f64,
        survival_score: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_id,
            kind,
            old_value: old_value.and_then(|v| serde_json::to_string(v).ok()),
            new_value: new_value.and_then(|v| serde_json::to_string(v).ok()),
            trigger: trigger.into(),
            confidence,
            survival_score,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveReason {
    TopPerformer,
    Retirement,
}

impl ArchiveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopPerformer => "top_performer",
            Self::Retirement => "retirement",
        }
    }
}

/// Archived DNA used to seed replacement agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenePoolEntry {
    pub entry_id: GeneEntryId,
    pub agent_id: AgentId,
    pub reason: ArchiveReason,
    pub survival_score: f64,
    pub dna: AgentDna,
    pub inherit_count: u32,
    pub archived_at: DateTime<Utc>,
}

impl GenePoolEntry {
    pub fn archive(dna: &AgentDna, reason: ArchiveReason, now: DateTime<Utc>) -> Self {
        Self {
            entry_id: GeneEntryId::generate(),
            agent_id: dna.agent_id.clone(),
            reason,
            survival_score: dna.survival_score,
            dna: dna.clone(),
            inherit_count: 0,
            archived_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether the job is still expected to make progress.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Generating)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A dispatched unit of work turning a proposal into a finished artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub job_id: JobId,
    /// Present when the orchestrator issued the job; absent for manual jobs.
    pub proposal_id: Option<ProposalId>,
    pub brand_id: BrandId,
    pub content_type: ContentType,
    pub title: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub retry_count: u32,
    pub current_step: Option<String>,
    pub progress_percent: u8,
    pub created_at: DateTime<Utc>,
    /// Creation time, or the time of the most recent retry.
    pub dispatched_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set once an unretryable failure has been reported to operators.
    pub escalated_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    pub fn for_proposal(proposal: &Proposal, now: DateTime<Utc>) -> Self {
        Self {
            job_id: JobId::generate(),
            proposal_id: Some(proposal.proposal_id.clone()),
            brand_id: proposal.brand_id.clone(),
            content_type: proposal.content_type,
            title: proposal.title.clone(),
            status: JobStatus::Pending,
            error: None,
            retry_count: 0,
            current_step: None,
            progress_percent: 0,
            created_at: now,
            dispatched_at: now,
            updated_at: now,
            completed_at: None,
            escalated_at: None,
        }
    }
}

/// Draft returned by the external proposal writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalDraft {
    pub title: String,
    pub body: String,
}

/// One candidate piece of content produced by an agent for one brand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: ProposalId,
    pub agent_id: AgentId,
    pub brand_id: BrandId,
    pub content_type: ContentType,
    pub strategy: Strategy,
    pub plan: StrategyPlan,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brand {
    pub brand_id: BrandId,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Brand {
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            brand_id: BrandId::generate(),
            name: name.into(),
            active: true,
            created_at: now,
        }
    }
}

/// A topic the trend scout found for a brand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendTopic {
    pub brand_id: BrandId,
    pub topic: String,
    pub discovered_at: DateTime<Utc>,
    /// Cycle that discovered the topic (`observe` or `bootstrap`).
    pub source: String,
}

/// Metrics for one published artifact, as reported by the publishing side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedItem {
    pub job_id: JobId,
    pub published_at: DateTime<Utc>,
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub saves: u64,
    pub reach: u64,
    /// Quality score from the content examiner, 0–10.
    pub examiner_score: Option<f64>,
}
